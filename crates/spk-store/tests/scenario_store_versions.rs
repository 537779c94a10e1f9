//! Filesystem scenarios for the version store.
//!
//! All tests run against a throwaway `tempfile` tree; no database needed.

use spk_store::{checksum16, NewVersion, VersionStore};

fn version(desc: &str, upgrade: &str, downgrade: &str) -> NewVersion {
    NewVersion {
        description: desc.to_string(),
        upgrade_sql: upgrade.to_string(),
        downgrade_sql: downgrade.to_string(),
        revision_id: Some("abc123".to_string()),
    }
}

#[test]
fn put_then_get_round_trips_both_payloads() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");

    let upgrade = "ALTER TABLE IF EXISTS users ADD COLUMN IF NOT EXISTS x INT;\n";
    let downgrade = "ALTER TABLE IF EXISTS users DROP COLUMN IF EXISTS x;\n";
    let put = store
        .put(&version("add x", upgrade, downgrade))
        .expect("put");

    let artifact = store
        .get(&put.version_id)
        .expect("get")
        .expect("version must exist after put");
    assert_eq!(artifact.upgrade_sql, upgrade);
    assert_eq!(artifact.downgrade_sql, downgrade);
    assert_eq!(artifact.description, "add x");
    assert_eq!(artifact.revision_id.as_deref(), Some("abc123"));
    assert_eq!(artifact.version_id, put.version_id);
}

#[test]
fn checksum_is_sha256_prefix_of_upgrade_sql() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");

    let upgrade = "CREATE TABLE IF NOT EXISTS t (id INT);";
    let put = store.put(&version("t", upgrade, "")).expect("put");

    assert_eq!(put.checksum, checksum16(upgrade));
    assert_eq!(put.checksum.len(), 16);
    assert!(put
        .checksum
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

    // Stored metadata carries the same checksum.
    let artifact = store.get(&put.version_id).expect("get").expect("exists");
    assert_eq!(artifact.checksum, put.checksum);
}

#[test]
fn get_unknown_version_returns_none() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");
    assert!(store.get("20240101_000000").expect("get").is_none());
}

#[test]
fn same_second_puts_obtain_distinct_ids() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");

    let a = store.put(&version("a", "SELECT 1;", "")).expect("put a");
    let b = store.put(&version("b", "SELECT 2;", "")).expect("put b");
    let c = store.put(&version("c", "SELECT 3;", "")).expect("put c");

    assert_ne!(a.version_id, b.version_id);
    assert_ne!(b.version_id, c.version_id);
    assert_ne!(a.version_id, c.version_id);
}

#[test]
fn list_is_descending_and_skips_unreadable_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");

    let mut ids: Vec<String> = (0..3)
        .map(|i| {
            store
                .put(&version(&format!("v{i}"), "SELECT 1;", ""))
                .expect("put")
                .version_id
        })
        .collect();

    // A directory without metadata.json is not a version.
    std::fs::create_dir(dir.path().join("not_a_version")).expect("mkdir");
    std::fs::write(dir.path().join("not_a_version/upgrade.sql"), "SELECT 1;").expect("write");

    // A directory with corrupt metadata.json is skipped, not fatal.
    std::fs::create_dir(dir.path().join("99999999_999999")).expect("mkdir");
    std::fs::write(dir.path().join("99999999_999999/metadata.json"), "{oops").expect("write");

    let listed = store.list().expect("list");
    let listed_ids: Vec<String> = listed.iter().map(|m| m.version_id.clone()).collect();

    ids.sort();
    ids.reverse();
    assert_eq!(listed_ids, ids, "descending version_id order, junk skipped");
}

#[test]
fn empty_store_lists_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = VersionStore::open(dir.path()).expect("open");
    assert!(store.list().expect("list").is_empty());
}
