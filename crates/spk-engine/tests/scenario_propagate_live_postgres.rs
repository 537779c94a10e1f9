//! End-to-end propagation scenarios against a live PostgreSQL.
//!
//! All tests are `#[ignore]`d: they need a reachable control database with
//! CREATEDB rights, configured through the usual DB_* environment
//! variables. Run with:
//!
//! ```text
//! DB_ENDPOINT=localhost DB_USERNAME=postgres DB_PASSWORD=postgres \
//!   cargo test -p spk-engine -- --include-ignored
//! ```
//!
//! Tenant databases are created and dropped through the simulator; each
//! test uses its own prefix so runs do not interfere.

use std::sync::Arc;
use std::time::Duration;

use spk_config::Settings;
use spk_engine::{ApplySpec, JobRegistry, JobStatus, PropagateOptions};
use sqlx::Connection;

/// Env-backed settings forced onto the direct endpoint (no pgbouncer in CI).
fn live_settings() -> Settings {
    Settings::from_lookup(|key| match key {
        "USE_PGBOUNCER" => Some("false".to_string()),
        other => std::env::var(other).ok(),
    })
    .expect("live settings")
}

fn spec(version_id: &str, sql: &str) -> ApplySpec {
    ApplySpec {
        version_id: version_id.to_string(),
        checksum: spk_store::checksum16(sql),
        sql: sql.to_string(),
        dry_run: false,
    }
}

async fn wait_terminal(job: &spk_engine::Job) -> spk_engine::JobSnapshot {
    for _ in 0..600 {
        let snap = job.snapshot().await;
        if snap.status.is_terminal() {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    panic!("job did not reach a terminal state in time");
}

async fn applied_versions(settings: &Settings, db: &str) -> Vec<String> {
    let mut conn = spk_db::connect(&settings.db_dsn(db, false))
        .await
        .expect("tenant connect");
    let rows: Vec<(String,)> =
        sqlx::query_as("SELECT version_id FROM schema_propagation_version ORDER BY version_id")
            .fetch_all(&mut conn)
            .await
            .expect("version rows");
    conn.close().await.ok();
    rows.into_iter().map(|(v,)| v).collect()
}

#[tokio::test]
#[ignore = "requires a live Postgres; set DB_ENDPOINT/DB_USERNAME/DB_PASSWORD and run with --include-ignored"]
async fn happy_path_then_idempotent_reapply() {
    let settings = Arc::new(live_settings());
    let registry = JobRegistry::new();

    let dbs = spk_sim::create_test_databases(&settings, 3, "spk_happy_", 1, None)
        .await
        .expect("create test dbs");
    assert_eq!(dbs.len(), 3);

    let sql = "ALTER TABLE IF EXISTS users ADD COLUMN IF NOT EXISTS x INT;";
    let apply = spec("20240101_000000", sql);

    // First pass: everything applies.
    let job = spk_engine::run(
        Arc::clone(&settings),
        &registry,
        apply.clone(),
        dbs.clone(),
        PropagateOptions::default(),
    )
    .await
    .expect("run");
    let snap = wait_terminal(&job).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.total, 3);
    assert_eq!(snap.successful, 3);
    assert_eq!(snap.failed, 0);
    assert_eq!(snap.skipped, 0);

    for db in &dbs {
        assert_eq!(
            applied_versions(&settings, db).await,
            vec!["20240101_000000".to_string()],
            "exactly one ledger row per database"
        );
    }

    // Second pass: every database skips; no new ledger rows.
    let job = spk_engine::run(
        Arc::clone(&settings),
        &registry,
        apply,
        dbs.clone(),
        PropagateOptions::default(),
    )
    .await
    .expect("re-run");
    let snap = wait_terminal(&job).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.successful, 0);
    assert_eq!(snap.skipped, 3);
    assert_eq!(snap.failed, 0);

    for db in &dbs {
        assert_eq!(applied_versions(&settings, db).await.len(), 1);
    }

    spk_sim::cleanup_test_databases(&settings, &dbs)
        .await
        .expect("cleanup");
}

#[tokio::test]
#[ignore = "requires a live Postgres; set DB_ENDPOINT/DB_USERNAME/DB_PASSWORD and run with --include-ignored"]
async fn dry_run_reports_success_without_writing() {
    let settings = Arc::new(live_settings());
    let registry = JobRegistry::new();

    let dbs = spk_sim::create_test_databases(&settings, 5, "spk_dry_", 1, None)
        .await
        .expect("create test dbs");

    let sql = "CREATE TABLE IF NOT EXISTS dry_run_t (id INT);";
    let mut apply = spec("20240102_000000", sql);
    apply.dry_run = true;

    let job = spk_engine::run(
        Arc::clone(&settings),
        &registry,
        apply,
        dbs.clone(),
        PropagateOptions::default(),
    )
    .await
    .expect("run");
    let snap = wait_terminal(&job).await;
    assert_eq!(snap.status, JobStatus::Completed);
    assert_eq!(snap.successful, 5);

    // Nothing was recorded in any ledger.
    for db in &dbs {
        assert!(applied_versions(&settings, db).await.is_empty());
    }

    spk_sim::cleanup_test_databases(&settings, &dbs)
        .await
        .expect("cleanup");
}

#[tokio::test]
#[ignore = "requires a live Postgres; set DB_ENDPOINT/DB_USERNAME/DB_PASSWORD and run with --include-ignored"]
async fn partial_failure_below_threshold_still_completes() {
    let settings = Arc::new(live_settings());
    let registry = JobRegistry::new();

    let dbs = spk_sim::create_test_databases(&settings, 20, "spk_partial_", 1, None)
        .await
        .expect("create test dbs");

    // Poison one database: the un-guarded CREATE TABLE below collides there.
    {
        let mut conn = spk_db::connect(&settings.db_dsn(&dbs[0], false))
            .await
            .expect("poison connect");
        sqlx::query("CREATE TABLE poison_t (id INT)")
            .execute(&mut conn)
            .await
            .expect("poison table");
        conn.close().await.ok();
    }

    let sql = "CREATE TABLE poison_t (id INT);";
    let job = spk_engine::run(
        Arc::clone(&settings),
        &registry,
        spec("20240103_000000", sql),
        dbs.clone(),
        PropagateOptions::default(),
    )
    .await
    .expect("run");

    let snap = wait_terminal(&job).await;
    assert_eq!(snap.status, JobStatus::Completed, "1/20 is below threshold");
    assert_eq!(snap.failed, 1);
    assert_eq!(snap.successful, 19);
    assert_eq!(snap.errors.len(), 1);
    assert_eq!(snap.errors[0].database, dbs[0]);

    spk_sim::cleanup_test_databases(&settings, &dbs)
        .await
        .expect("cleanup");
}

#[tokio::test]
#[ignore = "requires a live Postgres; set DB_ENDPOINT/DB_USERNAME/DB_PASSWORD and run with --include-ignored"]
async fn stop_request_skips_pending_units() {
    let settings = Arc::new(live_settings());
    let registry = JobRegistry::new();

    let dbs = spk_sim::create_test_databases(&settings, 40, "spk_stop_", 1, None)
        .await
        .expect("create test dbs");

    // Narrow the semaphore so most units are still queued when the stop
    // request lands.
    let job = spk_engine::start(
        Arc::clone(&settings),
        &registry,
        spec(
            "20240104_000000",
            "ALTER TABLE IF EXISTS users ADD COLUMN IF NOT EXISTS y INT;",
        ),
        dbs.clone(),
        PropagateOptions {
            max_connections: Some(2),
            ..Default::default()
        },
    )
    .await
    .expect("start");

    job.request_stop();

    let snap = wait_terminal(&job).await;
    assert_eq!(snap.status, JobStatus::Stopped);
    assert_eq!(snap.completed, 40, "every unit still produces an outcome");
    assert_eq!(
        snap.completed,
        snap.successful + snap.failed + snap.skipped
    );
    assert!(snap.skipped > 0, "queued units must skip after the stop");
    assert_eq!(snap.failed, 0);

    spk_sim::cleanup_test_databases(&settings, &dbs)
        .await
        .expect("cleanup");
}
