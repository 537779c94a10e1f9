//! Immutable, content-identified SQL version artifacts on disk.
//!
//! One directory per version under the store root:
//!
//! ```text
//! <root>/<version_id>/
//!   upgrade.sql
//!   downgrade.sql
//!   metadata.json
//! ```
//!
//! `metadata.json` is written last; readers treat its absence as "not a
//! version". Once written, a version is never mutated.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::warn;

/// First 16 hex chars of SHA-256 over the upgrade SQL bytes.
pub fn checksum16(sql: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sql.as_bytes());
    hex::encode(hasher.finalize())[..16].to_string()
}

/// The `metadata.json` record for one version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionMeta {
    pub version_id: String,
    pub revision_id: Option<String>,
    /// 16 lowercase hex chars; always `checksum16(upgrade_sql)`.
    pub checksum: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

/// A fully loaded version: metadata plus both SQL payloads.
#[derive(Debug, Clone)]
pub struct Artifact {
    pub version_id: String,
    pub revision_id: Option<String>,
    pub checksum: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub upgrade_sql: String,
    pub downgrade_sql: String,
}

/// Inputs for [`VersionStore::put`].
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub description: String,
    pub upgrade_sql: String,
    pub downgrade_sql: String,
    pub revision_id: Option<String>,
}

/// Result of a successful [`VersionStore::put`].
#[derive(Debug, Clone)]
pub struct PutResult {
    pub version_id: String,
    pub checksum: String,
    pub upgrade_path: PathBuf,
    pub downgrade_path: PathBuf,
}

/// Filesystem-backed version store. `put` is the only writer; `get` and
/// `list` are pure readers.
#[derive(Debug, Clone)]
pub struct VersionStore {
    root: PathBuf,
}

impl VersionStore {
    /// Open the store, creating the root directory if missing.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .with_context(|| format!("create versions dir failed: {}", root.display()))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Materialize a new version directory and return its identity.
    ///
    /// Write order: `upgrade.sql`, `downgrade.sql`, then `metadata.json`.
    pub fn put(&self, new: &NewVersion) -> Result<PutResult> {
        let (version_id, dir) = self.claim_version_dir()?;
        let checksum = checksum16(&new.upgrade_sql);

        let upgrade_path = dir.join("upgrade.sql");
        let downgrade_path = dir.join("downgrade.sql");
        fs::write(&upgrade_path, &new.upgrade_sql)
            .with_context(|| format!("write upgrade.sql failed: {}", upgrade_path.display()))?;
        fs::write(&downgrade_path, &new.downgrade_sql)
            .with_context(|| format!("write downgrade.sql failed: {}", downgrade_path.display()))?;

        let meta = VersionMeta {
            version_id: version_id.clone(),
            revision_id: new.revision_id.clone(),
            checksum: checksum.clone(),
            description: new.description.clone(),
            created_at: Utc::now(),
        };
        let meta_path = dir.join("metadata.json");
        let json = serde_json::to_string_pretty(&meta).context("serialize metadata failed")?;
        fs::write(&meta_path, format!("{json}\n"))
            .with_context(|| format!("write metadata failed: {}", meta_path.display()))?;

        Ok(PutResult {
            version_id,
            checksum,
            upgrade_path,
            downgrade_path,
        })
    }

    /// Load one version. `Ok(None)` when the directory or `metadata.json`
    /// is absent.
    pub fn get(&self, version_id: &str) -> Result<Option<Artifact>> {
        let dir = self.root.join(version_id);
        let meta = match read_meta(&dir) {
            Some(Ok(meta)) => meta,
            Some(Err(e)) => return Err(e),
            None => return Ok(None),
        };

        let upgrade_path = dir.join("upgrade.sql");
        let upgrade_sql = fs::read_to_string(&upgrade_path)
            .with_context(|| format!("read upgrade.sql failed: {}", upgrade_path.display()))?;
        let downgrade_path = dir.join("downgrade.sql");
        let downgrade_sql = fs::read_to_string(&downgrade_path)
            .with_context(|| format!("read downgrade.sql failed: {}", downgrade_path.display()))?;

        Ok(Some(Artifact {
            version_id: meta.version_id,
            revision_id: meta.revision_id,
            checksum: meta.checksum,
            description: meta.description,
            created_at: meta.created_at,
            upgrade_sql,
            downgrade_sql,
        }))
    }

    /// List all versions, newest `version_id` first.
    ///
    /// Entries without a readable `metadata.json` are skipped, not fatal.
    pub fn list(&self) -> Result<Vec<VersionMeta>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("read versions dir failed: {}", self.root.display()))
            }
        };

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.context("read versions dir entry failed")?;
            match read_meta(&entry.path()) {
                Some(Ok(meta)) => versions.push(meta),
                Some(Err(e)) => {
                    warn!(path = %entry.path().display(), error = %e, "skipping unreadable version entry");
                }
                None => {}
            }
        }

        versions.sort_by(|a, b| b.version_id.cmp(&a.version_id));
        Ok(versions)
    }

    /// Claim a fresh `<root>/<version_id>/` directory.
    ///
    /// The id is the UTC second stamp; `fs::create_dir` is the atomic claim,
    /// and same-second collisions append a `_2`, `_3`… disambiguator so
    /// concurrent writers always obtain distinct ids.
    fn claim_version_dir(&self) -> Result<(String, PathBuf)> {
        let stamp = Utc::now().format("%Y%m%d_%H%M%S").to_string();
        let mut candidate = stamp.clone();
        let mut n = 1u32;
        loop {
            let dir = self.root.join(&candidate);
            match fs::create_dir(&dir) {
                Ok(()) => return Ok((candidate, dir)),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    n += 1;
                    candidate = format!("{stamp}_{n}");
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("create version dir failed: {}", dir.display()))
                }
            }
        }
    }
}

/// `None` = not a version (no dir / no metadata.json); `Some(Err)` = present
/// but unreadable.
fn read_meta(dir: &Path) -> Option<Result<VersionMeta>> {
    let meta_path = dir.join("metadata.json");
    let raw = match fs::read_to_string(&meta_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return None,
        Err(e) => {
            return Some(
                Err(e).with_context(|| format!("read metadata failed: {}", meta_path.display())),
            )
        }
    };
    Some(
        serde_json::from_str(&raw)
            .with_context(|| format!("parse metadata failed: {}", meta_path.display())),
    )
}
