//! Shared runtime state for spk-daemon.
//!
//! Handlers receive `State<Arc<AppState>>` from Axum. The job registry and
//! the version store are both owned here; the propagation engine borrows
//! them per request.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use spk_config::Settings;
use spk_engine::JobRegistry;
use spk_store::VersionStore;

/// Static build metadata included in health responses.
#[derive(Clone, Debug)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub settings: Arc<Settings>,
    pub store: VersionStore,
    pub registry: JobRegistry,
    pub build: BuildInfo,
}

impl AppState {
    /// Production construction: store root from `Settings::sql_versions_dir`.
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let root = PathBuf::from(&settings.sql_versions_dir);
        Self::with_store_root(settings, root)
    }

    /// Test seam: same state, arbitrary store root (e.g. a tempdir).
    pub fn with_store_root(settings: Settings, store_root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            settings: Arc::new(settings),
            store: VersionStore::open(store_root)?,
            registry: JobRegistry::new(),
            build: BuildInfo {
                service: "spk-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        })
    }
}
