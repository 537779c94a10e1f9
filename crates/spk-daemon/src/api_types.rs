//! Request and response types for all spk-daemon HTTP endpoints.
//!
//! These types are `Serialize + Deserialize` so they can be JSON-encoded
//! by Axum and decoded by tests. No business logic lives here.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// /health
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: &'static str,
    pub version: &'static str,
}

// ---------------------------------------------------------------------------
// Error body (404 / 400 / 500)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ---------------------------------------------------------------------------
// POST /schema/generate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub description: String,
    pub upgrade_sql: String,
    #[serde(default)]
    pub downgrade_sql: String,
    #[serde(default)]
    pub revision_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedFiles {
    pub upgrade: String,
    pub downgrade: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub success: bool,
    pub version_id: String,
    pub checksum: String,
    pub files: GeneratedFiles,
}

// ---------------------------------------------------------------------------
// GET /schema/versions/:version_id
// ---------------------------------------------------------------------------

/// Full artifact detail, both SQL payloads included.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactResponse {
    pub version_id: String,
    pub revision_id: Option<String>,
    pub checksum: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub upgrade_sql: String,
    pub downgrade_sql: String,
}

// ---------------------------------------------------------------------------
// GET /schema/databases
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct DatabasesQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

pub fn default_pattern() -> String {
    "cmp_%".to_string()
}

// ---------------------------------------------------------------------------
// POST /schema/propagate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagateRequest {
    pub version_id: String,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_pattern")]
    pub database_pattern: String,
}

pub fn default_max_connections() -> usize {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropagateAccepted {
    pub job_id: String,
    pub status: String,
    pub total_databases: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopResponse {
    pub status: String,
}

// ---------------------------------------------------------------------------
// /schema/simulate
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateCreateRequest {
    pub count: u32,
    #[serde(default = "default_prefix")]
    pub prefix: String,
    #[serde(default = "default_start_id")]
    pub start_id: u32,
    #[serde(default)]
    pub template_db: Option<String>,
}

pub fn default_prefix() -> String {
    "cmp_".to_string()
}

pub fn default_start_id() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateCreateResponse {
    pub created: usize,
    /// First few created names; the full list can be large.
    pub databases: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CleanupQuery {
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupResponse {
    pub removed: usize,
}

// ---------------------------------------------------------------------------
// POST /schema/benchmark
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkRequest {
    #[serde(default = "default_database_counts")]
    pub database_counts: Vec<u32>,
    #[serde(default = "default_schema_types")]
    pub schema_types: Vec<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

pub fn default_database_counts() -> Vec<u32> {
    vec![100, 500, 1000]
}

pub fn default_schema_types() -> Vec<String> {
    vec!["add_column".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub db_count: u32,
    pub schema_type: String,
    pub duration_sec: f64,
    pub rate: f64,
    pub avg_ms_per_db: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkResponse {
    pub benchmark_id: String,
    pub results: Vec<BenchmarkResult>,
}
