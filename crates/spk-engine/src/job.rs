//! Propagation job bookkeeping: per-database outcomes, shared job handles,
//! and the in-process registry.
//!
//! Counters live behind a single `RwLock` so every observer sees a state
//! where `completed = successful + failed + skipped`. The stop flag is a
//! separate atomic: units probe it without taking the lock, and it only ever
//! goes false → true.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::warn;
use uuid::Uuid;

/// Errors retained on the job itself; snapshots expose at most
/// [`SNAPSHOT_ERROR_CAP`] of them.
pub const MAX_RETAINED_ERRORS: usize = 100;
pub const SNAPSHOT_ERROR_CAP: usize = 10;

/// Completions required before the circuit breaker may trip.
const BREAKER_WARMUP_COMPLETIONS: u64 = 10;

/// Skip causes carried in `DbResult.error`. Cancellation skips must stay
/// distinguishable from idempotent hits.
pub const SKIP_ALREADY_APPLIED: &str = "already applied";
pub const SKIP_STOP_REQUESTED: &str = "stop requested";

// ---------------------------------------------------------------------------
// Status enums
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Stopped,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Stopped => "stopped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "in_progress" => Some(JobStatus::InProgress),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "stopped" => Some(JobStatus::Stopped),
            _ => None,
        }
    }

    /// Terminal states are immutable; counters freeze once reached.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Stopped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbStatus {
    Success,
    Skipped,
    Failed,
}

impl DbStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbStatus::Success => "success",
            DbStatus::Skipped => "skipped",
            DbStatus::Failed => "failed",
        }
    }
}

// ---------------------------------------------------------------------------
// Per-database outcome
// ---------------------------------------------------------------------------

/// Outcome of applying one version to one tenant database.
#[derive(Debug, Clone)]
pub struct DbResult {
    pub database: String,
    pub status: DbStatus,
    pub error: Option<String>,
    pub duration_ms: f64,
}

impl DbResult {
    pub fn success(database: &str, duration_ms: f64) -> Self {
        Self {
            database: database.to_string(),
            status: DbStatus::Success,
            error: None,
            duration_ms,
        }
    }

    pub fn skipped(database: &str, cause: &str, duration_ms: f64) -> Self {
        Self {
            database: database.to_string(),
            status: DbStatus::Skipped,
            error: Some(cause.to_string()),
            duration_ms,
        }
    }

    pub fn failed(database: &str, error: String, duration_ms: f64) -> Self {
        Self {
            database: database.to_string(),
            status: DbStatus::Failed,
            error: Some(error),
            duration_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub database: String,
    pub error: String,
}

// ---------------------------------------------------------------------------
// Stop flag
// ---------------------------------------------------------------------------

/// Monotone false→true cancellation signal shared by a job and its units.
#[derive(Debug, Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Set the flag, returning whether this call was the transition.
    fn set_once(&self) -> bool {
        !self.0.swap(true, Ordering::AcqRel)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct JobCounters {
    status: JobStatus,
    completed: u64,
    successful: u64,
    failed: u64,
    skipped: u64,
    errors: Vec<JobError>,
}

/// One propagation run over one version and one database list.
///
/// Shared as `Arc<Job>` between the dispatcher, the registry, and any number
/// of progress observers.
#[derive(Debug)]
pub struct Job {
    job_id: String,
    version_id: String,
    total: u64,
    started_at: DateTime<Utc>,
    started_instant: Instant,
    stop: StopFlag,
    counters: RwLock<JobCounters>,
}

impl Job {
    pub fn new(version_id: &str, total: u64) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            job_id: format!("prop_{}", &suffix[..12]),
            version_id: version_id.to_string(),
            total,
            started_at: Utc::now(),
            started_instant: Instant::now(),
            stop: StopFlag::new(),
            counters: RwLock::new(JobCounters {
                status: JobStatus::Pending,
                completed: 0,
                successful: 0,
                failed: 0,
                skipped: 0,
                errors: Vec::new(),
            }),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn version_id(&self) -> &str {
        &self.version_id
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Cancellation handle for dispatch units.
    pub fn stop_flag(&self) -> StopFlag {
        self.stop.clone()
    }

    /// External stop request (caller or breaker). New work will not be
    /// dispatched; in-flight units finish normally.
    pub fn request_stop(&self) {
        if self.stop.set_once() {
            warn!(job_id = %self.job_id, "stop requested");
        }
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_set()
    }

    pub async fn mark_in_progress(&self) {
        let mut counters = self.counters.write().await;
        if counters.status == JobStatus::Pending {
            counters.status = JobStatus::InProgress;
        }
    }

    /// Merge one unit outcome and evaluate the circuit breaker.
    ///
    /// No-op once the job is terminal.
    pub async fn record_outcome(&self, result: &DbResult, error_threshold_percent: f64) {
        let tripped = {
            let mut counters = self.counters.write().await;
            if counters.status.is_terminal() {
                return;
            }
            counters.completed += 1;
            match result.status {
                DbStatus::Success => counters.successful += 1,
                DbStatus::Skipped => counters.skipped += 1,
                DbStatus::Failed => {
                    counters.failed += 1;
                    if counters.errors.len() < MAX_RETAINED_ERRORS {
                        counters.errors.push(JobError {
                            database: result.database.clone(),
                            error: result
                                .error
                                .clone()
                                .unwrap_or_else(|| "unknown error".to_string()),
                        });
                    }
                }
            }

            self.total > 0
                && counters.completed > BREAKER_WARMUP_COMPLETIONS
                && (counters.failed as f64 / self.total as f64) * 100.0 > error_threshold_percent
        };

        if tripped && self.stop.set_once() {
            let counters = self.counters.read().await;
            warn!(
                job_id = %self.job_id,
                failed = counters.failed,
                total = self.total,
                "error threshold exceeded; halting dispatch"
            );
        }
    }

    /// Compute the terminal status once every unit has produced an outcome.
    ///
    /// Rules: stop requested → STOPPED; all-failures (and at least one) →
    /// FAILED; otherwise COMPLETED. An empty database list lands here with
    /// zero counters and completes immediately.
    pub async fn finish(&self) {
        let mut counters = self.counters.write().await;
        if counters.status.is_terminal() {
            return;
        }
        counters.status = if self.stop.is_set() {
            JobStatus::Stopped
        } else if counters.failed > 0 && counters.successful == 0 {
            JobStatus::Failed
        } else {
            JobStatus::Completed
        };
    }

    /// Consistent point-in-time view with derived rate/ETA.
    pub async fn snapshot(&self) -> JobSnapshot {
        let counters = self.counters.read().await;
        let elapsed_secs = self.started_instant.elapsed().as_secs_f64();
        let rate = if elapsed_secs > 0.0 {
            counters.completed as f64 / elapsed_secs
        } else {
            0.0
        };
        let remaining = self.total.saturating_sub(counters.completed);
        let eta_seconds = if rate > 0.0 {
            (remaining as f64 / rate) as u64
        } else {
            0
        };

        JobSnapshot {
            job_id: self.job_id.clone(),
            version_id: self.version_id.clone(),
            status: counters.status,
            total: self.total,
            completed: counters.completed,
            successful: counters.successful,
            failed: counters.failed,
            skipped: counters.skipped,
            elapsed_secs,
            rate,
            eta_seconds,
            errors: counters
                .errors
                .iter()
                .take(SNAPSHOT_ERROR_CAP)
                .cloned()
                .collect(),
        }
    }
}

/// Serializable copy of a job's state at one observation point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: String,
    pub version_id: String,
    pub status: JobStatus,
    pub total: u64,
    pub completed: u64,
    pub successful: u64,
    pub failed: u64,
    pub skipped: u64,
    pub elapsed_secs: f64,
    /// Databases per second; 0 when elapsed is 0.
    pub rate: f64,
    /// `(total - completed) / rate`; 0 when rate is 0.
    pub eta_seconds: u64,
    /// First few retained errors (full log stays on the job).
    pub errors: Vec<JobError>,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Process-local `job_id → job` map. Jobs live for the process lifetime;
/// durability is an external concern.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<Job>>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self, version_id: &str, total: u64) -> Arc<Job> {
        let job = Arc::new(Job::new(version_id, total));
        self.jobs
            .write()
            .await
            .insert(job.job_id().to_string(), Arc::clone(&job));
        job
    }

    pub async fn get(&self, job_id: &str) -> Option<Arc<Job>> {
        self.jobs.read().await.get(job_id).cloned()
    }

    /// Acknowledge a stop request. Returns false when the job is unknown.
    pub async fn request_stop(&self, job_id: &str) -> bool {
        match self.get(job_id).await {
            Some(job) => {
                job.request_stop();
                true
            }
            None => false,
        }
    }
}
