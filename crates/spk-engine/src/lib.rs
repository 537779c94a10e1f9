//! Concurrent, cancellable, idempotent fan-out of versioned DDL artifacts
//! across a fleet of tenant databases.
//!
//! The pieces, leaves first: [`executor`] applies one version to one
//! database; [`propagator`] fans the executor out under a bounded semaphore
//! with a global error-rate circuit breaker; [`job`] holds per-job counters
//! and the in-process registry; [`stream`] turns a job into a sequence of
//! progress snapshots; [`metrics`] exposes outcome instruments.

pub mod executor;
pub mod job;
pub mod metrics;
pub mod propagator;
pub mod stream;

pub use executor::{apply_to_database, ApplySpec, VERSION_TABLE_SQL};
pub use job::{
    DbResult, DbStatus, Job, JobError, JobRegistry, JobSnapshot, JobStatus, StopFlag,
    SKIP_ALREADY_APPLIED, SKIP_STOP_REQUESTED,
};
pub use propagator::{run, start, PropagateOptions};
pub use stream::{job_progress, job_progress_with_interval, PROGRESS_INTERVAL};
