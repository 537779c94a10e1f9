//! Lazy progress snapshots for one job.
//!
//! Each observer gets an independent stream: a snapshot roughly every
//! 500 ms, then one final snapshot once the job is terminal, then the end
//! of the stream.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, Stream};

use crate::job::{Job, JobSnapshot};

pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Snapshot stream for `job`. Restartable; any number of observers may
/// stream the same job concurrently.
pub fn job_progress(job: Arc<Job>) -> impl Stream<Item = JobSnapshot> {
    job_progress_with_interval(job, PROGRESS_INTERVAL)
}

/// Interval-parameterized variant so tests do not sleep for real.
pub fn job_progress_with_interval(
    job: Arc<Job>,
    interval: Duration,
) -> impl Stream<Item = JobSnapshot> {
    stream::unfold((job, true, false), move |(job, first, done)| async move {
        if done {
            return None;
        }
        if !first {
            tokio::time::sleep(interval).await;
        }
        let snapshot = job.snapshot().await;
        let terminal = snapshot.status.is_terminal();
        Some((snapshot, (job, false, terminal)))
    })
}
