//! Concurrent fan-out of one version over a tenant database list.
//!
//! One task per database, gated by a semaphore of width `max_concurrent`.
//! Outcomes are merged as they arrive; order across databases is
//! unspecified. Duplicate names in the input are processed once per
//! occurrence; idempotency turns the repeats into skips.

use std::sync::Arc;

use anyhow::{bail, Result};
use spk_config::Settings;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::info;

use crate::executor::{self, ApplySpec};
use crate::job::{DbResult, Job, JobRegistry, SKIP_STOP_REQUESTED};
use crate::metrics;

/// Knobs for one propagation run.
#[derive(Debug, Clone)]
pub struct PropagateOptions {
    /// Semaphore width; `None` falls back to
    /// `Settings::max_concurrent_connections`.
    pub max_connections: Option<usize>,
    /// Metric label for this run's artifact kind.
    pub schema_type: String,
}

impl Default for PropagateOptions {
    fn default() -> Self {
        Self {
            max_connections: None,
            schema_type: "version".to_string(),
        }
    }
}

/// Create the job and return it immediately; dispatch continues in a
/// background task. This is what the HTTP surface calls.
pub async fn start(
    settings: Arc<Settings>,
    registry: &JobRegistry,
    spec: ApplySpec,
    databases: Vec<String>,
    options: PropagateOptions,
) -> Result<Arc<Job>> {
    let (job, max_concurrent) = prepare(&settings, registry, &spec, &databases, &options).await?;

    let dispatch_job = Arc::clone(&job);
    tokio::spawn(async move {
        dispatch(
            settings,
            dispatch_job,
            Arc::new(spec),
            databases,
            max_concurrent,
            options.schema_type,
        )
        .await;
    });

    Ok(job)
}

/// Create the job and drive dispatch to completion. CLI, benchmarks and
/// tests use this form.
pub async fn run(
    settings: Arc<Settings>,
    registry: &JobRegistry,
    spec: ApplySpec,
    databases: Vec<String>,
    options: PropagateOptions,
) -> Result<Arc<Job>> {
    let (job, max_concurrent) = prepare(&settings, registry, &spec, &databases, &options).await?;

    dispatch(
        settings,
        Arc::clone(&job),
        Arc::new(spec),
        databases,
        max_concurrent,
        options.schema_type,
    )
    .await;

    Ok(job)
}

/// Validate, create, register, and flip the job to IN_PROGRESS.
async fn prepare(
    settings: &Settings,
    registry: &JobRegistry,
    spec: &ApplySpec,
    databases: &[String],
    options: &PropagateOptions,
) -> Result<(Arc<Job>, usize)> {
    let max_concurrent = options
        .max_connections
        .unwrap_or(settings.max_concurrent_connections);
    if max_concurrent == 0 {
        bail!("max_connections must be >= 1");
    }

    let job = registry.create(&spec.version_id, databases.len() as u64).await;
    job.mark_in_progress().await;
    info!(
        job_id = %job.job_id(),
        version_id = %spec.version_id,
        total = databases.len(),
        max_concurrent,
        dry_run = spec.dry_run,
        "propagation started"
    );
    Ok((job, max_concurrent))
}

async fn dispatch(
    settings: Arc<Settings>,
    job: Arc<Job>,
    spec: Arc<ApplySpec>,
    databases: Vec<String>,
    max_concurrent: usize,
    schema_type: String,
) {
    let semaphore = Arc::new(Semaphore::new(max_concurrent));
    let mut units: JoinSet<DbResult> = JoinSet::new();

    for database in databases {
        let semaphore = Arc::clone(&semaphore);
        let settings = Arc::clone(&settings);
        let spec = Arc::clone(&spec);
        let stop = job.stop_flag();
        units.spawn(async move {
            // The permit is the connection slot; everything the unit does
            // happens inside it.
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return DbResult::skipped(&database, SKIP_STOP_REQUESTED, 0.0),
            };
            if stop.is_set() {
                return DbResult::skipped(&database, SKIP_STOP_REQUESTED, 0.0);
            }
            executor::apply_to_database(&settings, &spec, &database, &stop).await
        });
    }

    while let Some(joined) = units.join_next().await {
        let result = match joined {
            Ok(result) => result,
            // A unit never panics by construction; account for the join
            // error anyway so completed still reaches total.
            Err(e) => DbResult::failed("<unknown>", format!("unit join error: {e}"), 0.0),
        };

        job.record_outcome(&result, settings.error_threshold_percent)
            .await;
        metrics::observe_outcome(result.status, &schema_type, result.duration_ms);
        metrics::set_rate(job.snapshot().await.rate);
    }

    job.finish().await;

    let snap = job.snapshot().await;
    info!(
        job_id = %job.job_id(),
        status = snap.status.as_str(),
        successful = snap.successful,
        failed = snap.failed,
        skipped = snap.skipped,
        "propagation finished"
    );
}
