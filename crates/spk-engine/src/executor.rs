//! Applies one version artifact to one tenant database.
//!
//! The whole sequence runs on a single connection: bookkeeping DDL →
//! idempotency probe → transactional { artifact SQL; version insert }.
//! Artifact SQL is executed verbatim; the executor never parses or rewrites
//! it.

use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use spk_config::Settings;
use sqlx::{Connection, Executor, PgConnection};
use tracing::debug;

use crate::job::{DbResult, StopFlag, SKIP_ALREADY_APPLIED, SKIP_STOP_REQUESTED};

/// Per-tenant ledger of applied versions. Safe to run repeatedly.
pub const VERSION_TABLE_SQL: &str = "\
CREATE TABLE IF NOT EXISTS schema_propagation_version (
    version_id VARCHAR PRIMARY KEY,
    applied_at TIMESTAMPTZ DEFAULT NOW(),
    checksum VARCHAR
);";

const RETRY_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// The version being propagated, shared read-only by every unit of a job.
#[derive(Debug, Clone)]
pub struct ApplySpec {
    pub version_id: String,
    pub checksum: String,
    pub sql: String,
    pub dry_run: bool,
}

/// Apply `spec` to `database`, returning an outcome value.
///
/// Failures are data, not errors: connection refusal, exhausted retries and
/// permanent SQL errors all come back as `DbStatus::Failed` with the error
/// text. `duration_ms` covers this call only, not pre-dispatch queueing.
pub async fn apply_to_database(
    settings: &Settings,
    spec: &ApplySpec,
    database: &str,
    stop: &StopFlag,
) -> DbResult {
    let started = Instant::now();

    if stop.is_set() {
        return DbResult::skipped(database, SKIP_STOP_REQUESTED, elapsed_ms(started));
    }

    match apply_on_connection(settings, spec, database, started).await {
        Ok(result) => result,
        Err(e) => DbResult::failed(database, format!("{e:#}"), elapsed_ms(started)),
    }
}

/// Open the tenant connection, run the apply sequence, close on all paths.
async fn apply_on_connection(
    settings: &Settings,
    spec: &ApplySpec,
    database: &str,
    started: Instant,
) -> Result<DbResult> {
    let mut conn = spk_db::connect_tenant(settings, database).await?;
    let outcome = apply_sequence(&mut conn, settings, spec, database, started).await;
    conn.close().await.ok();
    outcome
}

async fn apply_sequence(
    conn: &mut PgConnection,
    settings: &Settings,
    spec: &ApplySpec,
    database: &str,
    started: Instant,
) -> Result<DbResult> {
    conn.execute(VERSION_TABLE_SQL)
        .await
        .context("bookkeeping table DDL failed")?;

    let already: Option<(i32,)> =
        sqlx::query_as("SELECT 1 FROM schema_propagation_version WHERE version_id = $1")
            .bind(&spec.version_id)
            .fetch_optional(&mut *conn)
            .await
            .context("idempotency probe failed")?;
    if already.is_some() {
        return Ok(DbResult::skipped(
            database,
            SKIP_ALREADY_APPLIED,
            elapsed_ms(started),
        ));
    }

    if spec.dry_run {
        return Ok(DbResult::success(database, elapsed_ms(started)));
    }

    let mut attempt: u32 = 1;
    loop {
        match apply_transaction(conn, spec).await {
            Ok(()) => return Ok(DbResult::success(database, elapsed_ms(started))),
            Err(e) => {
                if !spk_db::is_transient_error(&e) || attempt >= settings.max_retries {
                    return Ok(DbResult::failed(database, e.to_string(), elapsed_ms(started)));
                }
                let backoff = RETRY_BACKOFF_BASE * 2u32.pow(attempt - 1);
                debug!(database, attempt, backoff_secs = backoff.as_secs(), error = %e, "transient apply error; retrying");
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}

/// The artifact SQL and the version insert commit together or not at all.
/// Dropping the transaction on the error path rolls it back.
async fn apply_transaction(conn: &mut PgConnection, spec: &ApplySpec) -> sqlx::Result<()> {
    let mut tx = conn.begin().await?;

    (&mut *tx).execute(spec.sql.as_str()).await?;

    sqlx::query("INSERT INTO schema_propagation_version (version_id, checksum) VALUES ($1, $2)")
        .bind(&spec.version_id)
        .bind(&spec.checksum)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}
