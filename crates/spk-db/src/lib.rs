//! Connection plumbing shared by the propagation engine, simulator and CLI.
//!
//! Everything here opens single `PgConnection`s. Client-side pools are
//! deliberately absent: the propagation semaphore is the only connection
//! governor, and the network-level pooler (pgbouncer) is an endpoint choice,
//! not a client object.

use anyhow::{Context, Result};
use spk_config::Settings;
use sqlx::postgres::PgConnectOptions;
use sqlx::{ConnectOptions, Connection, PgConnection};
use tracing::warn;

/// Open a single connection to an arbitrary DSN.
pub async fn connect(dsn: &str) -> Result<PgConnection> {
    PgConnection::connect(dsn)
        .await
        .context("failed to connect to Postgres")
}

/// Open a connection to the control database over the direct endpoint.
///
/// Catalog reads and simulator DDL must not go through the pooler.
pub async fn connect_control(settings: &Settings) -> Result<PgConnection> {
    PgConnection::connect(&settings.direct_dsn())
        .await
        .context("failed to connect to control database")
}

/// Open a connection to one tenant database.
///
/// Prefers the pooled endpoint when configured; falls back to the direct
/// endpoint only when `direct_fallback` is enabled. The statement-timeout
/// knob, when set, is passed through to the peer connection.
pub async fn connect_tenant(settings: &Settings, database: &str) -> Result<PgConnection> {
    if settings.use_pgbouncer {
        match open_tenant(settings, &settings.db_dsn(database, true)).await {
            Ok(conn) => return Ok(conn),
            Err(e) if settings.direct_fallback => {
                warn!(database, error = %e, "pooled connect failed; using direct endpoint");
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("pooled connect failed for database {database}"))
            }
        }
    }

    open_tenant(settings, &settings.db_dsn(database, false))
        .await
        .with_context(|| format!("direct connect failed for database {database}"))
}

async fn open_tenant(settings: &Settings, dsn: &str) -> sqlx::Result<PgConnection> {
    let mut opts: PgConnectOptions = dsn.parse()?;
    if let Some(ms) = settings.statement_timeout_ms {
        opts = opts.options([("statement_timeout", ms.to_string())]);
    }
    opts.connect().await
}

/// Enumerate tenant databases whose name matches `pattern`.
///
/// Glob `*` is accepted and translated to SQL `%`. Names come back in
/// lexicographic order from the catalog.
pub async fn list_tenant_databases(settings: &Settings, pattern: &str) -> Result<Vec<String>> {
    let mut conn = connect_control(settings).await?;
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT datname FROM pg_database WHERE datname LIKE $1 ORDER BY datname",
    )
    .bind(like_pattern(pattern))
    .fetch_all(&mut conn)
    .await
    .context("tenant database listing failed")?;
    conn.close().await.ok();

    Ok(rows.into_iter().map(|(name,)| name).collect())
}

/// Translate a caller-supplied pattern to SQL LIKE syntax (glob `*` → `%`).
pub fn like_pattern(pattern: &str) -> String {
    pattern.replace('*', "%")
}

/// Centralized retry predicate (tune transient/permanent boundary here).
///
/// Transient: I/O and protocol-level connection failures, SQLSTATE class 08
/// (connection exceptions), 53300 (too many connections), 40001
/// (serialization failure), 40P01 (deadlock). All other codes are
/// permanent.
pub fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_transient_sqlstate(&code))
            .unwrap_or(false),
        _ => false,
    }
}

/// SQLSTATE-level half of [`is_transient_error`].
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || code == "53300" || code == "40001" || code == "40P01"
}

/// Conservative identifier check for user-supplied database name fragments.
///
/// The simulator interpolates names into `CREATE DATABASE` / `DROP DATABASE`
/// statements, which cannot be parameterized.
pub fn is_safe_ident(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
