//! Test-database provisioning for benchmarking.
//!
//! `CREATE DATABASE` / `DROP DATABASE` cannot run inside transactions or
//! take bind parameters, so names are validated and quoted before
//! interpolation. All catalog DDL goes over the direct endpoint.

use std::sync::Arc;

use anyhow::{bail, Result};
use spk_config::Settings;
use sqlx::{Connection, Executor};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

/// Catalog DDL concurrency; deliberately far below the propagation cap.
const SIMULATOR_CONCURRENCY: usize = 20;

/// SQLSTATE for "database already exists".
const DUPLICATE_DATABASE: &str = "42P04";

/// Create `count` databases named `prefix + i` for `i` in
/// `[start_id, start_id + count)`.
///
/// Already-existing databases count as created; any other failure drops
/// that name from the result. Returned names keep index order.
pub async fn create_test_databases(
    settings: &Settings,
    count: u32,
    prefix: &str,
    start_id: u32,
    template: Option<&str>,
) -> Result<Vec<String>> {
    if !spk_db::is_safe_ident(prefix) {
        bail!("invalid database prefix: {prefix:?}");
    }
    if let Some(template) = template {
        if !spk_db::is_safe_ident(template) {
            bail!("invalid template database name: {template:?}");
        }
    }

    let settings = Arc::new(settings.clone());
    let template = template.map(str::to_string);
    let semaphore = Arc::new(Semaphore::new(SIMULATOR_CONCURRENCY));
    let mut tasks: JoinSet<(u32, Option<String>)> = JoinSet::new();

    for i in 0..count {
        let name = format!("{prefix}{}", start_id + i);
        let settings = Arc::clone(&settings);
        let template = template.clone();
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return (i, None),
            };
            let created = create_one(&settings, &name, template.as_deref()).await;
            (i, created.then_some(name))
        });
    }

    let mut slots: Vec<Option<String>> = vec![None; count as usize];
    while let Some(joined) = tasks.join_next().await {
        if let Ok((i, name)) = joined {
            slots[i as usize] = name;
        }
    }

    Ok(slots.into_iter().flatten().collect())
}

async fn create_one(settings: &Settings, name: &str, template: Option<&str>) -> bool {
    let mut conn = match spk_db::connect_control(settings).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(database = name, error = %e, "create: control connect failed");
            return false;
        }
    };

    let stmt = match template {
        Some(template) => format!(
            "CREATE DATABASE {} TEMPLATE {}",
            spk_db::quote_ident(name),
            spk_db::quote_ident(template)
        ),
        None => format!("CREATE DATABASE {}", spk_db::quote_ident(name)),
    };

    let created = match conn.execute(stmt.as_str()).await {
        Ok(_) => true,
        Err(sqlx::Error::Database(db_err))
            if db_err.code().as_deref() == Some(DUPLICATE_DATABASE) =>
        {
            debug!(database = name, "already exists");
            true
        }
        Err(e) => {
            warn!(database = name, error = %e, "create database failed");
            false
        }
    };

    conn.close().await.ok();
    created
}

/// Drop the given databases, terminating their sessions first.
///
/// Best-effort: failures are counted out of the result, never propagated.
/// Returns how many were removed.
pub async fn cleanup_test_databases(settings: &Settings, databases: &[String]) -> Result<usize> {
    let settings = Arc::new(settings.clone());
    let semaphore = Arc::new(Semaphore::new(SIMULATOR_CONCURRENCY));
    let mut tasks: JoinSet<bool> = JoinSet::new();

    for name in databases {
        let name = name.clone();
        let settings = Arc::clone(&settings);
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return false,
            };
            drop_one(&settings, &name).await
        });
    }

    let mut removed = 0usize;
    while let Some(joined) = tasks.join_next().await {
        if matches!(joined, Ok(true)) {
            removed += 1;
        }
    }
    Ok(removed)
}

async fn drop_one(settings: &Settings, name: &str) -> bool {
    if !spk_db::is_safe_ident(name) {
        warn!(database = name, "refusing to drop unsafe database name");
        return false;
    }

    let mut conn = match spk_db::connect_control(settings).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(database = name, error = %e, "cleanup: control connect failed");
            return false;
        }
    };

    // Open sessions block DROP DATABASE; terminate them first.
    let terminated = sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity \
         WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(name)
    .execute(&mut conn)
    .await;
    if let Err(e) = terminated {
        warn!(database = name, error = %e, "session terminate failed");
    }

    let stmt = format!("DROP DATABASE IF EXISTS {}", spk_db::quote_ident(name));
    let dropped = match conn.execute(stmt.as_str()).await {
        Ok(_) => true,
        Err(e) => {
            warn!(database = name, error = %e, "drop database failed");
            false
        }
    };

    conn.close().await.ok();
    dropped
}
