//! Axum router and all HTTP handlers for spk-daemon.
//!
//! `build_router` is the single entry point; `main.rs` calls it and attaches
//! middleware layers. All handlers are `pub(crate)` so the scenario tests in
//! `tests/` can compose the router directly.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::StreamExt;
use prometheus::{Encoder, TextEncoder};
use spk_engine::{ApplySpec, PropagateOptions};
use spk_store::NewVersion;
use tracing::{error, info};
use uuid::Uuid;

use crate::api_types::{
    ArtifactResponse, BenchmarkRequest, BenchmarkResponse, BenchmarkResult, CleanupQuery,
    CleanupResponse, DatabasesQuery, ErrorResponse, GenerateRequest, GenerateResponse,
    GeneratedFiles, HealthResponse, PropagateAccepted, PropagateRequest, SimulateCreateRequest,
    SimulateCreateResponse, StopResponse,
};
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the complete application router wired to the given shared state.
///
/// Middleware layers (CORS, tracing) are **not** applied here; `main.rs`
/// attaches them after this call so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/schema/generate", post(generate))
        .route("/schema/versions", get(list_versions))
        .route("/schema/versions/:version_id", get(get_version))
        .route("/schema/databases", get(list_databases))
        .route("/schema/propagate", post(start_propagation))
        .route("/schema/propagate/:job_id", get(get_propagation))
        .route("/schema/propagate/:job_id/stream", get(stream_propagation))
        .route("/schema/propagate/:job_id/stop", post(stop_propagation))
        .route("/schema/simulate/create", post(simulate_create))
        .route("/schema/simulate/cleanup", delete(simulate_cleanup))
        .route("/schema/benchmark", post(benchmark))
        .with_state(state)
}

fn not_found(msg: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn bad_request(msg: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
        .into_response()
}

fn internal_error(err: anyhow::Error) -> Response {
    error!(error = ?err, "request failed");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: format!("{err:#}"),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".to_string(),
            service: st.build.service,
            version: st.build.version,
        }),
    )
}

// ---------------------------------------------------------------------------
// GET /metrics
// ---------------------------------------------------------------------------

pub(crate) async fn metrics() -> Response {
    let families = spk_engine::metrics::handle().registry().gather();
    let mut buf = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&families, &mut buf) {
        return internal_error(anyhow::anyhow!("metrics encoding failed: {e}"));
    }
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        buf,
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /schema/generate
// ---------------------------------------------------------------------------

pub(crate) async fn generate(
    State(st): State<Arc<AppState>>,
    Json(req): Json<GenerateRequest>,
) -> Response {
    let put = match st.store.put(&NewVersion {
        description: req.description,
        upgrade_sql: req.upgrade_sql,
        downgrade_sql: req.downgrade_sql,
        revision_id: req.revision_id,
    }) {
        Ok(put) => put,
        Err(e) => return internal_error(e),
    };

    info!(version_id = %put.version_id, checksum = %put.checksum, "version generated");
    (
        StatusCode::OK,
        Json(GenerateResponse {
            success: true,
            version_id: put.version_id,
            checksum: put.checksum,
            files: GeneratedFiles {
                upgrade: put.upgrade_path.display().to_string(),
                downgrade: put.downgrade_path.display().to_string(),
            },
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /schema/versions
// ---------------------------------------------------------------------------

pub(crate) async fn list_versions(State(st): State<Arc<AppState>>) -> Response {
    match st.store.list() {
        Ok(versions) => (StatusCode::OK, Json(versions)).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /schema/versions/:version_id
// ---------------------------------------------------------------------------

pub(crate) async fn get_version(
    State(st): State<Arc<AppState>>,
    Path(version_id): Path<String>,
) -> Response {
    match st.store.get(&version_id) {
        Ok(Some(artifact)) => (
            StatusCode::OK,
            Json(ArtifactResponse {
                version_id: artifact.version_id,
                revision_id: artifact.revision_id,
                checksum: artifact.checksum,
                description: artifact.description,
                created_at: artifact.created_at,
                upgrade_sql: artifact.upgrade_sql,
                downgrade_sql: artifact.downgrade_sql,
            }),
        )
            .into_response(),
        Ok(None) => not_found("Version not found"),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// GET /schema/databases
// ---------------------------------------------------------------------------

pub(crate) async fn list_databases(
    State(st): State<Arc<AppState>>,
    Query(query): Query<DatabasesQuery>,
) -> Response {
    match spk_db::list_tenant_databases(&st.settings, &query.pattern).await {
        Ok(names) => (StatusCode::OK, Json(names)).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /schema/propagate
// ---------------------------------------------------------------------------

pub(crate) async fn start_propagation(
    State(st): State<Arc<AppState>>,
    Json(req): Json<PropagateRequest>,
) -> Response {
    let artifact = match st.store.get(&req.version_id) {
        Ok(Some(artifact)) => artifact,
        Ok(None) => return not_found("Version not found"),
        Err(e) => return internal_error(e),
    };

    let databases = match spk_db::list_tenant_databases(&st.settings, &req.database_pattern).await {
        Ok(names) => names,
        Err(e) => return internal_error(e),
    };
    if databases.is_empty() {
        return bad_request("No databases found matching pattern");
    }

    let spec = ApplySpec {
        version_id: artifact.version_id,
        checksum: artifact.checksum,
        sql: artifact.upgrade_sql,
        dry_run: req.dry_run,
    };
    let total_databases = databases.len();

    let job = match spk_engine::start(
        Arc::clone(&st.settings),
        &st.registry,
        spec,
        databases,
        PropagateOptions {
            max_connections: Some(req.max_connections),
            ..Default::default()
        },
    )
    .await
    {
        Ok(job) => job,
        Err(e) => return bad_request(&format!("{e:#}")),
    };

    (
        StatusCode::OK,
        Json(PropagateAccepted {
            job_id: job.job_id().to_string(),
            status: "started".to_string(),
            total_databases,
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// GET /schema/propagate/:job_id
// ---------------------------------------------------------------------------

pub(crate) async fn get_propagation(
    State(st): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    match st.registry.get(&job_id).await {
        Some(job) => (StatusCode::OK, Json(job.snapshot().await)).into_response(),
        None => not_found("Job not found"),
    }
}

// ---------------------------------------------------------------------------
// GET /schema/propagate/:job_id/stream  (SSE)
// ---------------------------------------------------------------------------

pub(crate) async fn stream_propagation(
    State(st): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    let Some(job) = st.registry.get(&job_id).await else {
        return not_found("Job not found");
    };

    let events = spk_engine::job_progress(job).filter_map(|snapshot| async move {
        let data = serde_json::to_string(&snapshot).ok()?;
        Some(Ok::<_, Infallible>(
            Event::default().event("progress").data(data),
        ))
    });

    Sse::new(events)
        .keep_alive(KeepAlive::new())
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /schema/propagate/:job_id/stop
// ---------------------------------------------------------------------------

pub(crate) async fn stop_propagation(
    State(st): State<Arc<AppState>>,
    Path(job_id): Path<String>,
) -> Response {
    if !st.registry.request_stop(&job_id).await {
        return not_found("Job not found");
    }
    info!(job_id, "stop requested");
    (
        StatusCode::OK,
        Json(StopResponse {
            status: "stop_requested".to_string(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// POST /schema/simulate/create
// ---------------------------------------------------------------------------

pub(crate) async fn simulate_create(
    State(st): State<Arc<AppState>>,
    Json(req): Json<SimulateCreateRequest>,
) -> Response {
    let created = match spk_sim::create_test_databases(
        &st.settings,
        req.count,
        &req.prefix,
        req.start_id,
        req.template_db.as_deref(),
    )
    .await
    {
        Ok(names) => names,
        Err(e) => return bad_request(&format!("{e:#}")),
    };

    (
        StatusCode::OK,
        Json(SimulateCreateResponse {
            created: created.len(),
            databases: created.into_iter().take(20).collect(),
        }),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// DELETE /schema/simulate/cleanup
// ---------------------------------------------------------------------------

pub(crate) async fn simulate_cleanup(
    State(st): State<Arc<AppState>>,
    Query(query): Query<CleanupQuery>,
) -> Response {
    let pattern = format!("{}%", query.prefix);
    let databases = match spk_db::list_tenant_databases(&st.settings, &pattern).await {
        Ok(names) => names,
        Err(e) => return internal_error(e),
    };

    match spk_sim::cleanup_test_databases(&st.settings, &databases).await {
        Ok(removed) => (StatusCode::OK, Json(CleanupResponse { removed })).into_response(),
        Err(e) => internal_error(e),
    }
}

// ---------------------------------------------------------------------------
// POST /schema/benchmark
// ---------------------------------------------------------------------------

/// Benchmark sample DDL by artifact kind.
fn sample_sql(schema_type: &str) -> &'static str {
    match schema_type {
        "add_table" => {
            "CREATE TABLE IF NOT EXISTS user_settings (id SERIAL PRIMARY KEY, user_id INT, key VARCHAR(100), value TEXT);"
        }
        "add_index" => "CREATE INDEX IF NOT EXISTS idx_users_email ON users(email);",
        "complex" => {
            "ALTER TABLE IF EXISTS users ADD COLUMN IF NOT EXISTS metadata JSONB;\n\
             CREATE TABLE IF NOT EXISTS audit_log (id SERIAL PRIMARY KEY, action VARCHAR(50), ts TIMESTAMPTZ DEFAULT NOW());\n\
             CREATE INDEX IF NOT EXISTS idx_audit_ts ON audit_log(ts);"
        }
        // "add_column" and anything unknown.
        _ => "ALTER TABLE IF EXISTS users ADD COLUMN IF NOT EXISTS preferences JSONB;",
    }
}

pub(crate) async fn benchmark(
    State(st): State<Arc<AppState>>,
    Json(req): Json<BenchmarkRequest>,
) -> Response {
    let benchmark_id = format!("bench_{}", short_hex(8));
    let mut results = Vec::new();

    for db_count in &req.database_counts {
        let databases =
            match spk_sim::create_test_databases(&st.settings, *db_count, "bench_", 1, None).await
            {
                Ok(names) => names,
                Err(e) => return internal_error(e),
            };

        for schema_type in &req.schema_types {
            let sql = sample_sql(schema_type);
            let spec = ApplySpec {
                version_id: format!("bench_{}", short_hex(8)),
                checksum: "benchtest".to_string(),
                sql: sql.to_string(),
                dry_run: false,
            };

            let started = Instant::now();
            let run = spk_engine::run(
                Arc::clone(&st.settings),
                &st.registry,
                spec,
                databases.clone(),
                PropagateOptions {
                    max_connections: Some(req.max_connections),
                    schema_type: schema_type.clone(),
                },
            )
            .await;
            if let Err(e) = run {
                return bad_request(&format!("{e:#}"));
            }
            let duration = started.elapsed().as_secs_f64();

            let db_count_f = *db_count as f64;
            results.push(BenchmarkResult {
                db_count: *db_count,
                schema_type: schema_type.clone(),
                duration_sec: (duration * 100.0).round() / 100.0,
                rate: if duration > 0.0 {
                    (db_count_f / duration * 10.0).round() / 10.0
                } else {
                    0.0
                },
                avg_ms_per_db: if *db_count > 0 {
                    (duration / db_count_f * 1000.0 * 100.0).round() / 100.0
                } else {
                    0.0
                },
            });
        }

        if let Err(e) = spk_sim::cleanup_test_databases(&st.settings, &databases).await {
            return internal_error(e);
        }
    }

    (
        StatusCode::OK,
        Json(BenchmarkResponse {
            benchmark_id,
            results,
        }),
    )
        .into_response()
}

/// First `n` hex chars of a fresh UUID (job/benchmark id suffixes).
fn short_hex(n: usize) -> String {
    let hex = Uuid::new_v4().simple().to_string();
    hex[..n].to_string()
}
