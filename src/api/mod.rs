//! Thin Axum API surface: health check, run/get job, re-enrich one IOC on
//! demand, and cache administration. Deliberately not the ingestion/search
//! API the original system exposes - that surface is out of scope here.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::cache::ResultCache;
use crate::job::JobProcessor;
use crate::models::Job;
use crate::storage::{PersistenceGateway, PgGateway};

pub struct AppState {
    pub gateway: PgGateway,
    pub job_processor: Arc<JobProcessor>,
    pub cache: ResultCache,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/api/v1/jobs/:id/run", post(run_job))
        .route("/api/v1/jobs/:id", get(get_job))
        .route("/api/v1/iocs/:id/enrich", post(reenrich_ioc))
        .route("/api/v1/cache", axum::routing::delete(clear_cache))
        .route("/api/v1/cache/ttl", post(set_cache_ttls))
        .with_state(state)
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "threat-forge",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Runs the job inline and returns once it reaches a terminal state.
/// A queue-backed worker is a deployment concern left to the operator
/// (e.g. spawning this on a background task runner); this handler is
/// the synchronous trigger.
async fn run_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    state.job_processor.process_job(job_id).await.map_err(|e| {
        tracing::error!(job_id, error = %e, "Job run failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    Ok(Json(json!({ "job_id": job_id, "status": "done" })))
}

async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(job_id): Path<i64>,
) -> Result<Json<Job>, (StatusCode, Json<Value>)> {
    state
        .gateway
        .get_job(job_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?
        .map(Json)
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "Job not found" })),
            )
        })
}

async fn reenrich_ioc(
    State(state): State<Arc<AppState>>,
    Path(ioc_id): Path<i64>,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let ioc = state
        .gateway
        .get_ioc(ioc_id)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": "IOC not found" })),
            )
        })?;

    let results = state
        .job_processor
        .orchestrator()
        .enrich_ioc(&ioc, &state.gateway)
        .await
        .map_err(|e| {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": e.to_string() })),
            )
        })?;

    let score = crate::scorer::score(&results);
    state.gateway.insert_ioc_score(ioc_id, &score).await.map_err(|e| {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
    })?;

    Ok(Json(json!({
        "ioc_id": ioc_id,
        "risk_score": score.risk_score,
        "attribution_score": score.attribution_score,
        "risk_band": score.risk_band,
    })))
}

#[derive(Deserialize)]
struct ClearCacheQuery {
    value: Option<String>,
}

async fn clear_cache(
    State(state): State<Arc<AppState>>,
    axum::extract::Query(query): axum::extract::Query<ClearCacheQuery>,
) -> Json<Value> {
    let removed = state.cache.clear(query.value.as_deref());
    Json(json!({ "removed": removed }))
}

#[derive(Deserialize)]
struct SetTtlRequest {
    positive_secs: i64,
    negative_secs: i64,
}

async fn set_cache_ttls(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SetTtlRequest>,
) -> Json<Value> {
    state.cache.set_ttls(req.positive_secs, req.negative_secs);
    Json(json!({ "ok": true }))
}
