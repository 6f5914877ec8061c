//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::AppState;

/// Pool snapshot for one data source
#[derive(Debug, Serialize)]
pub struct DataSourceHealth {
    pub name: String,
    /// Current worker pool size (drops below the initial size after throttling)
    pub pool_size: usize,
    pub initial_pool_size: usize,
    pub cache_entries: usize,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status ("ok", or "degraded" while any pool is shrunk)
    pub status: String,
    /// Module name ("recon-gateway")
    pub module: String,
    /// Crate version from Cargo.toml
    pub version: String,
    /// Seconds since service started
    pub uptime_seconds: u64,
    pub data_sources: Vec<DataSourceHealth>,
    /// Last degraded batch, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = recon_common::time::now().signed_duration_since(state.startup_time);
    let uptime_seconds = uptime.num_seconds().max(0) as u64;

    let data_sources: Vec<DataSourceHealth> = state
        .data_sources
        .iter()
        .map(|ds| DataSourceHealth {
            name: ds.name().to_string(),
            pool_size: ds.pool_size(),
            initial_pool_size: ds.pool().initial_size(),
            cache_entries: ds.cache().len(),
        })
        .collect();

    let degraded = data_sources
        .iter()
        .any(|ds| ds.pool_size < ds.initial_pool_size);

    let last_error = state.last_error.read().await.clone();

    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        module: "recon-gateway".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds,
        data_sources,
        last_error,
    })
}

/// Build health check routes
pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
