//! Rolling query statistics per data source

use axum::{extract::State, routing::get, Json, Router};

use crate::services::StatsReport;
use crate::AppState;

/// GET /stats
pub async fn stats_report(State(state): State<AppState>) -> Json<Vec<StatsReport>> {
    Json(state.data_sources.iter().map(|ds| ds.stats_report()).collect())
}

pub fn stats_routes() -> Router<AppState> {
    Router::new().route("/stats", get(stats_report))
}
