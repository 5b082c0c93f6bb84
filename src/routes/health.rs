//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::cache::CacheStats;
use crate::pool::PoolStats;
use crate::prefetch::PrefetchStats;
use crate::render::RenderStats;
use crate::state::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub requests_served: u64,
    pub documents: usize,
    pub sessions: usize,
    pub cache: CacheStats,
    pub pool: PoolStats,
    pub render: RenderStats,
    pub prefetch: PrefetchStats,
}

pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.stats().uptime().as_secs(),
        requests_served: state.stats().requests(),
        documents: state.registry().len(),
        sessions: state.sessions().count().await,
        cache: state.cache().stats(),
        pool: state.pool().stats(),
        render: state.renderer().stats(),
        prefetch: state.prefetch().stats(),
    })
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
