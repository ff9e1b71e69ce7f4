use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AdminState;
use crate::load_balancer::backend::BackendSnapshot;
use crate::load_balancer::StrategyKind;
use crate::performance::PerformanceSnapshot;
use crate::resilience::CircuitSnapshot;

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub strategy: StrategyKind,
    pub backends_total: usize,
    pub backends_healthy: usize,
}

#[derive(Deserialize)]
pub struct StrategyUpdate {
    pub strategy: String,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    let registry = state.balancer.registry();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        strategy: state.balancer.active_strategy(),
        backends_total: registry.len(),
        backends_healthy: registry.healthy_count(),
    })
}

pub async fn get_backends(State(state): State<AdminState>) -> Json<Vec<BackendSnapshot>> {
    Json(state.balancer.server_stats())
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.balancer.breaker_states())
}

pub async fn get_performance(State(state): State<AdminState>) -> Json<PerformanceSnapshot> {
    Json(state.balancer.performance_snapshot())
}

pub async fn put_strategy(
    State(state): State<AdminState>,
    Json(update): Json<StrategyUpdate>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let kind: StrategyKind = update
        .strategy
        .parse()
        .map_err(|e: String| api_error(StatusCode::BAD_REQUEST, e))?;
    state.balancer.set_strategy(kind);
    Ok(Json(json!({ "strategy": kind })))
}

pub async fn delete_backend(
    State(state): State<AdminState>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .balancer
        .remove_server(&id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))
}
