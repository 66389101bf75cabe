//! # API Handlers
//!
//! HTTP endpoint handlers for the connector service.

use axum::{extract::State, response::Json};

use crate::models::{HealthResponse, ServiceInfo};
use crate::server::AppState;

pub mod oauth;
pub mod refresh;

/// Root handler that returns basic service information
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 200, description = "Service information", body = ServiceInfo)
    ),
    tag = "root"
)]
pub async fn root() -> Json<ServiceInfo> {
    Json(ServiceInfo::default())
}

/// Liveness probe
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        oauth_enabled: state.config.oauth_enabled(),
    })
}
