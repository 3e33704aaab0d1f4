//! # API Handlers
//!
//! HTTP endpoint handlers for the onboarding service.

pub mod onboarding;

use axum::{extract::State, http::StatusCode, response::Json};
use serde_json::{Value, json};

use crate::error::ApiError;
use crate::models::ServiceInfo;
use crate::server::AppState;

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

/// Liveness and database reachability
#[utoipa::path(
    get,
    path = "/healthz",
    responses(
        (status = 200, description = "Service and database are healthy"),
        (status = 503, description = "Database unreachable", body = ApiError)
    ),
    tag = "root"
)]
pub async fn healthz(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    crate::db::health_check(&state.db).await.map_err(|err| {
        tracing::error!(error = %err, "Health check failed");
        ApiError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "SERVICE_UNAVAILABLE",
            "Database unreachable",
        )
    })?;
    Ok(Json(json!({ "status": "ok" })))
}
