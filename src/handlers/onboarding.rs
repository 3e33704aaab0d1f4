//! # Onboarding API Handlers
//!
//! HTTP surface over [`OnboardingService`](crate::service::OnboardingService):
//! onboarding intake, provisioning, application stacks, tenant updates and
//! deletion, and the status callbacks sent by the pipeline and provisioning
//! engine.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::Json,
};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::engine::stack_console_url;
use crate::error::ApiError;
use crate::models::onboarding::Model as Onboarding;
use crate::server::AppState;
use crate::service::{
    CallbackOutcome, ProvisionRequest, StartOnboarding, StatusEvent, TenantUpdate,
};
use crate::status::OnboardingStatus;

/// An onboarding record as returned by the API
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingResponse {
    pub id: Uuid,
    pub status: OnboardingStatus,
    pub tenant_id: Option<Uuid>,
    #[schema(example = "Acme Corp")]
    pub tenant_name: Option<String>,
    #[schema(example = "default")]
    pub tier: Option<String>,
    #[schema(example = "acme")]
    pub subdomain: Option<String>,
    pub stack_id: Option<String>,
    /// Link to the stack in the engine's console, when the stack id is an ARN
    pub stack_console_url: Option<String>,
    /// Pre-signed URL for uploading the tenant's application bundle
    pub zip_file_url: Option<String>,
    pub created: DateTime<FixedOffset>,
    pub modified: DateTime<FixedOffset>,
}

impl From<Onboarding> for OnboardingResponse {
    fn from(record: Onboarding) -> Self {
        let stack_console_url = record.stack_id.as_deref().and_then(stack_console_url);
        Self {
            id: record.id,
            status: record.status,
            tenant_id: record.tenant_id,
            tenant_name: record.tenant_name,
            tier: record.tier,
            subdomain: record.subdomain,
            stack_id: record.stack_id,
            stack_console_url,
            zip_file_url: record.zip_file_url,
            created: record.created,
            modified: record.modified,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OnboardingListResponse {
    pub onboardings: Vec<OnboardingResponse>,
}

/// Direct status update body
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StatusUpdateRequest {
    pub status: OnboardingStatus,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantUpdateResponse {
    pub onboarding: OnboardingResponse,
    /// False when the stack already matched the requested values
    pub changed: bool,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStacksResponse {
    pub onboarding: OnboardingResponse,
    /// One stack per application service
    pub stack_ids: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AppConfigUpdateResponse {
    /// Absent when the core stack already listed these services
    pub stack_id: Option<String>,
}

/// Start onboarding a new tenant
#[utoipa::path(
    post,
    path = "/api/v1/onboarding",
    security(("bearer_auth" = [])),
    request_body = StartOnboarding,
    responses(
        (status = 201, description = "Onboarding record created", body = OnboardingResponse, headers(
            ("Location", description = "URL of the onboarding record")
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 409, description = "Subdomain already in use", body = ApiError),
        (status = 422, description = "Tenant quotas exceeded", body = ApiError),
        (status = 502, description = "Platform API unavailable", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn start_onboarding(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    body: Result<Json<StartOnboarding>, JsonRejection>,
) -> Result<(StatusCode, [(&'static str, String); 1], Json<OnboardingResponse>), ApiError> {
    let Json(request) = body?;
    let record = state.service.start_onboarding(request).await?;
    let location = format!("/api/v1/onboarding/{}", record.id);
    Ok((
        StatusCode::CREATED,
        [("Location", location)],
        Json(record.into()),
    ))
}

/// List onboarding records, oldest first
#[utoipa::path(
    get,
    path = "/api/v1/onboarding",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "All onboarding records", body = OnboardingListResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn list_onboardings(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<OnboardingListResponse>, ApiError> {
    let onboardings = state
        .service
        .list_onboardings()
        .await?
        .into_iter()
        .map(OnboardingResponse::from)
        .collect();
    Ok(Json(OnboardingListResponse { onboardings }))
}

/// Get an onboarding record
#[utoipa::path(
    get,
    path = "/api/v1/onboarding/{id}",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Onboarding record id")),
    responses(
        (status = 200, description = "Onboarding record", body = OnboardingResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Onboarding not found", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn get_onboarding(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
) -> Result<Json<OnboardingResponse>, ApiError> {
    let record = state.service.get_onboarding(id).await?;
    Ok(Json(record.into()))
}

/// Update an onboarding record's status
///
/// Goes through the same transition guard as pipeline and engine callbacks,
/// so stale or repeated updates are ignored rather than applied.
#[utoipa::path(
    put,
    path = "/api/v1/onboarding/{id}/status",
    security(("bearer_auth" = [])),
    params(("id" = Uuid, Path, description = "Onboarding record id")),
    request_body = StatusUpdateRequest,
    responses(
        (status = 200, description = "Outcome of the status update", body = CallbackOutcome),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Onboarding not found", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn update_status(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<Uuid>,
    body: Result<Json<StatusUpdateRequest>, JsonRejection>,
) -> Result<Json<CallbackOutcome>, ApiError> {
    let Json(request) = body?;
    let outcome = state
        .service
        .handle_status_callback(StatusEvent::Direct {
            onboarding_id: id,
            status: request.status,
        })
        .await?;
    Ok(Json(outcome))
}

/// Provision infrastructure for a registered tenant
#[utoipa::path(
    post,
    path = "/api/v1/onboarding/provision",
    security(("bearer_auth" = [])),
    request_body = ProvisionRequest,
    responses(
        (status = 202, description = "Stack creation started (or already started)", body = OnboardingResponse),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Onboarding not found", body = ApiError),
        (status = 409, description = "CIDR block conflict", body = ApiError),
        (status = 502, description = "Provisioning engine error", body = ApiError),
        (status = 503, description = "No CIDR blocks left", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn provision_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    body: Result<Json<ProvisionRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<OnboardingResponse>), ApiError> {
    let Json(request) = body?;
    let record = state.service.provision_tenant(request).await?;
    Ok((StatusCode::ACCEPTED, Json(record.into())))
}

/// Create the application service stacks of a provisioned tenant
#[utoipa::path(
    post,
    path = "/api/v1/onboarding/tenants/{tenant_id}/applications",
    security(("bearer_auth" = [])),
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 202, description = "Application stack creation started", body = ApplicationStacksResponse),
        (status = 400, description = "Tenant or service configuration incomplete", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Provisioning engine or platform error", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn provision_application(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(tenant_id): Path<Uuid>,
) -> Result<(StatusCode, Json<ApplicationStacksResponse>), ApiError> {
    let result = state.service.provision_application(tenant_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(ApplicationStacksResponse {
            onboarding: result.onboarding.into(),
            stack_ids: result.stack_ids,
        }),
    ))
}

/// Push the configured application service names to the core stack
#[utoipa::path(
    post,
    path = "/api/v1/onboarding/app-config",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Core stack update started or not needed", body = AppConfigUpdateResponse),
        (status = 400, description = "Core stack name not configured", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 502, description = "Provisioning engine or platform error", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn update_app_config(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<AppConfigUpdateResponse>, ApiError> {
    let stack_id = state.service.update_app_config().await?;
    Ok(Json(AppConfigUpdateResponse { stack_id }))
}

/// Update compute, billing and subdomain of a provisioned tenant
#[utoipa::path(
    put,
    path = "/api/v1/onboarding/tenants/{tenant_id}",
    security(("bearer_auth" = [])),
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    request_body = TenantUpdate,
    responses(
        (status = 200, description = "Update submitted", body = TenantUpdateResponse),
        (status = 400, description = "Tenant has no stack", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Provisioning engine error", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn update_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(tenant_id): Path<Uuid>,
    body: Result<Json<TenantUpdate>, JsonRejection>,
) -> Result<Json<TenantUpdateResponse>, ApiError> {
    let Json(update) = body?;
    let result = state
        .service
        .update_provisioned_tenant(tenant_id, update)
        .await?;
    Ok(Json(TenantUpdateResponse {
        onboarding: result.onboarding.into(),
        changed: result.changed,
    }))
}

/// Delete a tenant's infrastructure
#[utoipa::path(
    delete,
    path = "/api/v1/onboarding/tenants/{tenant_id}",
    security(("bearer_auth" = [])),
    params(("tenant_id" = Uuid, Path, description = "Tenant id")),
    responses(
        (status = 202, description = "Deletion started, or already complete", body = OnboardingResponse),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Provisioning engine error", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(tenant_id): Path<Uuid>,
) -> Result<(StatusCode, Json<OnboardingResponse>), ApiError> {
    let record = state.service.delete_tenant(tenant_id).await?;
    Ok((StatusCode::ACCEPTED, Json(record.into())))
}

/// Receive a pipeline or stack status event
#[utoipa::path(
    post,
    path = "/api/v1/onboarding/events",
    security(("bearer_auth" = [])),
    request_body = StatusEvent,
    responses(
        (status = 200, description = "Event applied or ignored", body = CallbackOutcome),
        (status = 400, description = "Malformed event", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 404, description = "No onboarding for the event target", body = ApiError)
    ),
    tag = "onboarding"
)]
pub async fn status_event(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    body: Result<Json<StatusEvent>, JsonRejection>,
) -> Result<Json<CallbackOutcome>, ApiError> {
    let Json(event) = body?;
    let outcome = state.service.handle_status_callback(event).await?;
    Ok(Json(outcome))
}
