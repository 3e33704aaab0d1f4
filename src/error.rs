//! # Error Handling
//!
//! Domain errors raised by the onboarding service and the problem+json
//! `ApiError` they are rendered as, with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::clients::ClientError;
use crate::engine::EngineError;
use crate::stack::params::ParameterError;
use crate::telemetry;
use crate::upload::SigningError;

const STORE_RETRY_AFTER_SECS: u64 = 5;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                // Fallback: generate a correlation ID for basic client-server log correlation
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    db_error.is_unique_violation()
        || db_error.code().is_some_and(|code| {
            code.as_ref() == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref())
        })
}

/// Standard error types with predefined status codes
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        // Add Retry-After header if present
        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Malformed request bodies surface as validation failures.
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match &rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid request body: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(_) => "Request body is not valid JSON".to_string(),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

impl From<sea_orm::DbErr> for ApiError {
    fn from(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation");
            return Self::new(StatusCode::CONFLICT, "CONFLICT", "Resource already exists");
        }

        match error {
            sea_orm::DbErr::RecordNotFound(record) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", &format!("Record not found: {record}"))
            }
            sea_orm::DbErr::Conn(err) => {
                tracing::error!(error = ?err, "Onboarding store unreachable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Onboarding store unavailable",
                )
                .with_retry_after(STORE_RETRY_AFTER_SECS)
            }
            other => {
                tracing::error!(error = ?other, "Onboarding store error");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create an unauthorized error (401) with explicit trace_id
pub fn unauthorized_with_trace_id(message: Option<&str>, trace_id: String) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    let mut error = ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg);
    error.trace_id = Some(trace_id.into_boxed_str());
    error
}

/// Failures raised by onboarding operations.
#[derive(Debug, Error)]
pub enum OnboardingError {
    #[error("{message}")]
    Validation { message: String, fields: Vec<String> },
    #[error("tenant quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("subdomain '{0}' is already in use")]
    SubdomainConflict(String),
    #[error("no remaining CIDR blocks")]
    ResourceExhausted,
    #[error("tenant {0} already has a CIDR block assigned")]
    AlreadyAssigned(Uuid),
    #[error("CIDR block {0} was claimed by a concurrent request")]
    CidrConflict(String),
    #[error("provisioning engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("platform request failed: {0}")]
    Collaborator(#[from] ClientError),
    #[error("upload URL signing failed: {0}")]
    Signing(#[from] SigningError),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}

impl OnboardingError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation {
            message: message.into(),
            fields: Vec::new(),
        }
    }

    pub fn invalid_fields<S: Into<String>>(message: S, fields: Vec<String>) -> Self {
        Self::Validation {
            message: message.into(),
            fields,
        }
    }

    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }
}

impl From<ParameterError> for OnboardingError {
    fn from(error: ParameterError) -> Self {
        let fields = error.keys().to_vec();
        Self::Validation {
            message: error.to_string(),
            fields,
        }
    }
}

impl From<OnboardingError> for ApiError {
    fn from(error: OnboardingError) -> Self {
        let message = error.to_string();
        match error {
            OnboardingError::Validation { fields, .. } => {
                let api_error =
                    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message);
                if fields.is_empty() {
                    api_error
                } else {
                    api_error.with_details(json!({ "fields": fields }))
                }
            }
            OnboardingError::QuotaExceeded(_) => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, "QUOTA_EXCEEDED", &message)
            }
            OnboardingError::SubdomainConflict(_) => {
                ApiError::new(StatusCode::CONFLICT, "SUBDOMAIN_CONFLICT", &message)
            }
            OnboardingError::AlreadyAssigned(_) => {
                ApiError::new(StatusCode::CONFLICT, "CIDR_ALREADY_ASSIGNED", &message)
            }
            OnboardingError::CidrConflict(_) => {
                ApiError::new(StatusCode::CONFLICT, "CIDR_CONFLICT", &message)
            }
            OnboardingError::ResourceExhausted => {
                ApiError::new(StatusCode::SERVICE_UNAVAILABLE, "CIDR_EXHAUSTED", &message)
            }
            OnboardingError::Engine(_) => {
                tracing::error!(error = %message, "Provisioning engine call failed");
                ApiError::new(StatusCode::BAD_GATEWAY, "ENGINE_ERROR", &message)
            }
            OnboardingError::Collaborator(_) => {
                tracing::error!(error = %message, "Platform collaborator call failed");
                ApiError::new(StatusCode::BAD_GATEWAY, "UPSTREAM_ERROR", &message)
            }
            OnboardingError::Signing(_) => {
                tracing::error!(error = %message, "Upload URL signing failed");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "An internal error occurred",
                )
            }
            OnboardingError::NotFound { .. } => {
                ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", &message)
            }
            OnboardingError::Database(db_err) => db_err.into(),
        }
    }
}
