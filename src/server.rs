//! # Server Configuration
//!
//! Router assembly, shared state and the HTTP server loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::{
    Router, middleware,
    routing::{get, post, put},
};
use sea_orm::DatabaseConnection;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::clients::PlatformClient;
use crate::config::AppConfig;
use crate::engine::HttpProvisioningEngine;
use crate::handlers::{self, onboarding};
use crate::objects::HttpObjectStore;
use crate::service::{Collaborators, OnboardingService};
use crate::telemetry::trace_context_middleware;
use crate::upload::HmacUploadSigner;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<DatabaseConnection>,
    pub service: Arc<OnboardingService>,
}

impl AppState {
    /// Wires the service to the HTTP collaborators named in `config`.
    pub fn from_config(config: AppConfig, db: Arc<DatabaseConnection>) -> anyhow::Result<Self> {
        let settings = &config.onboarding;
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("building HTTP client")?;

        let engine = Arc::new(HttpProvisioningEngine::new(http.clone(), settings.engine_url()?));
        let platform = Arc::new(PlatformClient::new(http.clone(), settings.platform_api_url()?));
        let objects = Arc::new(HttpObjectStore::new(http, settings.object_store_url()?));
        let uploads = Arc::new(HmacUploadSigner::new(
            settings.object_store_url()?,
            settings.upload_signing_key.as_bytes(),
        ));

        let service = OnboardingService::new(
            Arc::clone(&db),
            settings.clone(),
            Collaborators::from_platform(platform, engine, uploads, objects),
        )?;

        Ok(Self {
            config: Arc::new(config),
            db,
            service: Arc::new(service),
        })
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/api/v1/onboarding",
            post(onboarding::start_onboarding).get(onboarding::list_onboardings),
        )
        .route("/api/v1/onboarding/provision", post(onboarding::provision_tenant))
        .route("/api/v1/onboarding/events", post(onboarding::status_event))
        .route("/api/v1/onboarding/app-config", post(onboarding::update_app_config))
        .route("/api/v1/onboarding/{id}", get(onboarding::get_onboarding))
        .route("/api/v1/onboarding/{id}/status", put(onboarding::update_status))
        .route(
            "/api/v1/onboarding/tenants/{tenant_id}",
            put(onboarding::update_tenant).delete(onboarding::delete_tenant),
        )
        .route(
            "/api/v1/onboarding/tenants/{tenant_id}/applications",
            post(onboarding::provision_application),
        )
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .merge(api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(middleware::from_fn(trace_context_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Serves `state` on the configured address until Ctrl-C.
pub async fn run_server(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let addr = state
        .config
        .bind_addr()
        .map_err(|e| format!("Invalid server address: {e}"))?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, %profile, "Onboarding service listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::onboarding::start_onboarding,
        crate::handlers::onboarding::list_onboardings,
        crate::handlers::onboarding::get_onboarding,
        crate::handlers::onboarding::update_status,
        crate::handlers::onboarding::provision_tenant,
        crate::handlers::onboarding::provision_application,
        crate::handlers::onboarding::update_app_config,
        crate::handlers::onboarding::update_tenant,
        crate::handlers::onboarding::delete_tenant,
        crate::handlers::onboarding::status_event,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::error::ApiError,
            crate::status::OnboardingStatus,
            crate::clients::ComputeOverrides,
            crate::service::StartOnboarding,
            crate::service::ProvisionRequest,
            crate::service::ProvisionTenant,
            crate::service::TenantUpdate,
            crate::service::StatusEvent,
            crate::service::CallbackOutcome,
            crate::service::IgnoreReason,
            crate::handlers::onboarding::OnboardingResponse,
            crate::handlers::onboarding::OnboardingListResponse,
            crate::handlers::onboarding::StatusUpdateRequest,
            crate::handlers::onboarding::TenantUpdateResponse,
            crate::handlers::onboarding::ApplicationStacksResponse,
            crate::handlers::onboarding::AppConfigUpdateResponse,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Tenant Onboarding API",
        description = "Tenant onboarding and per-tenant infrastructure lifecycle",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
