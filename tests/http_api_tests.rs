//! HTTP-level tests for the onboarding API: auth, routing and error mapping.

use std::sync::Arc;

use anyhow::{Context, Result as AnyhowResult};
use onboarding::config::AppConfig;
use onboarding::server::{AppState, create_app};
use reqwest::StatusCode;
use serde_json::{Value, json};
use tokio::{net::TcpListener, sync::oneshot, task::JoinHandle};
use uuid::Uuid;

#[path = "test_utils/mod.rs"]
mod test_utils;
use test_utils::{Harness, seed_blocks};

const TOKEN: &str = "test-token";

struct TestServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<AnyhowResult<()>>>,
}

impl TestServerHandle {
    async fn shutdown(mut self) -> AnyhowResult<()> {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.join_handle.take() {
            handle.await.context("server task join failed")??;
        }
        Ok(())
    }
}

impl Drop for TestServerHandle {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

async fn spawn_test_app(harness: &Harness) -> (String, TestServerHandle) {
    let config = AppConfig {
        operator_tokens: vec![TOKEN.to_string()],
        ..Default::default()
    };
    let state = AppState {
        config: Arc::new(config),
        db: Arc::clone(&harness.db),
        service: Arc::clone(&harness.service),
    };
    let app = create_app(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let join_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .context("axum server error")
    });

    (
        format!("http://{addr}"),
        TestServerHandle {
            shutdown_tx: Some(shutdown_tx),
            join_handle: Some(join_handle),
        },
    )
}

#[tokio::test]
async fn public_endpoints_need_no_token() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let root: Value = client
        .get(format!("{url}/"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(root["service"], "tenant-onboarding");

    let health = client.get(format!("{url}/healthz")).send().await.unwrap();
    assert_eq!(health.status(), StatusCode::OK);

    let openapi = client
        .get(format!("{url}/openapi.json"))
        .send()
        .await
        .unwrap();
    assert_eq!(openapi.status(), StatusCode::OK);
    let openapi: Value = openapi.json().await.unwrap();
    assert!(openapi["paths"]["/api/v1/onboarding"].is_object());

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn api_rejects_missing_and_wrong_tokens() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{url}/api/v1/onboarding"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok()),
        Some("application/problem+json")
    );
    let trace_header = response
        .headers()
        .get("x-trace-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "UNAUTHORIZED");
    assert_eq!(body["trace_id"].as_str().map(str::to_string), trace_header);

    let response = client
        .get(format!("{url}/api/v1/onboarding"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn start_then_fetch_an_onboarding() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/api/v1/onboarding"))
        .bearer_auth(TOKEN)
        .json(&json!({ "name": "Acme", "tier": "default" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let location = response
        .headers()
        .get("location")
        .and_then(|v| v.to_str().ok())
        .unwrap()
        .to_string();
    let created: Value = response.json().await.unwrap();
    assert_eq!(created["status"], "created");
    assert_eq!(created["tenantName"], "Acme");
    assert!(created["zipFileUrl"].as_str().unwrap().contains("temp/"));
    assert_eq!(location, format!("/api/v1/onboarding/{}", created["id"].as_str().unwrap()));

    let fetched: Value = client
        .get(format!("{url}{location}"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(fetched["id"], created["id"]);

    let list: Value = client
        .get(format!("{url}/api/v1/onboarding"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["onboardings"].as_array().unwrap().len(), 1);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn errors_map_to_problem_responses() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .get(format!("{url}/api/v1/onboarding/{}", Uuid::new_v4()))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "NOT_FOUND");

    let response = client
        .post(format!("{url}/api/v1/onboarding"))
        .bearer_auth(TOKEN)
        .json(&json!({ "name": "  " }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_FAILED");
    assert_eq!(body["details"]["fields"], json!(["name"]));

    let response = client
        .post(format!("{url}/api/v1/onboarding/provision"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "onboardingId": Uuid::new_v4(),
            "tenant": { "id": Uuid::new_v4() }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let created = harness
        .service
        .start_onboarding(onboarding::service::StartOnboarding {
            name: "Acme".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    let response = client
        .post(format!("{url}/api/v1/onboarding/provision"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "onboardingId": created.id,
            "tenant": { "id": Uuid::new_v4() }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "CIDR_EXHAUSTED");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn provision_and_events_drive_the_lifecycle() {
    let harness = Harness::new().await.unwrap();
    seed_blocks(&harness.db, &["10.20.0.0"]).await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();
    let tenant_id = Uuid::new_v4();

    let created: Value = client
        .post(format!("{url}/api/v1/onboarding"))
        .bearer_auth(TOKEN)
        .json(&json!({ "name": "Acme" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    let response = client
        .post(format!("{url}/api/v1/onboarding/provision"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "onboardingId": created["id"],
            "tenant": { "id": tenant_id, "name": "Acme", "compute": { "memory": 2048 } }
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let provisioned: Value = response.json().await.unwrap();
    assert_eq!(provisioned["status"], "provisioning");
    assert!(provisioned["stackConsoleUrl"].as_str().is_some());

    let outcome: Value = client
        .post(format!("{url}/api/v1/onboarding/events"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "source": "stack",
            "tenantId": tenant_id,
            "stackStatus": "CREATE_COMPLETE"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["outcome"], "applied");
    assert_eq!(outcome["to"], "provisioned");

    let outcome: Value = client
        .post(format!("{url}/api/v1/onboarding/events"))
        .bearer_auth(TOKEN)
        .json(&json!({
            "source": "stack",
            "tenantId": tenant_id,
            "stackStatus": "CREATE_IN_PROGRESS"
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["outcome"], "ignored");
    assert_eq!(outcome["reason"], "stale");

    let update: Value = client
        .put(format!("{url}/api/v1/onboarding/tenants/{tenant_id}"))
        .bearer_auth(TOKEN)
        .json(&json!({ "memory": 4096, "subdomain": "acme" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(update["changed"], true);
    assert_eq!(update["onboarding"]["status"], "updating");

    let response = client
        .delete(format!("{url}/api/v1/onboarding/tenants/{tenant_id}"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let deleting: Value = response.json().await.unwrap();
    assert_eq!(deleting["status"], "deleting");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn direct_status_update_is_guarded() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();
    let record = harness
        .service
        .start_onboarding(onboarding::service::StartOnboarding {
            name: "Acme".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();

    let outcome: Value = client
        .put(format!("{url}/api/v1/onboarding/{}/status", record.id))
        .bearer_auth(TOKEN)
        .json(&json!({ "status": "validating" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["outcome"], "applied");

    let outcome: Value = client
        .put(format!("{url}/api/v1/onboarding/{}/status", record.id))
        .bearer_auth(TOKEN)
        .json(&json!({ "status": "validating" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["reason"], "duplicate");

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_bodies_are_validation_problems() {
    let harness = Harness::new().await.unwrap();
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/api/v1/onboarding/events"))
        .bearer_auth(TOKEN)
        .json(&json!({ "source": "carrier-pigeon", "state": "SUCCEEDED" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "VALIDATION_FAILED");

    let response = client
        .post(format!("{url}/api/v1/onboarding"))
        .bearer_auth(TOKEN)
        .header("content-type", "application/json")
        .body("{ not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    handle.shutdown().await.unwrap();
}

#[tokio::test]
async fn application_routes_reach_the_service() {
    let harness = Harness::new().await.unwrap();
    harness
        .platform
        .set_settings(onboarding::clients::AppSettings {
            core_stack_name: Some("test-core".to_string()),
            ..Default::default()
        });
    let (url, handle) = spawn_test_app(&harness).await;
    let client = reqwest::Client::new();

    let response = client
        .post(format!("{url}/api/v1/onboarding/app-config"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["stackId"], "test-core");

    let response = client
        .post(format!(
            "{url}/api/v1/onboarding/tenants/{}/applications",
            Uuid::new_v4()
        ))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client
        .post(format!("{url}/api/v1/onboarding/app-config"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    handle.shutdown().await.unwrap();
}
