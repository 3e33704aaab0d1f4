//! Test utilities shared by the integration suites.
//!
//! In-memory SQLite with migrations, plus in-process fakes for the
//! provisioning engine and platform collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use onboarding::clients::{
    AppSettings, ClientError, DnsZone, EventPublisher, ProvisionHandoff, QuotaCheck, QuotaChecker,
    RecordSet, SettingsStore, SystemApiCall, TenantDetails, TenantDirectory, TenantResource,
    WorkflowLauncher,
};
use onboarding::config::OnboardingConfig;
use onboarding::engine::{
    CreateStackRequest, EngineError, ProvisioningEngine, StackUpdate, UpdateStackRequest,
};
use onboarding::objects::ObjectStore;
use onboarding::repositories::CidrBlockRepository;
use onboarding::service::{Collaborators, OnboardingService};
use onboarding::upload::HmacUploadSigner;
use sea_orm::{Database, DatabaseConnection};

pub const SIGNING_KEY: &[u8] = b"test-signing-key";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Inserts free CIDR blocks.
pub async fn seed_blocks(db: &Arc<DatabaseConnection>, blocks: &[&str]) -> Result<()> {
    CidrBlockRepository::new(Arc::clone(db))
        .insert_free(blocks.iter().map(|block| block.to_string()))
        .await?;
    Ok(())
}

pub fn onboarding_config() -> OnboardingConfig {
    OnboardingConfig {
        environment: "test".to_string(),
        artifact_bucket: "artifacts".to_string(),
        object_store_url: Some("https://objects.example.com/artifacts/".to_string()),
        stack_notification_target: Some("arn:aws:sns:us-east-1:123456789012:stack-events".to_string()),
        engine_url: "http://engine.invalid/".to_string(),
        platform_api_url: "http://platform.invalid/".to_string(),
        upload_signing_key: String::from_utf8_lossy(SIGNING_KEY).into_owned(),
        ..OnboardingConfig::default()
    }
}

/// Provisioning engine fake recording every call.
#[derive(Default)]
pub struct FakeEngine {
    pub created: Mutex<Vec<CreateStackRequest>>,
    pub updated: Mutex<Vec<UpdateStackRequest>>,
    pub deleted: Mutex<Vec<String>>,
    pub statuses: Mutex<HashMap<String, String>>,
    pub next_create_error: Mutex<Option<EngineError>>,
    pub next_update_error: Mutex<Option<EngineError>>,
    pub next_delete_error: Mutex<Option<EngineError>>,
    pub update_has_no_changes: AtomicBool,
}

impl FakeEngine {
    pub fn fail_next_create(&self, error: EngineError) {
        *self.next_create_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_update(&self, error: EngineError) {
        *self.next_update_error.lock().unwrap() = Some(error);
    }

    pub fn fail_next_delete(&self, error: EngineError) {
        *self.next_delete_error.lock().unwrap() = Some(error);
    }

    pub fn created(&self) -> Vec<CreateStackRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn updated(&self) -> Vec<UpdateStackRequest> {
        self.updated.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProvisioningEngine for FakeEngine {
    async fn create_stack(&self, request: CreateStackRequest) -> Result<String, EngineError> {
        if let Some(error) = self.next_create_error.lock().unwrap().take() {
            return Err(error);
        }
        let stack_id = format!(
            "arn:aws:cloudformation:us-east-1:123456789012:stack/{}/{}",
            request.stack_name,
            uuid::Uuid::new_v4()
        );
        self.statuses
            .lock()
            .unwrap()
            .insert(stack_id.clone(), "CREATE_IN_PROGRESS".to_string());
        self.created.lock().unwrap().push(request);
        Ok(stack_id)
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackUpdate, EngineError> {
        if let Some(error) = self.next_update_error.lock().unwrap().take() {
            return Err(error);
        }
        let stack_id = request.stack_name.clone();
        self.updated.lock().unwrap().push(request);
        if self.update_has_no_changes.load(Ordering::SeqCst) {
            Ok(StackUpdate::NoChanges)
        } else {
            Ok(StackUpdate::Updated { stack_id })
        }
    }

    async fn delete_stack(&self, stack: &str) -> Result<(), EngineError> {
        if let Some(error) = self.next_delete_error.lock().unwrap().take() {
            return Err(error);
        }
        self.deleted.lock().unwrap().push(stack.to_string());
        Ok(())
    }

    async fn describe_stack_status(&self, stack: &str) -> Result<String, EngineError> {
        self.statuses
            .lock()
            .unwrap()
            .get(stack)
            .cloned()
            .ok_or_else(|| EngineError::StackNotFound(stack.to_string()))
    }
}

/// Platform API fake: settings, tenants, DNS, quotas, workflow handoff and events.
pub struct FakePlatform {
    pub settings: Mutex<AppSettings>,
    pub tenants: Mutex<HashMap<uuid::Uuid, TenantDetails>>,
    pub records: Mutex<Vec<RecordSet>>,
    pub quota: Mutex<QuotaCheck>,
    pub handoffs: Mutex<Vec<ProvisionHandoff>>,
    pub events: Mutex<Vec<SystemApiCall>>,
    pub fail_handoff: AtomicBool,
    pub fail_settings: AtomicBool,
}

impl Default for FakePlatform {
    fn default() -> Self {
        Self {
            settings: Mutex::new(AppSettings::default()),
            tenants: Mutex::new(HashMap::new()),
            records: Mutex::new(Vec::new()),
            quota: Mutex::new(QuotaCheck {
                passed: true,
                message: String::new(),
            }),
            handoffs: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            fail_handoff: AtomicBool::new(false),
            fail_settings: AtomicBool::new(false),
        }
    }
}

impl FakePlatform {
    pub fn set_settings(&self, settings: AppSettings) {
        *self.settings.lock().unwrap() = settings;
    }

    pub fn add_tenant(&self, tenant: TenantDetails) {
        self.tenants.lock().unwrap().insert(tenant.id, tenant);
    }

    pub fn add_a_record(&self, name: &str) {
        self.records.lock().unwrap().push(RecordSet {
            name: name.to_string(),
            record_type: "A".to_string(),
        });
    }

    pub fn handoffs(&self) -> Vec<ProvisionHandoff> {
        self.handoffs.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<SystemApiCall> {
        self.events.lock().unwrap().clone()
    }

    fn unavailable(endpoint: &str) -> ClientError {
        ClientError::Http {
            endpoint: endpoint.to_string(),
            status: 503,
            message: "unavailable".to_string(),
        }
    }
}

#[async_trait]
impl SettingsStore for FakePlatform {
    async fn app_settings(&self) -> Result<AppSettings, ClientError> {
        if self.fail_settings.load(Ordering::SeqCst) {
            return Err(Self::unavailable("settings/config"));
        }
        Ok(self.settings.lock().unwrap().clone())
    }
}

#[async_trait]
impl TenantDirectory for FakePlatform {
    async fn tenant(&self, tenant_id: uuid::Uuid) -> Result<TenantDetails, ClientError> {
        self.tenants
            .lock()
            .unwrap()
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| ClientError::Http {
                endpoint: format!("tenants/{tenant_id}"),
                status: 404,
                message: "not found".to_string(),
            })
    }
}

#[async_trait]
impl DnsZone for FakePlatform {
    async fn record_sets(&self, _hosted_zone: &str) -> Result<Vec<RecordSet>, ClientError> {
        Ok(self.records.lock().unwrap().clone())
    }
}

#[async_trait]
impl QuotaChecker for FakePlatform {
    async fn check_quotas(&self) -> Result<QuotaCheck, ClientError> {
        Ok(self.quota.lock().unwrap().clone())
    }
}

#[async_trait]
impl WorkflowLauncher for FakePlatform {
    async fn start_provisioning(&self, handoff: &ProvisionHandoff) -> Result<(), ClientError> {
        if self.fail_handoff.load(Ordering::SeqCst) {
            return Err(Self::unavailable("workflows/onboarding"));
        }
        self.handoffs.lock().unwrap().push(handoff.clone());
        Ok(())
    }
}

#[async_trait]
impl EventPublisher for FakePlatform {
    async fn publish(&self, call: &SystemApiCall) -> Result<(), ClientError> {
        self.events.lock().unwrap().push(call.clone());
        Ok(())
    }
}

/// A tenant whose environment has every resource application stacks need.
pub fn tenant_with_environment(tenant_id: uuid::Uuid, tier: &str) -> TenantDetails {
    let named = |name: &str| TenantResource {
        name: Some(name.to_string()),
        arn: None,
    };
    let mut resources = BTreeMap::new();
    resources.insert("VPC".to_string(), named("vpc-1"));
    resources.insert("PRIVATE_SUBNET_A".to_string(), named("subnet-a"));
    resources.insert("PRIVATE_SUBNET_B".to_string(), named("subnet-b"));
    resources.insert("ECS_CLUSTER".to_string(), named("cluster-1"));
    resources.insert("ECS_SECURITY_GROUP".to_string(), named("sg-1"));
    resources.insert(
        "HTTP_LISTENER".to_string(),
        TenantResource {
            name: None,
            arn: Some("arn:aws:elasticloadbalancing:us-east-1:123456789012:listener/app/t/1/2".to_string()),
        },
    );
    TenantDetails {
        id: tenant_id,
        tier: Some(tier.to_string()),
        resources,
    }
}

/// In-memory object store.
#[derive(Default)]
pub struct FakeObjectStore {
    pub objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_copy: AtomicBool,
}

impl FakeObjectStore {
    pub fn insert(&self, key: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(key.to_string(), body.to_vec());
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.objects.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl ObjectStore for FakeObjectStore {
    async fn exists(&self, key: &str) -> Result<bool, ClientError> {
        Ok(self.objects.lock().unwrap().contains_key(key))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), ClientError> {
        if self.fail_copy.load(Ordering::SeqCst) {
            return Err(ClientError::Transport("object store unreachable".to_string()));
        }
        let mut objects = self.objects.lock().unwrap();
        let body = objects.get(from).cloned().ok_or_else(|| ClientError::Http {
            endpoint: from.to_string(),
            status: 404,
            message: "no such key".to_string(),
        })?;
        objects.insert(to.to_string(), body);
        Ok(())
    }

    async fn put(&self, key: &str, body: Vec<u8>, _content_type: &str) -> Result<(), ClientError> {
        self.objects.lock().unwrap().insert(key.to_string(), body);
        Ok(())
    }
}

/// A service wired to fakes over a fresh in-memory database.
pub struct Harness {
    pub db: Arc<DatabaseConnection>,
    pub engine: Arc<FakeEngine>,
    pub platform: Arc<FakePlatform>,
    pub objects: Arc<FakeObjectStore>,
    pub signer: Arc<HmacUploadSigner>,
    pub service: Arc<OnboardingService>,
}

impl Harness {
    pub async fn new() -> Result<Self> {
        let db = setup_test_db_arc().await?;
        Self::with_db(db)
    }

    pub fn with_db(db: Arc<DatabaseConnection>) -> Result<Self> {
        let config = onboarding_config();
        let engine = Arc::new(FakeEngine::default());
        let platform = Arc::new(FakePlatform::default());
        let objects = Arc::new(FakeObjectStore::default());
        let signer = Arc::new(HmacUploadSigner::new(config.object_store_url()?, SIGNING_KEY));

        let collaborators = Collaborators {
            engine: engine.clone(),
            settings: platform.clone(),
            tenants: platform.clone(),
            dns: platform.clone(),
            quotas: platform.clone(),
            workflows: platform.clone(),
            events: platform.clone(),
            uploads: signer.clone(),
            objects: objects.clone(),
        };
        let service = Arc::new(OnboardingService::new(
            Arc::clone(&db),
            config,
            collaborators,
        )?);

        Ok(Self {
            db,
            engine,
            platform,
            objects,
            signer,
            service,
        })
    }
}
