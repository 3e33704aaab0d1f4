//! Platform collaborators
//!
//! Narrow async traits for the platform services the orchestrator depends on
//! (settings, tenant registry, DNS, quotas, workflow handoff, event bus) and
//! `PlatformClient`, which implements all of them against the platform's
//! internal HTTP API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

/// Detail type of events that ask the platform to replay an API call.
pub const SYSTEM_API_CALL_DETAIL_TYPE: &str = "System API Call";
pub const SYSTEM_API_CALL_SOURCE: &str = "tenant-onboarding";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("{endpoint} returned {status}: {message}")]
    Http {
        endpoint: String,
        status: u16,
        message: String,
    },
    #[error("request to platform API failed: {0}")]
    Transport(String),
    #[error("unexpected platform API response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for ClientError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Compute sizing for a tenant's service tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ComputeSize {
    pub memory: u32,
    pub cpu: u32,
    pub min: u32,
    pub max: u32,
}

impl Default for ComputeSize {
    fn default() -> Self {
        Self {
            memory: 1024,
            cpu: 512,
            min: 1,
            max: 1,
        }
    }
}

/// Per-tenant compute values that win over the tier defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ComputeOverrides {
    pub memory: Option<u32>,
    pub cpu: Option<u32>,
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl ComputeOverrides {
    pub fn apply(&self, base: ComputeSize) -> ComputeSize {
        ComputeSize {
            memory: self.memory.unwrap_or(base.memory),
            cpu: self.cpu.unwrap_or(base.cpu),
            min: self.min.unwrap_or(base.min),
            max: self.max.unwrap_or(base.max),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilesystemSettings {
    #[serde(default = "default_encrypt")]
    pub encrypt: bool,
    #[serde(default = "default_lifecycle")]
    pub lifecycle: String,
}

fn default_encrypt() -> bool {
    true
}

fn default_lifecycle() -> String {
    "NEVER".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatabaseSettings {
    pub instance_class: String,
    pub engine: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FilesystemKind {
    Efs,
    Fsx,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EfsSettings {
    #[serde(default = "default_encrypt")]
    pub encrypt_at_rest: bool,
    #[serde(default = "default_lifecycle")]
    pub filesystem_lifecycle: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsxSettings {
    /// 32 to 65,536 GB.
    #[serde(default)]
    pub storage_gb: u32,
    #[serde(default)]
    pub throughput_mbs: u32,
    #[serde(default = "default_backup_retention_days")]
    pub backup_retention_days: u32,
}

fn default_backup_retention_days() -> u32 {
    7
}

/// Shared filesystem mounted into a service's tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceFilesystem {
    pub file_system_type: FilesystemKind,
    #[serde(default)]
    pub mount_point: String,
    #[serde(default)]
    pub efs: Option<EfsSettings>,
    #[serde(default)]
    pub fsx: Option<FsxSettings>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceDatabase {
    pub engine: String,
    pub version: String,
    #[serde(default)]
    pub family: String,
    pub instance_class: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub bootstrap_file: Option<String>,
}

/// What a service runs with in one tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceTier {
    #[serde(default)]
    pub instance_type: Option<String>,
    #[serde(flatten)]
    pub compute: ComputeOverrides,
    #[serde(default)]
    pub filesystem: Option<ServiceFilesystem>,
    #[serde(default)]
    pub database: Option<ServiceDatabase>,
}

/// One containerized application service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceConfig {
    #[serde(default)]
    pub public: bool,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub health_check_url: Option<String>,
    #[serde(default)]
    pub container_port: u16,
    #[serde(default)]
    pub container_repo: Option<String>,
    #[serde(default = "default_container_tag")]
    pub container_tag: String,
    #[serde(default)]
    pub operating_system: Option<String>,
    /// Sizing keyed by tier name.
    #[serde(default)]
    pub tiers: BTreeMap<String, ServiceTier>,
}

fn default_container_tag() -> String {
    "latest".to_string()
}

/// Environment-wide application settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppSettings {
    /// Application name shown to operators.
    #[serde(default)]
    pub name: Option<String>,
    /// Name of the environment's core stack.
    #[serde(default)]
    pub core_stack_name: Option<String>,
    #[serde(default)]
    pub domain_name: Option<String>,
    #[serde(default)]
    pub hosted_zone: Option<String>,
    #[serde(default)]
    pub ssl_certificate: Option<String>,
    #[serde(default)]
    pub event_bus: Option<String>,
    /// Compute defaults keyed by tier name.
    #[serde(default)]
    pub tiers: BTreeMap<String, ComputeSize>,
    #[serde(default)]
    pub filesystem: Option<FilesystemSettings>,
    #[serde(default)]
    pub database: Option<DatabaseSettings>,
    /// Application services keyed by service name.
    #[serde(default)]
    pub services: BTreeMap<String, ServiceConfig>,
}

impl AppSettings {
    /// Compute defaults for `tier`, falling back to the platform minimum.
    pub fn compute_for_tier(&self, tier: &str) -> ComputeSize {
        self.tiers.get(tier).copied().unwrap_or_default()
    }

    /// Domain and hosted zone, when both are configured.
    pub fn managed_zone(&self) -> Option<(&str, &str)> {
        let domain = self.domain_name.as_deref().filter(|d| !d.trim().is_empty())?;
        let zone = self.hosted_zone.as_deref().filter(|z| !z.trim().is_empty())?;
        Some((domain, zone))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaCheck {
    pub passed: bool,
    #[serde(default)]
    pub message: String,
}

/// A DNS record set in a hosted zone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub record_type: String,
}

/// A piece of tenant infrastructure, addressed by name or ARN.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantResource {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arn: Option<String>,
}

/// A tenant as the tenant registry reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantDetails {
    pub id: Uuid,
    #[serde(default)]
    pub tier: Option<String>,
    /// Provisioned infrastructure keyed by resource type (`VPC`, `ECS_CLUSTER`, ...).
    #[serde(default)]
    pub resources: BTreeMap<String, TenantResource>,
}

impl TenantDetails {
    pub fn resource_name(&self, key: &str) -> Option<&str> {
        self.resources
            .get(key)
            .and_then(|r| r.name.as_deref())
            .filter(|v| !v.trim().is_empty())
    }

    pub fn resource_arn(&self, key: &str) -> Option<&str> {
        self.resources
            .get(key)
            .and_then(|r| r.arn.as_deref())
            .filter(|v| !v.trim().is_empty())
    }
}

/// Tenant attributes carried from the start request into provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantAttributes {
    pub name: String,
    pub tier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subdomain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_id: Option<String>,
}

/// Payload handed to the workflow engine once a record exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionHandoff {
    pub onboarding_id: Uuid,
    pub tenant: TenantAttributes,
}

/// An API call the platform replays on our behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemApiCall {
    pub resource: String,
    pub method: String,
    pub body: String,
}

impl SystemApiCall {
    /// Tells the tenant registry about a tenant's new onboarding status.
    pub fn tenant_onboarding_status(tenant_id: Uuid, status: &str) -> Self {
        Self {
            resource: format!("tenants/{tenant_id}/onboarding"),
            method: "PUT".to_string(),
            body: serde_json::json!({ "id": tenant_id, "onboardingStatus": status }).to_string(),
        }
    }
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn app_settings(&self) -> Result<AppSettings, ClientError>;
}

#[async_trait]
pub trait TenantDirectory: Send + Sync {
    async fn tenant(&self, tenant_id: Uuid) -> Result<TenantDetails, ClientError>;
}

#[async_trait]
pub trait DnsZone: Send + Sync {
    async fn record_sets(&self, hosted_zone: &str) -> Result<Vec<RecordSet>, ClientError>;
}

#[async_trait]
pub trait QuotaChecker: Send + Sync {
    async fn check_quotas(&self) -> Result<QuotaCheck, ClientError>;
}

#[async_trait]
pub trait WorkflowLauncher: Send + Sync {
    async fn start_provisioning(&self, handoff: &ProvisionHandoff) -> Result<(), ClientError>;
}

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, call: &SystemApiCall) -> Result<(), ClientError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventEnvelope<'a> {
    source: &'a str,
    detail_type: &'a str,
    detail: &'a SystemApiCall,
}

/// HTTP client for the platform's internal API.
#[derive(Debug, Clone)]
pub struct PlatformClient {
    client: Client,
    base_url: Url,
}

impl PlatformClient {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, ClientError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Transport(format!("{} cannot be a base URL", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send(&self, endpoint: &str, request: RequestBuilder) -> Result<reqwest::Response, ClientError> {
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::warn!(endpoint, status = status.as_u16(), "Platform API call failed");
        Err(ClientError::Http {
            endpoint: endpoint.to_string(),
            status: status.as_u16(),
            message,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T, ClientError> {
        let url = self.endpoint(segments)?;
        let endpoint = segments.join("/");
        let response = self.send(&endpoint, self.client.get(url)).await?;
        Ok(response.json().await?)
    }

    async fn post_json<B: Serialize + Sync>(&self, segments: &[&str], body: &B) -> Result<(), ClientError> {
        let url = self.endpoint(segments)?;
        let endpoint = segments.join("/");
        self.send(&endpoint, self.client.post(url).json(body)).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for PlatformClient {
    async fn app_settings(&self) -> Result<AppSettings, ClientError> {
        self.get_json(&["settings", "config"]).await
    }
}

#[async_trait]
impl TenantDirectory for PlatformClient {
    async fn tenant(&self, tenant_id: Uuid) -> Result<TenantDetails, ClientError> {
        self.get_json(&["tenants", &tenant_id.to_string()]).await
    }
}

#[async_trait]
impl DnsZone for PlatformClient {
    async fn record_sets(&self, hosted_zone: &str) -> Result<Vec<RecordSet>, ClientError> {
        self.get_json(&["dns", "zones", hosted_zone, "records"]).await
    }
}

#[async_trait]
impl QuotaChecker for PlatformClient {
    async fn check_quotas(&self) -> Result<QuotaCheck, ClientError> {
        self.get_json(&["quotas", "check"]).await
    }
}

#[async_trait]
impl WorkflowLauncher for PlatformClient {
    async fn start_provisioning(&self, handoff: &ProvisionHandoff) -> Result<(), ClientError> {
        self.post_json(&["workflows", "onboarding"], handoff).await
    }
}

#[async_trait]
impl EventPublisher for PlatformClient {
    async fn publish(&self, call: &SystemApiCall) -> Result<(), ClientError> {
        let envelope = EventEnvelope {
            source: SYSTEM_API_CALL_SOURCE,
            detail_type: SYSTEM_API_CALL_DETAIL_TYPE,
            detail: call,
        };
        self.post_json(&["events"], &envelope).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_win_over_tier_defaults() {
        let mut settings = AppSettings::default();
        settings.tiers.insert(
            "gold".to_string(),
            ComputeSize {
                memory: 4096,
                cpu: 2048,
                min: 2,
                max: 6,
            },
        );

        let overrides = ComputeOverrides {
            cpu: Some(1024),
            max: Some(10),
            ..Default::default()
        };
        let resolved = overrides.apply(settings.compute_for_tier("gold"));

        assert_eq!(
            resolved,
            ComputeSize {
                memory: 4096,
                cpu: 1024,
                min: 2,
                max: 10,
            }
        );
        assert_eq!(settings.compute_for_tier("unknown"), ComputeSize::default());
    }

    #[test]
    fn managed_zone_requires_domain_and_zone() {
        let mut settings = AppSettings {
            domain_name: Some("example.com".to_string()),
            ..Default::default()
        };
        assert_eq!(settings.managed_zone(), None);

        settings.hosted_zone = Some("Z123".to_string());
        assert_eq!(settings.managed_zone(), Some(("example.com", "Z123")));

        settings.domain_name = Some("  ".to_string());
        assert_eq!(settings.managed_zone(), None);
    }

    #[test]
    fn tenant_status_call_targets_registry() {
        let tenant_id = Uuid::parse_str("0f6a1c9e-4b2d-4e6f-8a1b-2c3d4e5f6a7b").unwrap();
        let call = SystemApiCall::tenant_onboarding_status(tenant_id, "deployed");

        assert_eq!(call.resource, format!("tenants/{tenant_id}/onboarding"));
        assert_eq!(call.method, "PUT");
        let body: serde_json::Value = serde_json::from_str(&call.body).unwrap();
        assert_eq!(body["id"], tenant_id.to_string());
        assert_eq!(body["onboardingStatus"], "deployed");
    }

    #[test]
    fn settings_parse_with_missing_sections() {
        let settings: AppSettings =
            serde_json::from_str(r#"{"domainName":"example.com","tiers":{"default":{"memory":2048,"cpu":1024,"min":1,"max":2}}}"#)
                .unwrap();

        assert_eq!(settings.domain_name.as_deref(), Some("example.com"));
        assert_eq!(settings.compute_for_tier("default").memory, 2048);
        assert!(settings.filesystem.is_none());
        assert!(settings.services.is_empty());
    }

    #[test]
    fn services_parse_with_tier_sizing() {
        let settings: AppSettings = serde_json::from_value(serde_json::json!({
            "name": "acme",
            "services": {
                "api": {
                    "public": true,
                    "path": "/api*",
                    "containerPort": 8080,
                    "containerRepo": "acme/api",
                    "tiers": {
                        "gold": {
                            "instanceType": "t3.large",
                            "memory": 2048,
                            "cpu": 1024,
                            "filesystem": {
                                "fileSystemType": "EFS",
                                "mountPoint": "/data",
                                "efs": { "encryptAtRest": false, "filesystemLifecycle": "AFTER_7_DAYS" }
                            }
                        }
                    }
                }
            }
        }))
        .unwrap();

        let api = &settings.services["api"];
        assert_eq!(api.container_tag, "latest");
        let gold = &api.tiers["gold"];
        assert_eq!(gold.compute.memory, Some(2048));
        assert_eq!(gold.compute.min, None);
        let filesystem = gold.filesystem.as_ref().unwrap();
        assert_eq!(filesystem.file_system_type, FilesystemKind::Efs);
        assert_eq!(filesystem.efs.as_ref().unwrap().filesystem_lifecycle, "AFTER_7_DAYS");
    }

    #[test]
    fn tenant_resources_ignore_blank_values() {
        let tenant: TenantDetails = serde_json::from_value(serde_json::json!({
            "id": "0f6a1c9e-4b2d-4e6f-8a1b-2c3d4e5f6a7b",
            "tier": "gold",
            "resources": {
                "VPC": { "name": "vpc-123" },
                "HTTP_LISTENER": { "arn": "arn:listener" },
                "ECS_CLUSTER": { "name": " " }
            }
        }))
        .unwrap();

        assert_eq!(tenant.resource_name("VPC"), Some("vpc-123"));
        assert_eq!(tenant.resource_arn("HTTP_LISTENER"), Some("arn:listener"));
        assert_eq!(tenant.resource_name("ECS_CLUSTER"), None);
        assert_eq!(tenant.resource_name("MISSING"), None);
    }
}
