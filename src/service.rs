//! # Onboarding Service
//!
//! Orchestrates a tenant's onboarding: request intake, infrastructure
//! provisioning, application service stacks, updates, deletion, and the
//! asynchronous status callbacks the deployment pipeline and provisioning
//! engine send back.
//!
//! Callbacks are idempotent monotonic merges: every incoming signal is mapped
//! onto an [`OnboardingStatus`] and only applied when the transition guard
//! accepts it. Explicit operations (update, delete, failure marking) start a
//! new lifecycle phase and write without the guard, but never revive a
//! deleted record.

use std::sync::{Arc, LazyLock};

use metrics::counter;
use regex::Regex;
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use url::Url;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::application::{
    ApplicationTarget, TenantEnvironment, app_stack_name, service_discovery_env, service_stacks,
};
use crate::cidr::{CidrAllocator, cidr_prefix};
use crate::clients::{
    AppSettings, ComputeOverrides, DnsZone, EventPublisher, PlatformClient,
    ProvisionHandoff, QuotaChecker, SettingsStore, SystemApiCall, TenantAttributes,
    TenantDirectory, WorkflowLauncher,
};
use crate::config::{ConfigError, OnboardingConfig};
use crate::engine::{
    CreateStackRequest, EngineError, ProvisioningEngine, STACK_CAPABILITIES, StackUpdate,
    UpdateStackRequest, tenant_stack_name,
};
use crate::error::OnboardingError;
use crate::models::onboarding::Model as Onboarding;
use crate::objects::{ObjectStore, service_discovery_key, tenant_bundle_key};
use crate::repositories::{CidrBlockRepository, NewOnboarding, OnboardingRepository};
use crate::stack::params::{
    CoreStackParameters, ParameterOverrides, ParameterSlot, StackParameters,
    TenantStackParameters,
};
use crate::status::OnboardingStatus;
use crate::upload::{UploadUrlSigner, bundle_key};

const DEFAULT_TIER: &str = "default";
const SERVICE_DISCOVERY_CONTENT_TYPE: &str = "text/plain";
const PIPELINE_PREFIX: &str = "tenant-";

/// A single DNS label: letters, digits and inner hyphens, at most 63 chars.
static SUBDOMAIN_LABEL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?$")
        .unwrap_or_else(|err| unreachable!("subdomain pattern is valid: {err}"))
});

/// A new onboarding request.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StartOnboarding {
    pub name: String,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
}

/// Workflow request to provision infrastructure for a registered tenant.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionRequest {
    pub onboarding_id: Uuid,
    pub tenant: ProvisionTenant,
}

#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionTenant {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tier: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
    #[serde(default)]
    pub plan_id: Option<String>,
    /// Per-tenant compute values overriding the tier defaults.
    #[serde(default)]
    pub compute: ComputeOverrides,
}

/// Changes to an already provisioned tenant. Absent fields keep their value,
/// except `subdomain`: it is always sent and blank removes the DNS record.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TenantUpdate {
    #[serde(default)]
    pub memory: Option<u32>,
    #[serde(default)]
    pub cpu: Option<u32>,
    #[serde(default)]
    pub min: Option<u32>,
    #[serde(default)]
    pub max: Option<u32>,
    #[serde(default)]
    pub plan_id: Option<String>,
    #[serde(default)]
    pub subdomain: Option<String>,
}

/// Result of an update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantUpdateResult {
    pub onboarding: Onboarding,
    /// False when the engine reported nothing to change.
    pub changed: bool,
}

/// Stacks started for a tenant's application services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationProvisioning {
    pub onboarding: Onboarding,
    /// One stack id per service, in service name order.
    pub stack_ids: Vec<String>,
}

/// An asynchronous status signal, in any of its three source shapes.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StatusEvent {
    /// Deployment pipeline state change. Pipelines are named `tenant-{id or prefix}`.
    Pipeline { pipeline: String, state: String },
    /// Provisioning engine stack status report.
    #[serde(rename_all = "camelCase")]
    Stack {
        tenant_id: String,
        stack_status: String,
    },
    /// Direct status update against an onboarding record.
    #[serde(rename_all = "camelCase")]
    Direct {
        onboarding_id: Uuid,
        status: OnboardingStatus,
    },
}

enum CallbackTarget {
    Onboarding(Uuid),
    Tenant(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IgnoreReason {
    /// The signal has no lifecycle meaning.
    Unmapped,
    Duplicate,
    /// The signal belongs to an earlier phase, or the record is terminal.
    Stale,
    /// Another writer changed the status first.
    Superseded,
}

/// What a status callback did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Applied {
        onboarding_id: Uuid,
        from: OnboardingStatus,
        to: OnboardingStatus,
    },
    Ignored {
        reason: IgnoreReason,
    },
}

/// External collaborators the service drives.
#[derive(Clone)]
pub struct Collaborators {
    pub engine: Arc<dyn ProvisioningEngine>,
    pub settings: Arc<dyn SettingsStore>,
    pub tenants: Arc<dyn TenantDirectory>,
    pub dns: Arc<dyn DnsZone>,
    pub quotas: Arc<dyn QuotaChecker>,
    pub workflows: Arc<dyn WorkflowLauncher>,
    pub events: Arc<dyn EventPublisher>,
    pub uploads: Arc<dyn UploadUrlSigner>,
    pub objects: Arc<dyn ObjectStore>,
}

impl Collaborators {
    /// Wires every platform-facing collaborator to one `PlatformClient`.
    pub fn from_platform(
        platform: Arc<PlatformClient>,
        engine: Arc<dyn ProvisioningEngine>,
        uploads: Arc<dyn UploadUrlSigner>,
        objects: Arc<dyn ObjectStore>,
    ) -> Self {
        Self {
            engine,
            settings: platform.clone(),
            tenants: platform.clone(),
            dns: platform.clone(),
            quotas: platform.clone(),
            workflows: platform.clone(),
            events: platform,
            uploads,
            objects,
        }
    }
}

pub struct OnboardingService {
    onboardings: OnboardingRepository,
    cidr: CidrAllocator,
    collaborators: Collaborators,
    config: OnboardingConfig,
    template_url: Url,
    app_template_url: Url,
}

impl OnboardingService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: OnboardingConfig,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        let template_url = config.template_url()?;
        let app_template_url = config.app_template_url()?;
        Ok(Self {
            onboardings: OnboardingRepository::new(db.clone()),
            cidr: CidrAllocator::new(CidrBlockRepository::new(db)),
            collaborators,
            config,
            template_url,
            app_template_url,
        })
    }

    pub async fn get_onboarding(&self, id: Uuid) -> Result<Onboarding, OnboardingError> {
        self.onboardings
            .get(id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("onboarding", id))
    }

    pub async fn list_onboardings(&self) -> Result<Vec<Onboarding>, OnboardingError> {
        Ok(self.onboardings.list().await?)
    }

    /// Resolves a full tenant id or an unambiguous tenant-id prefix.
    pub async fn find_by_tenant(&self, tenant_ref: &str) -> Result<Onboarding, OnboardingError> {
        let tenant_ref = tenant_ref.trim();
        if let Ok(tenant_id) = Uuid::parse_str(tenant_ref) {
            return self
                .onboardings
                .find_by_tenant_id(tenant_id)
                .await?
                .ok_or_else(|| OnboardingError::not_found("tenant", tenant_id));
        }

        if tenant_ref.is_empty() || !tenant_ref.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
            return Err(OnboardingError::invalid_fields(
                format!("'{tenant_ref}' is not a tenant id or id prefix"),
                vec!["tenantId".to_string()],
            ));
        }

        let mut matches = self.onboardings.find_by_tenant_prefix(tenant_ref).await?;
        match matches.len() {
            0 => Err(OnboardingError::not_found("tenant", tenant_ref)),
            1 => Ok(matches.remove(0)),
            count => Err(OnboardingError::invalid_fields(
                format!("tenant prefix '{tenant_ref}' matches {count} tenants"),
                vec!["tenantId".to_string()],
            )),
        }
    }

    /// Validates and records a new onboarding request, then hands it to the
    /// provisioning workflow.
    #[instrument(skip_all, fields(tenant_name = %request.name))]
    pub async fn start_onboarding(
        &self,
        request: StartOnboarding,
    ) -> Result<Onboarding, OnboardingError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(OnboardingError::invalid_fields(
                "tenant name is required",
                vec!["name".to_string()],
            ));
        }
        let subdomain = request
            .subdomain
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);
        let tier = request
            .tier
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_TIER)
            .to_string();

        if let Some(subdomain) = subdomain.as_deref() {
            if !SUBDOMAIN_LABEL.is_match(subdomain) {
                return Err(OnboardingError::invalid_fields(
                    format!("'{subdomain}' is not a valid DNS label"),
                    vec!["subdomain".to_string()],
                ));
            }
            self.ensure_subdomain_available(subdomain).await?;
        }

        let quota = self.collaborators.quotas.check_quotas().await?;
        if !quota.passed {
            warn!(message = %quota.message, "Onboarding would exceed quotas");
            return Err(OnboardingError::QuotaExceeded(quota.message));
        }

        let record = self
            .onboardings
            .insert(NewOnboarding {
                tenant_name: name.clone(),
                tier: Some(tier.clone()),
                subdomain: subdomain.clone(),
            })
            .await?;
        counter!("onboarding_started_total").increment(1);

        let tenant = TenantAttributes {
            name,
            tier,
            subdomain,
            plan_id: request.plan_id.filter(|p| !p.trim().is_empty()),
        };

        match self.hand_off(&record, tenant).await {
            Ok(record) => Ok(record),
            Err(error) => {
                self.mark_failed(record.id, &error).await;
                Err(error)
            }
        }
    }

    async fn hand_off(
        &self,
        record: &Onboarding,
        tenant: TenantAttributes,
    ) -> Result<Onboarding, OnboardingError> {
        let upload_url = self
            .collaborators
            .uploads
            .presign_put(&bundle_key(&record.id), self.config.upload_url_expiry())?;
        let record = self
            .onboardings
            .set_zip_file_url(record.id, upload_url.as_str())
            .await?
            .ok_or_else(|| OnboardingError::not_found("onboarding", record.id))?;

        let handoff = ProvisionHandoff {
            onboarding_id: record.id,
            tenant,
        };
        self.collaborators.workflows.start_provisioning(&handoff).await?;

        info!(onboarding_id = %record.id, "Onboarding handed to provisioning workflow");
        Ok(record)
    }

    async fn ensure_subdomain_available(&self, subdomain: &str) -> Result<(), OnboardingError> {
        let settings = self.collaborators.settings.app_settings().await?;
        let Some((domain, hosted_zone)) = settings.managed_zone() else {
            return Err(OnboardingError::invalid_fields(
                format!("can't define tenant subdomain {subdomain} without a domain name and hosted zone"),
                vec!["subdomain".to_string()],
            ));
        };

        let domain_suffix = format!(".{}", domain.trim_end_matches('.'));
        let records = self.collaborators.dns.record_sets(hosted_zone).await?;
        let taken_in_dns = records
            .iter()
            .filter(|record| record.record_type == "A")
            .filter_map(|record| record.name.trim_end_matches('.').strip_suffix(&domain_suffix))
            .any(|existing| existing.eq_ignore_ascii_case(subdomain));

        if taken_in_dns || self.onboardings.subdomain_in_use(subdomain).await? {
            warn!(subdomain, "Tenant subdomain already in use");
            return Err(OnboardingError::SubdomainConflict(subdomain.to_string()));
        }
        Ok(())
    }

    /// Creates the tenant's infrastructure stack. A record that already carries
    /// a stack id is returned unchanged.
    #[instrument(skip_all, fields(onboarding_id = %request.onboarding_id, tenant_id = %request.tenant.id))]
    pub async fn provision_tenant(
        &self,
        request: ProvisionRequest,
    ) -> Result<Onboarding, OnboardingError> {
        let record = self.get_onboarding(request.onboarding_id).await?;
        if let Some(stack_id) = record.stack_id.as_deref() {
            info!(stack_id, "Tenant already provisioned; nothing to do");
            return Ok(record);
        }
        Self::ensure_not_deleted(&record)?;

        match self.provision(&record, &request.tenant).await {
            Ok(record) => Ok(record),
            // A concurrent provision for the same tenant holds the block; its
            // outcome decides the record's status.
            Err(OnboardingError::AlreadyAssigned(tenant_id)) => {
                let current = self.get_onboarding(record.id).await?;
                if current.stack_id.is_some() {
                    info!(onboarding_id = %record.id, "Tenant provisioned concurrently; nothing to do");
                    return Ok(current);
                }
                warn!(onboarding_id = %record.id, tenant_id = %tenant_id, "Tenant already holds a CIDR block");
                Err(OnboardingError::AlreadyAssigned(tenant_id))
            }
            Err(error) => {
                self.mark_failed(record.id, &error).await;
                Err(error)
            }
        }
    }

    async fn provision(
        &self,
        record: &Onboarding,
        tenant: &ProvisionTenant,
    ) -> Result<Onboarding, OnboardingError> {
        self.onboardings
            .set_tenant(record.id, tenant.id, tenant.name.clone())
            .await?;

        let settings = self.collaborators.settings.app_settings().await?;
        let cidr_block = self.cidr.assign(tenant.id).await?;
        let prefix = cidr_prefix(&cidr_block).ok_or_else(|| {
            OnboardingError::validation(format!("malformed CIDR block {cidr_block}"))
        })?;

        let tier = tenant
            .tier
            .clone()
            .or_else(|| record.tier.clone())
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_TIER.to_string());
        let subdomain = tenant
            .subdomain
            .clone()
            .or_else(|| record.subdomain.clone())
            .unwrap_or_default();

        let parameters = self.tenant_parameters(
            &settings,
            tenant,
            &tier,
            &subdomain,
            prefix,
        );
        let request = CreateStackRequest {
            stack_name: tenant_stack_name(&self.config.environment, &tenant.id),
            template_url: self.template_url.to_string(),
            parameters: parameters.for_create()?,
            disable_rollback: true,
            capabilities: STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
            notification_arns: self.config.stack_notification_target.iter().cloned().collect(),
        };

        let stack_name = request.stack_name.clone();
        let stack_id = self.collaborators.engine.create_stack(request).await?;
        counter!("stack_operations_total", "operation" => "create").increment(1);
        info!(stack_name = %stack_name, stack_id = %stack_id, cidr_block = %cidr_block, "Tenant stack creation started");

        self.onboardings.set_stack_id(record.id, &stack_id).await?;
        self.write_status(record.id, record.status, OnboardingStatus::Provisioning)
            .await
    }

    fn tenant_parameters(
        &self,
        settings: &AppSettings,
        tenant: &ProvisionTenant,
        tier: &str,
        subdomain: &str,
        cidr_prefix: &str,
    ) -> TenantStackParameters {
        let compute = tenant.compute.apply(settings.compute_for_tier(tier));
        let text = |value: &Option<String>| ParameterSlot::value(value.clone().unwrap_or_default());

        let mut params = TenantStackParameters {
            environment: ParameterSlot::value(&self.config.environment),
            artifact_bucket: ParameterSlot::value(&self.config.artifact_bucket),
            domain_name: text(&settings.domain_name),
            hosted_zone_id: text(&settings.hosted_zone),
            ssl_certificate_arn: text(&settings.ssl_certificate),
            tenant_id: ParameterSlot::value(tenant.id.to_string()),
            tenant_subdomain: ParameterSlot::value(subdomain),
            cidr_prefix: ParameterSlot::value(cidr_prefix),
            tier: ParameterSlot::value(tier),
            billing_plan: text(&tenant.plan_id),
            task_memory: ParameterSlot::value(compute.memory.to_string()),
            task_cpu: ParameterSlot::value(compute.cpu.to_string()),
            min_task_count: ParameterSlot::value(compute.min.to_string()),
            max_task_count: ParameterSlot::value(compute.max.to_string()),
            event_bus: text(&settings.event_bus),
            ..TenantStackParameters::default()
        };

        if let Some(filesystem) = &settings.filesystem {
            params.use_efs = ParameterSlot::value("true");
            params.encrypt_efs = ParameterSlot::value(filesystem.encrypt.to_string());
            params.efs_lifecycle_policy = ParameterSlot::value(&filesystem.lifecycle);
        }
        if let Some(database) = &settings.database {
            params.use_rds = ParameterSlot::value("true");
            params.rds_instance_class = ParameterSlot::value(&database.instance_class);
            params.rds_engine = ParameterSlot::value(&database.engine);
            params.rds_engine_version = ParameterSlot::value(&database.version);
        }

        params
    }

    /// Starts one application stack per configured service on a tenant whose
    /// infrastructure stack exists, then publishes the private services'
    /// discovery file.
    #[instrument(skip(self))]
    pub async fn provision_application(
        &self,
        tenant_id: Uuid,
    ) -> Result<ApplicationProvisioning, OnboardingError> {
        let record = self
            .onboardings
            .find_by_tenant_id(tenant_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("tenant", tenant_id))?;
        Self::ensure_not_deleted(&record)?;
        if record.stack_id.is_none() {
            return Err(OnboardingError::validation(format!(
                "tenant {tenant_id} has no provisioned stack"
            )));
        }

        match self.provision_services(&record, tenant_id).await {
            Ok(result) => Ok(result),
            Err(error) => {
                self.mark_failed(record.id, &error).await;
                Err(error)
            }
        }
    }

    async fn provision_services(
        &self,
        record: &Onboarding,
        tenant_id: Uuid,
    ) -> Result<ApplicationProvisioning, OnboardingError> {
        let tenant = self.collaborators.tenants.tenant(tenant_id).await?;
        let settings = self.collaborators.settings.app_settings().await?;
        let environment = TenantEnvironment::from_tenant(&tenant)?;
        let tier = tenant
            .tier
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                OnboardingError::invalid_fields(
                    format!("tenant {tenant_id} has no tier"),
                    vec!["tier".to_string()],
                )
            })?;

        let stacks = service_stacks(
            &settings,
            &environment,
            ApplicationTarget {
                environment: &self.config.environment,
                tenant_id,
                tier,
            },
        )?;

        let mut stack_ids = Vec::with_capacity(stacks.len());
        for stack in stacks {
            let request = CreateStackRequest {
                stack_name: app_stack_name(&self.config.environment, &tenant_id, &stack.resource_name),
                template_url: self.app_template_url.to_string(),
                parameters: stack.parameters,
                disable_rollback: true,
                capabilities: STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
                notification_arns: self.config.stack_notification_target.iter().cloned().collect(),
            };
            let stack_name = request.stack_name.clone();
            let stack_id = self.collaborators.engine.create_stack(request).await?;
            counter!("stack_operations_total", "operation" => "create_app").increment(1);
            info!(service = %stack.service_name, stack_name = %stack_name, stack_id = %stack_id, "Application stack creation started");
            stack_ids.push(stack_id);
        }

        if let Some(contents) = service_discovery_env(&settings.services) {
            self.collaborators
                .objects
                .put(
                    &service_discovery_key(tenant_id),
                    contents.into_bytes(),
                    SERVICE_DISCOVERY_CONTENT_TYPE,
                )
                .await?;
        }

        let onboarding = self
            .write_status(record.id, record.status, OnboardingStatus::Provisioning)
            .await?;
        Ok(ApplicationProvisioning {
            onboarding,
            stack_ids,
        })
    }

    /// Sends the configured service names to the environment's core stack.
    /// Returns the stack id, or `None` when the engine had nothing to change.
    #[instrument(skip(self))]
    pub async fn update_app_config(&self) -> Result<Option<String>, OnboardingError> {
        let settings = self.collaborators.settings.app_settings().await?;
        let Some(stack_name) = settings
            .core_stack_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
        else {
            return Err(OnboardingError::validation(
                "core stack name is not configured",
            ));
        };

        let services: Vec<&str> = settings.services.keys().map(String::as_str).collect();
        let mut overrides = ParameterOverrides::new();
        overrides.set("ApplicationServices", services.join(","));
        let parameters = CoreStackParameters::keep_previous().for_update(&overrides)?;

        let request = UpdateStackRequest::with_previous_template(stack_name, parameters);
        match self.collaborators.engine.update_stack(request).await? {
            StackUpdate::Updated { stack_id } => {
                counter!("stack_operations_total", "operation" => "update_core").increment(1);
                info!(stack_id = %stack_id, services = services.len(), "Core stack update started");
                Ok(Some(stack_id))
            }
            StackUpdate::NoChanges => {
                warn!(stack_name, "Core stack update had no changes");
                Ok(None)
            }
        }
    }

    /// Pushes compute, billing and subdomain changes to an existing stack.
    #[instrument(skip(self, update))]
    pub async fn update_provisioned_tenant(
        &self,
        tenant_id: Uuid,
        update: TenantUpdate,
    ) -> Result<TenantUpdateResult, OnboardingError> {
        let record = self
            .onboardings
            .find_by_tenant_id(tenant_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("tenant", tenant_id))?;
        Self::ensure_not_deleted(&record)?;
        let Some(stack_id) = record.stack_id.clone() else {
            return Err(OnboardingError::validation(format!(
                "tenant {tenant_id} has no provisioned stack"
            )));
        };

        let mut overrides = ParameterOverrides::new();
        overrides
            .set_if_present("TaskMemory", update.memory.map(|v| v.to_string()))
            .set_if_present("TaskCPU", update.cpu.map(|v| v.to_string()))
            .set_if_present("MinTaskCount", update.min.map(|v| v.to_string()))
            .set_if_present("MaxTaskCount", update.max.map(|v| v.to_string()))
            .set_if_present("BillingPlan", update.plan_id)
            .set("TenantSubDomain", update.subdomain.unwrap_or_default());
        let parameters = TenantStackParameters::keep_previous().for_update(&overrides)?;

        let request = UpdateStackRequest {
            stack_name: stack_id.clone(),
            template_url: Some(self.template_url.to_string()),
            use_previous_template: false,
            parameters,
            capabilities: STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        };

        match self.collaborators.engine.update_stack(request).await {
            Ok(StackUpdate::Updated { .. }) => {
                counter!("stack_operations_total", "operation" => "update").increment(1);
                info!(onboarding_id = %record.id, stack_id = %stack_id, "Tenant stack update started");
                let onboarding = self
                    .write_status(record.id, record.status, OnboardingStatus::Updating)
                    .await?;
                Ok(TenantUpdateResult {
                    onboarding,
                    changed: true,
                })
            }
            Ok(StackUpdate::NoChanges) => {
                warn!(onboarding_id = %record.id, stack_id = %stack_id, "Stack update had no changes");
                Ok(TenantUpdateResult {
                    onboarding: record,
                    changed: false,
                })
            }
            Err(error) => {
                let error = OnboardingError::from(error);
                self.mark_failed(record.id, &error).await;
                Err(error)
            }
        }
    }

    /// Tears down a tenant's stack. Repeating the call is harmless.
    #[instrument(skip(self))]
    pub async fn delete_tenant(&self, tenant_id: Uuid) -> Result<Onboarding, OnboardingError> {
        let record = self
            .onboardings
            .find_by_tenant_id(tenant_id)
            .await?
            .ok_or_else(|| OnboardingError::not_found("tenant", tenant_id))?;
        if record.status == OnboardingStatus::Deleted {
            info!(onboarding_id = %record.id, "Tenant already deleted");
            return Ok(record);
        }

        let deleting = self
            .write_status(record.id, record.status, OnboardingStatus::Deleting)
            .await?;
        let Some(stack_id) = deleting.stack_id.clone() else {
            info!(onboarding_id = %record.id, "No stack to delete");
            return self
                .write_status(record.id, deleting.status, OnboardingStatus::Deleted)
                .await;
        };

        match self.collaborators.engine.delete_stack(&stack_id).await {
            Ok(()) => {
                counter!("stack_operations_total", "operation" => "delete").increment(1);
                info!(onboarding_id = %record.id, stack_id = %stack_id, "Tenant stack deletion started");
                Ok(deleting)
            }
            Err(EngineError::StackNotFound(_)) => {
                info!(onboarding_id = %record.id, stack_id = %stack_id, "Stack already gone");
                self.write_status(record.id, deleting.status, OnboardingStatus::Deleted)
                    .await
            }
            Err(error) => {
                let error = OnboardingError::from(error);
                self.mark_failed(record.id, &error).await;
                Err(error)
            }
        }
    }

    /// Applies a pipeline, engine or direct status signal through the
    /// transition guard.
    #[instrument(skip_all)]
    pub async fn handle_status_callback(
        &self,
        event: StatusEvent,
    ) -> Result<CallbackOutcome, OnboardingError> {
        let (target, signal) = match event {
            StatusEvent::Pipeline { pipeline, state } => {
                let Some(tenant_ref) = pipeline.strip_prefix(PIPELINE_PREFIX) else {
                    return Err(OnboardingError::invalid_fields(
                        format!("pipeline '{pipeline}' is not a tenant pipeline"),
                        vec!["pipeline".to_string()],
                    ));
                };
                (
                    CallbackTarget::Tenant(tenant_ref.to_string()),
                    OnboardingStatus::from_pipeline_state(&state),
                )
            }
            StatusEvent::Stack {
                tenant_id,
                stack_status,
            } => (
                CallbackTarget::Tenant(tenant_id),
                OnboardingStatus::from_stack_status(&stack_status),
            ),
            StatusEvent::Direct {
                onboarding_id,
                status,
            } => (CallbackTarget::Onboarding(onboarding_id), Some(status)),
        };

        let Some(incoming) = signal else {
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::Unmapped,
            });
        };

        let record = match target {
            CallbackTarget::Onboarding(id) => self.get_onboarding(id).await?,
            CallbackTarget::Tenant(tenant_ref) => self.find_by_tenant(&tenant_ref).await?,
        };

        let current = record.status;
        if current == incoming {
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::Duplicate,
            });
        }
        if !current.accepts(incoming) {
            info!(onboarding_id = %record.id, %current, %incoming, "Ignoring stale status signal");
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::Stale,
            });
        }

        if !self
            .onboardings
            .compare_and_set_status(record.id, current, incoming)
            .await?
        {
            warn!(onboarding_id = %record.id, %current, %incoming, "Status changed concurrently");
            return Ok(CallbackOutcome::Ignored {
                reason: IgnoreReason::Superseded,
            });
        }
        Self::count_transition(current, incoming);
        info!(onboarding_id = %record.id, from = %current, to = %incoming, "Onboarding status updated");

        if matches!(
            incoming,
            OnboardingStatus::Provisioned | OnboardingStatus::Deployed
        ) {
            if let Some(tenant_id) = record.tenant_id {
                if incoming == OnboardingStatus::Provisioned {
                    self.move_config_bundle(record.id, tenant_id).await;
                }
                self.notify_registry(tenant_id, incoming).await;
            }
        }

        Ok(CallbackOutcome::Applied {
            onboarding_id: record.id,
            from: current,
            to: incoming,
        })
    }

    async fn notify_registry(&self, tenant_id: Uuid, status: OnboardingStatus) {
        let call = SystemApiCall::tenant_onboarding_status(tenant_id, status.as_str());
        if let Err(error) = self.collaborators.events.publish(&call).await {
            tracing::error!(tenant_id = %tenant_id, error = %error, "Failed to publish tenant status update");
            counter!("onboarding_notification_failures_total").increment(1);
        }
    }

    /// Copies the bundle uploaded under the onboarding id to the tenant's
    /// location. A tenant without an upload is left alone.
    async fn move_config_bundle(&self, onboarding_id: Uuid, tenant_id: Uuid) {
        let source = bundle_key(&onboarding_id);
        let target = tenant_bundle_key(tenant_id);
        let objects = &self.collaborators.objects;
        let moved = match objects.exists(&source).await {
            Ok(true) => objects.copy(&source, &target).await.map(|()| true),
            other => other,
        };

        match moved {
            Ok(true) => info!(tenant_id = %tenant_id, source = %source, target = %target, "Tenant config bundle moved"),
            Ok(false) => info!(tenant_id = %tenant_id, "No config bundle uploaded"),
            Err(error) => {
                tracing::error!(tenant_id = %tenant_id, source = %source, error = %error, "Failed to move tenant config bundle");
                counter!("onboarding_bundle_move_failures_total").increment(1);
            }
        }
    }

    /// Records in the deletion phase accept no new infrastructure work.
    fn ensure_not_deleted(record: &Onboarding) -> Result<(), OnboardingError> {
        if matches!(
            record.status,
            OnboardingStatus::Deleting | OnboardingStatus::Deleted
        ) {
            return Err(OnboardingError::validation(format!(
                "onboarding {} is {}",
                record.id, record.status
            )));
        }
        Ok(())
    }

    async fn write_status(
        &self,
        id: Uuid,
        from: OnboardingStatus,
        to: OnboardingStatus,
    ) -> Result<Onboarding, OnboardingError> {
        let record = self
            .onboardings
            .update_status(id, to)
            .await?
            .ok_or_else(|| OnboardingError::not_found("onboarding", id))?;
        Self::count_transition(from, to);
        Ok(record)
    }

    /// Best-effort failure marking; the original error is what callers see.
    /// Deleted records stay deleted.
    async fn mark_failed(&self, id: Uuid, cause: &OnboardingError) {
        tracing::error!(onboarding_id = %id, error = %cause, "Onboarding step failed");
        counter!("onboarding_failed_total").increment(1);
        match self.onboardings.mark_failed(id).await {
            Ok(true) => {}
            Ok(false) => {
                info!(onboarding_id = %id, "Onboarding deleted or gone; not marking failed");
            }
            Err(error) => {
                tracing::error!(onboarding_id = %id, error = %error, "Failed to mark onboarding as failed");
            }
        }
    }

    fn count_transition(from: OnboardingStatus, to: OnboardingStatus) {
        counter!(
            "onboarding_status_transitions_total",
            "from" => from.as_str(),
            "to" => to.as_str()
        )
        .increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_events_deserialize_from_each_source() {
        let pipeline: StatusEvent = serde_json::from_value(serde_json::json!({
            "source": "pipeline",
            "pipeline": "tenant-0f6a1c9e",
            "state": "SUCCEEDED"
        }))
        .unwrap();
        assert!(matches!(pipeline, StatusEvent::Pipeline { ref state, .. } if state == "SUCCEEDED"));

        let stack: StatusEvent = serde_json::from_value(serde_json::json!({
            "source": "stack",
            "tenantId": "0f6a1c9e-4b2d-4e6f-8a1b-2c3d4e5f6a7b",
            "stackStatus": "CREATE_COMPLETE"
        }))
        .unwrap();
        assert!(matches!(stack, StatusEvent::Stack { ref stack_status, .. } if stack_status == "CREATE_COMPLETE"));

        let direct: StatusEvent = serde_json::from_value(serde_json::json!({
            "source": "direct",
            "onboardingId": "0f6a1c9e-4b2d-4e6f-8a1b-2c3d4e5f6a7b",
            "status": "validated"
        }))
        .unwrap();
        assert!(matches!(
            direct,
            StatusEvent::Direct {
                status: OnboardingStatus::Validated,
                ..
            }
        ));
    }

    #[test]
    fn callback_outcomes_serialize_with_tag() {
        let ignored = CallbackOutcome::Ignored {
            reason: IgnoreReason::Stale,
        };
        assert_eq!(
            serde_json::to_value(&ignored).unwrap(),
            serde_json::json!({ "outcome": "ignored", "reason": "stale" })
        );
    }
}
