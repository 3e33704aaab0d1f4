//! # Application Stacks
//!
//! Turns the environment's application services into one stack parameter set
//! per service for a tenant, and renders the discovery file private services
//! are reached through.
//!
//! Every service's parameters are built and checked before any stack is
//! requested, so a bad service definition never leaves half an application
//! behind.

use std::collections::BTreeMap;

use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

use crate::clients::{
    AppSettings, ComputeSize, FilesystemKind, ServiceConfig, ServiceTier, TenantDetails,
};
use crate::engine::tenant_stack_name;
use crate::error::OnboardingError;
use crate::stack::params::{AppStackParameters, ParameterSlot, StackParameter, StackParameters};

/// Engine limit on stack name length.
pub const STACK_NAME_LIMIT: usize = 128;
const STACK_SUFFIX_LEN: usize = 12;

/// Network and cluster resources shared by all of a tenant's service stacks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantEnvironment {
    pub vpc: String,
    pub private_subnet_a: String,
    pub private_subnet_b: String,
    pub ecs_cluster: String,
    pub ecs_security_group: String,
    pub http_listener: String,
    pub https_listener: Option<String>,
    pub private_route_table: Option<String>,
    pub service_discovery_namespace: Option<String>,
}

impl TenantEnvironment {
    /// Reads the tenant's provisioned resources. The HTTPS listener is
    /// optional; environments without a certificate have none.
    pub fn from_tenant(tenant: &TenantDetails) -> Result<Self, OnboardingError> {
        let mut missing = Vec::new();
        let mut require = |key: &str, value: Option<&str>| match value {
            Some(value) => value.to_string(),
            None => {
                missing.push(key.to_string());
                String::new()
            }
        };

        let environment = Self {
            vpc: require("VPC", tenant.resource_name("VPC")),
            private_subnet_a: require("PRIVATE_SUBNET_A", tenant.resource_name("PRIVATE_SUBNET_A")),
            private_subnet_b: require("PRIVATE_SUBNET_B", tenant.resource_name("PRIVATE_SUBNET_B")),
            ecs_cluster: require("ECS_CLUSTER", tenant.resource_name("ECS_CLUSTER")),
            ecs_security_group: require(
                "ECS_SECURITY_GROUP",
                tenant.resource_name("ECS_SECURITY_GROUP"),
            ),
            http_listener: require("HTTP_LISTENER", tenant.resource_arn("HTTP_LISTENER")),
            https_listener: tenant.resource_arn("HTTPS_LISTENER").map(str::to_string),
            private_route_table: tenant.resource_name("PRIVATE_ROUTE_TABLE").map(str::to_string),
            service_discovery_namespace: tenant
                .resource_name("SERVICE_DISCOVERY_NAMESPACE")
                .map(str::to_string),
        };

        if !missing.is_empty() {
            return Err(OnboardingError::invalid_fields(
                format!(
                    "tenant {} is missing environment resources: {}",
                    tenant.id,
                    missing.join(", ")
                ),
                missing,
            ));
        }
        Ok(environment)
    }
}

/// Who the application stacks are for.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationTarget<'a> {
    pub environment: &'a str,
    pub tenant_id: Uuid,
    pub tier: &'a str,
}

/// One service's stack, ready for the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStack {
    pub service_name: String,
    pub resource_name: String,
    pub parameters: Vec<StackParameter>,
}

/// Builds and validates the parameters of every configured service.
pub fn service_stacks(
    settings: &AppSettings,
    tenant: &TenantEnvironment,
    target: ApplicationTarget<'_>,
) -> Result<Vec<ServiceStack>, OnboardingError> {
    if settings.services.is_empty() {
        return Err(OnboardingError::validation(
            "no application services are configured",
        ));
    }

    let priorities = path_priorities(&settings.services);
    let event_bus = settings.event_bus.as_deref().unwrap_or_default();

    settings
        .services
        .iter()
        .map(|(name, service)| {
            let resource_name = service_resource_name(name);
            if resource_name.is_empty() {
                return Err(OnboardingError::invalid_fields(
                    format!("service name '{name}' has no letters, digits or dashes"),
                    vec!["services".to_string()],
                ));
            }
            let Some(sizing) = service.tiers.get(target.tier) else {
                return Err(OnboardingError::invalid_fields(
                    format!("service {name} has no '{}' tier", target.tier),
                    vec!["tier".to_string()],
                ));
            };

            let priority = priorities.get(name.as_str()).copied().unwrap_or(0);
            let mut params = service_parameters(name, &resource_name, service, sizing, tenant, target);
            params.event_bus = ParameterSlot::value(event_bus);
            params.public_path_rule_priority = ParameterSlot::value(priority.to_string());

            Ok(ServiceStack {
                service_name: name.clone(),
                parameters: params.for_create()?,
                resource_name,
            })
        })
        .collect()
}

fn service_parameters(
    name: &str,
    resource_name: &str,
    service: &ServiceConfig,
    sizing: &ServiceTier,
    tenant: &TenantEnvironment,
    target: ApplicationTarget<'_>,
) -> AppStackParameters {
    let compute = sizing.compute.apply(ComputeSize::default());
    let optional = |value: &Option<String>| ParameterSlot::value(value.clone().unwrap_or_default());
    let path = if service.public {
        service.path.clone().unwrap_or_default()
    } else {
        String::new()
    };

    let mut params = AppStackParameters {
        environment: ParameterSlot::value(target.environment),
        tenant_id: ParameterSlot::value(target.tenant_id.to_string()),
        tier: ParameterSlot::value(target.tier),
        service_name: ParameterSlot::value(name),
        service_resource_name: ParameterSlot::value(resource_name),
        container_repository: optional(&service.container_repo),
        container_repository_tag: ParameterSlot::value(&service.container_tag),
        ecs_cluster: ParameterSlot::value(&tenant.ecs_cluster),
        publicly_addressable: ParameterSlot::value(service.public.to_string()),
        public_path_route: ParameterSlot::value(path),
        vpc: ParameterSlot::value(&tenant.vpc),
        subnet_private_a: ParameterSlot::value(&tenant.private_subnet_a),
        subnet_private_b: ParameterSlot::value(&tenant.private_subnet_b),
        private_route_table: optional(&tenant.private_route_table),
        service_discovery_namespace: optional(&tenant.service_discovery_namespace),
        http_listener: ParameterSlot::value(&tenant.http_listener),
        https_listener: optional(&tenant.https_listener),
        ecs_security_group: ParameterSlot::value(&tenant.ecs_security_group),
        // Template mapping keys can't contain underscores.
        container_os: ParameterSlot::value(
            service.operating_system.as_deref().unwrap_or_default().replace('_', ""),
        ),
        cluster_instance_type: optional(&sizing.instance_type),
        task_memory: ParameterSlot::value(compute.memory.to_string()),
        task_cpu: ParameterSlot::value(compute.cpu.to_string()),
        min_task_count: ParameterSlot::value(compute.min.to_string()),
        max_task_count: ParameterSlot::value(compute.max.to_string()),
        container_port: ParameterSlot::value(service.container_port.to_string()),
        container_health_check_path: optional(&service.health_check_url),
        ..AppStackParameters::default()
    };

    if let Some(filesystem) = &sizing.filesystem {
        params.file_system_mount_point = ParameterSlot::value(&filesystem.mount_point);
        match filesystem.file_system_type {
            FilesystemKind::Efs => {
                params.use_efs = ParameterSlot::value("true");
                if let Some(efs) = &filesystem.efs {
                    params.encrypt_efs = ParameterSlot::value(efs.encrypt_at_rest.to_string());
                    params.efs_lifecycle_policy = ParameterSlot::value(&efs.filesystem_lifecycle);
                }
            }
            FilesystemKind::Fsx => {
                params.use_fsx = ParameterSlot::value("true");
                if let Some(fsx) = &filesystem.fsx {
                    params.file_system_storage = ParameterSlot::value(fsx.storage_gb.to_string());
                    params.file_system_throughput =
                        ParameterSlot::value(fsx.throughput_mbs.to_string());
                    params.fsx_backup_retention =
                        ParameterSlot::value(fsx.backup_retention_days.to_string());
                }
            }
        }
    }

    if let Some(database) = &sizing.database {
        params.use_rds = ParameterSlot::value("true");
        params.rds_instance_class = ParameterSlot::value(&database.instance_class);
        params.rds_engine = ParameterSlot::value(&database.engine);
        params.rds_engine_version = ParameterSlot::value(&database.version);
        params.rds_parameter_group_family = ParameterSlot::value(&database.family);
        params.rds_username = ParameterSlot::value(&database.username);
        params.rds_password_param = ParameterSlot::value(database_password_param(target.environment));
        params.rds_port = ParameterSlot::value(
            database.port.map(|port| port.to_string()).unwrap_or_default(),
        );
        params.rds_database = ParameterSlot::value(&database.database);
        params.rds_bootstrap = optional(&database.bootstrap_file);
    }

    params
}

/// Parameter store path of the environment's database master password.
pub fn database_password_param(environment: &str) -> String {
    format!("/onboarding/{environment}/DB_MASTER_PASSWORD")
}

/// Listener rule priority per public service: the longest path is matched
/// first, so `/feature*` wins over a catch-all `/*`. Equal lengths keep name
/// order.
pub fn path_priorities(services: &BTreeMap<String, ServiceConfig>) -> BTreeMap<&str, u32> {
    let mut public: Vec<(&str, usize)> = services
        .iter()
        .filter(|(_, service)| service.public)
        .map(|(name, service)| (name.as_str(), service.path.as_deref().map_or(0, str::len)))
        .collect();
    public.sort_by(|a, b| b.1.cmp(&a.1));

    public
        .into_iter()
        .zip(1..)
        .map(|((name, _), priority)| (name, priority))
        .collect()
}

/// Stack resource names allow only letters, digits and dashes.
pub fn service_resource_name(service_name: &str) -> String {
    service_name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// `{tenant stack}-app-{resource}-{random}`, cut to the engine's limit.
pub fn app_stack_name(environment: &str, tenant_id: &Uuid, resource_name: &str) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(STACK_SUFFIX_LEN)
        .map(char::from)
        .collect();
    let name = format!(
        "{}-app-{resource_name}-{}",
        tenant_stack_name(environment, tenant_id),
        suffix.to_ascii_uppercase()
    );
    name.chars().take(STACK_NAME_LIMIT).collect()
}

/// `SERVICE_{NAME}_HOST` and `SERVICE_{NAME}_PORT` lines for every private
/// service, or `None` when all services are public.
pub fn service_discovery_env(services: &BTreeMap<String, ServiceConfig>) -> Option<String> {
    let lines: Vec<String> = services
        .iter()
        .filter(|(_, service)| !service.public)
        .flat_map(|(name, service)| {
            let variable = name.split_whitespace().collect::<Vec<_>>().join("_").to_uppercase();
            [
                format!("SERVICE_{variable}_HOST={}.local", service_resource_name(name)),
                format!("SERVICE_{variable}_PORT={}", service.container_port),
            ]
        })
        .collect();

    if lines.is_empty() {
        return None;
    }
    Some(lines.join("\n") + "\n")
}
