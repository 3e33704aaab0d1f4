//! # Stack Parameters
//!
//! Typed parameter sets for the three infrastructure template families and
//! the create/update rendering the provisioning engine expects.
//!
//! Each family is declared once through [`stack_parameters!`], which fixes the
//! template key, the default value, and the emission order of every field.
//! Create renders every key with a concrete value. Update renders overridden
//! keys with their new value and every other key as "use previous value", so
//! a narrow update never resets unrelated parameters.

use std::collections::BTreeMap;

use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// State of a single template parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ParameterSlot {
    /// No value and no default; invalid at create time.
    #[default]
    Unset,
    /// Reuse whatever value the stack already holds.
    KeepPrevious,
    Value(String),
}

impl ParameterSlot {
    pub fn value<S: Into<String>>(value: S) -> Self {
        Self::Value(value.into())
    }

    fn from_default(default: Option<&str>) -> Self {
        match default {
            Some(value) => Self::Value(value.to_string()),
            None => Self::Unset,
        }
    }

    pub fn as_value(&self) -> Option<&str> {
        match self {
            Self::Value(value) => Some(value),
            _ => None,
        }
    }

    fn is_blank(&self) -> bool {
        self.as_value().is_none_or(|value| value.trim().is_empty())
    }
}

/// What the engine receives for one parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Value(String),
    UsePreviousValue,
}

/// One rendered template parameter, serialized in the engine's wire shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackParameter {
    pub key: &'static str,
    pub value: ParameterValue,
}

impl StackParameter {
    pub fn value(&self) -> Option<&str> {
        match &self.value {
            ParameterValue::Value(value) => Some(value),
            ParameterValue::UsePreviousValue => None,
        }
    }

    pub fn uses_previous_value(&self) -> bool {
        self.value == ParameterValue::UsePreviousValue
    }
}

impl Serialize for StackParameter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("ParameterKey", self.key)?;
        match &self.value {
            ParameterValue::Value(value) => map.serialize_entry("ParameterValue", value)?,
            ParameterValue::UsePreviousValue => map.serialize_entry("UsePreviousValue", &true)?,
        }
        map.end()
    }
}

/// Parameter construction failures. Every variant names all offending keys.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParameterError {
    #[error("parameters have no usable value: {}", .0.join(","))]
    Unset(Vec<String>),
    #[error("missing values for required parameters {}", .0.join(","))]
    MissingRequired(Vec<String>),
    #[error("unknown template parameters {}", .0.join(","))]
    UnknownKeys(Vec<String>),
    #[error("null template parameters {}", .0.join(","))]
    NullOverride(Vec<String>),
}

impl ParameterError {
    pub fn keys(&self) -> &[String] {
        match self {
            Self::Unset(keys)
            | Self::MissingRequired(keys)
            | Self::UnknownKeys(keys)
            | Self::NullOverride(keys) => keys,
        }
    }
}

/// Update-time overrides keyed by template parameter name.
///
/// A `None` value records an explicit null, which the engine cannot accept.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParameterOverrides(BTreeMap<String, Option<String>>);

impl ParameterOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) -> &mut Self {
        self.0.insert(key.into(), Some(value.into()));
        self
    }

    /// Records `value` only when present.
    pub fn set_if_present<K: Into<String>>(&mut self, key: K, value: Option<String>) -> &mut Self {
        if let Some(value) = value {
            self.0.insert(key.into(), Some(value));
        }
        self
    }

    pub fn set_null<K: Into<String>>(&mut self, key: K) -> &mut Self {
        self.0.insert(key.into(), None);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Shared create/update behavior for a template parameter family.
pub trait StackParameters {
    /// Keys that must hold a non-blank value when the stack is first created.
    const REQUIRED_FOR_CREATE: &'static [&'static str];

    /// Every declared parameter in emission order.
    fn slots(&self) -> Vec<(&'static str, &ParameterSlot)>;

    fn slot_mut(&mut self, key: &str) -> Option<&mut ParameterSlot>;

    /// Family-specific create checks beyond the required list.
    fn extra_create_violations(&self) -> Vec<String> {
        Vec::new()
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.slots()
            .into_iter()
            .find(|(name, _)| *name == key)
            .and_then(|(_, slot)| slot.as_value())
    }

    fn set<V: Into<String>>(&mut self, key: &str, value: V) -> Result<(), ParameterError> {
        let slot = self
            .slot_mut(key)
            .ok_or_else(|| ParameterError::UnknownKeys(vec![key.to_string()]))?;
        *slot = ParameterSlot::Value(value.into());
        Ok(())
    }

    /// Renders every parameter with its current value for the first create.
    fn for_create(&self) -> Result<Vec<StackParameter>, ParameterError> {
        let mut unset = Vec::new();
        let mut parameters = Vec::new();
        for (key, slot) in self.slots() {
            match slot {
                ParameterSlot::Value(value) => parameters.push(StackParameter {
                    key,
                    value: ParameterValue::Value(value.clone()),
                }),
                ParameterSlot::Unset | ParameterSlot::KeepPrevious => unset.push(key.to_string()),
            }
        }
        let mut missing = self.extra_create_violations();
        let slots = self.slots();
        for required in Self::REQUIRED_FOR_CREATE {
            let blank = slots
                .iter()
                .find(|(key, _)| key == required)
                .is_none_or(|(_, slot)| slot.is_blank());
            if blank && !missing.iter().any(|key| key == required) {
                missing.push(required.to_string());
            }
        }

        if !unset.is_empty() {
            for key in missing {
                if !unset.contains(&key) {
                    unset.push(key);
                }
            }
            return Err(ParameterError::Unset(unset));
        }
        if !missing.is_empty() {
            return Err(ParameterError::MissingRequired(missing));
        }

        Ok(parameters)
    }

    /// Applies `overrides`, then renders overridden keys with their new value
    /// and every other key as "use previous value".
    fn for_update(
        &mut self,
        overrides: &ParameterOverrides,
    ) -> Result<Vec<StackParameter>, ParameterError> {
        let unknown: Vec<String> = overrides
            .0
            .keys()
            .filter(|key| self.slot_mut(key).is_none())
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ParameterError::UnknownKeys(unknown));
        }

        let nulls: Vec<String> = overrides
            .0
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| key.clone())
            .collect();
        if !nulls.is_empty() {
            return Err(ParameterError::NullOverride(nulls));
        }

        for (key, value) in &overrides.0 {
            if let (Some(slot), Some(value)) = (self.slot_mut(key), value) {
                *slot = ParameterSlot::Value(value.clone());
            }
        }

        let parameters = self
            .slots()
            .into_iter()
            .map(|(key, slot)| {
                let value = match slot {
                    ParameterSlot::Value(value) if overrides.contains(key) => {
                        ParameterValue::Value(value.clone())
                    }
                    _ => ParameterValue::UsePreviousValue,
                };
                StackParameter { key, value }
            })
            .collect();

        Ok(parameters)
    }
}

/// Declares a parameter family: struct, defaults, key order and lookups.
macro_rules! stack_parameters {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            required = [$($required:literal),* $(,)?];
            $( $field:ident => $key:literal = $default:expr ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        $vis struct $name {
            $( pub $field: ParameterSlot, )*
        }

        impl Default for $name {
            fn default() -> Self {
                Self {
                    $( $field: ParameterSlot::from_default($default), )*
                }
            }
        }

        impl $name {
            /// Template keys in emission order.
            pub const KEYS: &'static [&'static str] = &[$($key),*];

            /// Every parameter marked "keep previous", for update-only callers.
            pub fn keep_previous() -> Self {
                Self {
                    $( $field: ParameterSlot::KeepPrevious, )*
                }
            }
        }

        impl StackParameters for $name {
            const REQUIRED_FOR_CREATE: &'static [&'static str] = &[$($required),*];

            fn slots(&self) -> Vec<(&'static str, &ParameterSlot)> {
                vec![$( ($key, &self.$field) ),*]
            }

            fn slot_mut(&mut self, key: &str) -> Option<&mut ParameterSlot> {
                match key {
                    $( $key => Some(&mut self.$field), )*
                    _ => None,
                }
            }
        }
    };
}

stack_parameters! {
    /// Parameters of the environment-wide core stack.
    pub struct CoreStackParameters {
        required = [
            "SaaSBoostBucket", "Environment", "LambdaSourceFolder", "Tier",
            "SystemIdentityProvider", "AdminUsername", "AdminEmailAddress",
            "PublicApiStage", "PrivateApiStage", "Version", "CreateMacroResources",
        ];
        artifact_bucket => "SaaSBoostBucket" = Some(""),
        lambda_source_folder => "LambdaSourceFolder" = Some("lambdas"),
        environment => "Environment" = Some(""),
        tier => "Tier" = Some("default"),
        system_identity_provider => "SystemIdentityProvider" = Some("COGNITO"),
        system_identity_provider_domain => "SystemIdentityProviderDomain" = Some(""),
        system_identity_provider_hosted_zone => "SystemIdentityProviderHostedZone" = Some(""),
        system_identity_provider_certificate => "SystemIdentityProviderCertificate" = Some(""),
        admin_web_app_domain => "AdminWebAppDomain" = Some(""),
        admin_web_app_hosted_zone => "AdminWebAppHostedZone" = Some(""),
        admin_web_app_certificate => "AdminWebAppCertificate" = Some(""),
        admin_username => "AdminUsername" = Some("admin"),
        admin_email_address => "AdminEmailAddress" = Some(""),
        public_api_stage => "PublicApiStage" = Some("v1"),
        private_api_stage => "PrivateApiStage" = Some("v1"),
        version => "Version" = Some(""),
        application_services => "ApplicationServices" = Some(""),
        app_extensions => "AppExtensions" = Some(""),
        create_macro_resources => "CreateMacroResources" = Some("false"),
    }
}

stack_parameters! {
    /// Parameters of the per-tenant base stack (network, DNS, compute sizing).
    pub struct TenantStackParameters {
        required = ["Environment", "TenantId", "CidrPrefix", "Tier"];
        environment => "Environment" = None,
        artifact_bucket => "ArtifactBucket" = Some(""),
        lambda_source_folder => "LambdaSourceFolder" = Some("lambdas"),
        domain_name => "DomainName" = Some(""),
        hosted_zone_id => "HostedZoneId" = Some(""),
        ssl_certificate_arn => "SSLCertificateArn" = Some(""),
        tenant_id => "TenantId" = None,
        tenant_subdomain => "TenantSubDomain" = Some(""),
        cidr_prefix => "CidrPrefix" = None,
        tier => "Tier" = Some("default"),
        billing_plan => "BillingPlan" = Some(""),
        task_memory => "TaskMemory" = Some("1024"),
        task_cpu => "TaskCPU" = Some("512"),
        min_task_count => "MinTaskCount" = Some("1"),
        max_task_count => "MaxTaskCount" = Some("1"),
        use_efs => "UseEFS" = Some("false"),
        encrypt_efs => "EncryptEFS" = Some("true"),
        efs_lifecycle_policy => "EFSLifecyclePolicy" = Some("NEVER"),
        use_rds => "UseRDS" = Some("false"),
        rds_instance_class => "RDSInstanceClass" = Some(""),
        rds_engine => "RDSEngine" = Some(""),
        rds_engine_version => "RDSEngineVersion" = Some(""),
        event_bus => "EventBus" = Some(""),
    }
}

/// Parameters of a per-tenant application service stack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppStackParameters {
    pub environment: ParameterSlot,
    pub tenant_id: ParameterSlot,
    pub tier: ParameterSlot,
    pub service_name: ParameterSlot,
    pub service_resource_name: ParameterSlot,
    pub container_repository: ParameterSlot,
    pub container_repository_tag: ParameterSlot,
    pub ecs_cluster: ParameterSlot,
    pub enable_ecs_exec: ParameterSlot,
    pub publicly_addressable: ParameterSlot,
    pub public_path_route: ParameterSlot,
    pub public_path_rule_priority: ParameterSlot,
    pub vpc: ParameterSlot,
    pub subnet_private_a: ParameterSlot,
    pub subnet_private_b: ParameterSlot,
    pub private_route_table: ParameterSlot,
    pub service_discovery_namespace: ParameterSlot,
    pub http_listener: ParameterSlot,
    pub https_listener: ParameterSlot,
    pub ecs_security_group: ParameterSlot,
    pub container_os: ParameterSlot,
    pub cluster_instance_type: ParameterSlot,
    pub task_launch_type: ParameterSlot,
    pub task_memory: ParameterSlot,
    pub task_cpu: ParameterSlot,
    pub min_task_count: ParameterSlot,
    pub max_task_count: ParameterSlot,
    pub container_port: ParameterSlot,
    pub container_health_check_path: ParameterSlot,
    pub use_rds: ParameterSlot,
    pub rds_instance_class: ParameterSlot,
    pub rds_engine: ParameterSlot,
    pub rds_engine_version: ParameterSlot,
    pub rds_parameter_group_family: ParameterSlot,
    pub rds_username: ParameterSlot,
    pub rds_password_param: ParameterSlot,
    pub rds_port: ParameterSlot,
    pub rds_database: ParameterSlot,
    pub rds_bootstrap: ParameterSlot,
    pub metrics_stream: ParameterSlot,
    pub event_bus: ParameterSlot,
    pub file_system_mount_point: ParameterSlot,
    pub use_efs: ParameterSlot,
    pub encrypt_efs: ParameterSlot,
    pub efs_lifecycle_policy: ParameterSlot,
    pub use_fsx: ParameterSlot,
    pub fsx_file_system_type: ParameterSlot,
    pub file_system_storage: ParameterSlot,
    pub file_system_throughput: ParameterSlot,
    pub fsx_backup_retention: ParameterSlot,
    pub disable: ParameterSlot,
}

const APP_HTTP_LISTENER: &str = "ECSLoadBalancerHttpListener";
const APP_HTTPS_LISTENER: &str = "ECSLoadBalancerHttpsListener";

impl Default for AppStackParameters {
    fn default() -> Self {
        let empty = || ParameterSlot::value("");
        Self {
            environment: empty(),
            tenant_id: empty(),
            tier: empty(),
            service_name: empty(),
            service_resource_name: empty(),
            container_repository: empty(),
            container_repository_tag: ParameterSlot::value("latest"),
            ecs_cluster: empty(),
            enable_ecs_exec: ParameterSlot::value("false"),
            publicly_addressable: ParameterSlot::value("true"),
            public_path_route: ParameterSlot::value("/*"),
            public_path_rule_priority: ParameterSlot::value("1"),
            vpc: empty(),
            subnet_private_a: empty(),
            subnet_private_b: empty(),
            private_route_table: empty(),
            service_discovery_namespace: empty(),
            http_listener: empty(),
            https_listener: empty(),
            ecs_security_group: empty(),
            container_os: empty(),
            cluster_instance_type: empty(),
            task_launch_type: empty(),
            task_memory: ParameterSlot::value("1024"),
            task_cpu: ParameterSlot::value("512"),
            min_task_count: ParameterSlot::value("1"),
            max_task_count: ParameterSlot::value("1"),
            container_port: ParameterSlot::value("0"),
            container_health_check_path: empty(),
            use_rds: ParameterSlot::value("false"),
            rds_instance_class: empty(),
            rds_engine: empty(),
            rds_engine_version: empty(),
            rds_parameter_group_family: empty(),
            rds_username: empty(),
            rds_password_param: empty(),
            rds_port: empty(),
            rds_database: empty(),
            rds_bootstrap: empty(),
            metrics_stream: empty(),
            event_bus: empty(),
            file_system_mount_point: empty(),
            use_efs: ParameterSlot::value("false"),
            encrypt_efs: ParameterSlot::value("true"),
            efs_lifecycle_policy: ParameterSlot::value("NEVER"),
            use_fsx: ParameterSlot::value("false"),
            fsx_file_system_type: ParameterSlot::value("FSX_WINDOWS"),
            file_system_storage: ParameterSlot::value("0"),
            file_system_throughput: ParameterSlot::value("0"),
            fsx_backup_retention: ParameterSlot::value("0"),
            disable: ParameterSlot::value("false"),
        }
    }
}

impl StackParameters for AppStackParameters {
    const REQUIRED_FOR_CREATE: &'static [&'static str] = &[
        "Environment",
        "TenantId",
        "Tier",
        "VPC",
        "SubnetPrivateA",
        "SubnetPrivateB",
        "ECSCluster",
        "ECSSecurityGroup",
        "ContainerRepository",
        "ContainerRepositoryTag",
    ];

    fn slots(&self) -> Vec<(&'static str, &ParameterSlot)> {
        vec![
            ("Environment", &self.environment),
            ("TenantId", &self.tenant_id),
            ("Tier", &self.tier),
            ("ServiceName", &self.service_name),
            ("ServiceResourceName", &self.service_resource_name),
            ("ContainerRepository", &self.container_repository),
            ("ContainerRepositoryTag", &self.container_repository_tag),
            ("ECSCluster", &self.ecs_cluster),
            ("EnableECSExec", &self.enable_ecs_exec),
            ("PubliclyAddressable", &self.publicly_addressable),
            ("PublicPathRoute", &self.public_path_route),
            ("PublicPathRulePriority", &self.public_path_rule_priority),
            ("VPC", &self.vpc),
            ("SubnetPrivateA", &self.subnet_private_a),
            ("SubnetPrivateB", &self.subnet_private_b),
            ("PrivateRouteTable", &self.private_route_table),
            ("ServiceDiscoveryNamespace", &self.service_discovery_namespace),
            (APP_HTTP_LISTENER, &self.http_listener),
            (APP_HTTPS_LISTENER, &self.https_listener),
            ("ECSSecurityGroup", &self.ecs_security_group),
            ("ContainerOS", &self.container_os),
            ("ClusterInstanceType", &self.cluster_instance_type),
            ("TaskLaunchType", &self.task_launch_type),
            ("TaskMemory", &self.task_memory),
            ("TaskCPU", &self.task_cpu),
            ("MinTaskCount", &self.min_task_count),
            ("MaxTaskCount", &self.max_task_count),
            ("ContainerPort", &self.container_port),
            ("ContainerHealthCheckPath", &self.container_health_check_path),
            ("UseRDS", &self.use_rds),
            ("RDSInstanceClass", &self.rds_instance_class),
            ("RDSEngine", &self.rds_engine),
            ("RDSEngineVersion", &self.rds_engine_version),
            ("RDSParameterGroupFamily", &self.rds_parameter_group_family),
            ("RDSUsername", &self.rds_username),
            ("RDSPasswordParam", &self.rds_password_param),
            ("RDSPort", &self.rds_port),
            ("RDSDatabase", &self.rds_database),
            ("RDSBootstrap", &self.rds_bootstrap),
            ("MetricsStream", &self.metrics_stream),
            ("EventBus", &self.event_bus),
            ("FileSystemMountPoint", &self.file_system_mount_point),
            ("UseEFS", &self.use_efs),
            ("EncryptEFS", &self.encrypt_efs),
            ("EFSLifecyclePolicy", &self.efs_lifecycle_policy),
            ("UseFSx", &self.use_fsx),
            ("FSxFileSystemType", &self.fsx_file_system_type),
            ("FileSystemStorage", &self.file_system_storage),
            ("FileSystemThroughput", &self.file_system_throughput),
            ("FSxBackupRetention", &self.fsx_backup_retention),
            ("Disable", &self.disable),
        ]
    }

    fn slot_mut(&mut self, key: &str) -> Option<&mut ParameterSlot> {
        let slot = match key {
            "Environment" => &mut self.environment,
            "TenantId" => &mut self.tenant_id,
            "Tier" => &mut self.tier,
            "ServiceName" => &mut self.service_name,
            "ServiceResourceName" => &mut self.service_resource_name,
            "ContainerRepository" => &mut self.container_repository,
            "ContainerRepositoryTag" => &mut self.container_repository_tag,
            "ECSCluster" => &mut self.ecs_cluster,
            "EnableECSExec" => &mut self.enable_ecs_exec,
            "PubliclyAddressable" => &mut self.publicly_addressable,
            "PublicPathRoute" => &mut self.public_path_route,
            "PublicPathRulePriority" => &mut self.public_path_rule_priority,
            "VPC" => &mut self.vpc,
            "SubnetPrivateA" => &mut self.subnet_private_a,
            "SubnetPrivateB" => &mut self.subnet_private_b,
            "PrivateRouteTable" => &mut self.private_route_table,
            "ServiceDiscoveryNamespace" => &mut self.service_discovery_namespace,
            APP_HTTP_LISTENER => &mut self.http_listener,
            APP_HTTPS_LISTENER => &mut self.https_listener,
            "ECSSecurityGroup" => &mut self.ecs_security_group,
            "ContainerOS" => &mut self.container_os,
            "ClusterInstanceType" => &mut self.cluster_instance_type,
            "TaskLaunchType" => &mut self.task_launch_type,
            "TaskMemory" => &mut self.task_memory,
            "TaskCPU" => &mut self.task_cpu,
            "MinTaskCount" => &mut self.min_task_count,
            "MaxTaskCount" => &mut self.max_task_count,
            "ContainerPort" => &mut self.container_port,
            "ContainerHealthCheckPath" => &mut self.container_health_check_path,
            "UseRDS" => &mut self.use_rds,
            "RDSInstanceClass" => &mut self.rds_instance_class,
            "RDSEngine" => &mut self.rds_engine,
            "RDSEngineVersion" => &mut self.rds_engine_version,
            "RDSParameterGroupFamily" => &mut self.rds_parameter_group_family,
            "RDSUsername" => &mut self.rds_username,
            "RDSPasswordParam" => &mut self.rds_password_param,
            "RDSPort" => &mut self.rds_port,
            "RDSDatabase" => &mut self.rds_database,
            "RDSBootstrap" => &mut self.rds_bootstrap,
            "MetricsStream" => &mut self.metrics_stream,
            "EventBus" => &mut self.event_bus,
            "FileSystemMountPoint" => &mut self.file_system_mount_point,
            "UseEFS" => &mut self.use_efs,
            "EncryptEFS" => &mut self.encrypt_efs,
            "EFSLifecyclePolicy" => &mut self.efs_lifecycle_policy,
            "UseFSx" => &mut self.use_fsx,
            "FSxFileSystemType" => &mut self.fsx_file_system_type,
            "FileSystemStorage" => &mut self.file_system_storage,
            "FileSystemThroughput" => &mut self.file_system_throughput,
            "FSxBackupRetention" => &mut self.fsx_backup_retention,
            "Disable" => &mut self.disable,
            _ => return None,
        };
        Some(slot)
    }

    // Services need at least one load balancer listener to attach to.
    fn extra_create_violations(&self) -> Vec<String> {
        if self.http_listener.is_blank() && self.https_listener.is_blank() {
            vec![APP_HTTP_LISTENER.to_string(), APP_HTTPS_LISTENER.to_string()]
        } else {
            Vec::new()
        }
    }
}
