//! Provisioning engine client
//!
//! The `ProvisioningEngine` trait is the seam between the orchestrator and the
//! external infrastructure-provisioning engine. `HttpProvisioningEngine` speaks
//! the engine's JSON API over reqwest.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::stack::params::StackParameter;

/// Capabilities every tenant stack is created and updated with.
pub const STACK_CAPABILITIES: &[&str] = &["CAPABILITY_NAMED_IAM", "CAPABILITY_AUTO_EXPAND"];

const NO_UPDATES_MARKER: &str = "No updates are to be performed";
const MISSING_STACK_MARKER: &str = "does not exist";

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("stack {0} does not exist")]
    StackNotFound(String),
    #[error("engine rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("engine unreachable: {0}")]
    Transport(String),
    #[error("invalid engine response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for EngineError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::Decode(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Stack creation request.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CreateStackRequest {
    pub stack_name: String,
    #[serde(rename = "TemplateURL")]
    pub template_url: String,
    pub parameters: Vec<StackParameter>,
    pub disable_rollback: bool,
    pub capabilities: Vec<String>,
    #[serde(rename = "NotificationARNs", skip_serializing_if = "Vec::is_empty")]
    pub notification_arns: Vec<String>,
}

/// Stack update request. `stack_name` accepts a stack id as well. Without a
/// `template_url` the engine reuses the stack's current template.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateStackRequest {
    pub stack_name: String,
    #[serde(rename = "TemplateURL", skip_serializing_if = "Option::is_none")]
    pub template_url: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub use_previous_template: bool,
    pub parameters: Vec<StackParameter>,
    pub capabilities: Vec<String>,
}

impl UpdateStackRequest {
    /// An update that keeps the stack's current template.
    pub fn with_previous_template(stack_name: impl Into<String>, parameters: Vec<StackParameter>) -> Self {
        Self {
            stack_name: stack_name.into(),
            template_url: None,
            use_previous_template: true,
            parameters,
            capabilities: STACK_CAPABILITIES.iter().map(|c| c.to_string()).collect(),
        }
    }
}

/// Outcome of an update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackUpdate {
    Updated { stack_id: String },
    /// The engine found nothing to change.
    NoChanges,
}

#[async_trait]
pub trait ProvisioningEngine: Send + Sync {
    /// Starts stack creation and returns the new stack id.
    async fn create_stack(&self, request: CreateStackRequest) -> Result<String, EngineError>;

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackUpdate, EngineError>;

    /// Starts stack deletion. A missing stack yields `EngineError::StackNotFound`.
    async fn delete_stack(&self, stack: &str) -> Result<(), EngineError>;

    /// Returns the engine's native status string for `stack`.
    async fn describe_stack_status(&self, stack: &str) -> Result<String, EngineError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StackIdResponse {
    stack_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeStackResponse {
    stack_status: String,
}

#[derive(Debug, Default, Deserialize)]
struct EngineErrorBody {
    #[serde(default)]
    message: String,
}

/// `ProvisioningEngine` over the engine's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpProvisioningEngine {
    client: Client,
    base_url: Url,
}

impl HttpProvisioningEngine {
    pub fn new(client: Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    fn stacks_url(&self, stack: Option<&str>) -> Result<Url, EngineError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                EngineError::Transport(format!("engine URL {} cannot be a base", self.base_url))
            })?;
            segments.pop_if_empty().push("stacks");
            if let Some(stack) = stack {
                segments.push(stack);
            }
        }
        Ok(url)
    }

    async fn error_message(response: Response) -> (StatusCode, String) {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<EngineErrorBody>(&body)
            .map(|parsed| parsed.message)
            .ok()
            .filter(|message| !message.is_empty())
            .unwrap_or(body);
        (status, message)
    }

    fn rejected(status: StatusCode, message: String) -> EngineError {
        EngineError::Rejected {
            status: status.as_u16(),
            message,
        }
    }

    fn is_missing_stack(status: StatusCode, message: &str) -> bool {
        status == StatusCode::NOT_FOUND || message.contains(MISSING_STACK_MARKER)
    }
}

#[async_trait]
impl ProvisioningEngine for HttpProvisioningEngine {
    async fn create_stack(&self, request: CreateStackRequest) -> Result<String, EngineError> {
        let url = self.stacks_url(None)?;
        tracing::debug!(stack_name = %request.stack_name, "Creating stack");

        let response = self.client.post(url).json(&request).send().await?;
        if !response.status().is_success() {
            let (status, message) = Self::error_message(response).await;
            return Err(Self::rejected(status, message));
        }

        let created: StackIdResponse = response.json().await?;
        Ok(created.stack_id)
    }

    async fn update_stack(&self, request: UpdateStackRequest) -> Result<StackUpdate, EngineError> {
        let url = self.stacks_url(Some(&request.stack_name))?;
        tracing::debug!(stack = %request.stack_name, "Updating stack");

        let response = self.client.put(url).json(&request).send().await?;
        if !response.status().is_success() {
            let (status, message) = Self::error_message(response).await;
            if message.contains(NO_UPDATES_MARKER) {
                return Ok(StackUpdate::NoChanges);
            }
            if Self::is_missing_stack(status, &message) {
                return Err(EngineError::StackNotFound(request.stack_name));
            }
            return Err(Self::rejected(status, message));
        }

        let updated: StackIdResponse = response.json().await?;
        Ok(StackUpdate::Updated {
            stack_id: updated.stack_id,
        })
    }

    async fn delete_stack(&self, stack: &str) -> Result<(), EngineError> {
        let url = self.stacks_url(Some(stack))?;
        tracing::debug!(stack, "Deleting stack");

        let response = self.client.delete(url).send().await?;
        if response.status().is_success() {
            return Ok(());
        }

        let (status, message) = Self::error_message(response).await;
        if Self::is_missing_stack(status, &message) {
            Err(EngineError::StackNotFound(stack.to_string()))
        } else {
            Err(Self::rejected(status, message))
        }
    }

    async fn describe_stack_status(&self, stack: &str) -> Result<String, EngineError> {
        let url = self.stacks_url(Some(stack))?;

        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            let (status, message) = Self::error_message(response).await;
            if Self::is_missing_stack(status, &message) {
                return Err(EngineError::StackNotFound(stack.to_string()));
            }
            return Err(Self::rejected(status, message));
        }

        let described: DescribeStackResponse = response.json().await?;
        Ok(described.stack_status)
    }
}

/// Console link for a stack ARN (`arn:partition:service:region:account:stack/...`).
pub fn stack_console_url(stack_arn: &str) -> Option<String> {
    let fields: Vec<&str> = stack_arn.split(':').collect();
    if fields.len() <= 4 || fields[3].is_empty() {
        return None;
    }
    let region = fields[3];
    Some(format!(
        "https://{region}.console.aws.amazon.com/cloudformation/home?region={region}\
         #/stacks/stackinfo?filteringText=&filteringStatus=active&viewNested=true\
         &hideStacks=false&stackId={stack_arn}"
    ))
}

/// Deterministic stack name for a tenant's base stack.
pub fn tenant_stack_name(environment: &str, tenant_id: &uuid::Uuid) -> String {
    let short_id = &tenant_id.simple().to_string()[..8];
    format!("{environment}-tenant-{short_id}")
}
