//! # Onboarding Status
//!
//! The closed set of lifecycle states an onboarding record moves through,
//! the translation tables from provisioning-engine stack statuses and
//! deployment-pipeline states, and the guard that decides whether an
//! asynchronous callback may move a record from one state to another.

use std::fmt;

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Lifecycle state of an onboarding record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
#[serde(rename_all = "lowercase")]
pub enum OnboardingStatus {
    #[sea_orm(string_value = "created")]
    #[default]
    Created,
    #[sea_orm(string_value = "validating")]
    Validating,
    #[sea_orm(string_value = "validated")]
    Validated,
    #[sea_orm(string_value = "provisioning")]
    Provisioning,
    #[sea_orm(string_value = "provisioned")]
    Provisioned,
    #[sea_orm(string_value = "updating")]
    Updating,
    #[sea_orm(string_value = "updated")]
    Updated,
    #[sea_orm(string_value = "deploying")]
    Deploying,
    #[sea_orm(string_value = "deployed")]
    Deployed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "deleting")]
    Deleting,
    #[sea_orm(string_value = "deleted")]
    Deleted,
}

impl OnboardingStatus {
    /// Maps a native provisioning-engine stack status onto a lifecycle state.
    ///
    /// Blank input has no mapping. Any non-blank status outside the known
    /// table maps to [`OnboardingStatus::Created`], which the transition guard
    /// never accepts over an existing record.
    pub fn from_stack_status(stack_status: &str) -> Option<Self> {
        let stack_status = stack_status.trim();
        if stack_status.is_empty() {
            return None;
        }

        let status = match stack_status {
            "REVIEW_IN_PROGRESS" | "CREATE_IN_PROGRESS" => Self::Provisioning,
            "UPDATE_IN_PROGRESS" => Self::Updating,
            "DELETE_IN_PROGRESS" => Self::Deleting,
            "CREATE_COMPLETE" => Self::Provisioned,
            "UPDATE_COMPLETE" => Self::Updated,
            "DELETE_COMPLETE" => Self::Deleted,
            "CREATE_FAILED"
            | "UPDATE_FAILED"
            | "DELETE_FAILED"
            | "UPDATE_ROLLBACK_FAILED"
            | "ROLLBACK_IN_PROGRESS"
            | "ROLLBACK_COMPLETE"
            | "ROLLBACK_FAILED" => Self::Failed,
            _ => Self::Created,
        };

        Some(status)
    }

    /// Maps a deployment-pipeline execution state onto a lifecycle state.
    pub fn from_pipeline_state(state: &str) -> Option<Self> {
        match state.trim() {
            "STARTED" => Some(Self::Deploying),
            "FAILED" | "CANCELED" => Some(Self::Failed),
            "SUCCEEDED" => Some(Self::Deployed),
            _ => None,
        }
    }

    /// Position in the forward lifecycle. Later phases rank higher.
    fn rank(self) -> u8 {
        match self {
            Self::Created | Self::Failed => 0,
            Self::Validating => 1,
            Self::Validated => 2,
            Self::Provisioning => 3,
            Self::Provisioned => 4,
            Self::Updating => 5,
            Self::Updated => 6,
            Self::Deploying => 7,
            Self::Deployed => 8,
            Self::Deleting => 9,
            Self::Deleted => 10,
        }
    }

    /// Terminal states reject forward progress from callbacks.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Deployed | Self::Failed | Self::Deleted)
    }

    /// Returns true when a callback carrying `incoming` may replace `self`.
    ///
    /// Duplicates and stale (earlier-phase) signals are rejected. Deletion can
    /// begin from any state short of deletion itself, and failure can be
    /// reported from any non-terminal state.
    pub fn accepts(self, incoming: Self) -> bool {
        if self == incoming || self == Self::Deleted {
            return false;
        }

        match incoming {
            Self::Deleting | Self::Deleted => incoming.rank() > self.rank(),
            _ if self.is_terminal() => false,
            Self::Failed => true,
            _ => incoming.rank() > self.rank(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Validating => "validating",
            Self::Validated => "validated",
            Self::Provisioning => "provisioning",
            Self::Provisioned => "provisioned",
            Self::Updating => "updating",
            Self::Updated => "updated",
            Self::Deploying => "deploying",
            Self::Deployed => "deployed",
            Self::Failed => "failed",
            Self::Deleting => "deleting",
            Self::Deleted => "deleted",
        }
    }
}

impl fmt::Display for OnboardingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
