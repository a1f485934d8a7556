use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::authority::Operation;
use crate::domain::actor::ActorId;
use crate::domain::EntityRef;

/// External collaborator whose failure rolled back an operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dependency {
    Store,
    Ledger,
    CampaignDirectory,
}

impl Dependency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Store => "store",
            Self::Ledger => "ledger",
            Self::CampaignDirectory => "campaign_directory",
        }
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("actor `{actor}` may not {operation}: {reason}")]
    PermissionDenied {
        actor: ActorId,
        operation: Operation,
        entity: Option<EntityRef>,
        reason: String,
    },
    #[error("{entity} is `{current}`; this transition requires one of {required:?}")]
    InvalidTransition { entity: EntityRef, current: String, required: Vec<String> },
    #[error("{slot} already has an open refund request")]
    ConflictingRefundRequest { slot: EntityRef, open_refund: Option<String> },
    #[error("invalid `{field}`: {message}")]
    Validation { entity: Option<EntityRef>, field: String, message: String },
    #[error("{dependency} failure: {message}")]
    DependencyFailure { dependency: Dependency, message: String },
    #[error("{entity} not found")]
    NotFound { entity: EntityRef },
}

impl WorkflowError {
    pub fn validation(
        entity: Option<EntityRef>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Validation { entity, field: field.into(), message: message.into() }
    }

    pub fn dependency(dependency: Dependency, message: impl Into<String>) -> Self {
        Self::DependencyFailure { dependency, message: message.into() }
    }

    pub fn invalid_transition<S: AsRef<str>>(
        entity: EntityRef,
        current: impl Into<String>,
        required: impl IntoIterator<Item = S>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            current: current.into(),
            required: required.into_iter().map(|state| state.as_ref().to_string()).collect(),
        }
    }

    /// Stable snake_case name used in logs and API payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PermissionDenied { .. } => "permission_denied",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ConflictingRefundRequest { .. } => "conflicting_refund_request",
            Self::Validation { .. } => "validation",
            Self::DependencyFailure { .. } => "dependency_failure",
            Self::NotFound { .. } => "not_found",
        }
    }

    /// Only collaborator failures are safe to retry unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::DependencyFailure { .. })
    }

    pub fn entity(&self) -> Option<&EntityRef> {
        match self {
            Self::PermissionDenied { entity, .. } | Self::Validation { entity, .. } => {
                entity.as_ref()
            }
            Self::InvalidTransition { entity, .. } | Self::NotFound { entity } => Some(entity),
            Self::ConflictingRefundRequest { slot, .. } => Some(slot),
            Self::DependencyFailure { .. } => None,
        }
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Validation { .. } => InterfaceError::BadRequest { message, correlation_id },
            Self::PermissionDenied { .. } => InterfaceError::Forbidden { message, correlation_id },
            Self::NotFound { .. } => InterfaceError::NotFound { message, correlation_id },
            Self::InvalidTransition { .. } | Self::ConflictingRefundRequest { .. } => {
                InterfaceError::Conflict { message, correlation_id }
            }
            Self::DependencyFailure { .. } => {
                InterfaceError::ServiceUnavailable { message, correlation_id }
            }
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("forbidden: {message}")]
    Forbidden { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Forbidden { .. } => "You are not allowed to perform this action.",
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => {
                "The record changed state. Refresh it and decide again before retrying."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::BadRequest { message, .. }
            | Self::Forbidden { message, .. }
            | Self::NotFound { message, .. }
            | Self::Conflict { message, .. }
            | Self::ServiceUnavailable { message, .. }
            | Self::Internal { message, .. } => message,
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Forbidden { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}
