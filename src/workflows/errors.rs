use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use super::types::{LifecycleEvent, WorkflowStatus};
use crate::devices::DeviceCallError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("Workflow not found: {id}")]
    NotFound { id: String },

    #[error("Validation failed: {reason}")]
    Validation { reason: String },

    #[error("Invalid step index {index}: workflow has {len} steps")]
    StepIndexOutOfRange { index: usize, len: usize },

    #[error("Cannot {event} workflow {id} while it is {status}")]
    InvalidTransition {
        id: String,
        status: WorkflowStatus,
        event: LifecycleEvent,
    },

    #[error("Workflow already exists: {id}")]
    AlreadyExists { id: String },

    #[error("Device {device_id} is not available")]
    DeviceConflict { device_id: String, details: Value },

    #[error("Device {device_id} is held by another workflow")]
    DeviceForbidden { device_id: String, details: Value },

    #[error("Device service returned HTTP {status}")]
    RemoteError { status: u16, details: Value },

    #[error("Failed to communicate with device service: {cause}")]
    RemoteUnavailable { cause: String },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl From<DeviceCallError> for WorkflowError {
    fn from(err: DeviceCallError) -> Self {
        match err {
            DeviceCallError::Conflict { device_id, body } => WorkflowError::DeviceConflict {
                device_id,
                details: body,
            },
            DeviceCallError::Forbidden { device_id, body } => WorkflowError::DeviceForbidden {
                device_id,
                details: body,
            },
            DeviceCallError::Remote { status, body, .. } => WorkflowError::RemoteError {
                status,
                details: body,
            },
            DeviceCallError::Unreachable { cause, .. } => WorkflowError::RemoteUnavailable { cause },
        }
    }
}

impl From<serde_json::Error> for WorkflowError {
    fn from(err: serde_json::Error) -> Self {
        WorkflowError::Store(StoreError::Serialization(err))
    }
}

/// Wire shape of an error for front ends
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl WorkflowError {
    /// Stable machine-readable error code
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::NotFound { .. } => "not_found",
            WorkflowError::Validation { .. } => "validation_error",
            WorkflowError::StepIndexOutOfRange { .. } => "index_error",
            WorkflowError::InvalidTransition { .. } => "invalid_transition",
            WorkflowError::AlreadyExists { .. } => "already_exists",
            WorkflowError::DeviceConflict { .. } => "device_conflict",
            WorkflowError::DeviceForbidden { .. } => "device_forbidden",
            WorkflowError::RemoteError { .. } => "remote_error",
            WorkflowError::RemoteUnavailable { .. } => "remote_unavailable",
            WorkflowError::Store(_) => "store_error",
        }
    }

    /// HTTP status a front end should answer with
    pub fn http_status(&self) -> u16 {
        match self {
            WorkflowError::NotFound { .. } => 404,
            WorkflowError::Validation { .. }
            | WorkflowError::StepIndexOutOfRange { .. }
            | WorkflowError::InvalidTransition { .. } => 400,
            WorkflowError::AlreadyExists { .. } | WorkflowError::DeviceConflict { .. } => 409,
            WorkflowError::DeviceForbidden { .. } => 403,
            WorkflowError::RemoteError { status, .. } => *status,
            WorkflowError::RemoteUnavailable { .. } => 502,
            WorkflowError::Store(_) => 500,
        }
    }

    /// True when the device subsystem refused or could not be reached
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            WorkflowError::DeviceConflict { .. }
                | WorkflowError::DeviceForbidden { .. }
                | WorkflowError::RemoteError { .. }
                | WorkflowError::RemoteUnavailable { .. }
        )
    }

    pub fn to_body(&self) -> ErrorBody {
        let details = match self {
            WorkflowError::DeviceConflict { details, .. }
            | WorkflowError::DeviceForbidden { details, .. }
            | WorkflowError::RemoteError { details, .. } => Some(details.clone()),
            _ => None,
        };
        ErrorBody {
            error: self.to_string(),
            code: self.code(),
            details,
        }
    }
}
