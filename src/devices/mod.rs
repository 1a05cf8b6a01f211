//! Device subsystem boundary
//!
//! The device subsystem owns reservation state. This module only knows how to
//! ask it to reserve, release, or run an operation, and how to classify the
//! answer.

pub mod http;
pub mod simulated;

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

#[cfg(any(test, feature = "testing"))]
use mockall::automock;

pub use http::{DeviceTimeouts, HttpDeviceClient};
pub use simulated::{DeviceAvailability, DeviceSnapshot, SimulatedDevices};

/// The three calls the orchestration core makes against a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceOperation {
    Reserve,
    Release,
    Execute,
}

impl DeviceOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceOperation::Reserve => "reserve",
            DeviceOperation::Release => "release",
            DeviceOperation::Execute => "execute",
        }
    }
}

impl fmt::Display for DeviceOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone)]
pub enum DeviceCallError {
    /// Device is not available for reservation
    #[error("Device {device_id} is not available: {body}")]
    Conflict { device_id: String, body: Value },

    /// Device is held by a different workflow
    #[error("Device {device_id} is held by another workflow: {body}")]
    Forbidden { device_id: String, body: Value },

    #[error("Device service returned HTTP {status} for {operation}: {body}")]
    Remote {
        operation: DeviceOperation,
        status: u16,
        body: Value,
    },

    #[error("Device service unreachable during {operation}: {cause}")]
    Unreachable {
        operation: DeviceOperation,
        cause: String,
    },
}

/// Reservation protocol against the device subsystem.
///
/// Implementations must be authoritative about exclusivity: a successful
/// `reserve` means no other workflow holds the device until it is released.
#[cfg_attr(any(test, feature = "testing"), automock)]
#[async_trait]
pub trait DeviceReservations: Send + Sync {
    async fn reserve(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError>;

    async fn release(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError>;

    async fn execute(
        &self,
        device_id: &str,
        workflow_id: &str,
        operation: &Value,
    ) -> Result<Value, DeviceCallError>;
}
