use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{DeviceCallError, DeviceOperation, DeviceReservations};
use crate::store::{MemoryRecordStore, RecordStore, StoreError, SwapOutcome};

/// Collection holding one booking record per simulated device
pub const DEVICES_COLLECTION: &str = "devices";

const MAX_BOOKING_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceAvailability {
    Available,
    Busy,
}

/// Point-in-time view of one simulated device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub id: String,
    pub name: String,
    pub status: DeviceAvailability,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
}

/// Stored booking state of one device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
struct Booking {
    workflow_id: Option<String>,
}

/// In-process stand-in for the device service.
///
/// Bookings live in a [`RecordStore`] and every change is a compare-and-swap,
/// so two labs sharing one store (two processes on one Redis) still never
/// grant the same device twice.
pub struct SimulatedDevices {
    catalog: BTreeMap<String, String>,
    bookings: Arc<dyn RecordStore>,
    latency: Duration,
}

impl Default for SimulatedDevices {
    fn default() -> Self {
        Self {
            catalog: BTreeMap::new(),
            bookings: Arc::new(MemoryRecordStore::new()),
            latency: Duration::ZERO,
        }
    }
}

impl SimulatedDevices {
    pub fn new() -> Self {
        Self::default()
    }

    /// The three instruments of the reference lab
    pub fn with_default_lab() -> Self {
        Self::new()
            .with_device("liquid-handler-1", "Liquid Handler Alpha")
            .with_device("incubator-1", "Incubator Beta")
            .with_device("plate-reader-1", "Plate Reader Gamma")
    }

    pub fn with_device(mut self, id: &str, name: &str) -> Self {
        self.catalog.insert(id.to_string(), name.to_string());
        self
    }

    /// Keep bookings in `store` instead of a private in-memory one
    pub fn with_booking_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.bookings = store;
        self
    }

    /// Delay applied before every call, to mimic instrument round trips
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub async fn snapshot(&self) -> Result<Vec<DeviceSnapshot>, StoreError> {
        let mut devices = Vec::with_capacity(self.catalog.len());
        for (id, name) in &self.catalog {
            let holder = self.holder(id).await?;
            devices.push(DeviceSnapshot {
                id: id.clone(),
                name: name.clone(),
                status: if holder.is_some() {
                    DeviceAvailability::Busy
                } else {
                    DeviceAvailability::Available
                },
                workflow_id: holder,
            });
        }
        Ok(devices)
    }

    pub async fn holder(&self, device_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .load(device_id)
            .await?
            .and_then(|(_, booking)| booking.workflow_id))
    }

    async fn pause(&self) {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
    }

    async fn load(&self, device_id: &str) -> Result<Option<(String, Booking)>, StoreError> {
        match self.bookings.get(DEVICES_COLLECTION, device_id).await? {
            Some(raw) => {
                let booking = serde_json::from_str(&raw)?;
                Ok(Some((raw, booking)))
            }
            None => Ok(None),
        }
    }

    /// Write `next` only if the booking is still `current`. `false` on a lost race.
    async fn swap(
        &self,
        device_id: &str,
        current: Option<&str>,
        next: &Booking,
    ) -> Result<bool, StoreError> {
        let raw = serde_json::to_string(next)?;
        match current {
            None => self.bookings.insert(DEVICES_COLLECTION, device_id, raw).await,
            Some(expected) => Ok(self
                .bookings
                .compare_and_swap(DEVICES_COLLECTION, device_id, expected, raw)
                .await?
                == SwapOutcome::Swapped),
        }
    }

    /// Apply `decide` to the current booking until the swap lands.
    ///
    /// `decide` returns the booking to write, or an error to stop with.
    async fn rebook<F>(
        &self,
        device_id: &str,
        operation: DeviceOperation,
        mut decide: F,
    ) -> Result<(), DeviceCallError>
    where
        F: FnMut(&Booking) -> Result<Booking, DeviceCallError> + Send,
    {
        let unreachable = |e: StoreError| DeviceCallError::Unreachable {
            operation,
            cause: e.to_string(),
        };

        for _ in 0..MAX_BOOKING_ATTEMPTS {
            let current = self.load(device_id).await.map_err(unreachable)?;
            let (raw, booking) = match &current {
                Some((raw, booking)) => (Some(raw.as_str()), booking.clone()),
                None => (None, Booking::default()),
            };
            let next = decide(&booking)?;
            if next == booking {
                return Ok(());
            }
            if self
                .swap(device_id, raw, &next)
                .await
                .map_err(unreachable)?
            {
                return Ok(());
            }
        }

        Err(unreachable(StoreError::Contention {
            collection: DEVICES_COLLECTION.to_string(),
            id: device_id.to_string(),
            attempts: MAX_BOOKING_ATTEMPTS,
        }))
    }

    fn ensure_known(&self, device_id: &str, operation: DeviceOperation) -> Result<(), DeviceCallError> {
        if self.catalog.contains_key(device_id) {
            return Ok(());
        }
        warn!(device_id, "Device not found");
        Err(DeviceCallError::Remote {
            operation,
            status: 404,
            body: json!({"error": "Device not found"}),
        })
    }
}

#[async_trait]
impl DeviceReservations for SimulatedDevices {
    async fn reserve(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError> {
        self.pause().await;
        self.ensure_known(device_id, DeviceOperation::Reserve)?;
        self.rebook(device_id, DeviceOperation::Reserve, |booking| {
            if let Some(current) = &booking.workflow_id {
                warn!(device_id, holder = %current, "Device is not available");
                return Err(DeviceCallError::Conflict {
                    device_id: device_id.to_string(),
                    body: json!({"error": "Device is not available"}),
                });
            }
            Ok(Booking {
                workflow_id: Some(workflow_id.to_string()),
            })
        })
        .await?;

        info!(device_id, workflow_id, "Device booked");
        Ok(json!({
            "device_id": device_id,
            "status": "busy",
            "workflow_id": workflow_id,
            "booked_at": Utc::now().to_rfc3339(),
        }))
    }

    async fn release(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError> {
        self.pause().await;
        self.ensure_known(device_id, DeviceOperation::Release)?;
        self.rebook(device_id, DeviceOperation::Release, |booking| {
            if let Some(current) = &booking.workflow_id {
                if current != workflow_id {
                    warn!(device_id, holder = %current, workflow_id, "Device is booked by another workflow");
                    return Err(DeviceCallError::Forbidden {
                        device_id: device_id.to_string(),
                        body: json!({"error": "Device is booked by another workflow"}),
                    });
                }
            }
            Ok(Booking::default())
        })
        .await?;

        info!(device_id, workflow_id, "Device released");
        Ok(json!({
            "device_id": device_id,
            "status": "available",
            "released_at": Utc::now().to_rfc3339(),
        }))
    }

    async fn execute(
        &self,
        device_id: &str,
        workflow_id: &str,
        operation: &Value,
    ) -> Result<Value, DeviceCallError> {
        self.pause().await;
        self.ensure_known(device_id, DeviceOperation::Execute)?;
        let holder = self
            .holder(device_id)
            .await
            .map_err(|e| DeviceCallError::Unreachable {
                operation: DeviceOperation::Execute,
                cause: e.to_string(),
            })?;
        if holder.as_deref() != Some(workflow_id) {
            warn!(device_id, workflow_id, "Device not booked by this workflow");
            return Err(DeviceCallError::Forbidden {
                device_id: device_id.to_string(),
                body: json!({"error": "Device not booked by this workflow"}),
            });
        }

        info!(device_id, workflow_id, %operation, "Operation completed");
        Ok(json!({
            "device_id": device_id,
            "operation": operation,
            "status": "completed",
            "executed_at": Utc::now().to_rfc3339(),
        }))
    }
}
