// Wiring from configuration to a ready-to-use state machine

use anyhow::Result;
use std::sync::Arc;
use tracing::debug;

use crate::config::{DeviceBackend, LabflowConfig, StoreBackend};
use crate::devices::{DeviceReservations, HttpDeviceClient, SimulatedDevices};
use crate::observability::DeviceCallMetrics;
use crate::store::{MemoryRecordStore, RecordStore};
use crate::workflows::{WorkflowRepository, WorkflowStateMachine};

pub struct LabflowApp {
    settings: LabflowConfig,
    machine: WorkflowStateMachine,
    simulated: Option<Arc<SimulatedDevices>>,
    device_metrics: Option<Arc<DeviceCallMetrics>>,
}

impl LabflowApp {
    pub fn from_config(settings: LabflowConfig) -> Result<Self> {
        let store = build_store(&settings)?;
        let repository = WorkflowRepository::new(Arc::clone(&store))
            .with_max_update_attempts(settings.store.max_update_attempts);

        let (devices, simulated, device_metrics) = match settings.devices.backend {
            DeviceBackend::Simulated => {
                let lab = Arc::new(
                    SimulatedDevices::with_default_lab()
                        .with_booking_store(store)
                        .with_latency(settings.devices.simulated_latency()),
                );
                let devices: Arc<dyn DeviceReservations> = Arc::clone(&lab) as _;
                (devices, Some(lab), None)
            }
            DeviceBackend::Http => {
                let client = HttpDeviceClient::new(
                    settings.devices.base_url.clone(),
                    settings.devices.timeouts(),
                );
                let metrics = client.metrics();
                let devices: Arc<dyn DeviceReservations> = Arc::new(client);
                (devices, None, Some(metrics))
            }
        };

        debug!(
            store = ?settings.store.backend,
            devices = ?settings.devices.backend,
            "labflow services assembled"
        );

        Ok(Self {
            machine: WorkflowStateMachine::new(repository, devices),
            simulated,
            device_metrics,
            settings,
        })
    }

    pub fn machine(&self) -> &WorkflowStateMachine {
        &self.machine
    }

    pub fn settings(&self) -> &LabflowConfig {
        &self.settings
    }

    /// The in-process lab, when the simulated device backend is configured
    pub fn simulated_devices(&self) -> Option<&SimulatedDevices> {
        self.simulated.as_deref()
    }

    pub fn log_device_metrics(&self) {
        if let Some(metrics) = &self.device_metrics {
            metrics.log_stats();
        }
    }
}

fn build_store(settings: &LabflowConfig) -> Result<Arc<dyn RecordStore>> {
    match settings.store.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryRecordStore::new())),
        #[cfg(feature = "redis-store")]
        StoreBackend::Redis => Ok(Arc::new(crate::store::RedisRecordStore::new(
            &settings.store.redis_url,
            settings.store.key_prefix.clone(),
        )?)),
        #[cfg(not(feature = "redis-store"))]
        StoreBackend::Redis => {
            anyhow::bail!("labflow was built without the redis-store feature")
        }
    }
}
