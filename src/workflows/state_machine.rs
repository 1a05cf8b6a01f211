// Workflow lifecycle commands
// Status only moves after the device has answered; the persisted write
// re-checks the transition so a concurrent writer can never be overwritten.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn, Instrument};
use uuid::Uuid;

use super::errors::WorkflowError;
use super::executor::StepExecutor;
use super::repository::WorkflowRepository;
use super::types::{LifecycleEvent, NewWorkflow, StepOutcome, Workflow, WorkflowStatus};
use crate::devices::DeviceReservations;
use crate::telemetry::{create_command_span, generate_correlation_id};

type CommandLocks = Mutex<HashMap<String, Arc<AsyncMutex<()>>>>;

pub struct WorkflowStateMachine {
    repository: WorkflowRepository,
    devices: Arc<dyn DeviceReservations>,
    executor: StepExecutor,
    locks: CommandLocks,
}

impl WorkflowStateMachine {
    pub fn new(repository: WorkflowRepository, devices: Arc<dyn DeviceReservations>) -> Self {
        let executor = StepExecutor::new(Arc::clone(&devices));
        Self {
            repository,
            devices,
            executor,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn repository(&self) -> &WorkflowRepository {
        &self.repository
    }

    pub async fn list(&self) -> Result<Vec<Workflow>, WorkflowError> {
        self.repository.list().await
    }

    pub async fn get(&self, id: &str) -> Result<Workflow, WorkflowError> {
        self.repository.get(id).await
    }

    pub async fn create(&self, request: NewWorkflow) -> Result<Workflow, WorkflowError> {
        let span = create_command_span("create", None, &generate_correlation_id());
        async move {
            if request.name.trim().is_empty() {
                return Err(WorkflowError::Validation {
                    reason: "name is required".to_string(),
                });
            }
            if request.device_id.trim().is_empty() {
                return Err(WorkflowError::Validation {
                    reason: "device_id is required".to_string(),
                });
            }

            let workflow = Workflow {
                id: Uuid::new_v4().to_string(),
                name: request.name,
                device_id: request.device_id,
                sample_barcodes: request.sample_barcodes,
                steps: request.steps,
                status: WorkflowStatus::Created,
                created_at: Utc::now(),
                started_at: None,
                completed_at: None,
            };
            let workflow = self.repository.create(workflow).await?;
            info!(
                workflow_id = %workflow.id,
                device_id = %workflow.device_id,
                steps = workflow.steps.len(),
                "Workflow created"
            );
            Ok(workflow)
        }
        .instrument(span)
        .await
    }

    /// Reserve the workflow's device and move it to `Running`.
    ///
    /// A refused reservation leaves the workflow `Created`, so it can be retried.
    /// If the record moved on while the reservation was in flight, the caller
    /// gets `InvalidTransition` instead of the device's answer.
    pub async fn start(&self, id: &str) -> Result<Workflow, WorkflowError> {
        let span = create_command_span("start", Some(id), &generate_correlation_id());
        self.serialized(id, async {
            let workflow = self.repository.get(id).await?;
            ensure_transition(&workflow, LifecycleEvent::Start)?;

            if let Err(e) = self.devices.reserve(&workflow.device_id, id).await {
                // Another process may have started this workflow meanwhile
                let latest = self.repository.get(id).await?;
                ensure_transition(&latest, LifecycleEvent::Start)?;
                warn!(
                    workflow_id = id,
                    device_id = %workflow.device_id,
                    error = %e,
                    "Device reservation refused, workflow stays created"
                );
                return Err(e.into());
            }

            let started = match self
                .repository
                .update(id, |stored| {
                    stored.status = next_status(stored, LifecycleEvent::Start)?;
                    stored.started_at = Some(Utc::now());
                    Ok(())
                })
                .await
            {
                Ok(started) => started,
                Err(e) => {
                    self.return_reservation(&workflow, &e).await;
                    return Err(e);
                }
            };

            info!(
                workflow_id = id,
                device_id = %started.device_id,
                status = %started.status,
                "Workflow started"
            );
            Ok(started)
        })
        .instrument(span)
        .await
    }

    /// Run the step at `step_index` on the reserved device. Status is untouched.
    pub async fn execute_step(
        &self,
        id: &str,
        step_index: usize,
    ) -> Result<StepOutcome, WorkflowError> {
        let span = create_command_span("execute_step", Some(id), &generate_correlation_id());
        self.serialized(id, async {
            let workflow = self.repository.get(id).await?;
            self.executor.execute_step(&workflow, step_index).await
        })
        .instrument(span)
        .await
    }

    /// Release the device and move the workflow to `Completed`.
    ///
    /// When the release fails the workflow stays `Running` with the device
    /// still reserved; the error goes back to the caller and nothing is retried.
    pub async fn complete(&self, id: &str) -> Result<Workflow, WorkflowError> {
        let span = create_command_span("complete", Some(id), &generate_correlation_id());
        self.serialized(id, async {
            let workflow = self.repository.get(id).await?;
            ensure_transition(&workflow, LifecycleEvent::Complete)?;

            if let Err(e) = self.devices.release(&workflow.device_id, id).await {
                warn!(
                    workflow_id = id,
                    device_id = %workflow.device_id,
                    error = %e,
                    "Device release failed, workflow left running with device reserved; needs manual intervention"
                );
                return Err(e.into());
            }

            let completed = self
                .repository
                .update(id, |stored| {
                    stored.status = next_status(stored, LifecycleEvent::Complete)?;
                    stored.completed_at = Some(Utc::now());
                    Ok(())
                })
                .await?;

            info!(
                workflow_id = id,
                device_id = %completed.device_id,
                status = %completed.status,
                "Workflow completed"
            );
            Ok(completed)
        })
        .instrument(span)
        .await
    }

    /// Give back a reservation whose workflow could not be moved to `Running`
    async fn return_reservation(&self, workflow: &Workflow, cause: &WorkflowError) {
        warn!(
            workflow_id = %workflow.id,
            device_id = %workflow.device_id,
            error = %cause,
            "Workflow not started after its device was booked, releasing the device"
        );
        if let Err(e) = self.devices.release(&workflow.device_id, &workflow.id).await {
            warn!(
                workflow_id = %workflow.id,
                device_id = %workflow.device_id,
                error = %e,
                "Device left booked by a workflow that is not running; needs manual intervention"
            );
        }
    }

    /// Run `command` while holding the lock for workflow `id`
    async fn serialized<T, F>(&self, id: &str, command: F) -> Result<T, WorkflowError>
    where
        F: std::future::Future<Output = Result<T, WorkflowError>>,
    {
        let slot = self.command_slot(id)?;
        let _guard = slot.lock.lock().await;
        command.await
    }

    fn command_slot<'a>(&'a self, id: &'a str) -> Result<CommandSlot<'a>, WorkflowError> {
        let mut locks = self.locks.lock().map_err(poisoned)?;
        let lock = Arc::clone(locks.entry(id.to_string()).or_default());
        Ok(CommandSlot {
            locks: &self.locks,
            id,
            lock,
        })
    }
}

/// A claim on one workflow's command lock.
///
/// Dropping it removes the map entry once nobody else holds or waits on the
/// lock, including when the command future is cancelled mid-await.
struct CommandSlot<'a> {
    locks: &'a CommandLocks,
    id: &'a str,
    lock: Arc<AsyncMutex<()>>,
}

impl Drop for CommandSlot<'_> {
    fn drop(&mut self) {
        // Clones only happen under the map lock, so a count of two (map and
        // this slot) means nobody else is waiting on this workflow.
        if let Ok(mut locks) = self.locks.lock() {
            if Arc::strong_count(&self.lock) == 2 {
                locks.remove(self.id);
            }
        }
    }
}

fn poisoned<E: std::fmt::Display>(err: E) -> WorkflowError {
    WorkflowError::Store(crate::store::StoreError::Internal(format!(
        "command lock poisoned: {err}"
    )))
}

fn ensure_transition(workflow: &Workflow, event: LifecycleEvent) -> Result<(), WorkflowError> {
    next_status(workflow, event).map(|_| ())
}

fn next_status(workflow: &Workflow, event: LifecycleEvent) -> Result<WorkflowStatus, WorkflowError> {
    workflow
        .status
        .on(event)
        .ok_or_else(|| WorkflowError::InvalidTransition {
            id: workflow.id.clone(),
            status: workflow.status,
            event,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::devices::{DeviceCallError, DeviceOperation, MockDeviceReservations, SimulatedDevices};
    use crate::store::{MemoryRecordStore, RecordStore, StoreError, SwapOutcome};
    use async_trait::async_trait;
    use serde_json::json;
    use std::time::Duration;

    /// Accepts new records but refuses every later write
    #[derive(Default)]
    struct WriteOnceStore {
        inner: MemoryRecordStore,
    }

    #[async_trait]
    impl RecordStore for WriteOnceStore {
        async fn get(&self, collection: &str, id: &str) -> Result<Option<String>, StoreError> {
            self.inner.get(collection, id).await
        }

        async fn list(&self, collection: &str) -> Result<Vec<String>, StoreError> {
            self.inner.list(collection).await
        }

        async fn insert(&self, collection: &str, id: &str, value: String) -> Result<bool, StoreError> {
            self.inner.insert(collection, id, value).await
        }

        async fn compare_and_swap(
            &self,
            _collection: &str,
            _id: &str,
            _expected: &str,
            _value: String,
        ) -> Result<SwapOutcome, StoreError> {
            Err(StoreError::Connection("connection reset by peer".to_string()))
        }
    }

    fn machine(devices: MockDeviceReservations) -> WorkflowStateMachine {
        let repository = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        WorkflowStateMachine::new(repository, Arc::new(devices))
    }

    fn assay() -> NewWorkflow {
        NewWorkflow::new("Assay A", "liquid-handler-1").with_steps(["pipette", "dispense"])
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let sm = machine(MockDeviceReservations::new());

        let blank_name = sm.create(NewWorkflow::new("  ", "liquid-handler-1")).await;
        assert!(matches!(blank_name, Err(WorkflowError::Validation { .. })));

        let no_device = sm.create(NewWorkflow::new("Assay A", "")).await;
        assert!(matches!(no_device, Err(WorkflowError::Validation { .. })));

        assert!(sm.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_start_reserves_then_runs() {
        let mut devices = MockDeviceReservations::new();
        devices
            .expect_reserve()
            .times(1)
            .returning(|device, workflow| Ok(json!({"device_id": device, "workflow_id": workflow})));

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();
        assert_eq!(created.status, WorkflowStatus::Created);

        let started = sm.start(&created.id).await.unwrap();
        assert_eq!(started.status, WorkflowStatus::Running);
        assert!(started.started_at.is_some());
        assert_eq!(sm.get(&created.id).await.unwrap(), started);
    }

    #[tokio::test]
    async fn test_refused_reservation_keeps_created() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().times(1).returning(|device, _| {
            Err(DeviceCallError::Conflict {
                device_id: device.to_string(),
                body: json!({"error": "Device is not available"}),
            })
        });

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();

        let result = sm.start(&created.id).await;
        assert!(matches!(result, Err(WorkflowError::DeviceConflict { .. })));

        let stored = sm.get(&created.id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Created);
        assert!(stored.started_at.is_none());
    }

    #[tokio::test]
    async fn test_commands_out_of_order_never_call_devices() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_execute().never();
        devices.expect_release().never();

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();

        assert!(matches!(
            sm.execute_step(&created.id, 0).await,
            Err(WorkflowError::InvalidTransition { .. })
        ));
        assert!(matches!(
            sm.complete(&created.id).await,
            Err(WorkflowError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_failed_release_leaves_workflow_running() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().returning(|_, _| Ok(json!({})));
        devices.expect_release().times(1).returning(|_, _| {
            Err(DeviceCallError::Unreachable {
                operation: DeviceOperation::Release,
                cause: "timed out after 5000ms".to_string(),
            })
        });

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();
        sm.start(&created.id).await.unwrap();

        let result = sm.complete(&created.id).await;
        assert!(matches!(result, Err(WorkflowError::RemoteUnavailable { .. })));

        let stored = sm.get(&created.id).await.unwrap();
        assert_eq!(stored.status, WorkflowStatus::Running);
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_complete_twice_is_rejected() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().returning(|_, _| Ok(json!({})));
        devices.expect_release().times(1).returning(|_, _| Ok(json!({})));

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();
        sm.start(&created.id).await.unwrap();

        let completed = sm.complete(&created.id).await.unwrap();
        assert_eq!(completed.status, WorkflowStatus::Completed);
        assert!(completed.completed_at.is_some());

        assert!(matches!(
            sm.complete(&created.id).await,
            Err(WorkflowError::InvalidTransition {
                status: WorkflowStatus::Completed,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_not_found() {
        let sm = machine(MockDeviceReservations::new());
        assert!(matches!(
            sm.start("missing").await,
            Err(WorkflowError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_command_locks_are_dropped_after_use() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().returning(|_, _| Ok(json!({})));

        let sm = machine(devices);
        let created = sm.create(assay()).await.unwrap();
        sm.start(&created.id).await.unwrap();

        assert!(sm.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_booking_is_returned_when_start_cannot_be_saved() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().times(1).returning(|_, _| Ok(json!({})));
        devices
            .expect_release()
            .withf(|device, _| device == "liquid-handler-1")
            .times(1)
            .returning(|_, _| Ok(json!({})));

        let repository = WorkflowRepository::new(Arc::new(WriteOnceStore::default()));
        let sm = WorkflowStateMachine::new(repository, Arc::new(devices));
        let created = sm.create(assay()).await.unwrap();

        let result = sm.start(&created.id).await;
        assert!(matches!(
            result,
            Err(WorkflowError::Store(StoreError::Connection(_)))
        ));
        assert_eq!(sm.get(&created.id).await.unwrap().status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn test_failed_give_back_still_reports_the_store_error() {
        let mut devices = MockDeviceReservations::new();
        devices.expect_reserve().times(1).returning(|_, _| Ok(json!({})));
        devices.expect_release().times(1).returning(|_, _| {
            Err(DeviceCallError::Unreachable {
                operation: DeviceOperation::Release,
                cause: "connection refused".to_string(),
            })
        });

        let repository = WorkflowRepository::new(Arc::new(WriteOnceStore::default()));
        let sm = WorkflowStateMachine::new(repository, Arc::new(devices));
        let created = sm.create(assay()).await.unwrap();

        assert!(matches!(
            sm.start(&created.id).await,
            Err(WorkflowError::Store(_))
        ));
    }

    #[tokio::test]
    async fn test_cancelled_command_drops_its_lock() {
        let devices = SimulatedDevices::with_default_lab().with_latency(Duration::from_secs(5));
        let repository = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        let sm = WorkflowStateMachine::new(repository, Arc::new(devices));
        let created = sm.create(assay()).await.unwrap();

        let timed_out = tokio::time::timeout(Duration::from_millis(20), sm.start(&created.id)).await;
        assert!(timed_out.is_err());

        assert!(sm.locks.lock().unwrap().is_empty());
        assert_eq!(sm.get(&created.id).await.unwrap().status, WorkflowStatus::Created);
    }

    #[tokio::test]
    async fn test_lock_survives_while_another_command_waits() {
        let devices = SimulatedDevices::with_default_lab().with_latency(Duration::from_millis(50));
        let repository = WorkflowRepository::new(Arc::new(MemoryRecordStore::new()));
        let sm = WorkflowStateMachine::new(repository, Arc::new(devices));
        let created = sm.create(assay()).await.unwrap();

        let running = sm.start(&created.id);
        let waiting = tokio::time::timeout(Duration::from_millis(10), sm.start(&created.id));
        let (started, gave_up) = tokio::join!(running, waiting);

        assert!(gave_up.is_err());
        assert_eq!(started.unwrap().status, WorkflowStatus::Running);
        assert!(sm.locks.lock().unwrap().is_empty());
    }
}
