use std::sync::Arc;
use tracing::{info, warn};

use super::errors::WorkflowError;
use super::types::{LifecycleEvent, StepOutcome, Workflow};
use crate::devices::DeviceReservations;

/// Dispatches a single step of a running workflow to its device.
///
/// Steps are not tracked: running the same index twice sends it twice, and
/// nothing is recorded on the workflow.
#[derive(Clone)]
pub struct StepExecutor {
    devices: Arc<dyn DeviceReservations>,
}

impl StepExecutor {
    pub fn new(devices: Arc<dyn DeviceReservations>) -> Self {
        Self { devices }
    }

    pub async fn execute_step(
        &self,
        workflow: &Workflow,
        step_index: usize,
    ) -> Result<StepOutcome, WorkflowError> {
        if workflow.status.on(LifecycleEvent::ExecuteStep).is_none() {
            return Err(WorkflowError::InvalidTransition {
                id: workflow.id.clone(),
                status: workflow.status,
                event: LifecycleEvent::ExecuteStep,
            });
        }

        let step = workflow
            .step(step_index)
            .ok_or(WorkflowError::StepIndexOutOfRange {
                index: step_index,
                len: workflow.steps.len(),
            })?;

        let result = self
            .devices
            .execute(&workflow.device_id, &workflow.id, step)
            .await
            .map_err(|e| {
                warn!(
                    workflow_id = %workflow.id,
                    device_id = %workflow.device_id,
                    step_index,
                    error = %e,
                    "Step dispatch failed"
                );
                WorkflowError::from(e)
            })?;

        info!(
            workflow_id = %workflow.id,
            device_id = %workflow.device_id,
            step_index,
            "Step executed"
        );

        Ok(StepOutcome {
            workflow_id: workflow.id.clone(),
            step_index,
            step: step.clone(),
            result,
        })
    }
}
