// Core types for the workflow lifecycle

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Workflow lifecycle status.
///
/// Only `Created -> Running -> Completed` is reachable. `Paused` exists so that
/// records carrying it deserialize, but no command enters or leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Created,
    Running,
    Paused,
    Completed,
}

/// Commands that act on an existing workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    Start,
    ExecuteStep,
    Complete,
}

impl WorkflowStatus {
    /// Status after `event`, or `None` when the event is illegal here
    pub fn on(self, event: LifecycleEvent) -> Option<WorkflowStatus> {
        match self {
            WorkflowStatus::Created => match event {
                LifecycleEvent::Start => Some(WorkflowStatus::Running),
                LifecycleEvent::ExecuteStep | LifecycleEvent::Complete => None,
            },
            WorkflowStatus::Running => match event {
                LifecycleEvent::ExecuteStep => Some(WorkflowStatus::Running),
                LifecycleEvent::Complete => Some(WorkflowStatus::Completed),
                LifecycleEvent::Start => None,
            },
            WorkflowStatus::Paused | WorkflowStatus::Completed => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Created => "created",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Paused => "paused",
            WorkflowStatus::Completed => "completed",
        }
    }

    /// Position along the forward-only lifecycle; `Paused` has none
    pub fn rank(&self) -> Option<u8> {
        match self {
            WorkflowStatus::Created => Some(0),
            WorkflowStatus::Running => Some(1),
            WorkflowStatus::Completed => Some(2),
            WorkflowStatus::Paused => None,
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::ExecuteStep => "execute_step",
            LifecycleEvent::Complete => "complete",
        };
        f.write_str(name)
    }
}

/// A named sequence of device operations bound to one device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub device_id: String,
    #[serde(default)]
    pub sample_barcodes: Vec<String>,
    /// Opaque operation descriptors, strings or structured payloads
    #[serde(default)]
    pub steps: Vec<Value>,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    pub fn step(&self, index: usize) -> Option<&Value> {
        self.steps.get(index)
    }
}

/// Fields supplied by the caller when creating a workflow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NewWorkflow {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub device_id: String,
    #[serde(default)]
    pub sample_barcodes: Vec<String>,
    #[serde(default)]
    pub steps: Vec<Value>,
}

impl NewWorkflow {
    pub fn new(name: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            device_id: device_id.into(),
            ..Default::default()
        }
    }

    pub fn with_samples<I, S>(mut self, barcodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sample_barcodes = barcodes.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_steps<I, V>(mut self, steps: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.steps = steps.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of dispatching one step to the reserved device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub workflow_id: String,
    pub step_index: usize,
    pub step: Value,
    pub result: Value,
}
