// labflow - laboratory workflow orchestration core
// Exposes the lifecycle state machine, device client, and stores for the CLI and tests

pub mod app;
pub mod config;
pub mod devices;
pub mod observability;
pub mod store;
pub mod telemetry;
pub mod workflows;

// Re-export key types for easy access
pub use app::LabflowApp;
pub use config::{config, LabflowConfig};
pub use devices::{DeviceCallError, DeviceReservations, HttpDeviceClient, SimulatedDevices};
pub use observability::{DeviceCallMetrics, OperationTimer};
pub use store::{MemoryRecordStore, RecordStore, StoreError};
pub use telemetry::{create_command_span, generate_correlation_id, init_telemetry};
pub use workflows::{
    NewWorkflow, StepOutcome, Workflow, WorkflowError, WorkflowRepository, WorkflowStateMachine,
    WorkflowStatus,
};
