// Workflow orchestration: lifecycle state machine, persistence, step dispatch

pub mod errors;
pub mod executor;
pub mod repository;
pub mod state_machine;
pub mod types;

pub use errors::{ErrorBody, WorkflowError};
pub use executor::StepExecutor;
pub use repository::{WorkflowRepository, DEFAULT_MAX_UPDATE_ATTEMPTS, WORKFLOWS_COLLECTION};
pub use state_machine::WorkflowStateMachine;
pub use types::{LifecycleEvent, NewWorkflow, StepOutcome, Workflow, WorkflowStatus};
