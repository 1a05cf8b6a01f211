use anyhow::Result;
use serde_json::json;
use tracing::info;

use super::{print_json, Command};
use labflow::{LabflowApp, NewWorkflow};

pub const DEMO_DEVICE: &str = "liquid-handler-1";

/// Walks Assay A through its whole lifecycle while a second workflow
/// competes for the same device.
pub struct DemoCommand;

impl Command for DemoCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let machine = app.machine();

        let assay = machine
            .create(
                NewWorkflow::new("Assay A", DEMO_DEVICE)
                    .with_samples(["SAMPLE001", "SAMPLE002"])
                    .with_steps(["pipette", "dispense"]),
            )
            .await?;
        let contender = machine
            .create(NewWorkflow::new("Assay B", DEMO_DEVICE).with_steps(["pipette"]))
            .await?;

        let started = machine.start(&assay.id).await?;
        info!(workflow_id = %started.id, "Demo workflow running");

        let contention = match machine.start(&contender.id).await {
            Ok(workflow) => json!({ "workflow": workflow, "error": null }),
            Err(e) => {
                let unchanged = machine.get(&contender.id).await?;
                json!({ "workflow": unchanged, "error": e.to_body() })
            }
        };

        let mut steps = Vec::with_capacity(started.steps.len());
        for index in 0..started.steps.len() {
            steps.push(machine.execute_step(&assay.id, index).await?);
        }

        let completed = machine.complete(&assay.id).await?;
        app.log_device_metrics();

        print_json(&json!({
            "created": assay,
            "started": started,
            "contention": contention,
            "steps": steps,
            "completed": completed,
        }))
    }
}
