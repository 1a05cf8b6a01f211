use anyhow::Result;

use super::{parse_step, print_json, Command};
use labflow::{LabflowApp, NewWorkflow};

pub struct ListCommand;

impl Command for ListCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let workflows = app.machine().list().await?;
        print_json(&workflows)
    }
}

pub struct GetCommand {
    pub id: String,
}

impl Command for GetCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let workflow = app.machine().get(&self.id).await?;
        print_json(&workflow)
    }
}

pub struct CreateCommand {
    pub name: String,
    pub device_id: String,
    pub samples: Vec<String>,
    pub steps: Vec<String>,
}

impl Command for CreateCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let request = NewWorkflow::new(self.name.clone(), self.device_id.clone())
            .with_samples(self.samples.iter().cloned())
            .with_steps(self.steps.iter().map(|raw| parse_step(raw)));
        let workflow = app.machine().create(request).await?;
        print_json(&workflow)
    }
}

pub struct StartCommand {
    pub id: String,
}

impl Command for StartCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let workflow = app.machine().start(&self.id).await?;
        print_json(&workflow)
    }
}

pub struct ExecuteStepCommand {
    pub id: String,
    pub index: usize,
}

impl Command for ExecuteStepCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let outcome = app.machine().execute_step(&self.id, self.index).await?;
        print_json(&outcome)
    }
}

pub struct CompleteCommand {
    pub id: String,
}

impl Command for CompleteCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let workflow = app.machine().complete(&self.id).await?;
        print_json(&workflow)
    }
}
