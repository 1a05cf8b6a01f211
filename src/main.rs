use anyhow::Result;
use clap::Parser;
use serde_json::json;
use std::process::ExitCode;

mod cli;

use cli::commands::demo::DemoCommand;
use cli::commands::devices::DevicesCommand;
use cli::commands::health::HealthCommand;
use cli::commands::workflow::{
    CompleteCommand, CreateCommand, ExecuteStepCommand, GetCommand, ListCommand, StartCommand,
};
use cli::commands::Command;
use cli::{Cli, Commands};
use labflow::{config, init_telemetry, LabflowApp, LabflowConfig, WorkflowError};

fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_error(&e);
            // 2 when the device subsystem refused or could not be reached
            match e.downcast_ref::<WorkflowError>() {
                Some(workflow_error) if workflow_error.is_remote() => ExitCode::from(2),
                _ => ExitCode::FAILURE,
            }
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let settings = match &cli.config {
        Some(path) => {
            LabflowConfig::load_env_file()?;
            LabflowConfig::load_from(path)?
        }
        None => config()?.clone(),
    };
    init_telemetry(&settings.observability)?;

    let app = LabflowApp::from_config(settings)?;
    tokio::runtime::Runtime::new()?.block_on(async { dispatch(cli.command, &app).await })
}

async fn dispatch(command: Commands, app: &LabflowApp) -> Result<()> {
    match command {
        Commands::List => ListCommand.execute(app).await,
        Commands::Get { id } => GetCommand { id }.execute(app).await,
        Commands::Create {
            name,
            device_id,
            samples,
            steps,
        } => {
            CreateCommand {
                name,
                device_id,
                samples,
                steps,
            }
            .execute(app)
            .await
        }
        Commands::Start { id } => StartCommand { id }.execute(app).await,
        Commands::ExecuteStep { id, index } => ExecuteStepCommand { id, index }.execute(app).await,
        Commands::Complete { id } => CompleteCommand { id }.execute(app).await,
        Commands::Devices => DevicesCommand.execute(app).await,
        Commands::Health => HealthCommand.execute(app).await,
        Commands::Demo => DemoCommand.execute(app).await,
    }
}

/// Errors go to stderr as a JSON object so callers can branch on `code`
fn report_error(err: &anyhow::Error) {
    let body = match err.downcast_ref::<WorkflowError>() {
        Some(workflow_error) => json!(workflow_error.to_body()),
        None => json!({ "error": format!("{err:#}"), "code": "internal_error" }),
    };
    eprintln!("{body}");
}
