use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod commands;

#[derive(Parser)]
#[command(name = "labflow")]
#[command(about = "Laboratory workflow orchestration")]
#[command(long_about = "labflow tracks lab workflows through created, running and completed, \
                       reserving the workflow's device on start and releasing it on completion. \
                       Every command prints JSON on stdout.")]
pub struct Cli {
    /// Configuration file (defaults to ./labflow.toml when present)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List all workflows, oldest first
    List,
    /// Show one workflow
    Get {
        /// Workflow id
        id: String,
    },
    /// Create a workflow in the created state
    Create {
        /// Human-readable workflow name
        #[arg(long)]
        name: String,
        /// Device the workflow runs on
        #[arg(long = "device")]
        device_id: String,
        /// Sample barcode, repeatable
        #[arg(long = "sample", value_name = "BARCODE")]
        samples: Vec<String>,
        /// Step descriptor, repeatable; JSON values are kept structured
        #[arg(long = "step", value_name = "STEP")]
        steps: Vec<String>,
    },
    /// Reserve the device and start the workflow
    Start {
        /// Workflow id
        id: String,
    },
    /// Run one step of a running workflow on its device
    ExecuteStep {
        /// Workflow id
        id: String,
        /// Zero-based step index
        #[arg(long, default_value = "0")]
        index: usize,
    },
    /// Release the device and complete the workflow
    Complete {
        /// Workflow id
        id: String,
    },
    /// Show the simulated lab's devices and their holders
    Devices,
    /// Report service health
    Health,
    /// Run the Assay A walkthrough end to end
    Demo,
}
