use anyhow::Result;
use serde_json::json;

use super::{print_json, Command};
use labflow::LabflowApp;

pub struct HealthCommand;

impl Command for HealthCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let settings = app.settings();
        print_json(&json!({
            "status": "healthy",
            "service": "labflow",
            "version": env!("CARGO_PKG_VERSION"),
            "store": settings.store.backend,
            "devices": settings.devices.backend,
        }))
    }
}
