use anyhow::{bail, Result};

use super::{print_json, Command};
use labflow::LabflowApp;

pub struct DevicesCommand;

impl Command for DevicesCommand {
    async fn execute(&self, app: &LabflowApp) -> Result<()> {
        let Some(lab) = app.simulated_devices() else {
            bail!(
                "device listing is served by the device service at {}",
                app.settings().devices.base_url
            );
        };
        print_json(&lab.snapshot().await?)
    }
}
