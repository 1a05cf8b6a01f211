use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

use labflow::LabflowApp;

pub mod demo;
pub mod devices;
pub mod health;
pub mod workflow;

#[allow(async_fn_in_trait)]
pub trait Command {
    async fn execute(&self, app: &LabflowApp) -> Result<()>;
}

/// Write `value` to stdout as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Step descriptors given on the command line: JSON objects and arrays stay
/// structured, anything else is an opaque string.
pub fn parse_step(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Object(_) | Value::Array(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}
