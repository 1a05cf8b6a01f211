//! Configuration file layering tests

use std::collections::HashMap;
use std::fs;
use tempfile::TempDir;

use labflow::config::{DeviceBackend, LabflowConfig, StoreBackend};

fn no_env() -> HashMap<String, String> {
    HashMap::new()
}

#[test]
fn test_file_values_override_defaults() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labflow.toml");
    fs::write(
        &path,
        r#"
[store]
backend = "redis"
key_prefix = "lab-east"

[devices]
backend = "http"
base_url = "http://devices.lab:5001"
execute_timeout_ms = 30000
"#,
    )
    .unwrap();

    let loaded = LabflowConfig::load_with_env(Some(&path), no_env()).unwrap();

    assert_eq!(loaded.store.backend, StoreBackend::Redis);
    assert_eq!(loaded.store.key_prefix, "lab-east");
    assert_eq!(loaded.store.max_update_attempts, 16);
    assert_eq!(loaded.devices.backend, DeviceBackend::Http);
    assert_eq!(loaded.devices.execute_timeout_ms, 30_000);
    assert_eq!(loaded.devices.reserve_timeout_ms, 5_000);
}

#[test]
fn test_environment_beats_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labflow.toml");
    fs::write(&path, "[devices]\nbase_url = \"http://from-file:5001\"\n").unwrap();

    let env = HashMap::from([
        ("DEVICE_API_URL".to_string(), "http://legacy:5001".to_string()),
        ("LABFLOW_STORE__MAX_UPDATE_ATTEMPTS".to_string(), "4".to_string()),
    ]);
    let loaded = LabflowConfig::load_with_env(Some(&path), env).unwrap();

    assert_eq!(loaded.devices.base_url, "http://legacy:5001");
    assert_eq!(loaded.store.max_update_attempts, 4);
}

#[test]
fn test_saved_config_loads_back() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("saved.toml");

    let mut original = LabflowConfig::default();
    original.devices.backend = DeviceBackend::Http;
    original.devices.simulated_latency_ms = 25;
    original.observability.json_logs = true;
    original.save_to_file(&path).unwrap();

    let loaded = LabflowConfig::load_with_env(Some(&path), no_env()).unwrap();
    assert_eq!(loaded, original);
}

#[test]
fn test_unknown_backend_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("labflow.toml");
    fs::write(&path, "[store]\nbackend = \"postgres\"\n").unwrap();

    assert!(LabflowConfig::load_with_env(Some(&path), no_env()).is_err());
}

#[test]
fn test_missing_explicit_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.toml");
    assert!(LabflowConfig::load_with_env(Some(&path), no_env()).is_err());
}
