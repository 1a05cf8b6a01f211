use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::devices::DeviceTimeouts;

/// Main configuration structure for labflow
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct LabflowConfig {
    /// Where workflow records live
    pub store: StoreConfig,
    /// How the device subsystem is reached
    pub devices: DevicesConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Memory,
    Redis,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Redis connection URL, used by the redis backend
    pub redis_url: String,
    /// Namespace for every key written to Redis
    pub key_prefix: String,
    /// Compare-and-swap attempts before an update reports contention
    pub max_update_attempts: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            key_prefix: "labflow".to_string(),
            max_update_attempts: 16,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceBackend {
    Simulated,
    Http,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DevicesConfig {
    pub backend: DeviceBackend,
    /// Device service base URL, used by the http backend
    pub base_url: String,
    pub reserve_timeout_ms: u64,
    pub release_timeout_ms: u64,
    pub execute_timeout_ms: u64,
    /// Artificial delay per simulated device call
    pub simulated_latency_ms: u64,
}

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            backend: DeviceBackend::Simulated,
            base_url: "http://localhost:5001".to_string(),
            reserve_timeout_ms: 5_000,
            release_timeout_ms: 5_000,
            execute_timeout_ms: 10_000,
            simulated_latency_ms: 0,
        }
    }
}

impl DevicesConfig {
    pub fn timeouts(&self) -> DeviceTimeouts {
        DeviceTimeouts {
            reserve: Duration::from_millis(self.reserve_timeout_ms),
            release: Duration::from_millis(self.release_timeout_ms),
            execute: Duration::from_millis(self.execute_timeout_ms),
        }
    }

    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Default filter directive when RUST_LOG is unset
    pub log_level: String,
    /// Emit JSON lines instead of human-readable logs
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
            json_logs: false,
        }
    }
}

impl LabflowConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. labflow.toml in the working directory
    /// 3. REDIS_URL / DEVICE_API_URL
    /// 4. Environment variables (prefixed with LABFLOW_, `__` between sections)
    pub fn load() -> Result<Self> {
        Self::build(None, None)
    }

    /// Same as [`LabflowConfig::load`] but reading an explicit file, which must exist
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(Some(path.as_ref()), None)
    }

    /// Load with a fixed set of environment variables instead of the process environment
    pub fn load_with_env<P: AsRef<Path>>(
        path: Option<P>,
        vars: HashMap<String, String>,
    ) -> Result<Self> {
        Self::build(path.as_ref().map(|p| p.as_ref()), Some(vars))
    }

    fn build(path: Option<&Path>, vars: Option<HashMap<String, String>>) -> Result<Self> {
        let lookup = |key: &str| match &vars {
            Some(map) => map.get(key).cloned(),
            None => std::env::var(key).ok(),
        };

        let mut builder = Config::builder().add_source(Config::try_from(&LabflowConfig::default())?);

        builder = match path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name("labflow").required(false)),
        };

        // Unprefixed service URLs, overridden by their LABFLOW_ equivalents
        if lookup("LABFLOW_STORE__REDIS_URL").is_none() {
            builder = builder.set_override_option("store.redis_url", lookup("REDIS_URL"))?;
        }
        if lookup("LABFLOW_DEVICES__BASE_URL").is_none() {
            builder = builder.set_override_option("devices.base_url", lookup("DEVICE_API_URL"))?;
        }

        builder = builder.add_source(
            Environment::with_prefix("LABFLOW")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .source(vars.clone()),
        );

        let loaded: LabflowConfig = builder
            .build()?
            .try_deserialize()
            .context("Invalid labflow configuration")?;
        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.store.max_update_attempts == 0 {
            bail!("store.max_update_attempts must be at least 1");
        }
        if self.store.backend == StoreBackend::Redis && self.store.redis_url.trim().is_empty() {
            bail!("store.redis_url is required for the redis backend");
        }
        if self.devices.backend == DeviceBackend::Http && self.devices.base_url.trim().is_empty() {
            bail!("devices.base_url is required for the http backend");
        }
        let timeouts = [
            ("reserve_timeout_ms", self.devices.reserve_timeout_ms),
            ("release_timeout_ms", self.devices.release_timeout_ms),
            ("execute_timeout_ms", self.devices.execute_timeout_ms),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                bail!("devices.{name} must be greater than zero");
            }
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::debug!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Global configuration instance
static CONFIG: std::sync::LazyLock<Result<LabflowConfig, anyhow::Error>> =
    std::sync::LazyLock::new(|| {
        let _ = LabflowConfig::load_env_file();
        LabflowConfig::load()
    });

/// Get the global configuration
pub fn config() -> Result<&'static LabflowConfig> {
    CONFIG
        .as_ref()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {e:#}"))
}
