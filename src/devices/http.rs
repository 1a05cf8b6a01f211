use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{DeviceCallError, DeviceOperation, DeviceReservations};
use crate::observability::{DeviceCallMetrics, OperationTimer};

/// Per-operation time limits for device service calls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTimeouts {
    pub reserve: Duration,
    pub release: Duration,
    pub execute: Duration,
}

impl Default for DeviceTimeouts {
    fn default() -> Self {
        Self {
            reserve: Duration::from_secs(5),
            release: Duration::from_secs(5),
            // device operations run slower than bookkeeping calls
            execute: Duration::from_secs(10),
        }
    }
}

impl DeviceTimeouts {
    fn for_operation(&self, operation: DeviceOperation) -> Duration {
        match operation {
            DeviceOperation::Reserve => self.reserve,
            DeviceOperation::Release => self.release,
            DeviceOperation::Execute => self.execute,
        }
    }
}

#[derive(Serialize)]
struct HolderRequest<'a> {
    workflow_id: &'a str,
}

#[derive(Serialize)]
struct ExecuteRequest<'a> {
    workflow_id: &'a str,
    operation: &'a Value,
}

/// Device service client speaking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpDeviceClient {
    http: reqwest::Client,
    base_url: String,
    timeouts: DeviceTimeouts,
    metrics: Arc<DeviceCallMetrics>,
}

impl HttpDeviceClient {
    pub fn new(base_url: impl Into<String>, timeouts: DeviceTimeouts) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeouts,
            metrics: Arc::new(DeviceCallMetrics::new()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn timeouts(&self) -> DeviceTimeouts {
        self.timeouts
    }

    pub fn metrics(&self) -> Arc<DeviceCallMetrics> {
        Arc::clone(&self.metrics)
    }

    fn endpoint(&self, device_id: &str, operation: DeviceOperation) -> String {
        format!("{}/devices/{}/{}", self.base_url, device_id, operation.as_str())
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        device_id: &str,
        operation: DeviceOperation,
        body: &B,
    ) -> Result<Value, DeviceCallError> {
        let url = self.endpoint(device_id, operation);
        let limit = self.timeouts.for_operation(operation);
        let timer = OperationTimer::new(&format!("device.{operation}"));
        self.metrics.record_call(operation);
        debug!(%url, timeout_ms = limit.as_millis() as u64, "Calling device service");

        let result = self.send(&url, device_id, operation, limit, body).await;
        timer.finish();

        if let Err(e) = &result {
            self.metrics.record_failure(operation);
            warn!(device_id, %operation, error = %e, "Device call failed");
        }
        result
    }

    async fn send<B: Serialize + ?Sized>(
        &self,
        url: &str,
        device_id: &str,
        operation: DeviceOperation,
        limit: Duration,
        body: &B,
    ) -> Result<Value, DeviceCallError> {
        let response = self
            .http
            .post(url)
            .timeout(limit)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_failure(operation, limit, e))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| transport_failure(operation, limit, e))?;
        let body = parse_body(&text);

        classify(operation, device_id.to_string(), status, body)
    }
}

fn transport_failure(operation: DeviceOperation, limit: Duration, err: reqwest::Error) -> DeviceCallError {
    let cause = if err.is_timeout() {
        format!("timed out after {}ms", limit.as_millis())
    } else {
        err.to_string()
    };
    DeviceCallError::Unreachable { operation, cause }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Map a device service reply onto the reservation outcome vocabulary.
///
/// 409 only means "unavailable" for reserve and 403 only means "held
/// elsewhere" for release/execute; anywhere else they are plain remote errors.
fn classify(
    operation: DeviceOperation,
    device_id: String,
    status: StatusCode,
    body: Value,
) -> Result<Value, DeviceCallError> {
    if status.is_success() {
        return Ok(body);
    }
    match (operation, status) {
        (DeviceOperation::Reserve, StatusCode::CONFLICT) => {
            Err(DeviceCallError::Conflict { device_id, body })
        }
        (DeviceOperation::Release | DeviceOperation::Execute, StatusCode::FORBIDDEN) => {
            Err(DeviceCallError::Forbidden { device_id, body })
        }
        _ => Err(DeviceCallError::Remote {
            operation,
            status: status.as_u16(),
            body,
        }),
    }
}

#[async_trait]
impl DeviceReservations for HttpDeviceClient {
    async fn reserve(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError> {
        self.post(device_id, DeviceOperation::Reserve, &HolderRequest { workflow_id })
            .await
    }

    async fn release(&self, device_id: &str, workflow_id: &str) -> Result<Value, DeviceCallError> {
        self.post(device_id, DeviceOperation::Release, &HolderRequest { workflow_id })
            .await
    }

    async fn execute(
        &self,
        device_id: &str,
        workflow_id: &str,
        operation: &Value,
    ) -> Result<Value, DeviceCallError> {
        self.post(
            device_id,
            DeviceOperation::Execute,
            &ExecuteRequest {
                workflow_id,
                operation,
            },
        )
        .await
    }
}
