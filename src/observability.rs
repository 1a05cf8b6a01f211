use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{debug, info};

use crate::devices::DeviceOperation;

/// Device service call counters, one pair per operation
#[derive(Debug, Default)]
pub struct DeviceCallMetrics {
    reserve_calls: AtomicU64,
    reserve_failures: AtomicU64,
    release_calls: AtomicU64,
    release_failures: AtomicU64,
    execute_calls: AtomicU64,
    execute_failures: AtomicU64,
}

impl DeviceCallMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, operation: DeviceOperation) -> (&AtomicU64, &AtomicU64) {
        match operation {
            DeviceOperation::Reserve => (&self.reserve_calls, &self.reserve_failures),
            DeviceOperation::Release => (&self.release_calls, &self.release_failures),
            DeviceOperation::Execute => (&self.execute_calls, &self.execute_failures),
        }
    }

    pub fn record_call(&self, operation: DeviceOperation) {
        self.counters(operation).0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failure(&self, operation: DeviceOperation) {
        self.counters(operation).1.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> DeviceCallStats {
        DeviceCallStats {
            reserve_calls: self.reserve_calls.load(Ordering::Relaxed),
            reserve_failures: self.reserve_failures.load(Ordering::Relaxed),
            release_calls: self.release_calls.load(Ordering::Relaxed),
            release_failures: self.release_failures.load(Ordering::Relaxed),
            execute_calls: self.execute_calls.load(Ordering::Relaxed),
            execute_failures: self.execute_failures.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Device call metrics: reserve={}/{} release={}/{} execute={}/{} (calls/failures)",
            stats.reserve_calls,
            stats.reserve_failures,
            stats.release_calls,
            stats.release_failures,
            stats.execute_calls,
            stats.execute_failures
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCallStats {
    pub reserve_calls: u64,
    pub reserve_failures: u64,
    pub release_calls: u64,
    pub release_failures: u64,
    pub execute_calls: u64,
    pub execute_failures: u64,
}

/// Time an operation and log its duration when finished
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        debug!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            "Operation completed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_per_operation() {
        let metrics = DeviceCallMetrics::new();
        metrics.record_call(DeviceOperation::Reserve);
        metrics.record_call(DeviceOperation::Reserve);
        metrics.record_failure(DeviceOperation::Reserve);
        metrics.record_call(DeviceOperation::Execute);

        let stats = metrics.get_stats();
        assert_eq!(stats.reserve_calls, 2);
        assert_eq!(stats.reserve_failures, 1);
        assert_eq!(stats.execute_calls, 1);
        assert_eq!(stats.release_calls, 0);
    }
}
