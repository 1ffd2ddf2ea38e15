//! # Adapter Metrics
//!
//! Every storage adapter operation is timed and recorded here: per-operation
//! counts, success rate, latency percentiles, error counts by family, and
//! optional byte volumes. The collector is cheap to sample and a no-op when
//! disabled; snapshots export as a structured map, Prometheus text, CSV, or
//! a Markdown table.

mod exporters;

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

pub use exporters::ExportFormat;

/// Number of latency samples retained per operation.
const DEFAULT_MAX_SAMPLES: usize = 1000;

/// Number of recent error records retained.
const RECENT_ERRORS_KEPT: usize = 10;

/// Configuration for metrics collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub max_samples: usize,
    /// Latency percentiles reported per operation
    pub percentiles: Vec<u8>,
    pub track_errors: bool,
    pub track_data_volume: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_samples: DEFAULT_MAX_SAMPLES,
            percentiles: vec![50, 95, 99],
            track_errors: true,
            track_data_volume: true,
        }
    }
}

#[derive(Debug, Default)]
struct OperationRecord {
    total: u64,
    success: u64,
    durations_ms: VecDeque<f64>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorRecord {
    operation: String,
    family: String,
    message: String,
    at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    operations: HashMap<String, OperationRecord>,
    errors_by_family: HashMap<String, u64>,
    recent_errors: VecDeque<ErrorRecord>,
    connection_events: HashMap<String, u64>,
    data_volume_bytes: HashMap<String, u64>,
}

/// Thread-safe metrics collector shared across adapters and tiers.
#[derive(Debug)]
pub struct MetricsCollector {
    config: MetricsConfig,
    inner: RwLock<Inner>,
    started_at: Instant,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(MetricsConfig::default())
    }
}

impl MetricsCollector {
    #[must_use]
    pub fn new(config: MetricsConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner::default()),
            started_at: Instant::now(),
        }
    }

    /// A collector that records nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(MetricsConfig {
            enabled: false,
            ..MetricsConfig::default()
        })
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record a timed operation outcome.
    pub fn record_operation(&self, operation: &str, duration: Duration, success: bool) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.write();
        let record = inner.operations.entry(operation.to_string()).or_default();
        record.total += 1;
        if success {
            record.success += 1;
        }
        record.durations_ms.push_back(duration.as_secs_f64() * 1000.0);
        while record.durations_ms.len() > self.config.max_samples {
            record.durations_ms.pop_front();
        }
    }

    /// Record an error by family for the given operation.
    pub fn record_error(&self, operation: &str, family: &str, message: &str) {
        if !self.config.enabled || !self.config.track_errors {
            return;
        }
        let mut inner = self.inner.write();
        *inner.errors_by_family.entry(family.to_string()).or_default() += 1;
        inner.recent_errors.push_back(ErrorRecord {
            operation: operation.to_string(),
            family: family.to_string(),
            message: message.to_string(),
            at: chrono::Utc::now(),
        });
        while inner.recent_errors.len() > RECENT_ERRORS_KEPT {
            inner.recent_errors.pop_front();
        }
    }

    /// Record a connection lifecycle event (connect, disconnect, reconnect).
    pub fn record_connection_event(&self, event: &str) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.write();
        *inner.connection_events.entry(event.to_string()).or_default() += 1;
    }

    /// Record bytes moved by an operation.
    pub fn record_data_volume(&self, operation: &str, bytes: u64) {
        if !self.config.enabled || !self.config.track_data_volume {
            return;
        }
        let mut inner = self.inner.write();
        *inner
            .data_volume_bytes
            .entry(operation.to_string())
            .or_default() += bytes;
    }

    /// Time an operation and record outcome + error family in one call.
    pub fn observe<T>(
        &self,
        operation: &str,
        started: Instant,
        result: &crate::error::Result<T>,
    ) {
        self.record_operation(operation, started.elapsed(), result.is_ok());
        if let Err(error) = result {
            self.record_error(operation, error.family(), &error.to_string());
        }
    }

    /// Aggregate snapshot of everything collected so far.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        if !self.config.enabled {
            return MetricsSnapshot::default();
        }
        let inner = self.inner.read();

        let mut operations = HashMap::new();
        for (name, record) in &inner.operations {
            let mut sorted: Vec<f64> = record.durations_ms.iter().copied().collect();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

            let latency_ms = self
                .config
                .percentiles
                .iter()
                .map(|p| (format!("p{p}"), percentile(&sorted, *p)))
                .collect();

            operations.insert(
                name.clone(),
                OperationStats {
                    total_count: record.total,
                    success_count: record.success,
                    error_count: record.total - record.success,
                    success_rate: if record.total > 0 {
                        record.success as f64 / record.total as f64
                    } else {
                        0.0
                    },
                    latency_ms,
                    data_volume_bytes: inner.data_volume_bytes.get(name).copied(),
                },
            );
        }

        MetricsSnapshot {
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            operations,
            connection_events: inner.connection_events.clone(),
            errors_by_family: inner.errors_by_family.clone(),
            recent_errors: inner
                .recent_errors
                .iter()
                .map(|e| format!("[{}] {} {}: {}", e.at.to_rfc3339(), e.operation, e.family, e.message))
                .collect(),
        }
    }

    /// Export the snapshot in the requested format.
    #[must_use]
    pub fn export(&self, format: ExportFormat) -> String {
        exporters::export(&self.snapshot(), format)
    }

    /// Drop all collected data.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        *inner = Inner::default();
    }
}

/// Per-operation aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationStats {
    pub total_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub latency_ms: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_volume_bytes: Option<u64>,
}

/// Point-in-time aggregate of all metrics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_seconds: f64,
    pub operations: HashMap<String, OperationStats>,
    pub connection_events: HashMap<String, u64>,
    pub errors_by_family: HashMap<String, u64>,
    pub recent_errors: Vec<String>,
}

fn percentile(sorted: &[f64], p: u8) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (f64::from(p) / 100.0 * sorted.len() as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn records_and_aggregates_operations() {
        let metrics = MetricsCollector::default();
        metrics.record_operation("l1_store", Duration::from_millis(5), true);
        metrics.record_operation("l1_store", Duration::from_millis(15), true);
        metrics.record_operation("l1_store", Duration::from_millis(25), false);

        let snapshot = metrics.snapshot();
        let stats = &snapshot.operations["l1_store"];
        assert_eq!(stats.total_count, 3);
        assert_eq!(stats.success_count, 2);
        assert_eq!(stats.error_count, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!(stats.latency_ms["p99"] >= stats.latency_ms["p50"]);
    }

    #[test]
    fn disabled_collector_is_a_noop() {
        let metrics = MetricsCollector::disabled();
        metrics.record_operation("op", Duration::from_millis(1), true);
        metrics.record_error("op", "query", "boom");
        assert!(metrics.snapshot().operations.is_empty());
    }

    #[test]
    fn error_families_are_counted() {
        let metrics = MetricsCollector::default();
        metrics.record_error("l2_store", "data", "below threshold");
        metrics.record_error("l2_store", "data", "too long");
        metrics.record_error("l2_query", "connection", "refused");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.errors_by_family["data"], 2);
        assert_eq!(snapshot.errors_by_family["connection"], 1);
    }

    #[tokio::test]
    async fn concurrent_record_operations_lose_no_updates() {
        let metrics = Arc::new(MetricsCollector::default());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let metrics = Arc::clone(&metrics);
            handles.push(tokio::spawn(async move {
                for _ in 0..100 {
                    metrics.record_operation("concurrent", Duration::from_micros(10), true);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(metrics.snapshot().operations["concurrent"].total_count, 6400);
    }

    #[test]
    fn sample_window_is_bounded() {
        let metrics = MetricsCollector::new(MetricsConfig {
            max_samples: 10,
            ..MetricsConfig::default()
        });
        for i in 0..100 {
            metrics.record_operation("op", Duration::from_millis(i), true);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.operations["op"].total_count, 100);
        // p50 reflects only the retained tail of samples
        assert!(snapshot.operations["op"].latency_ms["p50"] >= 90.0);
    }
}
