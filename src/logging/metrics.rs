//! Timing metrics for registration stages
//!
//! A bounded in-memory store of stage timings with percentile summaries,
//! exposed by the service's stats endpoint.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use uuid::Uuid;

/// Stage names recorded by the registration pipeline
pub const STAGES: [&str; 5] = ["extraction", "sampling", "matching", "ransac", "registration"];

const MAX_MEASUREMENTS: usize = 10_000;

/// Individual performance measurement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceMeasurement {
    pub operation: String,
    pub duration_ms: f64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub correlation_id: Option<Uuid>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Statistical summary of performance measurements
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub operation: String,
    pub count: usize,
    pub mean_ms: f64,
    pub median_ms: f64,
    pub std_dev_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

/// Outcome counts plus per-stage timing summaries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationMetrics {
    pub total_requests: usize,
    pub solved: usize,
    pub no_solution: usize,
    /// Requests that ended in an error
    pub failed: usize,
    pub mean_inliers: f64,
    pub stages: Vec<PerformanceStats>,
    pub last_updated: chrono::DateTime<chrono::Utc>,
}

/// Thread-safe metrics collector
pub struct MetricsCollector {
    measurements: Mutex<Vec<PerformanceMeasurement>>,
    enabled: bool,
}

impl MetricsCollector {
    pub fn new(enabled: bool) -> Self {
        Self {
            measurements: Mutex::new(Vec::new()),
            enabled,
        }
    }

    pub fn record(&self, operation: &str, duration: Duration, correlation_id: Option<Uuid>) {
        self.record_with_metadata(operation, duration, correlation_id, HashMap::new());
    }

    pub fn record_with_metadata(
        &self,
        operation: &str,
        duration: Duration,
        correlation_id: Option<Uuid>,
        metadata: HashMap<String, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }

        let measurement = PerformanceMeasurement {
            operation: operation.to_string(),
            duration_ms: duration.as_secs_f64() * 1000.0,
            timestamp: chrono::Utc::now(),
            correlation_id,
            metadata,
        };

        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.push(measurement);

            // Keep the newest half once the store is full
            if measurements.len() > MAX_MEASUREMENTS {
                measurements.drain(0..MAX_MEASUREMENTS / 2);
            }
        }
    }

    pub fn get_measurements(&self, operation: &str) -> Vec<PerformanceMeasurement> {
        self.measurements
            .lock()
            .map(|measurements| {
                measurements
                    .iter()
                    .filter(|m| m.operation == operation)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_measurements_by_correlation(&self, correlation_id: Uuid) -> Vec<PerformanceMeasurement> {
        self.measurements
            .lock()
            .map(|measurements| {
                measurements
                    .iter()
                    .filter(|m| m.correlation_id == Some(correlation_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Calculate performance statistics for an operation
    pub fn calculate_stats(&self, operation: &str) -> Option<PerformanceStats> {
        let mut durations: Vec<f64> = self
            .get_measurements(operation)
            .iter()
            .map(|m| m.duration_ms)
            .collect();
        if durations.is_empty() {
            return None;
        }
        durations.sort_by(|a, b| a.total_cmp(b));

        let count = durations.len();
        let mean = durations.iter().sum::<f64>() / count as f64;
        let variance = durations.iter().map(|d| (d - mean).powi(2)).sum::<f64>() / count as f64;

        let median = if count % 2 == 0 {
            (durations[count / 2 - 1] + durations[count / 2]) / 2.0
        } else {
            durations[count / 2]
        };
        let percentile = |p: f64| durations[(((count as f64) * p) as usize).min(count - 1)];

        Some(PerformanceStats {
            operation: operation.to_string(),
            count,
            mean_ms: mean,
            median_ms: median,
            std_dev_ms: variance.sqrt(),
            min_ms: durations[0],
            max_ms: durations[count - 1],
            p95_ms: percentile(0.95),
            p99_ms: percentile(0.99),
        })
    }

    /// Summary over all recorded registrations. The `registration` stage
    /// carries `solved` and `inliers` metadata.
    pub fn registration_metrics(&self) -> RegistrationMetrics {
        let runs = self.get_measurements("registration");
        let solved: Vec<_> = runs
            .iter()
            .filter(|m| {
                m.metadata
                    .get("solved")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false)
            })
            .collect();
        let failed = runs
            .iter()
            .filter(|m| m.metadata.contains_key("error"))
            .count();

        let mean_inliers = if solved.is_empty() {
            0.0
        } else {
            solved
                .iter()
                .filter_map(|m| m.metadata.get("inliers").and_then(|v| v.as_f64()))
                .sum::<f64>()
                / solved.len() as f64
        };

        RegistrationMetrics {
            total_requests: runs.len(),
            solved: solved.len(),
            no_solution: runs.len() - solved.len() - failed,
            failed,
            mean_inliers,
            stages: STAGES
                .iter()
                .filter_map(|stage| self.calculate_stats(stage))
                .collect(),
            last_updated: chrono::Utc::now(),
        }
    }

    pub fn clear(&self) {
        if let Ok(mut measurements) = self.measurements.lock() {
            measurements.clear();
        }
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.lock().map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Wall-clock timer that optionally reports into a collector when stopped
pub struct Timer {
    start: Instant,
    operation: String,
    correlation_id: Option<Uuid>,
    collector: Option<Arc<MetricsCollector>>,
    metadata: HashMap<String, serde_json::Value>,
}

impl Timer {
    pub fn start(operation: &str, correlation_id: Option<Uuid>) -> Self {
        Self {
            start: Instant::now(),
            operation: operation.to_string(),
            correlation_id,
            collector: None,
            metadata: HashMap::new(),
        }
    }

    pub fn start_with_collector(
        operation: &str,
        correlation_id: Option<Uuid>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            collector: Some(collector),
            ..Self::start(operation, correlation_id)
        }
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// Stop the timer and record the measurement
    pub fn stop(self) -> Duration {
        let duration = self.start.elapsed();

        tracing::trace!(
            operation = %self.operation,
            duration_ms = duration.as_millis() as u64,
            correlation_id = ?self.correlation_id,
            "Timer completed"
        );

        if let Some(collector) = &self.collector {
            collector.record_with_metadata(
                &self.operation,
                duration,
                self.correlation_id,
                self.metadata,
            );
        }

        duration
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_metrics_collector() {
        let collector = MetricsCollector::new(true);
        let correlation_id = Uuid::new_v4();

        collector.record("ransac", Duration::from_millis(100), Some(correlation_id));
        collector.record("ransac", Duration::from_millis(150), Some(correlation_id));
        collector.record("ransac", Duration::from_millis(200), None);

        assert_eq!(collector.get_measurements("ransac").len(), 3);
        assert_eq!(collector.get_measurements_by_correlation(correlation_id).len(), 2);

        let stats = collector.calculate_stats("ransac").unwrap();
        assert_eq!(stats.count, 3);
        assert!((stats.mean_ms - 150.0).abs() < 1.0);
        assert!((stats.median_ms - 150.0).abs() < 1.0);
        assert!(stats.p99_ms >= stats.p95_ms);
    }

    #[test]
    fn test_timer_records_metadata() {
        let collector = Arc::new(MetricsCollector::new(true));
        let correlation_id = Uuid::new_v4();

        let timer = Timer::start_with_collector("matching", Some(correlation_id), collector.clone())
            .with_metadata("correspondences", serde_json::json!(120));

        thread::sleep(Duration::from_millis(10));
        let duration = timer.stop();

        assert!(duration >= Duration::from_millis(10));
        let measurements = collector.get_measurements("matching");
        assert_eq!(measurements.len(), 1);
        assert_eq!(measurements[0].correlation_id, Some(correlation_id));
        assert_eq!(measurements[0].metadata["correspondences"], serde_json::json!(120));
    }

    #[test]
    fn test_registration_summary() {
        let collector = Arc::new(MetricsCollector::new(true));
        for (solved, inliers) in [(true, 100), (true, 200), (false, 0)] {
            Timer::start_with_collector("registration", None, collector.clone())
                .with_metadata("solved", serde_json::json!(solved))
                .with_metadata("inliers", serde_json::json!(inliers))
                .stop();
        }

        Timer::start_with_collector("registration", None, collector.clone())
            .with_metadata("solved", serde_json::json!(false))
            .with_metadata("error", serde_json::json!("invalid input"))
            .stop();

        let summary = collector.registration_metrics();
        assert_eq!(summary.total_requests, 4);
        assert_eq!(summary.solved, 2);
        assert_eq!(summary.no_solution, 1);
        assert_eq!(summary.failed, 1);
        assert!((summary.mean_inliers - 150.0).abs() < 1e-9);
        assert_eq!(summary.stages.len(), 1);
    }

    #[test]
    fn test_disabled_collector() {
        let collector = MetricsCollector::new(false);
        collector.record("sampling", Duration::from_millis(100), None);
        assert_eq!(collector.measurement_count(), 0);
        assert!(collector.calculate_stats("sampling").is_none());
    }
}
