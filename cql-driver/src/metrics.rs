//! Session wide counters and the request latency histogram.
use histogram::{AtomicHistogram, Histogram};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

const ORDER_TYPE: Ordering = Ordering::Relaxed;

// microsecond latencies up to ~71 minutes, under 1% relative error
const GROUPING_POWER: u8 = 7;
const MAX_VALUE_POWER: u8 = 32;

#[non_exhaustive]
#[derive(Error, Debug, Clone)]
pub enum MetricsError {
    #[error("Histogram error: {0}")]
    HistogramError(#[from] Arc<dyn std::error::Error + Send + Sync>),
    #[error("Histogram is empty")]
    Empty,
}

/// Request latency statistics, in microseconds.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LatencyStats {
    pub min: u64,
    pub max: u64,
    pub mean: u64,
    pub stddev: u64,
    pub median: u64,
    pub percentile_75th: u64,
    pub percentile_95th: u64,
    pub percentile_98th: u64,
    pub percentile_99th: u64,
    pub percentile_999th: u64,
}

/// Point in time copy of every metric.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetricsSnapshot {
    pub total_connections: i64,
    pub requests: u64,
    pub errors: u64,
    pub retries: u64,
    pub request_timeouts: u64,
    pub connection_timeouts: u64,
    pub speculative_executions: u64,
    pub aborted_speculative_executions: u64,
    /// Speculative executions relative to requests, as a percentage.
    pub speculative_percentage: f64,
    /// `None` until the first request completes.
    pub latency: Option<LatencyStats>,
}

pub struct Metrics {
    total_connections: AtomicI64,
    requests: AtomicU64,
    errors: AtomicU64,
    retries: AtomicU64,
    request_timeouts: AtomicU64,
    connection_timeouts: AtomicU64,
    speculative_executions: AtomicU64,
    aborted_speculative_executions: AtomicU64,
    latency: AtomicHistogram,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics::default()
    }

    pub(crate) fn inc_connections(&self) {
        self.total_connections.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn dec_connections(&self) {
        self.total_connections.fetch_sub(1, ORDER_TYPE);
    }

    pub(crate) fn inc_errors(&self) {
        self.errors.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_retries(&self) {
        self.retries.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_request_timeouts(&self) {
        self.request_timeouts.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_connection_timeouts(&self) {
        self.connection_timeouts.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_speculative_executions(&self) {
        self.speculative_executions.fetch_add(1, ORDER_TYPE);
    }

    pub(crate) fn inc_aborted_speculative_executions(&self) {
        self.aborted_speculative_executions.fetch_add(1, ORDER_TYPE);
    }

    /// Records a finished request.
    pub(crate) fn log_request_latency(&self, latency: Duration) -> Result<(), MetricsError> {
        self.requests.fetch_add(1, ORDER_TYPE);

        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.latency
            .increment(micros)
            .map_err(|error| MetricsError::HistogramError(Arc::new(error)))
    }

    pub fn total_connections(&self) -> i64 {
        self.total_connections.load(ORDER_TYPE)
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(ORDER_TYPE)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(ORDER_TYPE)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(ORDER_TYPE)
    }

    pub fn request_timeouts(&self) -> u64 {
        self.request_timeouts.load(ORDER_TYPE)
    }

    pub fn connection_timeouts(&self) -> u64 {
        self.connection_timeouts.load(ORDER_TYPE)
    }

    pub fn speculative_executions(&self) -> u64 {
        self.speculative_executions.load(ORDER_TYPE)
    }

    pub fn aborted_speculative_executions(&self) -> u64 {
        self.aborted_speculative_executions.load(ORDER_TYPE)
    }

    pub fn speculative_percentage(&self) -> f64 {
        let requests = self.requests();
        if requests == 0 {
            return 0.0;
        }

        self.speculative_executions() as f64 * 100.0 / requests as f64
    }

    /// Latency percentile (0-100) in microseconds, reported as the upper edge of the bucket
    /// the percentile falls into.
    pub fn latency_percentile(&self, percentile: f64) -> Result<u64, MetricsError> {
        Self::percentile(&self.latency.load(), percentile)
    }

    pub fn latency_stats(&self) -> Result<LatencyStats, MetricsError> {
        let histogram = self.latency.load();

        let mut count = 0_u128;
        let mut weighted_sum = 0_u128;
        let mut min = None;
        let mut max = 0;

        for bucket in &histogram {
            if bucket.count() == 0 {
                continue;
            }

            let mid = ((bucket.start() + bucket.end()) / 2) as u128;
            weighted_sum += mid * bucket.count() as u128;
            count += bucket.count() as u128;

            min.get_or_insert(bucket.start());
            max = bucket.end();
        }

        let min = min.ok_or(MetricsError::Empty)?;
        let mean = weighted_sum / count;

        let mut variance_sum = 0_f64;
        for bucket in &histogram {
            if bucket.count() != 0 {
                let mid = ((bucket.start() + bucket.end()) / 2) as f64;
                variance_sum += (mid - mean as f64).powi(2) * bucket.count() as f64;
            }
        }

        Ok(LatencyStats {
            min,
            max,
            mean: mean as u64,
            stddev: (variance_sum / count as f64).sqrt() as u64,
            median: Self::percentile(&histogram, 50.0)?,
            percentile_75th: Self::percentile(&histogram, 75.0)?,
            percentile_95th: Self::percentile(&histogram, 95.0)?,
            percentile_98th: Self::percentile(&histogram, 98.0)?,
            percentile_99th: Self::percentile(&histogram, 99.0)?,
            percentile_999th: Self::percentile(&histogram, 99.9)?,
        })
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            total_connections: self.total_connections(),
            requests: self.requests(),
            errors: self.errors(),
            retries: self.retries(),
            request_timeouts: self.request_timeouts(),
            connection_timeouts: self.connection_timeouts(),
            speculative_executions: self.speculative_executions(),
            aborted_speculative_executions: self.aborted_speculative_executions(),
            speculative_percentage: self.speculative_percentage(),
            latency: self.latency_stats().ok(),
        }
    }

    fn percentile(histogram: &Histogram, percentile: f64) -> Result<u64, MetricsError> {
        match histogram.percentile(percentile) {
            Err(error) => Err(MetricsError::HistogramError(Arc::new(error))),
            Ok(None) => Err(MetricsError::Empty),
            Ok(Some(bucket)) => Ok(bucket.end()),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            total_connections: AtomicI64::new(0),
            requests: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            request_timeouts: AtomicU64::new(0),
            connection_timeouts: AtomicU64::new(0),
            speculative_executions: AtomicU64::new(0),
            aborted_speculative_executions: AtomicU64::new(0),
            latency: AtomicHistogram::new(GROUPING_POWER, MAX_VALUE_POWER)
                .expect("constant histogram parameters are valid"),
        }
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_report_empty_latency() {
        let metrics = Metrics::new();
        assert!(matches!(metrics.latency_stats(), Err(MetricsError::Empty)));
        assert_eq!(metrics.snapshot().latency, None);
        assert_eq!(metrics.speculative_percentage(), 0.0);
    }

    #[test]
    fn should_compute_latency_stats() {
        let metrics = Metrics::new();
        for millis in 1..=100 {
            metrics
                .log_request_latency(Duration::from_millis(millis))
                .unwrap();
        }

        let stats = metrics.latency_stats().unwrap();
        assert!(stats.min <= 1_000);
        assert!(stats.max >= 100_000);
        assert!(stats.mean > 45_000 && stats.mean < 56_000);
        assert!(stats.median >= 49_000 && stats.median <= 52_000);
        assert!(stats.percentile_99th >= 98_000);
        assert!(stats.stddev > 0);
        assert_eq!(metrics.requests(), 100);
    }

    #[test]
    fn should_compute_speculative_percentage() {
        let metrics = Metrics::new();
        for _ in 0..4 {
            metrics
                .log_request_latency(Duration::from_millis(1))
                .unwrap();
        }

        metrics.inc_speculative_executions();
        metrics.inc_aborted_speculative_executions();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.speculative_executions, 1);
        assert_eq!(snapshot.aborted_speculative_executions, 1);
        assert_eq!(snapshot.speculative_percentage, 25.0);
    }
}
