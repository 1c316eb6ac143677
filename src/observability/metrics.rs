//! Metrics collection for the RPC client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use crate::errors::ErrorKind;

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records a completed logical call.
    fn record_call(&self, method: &str, success: bool, duration: Duration);

    /// Records a scheduled retry.
    fn record_retry(&self, method: &str);

    /// Records a terminal error by kind.
    fn record_error(&self, kind: ErrorKind);

    /// Records a call rejected by the open circuit.
    fn record_circuit_rejection(&self);

    /// Records a health probe result.
    fn record_health_check(&self, ok: bool);

    /// Gets current metrics.
    fn get_metrics(&self) -> CallMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Call metrics snapshot.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct CallMetrics {
    /// Total logical calls.
    pub total_calls: u64,
    /// Successful calls.
    pub successful_calls: u64,
    /// Failed calls.
    pub failed_calls: u64,
    /// Total call latency in milliseconds.
    pub total_latency_ms: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Calls rejected by the open circuit.
    pub circuit_rejections: u64,
    /// Health probes that succeeded.
    pub health_checks_ok: u64,
    /// Health probes that failed.
    pub health_checks_failed: u64,
    /// Calls per method.
    pub methods: HashMap<String, u64>,
    /// Retries per method.
    pub retries_by_method: HashMap<String, u64>,
    /// Terminal errors by kind.
    pub errors: HashMap<String, u64>,
}

impl CallMetrics {
    /// Calculates average latency in milliseconds.
    pub fn average_latency_ms(&self) -> f64 {
        if self.total_calls == 0 {
            0.0
        } else {
            self.total_latency_ms as f64 / self.total_calls as f64
        }
    }

    /// Calculates success rate as a percentage.
    pub fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            100.0
        } else {
            (self.successful_calls as f64 / self.total_calls as f64) * 100.0
        }
    }
}

/// Default metrics collector implementation.
pub struct DefaultMetricsCollector {
    total_calls: AtomicU64,
    successful_calls: AtomicU64,
    failed_calls: AtomicU64,
    total_latency_ms: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
    health_checks_ok: AtomicU64,
    health_checks_failed: AtomicU64,
    methods: RwLock<HashMap<String, u64>>,
    retries_by_method: RwLock<HashMap<String, u64>>,
    errors: RwLock<HashMap<String, u64>>,
}

impl DefaultMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            total_calls: AtomicU64::new(0),
            successful_calls: AtomicU64::new(0),
            failed_calls: AtomicU64::new(0),
            total_latency_ms: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            health_checks_ok: AtomicU64::new(0),
            health_checks_failed: AtomicU64::new(0),
            methods: RwLock::new(HashMap::new()),
            retries_by_method: RwLock::new(HashMap::new()),
            errors: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for DefaultMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for DefaultMetricsCollector {
    fn record_call(&self, method: &str, success: bool, duration: Duration) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);

        if success {
            self.successful_calls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_calls.fetch_add(1, Ordering::Relaxed);
        }

        self.total_latency_ms
            .fetch_add(duration.as_millis() as u64, Ordering::Relaxed);

        if let Ok(mut methods) = self.methods.write() {
            *methods.entry(method.to_string()).or_insert(0) += 1;
        }
    }

    fn record_retry(&self, method: &str) {
        self.retries.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut retries) = self.retries_by_method.write() {
            *retries.entry(method.to_string()).or_insert(0) += 1;
        }
    }

    fn record_error(&self, kind: ErrorKind) {
        if let Ok(mut errors) = self.errors.write() {
            *errors.entry(kind.as_str().to_string()).or_insert(0) += 1;
        }
    }

    fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_health_check(&self, ok: bool) {
        if ok {
            self.health_checks_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.health_checks_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn get_metrics(&self) -> CallMetrics {
        CallMetrics {
            total_calls: self.total_calls.load(Ordering::Relaxed),
            successful_calls: self.successful_calls.load(Ordering::Relaxed),
            failed_calls: self.failed_calls.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            health_checks_ok: self.health_checks_ok.load(Ordering::Relaxed),
            health_checks_failed: self.health_checks_failed.load(Ordering::Relaxed),
            methods: self.methods.read().map(|m| m.clone()).unwrap_or_default(),
            retries_by_method: self
                .retries_by_method
                .read()
                .map(|r| r.clone())
                .unwrap_or_default(),
            errors: self.errors.read().map(|e| e.clone()).unwrap_or_default(),
        }
    }

    fn reset(&self) {
        self.total_calls.store(0, Ordering::Relaxed);
        self.successful_calls.store(0, Ordering::Relaxed);
        self.failed_calls.store(0, Ordering::Relaxed);
        self.total_latency_ms.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.circuit_rejections.store(0, Ordering::Relaxed);
        self.health_checks_ok.store(0, Ordering::Relaxed);
        self.health_checks_failed.store(0, Ordering::Relaxed);

        if let Ok(mut methods) = self.methods.write() {
            methods.clear();
        }
        if let Ok(mut retries) = self.retries_by_method.write() {
            retries.clear();
        }
        if let Ok(mut errors) = self.errors.write() {
            errors.clear();
        }
    }
}

impl std::fmt::Debug for DefaultMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultMetricsCollector")
            .field("total_calls", &self.total_calls.load(Ordering::Relaxed))
            .field("successful_calls", &self.successful_calls.load(Ordering::Relaxed))
            .field("failed_calls", &self.failed_calls.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_call() {
        let collector = DefaultMetricsCollector::new();

        collector.record_call("Session/Get", true, Duration::from_millis(100));
        collector.record_call("Session/Get", true, Duration::from_millis(200));
        collector.record_call("Node/Create", false, Duration::from_millis(50));

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_calls, 3);
        assert_eq!(metrics.successful_calls, 2);
        assert_eq!(metrics.failed_calls, 1);
        assert_eq!(metrics.total_latency_ms, 350);
        assert_eq!(metrics.methods.get("Session/Get"), Some(&2));
    }

    #[test]
    fn test_errors_keyed_by_kind() {
        let collector = DefaultMetricsCollector::new();

        collector.record_error(ErrorKind::Timeout);
        collector.record_error(ErrorKind::Timeout);
        collector.record_error(ErrorKind::MaxRetriesExceeded);

        let metrics = collector.get_metrics();
        assert_eq!(metrics.errors.get("timeout"), Some(&2));
        assert_eq!(metrics.errors.get("max_retries_exceeded"), Some(&1));
    }

    #[test]
    fn test_retries_counted_per_method() {
        let collector = DefaultMetricsCollector::new();

        collector.record_retry("Session/Get");
        collector.record_retry("Session/Get");
        collector.record_retry("Node/Create");

        let metrics = collector.get_metrics();
        assert_eq!(metrics.retries, 3);
        assert_eq!(metrics.retries_by_method.get("Session/Get"), Some(&2));
        assert_eq!(metrics.retries_by_method.get("Node/Create"), Some(&1));
    }

    #[test]
    fn test_success_rate() {
        let collector = DefaultMetricsCollector::new();

        collector.record_call("m", true, Duration::from_millis(100));
        collector.record_call("m", false, Duration::from_millis(100));

        let metrics = collector.get_metrics();
        assert!((metrics.success_rate() - 50.0).abs() < 0.1);
        assert!((metrics.average_latency_ms() - 100.0).abs() < 0.1);
    }

    #[test]
    fn test_reset() {
        let collector = DefaultMetricsCollector::new();

        collector.record_call("m", true, Duration::from_millis(100));
        collector.record_retry("m");
        collector.record_circuit_rejection();
        collector.record_health_check(false);

        collector.reset();

        let metrics = collector.get_metrics();
        assert_eq!(metrics.total_calls, 0);
        assert_eq!(metrics.retries, 0);
        assert_eq!(metrics.circuit_rejections, 0);
        assert_eq!(metrics.health_checks_failed, 0);
        assert!(metrics.methods.is_empty());
        assert!(metrics.retries_by_method.is_empty());
    }
}
