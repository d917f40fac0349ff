//! Metrics collection for the resilience layer.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::{CircuitBreakerHook, CircuitState};

/// Metrics collector interface.
pub trait MetricsCollector: Send + Sync {
    /// Records that an attempt was started.
    fn record_attempt(&self, operation: &str);

    /// Records a call that eventually succeeded after `attempts` attempts.
    fn record_success(&self, operation: &str, attempts: u32);

    /// Records a scheduled retry and its backoff delay.
    fn record_retry(&self, operation: &str, delay: Duration);

    /// Records a call that ran out of attempts.
    fn record_exhausted(&self, operation: &str, attempts: u32);

    /// Records a call that failed with a non-retryable error.
    fn record_permanent_failure(&self, operation: &str);

    /// Records a call rejected by an open circuit.
    fn record_circuit_rejection(&self, operation: &str);

    /// Records a call cancelled while backing off.
    fn record_cancellation(&self, operation: &str);

    /// Records a circuit breaker state transition.
    fn record_state_change(&self, breaker: &str, new_state: CircuitState);

    /// Gets current metrics.
    fn get_metrics(&self) -> ResilienceMetrics;

    /// Resets all metrics.
    fn reset(&self);
}

/// Resilience metrics snapshot.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResilienceMetrics {
    /// Attempts started, including retries.
    pub attempts: u64,
    /// Calls that returned a success.
    pub successes: u64,
    /// Retries scheduled.
    pub retries: u64,
    /// Sum of all backoff delays in milliseconds.
    pub total_backoff_ms: u64,
    /// Calls that exhausted their attempts.
    pub exhausted: u64,
    /// Calls that failed permanently.
    pub permanent_failures: u64,
    /// Calls rejected by an open circuit.
    pub circuit_rejections: u64,
    /// Calls cancelled during backoff.
    pub cancellations: u64,
    /// Attempts per operation.
    pub operations: HashMap<String, u64>,
    /// Transitions into each breaker state.
    pub state_changes: HashMap<CircuitState, u64>,
}

impl ResilienceMetrics {
    /// Average number of attempts per successful call.
    pub fn attempts_per_success(&self) -> f64 {
        if self.successes == 0 {
            0.0
        } else {
            self.attempts as f64 / self.successes as f64
        }
    }
}

/// In-memory metrics collector backed by atomic counters.
pub struct InMemoryMetricsCollector {
    attempts: AtomicU64,
    successes: AtomicU64,
    retries: AtomicU64,
    total_backoff_ms: AtomicU64,
    exhausted: AtomicU64,
    permanent_failures: AtomicU64,
    circuit_rejections: AtomicU64,
    cancellations: AtomicU64,
    operations: RwLock<HashMap<String, u64>>,
    state_changes: RwLock<HashMap<CircuitState, u64>>,
}

impl InMemoryMetricsCollector {
    /// Creates a new metrics collector.
    pub fn new() -> Self {
        Self {
            attempts: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            total_backoff_ms: AtomicU64::new(0),
            exhausted: AtomicU64::new(0),
            permanent_failures: AtomicU64::new(0),
            circuit_rejections: AtomicU64::new(0),
            cancellations: AtomicU64::new(0),
            operations: RwLock::new(HashMap::new()),
            state_changes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryMetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector for InMemoryMetricsCollector {
    fn record_attempt(&self, operation: &str) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        *self
            .operations
            .write()
            .entry(operation.to_string())
            .or_insert(0) += 1;
    }

    fn record_success(&self, _operation: &str, _attempts: u32) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_retry(&self, _operation: &str, delay: Duration) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.total_backoff_ms
            .fetch_add(delay.as_millis() as u64, Ordering::Relaxed);
    }

    fn record_exhausted(&self, _operation: &str, _attempts: u32) {
        self.exhausted.fetch_add(1, Ordering::Relaxed);
    }

    fn record_permanent_failure(&self, _operation: &str) {
        self.permanent_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn record_circuit_rejection(&self, _operation: &str) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancellation(&self, _operation: &str) {
        self.cancellations.fetch_add(1, Ordering::Relaxed);
    }

    fn record_state_change(&self, _breaker: &str, new_state: CircuitState) {
        *self.state_changes.write().entry(new_state).or_insert(0) += 1;
    }

    fn get_metrics(&self) -> ResilienceMetrics {
        ResilienceMetrics {
            attempts: self.attempts.load(Ordering::Relaxed),
            successes: self.successes.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            total_backoff_ms: self.total_backoff_ms.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            permanent_failures: self.permanent_failures.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            cancellations: self.cancellations.load(Ordering::Relaxed),
            operations: self.operations.read().clone(),
            state_changes: self.state_changes.read().clone(),
        }
    }

    fn reset(&self) {
        self.attempts.store(0, Ordering::Relaxed);
        self.successes.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        self.total_backoff_ms.store(0, Ordering::Relaxed);
        self.exhausted.store(0, Ordering::Relaxed);
        self.permanent_failures.store(0, Ordering::Relaxed);
        self.circuit_rejections.store(0, Ordering::Relaxed);
        self.cancellations.store(0, Ordering::Relaxed);
        self.operations.write().clear();
        self.state_changes.write().clear();
    }
}

impl std::fmt::Debug for InMemoryMetricsCollector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMetricsCollector")
            .field("attempts", &self.attempts.load(Ordering::Relaxed))
            .field("successes", &self.successes.load(Ordering::Relaxed))
            .field("retries", &self.retries.load(Ordering::Relaxed))
            .finish()
    }
}

/// Metrics collector that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsCollector;

impl MetricsCollector for NoopMetricsCollector {
    fn record_attempt(&self, _operation: &str) {}
    fn record_success(&self, _operation: &str, _attempts: u32) {}
    fn record_retry(&self, _operation: &str, _delay: Duration) {}
    fn record_exhausted(&self, _operation: &str, _attempts: u32) {}
    fn record_permanent_failure(&self, _operation: &str) {}
    fn record_circuit_rejection(&self, _operation: &str) {}
    fn record_cancellation(&self, _operation: &str) {}
    fn record_state_change(&self, _breaker: &str, _new_state: CircuitState) {}

    fn get_metrics(&self) -> ResilienceMetrics {
        ResilienceMetrics::default()
    }

    fn reset(&self) {}
}

/// Forwards circuit breaker transitions to a [`MetricsCollector`].
pub struct MetricsBreakerHook {
    metrics: Arc<dyn MetricsCollector>,
}

impl MetricsBreakerHook {
    /// Creates a hook that reports into `metrics`.
    pub fn new(metrics: Arc<dyn MetricsCollector>) -> Self {
        Self { metrics }
    }
}

impl CircuitBreakerHook for MetricsBreakerHook {
    fn on_state_change(&self, name: &str, _old: CircuitState, new: CircuitState) {
        self.metrics.record_state_change(name, new);
    }
}

impl std::fmt::Debug for MetricsBreakerHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsBreakerHook").finish_non_exhaustive()
    }
}
