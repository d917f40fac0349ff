//! Observability for the Langbase client.
//!
//! Structured logging setup and resilience metrics. Events themselves are
//! emitted through `tracing` by the executor, the circuit breakers and the
//! client.

mod logging;
mod metrics;

pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use metrics::{
    InMemoryMetricsCollector, MetricsBreakerHook, MetricsCollector, NoopMetricsCollector,
    ResilienceMetrics,
};
