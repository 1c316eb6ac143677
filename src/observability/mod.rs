//! Observability module for the RPC client.
//!
//! Logging goes through `tracing`; metrics and lifecycle events are exposed
//! through the collector trait and the event bus.

mod events;
mod logging;
mod metrics;

pub use events::{ClientEvent, EventBus, DEFAULT_EVENT_CAPACITY};
pub use logging::{init_tracing, redact_sensitive, LogConfig, LogLevel};
pub use metrics::{CallMetrics, DefaultMetricsCollector, MetricsCollector};
