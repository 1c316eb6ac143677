//! Resilient RPC Client Core
//!
//! A resilience layer between application code and a remote service reached
//! through an RPC transport that may fail, time out, overload or disappear.
//!
//! # Features
//!
//! - **Error Taxonomy**: every failure is classified into one [`ErrorKind`]
//! - **Retries**: exponential backoff with jitter, per-kind retryability
//! - **Circuit Breaker**: stops retry storms against a failing backend
//! - **Connection Supervision**: readiness, periodic health checks, graceful close
//! - **Observability**: tracing spans, metrics, lifecycle events
//! - **Async/Await**: built on Tokio, safe for concurrent callers
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use integrations_rpc::{RpcClient, RetryPolicy};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RpcClient::builder()
//!         .address("sessions.internal:8443")
//!         .use_tls(true)
//!         .timeout(Duration::from_secs(5))
//!         .retry_policy(RetryPolicy::new().max_attempts(4))
//!         .build()?;
//!
//!     client.start_health_checks(Duration::from_secs(15))?;
//!     client.wait_for_ready(Duration::from_secs(10)).await?;
//!
//!     let session: serde_json::Value = client
//!         .call_json("sessions.v1.Sessions/Get", &serde_json::json!({"id": "42"}), None)
//!         .await?;
//!     println!("{}", session);
//!
//!     client.close(Duration::from_secs(10)).await;
//!     Ok(())
//! }
//! ```
//!
//! # Custom Transports
//!
//! Any type implementing [`Transport`] can replace the bundled HTTP transport:
//!
//! ```rust,no_run
//! use integrations_rpc::mocks::{MockOutcome, MockTransport};
//! use integrations_rpc::RpcClient;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), integrations_rpc::RpcError> {
//! let transport = Arc::new(MockTransport::new());
//! transport.queue(MockOutcome::unavailable());
//!
//! let client = RpcClient::builder()
//!     .address("localhost:50051")
//!     .transport(transport)
//!     .build()?;
//! client.call("Sessions/Get", Vec::new(), None).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod observability;
pub mod resilience;
pub mod transport;

/// Mock implementations for testing.
pub mod mocks;

// Re-exports for convenience
pub use client::{RpcClient, RpcClientBuilder};
pub use config::{ClientConfig, ClientConfigBuilder};
pub use connection::{ConnectionState, ConnectionSupervisor};
pub use errors::{classify, ErrorKind, RpcError, RpcResult};
pub use observability::{init_tracing, CallMetrics, ClientEvent, LogConfig, LogLevel, MetricsCollector};
pub use resilience::{
    Backoff, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
    RetryContext, RetryExecutor, RetryObserver, RetryPolicy, RetryPolicyUpdate,
};
pub use transport::{
    HttpTransport, RawFailure, StatusCode, Transport, TransportRequest, TransportResponse,
};
