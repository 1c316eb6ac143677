//! Resilience layer for the RPC client.
//!
//! Provides exponential backoff, retry policies and a circuit breaker.
//! [`RetryExecutor`] composes them around a single call.

mod backoff;
mod circuit_breaker;
mod retry;

pub use backoff::Backoff;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState};
pub use retry::{
    RetryContext, RetryExecutor, RetryObserver, RetryPolicy, RetryPolicyUpdate, RetryPredicate,
};
