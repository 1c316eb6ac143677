//! RPC client.
//!
//! Provides the main client interface: resilient calls, readiness,
//! health checks, runtime policy updates and graceful shutdown.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::{ClientConfig, ClientConfigBuilder};
use crate::connection::{ConnectionState, ConnectionSupervisor};
use crate::errors::{ErrorKind, RpcError, RpcResult};
use crate::observability::{
    CallMetrics, ClientEvent, DefaultMetricsCollector, EventBus, MetricsCollector,
    DEFAULT_EVENT_CAPACITY,
};
use crate::resilience::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState, RetryContext,
    RetryExecutor, RetryPolicy, RetryPolicyUpdate,
};
use crate::transport::{deadline_after, HttpTransport, Transport, TransportRequest};

/// Metadata key carrying the per-call request id.
pub const REQUEST_ID_METADATA: &str = "x-request-id";

/// Metadata key carrying the 1-based attempt number.
pub const ATTEMPT_METADATA: &str = "x-attempt";

/// The resilient RPC client.
///
/// Every call passes through the retry executor, which consults the circuit
/// breaker before each attempt. The connection supervisor tracks readiness
/// and runs health checks independently of the request path.
///
/// # Example
///
/// ```rust,no_run
/// use integrations_rpc::RpcClient;
/// use std::time::Duration;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let client = RpcClient::builder()
///         .address("sessions.internal:8443")
///         .use_tls(true)
///         .build()?;
///
///     client.wait_for_ready(Duration::from_secs(5)).await?;
///     let reply = client
///         .call("sessions.v1.Sessions/Get", b"{\"id\":\"42\"}".to_vec(), None)
///         .await?;
///     println!("{} bytes", reply.len());
///
///     client.close(Duration::from_secs(10)).await;
///     Ok(())
/// }
/// ```
pub struct RpcClient {
    config: ClientConfig,
    transport: Arc<dyn Transport>,
    breaker: Arc<CircuitBreaker>,
    executor: RetryExecutor,
    retry_policy: RwLock<Arc<RetryPolicy>>,
    supervisor: ConnectionSupervisor,
    events: EventBus,
    metrics: Arc<dyn MetricsCollector>,
}

impl RpcClient {
    /// Creates a new client builder.
    pub fn builder() -> RpcClientBuilder {
        RpcClientBuilder::new()
    }

    /// Creates a client over HTTP from configuration.
    pub fn new(config: ClientConfig) -> RpcResult<Self> {
        RpcClientBuilder::from_config(config).build()
    }

    /// Creates a client from `RPC_*` environment variables.
    pub fn from_env() -> RpcResult<Self> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Calls `method` with an opaque payload.
    ///
    /// `timeout` bounds the whole call, retries and backoff included; the
    /// configured default applies when it is `None`.
    pub async fn call(
        &self,
        method: &str,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> RpcResult<Bytes> {
        let _guard = self.supervisor.begin_call()?;

        if self.supervisor.is_known_unreachable() {
            let err = RpcError::connection(
                "Backend unreachable according to the last health check",
            )
            .with_detail("method", method);
            self.metrics.record_error(err.kind());
            return Err(err);
        }

        let request_id = Uuid::new_v4().to_string();
        let span = tracing::info_span!("rpc_call", method = %method, request_id = %request_id);
        let started = Instant::now();
        let deadline = deadline_after(started, timeout.unwrap_or(self.config.timeout));
        let policy = self.retry_policy();
        let payload = payload.into();

        let result = self
            .executor
            .execute_with_deadline(method, &policy, Some(deadline), |ctx: &RetryContext| {
                let mut request = TransportRequest::new(method, payload.clone(), deadline)
                    .with_metadata(REQUEST_ID_METADATA, request_id.as_str())
                    .with_metadata(ATTEMPT_METADATA, ctx.attempt_number.to_string());
                for (key, value) in &self.config.metadata {
                    request = request.with_metadata(key.as_str(), value.as_str());
                }
                let transport = Arc::clone(&self.transport);
                async move { transport.invoke(request).await }
            })
            .instrument(span.clone())
            .await;

        let elapsed = started.elapsed();
        let _enter = span.enter();
        match &result {
            Ok(response) => {
                tracing::debug!(
                    latency_ms = elapsed.as_millis() as u64,
                    bytes = response.payload.len(),
                    "Call succeeded"
                );
                self.supervisor.mark_ready(true);
                self.metrics.record_call(method, true, elapsed);
            }
            Err(err) => {
                tracing::debug!(
                    latency_ms = elapsed.as_millis() as u64,
                    kind = %err.kind(),
                    "Call failed"
                );
                if lost_connection(err) {
                    self.supervisor.mark_ready(false);
                }
                self.metrics.record_error(err.kind());
                self.metrics.record_call(method, false, elapsed);
            }
        }

        result.map(|response| response.payload)
    }

    /// Calls `method` with a JSON-encoded request and decodes the JSON reply.
    pub async fn call_json<Req, Resp>(
        &self,
        method: &str,
        request: &Req,
        timeout: Option<Duration>,
    ) -> RpcResult<Resp>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let payload = serde_json::to_vec(request)?;
        let reply = self.call(method, payload, timeout).await?;
        serde_json::from_slice(&reply).map_err(|e| {
            RpcError::new(
                ErrorKind::Unknown,
                format!("Failed to decode response from {}: {}", method, e),
            )
            .with_cause(e)
        })
    }

    /// Waits until the backend is ready or `timeout` elapses.
    pub async fn wait_for_ready(&self, timeout: Duration) -> RpcResult<()> {
        self.supervisor.wait_for_ready(timeout).await
    }

    /// Starts periodic health checks. Does nothing if they already run.
    pub fn start_health_checks(&self, interval: Duration) -> RpcResult<()> {
        self.supervisor.start_health_checks(interval)
    }

    /// Stops periodic health checks. Does nothing if they are not running.
    pub async fn stop_health_checks(&self) {
        self.supervisor.stop_health_checks().await;
    }

    /// Runs one health probe now.
    pub async fn check_health(&self) -> bool {
        self.supervisor.check_health().await
    }

    /// Shuts the client down, waiting up to `timeout` for in-flight calls.
    ///
    /// Returns whether every in-flight call finished before the timeout.
    pub async fn close(&self, timeout: Duration) -> bool {
        self.supervisor.close(timeout).await
    }

    /// Returns true while the backend is believed reachable and the client is open.
    pub fn is_connected(&self) -> bool {
        self.supervisor.is_ready() && !self.supervisor.is_closing()
    }

    /// Returns true once `close` has been called.
    pub fn is_closing(&self) -> bool {
        self.supervisor.is_closing()
    }

    /// Returns the current retry policy.
    pub fn retry_policy(&self) -> Arc<RetryPolicy> {
        let policy = self
            .retry_policy
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&policy)
    }

    /// Applies a partial retry policy update.
    ///
    /// Calls already in progress keep the policy they started with.
    pub fn update_retry_policy(&self, update: RetryPolicyUpdate) -> RpcResult<Arc<RetryPolicy>> {
        let mut current = self
            .retry_policy
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let next = Arc::new(current.apply(update)?);
        tracing::info!(policy = ?next, "Retry policy updated");
        *current = Arc::clone(&next);
        Ok(next)
    }

    /// Returns the circuit breaker state.
    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.state()
    }

    /// Returns circuit breaker counters.
    pub fn circuit_stats(&self) -> CircuitBreakerStats {
        self.breaker.stats()
    }

    /// Forces the circuit breaker closed.
    pub fn reset_circuit_breaker(&self) {
        self.breaker.reset();
    }

    /// Replaces the circuit breaker configuration and resets it.
    pub fn reconfigure_circuit_breaker(&self, config: CircuitBreakerConfig) -> RpcResult<()> {
        self.breaker.reconfigure(config)
    }

    /// Returns a snapshot of the connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// Subscribes to client events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }

    /// Returns call metrics.
    pub fn metrics(&self) -> CallMetrics {
        self.metrics.get_metrics()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }
}

fn lost_connection(err: &RpcError) -> bool {
    if err.is_circuit_open() {
        return false;
    }
    let kind = err.last_error().map_or(err.kind(), RpcError::kind);
    kind == ErrorKind::Connection
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("config", &self.config)
            .field("circuit_state", &self.breaker.state())
            .field("connection", &self.supervisor.state())
            .finish()
    }
}

/// Builder for [`RpcClient`].
pub struct RpcClientBuilder {
    config_builder: ClientConfigBuilder,
    config: Option<ClientConfig>,
    transport: Option<Arc<dyn Transport>>,
    metrics: Option<Arc<dyn MetricsCollector>>,
    event_capacity: usize,
    health_checks: bool,
}

impl RpcClientBuilder {
    /// Creates a new client builder.
    pub fn new() -> Self {
        Self {
            config_builder: ClientConfigBuilder::new(),
            config: None,
            transport: None,
            metrics: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            health_checks: false,
        }
    }

    /// Creates a builder from an existing configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config: Some(config),
            ..Self::new()
        }
    }

    /// Sets the target address (`host:port`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.address(address);
        self
    }

    /// Enables or disables TLS.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.config_builder = self.config_builder.use_tls(use_tls);
        self
    }

    /// Sets the default per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.timeout(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.config_builder = self.config_builder.retry_policy(policy);
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.config_builder = self.config_builder.circuit_breaker(config);
        self
    }

    /// Sets the health check interval.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.config_builder = self.config_builder.health_check_interval(interval);
        self
    }

    /// Sets the method invoked by health probes.
    pub fn health_check_method(mut self, method: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.health_check_method(method);
        self
    }

    /// Sets the deadline for a single health probe.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.config_builder = self.config_builder.health_check_timeout(timeout);
        self
    }

    /// Adds metadata sent with every call.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.metadata(key, value);
        self
    }

    /// Sets the bearer token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config_builder = self.config_builder.auth_token(token);
        self
    }

    /// Sets a custom transport.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Sets a custom metrics collector.
    pub fn metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the capacity of the event channel.
    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Starts health checks at the configured interval when the client is built.
    ///
    /// Building then requires a running tokio runtime.
    pub fn with_health_checks(mut self) -> Self {
        self.health_checks = true;
        self
    }

    /// Builds the client.
    pub fn build(self) -> RpcResult<RpcClient> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => self.config_builder.build()?,
        };

        let transport: Arc<dyn Transport> = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::from_config(&config)?),
        };

        let metrics: Arc<dyn MetricsCollector> = self
            .metrics
            .unwrap_or_else(|| Arc::new(DefaultMetricsCollector::new()));
        let events = EventBus::new(self.event_capacity);

        let breaker = Arc::new(CircuitBreaker::with_events(
            config.circuit_breaker.clone(),
            events.clone(),
        ));
        let executor = RetryExecutor::new()
            .with_circuit_breaker(Arc::clone(&breaker))
            .with_events(events.clone())
            .with_metrics(Arc::clone(&metrics));

        let supervisor = ConnectionSupervisor::new(
            Arc::clone(&transport),
            config.health_check_method.clone(),
            config.health_check_timeout,
            events.clone(),
        )
        .with_metrics(Arc::clone(&metrics));

        if self.health_checks {
            supervisor.start_health_checks(config.health_check_interval)?;
        }

        tracing::debug!(address = %config.address, use_tls = config.use_tls, "RPC client built");

        Ok(RpcClient {
            retry_policy: RwLock::new(Arc::new(config.retry_policy.clone())),
            config,
            transport,
            breaker,
            executor,
            supervisor,
            events,
            metrics,
        })
    }
}

impl Default for RpcClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RpcClientBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClientBuilder")
            .field("config", &self.config)
            .field("custom_transport", &self.transport.is_some())
            .field("health_checks", &self.health_checks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{MockOutcome, MockTransport};

    fn client(transport: Arc<MockTransport>) -> RpcClient {
        RpcClient::builder()
            .address("localhost:50051")
            .retry_policy(
                RetryPolicy::new()
                    .initial_backoff(Duration::from_millis(5))
                    .max_backoff(Duration::from_millis(20))
                    .use_jitter(false),
            )
            .transport(transport)
            .build()
            .unwrap()
    }

    #[test]
    fn test_builder_requires_address() {
        let result = RpcClientBuilder::new()
            .transport(Arc::new(MockTransport::new()))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_builder_defaults_to_http_transport() {
        let result = RpcClientBuilder::new().address("localhost:50051").build();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_call_attaches_request_metadata() {
        let transport = Arc::new(MockTransport::new());
        let client = RpcClient::builder()
            .address("localhost:50051")
            .metadata("x-tenant", "acme")
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .build()
            .unwrap();

        client.call("Sessions/Get", "req", None).await.unwrap();

        let call = transport.last_call().unwrap();
        assert_eq!(call.payload, Bytes::from_static(b"req"));
        assert_eq!(call.metadata.get(ATTEMPT_METADATA).map(String::as_str), Some("1"));
        assert_eq!(call.metadata.get("x-tenant").map(String::as_str), Some("acme"));
        assert!(Uuid::parse_str(&call.metadata[REQUEST_ID_METADATA]).is_ok());
    }

    #[tokio::test]
    async fn test_success_marks_ready_and_connection_failure_clears_it() {
        let transport = Arc::new(MockTransport::new());
        let client = client(Arc::clone(&transport));
        assert!(!client.is_connected());

        client.call("Sessions/Get", Bytes::new(), None).await.unwrap();
        assert!(client.is_connected());

        transport.set_default(MockOutcome::connection_refused());
        let err = client.call("Sessions/Get", Bytes::new(), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxRetriesExceeded);
        assert!(!client.is_connected());
    }

    #[tokio::test]
    async fn test_with_health_checks_uses_configured_interval() {
        let transport = Arc::new(MockTransport::new());
        let client = RpcClient::builder()
            .address("localhost:50051")
            .health_check_interval(Duration::from_millis(10))
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .with_health_checks()
            .build()
            .unwrap();
        assert!(client.connection_state().health_checks_running);
        client.stop_health_checks().await;

        let err = RpcClient::builder()
            .address("localhost:50051")
            .health_check_interval(Duration::ZERO)
            .transport(Arc::clone(&transport) as Arc<dyn Transport>)
            .with_health_checks()
            .build()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_zero_interval_ignored_without_auto_start() {
        let client = RpcClient::builder()
            .address("localhost:50051")
            .health_check_interval(Duration::ZERO)
            .transport(Arc::new(MockTransport::new()))
            .build()
            .unwrap();
        assert!(!client.connection_state().health_checks_running);
    }

    #[tokio::test]
    async fn test_unbounded_call_timeout() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockOutcome::ok("pong"));
        let client = client(Arc::clone(&transport));

        let reply = client
            .call("Sessions/Get", Bytes::new(), Some(Duration::MAX))
            .await
            .unwrap();

        assert_eq!(reply, Bytes::from_static(b"pong"));
        assert!(transport.last_call().unwrap().remaining > Duration::from_secs(86_400 * 365));
        assert!(client.close(Duration::MAX).await);
        assert!(client.is_closing());
    }

    #[tokio::test]
    async fn test_update_retry_policy_validates() {
        let client = client(Arc::new(MockTransport::new()));

        let updated = client
            .update_retry_policy(RetryPolicyUpdate {
                max_attempts: Some(5),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(updated.max_attempts, 5);
        assert_eq!(client.retry_policy().max_attempts, 5);

        let err = client
            .update_retry_policy(RetryPolicyUpdate {
                backoff_multiplier: Some(0.5),
                ..Default::default()
            })
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(client.retry_policy().max_attempts, 5);
    }

    #[tokio::test]
    async fn test_call_json_round_trip() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockOutcome::json(&serde_json::json!({"id": "42", "active": true})));
        let client = client(Arc::clone(&transport));

        let reply: serde_json::Value = client
            .call_json("Sessions/Get", &serde_json::json!({"id": "42"}), None)
            .await
            .unwrap();

        assert_eq!(reply["active"], serde_json::json!(true));
        let sent: serde_json::Value =
            serde_json::from_slice(&transport.last_call().unwrap().payload).unwrap();
        assert_eq!(sent["id"], serde_json::json!("42"));
    }

    #[tokio::test]
    async fn test_call_json_undecodable_reply() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockOutcome::ok("not json"));
        let client = client(Arc::clone(&transport));

        let err = client
            .call_json::<_, serde_json::Value>("Sessions/Get", &serde_json::json!({}), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unknown);
    }

    #[tokio::test]
    async fn test_metrics_track_calls() {
        let transport = Arc::new(MockTransport::new());
        transport.queue(MockOutcome::status(
            crate::transport::StatusCode::NotFound,
            "missing",
        ));
        let client = client(Arc::clone(&transport));

        let _ = client.call("Sessions/Get", Bytes::new(), None).await;
        client.call("Sessions/Get", Bytes::new(), None).await.unwrap();

        let metrics = client.metrics();
        assert_eq!(metrics.total_calls, 2);
        assert_eq!(metrics.successful_calls, 1);
        assert_eq!(metrics.errors.get("not_found"), Some(&1));
    }
}
