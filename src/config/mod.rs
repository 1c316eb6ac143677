//! Configuration module for the RPC client.
//!
//! Covers the transport target, the default per-call deadline, retry and
//! circuit breaker settings, and health checking.

use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use url::Url;

use crate::errors::{RpcError, RpcResult};
use crate::resilience::{CircuitBreakerConfig, RetryPolicy};

/// Default per-call deadline (30 seconds).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default interval between health probes (30 seconds).
pub const DEFAULT_HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Default deadline for a single health probe (5 seconds).
pub const DEFAULT_HEALTH_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Default method invoked by health probes.
pub const DEFAULT_HEALTH_CHECK_METHOD: &str = "grpc.health.v1.Health/Check";

/// Configuration for the RPC client.
#[derive(Clone)]
pub struct ClientConfig {
    /// Target address, `host:port`.
    pub address: String,
    /// Whether to connect over TLS.
    pub use_tls: bool,
    /// Default per-call deadline.
    pub timeout: Duration,
    /// Initial retry policy.
    pub retry_policy: RetryPolicy,
    /// Circuit breaker settings.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Interval used when the client builder starts health checks itself.
    /// Must be non-zero in that case; otherwise it is not read.
    pub health_check_interval: Duration,
    /// Method invoked by health probes.
    pub health_check_method: String,
    /// Deadline for a single health probe.
    pub health_check_timeout: Duration,
    /// Metadata attached to every call.
    pub metadata: Vec<(String, String)>,
    /// Optional bearer token (stored securely).
    pub(crate) auth_token: Option<SecretString>,
}

impl ClientConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Creates a configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `RPC_ADDRESS` (required): target `host:port`
    /// - `RPC_USE_TLS` (optional): `true`/`false`
    /// - `RPC_TIMEOUT_MS` (optional): default per-call deadline
    /// - `RPC_MAX_ATTEMPTS` (optional): maximum attempts per call
    /// - `RPC_INITIAL_BACKOFF_MS`, `RPC_MAX_BACKOFF_MS` (optional)
    /// - `RPC_FAILURE_THRESHOLD`, `RPC_RESET_TIMEOUT_MS`, `RPC_SUCCESS_THRESHOLD` (optional)
    /// - `RPC_HEALTH_CHECK_INTERVAL_MS` (optional)
    /// - `RPC_AUTH_TOKEN` (optional): bearer token
    pub fn from_env() -> RpcResult<Self> {
        let address = std::env::var("RPC_ADDRESS")
            .map_err(|_| RpcError::validation("RPC_ADDRESS environment variable not set"))?;

        let mut builder = ClientConfigBuilder::new().address(address);

        if let Some(use_tls) = env_parse::<bool>("RPC_USE_TLS") {
            builder = builder.use_tls(use_tls);
        }
        if let Some(ms) = env_parse::<u64>("RPC_TIMEOUT_MS") {
            builder = builder.timeout(Duration::from_millis(ms));
        }

        let mut policy = RetryPolicy::default();
        if let Some(attempts) = env_parse::<u32>("RPC_MAX_ATTEMPTS") {
            policy = policy.max_attempts(attempts);
        }
        if let Some(ms) = env_parse::<u64>("RPC_INITIAL_BACKOFF_MS") {
            policy = policy.initial_backoff(Duration::from_millis(ms));
        }
        if let Some(ms) = env_parse::<u64>("RPC_MAX_BACKOFF_MS") {
            policy = policy.max_backoff(Duration::from_millis(ms));
        }
        builder = builder.retry_policy(policy);

        let mut breaker = CircuitBreakerConfig::default();
        if let Some(threshold) = env_parse::<u32>("RPC_FAILURE_THRESHOLD") {
            breaker = breaker.failure_threshold(threshold);
        }
        if let Some(ms) = env_parse::<u64>("RPC_RESET_TIMEOUT_MS") {
            breaker = breaker.reset_timeout(Duration::from_millis(ms));
        }
        if let Some(threshold) = env_parse::<u32>("RPC_SUCCESS_THRESHOLD") {
            breaker = breaker.success_threshold(threshold);
        }
        builder = builder.circuit_breaker(breaker);

        if let Some(ms) = env_parse::<u64>("RPC_HEALTH_CHECK_INTERVAL_MS") {
            builder = builder.health_check_interval(Duration::from_millis(ms));
        }
        if let Ok(token) = std::env::var("RPC_AUTH_TOKEN") {
            builder = builder.auth_token(token);
        }

        builder.build()
    }

    /// Returns the base URL calls are sent to.
    pub fn base_url(&self) -> RpcResult<Url> {
        let scheme = if self.use_tls { "https" } else { "http" };
        Ok(Url::parse(&format!("{}://{}/", scheme, self.address))?)
    }

    /// Returns the bearer token, if any.
    pub(crate) fn auth_token(&self) -> Option<&str> {
        self.auth_token.as_ref().map(|t| t.expose_secret().as_str())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RpcResult<()> {
        if self.address.trim().is_empty() {
            return Err(RpcError::validation("address must not be empty"));
        }
        let url = self.base_url()?;
        if url.host_str().is_none() {
            return Err(RpcError::validation(format!(
                "address {} has no host",
                self.address
            )));
        }
        if self.timeout.is_zero() {
            return Err(RpcError::validation("timeout must be greater than 0"));
        }
        if self.health_check_timeout.is_zero() {
            return Err(RpcError::validation(
                "health_check_timeout must be greater than 0",
            ));
        }
        if self.health_check_method.is_empty() {
            return Err(RpcError::validation("health_check_method must not be empty"));
        }
        self.retry_policy.validate()?;
        self.circuit_breaker.validate()?;
        Ok(())
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("address", &self.address)
            .field("use_tls", &self.use_tls)
            .field("timeout", &self.timeout)
            .field("retry_policy", &self.retry_policy)
            .field("circuit_breaker", &self.circuit_breaker)
            .field("health_check_interval", &self.health_check_interval)
            .field("health_check_method", &self.health_check_method)
            .field("health_check_timeout", &self.health_check_timeout)
            .field(
                "auth_token",
                &self.auth_token.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Builder for [`ClientConfig`].
#[derive(Default)]
pub struct ClientConfigBuilder {
    address: Option<String>,
    use_tls: bool,
    timeout: Option<Duration>,
    retry_policy: Option<RetryPolicy>,
    circuit_breaker: Option<CircuitBreakerConfig>,
    health_check_interval: Option<Duration>,
    health_check_method: Option<String>,
    health_check_timeout: Option<Duration>,
    metadata: Vec<(String, String)>,
    auth_token: Option<String>,
}

impl ClientConfigBuilder {
    /// Creates a new configuration builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target address (`host:port`).
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Enables or disables TLS.
    pub fn use_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Sets the default per-call deadline.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// Sets the circuit breaker configuration.
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.circuit_breaker = Some(config);
        self
    }

    /// Sets the health check interval.
    pub fn health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = Some(interval);
        self
    }

    /// Sets the method invoked by health probes.
    pub fn health_check_method(mut self, method: impl Into<String>) -> Self {
        self.health_check_method = Some(method.into());
        self
    }

    /// Sets the deadline for a single health probe.
    pub fn health_check_timeout(mut self, timeout: Duration) -> Self {
        self.health_check_timeout = Some(timeout);
        self
    }

    /// Adds metadata sent with every call.
    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.push((key.into(), value.into()));
        self
    }

    /// Sets the bearer token.
    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    /// Builds and validates the configuration.
    pub fn build(self) -> RpcResult<ClientConfig> {
        let address = self
            .address
            .ok_or_else(|| RpcError::validation("address is required"))?;

        let auth_token = match self.auth_token {
            Some(token) if token.is_empty() => {
                return Err(RpcError::validation("auth token cannot be empty"));
            }
            Some(token) => Some(SecretString::new(token)),
            None => None,
        };

        let config = ClientConfig {
            address: address.trim().to_string(),
            use_tls: self.use_tls,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            retry_policy: self.retry_policy.unwrap_or_default(),
            circuit_breaker: self.circuit_breaker.unwrap_or_default(),
            health_check_interval: self
                .health_check_interval
                .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL),
            health_check_method: self
                .health_check_method
                .unwrap_or_else(|| DEFAULT_HEALTH_CHECK_METHOD.to_string()),
            health_check_timeout: self
                .health_check_timeout
                .unwrap_or(DEFAULT_HEALTH_CHECK_TIMEOUT),
            metadata: self.metadata,
            auth_token,
        };

        config.validate()?;
        Ok(config)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            tracing::warn!(variable = name, "Ignoring unparseable environment variable");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_config_builder_defaults() {
        let config = ClientConfig::builder()
            .address("localhost:50051")
            .build()
            .unwrap();

        assert_eq!(config.address, "localhost:50051");
        assert!(!config.use_tls);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.retry_policy.max_attempts, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.health_check_method, DEFAULT_HEALTH_CHECK_METHOD);
    }

    #[test]
    fn test_config_requires_address() {
        let err = ClientConfig::builder().build().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_config_rejects_zero_timeout() {
        let result = ClientConfig::builder()
            .address("localhost:50051")
            .timeout(Duration::ZERO)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_config_rejects_invalid_policy() {
        let result = ClientConfig::builder()
            .address("localhost:50051")
            .retry_policy(RetryPolicy::new().max_attempts(0))
            .build();
        assert!(result.is_err());

        let result = ClientConfig::builder()
            .address("localhost:50051")
            .circuit_breaker(CircuitBreakerConfig::new().failure_threshold(0))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_base_url_scheme_follows_tls() {
        let plain = ClientConfig::builder()
            .address("svc.internal:8080")
            .build()
            .unwrap();
        assert_eq!(plain.base_url().unwrap().as_str(), "http://svc.internal:8080/");

        let tls = ClientConfig::builder()
            .address("svc.internal:8443")
            .use_tls(true)
            .build()
            .unwrap();
        assert_eq!(tls.base_url().unwrap().scheme(), "https");
    }

    #[test]
    fn test_config_debug_redacts_token() {
        let config = ClientConfig::builder()
            .address("localhost:50051")
            .auth_token("super-secret-token")
            .build()
            .unwrap();

        let debug = format!("{:?}", config);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
        assert_eq!(config.auth_token(), Some("super-secret-token"));
    }

    #[test]
    fn test_empty_token_rejected() {
        let result = ClientConfig::builder()
            .address("localhost:50051")
            .auth_token("")
            .build();
        assert!(result.is_err());
    }
}
