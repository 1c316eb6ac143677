//! Retry policy and executor.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::instrument;

use super::backoff::Backoff;
use super::circuit_breaker::CircuitBreaker;
use crate::errors::{ErrorKind, RpcError, RpcResult};
use crate::observability::{ClientEvent, EventBus, MetricsCollector};
use crate::transport::deadline_after;

/// Observer notified before every retry.
pub trait RetryObserver: Send + Sync {
    /// Called with the failed attempt's error, its 1-based number and the delay
    /// before the next attempt.
    fn on_retry(&self, error: &RpcError, attempt: u32, delay: Duration);
}

impl<F> RetryObserver for F
where
    F: Fn(&RpcError, u32, Duration) + Send + Sync,
{
    fn on_retry(&self, error: &RpcError, attempt: u32, delay: Duration) {
        self(error, attempt, delay);
    }
}

/// Retryability override.
pub type RetryPredicate = Arc<dyn Fn(ErrorKind) -> bool + Send + Sync>;

/// Retry policy with exponential backoff.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay after the first failed attempt.
    pub initial_backoff: Duration,
    /// Upper bound for any delay.
    pub max_backoff: Duration,
    /// Delay multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter.
    pub use_jitter: bool,
    /// Overrides the default retryability of error kinds.
    pub is_retryable: Option<RetryPredicate>,
    /// Notified before every retry.
    pub on_retry: Option<Arc<dyn RetryObserver>>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            use_jitter: true,
            is_retryable: None,
            on_retry: None,
        }
    }
}

impl RetryPolicy {
    /// Creates a new retry policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum number of attempts.
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the initial backoff.
    pub fn initial_backoff(mut self, delay: Duration) -> Self {
        self.initial_backoff = delay;
        self
    }

    /// Sets the maximum backoff.
    pub fn max_backoff(mut self, delay: Duration) -> Self {
        self.max_backoff = delay;
        self
    }

    /// Sets the multiplier.
    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Sets whether to use jitter.
    pub fn use_jitter(mut self, jitter: bool) -> Self {
        self.use_jitter = jitter;
        self
    }

    /// Overrides which error kinds are retried.
    pub fn retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(ErrorKind) -> bool + Send + Sync + 'static,
    {
        self.is_retryable = Some(Arc::new(predicate));
        self
    }

    /// Sets the retry observer.
    pub fn on_retry<O: RetryObserver + 'static>(mut self, observer: O) -> Self {
        self.on_retry = Some(Arc::new(observer));
        self
    }

    /// Creates a policy that makes a single attempt.
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Validates the policy.
    pub fn validate(&self) -> RpcResult<()> {
        if self.max_attempts < 1 {
            return Err(RpcError::validation("retry_policy.max_attempts must be at least 1"));
        }
        if self.initial_backoff.is_zero() {
            return Err(RpcError::validation(
                "retry_policy.initial_backoff must be greater than 0",
            ));
        }
        if self.max_backoff < self.initial_backoff {
            return Err(RpcError::validation(
                "retry_policy.max_backoff must not be less than initial_backoff",
            ));
        }
        if !(self.backoff_multiplier.is_finite() && self.backoff_multiplier > 1.0) {
            return Err(RpcError::validation(
                "retry_policy.backoff_multiplier must be greater than 1",
            ));
        }
        Ok(())
    }

    /// Returns true if an error of `kind` should be retried under this policy.
    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        match &self.is_retryable {
            Some(predicate) => predicate(kind),
            None => kind.is_retryable_by_default(),
        }
    }

    /// Returns the backoff parameters of this policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            self.initial_backoff,
            self.max_backoff,
            self.backoff_multiplier,
            self.use_jitter,
        )
    }

    /// Applies a partial update, validating the result.
    pub fn apply(&self, update: RetryPolicyUpdate) -> RpcResult<Self> {
        let mut next = self.clone();
        if let Some(v) = update.max_attempts {
            next.max_attempts = v;
        }
        if let Some(v) = update.initial_backoff {
            next.initial_backoff = v;
        }
        if let Some(v) = update.max_backoff {
            next.max_backoff = v;
        }
        if let Some(v) = update.backoff_multiplier {
            next.backoff_multiplier = v;
        }
        if let Some(v) = update.use_jitter {
            next.use_jitter = v;
        }
        if let Some(v) = update.on_retry {
            next.on_retry = Some(v);
        }
        next.validate()?;
        Ok(next)
    }
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("use_jitter", &self.use_jitter)
            .field("is_retryable", &self.is_retryable.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Partial retry policy update.
#[derive(Clone, Default)]
pub struct RetryPolicyUpdate {
    /// New maximum number of attempts.
    pub max_attempts: Option<u32>,
    /// New initial backoff.
    pub initial_backoff: Option<Duration>,
    /// New maximum backoff.
    pub max_backoff: Option<Duration>,
    /// New multiplier.
    pub backoff_multiplier: Option<f64>,
    /// New jitter setting.
    pub use_jitter: Option<bool>,
    /// New retry observer.
    pub on_retry: Option<Arc<dyn RetryObserver>>,
}

impl fmt::Debug for RetryPolicyUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicyUpdate")
            .field("max_attempts", &self.max_attempts)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("use_jitter", &self.use_jitter)
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

/// Per-call retry state. Owned by a single executor invocation.
#[derive(Debug)]
pub struct RetryContext {
    /// Current attempt number, starting at 1.
    pub attempt_number: u32,
    /// When the call started.
    pub started_at: Instant,
    /// Errors of prior attempts, oldest first.
    pub history: Vec<RpcError>,
}

impl RetryContext {
    fn new() -> Self {
        Self {
            attempt_number: 1,
            started_at: Instant::now(),
            history: Vec::new(),
        }
    }
}

/// Executes operations with retries, backoff and circuit breaking.
#[derive(Clone, Default)]
pub struct RetryExecutor {
    breaker: Option<Arc<CircuitBreaker>>,
    events: Option<EventBus>,
    metrics: Option<Arc<dyn MetricsCollector>>,
}

impl RetryExecutor {
    /// Creates an executor without a circuit breaker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Guards every attempt with `breaker`.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Publishes retry events on `events`.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    /// Records retries and circuit rejections in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Runs `operation` under `policy`, without an overall deadline.
    pub async fn execute<F, Fut, T, E>(&self, policy: &RetryPolicy, operation: F) -> RpcResult<T>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RpcError>,
    {
        self.execute_with_deadline("operation", policy, None, operation)
            .await
    }

    /// Runs `operation` under `policy` until it succeeds, fails terminally,
    /// exhausts its attempts, is rejected by the breaker, or hits `deadline`.
    #[instrument(skip(self, policy, operation), fields(max_attempts = policy.max_attempts))]
    pub async fn execute_with_deadline<F, Fut, T, E>(
        &self,
        method: &str,
        policy: &RetryPolicy,
        deadline: Option<Instant>,
        mut operation: F,
    ) -> RpcResult<T>
    where
        F: FnMut(&RetryContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<RpcError>,
    {
        let backoff = policy.backoff();
        let max_attempts = policy.max_attempts.max(1);
        let mut ctx = RetryContext::new();

        loop {
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    return Err(deadline_error(&ctx, method));
                }
            }

            if let Some(breaker) = &self.breaker {
                if let Err(err) = breaker.check() {
                    tracing::debug!(attempt = ctx.attempt_number, "Circuit open, rejecting call");
                    if let Some(metrics) = &self.metrics {
                        metrics.record_circuit_rejection();
                    }
                    return Err(err);
                }
            }

            let outcome = match deadline {
                Some(deadline) => {
                    match tokio::time::timeout_at(deadline.into(), operation(&ctx)).await {
                        Ok(result) => result.map_err(Into::into),
                        Err(_) => Err(RpcError::timeout(format!(
                            "Call deadline elapsed during attempt {} of {}",
                            ctx.attempt_number, method
                        ))),
                    }
                }
                None => operation(&ctx).await.map_err(Into::into),
            };

            let err = match outcome {
                Ok(value) => {
                    self.record(None);
                    return Ok(value);
                }
                Err(err) => err,
            };
            self.record(Some(&err));

            if !policy.should_retry(err.kind()) {
                tracing::debug!(attempt = ctx.attempt_number, kind = %err.kind(), "Non-retryable error");
                return Err(err);
            }

            if ctx.attempt_number >= max_attempts {
                tracing::warn!(
                    attempts = ctx.attempt_number,
                    kind = %err.kind(),
                    "Retries exhausted"
                );
                return Err(RpcError::max_retries_exceeded(ctx.attempt_number, err));
            }

            let mut delay = backoff.delay(ctx.attempt_number - 1);
            if let Some(retry_after) = err.retry_after() {
                delay = delay.max(retry_after.min(policy.max_backoff));
            }

            tracing::info!(
                attempt = ctx.attempt_number,
                max_attempts = max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retrying after error"
            );

            if let Some(observer) = &policy.on_retry {
                observer.on_retry(&err, ctx.attempt_number, delay);
            }
            if let Some(events) = &self.events {
                events.publish(ClientEvent::Retrying {
                    method: method.to_string(),
                    attempt: ctx.attempt_number,
                    delay,
                    kind: err.kind(),
                });
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_retry(method);
            }

            ctx.history.push(err);

            let wake_at = deadline_after(Instant::now(), delay);
            match deadline {
                Some(deadline) if deadline <= wake_at => {
                    tokio::time::sleep_until(deadline.into()).await;
                    return Err(deadline_error(&ctx, method));
                }
                _ => tokio::time::sleep_until(wake_at.into()).await,
            }

            ctx.attempt_number += 1;
        }
    }

    fn record(&self, error: Option<&RpcError>) {
        let Some(breaker) = &self.breaker else {
            return;
        };
        match error {
            Some(err) if err.kind().is_breaker_failure() => breaker.record_failure(),
            _ => breaker.record_success(),
        }
    }
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("circuit_breaker", &self.breaker.is_some())
            .field("events", &self.events.is_some())
            .finish()
    }
}

fn deadline_error(ctx: &RetryContext, method: &str) -> RpcError {
    let mut err = RpcError::timeout(format!(
        "Call deadline exceeded for {} after {} attempt(s)",
        method,
        ctx.history.len().max(1)
    ))
    .with_detail("elapsed_ms", ctx.started_at.elapsed().as_millis() as u64);
    if let Some(last) = ctx.history.last() {
        err = err.with_cause(last.clone());
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, CircuitState};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new()
            .max_attempts(max_attempts)
            .initial_backoff(Duration::from_millis(5))
            .max_backoff(Duration::from_millis(20))
            .use_jitter(false)
    }

    fn failing(kind: ErrorKind) -> impl FnMut(&RetryContext) -> std::future::Ready<Result<(), RpcError>> {
        move |_| std::future::ready(Err(RpcError::new(kind, "boom")))
    }

    #[tokio::test]
    async fn test_retry_success_first_attempt() {
        let executor = RetryExecutor::new();

        let result = executor
            .execute(&RetryPolicy::default(), |_| async { Ok::<_, RpcError>("success") })
            .await;

        assert_eq!(result.unwrap(), "success");
    }

    #[tokio::test]
    async fn test_retry_success_after_failures() {
        let executor = RetryExecutor::new();
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = Arc::clone(&attempts);

        let result = executor
            .execute(&fast_policy(3), |ctx| {
                let attempts = Arc::clone(&attempts_clone);
                let attempt_number = ctx.attempt_number;
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    if attempt_number < 3 {
                        Err(RpcError::new(ErrorKind::ServiceUnavailable, "down"))
                    } else {
                        Ok("success")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "success");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_short_circuits() {
        let executor = RetryExecutor::new();
        let attempts = AtomicU32::new(0);
        let retries = Arc::new(AtomicU32::new(0));
        let retries_clone = Arc::clone(&retries);
        let policy = fast_policy(5).on_retry(move |_: &RpcError, _: u32, _: Duration| {
            retries_clone.fetch_add(1, Ordering::SeqCst);
        });

        let result = executor
            .execute(&policy, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::validation("bad field")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(retries.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let executor = RetryExecutor::new();
        let attempts = AtomicU32::new(0);

        let result = executor
            .execute(&fast_policy(3), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::timeout("slow")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MaxRetriesExceeded);
        assert_eq!(err.attempt_count(), Some(3));
        assert_eq!(err.last_error().map(RpcError::kind), Some(ErrorKind::Timeout));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_on_retry_receives_attempt_and_delay() {
        let executor = RetryExecutor::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let policy = fast_policy(3).on_retry(move |err: &RpcError, attempt: u32, delay: Duration| {
            seen_clone.lock().unwrap().push((err.kind(), attempt, delay));
        });

        let _ = executor.execute(&policy, failing(ErrorKind::Connection)).await;

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                (ErrorKind::Connection, 1, Duration::from_millis(5)),
                (ErrorKind::Connection, 2, Duration::from_millis(10)),
            ]
        );
    }

    #[tokio::test]
    async fn test_history_accumulates_prior_errors() {
        let executor = RetryExecutor::new();
        let history_lengths = Mutex::new(Vec::new());

        let _ = executor
            .execute(&fast_policy(3), |ctx| {
                history_lengths.lock().unwrap().push(ctx.history.len());
                async { Err::<(), _>(RpcError::connection("refused")) }
            })
            .await;

        assert_eq!(*history_lengths.lock().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn test_policy_override_controls_retryability() {
        let executor = RetryExecutor::new();
        let attempts = AtomicU32::new(0);
        let policy = fast_policy(3).retry_if(|kind| kind == ErrorKind::Aborted);

        let result = executor
            .execute(&policy, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::new(ErrorKind::Aborted, "conflict")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::MaxRetriesExceeded);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);

        attempts.store(0, Ordering::SeqCst);
        let result = executor
            .execute(&policy, |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::timeout("slow")) }
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_circuit_rejects_without_attempt() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new().failure_threshold(1),
        ));
        breaker.record_failure();
        let executor = RetryExecutor::new().with_circuit_breaker(Arc::clone(&breaker));
        let attempts = AtomicU32::new(0);

        let result = executor
            .execute(&fast_policy(3), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, RpcError>(()) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert_ne!(err.kind(), ErrorKind::MaxRetriesExceeded);
        assert_eq!(attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_circuit_opening_mid_call_is_terminal() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new().failure_threshold(2),
        ));
        let executor = RetryExecutor::new().with_circuit_breaker(Arc::clone(&breaker));
        let attempts = AtomicU32::new(0);

        let result = executor
            .execute(&fast_policy(5), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::new(ErrorKind::ServiceUnavailable, "down")) }
            })
            .await;

        let err = result.unwrap_err();
        assert!(err.is_circuit_open());
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
        assert_eq!(breaker.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn test_client_fault_counts_as_breaker_success() {
        let breaker = Arc::new(CircuitBreaker::new(
            CircuitBreakerConfig::new().failure_threshold(2),
        ));
        breaker.record_failure();
        let executor = RetryExecutor::new().with_circuit_breaker(Arc::clone(&breaker));

        let _ = executor
            .execute(&fast_policy(1), failing(ErrorKind::NotFound))
            .await;

        assert_eq!(breaker.stats().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_deadline_cuts_backoff_short() {
        let executor = RetryExecutor::new();
        let policy = RetryPolicy::new()
            .max_attempts(5)
            .initial_backoff(Duration::from_secs(5))
            .max_backoff(Duration::from_secs(5))
            .use_jitter(false);
        let attempts = AtomicU32::new(0);
        let started = Instant::now();
        let deadline = started + Duration::from_millis(50);

        let result = executor
            .execute_with_deadline("Session/Get", &policy, Some(deadline), |_| {
                attempts.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(RpcError::connection("refused")) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_deadline_bounds_a_hanging_attempt() {
        let executor = RetryExecutor::new();
        let deadline = Instant::now() + Duration::from_millis(30);

        let result = executor
            .execute_with_deadline("Session/Get", &fast_policy(1), Some(deadline), |_| async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok::<_, RpcError>(())
            })
            .await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_retry_after_raises_delay() {
        let executor = RetryExecutor::new();
        let delays = Arc::new(Mutex::new(Vec::new()));
        let delays_clone = Arc::clone(&delays);
        let policy = fast_policy(2)
            .max_backoff(Duration::from_millis(30))
            .on_retry(move |_: &RpcError, _: u32, delay: Duration| {
                delays_clone.lock().unwrap().push(delay);
            });

        let _ = executor
            .execute(&policy, |_| async {
                Err::<(), _>(
                    RpcError::new(ErrorKind::RateLimit, "slow down")
                        .with_retry_after(Duration::from_secs(60)),
                )
            })
            .await;

        assert_eq!(*delays.lock().unwrap(), vec![Duration::from_millis(30)]);
    }

    #[test]
    fn test_execute_on_current_thread_runtime() {
        let executor = RetryExecutor::new();

        let value = tokio_test::assert_ok!(tokio_test::block_on(executor.execute(
            &fast_policy(1),
            |_| std::future::ready(Ok::<_, RpcError>(7)),
        )));
        assert_eq!(value, 7);

        let err = tokio_test::assert_err!(tokio_test::block_on(
            executor.execute(&fast_policy(1), failing(ErrorKind::NotFound))
        ));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_policy_validation() {
        assert!(RetryPolicy::default().validate().is_ok());
        assert!(RetryPolicy::new().max_attempts(0).validate().is_err());
        assert!(RetryPolicy::new().initial_backoff(Duration::ZERO).validate().is_err());
        assert!(RetryPolicy::new().backoff_multiplier(1.0).validate().is_err());
        assert!(RetryPolicy::new()
            .initial_backoff(Duration::from_secs(2))
            .max_backoff(Duration::from_secs(1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_apply_partial_update() {
        let policy = RetryPolicy::default();
        let updated = policy
            .apply(RetryPolicyUpdate {
                max_attempts: Some(7),
                use_jitter: Some(false),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(updated.max_attempts, 7);
        assert!(!updated.use_jitter);
        assert_eq!(updated.initial_backoff, policy.initial_backoff);

        assert!(policy
            .apply(RetryPolicyUpdate {
                max_attempts: Some(0),
                ..Default::default()
            })
            .is_err());
    }
}
