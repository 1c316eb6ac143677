//! Mock implementations for testing.
//!
//! [`MockTransport`] replays scripted outcomes so the retry, circuit breaker
//! and connection logic can be exercised without a server.

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::config::DEFAULT_HEALTH_CHECK_METHOD;
use crate::transport::{RawFailure, StatusCode, Transport, TransportRequest, TransportResponse};

/// A scripted transport outcome.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Succeed with a payload.
    Success(Bytes),
    /// Fail with a raw failure.
    Failure(RawFailure),
    /// Wait, then produce the inner outcome.
    Delayed(Duration, Box<MockOutcome>),
    /// Never complete.
    Hang,
}

impl MockOutcome {
    /// Succeeds with `payload`.
    pub fn ok(payload: impl Into<Bytes>) -> Self {
        Self::Success(payload.into())
    }

    /// Succeeds with a JSON payload.
    pub fn json<T: serde::Serialize>(value: &T) -> Self {
        Self::Success(Bytes::from(serde_json::to_vec(value).unwrap_or_default()))
    }

    /// Fails with a transport status.
    pub fn status(code: StatusCode, message: &str) -> Self {
        Self::Failure(RawFailure::status(code, message))
    }

    /// Fails with `Unavailable`.
    pub fn unavailable() -> Self {
        Self::status(StatusCode::Unavailable, "service unavailable")
    }

    /// Fails with `DeadlineExceeded`.
    pub fn deadline_exceeded() -> Self {
        Self::status(StatusCode::DeadlineExceeded, "deadline exceeded")
    }

    /// Fails with a refused connection.
    pub fn connection_refused() -> Self {
        Self::Failure(RawFailure::io(
            std::io::ErrorKind::ConnectionRefused,
            "connection refused",
        ))
    }

    /// Delays this outcome by `delay`.
    pub fn after(self, delay: Duration) -> Self {
        Self::Delayed(delay, Box::new(self))
    }

    async fn resolve(self) -> Result<TransportResponse, RawFailure> {
        let mut outcome = self;
        loop {
            match outcome {
                Self::Success(payload) => return Ok(TransportResponse::new(payload)),
                Self::Failure(failure) => return Err(failure),
                Self::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    outcome = *inner;
                }
                Self::Hang => return futures::future::pending().await,
            }
        }
    }
}

impl From<RawFailure> for MockOutcome {
    fn from(failure: RawFailure) -> Self {
        Self::Failure(failure)
    }
}

/// A recorded call.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    /// Method name.
    pub method: String,
    /// Request payload.
    pub payload: Bytes,
    /// Request metadata.
    pub metadata: HashMap<String, String>,
    /// Time left until the deadline when the call arrived.
    pub remaining: Duration,
    /// When the call arrived.
    pub at: Instant,
}

/// Scripted transport for testing.
///
/// Calls to the health method get the health outcome; every other call takes
/// the next queued outcome, or the default once the queue is empty.
pub struct MockTransport {
    outcomes: Mutex<VecDeque<MockOutcome>>,
    default_outcome: Mutex<MockOutcome>,
    health_outcome: Mutex<MockOutcome>,
    health_method: String,
    calls: Mutex<Vec<RecordedCall>>,
    closes: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// Creates a transport that succeeds with an empty payload.
    pub fn new() -> Self {
        Self {
            outcomes: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(MockOutcome::ok(Bytes::new())),
            health_outcome: Mutex::new(MockOutcome::ok(Bytes::new())),
            health_method: DEFAULT_HEALTH_CHECK_METHOD.to_string(),
            calls: Mutex::new(Vec::new()),
            closes: AtomicUsize::new(0),
        }
    }

    /// Routes `method` to the health outcome instead of the default health method.
    pub fn with_health_method(mut self, method: impl Into<String>) -> Self {
        self.health_method = method.into();
        self
    }

    /// Queues an outcome for the next non-health call.
    pub fn queue(&self, outcome: impl Into<MockOutcome>) {
        lock(&self.outcomes).push_back(outcome.into());
    }

    /// Queues `count` copies of an outcome.
    pub fn queue_repeated(&self, outcome: MockOutcome, count: usize) {
        let mut outcomes = lock(&self.outcomes);
        outcomes.extend(std::iter::repeat(outcome).take(count));
    }

    /// Sets the outcome used once the queue is empty.
    pub fn set_default(&self, outcome: MockOutcome) {
        *lock(&self.default_outcome) = outcome;
    }

    /// Sets the outcome of health probes.
    pub fn set_health(&self, outcome: MockOutcome) {
        *lock(&self.health_outcome) = outcome;
    }

    /// Returns all recorded calls, health probes included.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    /// Returns the number of calls made to `method`.
    pub fn calls_to(&self, method: &str) -> usize {
        lock(&self.calls).iter().filter(|c| c.method == method).count()
    }

    /// Returns the number of calls, excluding health probes.
    pub fn call_count(&self) -> usize {
        lock(&self.calls)
            .iter()
            .filter(|c| c.method != self.health_method)
            .count()
    }

    /// Returns the last non-health call.
    pub fn last_call(&self) -> Option<RecordedCall> {
        lock(&self.calls)
            .iter()
            .rev()
            .find(|c| c.method != self.health_method)
            .cloned()
    }

    /// Returns true once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.close_count() > 0
    }

    /// Returns how many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn next_outcome(&self, method: &str) -> MockOutcome {
        if method == self.health_method {
            return lock(&self.health_outcome).clone();
        }
        match lock(&self.outcomes).pop_front() {
            Some(outcome) => outcome,
            None => lock(&self.default_outcome).clone(),
        }
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn invoke(&self, request: TransportRequest) -> Result<TransportResponse, RawFailure> {
        lock(&self.calls).push(RecordedCall {
            method: request.method.clone(),
            payload: request.payload.clone(),
            metadata: request.metadata.clone(),
            remaining: request.remaining(),
            at: Instant::now(),
        });

        self.next_outcome(&request.method).resolve().await
    }

    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("call_count", &lock(&self.calls).len())
            .field("queued", &lock(&self.outcomes).len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(method: &str) -> TransportRequest {
        TransportRequest::new(method, Bytes::new(), Instant::now() + Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_mock_transport_queue_then_default() {
        let transport = MockTransport::new();
        transport.queue(MockOutcome::unavailable());
        transport.set_default(MockOutcome::ok("done"));

        assert!(transport.invoke(request("Svc/A")).await.is_err());
        let response = transport.invoke(request("Svc/A")).await.unwrap();
        assert_eq!(response.payload, Bytes::from_static(b"done"));
    }

    #[tokio::test]
    async fn test_mock_transport_records_calls() {
        let transport = MockTransport::new();

        transport.invoke(request("Svc/A")).await.unwrap();
        transport.invoke(request("Svc/B")).await.unwrap();
        transport
            .invoke(request(DEFAULT_HEALTH_CHECK_METHOD))
            .await
            .unwrap();

        assert_eq!(transport.calls().len(), 3);
        assert_eq!(transport.call_count(), 2);
        assert_eq!(transport.last_call().unwrap().method, "Svc/B");
    }

    #[tokio::test]
    async fn test_health_probes_do_not_consume_queue() {
        let transport = MockTransport::new();
        transport.queue(MockOutcome::unavailable());

        transport
            .invoke(request(DEFAULT_HEALTH_CHECK_METHOD))
            .await
            .unwrap();
        assert!(transport.invoke(request("Svc/A")).await.is_err());
    }

    #[tokio::test]
    async fn test_delayed_outcome() {
        let transport = MockTransport::new();
        transport.queue(MockOutcome::ok("late").after(Duration::from_millis(30)));

        let started = Instant::now();
        transport.invoke(request("Svc/A")).await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn test_close_is_recorded() {
        let transport = MockTransport::new();
        assert!(!transport.is_closed());
        transport.close().await;
        assert_eq!(transport.close_count(), 1);
    }
}
