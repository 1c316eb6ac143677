//! Connection supervision.
//!
//! [`ConnectionSupervisor`] owns the readiness flag, the background health
//! check loop, the in-flight call count and the shutdown sequence. Callers
//! only read its state.

mod health;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::instrument;

use self::health::{HealthProbe, HealthTask};
use crate::errors::{RpcError, RpcResult};
use crate::observability::{ClientEvent, EventBus, MetricsCollector};
use crate::transport::{deadline_after, Transport};

const INITIAL_PROBE_DELAY: Duration = Duration::from_millis(50);
const MAX_PROBE_DELAY: Duration = Duration::from_secs(1);

/// Snapshot of the connection state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionState {
    /// Whether the backend is believed reachable.
    pub ready: bool,
    /// Whether the client is shutting down.
    pub closing: bool,
    /// When the last health probe completed.
    pub last_health_check_at: Option<DateTime<Utc>>,
    /// Outcome of the last health probe.
    pub last_health_check_ok: Option<bool>,
    /// Whether the health check loop is running.
    pub health_checks_running: bool,
    /// Calls currently in flight.
    pub in_flight: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Link {
    ready: bool,
    closing: bool,
}

#[derive(Debug, Default)]
struct HealthRecord {
    last_at: Option<DateTime<Utc>>,
    last_ok: Option<bool>,
}

/// State shared between the supervisor, the health task and call guards.
#[derive(Debug)]
pub(crate) struct Shared {
    link: watch::Sender<Link>,
    health: Mutex<HealthRecord>,
    in_flight: watch::Sender<usize>,
    events: EventBus,
}

impl Shared {
    fn new(events: EventBus) -> Self {
        let (link, _) = watch::channel(Link::default());
        let (in_flight, _) = watch::channel(0usize);
        Self {
            link,
            health: Mutex::new(HealthRecord::default()),
            in_flight,
            events,
        }
    }

    fn health(&self) -> MutexGuard<'_, HealthRecord> {
        self.health.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_ready(&self, ready: bool) {
        let changed = self.link.send_if_modified(|link| {
            let next = ready && !link.closing;
            if link.ready == next {
                return false;
            }
            link.ready = next;
            true
        });
        if changed {
            let ready = self.link.borrow().ready;
            tracing::info!(ready, "Connection readiness changed");
            self.events.publish(ClientEvent::ReadinessChanged { ready });
        }
    }

    pub(crate) fn record_health(&self, ok: bool, at: DateTime<Utc>) {
        {
            let mut record = self.health();
            record.last_at = Some(at);
            record.last_ok = Some(ok);
        }
        self.set_ready(ok);
    }
}

/// Marks a call as in flight until dropped.
#[derive(Debug)]
pub struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared
            .in_flight
            .send_modify(|count| *count = count.saturating_sub(1));
    }
}

/// Supervises readiness, health checks and shutdown for one transport.
pub struct ConnectionSupervisor {
    transport: Arc<dyn Transport>,
    shared: Arc<Shared>,
    probe: HealthProbe,
    health_task: Mutex<Option<HealthTask>>,
    closing: AtomicBool,
    closed: tokio::sync::Mutex<Option<bool>>,
}

impl ConnectionSupervisor {
    /// Creates a supervisor. Health checks are not started.
    pub fn new(
        transport: Arc<dyn Transport>,
        health_check_method: impl Into<String>,
        health_check_timeout: Duration,
        events: EventBus,
    ) -> Self {
        let shared = Arc::new(Shared::new(events));
        let probe = HealthProbe {
            transport: Arc::clone(&transport),
            shared: Arc::clone(&shared),
            method: health_check_method.into(),
            timeout: health_check_timeout,
            metrics: None,
        };
        Self {
            transport,
            shared,
            probe,
            health_task: Mutex::new(None),
            closing: AtomicBool::new(false),
            closed: tokio::sync::Mutex::new(None),
        }
    }

    /// Records health probe outcomes in `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.probe.metrics = Some(metrics);
        self
    }

    fn task_slot(&self) -> MutexGuard<'_, Option<HealthTask>> {
        self.health_task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns true once the backend has answered and no later probe or call failed to connect.
    pub fn is_ready(&self) -> bool {
        self.shared.link.borrow().ready
    }

    /// Returns true once `close` has been called.
    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Returns true while the health check loop runs.
    pub fn health_checks_running(&self) -> bool {
        self.task_slot().is_some()
    }

    /// Returns true when running health checks last saw the backend unreachable.
    pub fn is_known_unreachable(&self) -> bool {
        self.health_checks_running() && self.shared.health().last_ok == Some(false)
    }

    /// Returns a snapshot of the connection state.
    pub fn state(&self) -> ConnectionState {
        let link = *self.shared.link.borrow();
        let (last_at, last_ok) = {
            let record = self.shared.health();
            (record.last_at, record.last_ok)
        };
        ConnectionState {
            ready: link.ready,
            closing: self.is_closing(),
            last_health_check_at: last_at,
            last_health_check_ok: last_ok,
            health_checks_running: self.health_checks_running(),
            in_flight: *self.shared.in_flight.borrow(),
        }
    }

    /// Updates readiness from a request-path outcome.
    pub fn mark_ready(&self, ready: bool) {
        self.shared.set_ready(ready);
    }

    /// Registers an in-flight call. Fails with `Cancelled` once closing.
    pub fn begin_call(&self) -> RpcResult<InFlightGuard> {
        if self.is_closing() {
            return Err(RpcError::cancelled("Client is closing"));
        }
        self.shared.in_flight.send_modify(|count| *count += 1);
        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
        };
        // close() may have started between the check and the increment.
        if self.is_closing() {
            return Err(RpcError::cancelled("Client is closing"));
        }
        Ok(guard)
    }

    /// Runs one health probe now and returns whether it succeeded.
    pub async fn check_health(&self) -> bool {
        self.probe.run_once(None).await
    }

    /// Waits until the backend is ready.
    ///
    /// Without a running health loop this probes the backend itself, backing
    /// off between probes. Fails with `Timeout` at the deadline and with
    /// `Cancelled` if the client starts closing.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn wait_for_ready(&self, timeout: Duration) -> RpcResult<()> {
        let deadline = deadline_after(Instant::now(), timeout);
        let mut link_rx = self.shared.link.subscribe();
        let mut probe_delay = INITIAL_PROBE_DELAY;

        loop {
            let link = *link_rx.borrow_and_update();
            if link.closing {
                return Err(RpcError::cancelled("Client closed while waiting for readiness"));
            }
            if link.ready {
                return Ok(());
            }

            if !self.health_checks_running() && self.probe.run_once(Some(deadline)).await {
                return Ok(());
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RpcError::timeout(format!(
                    "Connection not ready after {}ms",
                    timeout.as_millis()
                )));
            }

            let wake_at = (now + probe_delay).min(deadline);
            tokio::select! {
                changed = link_rx.changed() => {
                    if changed.is_err() {
                        return Err(RpcError::cancelled("Connection supervisor dropped"));
                    }
                }
                _ = tokio::time::sleep_until(wake_at.into()) => {
                    probe_delay = (probe_delay * 2).min(MAX_PROBE_DELAY);
                }
            }
        }
    }

    /// Starts periodic health checks. Does nothing if they already run.
    pub fn start_health_checks(&self, interval: Duration) -> RpcResult<()> {
        if interval.is_zero() {
            return Err(RpcError::validation("health check interval must be greater than 0"));
        }
        if self.is_closing() {
            return Err(RpcError::cancelled("Client is closing"));
        }
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(RpcError::validation(
                "health checks require a running tokio runtime",
            ));
        }

        let mut slot = self.task_slot();
        // close() sets the flag before emptying the slot, so a start that
        // lost the race sees it here.
        if self.is_closing() {
            return Err(RpcError::cancelled("Client is closing"));
        }
        if let Some(task) = slot.as_ref() {
            tracing::debug!(
                interval_ms = task.interval().as_millis() as u64,
                "Health checks already running"
            );
            return Ok(());
        }
        tracing::info!(interval_ms = interval.as_millis() as u64, "Starting health checks");
        *slot = Some(HealthTask::spawn(self.probe.clone(), interval));
        Ok(())
    }

    /// Stops periodic health checks and waits for the loop to exit. Does
    /// nothing if they are not running.
    pub async fn stop_health_checks(&self) {
        let task = self.task_slot().take();
        if let Some(task) = task {
            tracing::info!("Stopping health checks");
            task.stop().await;
        }
    }

    /// Shuts down: rejects new calls, stops health checks, waits up to
    /// `timeout` for in-flight calls, then closes the transport regardless.
    ///
    /// Returns whether every in-flight call finished in time. Later calls
    /// wait for the first to finish and return its result.
    #[instrument(skip(self), fields(timeout_ms = timeout.as_millis() as u64))]
    pub async fn close(&self, timeout: Duration) -> bool {
        let mut closed = self.closed.lock().await;
        if let Some(drained) = *closed {
            return drained;
        }

        let deadline = deadline_after(Instant::now(), timeout);
        self.closing.store(true, Ordering::SeqCst);
        let was_ready = self.shared.link.send_replace(Link {
            ready: false,
            closing: true,
        });
        if was_ready.ready {
            self.shared
                .events
                .publish(ClientEvent::ReadinessChanged { ready: false });
        }

        self.stop_health_checks().await;

        let mut in_flight = self.shared.in_flight.subscribe();
        let pending = *in_flight.borrow();
        if pending > 0 {
            tracing::info!(pending, "Waiting for in-flight calls");
        }
        let drained = matches!(
            tokio::time::timeout_at(deadline.into(), in_flight.wait_for(|count| *count == 0)).await,
            Ok(Ok(_))
        );
        if !drained {
            tracing::warn!(
                abandoned = *in_flight.borrow(),
                "Close timed out with calls still in flight"
            );
        }

        self.transport.close().await;
        self.shared.events.publish(ClientEvent::Closed { drained });
        tracing::info!(drained, "Connection closed");

        *closed = Some(drained);
        drained
    }
}

impl std::fmt::Debug for ConnectionSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionSupervisor")
            .field("state", &self.state())
            .finish()
    }
}
