//! Health probing.
//!
//! [`HealthProbe`] performs one lightweight call and records the outcome in
//! the shared connection state. [`HealthTask`] runs probes on an interval in
//! its own tokio task until stopped.

use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use super::Shared;
use crate::errors::{classify, ErrorKind, RpcError};
use crate::observability::{ClientEvent, MetricsCollector};
use crate::transport::{deadline_after, Transport, TransportRequest};

/// One-shot health probe against the backend.
#[derive(Clone)]
pub(crate) struct HealthProbe {
    pub(super) transport: Arc<dyn Transport>,
    pub(super) shared: Arc<Shared>,
    pub(super) method: String,
    pub(super) timeout: Duration,
    pub(super) metrics: Option<Arc<dyn MetricsCollector>>,
}

impl HealthProbe {
    /// Probes once, bounded by the probe timeout and by `deadline` if given.
    ///
    /// Returns whether the backend answered. Never fails; the outcome is
    /// recorded in the connection state instead.
    pub(crate) async fn run_once(&self, deadline: Option<Instant>) -> bool {
        let started = Instant::now();
        let mut probe_deadline = deadline_after(started, self.timeout);
        if let Some(deadline) = deadline {
            probe_deadline = probe_deadline.min(deadline);
        }

        let request = TransportRequest::new(self.method.clone(), Bytes::new(), probe_deadline);
        let outcome =
            match tokio::time::timeout_at(probe_deadline.into(), self.transport.invoke(request))
                .await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(failure)) => Err(classify(&failure)),
                Err(_) => Err(RpcError::timeout("Health probe timed out")),
            };
        let latency = started.elapsed();

        let ok = match &outcome {
            Ok(()) => true,
            // Reachable, just without a health service.
            Err(err) if err.kind() == ErrorKind::NotImplemented => true,
            Err(_) => false,
        };

        match &outcome {
            Err(err) if !ok => {
                tracing::warn!(
                    method = %self.method,
                    kind = %err.kind(),
                    latency_ms = latency.as_millis() as u64,
                    "Health check failed"
                );
            }
            _ => {
                tracing::debug!(
                    method = %self.method,
                    latency_ms = latency.as_millis() as u64,
                    "Health check succeeded"
                );
            }
        }

        self.shared.record_health(ok, Utc::now());
        self.shared
            .events
            .publish(ClientEvent::HealthChecked { ok, latency });
        if let Some(metrics) = &self.metrics {
            metrics.record_health_check(ok);
        }
        ok
    }
}

/// Handle to a running health check loop.
pub(crate) struct HealthTask {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
    interval: Duration,
}

impl HealthTask {
    /// Spawns the loop on the current runtime. The first probe runs immediately.
    pub(crate) fn spawn(probe: HealthProbe, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = oneshot::channel::<()>();
        let span = tracing::info_span!("health_checks", interval_ms = interval.as_millis() as u64);

        let handle = tokio::spawn(
            async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

                loop {
                    tokio::select! {
                        biased;
                        _ = &mut shutdown_rx => break,
                        _ = async {
                            ticker.tick().await;
                            probe.run_once(None).await;
                        } => {}
                    }
                }
                tracing::debug!("Health check loop stopped");
            }
            .instrument(span),
        );

        Self {
            shutdown,
            handle,
            interval,
        }
    }

    /// Interval the loop was started with.
    pub(crate) fn interval(&self) -> Duration {
        self.interval
    }

    /// Signals the loop to stop and waits for the task to finish.
    pub(crate) async fn stop(self) {
        // Err means the loop already exited.
        let _ = self.shutdown.send(());
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                tracing::error!(error = %e, "Health check task panicked");
            }
        }
    }
}

impl std::fmt::Debug for HealthTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthTask")
            .field("interval", &self.interval)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
