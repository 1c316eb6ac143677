//! Client lifecycle events.
//!
//! Events are published on a `tokio::sync::broadcast` channel. Publishing never
//! blocks and never fails when nobody is subscribed.

use std::time::Duration;
use tokio::sync::broadcast;

use crate::errors::ErrorKind;
use crate::resilience::CircuitState;

/// Default capacity of the event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// An observable client event.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// An attempt failed and another one is scheduled.
    Retrying {
        /// Method being called.
        method: String,
        /// Attempt number that just failed (1-based).
        attempt: u32,
        /// Delay before the next attempt.
        delay: Duration,
        /// Kind of the failure.
        kind: ErrorKind,
    },
    /// The circuit breaker changed state.
    CircuitStateChanged {
        /// Previous state.
        from: CircuitState,
        /// New state.
        to: CircuitState,
    },
    /// A health probe completed.
    HealthChecked {
        /// Whether the probe succeeded.
        ok: bool,
        /// Probe latency.
        latency: Duration,
    },
    /// The connection's readiness changed.
    ReadinessChanged {
        /// New readiness.
        ready: bool,
    },
    /// The client finished closing.
    Closed {
        /// Whether all in-flight calls finished before the drain timeout.
        drained: bool,
    },
}

/// Broadcast publisher for [`ClientEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ClientEvent>,
}

impl EventBus {
    /// Creates a bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all current subscribers.
    pub fn publish(&self, event: ClientEvent) {
        // Err only means there are no receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribes to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let bus = EventBus::default();
        bus.publish(ClientEvent::ReadinessChanged { ready: true });
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();

        bus.publish(ClientEvent::Closed { drained: true });

        assert_eq!(rx.recv().await.unwrap(), ClientEvent::Closed { drained: true });
    }
}
