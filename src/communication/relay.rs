// relay.rs
//
// Carries vehicle events across the broker. The publish side drains the
// fleet's event channel onto a topic; the subscribe side decodes whatever
// arrives and fans the raw payload out to every live socket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::communication::messages::{decode_event, encode_event, VehicleEvent};
use crate::communication::transport::{Subscription, Transport};
use crate::error::RelayError;
use crate::gateway::registry::{BroadcastReport, GatewayRegistry};

/// Totals from a finished `dispatch` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    pub published: usize,
    pub dropped: usize,
}

/// Totals from a finished `run_fanout` run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanoutStats {
    pub delivered: usize,
    pub discarded: usize,
}

#[derive(Clone)]
pub struct EventRelay {
    transport: Arc<dyn Transport>,
    topic: String,
}

impl EventRelay {
    pub fn new(transport: Arc<dyn Transport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Serializes `event` and hands it to the transport. Blocking.
    pub fn publish(&self, topic: &str, event: &VehicleEvent) -> Result<(), RelayError> {
        let payload = encode_event(event)?;
        self.transport.publish(topic, &payload)?;
        Ok(())
    }

    /// Publishes to this relay's topic from the blocking pool.
    pub async fn publish_event(&self, event: VehicleEvent) -> Result<(), RelayError> {
        let relay = self.clone();
        tokio::task::spawn_blocking(move || relay.publish(&relay.topic, &event)).await?
    }

    /// Publishes every event from `events` in order until the channel closes.
    /// Failed publishes are logged and dropped.
    pub async fn dispatch(&self, mut events: mpsc::Receiver<VehicleEvent>) -> DispatchStats {
        let mut stats = DispatchStats::default();
        while let Some(event) = events.recv().await {
            let vehicle_id = event.vehicle_id().to_string();
            match self.publish_event(event).await {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    log::warn!("Dropping event for vehicle {}: {}", vehicle_id, e);
                    stats.dropped += 1;
                }
            }
        }
        log::info!(
            "Event dispatch finished: {} published, {} dropped",
            stats.published,
            stats.dropped
        );
        stats
    }

    /// Subscribes to this relay's topic. Blocking.
    pub fn subscribe(&self) -> Result<Subscription, RelayError> {
        Ok(self.transport.subscribe(&self.topic)?)
    }

    /// Checks that `payload` is a vehicle event and writes it, unchanged, to
    /// every sink currently in `registry`.
    pub fn deliver(
        payload: &[u8],
        registry: &GatewayRegistry,
    ) -> Result<BroadcastReport, RelayError> {
        let event = decode_event(payload)?;
        let report = registry.broadcast(payload);
        log::debug!(
            "Event for vehicle {} delivered to {} sockets",
            event.vehicle_id(),
            report.delivered
        );
        Ok(report)
    }

    /// Fans out every payload from `subscription` until it ends. Malformed
    /// payloads are logged and skipped.
    pub async fn run_fanout(
        mut subscription: Subscription,
        registry: Arc<GatewayRegistry>,
    ) -> FanoutStats {
        let mut stats = FanoutStats::default();
        while let Some(payload) = subscription.recv().await {
            match Self::deliver(&payload, &registry) {
                Ok(_) => stats.delivered += 1,
                Err(e) => {
                    log::warn!("Discarding inbound message: {}", e);
                    stats.discarded += 1;
                }
            }
        }
        log::info!("Subscription closed, fan-out stopped");
        stats
    }

    /// Feeds `registry` for as long as the process lives. Whenever the
    /// subscription ends (broker restart, closed channel) or cannot be opened,
    /// waits `retry_delay` and subscribes again.
    pub async fn serve_fanout(&self, registry: Arc<GatewayRegistry>, retry_delay: Duration) {
        loop {
            let relay = self.clone();
            match tokio::task::spawn_blocking(move || relay.subscribe()).await {
                Ok(Ok(subscription)) => {
                    log::info!("Subscribed to {}, fanning out", self.topic);
                    let stats = Self::run_fanout(subscription, Arc::clone(&registry)).await;
                    log::warn!(
                        "Subscription to {} ended ({} delivered, {} discarded), resubscribing",
                        self.topic,
                        stats.delivered,
                        stats.discarded
                    );
                }
                Ok(Err(e)) => log::warn!("Could not subscribe to {}: {}", self.topic, e),
                Err(e) => log::error!("Subscribe task failed: {}", e),
            }
            tokio::time::sleep(retry_delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::communication::transport::InMemoryTransport;
    use crate::error::TransportError;
    use crate::simulation_engine::geo::Position;

    struct Unreachable;

    impl Transport for Unreachable {
        fn publish(&self, _topic: &str, _payload: &[u8]) -> Result<(), TransportError> {
            Err(TransportError::Closed)
        }

        fn subscribe(&self, _topic: &str) -> Result<Subscription, TransportError> {
            Err(TransportError::Closed)
        }
    }

    #[tokio::test]
    async fn publish_reaches_subscribers_as_json() {
        let transport = Arc::new(InMemoryTransport::new());
        let relay = EventRelay::new(transport, "vehicle-events");
        let mut subscription = relay.subscribe().unwrap();

        let event = VehicleEvent::location_updated("v1", Position::new(-122.45, 37.75));
        relay.publish_event(event.clone()).await.unwrap();

        let payload = subscription.recv().await.unwrap();
        assert_eq!(decode_event(&payload).unwrap(), event);
    }

    #[tokio::test]
    async fn dispatch_drops_failed_publishes_and_keeps_going() {
        let relay = EventRelay::new(Arc::new(Unreachable), "vehicle-events");
        let (tx, rx) = mpsc::channel(8);
        for i in 0..3 {
            tx.send(VehicleEvent::location_updated(&format!("v{i}"), Position::new(0.0, 0.0)))
                .await
                .unwrap();
        }
        drop(tx);

        let stats = relay.dispatch(rx).await;
        assert_eq!(stats, DispatchStats { published: 0, dropped: 3 });
    }

    #[test]
    fn malformed_payload_reaches_no_sink() {
        let registry = GatewayRegistry::new();
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(4);
        registry.register(Arc::new(tx));

        let err = EventRelay::deliver(b"{\"type\":\"Nope\"}", &registry).unwrap_err();
        assert!(matches!(err, RelayError::Malformed(_)));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.len(), 1);
    }
}
