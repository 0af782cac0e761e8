use arbor_core::events::ArborEvent;
use arbord::{ArborService, EventSink};
use tokio::sync::broadcast;
use tracing::trace;

/// Forwards service events to SSE subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<ArborEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArborEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastSink {
    fn publish(&self, event: ArborEvent) {
        if self.tx.send(event).is_err() {
            trace!("event published with no subscribers");
        }
    }
}

#[derive(Clone)]
pub struct WebState {
    service: ArborService,
    broadcast: BroadcastSink,
}

impl WebState {
    /// `broadcast` must be one of the sinks `service` publishes to.
    pub fn new(service: ArborService, broadcast: BroadcastSink) -> Self {
        Self { service, broadcast }
    }

    pub fn service(&self) -> &ArborService {
        &self.service
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ArborEvent> {
        self.broadcast.subscribe()
    }
}
