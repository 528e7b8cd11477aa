use tokio::sync::broadcast;

use crate::types::SessionEvent;

/// Broadcast event stream type handed to session subscribers.
pub type EventStream = broadcast::Receiver<SessionEvent>;

/// Fan-out bus carrying normalized session events.
///
/// Emission is decoupled from consumption: subscribers that fall behind the
/// buffer observe a lag error from `broadcast` rather than stalling the
/// session loop.
#[derive(Clone, Debug)]
pub struct EventBus {
    event_tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    /// Create a bus with the given per-subscriber buffer.
    pub fn new(event_buffer: usize) -> Self {
        let (event_tx, _) = broadcast::channel(event_buffer.max(1));
        Self { event_tx }
    }

    /// Subscribe to emitted session events.
    pub fn subscribe(&self) -> EventStream {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; with no subscribers the event is dropped.
    pub fn emit(&self, event: SessionEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.event_tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
