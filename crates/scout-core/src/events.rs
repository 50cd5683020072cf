//! Agent lifecycle events.
//!
//! Events are fanned out over a `tokio::sync::broadcast` channel. Slow
//! subscribers lose the oldest events rather than blocking publishers.

use tokio::sync::broadcast;

use crate::types::RequestId;

/// Default number of events retained for lagging subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Something observable happened inside the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScoutEvent {
    /// A connection to the core agent was established.
    Connected,
    /// The agent disconnected from the core agent.
    Disconnected,
    /// A socket-level failure occurred.
    SocketError(String),
    /// A finished request was handed to the core agent.
    RequestSent {
        /// Id of the finished request.
        request_id: RequestId,
    },
    /// A request path matched an ignore prefix and was not reported.
    IgnoredPathDetected(String),
}

/// Broadcast hub for [`ScoutEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ScoutEvent>,
}

impl EventBus {
    /// Creates a bus retaining up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScoutEvent> {
        self.sender.subscribe()
    }

    /// Publishes an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ScoutEvent) {
        tracing::trace!(?event, "publishing event");
        let _ = self.sender.send(event);
    }

    /// Returns the number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
