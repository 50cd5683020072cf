//! In-memory [`AgentSender`] that records what it is asked to send.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use scout_core::{
    AgentMessage, AgentResponse, AgentSender, MessageKind, RequestId, Result, ScoutError,
};

/// How a [`RecordingSender`] should fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureMode {
    /// Behave as if no agent were reachable.
    Disconnected,
    /// Behave as if the agent never answered.
    Timeout,
    /// Behave as if monitoring were switched off.
    MonitoringDisabled,
}

impl FailureMode {
    fn to_error(self) -> ScoutError {
        match self {
            Self::Disconnected => ScoutError::disconnected("recording sender is failing"),
            Self::Timeout => ScoutError::SendTimeout(Duration::from_millis(1)),
            Self::MonitoringDisabled => ScoutError::MonitoringDisabled,
        }
    }
}

/// Records every successfully sent message in order.
#[derive(Debug, Default)]
pub struct RecordingSender {
    messages: Mutex<Vec<AgentMessage>>,
    failure: Mutex<Option<FailureMode>>,
    attempts: AtomicUsize,
}

impl RecordingSender {
    /// Creates a sender that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sender that fails every send with `mode`.
    #[must_use]
    pub fn failing(mode: FailureMode) -> Self {
        let sender = Self::default();
        sender.fail_with(Some(mode));
        sender
    }

    /// Switches failure on (`Some`) or off (`None`).
    pub fn fail_with(&self, mode: Option<FailureMode>) {
        *self.failure.lock() = mode;
    }

    /// Returns recorded messages.
    #[must_use]
    pub fn messages(&self) -> Vec<AgentMessage> {
        self.messages.lock().clone()
    }

    /// Returns the kinds of recorded messages.
    #[must_use]
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.messages.lock().iter().map(AgentMessage::kind).collect()
    }

    /// Returns recorded messages that refer to `request_id`.
    #[must_use]
    pub fn messages_for(&self, request_id: &RequestId) -> Vec<AgentMessage> {
        self.messages
            .lock()
            .iter()
            .filter(|m| m.request_id() == Some(request_id))
            .cloned()
            .collect()
    }

    /// Returns the number of recorded messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.lock().len()
    }

    /// Returns true if nothing was recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.lock().is_empty()
    }

    /// Returns the number of send attempts, failed ones included.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Forgets recorded messages.
    pub fn clear(&self) {
        self.messages.lock().clear();
    }

    fn record(&self, message: AgentMessage) -> Result<MessageKind> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(mode) = *self.failure.lock() {
            return Err(mode.to_error());
        }
        let kind = message.kind();
        self.messages.lock().push(message);
        Ok(kind)
    }
}

#[async_trait]
impl AgentSender for RecordingSender {
    async fn send(&self, message: AgentMessage) -> Result<AgentResponse> {
        self.record(message).map(AgentResponse::success)
    }

    async fn send_async(&self, message: AgentMessage) -> Result<()> {
        self.record(message).map(|_| ())
    }
}
