//! The seam between request tracking and the transport.

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{AgentMessage, AgentResponse};

/// Something that can deliver messages to the core agent.
///
/// The transport client is the production implementation; tests plug in
/// recording doubles.
#[async_trait]
pub trait AgentSender: Send + Sync {
    /// Sends a message and waits for the core agent's response.
    async fn send(&self, message: AgentMessage) -> Result<AgentResponse>;

    /// Sends a message without waiting for the response.
    ///
    /// Returns once the frame is written; the response is read and dropped
    /// in the background.
    async fn send_async(&self, message: AgentMessage) -> Result<()>;
}
