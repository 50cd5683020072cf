//! Gate between tracking and whatever agent is currently installed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use scout_core::{AgentMessage, AgentResponse, AgentSender, Result, ScoutError};

/// Forwards messages to the installed agent while monitoring is on.
///
/// Sends fail with [`ScoutError::Disconnected`] while no agent is installed
/// and with [`ScoutError::MonitoringDisabled`] while monitoring is off.
pub struct Dispatcher {
    agent: RwLock<Option<Arc<dyn AgentSender>>>,
    monitor: AtomicBool,
}

impl Dispatcher {
    /// Creates a dispatcher with no agent installed.
    #[must_use]
    pub fn new(monitor: bool) -> Self {
        Self {
            agent: RwLock::new(None),
            monitor: AtomicBool::new(monitor),
        }
    }

    /// Installs the agent later sends go to, replacing any previous one.
    pub fn install(&self, agent: Arc<dyn AgentSender>) {
        *self.agent.write() = Some(agent);
    }

    /// Removes and returns the installed agent.
    pub fn uninstall(&self) -> Option<Arc<dyn AgentSender>> {
        self.agent.write().take()
    }

    /// Returns true while an agent is installed.
    #[must_use]
    pub fn has_agent(&self) -> bool {
        self.agent.read().is_some()
    }

    /// Turns monitoring on or off.
    pub fn set_monitor(&self, monitor: bool) {
        self.monitor.store(monitor, Ordering::Release);
    }

    /// Returns true while monitoring is on.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.monitor.load(Ordering::Acquire)
    }

    fn agent(&self) -> Result<Arc<dyn AgentSender>> {
        let agent = self
            .agent
            .read()
            .clone()
            .ok_or_else(|| ScoutError::disconnected("no core agent connection"))?;
        if !self.is_monitoring() {
            return Err(ScoutError::MonitoringDisabled);
        }
        Ok(agent)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(true)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("has_agent", &self.has_agent())
            .field("monitor", &self.is_monitoring())
            .finish()
    }
}

#[async_trait]
impl AgentSender for Dispatcher {
    async fn send(&self, message: AgentMessage) -> Result<AgentResponse> {
        self.agent()?.send(message).await
    }

    async fn send_async(&self, message: AgentMessage) -> Result<()> {
        self.agent()?.send_async(message).await
    }
}
