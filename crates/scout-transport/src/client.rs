//! Core agent client.
//!
//! `send` holds one pooled connection for a full write + read exchange.
//! `send_async` returns once the frame is written; a background task reads
//! and drops the response before the connection goes back to the pool.
//! A connection whose response was never read is discarded, never reused.

use async_trait::async_trait;
use parking_lot::RwLock;
use scout_core::{AgentMessage, AgentResponse, AgentSender, EventBus, ScoutEvent, SocketAddress};

use crate::error::{Result, TransportError};
use crate::pool::{ConnectionPool, PoolConfig, PooledConnection};

/// Pooled client for one core agent socket.
pub struct AgentClient {
    socket: SocketAddress,
    config: PoolConfig,
    events: EventBus,
    pool: RwLock<Option<ConnectionPool>>,
}

impl AgentClient {
    /// Creates a disconnected client.
    #[must_use]
    pub fn new(socket: SocketAddress, config: PoolConfig) -> Self {
        Self {
            socket,
            config,
            events: EventBus::default(),
            pool: RwLock::new(None),
        }
    }

    /// Publishes lifecycle events on `events` instead of a private bus.
    #[must_use]
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    /// Returns the event bus lifecycle events are published on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Returns the socket this client talks to.
    #[must_use]
    pub const fn socket(&self) -> &SocketAddress {
        &self.socket
    }

    /// Returns true between a successful `connect` and `disconnect`.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.pool.read().is_some()
    }

    /// Returns the live pool, if connected.
    #[must_use]
    pub fn pool(&self) -> Option<ConnectionPool> {
        self.pool.read().clone()
    }

    /// Connects to the core agent and publishes [`ScoutEvent::Connected`].
    ///
    /// Opens one connection to prove the socket is live, then fills the pool
    /// to its minimum. Connecting again while connected is a no-op.
    ///
    /// # Errors
    /// Returns [`TransportError::Disconnected`] if the socket refuses.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let pool = ConnectionPool::new(self.socket.clone(), self.config.clone());
        let first = pool.borrow().await.inspect_err(|e| {
            self.events.publish(ScoutEvent::SocketError(e.to_string()));
        })?;
        drop(first);
        if let Err(e) = pool.fill_to_min().await {
            tracing::warn!(error = %e, "could not open minimum pool connections");
        }

        let replaced = self.pool.write().replace(pool);
        if let Some(previous) = replaced {
            // Lost a race with a concurrent connect; keep the newer pool.
            previous.close();
        }
        tracing::info!(socket = %self.socket, "connected to core agent");
        self.events.publish(ScoutEvent::Connected);
        Ok(())
    }

    /// Closes the pool and publishes [`ScoutEvent::Disconnected`].
    pub fn disconnect(&self) {
        let Some(pool) = self.pool.write().take() else {
            return;
        };
        pool.close();
        tracing::info!(socket = %self.socket, "disconnected from core agent");
        self.events.publish(ScoutEvent::Disconnected);
    }

    async fn borrow(&self) -> Result<PooledConnection> {
        let pool = self
            .pool()
            .ok_or_else(|| TransportError::disconnected("not connected to core agent"))?;
        pool.borrow().await
    }

    fn fail(&self, conn: &mut PooledConnection, err: &TransportError) {
        if err.poisons_connection() {
            conn.mark_broken();
        }
        if matches!(err, TransportError::Socket(_)) {
            self.events.publish(ScoutEvent::SocketError(err.to_string()));
        }
    }

    /// Sends a message and waits for its response.
    ///
    /// # Errors
    /// Returns [`TransportError::Disconnected`] when no connection is
    /// available, [`TransportError::SendTimeout`] when the response does
    /// not arrive within the send timeout, and socket or protocol errors
    /// from the exchange itself.
    pub async fn send(&self, message: AgentMessage) -> Result<AgentResponse> {
        let kind = message.kind();
        let mut conn = self.borrow().await?;
        conn.begin_exchange();
        let timeout = self.config.send_timeout;
        let outcome = match tokio::time::timeout(timeout, conn.exchange(message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SendTimeout(timeout)),
        };
        match outcome {
            Ok(response) => {
                conn.end_exchange();
                if !response.is_success() {
                    tracing::warn!(kind = %kind, result = ?response.result, "core agent rejected message");
                }
                tracing::trace!(kind = %kind, connection = conn.id(), "message acknowledged");
                Ok(response)
            }
            Err(e) => {
                self.fail(&mut conn, &e);
                tracing::debug!(kind = %kind, error = %e, "send failed");
                Err(e)
            }
        }
    }

    /// Writes a message without waiting for its response.
    ///
    /// # Errors
    /// Returns an error if no connection is available or the write fails.
    pub async fn send_async(&self, message: AgentMessage) -> Result<()> {
        let kind = message.kind();
        let mut conn = self.borrow().await?;
        conn.begin_exchange();
        let timeout = self.config.send_timeout;
        let written = match tokio::time::timeout(timeout, conn.write(message)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::SendTimeout(timeout)),
        };
        if let Err(e) = written {
            self.fail(&mut conn, &e);
            return Err(e);
        }

        let events = self.events.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(timeout, conn.read_response()).await {
                Ok(Ok(_)) => conn.end_exchange(),
                Ok(Err(e)) => {
                    conn.mark_broken();
                    if matches!(e, TransportError::Socket(_)) {
                        events.publish(ScoutEvent::SocketError(e.to_string()));
                    }
                    tracing::debug!(kind = %kind, error = %e, "async response read failed");
                }
                Err(_) => {
                    conn.mark_broken();
                    tracing::debug!(kind = %kind, "async response never arrived");
                }
            }
        });
        Ok(())
    }
}

impl std::fmt::Debug for AgentClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentClient")
            .field("socket", &self.socket)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AgentSender for AgentClient {
    async fn send(&self, message: AgentMessage) -> scout_core::Result<AgentResponse> {
        Ok(Self::send(self, message).await?)
    }

    async fn send_async(&self, message: AgentMessage) -> scout_core::Result<()> {
        Ok(Self::send_async(self, message).await?)
    }
}
