//! Bounded connection pool.
//!
//! A semaphore caps borrowed connections at `max`. Idle connections sit in
//! a stack; borrowing pops one (validating it first when `test_on_borrow`
//! is set) and only opens a fresh one when none is usable. A borrowed
//! connection is owned by exactly one [`PooledConnection`] and goes back to
//! the stack when that guard drops, unless it was marked broken.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use scout_core::{ScoutConfig, SocketAddress};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::connection::AgentConnection;
use crate::error::{Result, TransportError};

/// Default maximum pool size.
pub const DEFAULT_POOL_MAX: usize = 500;

/// Pool sizing, validation and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Connections opened eagerly on connect.
    pub min: usize,
    /// Upper bound on open connections.
    pub max: usize,
    /// Validate idle connections before lending them out.
    pub test_on_borrow: bool,
    /// Bound on one write + response exchange.
    pub send_timeout: Duration,
    /// Bound on connecting and on waiting for a free connection.
    pub socket_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min: 0,
            max: DEFAULT_POOL_MAX,
            test_on_borrow: true,
            send_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(1),
        }
    }
}

impl PoolConfig {
    /// Derives pool settings from agent configuration.
    #[must_use]
    pub fn from_config(config: &ScoutConfig) -> Self {
        Self {
            min: config.pool_min,
            max: config.pool_max.max(1),
            send_timeout: config.send_timeout(),
            socket_timeout: config.socket_timeout(),
            ..Self::default()
        }
    }
}

struct PoolShared {
    socket: SocketAddress,
    config: PoolConfig,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<AgentConnection>>,
    closed: AtomicBool,
}

/// Pool of connections to one core agent socket. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
}

impl ConnectionPool {
    /// Creates an empty pool.
    #[must_use]
    pub fn new(socket: SocketAddress, config: PoolConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max.max(1)));
        Self {
            shared: Arc::new(PoolShared {
                socket,
                config,
                permits,
                idle: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Returns the pool settings.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Returns the socket this pool connects to.
    #[must_use]
    pub fn socket(&self) -> &SocketAddress {
        &self.shared.socket
    }

    /// Number of idle connections.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.shared.idle.lock().len()
    }

    /// Number of connections currently lent out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.shared.config.max.max(1) - self.shared.permits.available_permits()
    }

    /// Returns true once [`close`](Self::close) has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Opens connections until `min` are idle.
    ///
    /// # Errors
    /// Returns [`TransportError::Disconnected`] if a connection fails.
    pub async fn fill_to_min(&self) -> Result<()> {
        let target = self.shared.config.min.min(self.shared.config.max);
        for _ in self.idle_count()..target {
            let conn = self.open().await?;
            self.shared.idle.lock().push(conn);
        }
        Ok(())
    }

    /// Borrows a connection, opening one if none is idle.
    ///
    /// # Errors
    /// Returns [`TransportError::Disconnected`] if the pool is closed,
    /// exhausted for longer than the socket timeout, or the socket refuses.
    pub async fn borrow(&self) -> Result<PooledConnection> {
        if self.is_closed() {
            return Err(TransportError::disconnected("connection pool is closed"));
        }
        let timeout = self.shared.config.socket_timeout;
        let permit = tokio::time::timeout(timeout, Arc::clone(&self.shared.permits).acquire_owned())
            .await
            .map_err(|_| {
                TransportError::disconnected(format!("no connection available within {timeout:?}"))
            })?
            .map_err(|_| TransportError::disconnected("connection pool is closed"))?;

        let conn = match self.take_idle() {
            Some(conn) => conn,
            None => self.open().await?,
        };
        Ok(PooledConnection {
            conn: Some(conn),
            shared: Arc::clone(&self.shared),
            broken: false,
            in_flight: false,
            _permit: permit,
        })
    }

    /// Drops every idle connection and refuses further borrows. Lent-out
    /// connections are dropped when returned.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.permits.close();
        let drained = std::mem::take(&mut *self.shared.idle.lock());
        tracing::debug!(dropped = drained.len(), "connection pool closed");
    }

    fn take_idle(&self) -> Option<AgentConnection> {
        loop {
            let conn = self.shared.idle.lock().pop()?;
            if !self.shared.config.test_on_borrow || conn.is_healthy() {
                return Some(conn);
            }
            tracing::debug!(connection = conn.id(), "discarding stale connection");
        }
    }

    async fn open(&self) -> Result<AgentConnection> {
        let timeout = self.shared.config.socket_timeout;
        tokio::time::timeout(timeout, AgentConnection::open(&self.shared.socket))
            .await
            .map_err(|_| {
                TransportError::disconnected(format!(
                    "connecting to {} timed out after {timeout:?}",
                    self.shared.socket
                ))
            })?
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("socket", &self.shared.socket)
            .field("idle", &self.idle_count())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// A connection lent out by a [`ConnectionPool`].
pub struct PooledConnection {
    conn: Option<AgentConnection>,
    shared: Arc<PoolShared>,
    broken: bool,
    in_flight: bool,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("broken", &self.broken)
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl PooledConnection {
    /// Marks the connection unusable so it is dropped instead of returned.
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// Marks a message as written but not yet answered.
    ///
    /// Until [`end_exchange`](Self::end_exchange) runs, dropping the guard
    /// discards the connection: its next frame belongs to this exchange.
    pub fn begin_exchange(&mut self) {
        self.in_flight = true;
    }

    /// Clears the in-flight mark once the response has been read.
    pub fn end_exchange(&mut self) {
        self.in_flight = false;
    }
}

impl Deref for PooledConnection {
    type Target = AgentConnection;

    fn deref(&self) -> &AgentConnection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut AgentConnection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(conn) = self.conn.take() else {
            return;
        };
        if self.in_flight {
            tracing::debug!(connection = conn.id(), "dropping connection with unread response");
            return;
        }
        if self.broken || self.shared.closed.load(Ordering::Acquire) {
            tracing::trace!(connection = conn.id(), "dropping connection");
            return;
        }
        self.shared.idle.lock().push(conn);
    }
}
