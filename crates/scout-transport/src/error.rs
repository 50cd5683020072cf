//! Transport error types.

use std::time::Duration;

use scout_core::ScoutError;

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, TransportError>;

/// Transport errors.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No connection could be established or borrowed.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// No response arrived in time.
    #[error("send timed out after {0:?}")]
    SendTimeout(Duration),

    /// The socket failed mid-exchange.
    #[error("socket error: {0}")]
    Socket(String),

    /// A frame could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Creates a disconnected error.
    #[must_use]
    pub fn disconnected(msg: impl Into<String>) -> Self {
        Self::Disconnected(msg.into())
    }

    /// Creates a socket error.
    #[must_use]
    pub fn socket(msg: impl Into<String>) -> Self {
        Self::Socket(msg.into())
    }

    /// Returns true for timeouts.
    #[must_use]
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::SendTimeout(_))
    }

    /// Returns true if the connection that produced this error must not be
    /// reused.
    #[must_use]
    pub const fn poisons_connection(&self) -> bool {
        matches!(
            self,
            Self::SendTimeout(_) | Self::Socket(_) | Self::Protocol(_)
        )
    }
}

impl From<ScoutError> for TransportError {
    fn from(err: ScoutError) -> Self {
        match err {
            ScoutError::Protocol(msg) => Self::Protocol(msg),
            ScoutError::SendTimeout(d) => Self::SendTimeout(d),
            ScoutError::Disconnected(msg) => Self::Disconnected(msg),
            other => Self::Socket(other.to_string()),
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::Socket(err.to_string())
    }
}

impl From<TransportError> for ScoutError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Disconnected(msg) => Self::Disconnected(msg),
            TransportError::SendTimeout(d) => Self::SendTimeout(d),
            TransportError::Socket(msg) => Self::SocketError(msg),
            TransportError::Protocol(msg) => Self::Protocol(msg),
        }
    }
}
