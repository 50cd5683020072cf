//! A single framed connection to the core agent.
//!
//! Exchanges are strictly sequential: a response is whatever frame comes
//! next on the same connection, so one connection never carries two
//! in-flight messages.

use std::io::ErrorKind;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use scout_core::{AgentMessage, AgentResponse, ClientCodec, SocketAddress};
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use crate::error::{Result, TransportError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// A framed Unix-socket connection.
#[derive(Debug)]
pub struct AgentConnection {
    id: u64,
    framed: Framed<UnixStream, ClientCodec>,
}

impl AgentConnection {
    /// Connects to the core agent at `socket`.
    ///
    /// # Errors
    /// Returns [`TransportError::Disconnected`] if the socket refuses.
    pub async fn open(socket: &SocketAddress) -> Result<Self> {
        let stream = UnixStream::connect(socket.path()).await.map_err(|e| {
            TransportError::disconnected(format!("cannot connect to {socket}: {e}"))
        })?;
        Ok(Self::from_stream(stream))
    }

    /// Wraps an already connected stream.
    #[must_use]
    pub fn from_stream(stream: UnixStream) -> Self {
        let id = NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(connection = id, "opened core agent connection");
        Self {
            id,
            framed: Framed::new(stream, ClientCodec::new()),
        }
    }

    /// Returns this connection's process-unique id.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }

    /// Checks the connection without blocking.
    ///
    /// A healthy idle connection has nothing to read. End-of-stream, an
    /// error, or unsolicited bytes all mean it must be discarded.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        if !self.framed.read_buffer().is_empty() {
            return false;
        }
        let mut peek = [0u8; 1];
        match self.framed.get_ref().try_read(&mut peek) {
            Err(e) if e.kind() == ErrorKind::WouldBlock => true,
            Ok(_) | Err(_) => false,
        }
    }

    /// Writes one framed message.
    ///
    /// # Errors
    /// Returns a socket or protocol error if the write fails.
    pub async fn write(&mut self, message: AgentMessage) -> Result<()> {
        self.framed.send(message).await.map_err(TransportError::from)
    }

    /// Reads the next framed response.
    ///
    /// # Errors
    /// Returns a socket error if the core agent closed the connection.
    pub async fn read_response(&mut self) -> Result<AgentResponse> {
        match self.framed.next().await {
            Some(result) => result.map_err(TransportError::from),
            None => Err(TransportError::socket("connection closed by core agent")),
        }
    }

    /// Writes a message and reads its response.
    ///
    /// # Errors
    /// Returns the first write or read failure.
    pub async fn exchange(&mut self, message: AgentMessage) -> Result<AgentResponse> {
        self.write(message).await?;
        self.read_response().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::{CollectorCodec, MessageKind, RequestId};
    use std::time::SystemTime;

    #[tokio::test]
    async fn test_exchange_reads_matching_response() {
        let (client, server) = UnixStream::pair().unwrap();
        tokio::spawn(async move {
            let mut framed = Framed::new(server, CollectorCodec::new());
            while let Some(Ok(msg)) = framed.next().await {
                let _ = framed.send(AgentResponse::success(msg.kind())).await;
            }
        });

        let mut conn = AgentConnection::from_stream(client);
        let response = conn
            .exchange(AgentMessage::start_request(RequestId::new(), SystemTime::now()))
            .await
            .unwrap();
        assert_eq!(response.kind, MessageKind::StartRequest);
        assert!(conn.is_healthy());
    }

    #[tokio::test]
    async fn test_closed_peer_is_unhealthy() {
        let (client, server) = UnixStream::pair().unwrap();
        drop(server);
        let mut conn = AgentConnection::from_stream(client);
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!conn.is_healthy());
        assert!(conn.read_response().await.is_err());
    }

    #[tokio::test]
    async fn test_unsolicited_bytes_make_connection_unhealthy() {
        use tokio::io::AsyncWriteExt;
        let (client, mut server) = UnixStream::pair().unwrap();
        server.write_all(b"\0\0\0\x02{}").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let conn = AgentConnection::from_stream(client);
        assert!(!conn.is_healthy());
    }

    #[tokio::test]
    async fn test_open_refused() {
        let dir = tempfile::tempdir().unwrap();
        let err = AgentConnection::open(&SocketAddress::from_path(dir.path().join("none.sock")))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Disconnected(_)));
    }

    #[test]
    fn test_ids_are_unique() {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        rt.block_on(async {
            let (a, _a) = UnixStream::pair().unwrap();
            let (b, _b) = UnixStream::pair().unwrap();
            assert_ne!(
                AgentConnection::from_stream(a).id(),
                AgentConnection::from_stream(b).id()
            );
        });
    }
}
