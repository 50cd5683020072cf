//! In-process stand-in for the core agent.
//!
//! Listens on a Unix socket, decodes frames with [`CollectorCodec`], records
//! every message and answers according to its [`AgentMode`]. Acknowledgements
//! echo the request id of the message they answer so callers can check that
//! responses are not crossed between connections.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use scout_core::{AgentMessage, AgentResponse, CollectorCodec, MessageKind, SocketAddress};
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

use crate::error::{Result, TestError};

/// How the mock agent answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentMode {
    /// Acknowledge every message with `Success`.
    Acknowledge,
    /// Record messages and never answer.
    Silent,
    /// Answer with a non-success result.
    Reject,
}

#[derive(Debug)]
struct AgentState {
    received: Mutex<Vec<AgentMessage>>,
    mode: Mutex<AgentMode>,
    delay: Mutex<Duration>,
    connections: AtomicUsize,
}

/// Mock core agent bound to a socket in its own temporary directory.
pub struct MockCoreAgent {
    socket: SocketAddress,
    state: Arc<AgentState>,
    task: JoinHandle<()>,
    _dir: Option<tempfile::TempDir>,
}

impl MockCoreAgent {
    /// Starts an acknowledging agent in a fresh temporary directory.
    ///
    /// # Errors
    /// Returns an error if the directory or socket cannot be created.
    pub async fn start() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let mut agent = Self::bind(dir.path().join("core-agent.sock")).await?;
        agent._dir = Some(dir);
        Ok(agent)
    }

    /// Starts an acknowledging agent on `path`.
    ///
    /// # Errors
    /// Returns an error if the socket cannot be bound.
    pub async fn bind(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let listener = UnixListener::bind(&path)
            .map_err(|e| TestError::mock_agent(format!("bind {}: {e}", path.display())))?;
        let state = Arc::new(AgentState {
            received: Mutex::new(Vec::new()),
            mode: Mutex::new(AgentMode::Acknowledge),
            delay: Mutex::new(Duration::ZERO),
            connections: AtomicUsize::new(0),
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, Arc::clone(&accept_state)));
            }
        });

        tracing::debug!(socket = %path.display(), "mock core agent listening");
        Ok(Self {
            socket: SocketAddress::from_path(path),
            state,
            task,
            _dir: None,
        })
    }

    /// Returns the agent's socket.
    #[must_use]
    pub const fn socket(&self) -> &SocketAddress {
        &self.socket
    }

    /// Returns the socket file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.socket.path()
    }

    /// Changes how later messages are answered.
    pub fn set_mode(&self, mode: AgentMode) {
        *self.state.mode.lock() = mode;
    }

    /// Delays every answer by `delay`.
    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = delay;
    }

    /// Returns every message received so far, in arrival order.
    #[must_use]
    pub fn received(&self) -> Vec<AgentMessage> {
        self.state.received.lock().clone()
    }

    /// Returns the kinds of received messages.
    #[must_use]
    pub fn kinds(&self) -> Vec<MessageKind> {
        self.state
            .received
            .lock()
            .iter()
            .map(AgentMessage::kind)
            .collect()
    }

    /// Returns the number of accepted connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` messages arrived.
    ///
    /// # Errors
    /// Returns [`TestError::Timeout`] if they do not arrive in time.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.state.received.lock().len() < count {
            if tokio::time::Instant::now() >= deadline {
                return Err(TestError::Timeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        Ok(())
    }

    /// Stops accepting connections.
    pub fn shutdown(&self) {
        self.task.abort();
    }
}

impl Drop for MockCoreAgent {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl std::fmt::Debug for MockCoreAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockCoreAgent")
            .field("socket", &self.socket)
            .field("received", &self.state.received.lock().len())
            .finish_non_exhaustive()
    }
}

async fn serve(stream: UnixStream, state: Arc<AgentState>) {
    let mut framed = Framed::new(stream, CollectorCodec::new());
    while let Some(frame) = framed.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(error = %e, "mock agent dropping connection");
                return;
            }
        };
        let response = answer(&message, *state.mode.lock());
        state.received.lock().push(message);

        let Some(response) = response else {
            continue;
        };
        let delay = *state.delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if framed.send(response).await.is_err() {
            return;
        }
    }
}

fn answer(message: &AgentMessage, mode: AgentMode) -> Option<AgentResponse> {
    let mut response = match mode {
        AgentMode::Silent => return None,
        AgentMode::Acknowledge => AgentResponse::success(message.kind()),
        AgentMode::Reject => AgentResponse {
            kind: message.kind(),
            result: Some("Failure".to_string()),
            body: serde_json::json!({ "result": "Failure" }),
        },
    };
    if let (Some(id), Some(body)) = (message.request_id(), response.body.as_object_mut()) {
        body.insert("request_id".to_string(), serde_json::json!(id.as_str()));
    }
    Some(response)
}
