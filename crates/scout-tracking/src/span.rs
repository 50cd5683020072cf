//! Spans: nested units of work inside a request.
//!
//! A span is owned by its request (the request keeps every span it opened)
//! and refers back to the request and to its parent span weakly. State
//! changes happen under the span's lock and produce at most one message;
//! the message is sent after the lock is released.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::SystemTime;

use parking_lot::Mutex;
use scout_core::{AgentMessage, RequestId, SpanId};
use serde_json::Value;

use crate::request::{RequestInner, ScoutRequest};
use crate::tracker::TrackerShared;

/// Messages collected by synchronous instrumentation and sent in order
/// once the outermost synchronous span ends.
pub(crate) type SyncBuffer = Arc<Mutex<Vec<AgentMessage>>>;

/// Where a span's messages go.
#[derive(Clone)]
pub(crate) enum Emitter {
    /// Sent through the tracker as they are produced.
    Immediate,
    /// Appended to a buffer flushed later.
    Deferred(SyncBuffer),
}

/// Lifecycle of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanPhase {
    /// Created, `StartSpan` not produced yet.
    Pending,
    /// `StartSpan` produced; tags are reported.
    Active,
    /// `StopSpan` produced. Terminal.
    Stopped,
}

#[derive(Debug)]
struct SpanState {
    phase: SpanPhase,
    started_at: Option<SystemTime>,
    stopped_at: Option<SystemTime>,
    tags: BTreeMap<String, Value>,
}

pub(crate) struct SpanInner {
    id: SpanId,
    operation: String,
    request_id: RequestId,
    parent_id: Option<SpanId>,
    request: Weak<RequestInner>,
    parent: Option<Weak<SpanInner>>,
    shared: Arc<TrackerShared>,
    emitter: Emitter,
    state: Mutex<SpanState>,
}

/// Handle to a span. Cheap to clone; clones refer to the same span.
#[derive(Clone)]
pub struct ScoutSpan {
    inner: Arc<SpanInner>,
}

impl ScoutSpan {
    pub(crate) fn new(
        request: &ScoutRequest,
        parent: Option<&Self>,
        operation: String,
        emitter: Emitter,
    ) -> Self {
        Self {
            inner: Arc::new(SpanInner {
                id: SpanId::new(),
                operation,
                request_id: request.id().clone(),
                parent_id: parent.map(|p| p.id().clone()),
                request: Arc::downgrade(&request.inner),
                parent: parent.map(|p| Arc::downgrade(&p.inner)),
                shared: Arc::clone(request.shared()),
                emitter,
                state: Mutex::new(SpanState {
                    phase: SpanPhase::Pending,
                    started_at: None,
                    stopped_at: None,
                    tags: BTreeMap::new(),
                }),
            }),
        }
    }

    /// Returns the span id.
    #[must_use]
    pub fn id(&self) -> &SpanId {
        &self.inner.id
    }

    /// Returns the operation name.
    #[must_use]
    pub fn operation(&self) -> &str {
        &self.inner.operation
    }

    /// Returns the id of the owning request.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.inner.request_id
    }

    /// Returns the parent span id, `None` for spans directly under the
    /// request.
    #[must_use]
    pub fn parent_id(&self) -> Option<&SpanId> {
        self.inner.parent_id.as_ref()
    }

    /// Returns the owning request while it is alive.
    #[must_use]
    pub fn request(&self) -> Option<ScoutRequest> {
        self.inner.request.upgrade().map(ScoutRequest::from_inner)
    }

    /// Returns the parent span while it is alive.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Self { inner })
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> SpanPhase {
        self.inner.state.lock().phase
    }

    /// Returns true while the span is active.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase() == SpanPhase::Active
    }

    /// Returns true once the span is stopped.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.phase() == SpanPhase::Stopped
    }

    /// Returns when the span started.
    #[must_use]
    pub fn started_at(&self) -> Option<SystemTime> {
        self.inner.state.lock().started_at
    }

    /// Returns when the span stopped.
    #[must_use]
    pub fn stopped_at(&self) -> Option<SystemTime> {
        self.inner.state.lock().stopped_at
    }

    /// Returns a copy of the span's tags.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<String, Value> {
        self.inner.state.lock().tags.clone()
    }

    /// Returns one tag value.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().tags.get(name).cloned()
    }

    pub(crate) fn emitter(&self) -> Emitter {
        self.inner.emitter.clone()
    }

    /// Moves the span to active and returns its `StartSpan`.
    pub(crate) fn begin(&self) -> Option<AgentMessage> {
        let mut state = self.inner.state.lock();
        if state.phase != SpanPhase::Pending {
            return None;
        }
        let at = SystemTime::now();
        state.phase = SpanPhase::Active;
        state.started_at = Some(at);
        Some(AgentMessage::start_span(
            self.inner.request_id.clone(),
            self.inner.id.clone(),
            self.inner.parent_id.clone(),
            self.inner.operation.clone(),
            at,
        ))
    }

    /// Opens a child span under this one.
    pub(crate) fn open_child(
        &self,
        operation: String,
        emitter: Emitter,
    ) -> Option<(Self, AgentMessage)> {
        if !self.is_active() {
            tracing::warn!(
                parent_id = %self.inner.id,
                operation = %operation,
                "parent span is not active, not starting child span"
            );
            return None;
        }
        let Some(request) = self.request() else {
            tracing::warn!(operation = %operation, "request is gone, not starting child span");
            return None;
        };
        request.open_span(Some(self), operation, emitter)
    }

    /// Starts a child span and sends its `StartSpan`.
    ///
    /// Returns `None`, after logging, when this span is not active.
    pub async fn start_child_span(&self, operation: impl Into<String>) -> Option<Self> {
        let (child, message) = self.open_child(operation.into(), self.emitter())?;
        child.emit(message).await;
        Some(child)
    }

    fn tag_message(&self, name: String, value: Value) -> Option<AgentMessage> {
        let mut state = self.inner.state.lock();
        match state.phase {
            SpanPhase::Stopped => {
                tracing::warn!(span_id = %self.inner.id, tag = %name, "span already stopped, dropping tag");
                None
            }
            SpanPhase::Pending => {
                state.tags.insert(name, value);
                None
            }
            SpanPhase::Active => {
                state.tags.insert(name.clone(), value.clone());
                Some(AgentMessage::tag_span(
                    self.inner.request_id.clone(),
                    self.inner.id.clone(),
                    name,
                    value,
                    SystemTime::now(),
                ))
            }
        }
    }

    /// Tags the span and sends `TagSpan`. Tags on a stopped span are dropped.
    pub async fn add_tag(&self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(message) = self.tag_message(name.into(), value.into()) {
            self.emit(message).await;
        }
    }

    /// Same as [`add_tag`](Self::add_tag).
    pub async fn add_context(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.add_tag(name, value).await;
    }

    /// Tags the span without waiting for the send.
    pub fn add_tag_sync(&self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(message) = self.tag_message(name.into(), value.into()) {
            self.emit_detached(message);
        }
    }

    /// Moves the span to stopped and returns its `StopSpan`, if it was active.
    pub(crate) fn stop_message(&self) -> Option<AgentMessage> {
        let mut state = self.inner.state.lock();
        match state.phase {
            SpanPhase::Stopped => None,
            SpanPhase::Pending => {
                state.phase = SpanPhase::Stopped;
                None
            }
            SpanPhase::Active => {
                let at = SystemTime::now();
                state.phase = SpanPhase::Stopped;
                state.stopped_at = Some(at);
                Some(AgentMessage::stop_span(
                    self.inner.request_id.clone(),
                    self.inner.id.clone(),
                    at,
                ))
            }
        }
    }

    /// Stops the span and sends `StopSpan`. Only the first call does
    /// anything.
    pub async fn stop(&self) {
        if let Some(message) = self.stop_message() {
            tracing::trace!(span_id = %self.inner.id, operation = %self.inner.operation, "span stopped");
            self.emit(message).await;
        }
    }

    /// Stops the span without waiting for the send.
    pub fn stop_sync(&self) {
        if let Some(message) = self.stop_message() {
            self.emit_detached(message);
        }
    }

    pub(crate) async fn emit(&self, message: AgentMessage) {
        match &self.inner.emitter {
            Emitter::Deferred(buffer) => buffer.lock().push(message),
            Emitter::Immediate => match self.request() {
                Some(request) => {
                    request.send(message).await;
                }
                None => {
                    self.inner.shared.dispatch(message).await;
                }
            },
        }
    }

    fn emit_detached(&self, message: AgentMessage) {
        match &self.inner.emitter {
            Emitter::Deferred(buffer) => buffer.lock().push(message),
            Emitter::Immediate => self.send_detached(vec![message]),
        }
    }

    /// Queues `messages` on the owning request, behind its earlier
    /// background sends.
    pub(crate) fn send_detached(&self, messages: Vec<AgentMessage>) {
        match self.request() {
            Some(request) => request.send_detached(messages),
            None => {
                self.inner.shared.dispatch_detached(None, messages);
            }
        }
    }
}

impl std::fmt::Debug for ScoutSpan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutSpan")
            .field("id", &self.inner.id)
            .field("operation", &self.inner.operation)
            .field("request_id", &self.inner.request_id)
            .field("parent_id", &self.inner.parent_id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
