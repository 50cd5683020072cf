//! Request tracker and scoped instrumentation.
//!
//! Every tracking entry point is fail-soft: send failures are logged and
//! swallowed, and the wrapped user code always runs.

use std::future::Future;
use std::sync::Arc;

use scout_core::{AgentMessage, AgentSender, EventBus, ScoutConfig, ScoutEvent};
use tokio::task::JoinHandle;

use crate::context::TrackingContext;
use crate::filter::PathPolicy;
use crate::request::ScoutRequest;
use crate::span::{Emitter, ScoutSpan, SyncBuffer};

pub(crate) struct TrackerShared {
    pub(crate) sender: Arc<dyn AgentSender>,
    pub(crate) events: EventBus,
    pub(crate) policy: PathPolicy,
}

impl TrackerShared {
    /// Sends one message. Returns true if the core agent accepted it.
    pub(crate) async fn dispatch(&self, message: AgentMessage) -> bool {
        let kind = message.kind();
        match self.sender.send(message).await {
            Ok(response) => response.is_success(),
            Err(e) if e.is_policy_noop() => {
                tracing::debug!(kind = %kind, error = %e, "message not sent");
                false
            }
            Err(e) => {
                tracing::warn!(kind = %kind, error = %e, "failed to send message to core agent");
                false
            }
        }
    }

    /// Sends `messages` in order on a background task that first waits for
    /// `after`. Returns the task, or `after` unchanged when there is nothing
    /// to send or no runtime to send on.
    pub(crate) fn dispatch_detached(
        self: &Arc<Self>,
        after: Option<JoinHandle<()>>,
        messages: Vec<AgentMessage>,
    ) -> Option<JoinHandle<()>> {
        if messages.is_empty() {
            return after;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(count = messages.len(), "no async runtime, dropping tracking messages");
            return after;
        };
        let shared = Arc::clone(self);
        Some(handle.spawn(async move {
            if let Some(previous) = after {
                if let Err(e) = previous.await {
                    tracing::debug!(error = %e, "earlier queued send did not complete");
                }
            }
            for message in messages {
                shared.dispatch(message).await;
            }
        }))
    }
}

/// Creates requests and reports them through an [`AgentSender`].
#[derive(Clone)]
pub struct Tracker {
    shared: Arc<TrackerShared>,
}

impl Tracker {
    /// Creates a tracker sending through `sender` and publishing on `events`.
    #[must_use]
    pub fn new(sender: Arc<dyn AgentSender>, events: EventBus, policy: PathPolicy) -> Self {
        Self {
            shared: Arc::new(TrackerShared {
                sender,
                events,
                policy,
            }),
        }
    }

    /// Creates a tracker with the path policy from `config`.
    #[must_use]
    pub fn from_config(sender: Arc<dyn AgentSender>, events: EventBus, config: &ScoutConfig) -> Self {
        Self::new(sender, events, PathPolicy::from_config(config))
    }

    /// Returns the event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.shared.events
    }

    /// Returns the path policy.
    #[must_use]
    pub fn policy(&self) -> &PathPolicy {
        &self.shared.policy
    }

    /// Returns true if `path` matches an ignore prefix, publishing
    /// [`ScoutEvent::IgnoredPathDetected`] when it does.
    pub fn ignores_path(&self, path: &str) -> bool {
        let ignored = self.shared.policy.is_ignored(path);
        if ignored {
            tracing::debug!(path, "path ignored");
            self.shared
                .events
                .publish(ScoutEvent::IgnoredPathDetected(path.to_string()));
        }
        ignored
    }

    /// Creates a pending request without sending anything.
    #[must_use]
    pub fn new_request(&self) -> ScoutRequest {
        ScoutRequest::new(Arc::clone(&self.shared))
    }

    /// Creates and starts a request. The request is returned even if
    /// `StartRequest` could not be sent.
    pub async fn start_request(&self) -> ScoutRequest {
        let request = self.new_request();
        request.start().await;
        request
    }

    /// Runs `f` as a new request.
    ///
    /// The request is current inside `f` and is finished after `f`
    /// completes. If `f` panics or is dropped early the request is finished
    /// on a background task, after any span stops the unwinding produced.
    pub async fn transaction<F, Fut, T>(&self, name: &str, f: F) -> T
    where
        F: FnOnce(ScoutRequest) -> Fut,
        Fut: Future<Output = T>,
    {
        let request = self.start_request().await;
        tracing::debug!(transaction = name, request_id = %request.id(), "transaction started");
        let _finish = CloseOnDrop::Request(request.clone());

        let scoped = request.clone();
        let out = TrackingContext::for_request(request.clone())
            .scope(async move { f(scoped).await })
            .await;
        request.finish_and_send().await;
        out
    }
}

impl std::fmt::Debug for Tracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tracker")
            .field("policy", &self.shared.policy)
            .finish_non_exhaustive()
    }
}

/// Runs `f` inside a new span named `operation`.
///
/// The span is opened under the current span, or the current request when
/// no span is active, and is current inside `f`. It is stopped exactly once
/// when `f` completes, panics or is dropped; `f` may also stop it early
/// through the handle it receives. Without an active request or span `f`
/// still runs and receives `None`.
pub async fn instrument<F, Fut, T>(operation: impl Into<String>, f: F) -> T
where
    F: FnOnce(Option<ScoutSpan>) -> Fut,
    Fut: Future<Output = T>,
{
    let operation = operation.into();
    let context = TrackingContext::current();
    let Some(parent) = context.parent() else {
        tracing::error!(operation = %operation, "no active request or span, running uninstrumented");
        return f(None).await;
    };
    let Some(span) = parent.start_child_span(operation).await else {
        return f(None).await;
    };
    let _stop = CloseOnDrop::Span(span.clone());

    let scoped = span.clone();
    let out = context
        .with_span(span.clone())
        .scope(async move { f(Some(scoped)).await })
        .await;
    span.stop().await;
    out
}

/// Synchronous [`instrument`].
///
/// Span messages produced inside `f`, nested synchronous spans included,
/// are buffered and queued on the request once the outermost synchronous
/// span ends. Queued messages reach the agent before anything the request
/// sends afterwards, `FinishRequest` included.
pub fn instrument_sync<F, T>(operation: impl Into<String>, f: F) -> T
where
    F: FnOnce(Option<ScoutSpan>) -> T,
{
    let operation = operation.into();
    let context = TrackingContext::current();
    let Some(parent) = context.parent() else {
        tracing::error!(operation = %operation, "no active request or span, running uninstrumented");
        return f(None);
    };
    let (buffer, flushes) = match parent.emitter() {
        Emitter::Deferred(buffer) => (buffer, false),
        Emitter::Immediate => (SyncBuffer::default(), true),
    };
    let Some((span, message)) = parent.open_child(operation, Emitter::Deferred(Arc::clone(&buffer)))
    else {
        return f(None);
    };
    buffer.lock().push(message);
    let _flush = FlushOnDrop {
        span: span.clone(),
        buffer: flushes.then_some(buffer),
    };

    let scoped = span.clone();
    context.with_span(span).sync_scope(move || f(Some(scoped)))
}

enum CloseOnDrop {
    Request(ScoutRequest),
    Span(ScoutSpan),
}

impl Drop for CloseOnDrop {
    fn drop(&mut self) {
        match self {
            Self::Request(request) => request.finish_detached(),
            Self::Span(span) => span.stop_sync(),
        }
    }
}

struct FlushOnDrop {
    span: ScoutSpan,
    buffer: Option<SyncBuffer>,
}

impl Drop for FlushOnDrop {
    fn drop(&mut self) {
        self.span.stop_sync();
        if let Some(buffer) = self.buffer.take() {
            let messages = std::mem::take(&mut *buffer.lock());
            self.span.send_detached(messages);
        }
    }
}
