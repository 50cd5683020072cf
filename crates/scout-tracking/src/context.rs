//! Task-scoped tracking context.
//!
//! The current request and span live in a tokio task-local, so each task
//! sees only the context it was scoped with. Frames are immutable: entering
//! a span scopes a new frame for the duration of a future, and the outer
//! frame is back in place when that future completes. Plain
//! `tokio::spawn` starts with an empty context; use [`spawn`] or
//! [`TrackingContext::scope`] to carry it over.

use std::future::Future;

use scout_core::AgentMessage;
use tokio::task::JoinHandle;
use tokio::task::futures::TaskLocalFuture;

use crate::request::ScoutRequest;
use crate::span::{Emitter, ScoutSpan};

tokio::task_local! {
    static CONTEXT: TrackingContext;
}

/// Snapshot of the current request and span.
#[derive(Debug, Clone, Default)]
pub struct TrackingContext {
    request: Option<ScoutRequest>,
    span: Option<ScoutSpan>,
}

impl TrackingContext {
    /// Returns the context of the running task, or an empty one.
    #[must_use]
    pub fn current() -> Self {
        CONTEXT.try_with(Clone::clone).unwrap_or_default()
    }

    /// A context holding only `request`.
    #[must_use]
    pub fn for_request(request: ScoutRequest) -> Self {
        Self {
            request: Some(request),
            span: None,
        }
    }

    /// This context with `span` as the innermost span.
    #[must_use]
    pub fn with_span(self, span: ScoutSpan) -> Self {
        Self {
            span: Some(span),
            ..self
        }
    }

    /// Returns the request unless it has finished.
    #[must_use]
    pub fn request(&self) -> Option<ScoutRequest> {
        self.request.as_ref().filter(|r| !r.is_closed()).cloned()
    }

    /// Returns the innermost span that is still active, walking up through
    /// parents past stopped ones.
    #[must_use]
    pub fn span(&self) -> Option<ScoutSpan> {
        let mut cursor = self.span.clone();
        while let Some(span) = cursor {
            if span.is_active() {
                return Some(span);
            }
            cursor = span.parent();
        }
        None
    }

    pub(crate) fn parent(&self) -> Option<Parent> {
        self.span()
            .map(Parent::Span)
            .or_else(|| self.request().map(Parent::Request))
    }

    /// Runs `future` with this context as current.
    pub fn scope<F: Future>(self, future: F) -> TaskLocalFuture<Self, F> {
        CONTEXT.scope(self, future)
    }

    /// Runs `f` with this context as current.
    pub fn sync_scope<R>(self, f: impl FnOnce() -> R) -> R {
        CONTEXT.sync_scope(self, f)
    }
}

/// Returns the current task's request unless it has finished.
#[must_use]
pub fn current_request() -> Option<ScoutRequest> {
    TrackingContext::current().request()
}

/// Returns the current task's innermost active span.
#[must_use]
pub fn current_span() -> Option<ScoutSpan> {
    TrackingContext::current().span()
}

/// Spawns `future` on tokio with the current context carried over.
pub fn spawn<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    tokio::spawn(TrackingContext::current().scope(future))
}

/// What a new span is opened under.
#[derive(Clone)]
pub(crate) enum Parent {
    Request(ScoutRequest),
    Span(ScoutSpan),
}

impl Parent {
    pub(crate) fn emitter(&self) -> Emitter {
        match self {
            Self::Request(_) => Emitter::Immediate,
            Self::Span(span) => span.emitter(),
        }
    }

    pub(crate) fn open_child(
        &self,
        operation: String,
        emitter: Emitter,
    ) -> Option<(ScoutSpan, AgentMessage)> {
        match self {
            Self::Request(request) => request.open_span(None, operation, emitter),
            Self::Span(span) => span.open_child(operation, emitter),
        }
    }

    pub(crate) async fn start_child_span(&self, operation: String) -> Option<ScoutSpan> {
        let (span, message) = self.open_child(operation, self.emitter())?;
        span.emit(message).await;
        Some(span)
    }
}
