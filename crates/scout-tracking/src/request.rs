//! Requests: the root of a span tree.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::Mutex;
use scout_core::{AgentMessage, RequestId, ScoutEvent};
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::filter::PATH_TAG;
use crate::span::{Emitter, ScoutSpan};
use crate::tracker::TrackerShared;

/// Lifecycle of a request. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    /// Created, `StartRequest` not sent yet.
    Pending,
    /// `StartRequest` sent; spans and tags are accepted.
    Active,
    /// `FinishRequest` in flight.
    Finishing,
    /// Done. Terminal.
    Sent,
}

#[derive(Debug)]
struct RequestState {
    phase: RequestPhase,
    started_at: Option<SystemTime>,
    finished_at: Option<SystemTime>,
    spans: Vec<ScoutSpan>,
    tags: BTreeMap<String, Value>,
}

pub(crate) struct RequestInner {
    id: RequestId,
    created_at: SystemTime,
    shared: Arc<TrackerShared>,
    state: Mutex<RequestState>,
    /// Tail of this request's queued background sends.
    outbox: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to a request. Cheap to clone; clones refer to the same request.
#[derive(Clone)]
pub struct ScoutRequest {
    pub(crate) inner: Arc<RequestInner>,
}

impl ScoutRequest {
    pub(crate) fn new(shared: Arc<TrackerShared>) -> Self {
        Self {
            inner: Arc::new(RequestInner {
                id: RequestId::new(),
                created_at: SystemTime::now(),
                shared,
                state: Mutex::new(RequestState {
                    phase: RequestPhase::Pending,
                    started_at: None,
                    finished_at: None,
                    spans: Vec::new(),
                    tags: BTreeMap::new(),
                }),
                outbox: Mutex::new(None),
            }),
        }
    }

    pub(crate) const fn from_inner(inner: Arc<RequestInner>) -> Self {
        Self { inner }
    }

    pub(crate) fn shared(&self) -> &Arc<TrackerShared> {
        &self.inner.shared
    }

    /// Queues `messages` behind every earlier background send of this
    /// request.
    pub(crate) fn send_detached(&self, messages: Vec<AgentMessage>) {
        let mut outbox = self.inner.outbox.lock();
        let previous = outbox.take();
        *outbox = self.inner.shared.dispatch_detached(previous, messages);
    }

    /// Waits until every queued background send has gone out.
    pub(crate) async fn drain(&self) {
        loop {
            let pending = self.inner.outbox.lock().take();
            let Some(pending) = pending else {
                return;
            };
            if let Err(e) = pending.await {
                tracing::debug!(request_id = %self.inner.id, error = %e, "queued send did not complete");
            }
        }
    }

    /// Sends one message after everything already queued for this request.
    pub(crate) async fn send(&self, message: AgentMessage) -> bool {
        self.drain().await;
        self.inner.shared.dispatch(message).await
    }

    /// Returns the request id.
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.inner.id
    }

    /// Returns when the request object was created.
    #[must_use]
    pub fn created_at(&self) -> SystemTime {
        self.inner.created_at
    }

    /// Returns the current phase.
    #[must_use]
    pub fn phase(&self) -> RequestPhase {
        self.inner.state.lock().phase
    }

    /// Returns true while spans and tags are accepted.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase() == RequestPhase::Active
    }

    /// Returns true once finishing has begun.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        matches!(self.phase(), RequestPhase::Finishing | RequestPhase::Sent)
    }

    /// Returns when `StartRequest` was produced.
    #[must_use]
    pub fn started_at(&self) -> Option<SystemTime> {
        self.inner.state.lock().started_at
    }

    /// Returns when `FinishRequest` was produced.
    #[must_use]
    pub fn finished_at(&self) -> Option<SystemTime> {
        self.inner.state.lock().finished_at
    }

    /// Returns every span opened under this request, in start order.
    #[must_use]
    pub fn spans(&self) -> Vec<ScoutSpan> {
        self.inner.state.lock().spans.clone()
    }

    /// Returns a copy of the request's tags.
    #[must_use]
    pub fn tags(&self) -> BTreeMap<String, Value> {
        self.inner.state.lock().tags.clone()
    }

    /// Returns one tag value.
    #[must_use]
    pub fn tag(&self, name: &str) -> Option<Value> {
        self.inner.state.lock().tags.get(name).cloned()
    }

    /// Sends `StartRequest`, then any tags added while pending. Does
    /// nothing unless the request is pending.
    pub async fn start(&self) {
        let (at, queued) = {
            let mut state = self.inner.state.lock();
            if state.phase != RequestPhase::Pending {
                return;
            }
            let at = SystemTime::now();
            state.phase = RequestPhase::Active;
            state.started_at = Some(at);
            (at, state.tags.clone())
        };
        tracing::debug!(request_id = %self.inner.id, "request started");
        self.send(AgentMessage::start_request(self.inner.id.clone(), at))
            .await;
        for (tag, value) in queued {
            self.send(AgentMessage::tag_request(
                self.inner.id.clone(),
                tag,
                value,
                SystemTime::now(),
            ))
            .await;
        }
    }

    fn tag_message(&self, name: String, value: Value) -> Option<AgentMessage> {
        let mut state = self.inner.state.lock();
        match state.phase {
            RequestPhase::Finishing | RequestPhase::Sent => {
                tracing::warn!(request_id = %self.inner.id, tag = %name, "request already finished, dropping tag");
                None
            }
            RequestPhase::Pending => {
                state.tags.insert(name, value);
                None
            }
            RequestPhase::Active => {
                state.tags.insert(name.clone(), value.clone());
                Some(AgentMessage::tag_request(
                    self.inner.id.clone(),
                    name,
                    value,
                    SystemTime::now(),
                ))
            }
        }
    }

    /// Tags the request and sends `TagRequest`. Tags on a finished request
    /// are dropped; tags on a pending request are sent when it starts.
    pub async fn add_tag(&self, name: impl Into<String>, value: impl Into<Value>) {
        if let Some(message) = self.tag_message(name.into(), value.into()) {
            self.send(message).await;
        }
    }

    /// Same as [`add_tag`](Self::add_tag).
    pub async fn add_context(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.add_tag(name, value).await;
    }

    /// Reports `path` as the request's `path` tag.
    ///
    /// An ignored path is not reported at all and publishes
    /// [`ScoutEvent::IgnoredPathDetected`]; otherwise the path is filtered
    /// per the reporting level first. Returns false if the path was ignored.
    pub async fn tag_path(&self, path: &str) -> bool {
        let policy = &self.inner.shared.policy;
        if let Some(prefix) = policy.ignored_by(path) {
            tracing::debug!(request_id = %self.inner.id, path, prefix, "path ignored");
            self.inner
                .shared
                .events
                .publish(ScoutEvent::IgnoredPathDetected(path.to_string()));
            return false;
        }
        let filtered = policy.filter(path);
        self.add_tag(PATH_TAG, filtered).await;
        true
    }

    /// Opens a span under this request (directly, or under `parent`).
    pub(crate) fn open_span(
        &self,
        parent: Option<&ScoutSpan>,
        operation: String,
        emitter: Emitter,
    ) -> Option<(ScoutSpan, AgentMessage)> {
        let mut state = self.inner.state.lock();
        if state.phase != RequestPhase::Active {
            tracing::warn!(
                request_id = %self.inner.id,
                operation = %operation,
                phase = ?state.phase,
                "request is not active, not starting span"
            );
            return None;
        }
        let span = ScoutSpan::new(self, parent, operation, emitter);
        let message = span.begin()?;
        state.spans.push(span.clone());
        Some((span, message))
    }

    /// Starts a span directly under the request and sends its `StartSpan`.
    ///
    /// Returns `None`, after logging, unless the request is active.
    pub async fn start_child_span(&self, operation: impl Into<String>) -> Option<ScoutSpan> {
        let (span, message) = self.open_span(None, operation.into(), Emitter::Immediate)?;
        span.emit(message).await;
        Some(span)
    }

    /// Finishes the request: stops spans still active (latest first), sends
    /// `FinishRequest` and publishes [`ScoutEvent::RequestSent`] once the
    /// core agent accepted it. Does nothing unless the request is active.
    ///
    /// Messages still queued by synchronous instrumentation go out first.
    pub async fn finish_and_send(&self) {
        if let Some(stops) = self.begin_finish() {
            self.complete_finish(stops).await;
        }
    }

    /// Same as [`finish_and_send`](Self::finish_and_send).
    pub async fn stop(&self) {
        self.finish_and_send().await;
    }

    /// Moves an active request to finishing and stops its dangling spans,
    /// returning their `StopSpan` messages.
    fn begin_finish(&self) -> Option<Vec<AgentMessage>> {
        let dangling: Vec<ScoutSpan> = {
            let mut state = self.inner.state.lock();
            if state.phase != RequestPhase::Active {
                tracing::trace!(request_id = %self.inner.id, phase = ?state.phase, "finish ignored");
                return None;
            }
            state.phase = RequestPhase::Finishing;
            state
                .spans
                .iter()
                .rev()
                .filter(|s| s.is_active())
                .cloned()
                .collect()
        };
        if !dangling.is_empty() {
            tracing::warn!(
                request_id = %self.inner.id,
                count = dangling.len(),
                "finishing request with active spans, stopping them"
            );
        }
        Some(dangling.iter().filter_map(ScoutSpan::stop_message).collect())
    }

    async fn complete_finish(&self, stops: Vec<AgentMessage>) {
        for message in stops {
            self.send(message).await;
        }

        let at = SystemTime::now();
        let accepted = self
            .send(AgentMessage::finish_request(self.inner.id.clone(), at))
            .await;
        {
            let mut state = self.inner.state.lock();
            state.phase = RequestPhase::Sent;
            state.finished_at = Some(at);
        }
        if accepted {
            tracing::debug!(request_id = %self.inner.id, "request sent");
            self.inner.shared.events.publish(ScoutEvent::RequestSent {
                request_id: self.inner.id.clone(),
            });
        }
    }

    /// Finishes the request on a background task.
    ///
    /// Dangling spans are stopped before this returns, so a span stop that
    /// races the finish can never land after `FinishRequest`.
    pub(crate) fn finish_detached(&self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            if self.is_active() {
                tracing::warn!(request_id = %self.inner.id, "no async runtime, request not finished");
            }
            return;
        };
        let Some(stops) = self.begin_finish() else {
            return;
        };
        let request = self.clone();
        handle.spawn(async move { request.complete_finish(stops).await });
    }
}

impl std::fmt::Debug for ScoutRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoutRequest")
            .field("id", &self.inner.id)
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PathPolicy;
    use crate::tracker::Tracker;
    use scout_core::{EventBus, MessageKind, UriReportingLevel};
    use scout_test::{FailureMode, RecordingSender};

    fn tracker_with(policy: PathPolicy) -> (Tracker, Arc<RecordingSender>, EventBus) {
        let recorder = Arc::new(RecordingSender::new());
        let events = EventBus::default();
        let tracker = Tracker::new(recorder.clone(), events.clone(), policy);
        (tracker, recorder, events)
    }

    fn tracker() -> (Tracker, Arc<RecordingSender>, EventBus) {
        tracker_with(PathPolicy::default())
    }

    #[tokio::test]
    async fn test_lifecycle_order() {
        let (tracker, recorder, _) = tracker();
        let request = tracker.start_request().await;
        assert!(request.is_active());

        let span = request.start_child_span("db.query").await.unwrap();
        span.add_tag("rows", "3").await;
        span.stop().await;
        request.finish_and_send().await;

        assert_eq!(
            recorder.kinds(),
            [
                MessageKind::StartRequest,
                MessageKind::StartSpan,
                MessageKind::TagSpan,
                MessageKind::StopSpan,
                MessageKind::FinishRequest,
            ]
        );
        assert_eq!(request.phase(), RequestPhase::Sent);
        assert!(request.finished_at().is_some());
    }

    #[tokio::test]
    async fn test_finish_is_idempotent_and_publishes_once() {
        let (tracker, recorder, events) = tracker();
        let mut rx = events.subscribe();
        let request = tracker.start_request().await;

        request.finish_and_send().await;
        request.stop().await;

        let finishes = recorder
            .kinds()
            .into_iter()
            .filter(|k| *k == MessageKind::FinishRequest)
            .count();
        assert_eq!(finishes, 1);
        assert_eq!(
            rx.try_recv().unwrap(),
            ScoutEvent::RequestSent {
                request_id: request.id().clone()
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_finish_stops_dangling_spans_latest_first() {
        let (tracker, recorder, _) = tracker();
        let request = tracker.start_request().await;
        let outer = request.start_child_span("outer").await.unwrap();
        let inner = outer.start_child_span("inner").await.unwrap();

        request.finish_and_send().await;

        assert!(outer.is_stopped() && inner.is_stopped());
        let stops: Vec<_> = recorder
            .messages()
            .into_iter()
            .filter_map(|m| match m {
                AgentMessage::StopSpan(s) => Some(s.span_id),
                _ => None,
            })
            .collect();
        assert_eq!(stops, [inner.id().clone(), outer.id().clone()]);
        assert_eq!(recorder.kinds().last(), Some(&MessageKind::FinishRequest));
    }

    #[tokio::test]
    async fn test_tag_after_finish_dropped() {
        let (tracker, recorder, _) = tracker();
        let request = tracker.start_request().await;
        request.finish_and_send().await;
        let before = recorder.len();

        request.add_tag("late", true).await;

        assert_eq!(recorder.len(), before);
        assert_eq!(request.tag("late"), None);
    }

    #[tokio::test]
    async fn test_no_span_after_finish() {
        let (tracker, _, _) = tracker();
        let request = tracker.start_request().await;
        request.finish_and_send().await;
        assert!(request.start_child_span("late").await.is_none());
    }

    #[tokio::test]
    async fn test_pending_tags_sent_on_start() {
        let (tracker, recorder, _) = tracker();
        let request = tracker.new_request();
        request.add_tag("user", "42").await;
        assert!(recorder.is_empty());

        request.start().await;
        assert_eq!(
            recorder.kinds(),
            [MessageKind::StartRequest, MessageKind::TagRequest]
        );
    }

    #[tokio::test]
    async fn test_failed_finish_does_not_publish() {
        let (tracker, recorder, events) = tracker();
        let mut rx = events.subscribe();
        let request = tracker.start_request().await;
        recorder.fail_with(Some(FailureMode::Disconnected));

        request.finish_and_send().await;

        assert_eq!(request.phase(), RequestPhase::Sent);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_unreachable_agent_is_fail_soft() {
        let (tracker, recorder, _) = tracker();
        recorder.fail_with(Some(FailureMode::Timeout));
        let request = tracker.start_request().await;
        let span = request.start_child_span("work").await.unwrap();
        span.add_tag("k", "v").await;
        span.stop().await;
        request.finish_and_send().await;
        assert!(recorder.is_empty());
        assert_eq!(recorder.attempts(), 5);
    }

    #[tokio::test]
    async fn test_ignored_path_is_not_tagged() {
        let (tracker, recorder, events) = tracker_with(PathPolicy::new(
            ["/api/v1/users".to_string()],
            UriReportingLevel::FilteredParams,
        ));
        let mut rx = events.subscribe();
        let request = tracker.start_request().await;

        assert!(!request.tag_path("/api/v1/users/42").await);

        assert_eq!(
            rx.try_recv().unwrap(),
            ScoutEvent::IgnoredPathDetected("/api/v1/users/42".into())
        );
        assert!(rx.try_recv().is_err());
        assert!(!recorder.kinds().contains(&MessageKind::TagRequest));
        assert_eq!(request.tag(PATH_TAG), None);
    }

    #[tokio::test]
    async fn test_path_is_scrubbed() {
        let (tracker, _, _) = tracker();
        let request = tracker.start_request().await;
        assert!(request.tag_path("/search?password=abc123&q=1").await);
        assert_eq!(
            request.tag(PATH_TAG),
            Some(Value::from("/search?password=[FILTERED]&q=1"))
        );
    }
}
