//! Tracking over a real socket: ordering, isolation, exactly-once stops,
//! path reporting.

use std::sync::Arc;
use std::time::Duration;

use scout_core::{AgentMessage, EventBus, MessageKind, ScoutEvent, UriReportingLevel};
use scout_test::{MockCoreAgent, RecordingSender};
use scout_tracking::{
    Dispatcher, PATH_TAG, PathPolicy, Tracker, current_request, current_span, instrument, spawn,
};
use scout_transport::{AgentClient, PoolConfig};

struct Harness {
    agent: MockCoreAgent,
    tracker: Tracker,
    events: EventBus,
}

async fn harness(policy: PathPolicy) -> Harness {
    let agent = MockCoreAgent::start().await.unwrap();
    let events = EventBus::default();
    let client = AgentClient::new(agent.socket().clone(), PoolConfig::default())
        .with_events(events.clone());
    client.connect().await.unwrap();
    let tracker = Tracker::new(Arc::new(client), events.clone(), policy);
    Harness {
        agent,
        tracker,
        events,
    }
}

fn count(kinds: &[MessageKind], kind: MessageKind) -> usize {
    kinds.iter().filter(|k| **k == kind).count()
}

#[tokio::test]
async fn request_span_tag_scenario_is_ordered_on_the_wire() {
    let h = harness(PathPolicy::default()).await;

    let request = h.tracker.start_request().await;
    let span = request.start_child_span("db.query").await.unwrap();
    span.add_tag("rows", "3").await;
    span.stop().await;
    request.finish_and_send().await;

    assert_eq!(
        h.agent.kinds(),
        [
            MessageKind::StartRequest,
            MessageKind::StartSpan,
            MessageKind::TagSpan,
            MessageKind::StopSpan,
            MessageKind::FinishRequest,
        ]
    );
    let received = h.agent.received();
    assert!(received.iter().all(|m| m.request_id() == Some(request.id())));
    match &received[2] {
        AgentMessage::TagSpan(tag) => {
            assert_eq!(tag.tag, "rows");
            assert_eq!(tag.value, "3");
        }
        other => panic!("expected TagSpan, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_transactions_keep_their_own_context() {
    let h = harness(PathPolicy::default()).await;

    let run = |tracker: Tracker, label: &'static str, pause: u64| async move {
        tracker
            .transaction(label, |request| async move {
                let mut seen = Vec::new();
                for step in 0..5 {
                    instrument(format!("{label}/{step}"), |span| async move {
                        tokio::time::sleep(Duration::from_millis(pause)).await;
                        let span = span.unwrap();
                        assert_eq!(current_span().unwrap().id(), span.id());
                        span.request_id().clone()
                    })
                    .await;
                    seen.push(current_request().unwrap().id().clone());
                }
                (request.id().clone(), seen)
            })
            .await
    };

    let (a, b) = tokio::join!(
        tokio::spawn(run(h.tracker.clone(), "A", 3)),
        tokio::spawn(run(h.tracker.clone(), "B", 2)),
    );
    let (a_id, a_seen) = a.unwrap();
    let (b_id, b_seen) = b.unwrap();
    assert_ne!(a_id, b_id);
    assert!(a_seen.iter().all(|id| *id == a_id));
    assert!(b_seen.iter().all(|id| *id == b_id));

    for message in h.agent.received() {
        if let AgentMessage::StartSpan(start) = message {
            let expected = if start.operation.starts_with('A') { &a_id } else { &b_id };
            assert_eq!(&start.request_id, expected, "{} crossed requests", start.operation);
        }
    }
}

#[tokio::test]
async fn interleaved_futures_on_one_task_are_isolated() {
    let h = harness(PathPolicy::default()).await;

    let work = |op: &'static str| {
        move |request: scout_tracking::ScoutRequest| async move {
            let seen = instrument(op, |span| async move {
                tokio::task::yield_now().await;
                span.unwrap().request_id().clone()
            })
            .await;
            seen == *request.id()
        }
    };
    let one = h.tracker.transaction("one", work("one/work"));
    let two = h.tracker.transaction("two", work("two/work"));

    let (a, b) = tokio::join!(one, two);
    assert!(a && b);
}

#[tokio::test]
async fn spawned_work_inherits_context_explicitly() {
    let h = harness(PathPolicy::default()).await;

    let (own, inherited) = h
        .tracker
        .transaction("parent", |request| async move {
            let child = spawn(async { current_request().map(|r| r.id().clone()) });
            (request.id().clone(), child.await.unwrap())
        })
        .await;

    assert_eq!(Some(own), inherited);
}

#[tokio::test]
async fn instrument_stops_exactly_once_on_error_and_panic() {
    let h = harness(PathPolicy::default()).await;

    let failed: Result<(), String> = h
        .tracker
        .transaction("errors", |_| async {
            instrument("fails", |_| async { Err("rejected".to_string()) }).await
        })
        .await;
    assert!(failed.is_err());

    let tracker = h.tracker.clone();
    let panicked = tokio::spawn(async move {
        tracker
            .transaction("panics", |_| async {
                instrument("explodes", |span| async move {
                    span.unwrap().add_tag("before", true).await;
                    if true {
                        panic!("handler blew up");
                    }
                })
                .await;
            })
            .await;
    })
    .await;
    assert!(panicked.unwrap_err().is_panic());

    h.agent.wait_for(9, Duration::from_secs(2)).await.unwrap();
    let kinds = h.agent.kinds();
    assert_eq!(count(&kinds, MessageKind::StartSpan), 2);
    assert_eq!(count(&kinds, MessageKind::StopSpan), 2);
    assert_eq!(count(&kinds, MessageKind::FinishRequest), 2);
}

#[tokio::test]
async fn tags_after_terminal_state_are_dropped() {
    let h = harness(PathPolicy::default()).await;

    let request = h.tracker.start_request().await;
    let span = request.start_child_span("work").await.unwrap();
    span.stop().await;
    span.add_tag("late", 1).await;
    request.finish_and_send().await;
    request.add_tag("later", 2).await;

    let kinds = h.agent.kinds();
    assert_eq!(count(&kinds, MessageKind::TagSpan), 0);
    assert_eq!(count(&kinds, MessageKind::TagRequest), 0);
}

#[tokio::test]
async fn ignored_path_is_never_sent_and_reported_once() {
    let h = harness(PathPolicy::new(
        ["/api/v1/users".to_string()],
        UriReportingLevel::FilteredParams,
    ))
    .await;
    let mut events = h.events.subscribe();
    // Connected was published before subscribing.

    h.tracker
        .transaction("GET /api/v1/users/42", |request| async move {
            assert!(!request.tag_path("/api/v1/users/42").await);
        })
        .await;

    let mut ignored = 0;
    while let Ok(event) = events.try_recv() {
        if event == ScoutEvent::IgnoredPathDetected("/api/v1/users/42".into()) {
            ignored += 1;
        }
    }
    assert_eq!(ignored, 1);
    assert!(!h.agent.kinds().contains(&MessageKind::TagRequest));
}

#[tokio::test]
async fn sensitive_query_parameters_are_scrubbed_on_the_wire() {
    let h = harness(PathPolicy::new(Vec::new(), UriReportingLevel::FilteredParams)).await;

    h.tracker
        .transaction("GET /search", |request| async move {
            request.tag_path("/search?password=abc123&q=shoes").await;
        })
        .await;

    let tag = h
        .agent
        .received()
        .into_iter()
        .find_map(|m| match m {
            AgentMessage::TagRequest(tag) => Some(tag),
            _ => None,
        })
        .unwrap();
    assert_eq!(tag.tag, PATH_TAG);
    assert_eq!(tag.value, "/search?password=[FILTERED]&q=shoes");
}

#[tokio::test]
async fn request_sent_follows_accepted_finish() {
    let h = harness(PathPolicy::default()).await;
    let mut events = h.events.subscribe();

    let id = h
        .tracker
        .transaction("t", |request| async move { request.id().clone() })
        .await;

    assert_eq!(
        events.recv().await.unwrap(),
        ScoutEvent::RequestSent { request_id: id }
    );
}

#[tokio::test]
async fn monitoring_off_reports_nothing_but_runs_code() {
    let agent = MockCoreAgent::start().await.unwrap();
    let client = AgentClient::new(agent.socket().clone(), PoolConfig::default());
    client.connect().await.unwrap();
    let dispatcher = Arc::new(Dispatcher::new(false));
    dispatcher.install(Arc::new(client));
    let tracker = Tracker::new(dispatcher, EventBus::default(), PathPolicy::default());

    let value = tracker
        .transaction("t", |_| async { instrument("work", |_| async { 42 }).await })
        .await;

    assert_eq!(value, 42);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(agent.received().is_empty());
}

#[tokio::test]
async fn unreachable_agent_never_breaks_the_application() {
    let recorder = Arc::new(RecordingSender::failing(scout_test::FailureMode::Disconnected));
    let tracker = Tracker::new(recorder.clone(), EventBus::default(), PathPolicy::default());

    let value = tracker
        .transaction("t", |request| async move {
            request.add_tag("user", "42").await;
            instrument("work", |span| async move {
                span.unwrap().add_tag("k", "v").await;
                "done"
            })
            .await
        })
        .await;

    assert_eq!(value, "done");
    assert!(recorder.is_empty());
    assert!(recorder.attempts() >= 5);
}
