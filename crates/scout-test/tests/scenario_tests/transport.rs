//! Transport: acknowledgements, timeouts, connection isolation.

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use scout_core::{AgentMessage, MessageKind, RequestId, ScoutEvent, SocketAddress};
use scout_test::{AgentMode, MockCoreAgent};
use scout_transport::{AgentClient, PoolConfig, TransportError};

fn config() -> PoolConfig {
    PoolConfig {
        send_timeout: Duration::from_millis(300),
        socket_timeout: Duration::from_millis(300),
        ..PoolConfig::default()
    }
}

fn start_request(id: &RequestId) -> AgentMessage {
    AgentMessage::start_request(id.clone(), SystemTime::now())
}

#[tokio::test]
async fn send_against_live_agent_is_acknowledged() {
    let agent = MockCoreAgent::start().await.unwrap();
    let client = AgentClient::new(agent.socket().clone(), config());
    client.connect().await.unwrap();
    let id = RequestId::new();

    let response = client.send(start_request(&id)).await.unwrap();

    assert!(response.is_success());
    assert_eq!(response.kind, MessageKind::StartRequest);
    assert_eq!(response.body["request_id"], id.as_str());
    assert_eq!(agent.kinds(), [MessageKind::StartRequest]);
}

#[tokio::test]
async fn unreachable_socket_fails_within_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let client = AgentClient::new(SocketAddress::from_path(dir.path().join("none.sock")), config());
    let mut events = client.events().subscribe();

    let started = Instant::now();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, TransportError::Disconnected(_)));
    let err = client.send(start_request(&RequestId::new())).await.unwrap_err();
    assert!(matches!(err, TransportError::Disconnected(_)));

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(matches!(events.try_recv().unwrap(), ScoutEvent::SocketError(_)));
}

#[tokio::test]
async fn silent_agent_times_out() {
    let agent = MockCoreAgent::start().await.unwrap();
    let client = AgentClient::new(agent.socket().clone(), config());
    client.connect().await.unwrap();
    agent.set_mode(AgentMode::Silent);

    let started = Instant::now();
    let err = client.send(start_request(&RequestId::new())).await.unwrap_err();

    assert!(matches!(err, TransportError::SendTimeout(_)));
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn rejected_message_still_resolves() {
    let agent = MockCoreAgent::start().await.unwrap();
    agent.set_mode(AgentMode::Reject);
    let client = AgentClient::new(agent.socket().clone(), config());
    client.connect().await.unwrap();

    let response = client.send(AgentMessage::register("app", "key")).await.unwrap();

    assert!(!response.is_success());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_sends_never_share_a_connection() {
    let agent = MockCoreAgent::start().await.unwrap();
    agent.set_delay(Duration::from_millis(5));
    let client = Arc::new(AgentClient::new(
        agent.socket().clone(),
        PoolConfig {
            max: 8,
            send_timeout: Duration::from_secs(5),
            socket_timeout: Duration::from_secs(5),
            ..PoolConfig::default()
        },
    ));
    client.connect().await.unwrap();

    let tasks: Vec<_> = (0..64)
        .map(|_| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                let id = RequestId::new();
                let response = client.send(start_request(&id)).await.unwrap();
                (id, response)
            })
        })
        .collect();

    for task in tasks {
        let (id, response) = task.await.unwrap();
        assert_eq!(response.body["request_id"], id.as_str());
    }
    assert_eq!(agent.received().len(), 64);
    assert!(agent.connection_count() <= 8);
    assert_eq!(client.pool().unwrap().in_use(), 0);
}

#[tokio::test]
async fn send_async_does_not_wait_for_slow_agent() {
    let agent = MockCoreAgent::start().await.unwrap();
    let client = AgentClient::new(agent.socket().clone(), config());
    client.connect().await.unwrap();
    agent.set_delay(Duration::from_millis(200));

    let started = Instant::now();
    client
        .send_async(AgentMessage::register("app", "key"))
        .await
        .unwrap();

    assert!(started.elapsed() < Duration::from_millis(150));
    agent.wait_for(1, Duration::from_secs(1)).await.unwrap();
}

#[tokio::test]
async fn disconnect_publishes_and_refuses_sends() {
    let agent = MockCoreAgent::start().await.unwrap();
    let client = AgentClient::new(agent.socket().clone(), config());
    let mut events = client.events().subscribe();
    client.connect().await.unwrap();
    client.disconnect();

    assert_eq!(events.recv().await.unwrap(), ScoutEvent::Connected);
    assert_eq!(events.recv().await.unwrap(), ScoutEvent::Disconnected);
    assert!(matches!(
        client.send(start_request(&RequestId::new())).await.unwrap_err(),
        TransportError::Disconnected(_)
    ));
}

#[tokio::test]
async fn cancelled_send_never_leaks_its_response() {
    let agent = MockCoreAgent::start().await.unwrap();
    agent.set_delay(Duration::from_millis(200));
    let client = AgentClient::new(
        agent.socket().clone(),
        PoolConfig {
            max: 1,
            ..config()
        },
    );
    client.connect().await.unwrap();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), client.send(start_request(&RequestId::new())))
            .await;
    assert!(abandoned.is_err());
    agent.set_delay(Duration::ZERO);

    let response = client.send(AgentMessage::register("app", "key")).await.unwrap();

    assert_eq!(response.kind, MessageKind::Register);
    assert_eq!(client.pool().unwrap().in_use(), 0);
}
