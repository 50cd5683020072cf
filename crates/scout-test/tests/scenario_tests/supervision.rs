//! Provisioned binary through to a live connection: spawn, connect, stop.

use std::time::Duration;

use scout_core::{AgentMessage, MessageKind, SocketAddress};
use scout_process::{ProcessOptions, ProcessSupervisor};
use scout_provision::{PlatformTriple, ProvisionOptions, Provisioner};
use scout_test::{AgentArchive, MockCoreAgent};
use scout_transport::{AgentClient, PoolConfig};
use tokio_test::assert_ok;

const VERSION: &str = "v1.4.0";

#[cfg(unix)]
#[tokio::test]
async fn provisioned_agent_is_spawned_connected_and_stopped() {
    let cache = tempfile::tempdir().unwrap();
    let downloads = tempfile::tempdir().unwrap();
    let provisioner = Provisioner::new(
        ProvisionOptions::new(cache.path(), format!("file://{}", downloads.path().display()))
            .with_triple(PlatformTriple::X86_64LinuxGnu),
    );
    let version = scout_core::CoreAgentVersion::parse(VERSION).unwrap();
    AgentArchive::new(VERSION)
        .write(downloads.path(), &provisioner.bundle_name(&version).unwrap())
        .unwrap();

    let binary = assert_ok!(provisioner.resolve(&version).await);
    let socket = SocketAddress::beside_binary(&binary);
    let supervisor = ProcessSupervisor::new(ProcessOptions {
        startup_wait: Duration::from_secs(5),
        stop_grace: Duration::from_secs(2),
        allow_shutdown: true,
        ..ProcessOptions::new(binary, socket.clone())
    });

    // The fixture binary only sleeps; the mock agent takes the socket.
    let path = socket.path().to_path_buf();
    let binder = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        MockCoreAgent::bind(path).await.unwrap()
    });

    let handle = assert_ok!(supervisor.start().await);
    assert!(handle.pid.is_some());
    assert!(!handle.pre_existing);
    let agent = binder.await.unwrap();

    let client = AgentClient::new(socket, PoolConfig::default());
    assert_ok!(client.connect().await);
    let response = assert_ok!(client.send(AgentMessage::register("app", "key")).await);
    assert!(response.is_success());
    assert_eq!(agent.kinds(), [MessageKind::Register]);

    client.disconnect();
    assert_ok!(supervisor.stop().await);
    assert!(!supervisor.is_running().await);
}
