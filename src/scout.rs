//! The [`Scout`] coordinator.
//!
//! Wires provisioning, supervision, transport and tracking together:
//!
//! ```text
//! setup() ─► Provisioner::resolve ─► ProcessSupervisor::start ─► AgentClient::connect ─► Register
//! ```
//!
//! Setup failures are returned to the caller of [`Scout::setup`];
//! [`Scout::transaction`] sets up lazily and only logs them. Tracking never
//! fails the application; send errors are logged and dropped.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use scout_core::{
    AgentMessage, AgentSender, ApplicationMetadata, EventBus, Result, ScoutConfig, ScoutError,
    ScoutEvent, SocketAddress,
};
use scout_process::{AgentHandle, ProcessOptions, ProcessSupervisor};
use scout_provision::{ProvisionOptions, Provisioner};
use scout_tracking::{Dispatcher, ScoutRequest, ScoutSpan, Tracker};
use scout_transport::{AgentClient, PoolConfig};
use tokio::sync::{Mutex, broadcast};

/// A set-up core agent: its process, connection and location.
struct Attached {
    binary: PathBuf,
    socket: SocketAddress,
    handle: AgentHandle,
    supervisor: ProcessSupervisor,
    client: Arc<AgentClient>,
}

/// APM agent runtime for one application.
///
/// Tracking works before [`setup`](Self::setup) and after
/// [`shutdown`](Self::shutdown); it simply reports nothing while no core
/// agent is attached.
pub struct Scout {
    config: ScoutConfig,
    provision: ProvisionOptions,
    events: EventBus,
    dispatcher: Arc<Dispatcher>,
    tracker: Tracker,
    attached: Mutex<Option<Attached>>,
}

impl Scout {
    /// Creates a coordinator. Nothing is downloaded, spawned or connected
    /// until [`setup`](Self::setup).
    #[must_use]
    pub fn new(config: ScoutConfig) -> Self {
        let events = EventBus::default();
        let dispatcher = Arc::new(Dispatcher::new(config.monitor));
        let tracker = Tracker::from_config(
            Arc::clone(&dispatcher) as Arc<dyn AgentSender>,
            events.clone(),
            &config,
        );
        Self {
            provision: ProvisionOptions::from_config(&config),
            config,
            events,
            dispatcher,
            tracker,
            attached: Mutex::new(None),
        }
    }

    /// Overrides how the core agent binary is provisioned.
    #[must_use]
    pub fn with_provision_options(mut self, options: ProvisionOptions) -> Self {
        self.provision = options;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ScoutConfig {
        &self.config
    }

    /// Provisions, starts and connects to the core agent, then registers
    /// the application.
    ///
    /// Calling `setup` again after it succeeded does nothing.
    ///
    /// # Errors
    /// Returns [`ScoutError::Config`] without a core agent version, or the
    /// provisioning, launch or connection error that stopped setup.
    pub async fn setup(&self) -> Result<()> {
        let mut attached = self.attached.lock().await;
        if attached.is_some() {
            tracing::debug!("already set up");
            return Ok(());
        }

        self.config.validate()?;
        let version = self
            .config
            .core_agent_version()?
            .ok_or_else(|| ScoutError::config("core_agent_version is not set"))?;

        let binary = Provisioner::new(self.provision.clone())
            .resolve(&version)
            .await?;
        let socket = match self.config.socket_path.as_deref() {
            Some(raw) => SocketAddress::parse(raw)?,
            None => SocketAddress::beside_binary(&binary),
        };
        tracing::debug!(binary = %binary.display(), socket = %socket, "core agent resolved");

        let supervisor = ProcessSupervisor::new(ProcessOptions::from_config(
            binary.clone(),
            socket.clone(),
            &self.config,
        ));
        let handle = supervisor.start().await?;

        let client = Arc::new(
            AgentClient::new(socket.clone(), PoolConfig::from_config(&self.config))
                .with_events(self.events.clone()),
        );
        if let Err(e) = client.connect().await {
            if let Err(stop) = supervisor.stop().await {
                tracing::warn!(error = %stop, "failed to stop core agent after connect failure");
            }
            return Err(e.into());
        }
        self.dispatcher
            .install(Arc::clone(&client) as Arc<dyn AgentSender>);

        self.register().await;
        tracing::info!(version = %version, socket = %socket, pid = ?handle.pid, "scout set up");

        *attached = Some(Attached {
            binary,
            socket,
            handle,
            supervisor,
            client,
        });
        Ok(())
    }

    async fn register(&self) {
        let name = self.config.name.clone().unwrap_or_default();
        let key = self.config.key.clone().unwrap_or_default();
        if name.is_empty() {
            tracing::warn!("no application name configured");
        }
        if key.is_empty() {
            tracing::warn!("no application key configured");
        }

        match self.dispatcher.send(AgentMessage::register(name, key)).await {
            Ok(response) if response.is_success() => tracing::debug!("registered"),
            Ok(response) => tracing::warn!(result = ?response.result, "registration rejected"),
            Err(e) => tracing::warn!(error = %e, "registration failed"),
        }

        let metadata = ApplicationMetadata::from_config(&self.config).to_event(std::process::id());
        if let Err(e) = self.dispatcher.send_async(metadata).await {
            tracing::warn!(error = %e, "failed to send application metadata");
        }
    }

    /// Disconnects from the core agent and, when `allow_shutdown` is set,
    /// stops the process this coordinator launched.
    ///
    /// # Errors
    /// Returns [`ScoutError::NoAgentPresent`] if nothing is set up, or the
    /// error raised while stopping the process.
    pub async fn shutdown(&self) -> Result<()> {
        let Some(attached) = self.attached.lock().await.take() else {
            tracing::error!("shutdown called but no core agent is present");
            return Err(ScoutError::NoAgentPresent);
        };
        self.dispatcher.uninstall();
        attached.client.disconnect();
        attached.supervisor.stop().await?;
        tracing::info!(socket = %attached.socket, "scout shut down");
        Ok(())
    }

    /// Returns true while set up.
    pub async fn is_set_up(&self) -> bool {
        self.attached.lock().await.is_some()
    }

    /// Returns the core agent socket as a `unix://` URI, once set up.
    pub async fn socket_path(&self) -> Option<String> {
        self.attached.lock().await.as_ref().map(|a| a.socket.uri())
    }

    /// Returns the provisioned core agent binary, once set up.
    pub async fn binary_path(&self) -> Option<PathBuf> {
        self.attached.lock().await.as_ref().map(|a| a.binary.clone())
    }

    /// Returns the supervised agent's handle, once set up.
    pub async fn agent_handle(&self) -> Option<AgentHandle> {
        self.attached.lock().await.as_ref().map(|a| a.handle.clone())
    }

    /// Returns the tracker requests are created with.
    #[must_use]
    pub const fn tracker(&self) -> &Tracker {
        &self.tracker
    }

    /// Turns reporting on or off without touching the connection.
    pub fn set_monitor(&self, monitor: bool) {
        self.dispatcher.set_monitor(monitor);
    }

    /// Returns the event bus lifecycle events are published on.
    #[must_use]
    pub const fn events(&self) -> &EventBus {
        &self.events
    }

    /// Subscribes to lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ScoutEvent> {
        self.events.subscribe()
    }

    /// Sets up on first use, then runs `f` as a new request. See
    /// [`Tracker::transaction`].
    ///
    /// A setup failure is logged and `f` still runs; its request is simply
    /// not reported. Setup is attempted again on the next transaction.
    pub async fn transaction<F, Fut, T>(&self, name: &str, f: F) -> T
    where
        F: FnOnce(ScoutRequest) -> Fut,
        Fut: Future<Output = T>,
    {
        if let Err(e) = self.setup().await {
            tracing::error!(transaction = name, error = %e, "scout setup failed");
        }
        self.tracker.transaction(name, f).await
    }

    /// See [`scout_tracking::instrument`].
    pub async fn instrument<F, Fut, T>(&self, operation: impl Into<String>, f: F) -> T
    where
        F: FnOnce(Option<ScoutSpan>) -> Fut,
        Fut: Future<Output = T>,
    {
        scout_tracking::instrument(operation, f).await
    }

    /// See [`scout_tracking::instrument_sync`].
    pub fn instrument_sync<F, T>(&self, operation: impl Into<String>, f: F) -> T
    where
        F: FnOnce(Option<ScoutSpan>) -> T,
    {
        scout_tracking::instrument_sync(operation, f)
    }

    /// Returns the request current in this task.
    #[must_use]
    pub fn current_request(&self) -> Option<ScoutRequest> {
        scout_tracking::current_request()
    }

    /// Returns the span current in this task.
    #[must_use]
    pub fn current_span(&self) -> Option<ScoutSpan> {
        scout_tracking::current_span()
    }

    /// Returns true, publishing [`ScoutEvent::IgnoredPathDetected`], if
    /// `path` should not be reported.
    pub fn ignores_path(&self, path: &str) -> bool {
        self.tracker.ignores_path(path)
    }
}

impl std::fmt::Debug for Scout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scout")
            .field("monitor", &self.dispatcher.is_monitoring())
            .field("attached", &self.dispatcher.has_agent())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scout_core::MessageKind;
    use scout_test::{AgentArchive, MockCoreAgent};
    use std::time::Duration;

    const VERSION: &str = "v1.4.0";

    struct Fixture {
        agent: MockCoreAgent,
        scout: Scout,
        _cache: tempfile::TempDir,
        _downloads: tempfile::TempDir,
    }

    async fn fixture(tweak: impl FnOnce(&mut ScoutConfig)) -> Fixture {
        let agent = MockCoreAgent::start().await.unwrap();
        let cache = tempfile::tempdir().unwrap();
        let downloads = tempfile::tempdir().unwrap();

        let mut config = ScoutConfig::new(VERSION);
        config.name = Some("demo".into());
        config.key = Some("secret-key".into());
        config.core_agent_dir = cache.path().to_path_buf();
        config.download_url = format!("file://{}", downloads.path().display());
        config.core_agent_launch = false;
        config.socket_path = Some(agent.socket().uri());
        tweak(&mut config);

        let options = ProvisionOptions::from_config(&config)
            .with_triple(scout_provision::PlatformTriple::X86_64LinuxGnu);
        let bundle = Provisioner::new(options.clone())
            .bundle_name(&scout_core::CoreAgentVersion::parse(VERSION).unwrap())
            .unwrap();
        AgentArchive::new(VERSION)
            .write(downloads.path(), &bundle)
            .unwrap();

        Fixture {
            agent,
            scout: Scout::new(config).with_provision_options(options),
            _cache: cache,
            _downloads: downloads,
        }
    }

    #[tokio::test]
    async fn test_setup_registers_then_sends_metadata() {
        let f = fixture(|_| {}).await;

        f.scout.setup().await.unwrap();
        f.agent.wait_for(2, Duration::from_secs(2)).await.unwrap();

        let received = f.agent.received();
        match &received[0] {
            AgentMessage::Register(register) => {
                assert_eq!(register.app, "demo");
                assert_eq!(register.key, "secret-key");
            }
            other => panic!("expected Register, got {other:?}"),
        }
        assert_eq!(received[1].kind(), MessageKind::ApplicationEvent);
        assert_eq!(f.scout.socket_path().await, Some(f.agent.socket().uri()));
        assert!(f.scout.agent_handle().await.unwrap().pre_existing);
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let f = fixture(|_| {}).await;

        f.scout.setup().await.unwrap();
        f.scout.setup().await.unwrap();
        f.agent.wait_for(2, Duration::from_secs(2)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(
            f.agent
                .kinds()
                .iter()
                .filter(|k| **k == MessageKind::Register)
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_setup_without_version_is_config_error() {
        let scout = Scout::new(ScoutConfig::default());
        assert!(matches!(scout.setup().await, Err(ScoutError::Config(_))));
        assert!(!scout.is_set_up().await);
    }

    #[tokio::test]
    async fn test_setup_without_running_agent_and_launch_off_fails() {
        let f = fixture(|_| {}).await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = f.scout.config().clone();
        config.socket_path = Some(dir.path().join("absent.sock").display().to_string());
        let scout = Scout::new(config).with_provision_options(f.scout.provision.clone());

        let err = scout.setup().await.unwrap_err();

        assert!(matches!(err, ScoutError::AgentLaunchDisabled));
    }

    #[tokio::test]
    async fn test_tracking_reaches_agent_after_setup() {
        let f = fixture(|_| {}).await;
        f.scout.setup().await.unwrap();
        let mut events = f.scout.subscribe();
        let scout = &f.scout;

        let id = scout
            .transaction("GET /", |request| async move {
                scout.instrument("work", |_| async {}).await;
                request.id().clone()
            })
            .await;

        assert_eq!(
            events.recv().await.unwrap(),
            ScoutEvent::RequestSent { request_id: id }
        );
        let kinds = f.agent.kinds();
        assert!(kinds.contains(&MessageKind::StartSpan));
        assert!(kinds.contains(&MessageKind::FinishRequest));
    }

    #[tokio::test]
    async fn test_transaction_sets_up_lazily() {
        let f = fixture(|_| {}).await;
        let mut events = f.scout.subscribe();

        let id = f
            .scout
            .transaction("GET /", |request| async move { request.id().clone() })
            .await;

        assert!(f.scout.is_set_up().await);
        assert_eq!(events.recv().await.unwrap(), ScoutEvent::Connected);
        assert_eq!(
            events.recv().await.unwrap(),
            ScoutEvent::RequestSent { request_id: id }
        );
        let kinds = f.agent.kinds();
        assert_eq!(kinds.first(), Some(&MessageKind::Register));
        assert!(kinds.contains(&MessageKind::StartRequest));
        assert!(kinds.contains(&MessageKind::FinishRequest));
    }

    #[tokio::test]
    async fn test_failed_setup_still_runs_transaction() {
        let scout = Scout::new(ScoutConfig::default());
        let out = scout
            .transaction("t", |_| async { scout.instrument("w", |_| async { 7 }).await })
            .await;
        assert_eq!(out, 7);
        assert!(!scout.is_set_up().await);
    }

    #[tokio::test]
    async fn test_shutdown_without_setup_reports_no_agent() {
        let scout = Scout::new(ScoutConfig::new(VERSION));
        assert!(matches!(
            scout.shutdown().await,
            Err(ScoutError::NoAgentPresent)
        ));
    }

    #[tokio::test]
    async fn test_shutdown_disconnects_and_leaves_adopted_agent() {
        let f = fixture(|c| c.allow_shutdown = true).await;
        f.scout.setup().await.unwrap();
        let mut events = f.scout.subscribe();

        f.scout.shutdown().await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ScoutEvent::Disconnected);
        assert!(!f.scout.is_set_up().await);
        assert!(scout_process::is_connectable(f.agent.socket()).await);
        assert!(matches!(
            f.scout.shutdown().await,
            Err(ScoutError::NoAgentPresent)
        ));
    }

    #[tokio::test]
    async fn test_monitor_off_sends_nothing() {
        let f = fixture(|c| c.monitor = false).await;
        f.scout.setup().await.unwrap();

        f.scout.transaction("t", |_| async {}).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(f.agent.received().is_empty());
    }

    #[tokio::test]
    async fn test_ignored_path_is_published() {
        let f = fixture(|c| c.ignore = vec!["/health".into()]).await;
        let mut events = f.scout.subscribe();

        assert!(f.scout.ignores_path("/health/live"));
        assert!(!f.scout.ignores_path("/users"));

        assert_eq!(
            events.recv().await.unwrap(),
            ScoutEvent::IgnoredPathDetected("/health/live".into())
        );
    }
}
