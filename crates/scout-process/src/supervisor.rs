//! Core agent process supervisor.
//!
//! Spawns the core agent in its own process group, forwards its output to
//! `tracing`, and infers readiness from the socket accepting connections.
//! Stopping sends SIGTERM to the group and escalates to SIGKILL after the
//! grace period.

use std::process::Stdio;
use std::time::{Duration, Instant};

use scout_core::SocketAddress;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::error::{ProcessError, Result};
use crate::options::ProcessOptions;

/// Target under which core agent output is logged.
pub const AGENT_LOG_TARGET: &str = "scout_process::agent";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(25);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Identifies the supervised core agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentHandle {
    /// Process id, when this supervisor spawned the agent.
    pub pid: Option<u32>,
    /// Socket the agent listens on.
    pub socket: SocketAddress,
    /// True if an already running agent was adopted instead of spawned.
    pub pre_existing: bool,
}

struct Running {
    handle: AgentHandle,
    child: Option<Child>,
}

/// Starts, watches and stops one core agent process.
pub struct ProcessSupervisor {
    options: ProcessOptions,
    state: Mutex<Option<Running>>,
}

impl ProcessSupervisor {
    /// Creates a supervisor. Nothing is spawned until [`start`](Self::start).
    #[must_use]
    pub fn new(options: ProcessOptions) -> Self {
        Self {
            options,
            state: Mutex::new(None),
        }
    }

    /// Returns the launch options.
    #[must_use]
    pub const fn options(&self) -> &ProcessOptions {
        &self.options
    }

    /// Returns the current handle, if started.
    pub async fn handle(&self) -> Option<AgentHandle> {
        self.state.lock().await.as_ref().map(|r| r.handle.clone())
    }

    /// Starts the core agent and waits until its socket is connectable.
    ///
    /// Calling `start` again returns the existing handle. An agent already
    /// listening on the socket is adopted without spawning.
    ///
    /// # Errors
    /// Returns [`ProcessError::LaunchDisabled`] if nothing listens and
    /// launching is off, [`ProcessError::SpawnFailed`] if the binary cannot
    /// run, and [`ProcessError::StartupTimeout`] if the socket stays closed.
    pub async fn start(&self) -> Result<AgentHandle> {
        let mut state = self.state.lock().await;
        if let Some(running) = state.as_ref() {
            tracing::debug!(socket = %running.handle.socket, "core agent already started");
            return Ok(running.handle.clone());
        }

        if is_connectable(&self.options.socket).await {
            tracing::info!(socket = %self.options.socket, "adopting running core agent");
            let handle = AgentHandle {
                pid: None,
                socket: self.options.socket.clone(),
                pre_existing: true,
            };
            *state = Some(Running {
                handle: handle.clone(),
                child: None,
            });
            return Ok(handle);
        }

        if !self.options.launch {
            tracing::warn!(socket = %self.options.socket, "core agent not running and launch is disabled");
            return Err(ProcessError::LaunchDisabled);
        }

        let mut child = self.spawn()?;
        let handle = AgentHandle {
            pid: child.id(),
            socket: self.options.socket.clone(),
            pre_existing: false,
        };

        if let Err(e) = self
            .wait_for_socket(&mut child, self.options.startup_wait)
            .await
        {
            self.abandon(&mut child, handle.pid).await;
            return Err(e);
        }

        tracing::info!(pid = ?handle.pid, socket = %handle.socket, "core agent ready");
        *state = Some(Running {
            handle: handle.clone(),
            child: Some(child),
        });
        Ok(handle)
    }

    /// Polls until the agent's socket is connectable.
    ///
    /// # Errors
    /// Returns [`ProcessError::StartupTimeout`] after `timeout`.
    pub async fn await_ready(&self, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if is_connectable(&self.options.socket).await {
                return Ok(());
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
        Err(ProcessError::StartupTimeout(timeout))
    }

    /// Returns true while a spawned child has not exited, or while an
    /// adopted agent's socket still accepts connections.
    pub async fn is_running(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.as_mut() {
            Some(Running {
                child: Some(child), ..
            }) => matches!(child.try_wait(), Ok(None)),
            Some(Running { child: None, .. }) => is_connectable(&self.options.socket).await,
            None => false,
        }
    }

    /// Stops the core agent.
    ///
    /// A no-op unless shutdown is allowed. Adopted agents are left running
    /// because their pid is unknown.
    ///
    /// # Errors
    /// Returns [`ProcessError::SignalFailed`] if the process cannot be
    /// signalled.
    pub async fn stop(&self) -> Result<()> {
        if !self.options.allow_shutdown {
            tracing::debug!("shutdown not allowed, leaving core agent running");
            return Ok(());
        }
        let Some(running) = self.state.lock().await.take() else {
            return Ok(());
        };
        let Some(mut child) = running.child else {
            tracing::info!(socket = %running.handle.socket, "leaving adopted core agent running");
            return Ok(());
        };

        if matches!(child.try_wait(), Ok(Some(_))) {
            if self.options.daemonize {
                tracing::info!("core agent daemonized, launcher already exited");
            }
            return Ok(());
        }

        let Some(pid) = child.id() else {
            return Ok(());
        };
        terminate(pid)?;

        let deadline = Instant::now() + self.options.stop_grace;
        while Instant::now() < deadline {
            if matches!(child.try_wait(), Ok(Some(_))) {
                tracing::info!(pid = pid, "core agent stopped");
                return Ok(());
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }

        tracing::warn!(pid = pid, grace = ?self.options.stop_grace, "core agent ignored SIGTERM, killing");
        kill(pid)?;
        if let Err(e) = child.kill().await {
            tracing::debug!(pid = pid, error = %e, "core agent launcher already gone");
        }
        Ok(())
    }

    /// Kills the process group of an agent that never became ready and
    /// reaps its launcher.
    async fn abandon(&self, child: &mut Child, pid: Option<u32>) {
        if let Some(pid) = pid {
            if let Err(e) = kill(pid) {
                tracing::warn!(pid = pid, error = %e, "failed to kill unready core agent");
            }
        }
        if let Err(e) = child.start_kill() {
            tracing::debug!(pid = ?pid, error = %e, "core agent launcher already gone");
        }
        match tokio::time::timeout(self.options.stop_grace, child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(pid = ?pid, %status, "unready core agent reaped"),
            Ok(Err(e)) => tracing::warn!(pid = ?pid, error = %e, "failed to reap unready core agent"),
            Err(_) => tracing::warn!(pid = ?pid, "unready core agent did not exit"),
        }
    }

    fn spawn(&self) -> Result<Child> {
        let args = self.options.args();
        tracing::debug!(binary = %self.options.binary.display(), ?args, "spawning core agent");

        let mut command = Command::new(&self.options.binary);
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|e| {
            ProcessError::spawn_failed(format!(
                "failed to spawn {}: {e}",
                self.options.binary.display()
            ))
        })?;

        if let Some(stdout) = child.stdout.take() {
            forward_output(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            forward_output(stderr, "stderr");
        }
        tracing::info!(pid = ?child.id(), binary = %self.options.binary.display(), "spawned core agent");
        Ok(child)
    }

    async fn wait_for_socket(&self, child: &mut Child, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            if is_connectable(&self.options.socket).await {
                return Ok(());
            }
            if let Ok(Some(status)) = child.try_wait() {
                // A daemonizing launcher exits once the real agent forks off.
                if !(self.options.daemonize && status.success()) {
                    return Err(ProcessError::spawn_failed(format!(
                        "core agent exited during startup with {status}"
                    )));
                }
            }
            if Instant::now() >= deadline {
                tracing::warn!(socket = %self.options.socket, waited = ?timeout, "core agent socket never became ready");
                return Err(ProcessError::StartupTimeout(timeout));
            }
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

impl std::fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Returns true if something accepts connections on `socket`.
pub async fn is_connectable(socket: &SocketAddress) -> bool {
    UnixStream::connect(socket.path()).await.is_ok()
}

fn forward_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::debug!(target: AGENT_LOG_TARGET, stream = name, "{line}");
        }
    });
}

#[cfg(unix)]
#[allow(clippy::cast_possible_wrap)] // PID always fits in i32 on Unix
fn send_group_signal(pid: u32, sig: nix::sys::signal::Signal) -> Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    match killpg(Pid::from_raw(pid as i32), sig) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(ProcessError::signal_failed(format!("{sig} to {pid}: {e}"))),
    }
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    send_group_signal(pid, nix::sys::signal::Signal::SIGTERM)
}

#[cfg(unix)]
fn kill(pid: u32) -> Result<()> {
    send_group_signal(pid, nix::sys::signal::Signal::SIGKILL)
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> Result<()> {
    Err(ProcessError::signal_failed("signals are unsupported on this platform"))
}

#[cfg(not(unix))]
fn kill(_pid: u32) -> Result<()> {
    Err(ProcessError::signal_failed("signals are unsupported on this platform"))
}

#[cfg(test)]
#[cfg(unix)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tokio::net::UnixListener;

    /// Writes a fake core agent that records its arguments and sleeps.
    fn fake_agent(dir: &Path) -> PathBuf {
        let path = dir.join("core-agent");
        std::fs::write(
            &path,
            "#!/bin/sh\necho \"$@\" > \"$(dirname \"$0\")/args.txt\"\necho booting\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    fn options(dir: &Path, binary: PathBuf) -> ProcessOptions {
        ProcessOptions {
            startup_wait: Duration::from_secs(5),
            stop_grace: Duration::from_secs(2),
            allow_shutdown: true,
            ..ProcessOptions::new(binary, SocketAddress::from_path(dir.join("core-agent.sock")))
        }
    }

    /// Binds the socket after a short delay, standing in for the agent.
    fn listen_later(socket: PathBuf) -> tokio::task::JoinHandle<UnixListener> {
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            UnixListener::bind(socket).unwrap()
        })
    }

    #[tokio::test]
    async fn test_start_spawns_and_waits_for_socket() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(options(dir.path(), fake_agent(dir.path())));
        let listener = listen_later(dir.path().join("core-agent.sock"));

        let handle = supervisor.start().await.unwrap();
        assert!(handle.pid.is_some());
        assert!(!handle.pre_existing);
        assert!(supervisor.is_running().await);

        let args = std::fs::read_to_string(dir.path().join("args.txt")).unwrap();
        assert!(args.starts_with("start --socket"));
        assert!(args.contains("--daemonize false"));

        supervisor.stop().await.unwrap();
        assert!(supervisor.handle().await.is_none());
        drop(listener);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(options(dir.path(), fake_agent(dir.path())));
        let _listener = listen_later(dir.path().join("core-agent.sock"));

        let first = supervisor.start().await.unwrap();
        let second = supervisor.start().await.unwrap();
        assert_eq!(first, second);
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_adopts_running_agent() {
        let dir = tempfile::tempdir().unwrap();
        let _listener = UnixListener::bind(dir.path().join("core-agent.sock")).unwrap();
        let supervisor =
            ProcessSupervisor::new(options(dir.path(), dir.path().join("does-not-exist")));

        let handle = supervisor.start().await.unwrap();
        assert!(handle.pre_existing);
        assert!(handle.pid.is_none());
        supervisor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(ProcessOptions {
            launch: false,
            ..options(dir.path(), fake_agent(dir.path()))
        });
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::LaunchDisabled));
    }

    #[tokio::test]
    async fn test_startup_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(ProcessOptions {
            startup_wait: Duration::from_millis(200),
            ..options(dir.path(), fake_agent(dir.path()))
        });
        let started = Instant::now();
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::StartupTimeout(_)));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(supervisor.handle().await.is_none());
    }

    /// Reads a pid the fake agent wrote and reports whether it still runs.
    #[cfg(target_os = "linux")]
    fn is_alive(pid: &str) -> bool {
        std::fs::read_to_string(format!("/proc/{pid}/stat"))
            .is_ok_and(|stat| !stat.rsplit(')').next().unwrap_or("").trim_start().starts_with('Z'))
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_startup_timeout_kills_process_group() {
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("core-agent");
        std::fs::write(
            &binary,
            "#!/bin/sh\nsleep 30 &\necho $! > \"$(dirname \"$0\")/worker.pid\"\nexec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();
        let supervisor = ProcessSupervisor::new(ProcessOptions {
            startup_wait: Duration::from_millis(300),
            ..options(dir.path(), binary)
        });

        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::StartupTimeout(_)));

        let worker = std::fs::read_to_string(dir.path().join("worker.pid")).unwrap();
        let worker = worker.trim();
        let deadline = Instant::now() + Duration::from_secs(2);
        while is_alive(worker) && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        assert!(!is_alive(worker));
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(options(dir.path(), dir.path().join("nope")));
        let err = supervisor.start().await.unwrap_err();
        assert!(matches!(err, ProcessError::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_stop_without_permission_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(ProcessOptions {
            allow_shutdown: false,
            ..options(dir.path(), fake_agent(dir.path()))
        });
        let _listener = listen_later(dir.path().join("core-agent.sock"));
        supervisor.start().await.unwrap();

        supervisor.stop().await.unwrap();
        assert!(supervisor.is_running().await);

        let handle = supervisor.handle().await.unwrap();
        terminate(handle.pid.unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_await_ready_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = ProcessSupervisor::new(options(dir.path(), fake_agent(dir.path())));
        let err = supervisor
            .await_ready(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessError::StartupTimeout(_)));
    }
}
