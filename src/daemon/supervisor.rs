//! Daemon bootstrap and process supervision.
//!
//! The supervisor decides how the daemon runs, performs the spawn-and-
//! handshake sequence for child-process mode, and falls back to in-process
//! mode when spawning or the readiness handshake fails. Bootstrap failures
//! are never fatal to the host application.
//!
//! ## Handshake
//!
//! Child-process mode spawns the `foremand` binary with piped stdio, sends a
//! `daemon.init` notification carrying the data directory, and waits for the
//! child's `daemon.ready` notification (with its pid) under a bounded
//! timeout. No calls are issued before ready. On timeout or spawn error the
//! child is killed and the in-process path takes over.
//!
//! ## Method map asymmetry
//!
//! A child-process daemon serves only the storage-persistence methods;
//! task-lifecycle and scheduling methods are registered only by the
//! in-process path. See [`crate::daemon::methods`].

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use serde_json::json;
use tokio::process::{Child, Command};
use tokio::sync::oneshot;

use crate::daemon::methods::{
    self, notifications, register_scheduler_methods, register_storage_methods,
    register_task_methods,
};
use crate::daemon::tasks::TaskManagerApi;
use crate::error::{ForemanError, Result};
use crate::rpc::client::RpcClient;
use crate::rpc::protocol::Message;
use crate::rpc::server::RpcServer;
use crate::rpc::stdio::PipeTransport;
use crate::rpc::transport::{linked_pair, Transport};
use crate::scheduler::{ScheduledTask, Scheduler};
use crate::storage::StorageApi;
use crate::sync::lock;

/// Default bound on the readiness handshake.
pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// How the daemon is currently running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonMode {
    Unset,
    ChildProcess,
    InProcess,
}

impl fmt::Display for DaemonMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            DaemonMode::Unset => "unset",
            DaemonMode::ChildProcess => "child-process",
            DaemonMode::InProcess => "in-process",
        };
        write!(f, "{}", text)
    }
}

/// Host-side daemon configuration.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// Data directory handed to the child daemon in the init message.
    pub data_dir: PathBuf,
    /// Daemon binary override; defaults to `foremand` next to the current
    /// executable.
    pub daemon_binary: Option<PathBuf>,
    /// Bound on the readiness handshake.
    pub ready_timeout: Duration,
    /// Per-call timeout applied to the client.
    pub call_timeout: Duration,
    /// Skip the child-process attempt entirely.
    pub force_in_process: bool,
}

impl DaemonConfig {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            daemon_binary: None,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            call_timeout: crate::rpc::client::DEFAULT_CALL_TIMEOUT,
            force_in_process: false,
        }
    }
}

/// The one live client/server pair plus whatever the active mode owns.
struct ActiveDaemon {
    mode: DaemonMode,
    client: Arc<RpcClient>,
    server: Option<RpcServer>,
    child: Option<Child>,
    scheduler: Option<Arc<Scheduler>>,
}

/// Owns daemon execution for the host process.
pub struct DaemonSupervisor {
    config: DaemonConfig,
    active: StdMutex<Option<ActiveDaemon>>,
    // serializes bootstrap/shutdown so the two never interleave
    lifecycle: tokio::sync::Mutex<()>,
}

impl DaemonSupervisor {
    pub fn new(config: DaemonConfig) -> Self {
        Self {
            config,
            active: StdMutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// Current daemon mode; `Unset` before bootstrap and after shutdown.
    pub fn mode(&self) -> DaemonMode {
        lock(&self.active)
            .as_ref()
            .map(|active| active.mode)
            .unwrap_or(DaemonMode::Unset)
    }

    /// The active client, if bootstrapped.
    pub fn client(&self) -> Result<Arc<RpcClient>> {
        lock(&self.active)
            .as_ref()
            .map(|active| Arc::clone(&active.client))
            .ok_or(ForemanError::DaemonNotReady)
    }

    /// The host-owned server, present only in in-process mode. The host
    /// pushes notifications through it.
    pub fn server(&self) -> Option<RpcServer> {
        lock(&self.active)
            .as_ref()
            .and_then(|active| active.server.clone())
    }

    /// Select a mode and bring the daemon up.
    ///
    /// Tries the child-process path first (unless configured off) and falls
    /// back to in-process bootstrap on spawn failure or handshake timeout.
    /// Calling bootstrap while already bootstrapped returns the active mode.
    pub async fn bootstrap(
        &self,
        storage: Arc<dyn StorageApi>,
        task_manager: Option<Arc<dyn TaskManagerApi>>,
    ) -> Result<DaemonMode> {
        let _lifecycle = self.lifecycle.lock().await;

        if let Some(active) = lock(&self.active).as_ref() {
            return Ok(active.mode);
        }

        if !self.config.force_in_process {
            match self.spawn_child_daemon().await {
                Ok((client, child)) => {
                    tracing::info!("Daemon running in child-process mode");
                    *lock(&self.active) = Some(ActiveDaemon {
                        mode: DaemonMode::ChildProcess,
                        client,
                        server: None,
                        child: Some(child),
                        scheduler: None,
                    });
                    return Ok(DaemonMode::ChildProcess);
                }
                Err(e) => {
                    tracing::warn!("Child-process daemon unavailable, falling back to in-process: {}", e);
                }
            }
        }

        let active = self.bootstrap_in_process(storage, task_manager);
        tracing::info!("Daemon running in in-process mode");
        *lock(&self.active) = Some(active);
        Ok(DaemonMode::InProcess)
    }

    /// Tear down whichever mode is active. Idempotent.
    pub async fn shutdown(&self) {
        let _lifecycle = self.lifecycle.lock().await;

        let Some(active) = lock(&self.active).take() else {
            return;
        };
        tracing::info!(mode = %active.mode, "Shutting down daemon");

        active.client.close();
        if let Some(server) = active.server {
            server.close();
        }
        if let Some(scheduler) = active.scheduler {
            scheduler.dispose();
        }
        if let Some(mut child) = active.child {
            if let Err(e) = child.kill().await {
                tracing::warn!("Failed to kill daemon child process: {}", e);
            }
        }
    }

    /// Spawn the daemon binary and run the readiness handshake.
    async fn spawn_child_daemon(&self) -> Result<(Arc<RpcClient>, Child)> {
        let binary = match &self.config.daemon_binary {
            Some(path) => path.clone(),
            None => std::env::current_exe()?.with_file_name("foremand"),
        };
        if !binary.exists() {
            return Err(ForemanError::DaemonSpawn(format!(
                "daemon binary not found at {:?}",
                binary
            )));
        }

        let init_params = serde_json::to_value(methods::InitParams {
            data_dir: self.config.data_dir.clone(),
        })?;

        let mut child = Command::new(&binary)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                ForemanError::DaemonSpawn(format!("failed to spawn {:?}: {}", binary, e))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ForemanError::DaemonSpawn("failed to open daemon stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ForemanError::DaemonSpawn("failed to open daemon stdout".to_string()))?;

        let transport = Arc::new(PipeTransport::parent(stdin, stdout));
        let transport_obj: Arc<dyn crate::rpc::transport::Transport> = transport.clone();
        let client = Arc::new(RpcClient::with_timeout(transport_obj, self.config.call_timeout));

        let (ready_tx, ready_rx) = oneshot::channel::<methods::ReadyParams>();
        let ready_slot = Arc::new(StdMutex::new(Some(ready_tx)));
        client.on_notification(notifications::DAEMON_READY, {
            let ready_slot = Arc::clone(&ready_slot);
            Arc::new(move |params| {
                if let Some(tx) = lock(&ready_slot).take() {
                    let ready = params
                        .and_then(|p| serde_json::from_value(p).ok())
                        .unwrap_or(methods::ReadyParams { pid: 0 });
                    let _ = tx.send(ready);
                }
            })
        });

        // the child reads init before serving anything; no calls go out
        // until it answers ready
        transport.send(Message::notification(
            notifications::DAEMON_INIT,
            Some(init_params),
        ));

        match tokio::time::timeout(self.config.ready_timeout, ready_rx).await {
            Ok(Ok(ready)) => {
                tracing::debug!(pid = ready.pid, "Daemon child signalled ready");
                Ok((client, child))
            }
            _ => {
                client.close();
                if let Err(e) = child.kill().await {
                    tracing::warn!("Failed to kill unresponsive daemon child: {}", e);
                }
                Err(ForemanError::DaemonSpawn(format!(
                    "daemon did not signal ready within {} ms",
                    self.config.ready_timeout.as_millis()
                )))
            }
        }
    }

    /// Build the embedded daemon: linked transport pair, full method map,
    /// and the scheduler wired to fire through the client.
    fn bootstrap_in_process(
        &self,
        storage: Arc<dyn StorageApi>,
        task_manager: Option<Arc<dyn TaskManagerApi>>,
    ) -> ActiveDaemon {
        let (server_end, client_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        let client = Arc::new(RpcClient::with_timeout(
            Arc::new(client_end),
            self.config.call_timeout,
        ));
        let scheduler = Arc::new(Scheduler::new());

        register_storage_methods(&server, storage);
        register_task_methods(&server, task_manager);
        register_scheduler_methods(&server, Arc::clone(&scheduler));

        // scheduled fires enter through the same RPC surface as any caller
        scheduler.on_fire({
            let client = Arc::clone(&client);
            Arc::new(move |task: &ScheduledTask| {
                let client = Arc::clone(&client);
                let params = json!({
                    "prompt": task.prompt,
                    "scheduledTaskId": task.id,
                });
                tokio::spawn(async move {
                    if let Err(e) = client
                        .call(methods::TASK_START, Some(params))
                        .await
                    {
                        tracing::warn!("Scheduled task start failed: {}", e);
                    }
                });
            })
        });

        ActiveDaemon {
            mode: DaemonMode::InProcess,
            client,
            server: Some(server),
            child: None,
            scheduler: Some(scheduler),
        }
    }
}
