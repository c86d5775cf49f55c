//! Child-process daemon entry routine.
//!
//! Run by the `foremand` binary. The child binds a pipe transport to its own
//! stdin/stdout, waits for the host's `daemon.init` notification, constructs
//! its storage collaborator from the provided data directory, registers the
//! storage-persistence method subset, and answers `daemon.ready` with its
//! pid. It then serves requests until the host hangs up the pipe.
//!
//! Stdout belongs to the transport; all diagnostics go through `tracing`,
//! which the binary wires to stderr or a log file.

use std::sync::Arc;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::daemon::methods::{self, notifications, register_storage_methods};
use crate::error::{ForemanError, Result};
use crate::rpc::protocol::Message;
use crate::rpc::server::RpcServer;
use crate::rpc::stdio::PipeTransport;
use crate::rpc::transport::Transport;
use crate::storage::FileStorage;
use crate::sync::lock;

/// Serve the daemon over the process's own stdin/stdout until the host
/// disconnects.
pub async fn run() -> Result<()> {
    let transport = Arc::new(PipeTransport::child());
    serve(transport).await
}

/// The child routine proper, parameterized over the transport for tests.
pub async fn serve(transport: Arc<PipeTransport>) -> Result<()> {
    // the init notification must be observed before the server exists, so a
    // raw transport handler captures it
    let (init_tx, init_rx) = oneshot::channel::<methods::InitParams>();
    let init_slot = Arc::new(Mutex::new(Some(init_tx)));
    transport.on_message({
        let init_slot = Arc::clone(&init_slot);
        Arc::new(move |message| {
            let Message::Notification(notification) = message else {
                return;
            };
            if notification.method != notifications::DAEMON_INIT {
                return;
            }
            if let Some(tx) = lock(&init_slot).take() {
                match serde_json::from_value(
                    notification.params.unwrap_or(serde_json::Value::Null),
                ) {
                    Ok(params) => {
                        let _ = tx.send(params);
                    }
                    Err(e) => tracing::error!("Malformed daemon.init params: {}", e),
                }
            }
        })
    });

    tracing::info!("foremand waiting for init");
    let init = tokio::select! {
        received = init_rx => received.map_err(|_| {
            ForemanError::DaemonSpawn("host closed before sending init".to_string())
        })?,
        _ = transport.wait_closed() => {
            return Err(ForemanError::DaemonSpawn(
                "host closed before sending init".to_string(),
            ));
        }
    };
    tracing::info!(data_dir = %init.data_dir.display(), "foremand initialized");

    let storage = Arc::new(FileStorage::new(&init.data_dir)?);

    let transport_obj: Arc<dyn crate::rpc::transport::Transport> = transport.clone();
    let server = RpcServer::new(transport_obj);
    // child-process mode serves only the storage-persistence subset;
    // task-lifecycle methods stay host-side
    register_storage_methods(&server, storage);

    server.notify(
        notifications::DAEMON_READY,
        Some(serde_json::to_value(methods::ReadyParams {
            pid: std::process::id(),
        })?),
    );
    tracing::info!(pid = std::process::id(), "foremand ready");

    transport.wait_closed().await;
    tracing::info!("foremand shutting down: host disconnected");
    server.close();
    Ok(())
}
