//! Foreman daemon binary - the child-process entry routine.
//!
//! Spawned by the host with piped stdin/stdout; those pipes carry the RPC
//! channel. The daemon waits for the host's init message, serves the
//! storage-persistence methods, and exits when the host disconnects.
//!
//! Logs go to daily-rotated files under `~/.foreman/logs/`, falling back to
//! stderr when the log directory is unavailable. Stdout is never written to
//! directly - it belongs to the transport.

use tracing_appender::non_blocking::WorkerGuard;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = init_logging();

    tracing::info!("foremand starting, version {}", env!("CARGO_PKG_VERSION"));
    foreman::daemon::child::run().await?;
    tracing::info!("foremand exit");
    Ok(())
}

/// File logging with daily rotation, stderr as the fallback.
///
/// The returned guard must stay alive for the duration of the process so
/// buffered log lines get flushed.
fn init_logging() -> Option<WorkerGuard> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match foreman::config::log_dir().and_then(|dir| {
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }) {
        Ok(dir) => {
            let file_appender = tracing_appender::rolling::daily(dir, "foremand.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        Err(_) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
            None
        }
    }
}
