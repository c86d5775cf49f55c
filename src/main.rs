use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use foreman::cli::args::{Cli, Commands};
use foreman::cli::commands;
use foreman::config;
use foreman::daemon::supervisor::DaemonSupervisor;
use foreman::error::exit_codes;
use foreman::storage::FileStorage;

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::from(e.exit_code() as u8)
        }
    }
}

async fn run(cli: Cli) -> foreman::Result<()> {
    let data_dir = config::data_dir()?;
    let host_config = config::load()?;
    let mut daemon_config = host_config.daemon_config(data_dir.clone());
    if cli.in_process {
        daemon_config.force_in_process = true;
    }

    let supervisor = DaemonSupervisor::new(daemon_config);
    let storage = Arc::new(FileStorage::new(&data_dir)?);
    // the CLI carries no task manager; task-lifecycle calls answer
    // no-provider until a host embeds one
    supervisor.bootstrap(storage, None).await?;
    let client = supervisor.client()?;

    let result = match cli.command {
        Commands::Ping => commands::ping(&client).await,
        Commands::Run { prompt } => commands::run(&client, prompt).await,
        Commands::List => commands::list(&client).await,
        Commands::Schedule { cron, prompt } => commands::schedule(&client, cron, prompt).await,
        Commands::ListScheduled => commands::list_scheduled(&client).await,
        Commands::CancelScheduled { id } => commands::cancel_scheduled(&client, id).await,
    };

    supervisor.shutdown().await;
    result
}
