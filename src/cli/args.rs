use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "foreman", version, about = "Local agent task daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Run the daemon embedded in this process instead of spawning foremand
    #[arg(long, global = true)]
    pub in_process: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Check that the daemon answers
    Ping,

    /// Start a task from a prompt
    Run {
        /// The task prompt
        prompt: String,
    },

    /// List stored tasks
    List,

    /// Add a cron-scheduled task
    Schedule {
        /// Cron expression, e.g. "0 9 * * 1-5"
        cron: String,
        /// Prompt to start when the schedule fires
        prompt: String,
    },

    /// List scheduled tasks
    ListScheduled,

    /// Remove a scheduled task
    CancelScheduled {
        /// Scheduled task id
        id: String,
    },
}
