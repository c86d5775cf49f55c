use thiserror::Error;

use crate::rpc::protocol::RpcError;

/// Process exit codes used by the `foreman` CLI
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const INTERNAL: i32 = 1;
    pub const USER_ERROR: i32 = 2;
    pub const NOT_FOUND: i32 = 3;
}

#[derive(Error, Debug)]
pub enum ForemanError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid cron expression: {0}")]
    InvalidCron(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Daemon not ready")]
    DaemonNotReady,

    #[error("Failed to spawn daemon: {0}")]
    DaemonSpawn(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Daemon RPC failed: {0}")]
    Rpc(#[from] RpcError),
}

impl ForemanError {
    pub fn exit_code(&self) -> i32 {
        use crate::rpc::protocol::error_codes;

        match self {
            ForemanError::InvalidArgument(_) | ForemanError::InvalidCron(_) => {
                exit_codes::USER_ERROR
            }

            ForemanError::TaskNotFound(_) => exit_codes::NOT_FOUND,

            ForemanError::Rpc(e) if e.code == error_codes::TASK_NOT_FOUND => exit_codes::NOT_FOUND,
            ForemanError::Rpc(e) if e.code == error_codes::INVALID_PARAMS => {
                exit_codes::USER_ERROR
            }

            ForemanError::DaemonNotReady
            | ForemanError::DaemonSpawn(_)
            | ForemanError::Config(_)
            | ForemanError::Io(_)
            | ForemanError::Json(_)
            | ForemanError::Toml(_)
            | ForemanError::Rpc(_) => exit_codes::INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, ForemanError>;
