//! Daemon bootstrap and method surface.
//!
//! This module decides how the daemon runs, in a separate child process or
//! embedded in the host process, and registers the RPC method handlers that
//! bridge to the storage and task-manager collaborators.
//!
//! ## Components
//!
//! - [`supervisor`]: mode selection, spawn-and-handshake, fallback, shutdown
//! - [`methods`]: method/notification names and handler registration
//! - [`child`]: the entry routine run by the `foremand` binary
//! - [`tasks`]: the task-manager collaborator contract

pub mod child;
pub mod methods;
pub mod supervisor;
pub mod tasks;

pub use supervisor::{DaemonConfig, DaemonMode, DaemonSupervisor};
pub use tasks::TaskManagerApi;
