//! Task-manager collaborator contract.
//!
//! Task execution itself lives outside this subsystem; the host supplies an
//! implementation of this trait when it bootstraps the daemon in-process.
//! When no implementation is supplied, the task-lifecycle methods answer
//! with a no-provider error instead.

use async_trait::async_trait;

use crate::error::Result;

/// Task-lifecycle operations the RPC surface delegates to.
#[async_trait]
pub trait TaskManagerApi: Send + Sync {
    /// Start a task for the given prompt, returning the task id.
    async fn start(&self, prompt: String, task_id: Option<String>) -> Result<String>;

    async fn cancel(&self, task_id: &str) -> Result<()>;

    async fn interrupt(&self, task_id: &str) -> Result<()>;

    /// Deliver a user response to a task waiting on input.
    async fn send_response(&self, task_id: &str, response: String) -> Result<()>;

    async fn get_active_task_ids(&self) -> Vec<String>;

    async fn get_active_task_count(&self) -> usize;

    async fn has_active_task(&self, task_id: &str) -> bool;

    async fn is_task_queued(&self, task_id: &str) -> bool;

    /// Drop a queued task before it starts. Returns whether anything was
    /// removed.
    async fn cancel_queued_task(&self, task_id: &str) -> bool;

    /// Resume a previous session, returning the task id it continues under.
    async fn resume_session(&self, session_id: &str) -> Result<String>;

    /// Answer an outstanding permission request.
    async fn respond_to_permission(&self, request_id: &str, approved: bool) -> Result<()>;
}
