//! Storage collaborator contract.
//!
//! The daemon subsystem does not own a storage engine; it talks to one
//! through the [`StorageApi`] trait. The [`FileStorage`] implementation is
//! the default collaborator the child daemon constructs from its init
//! message: a flat JSON file, enough to serve the storage method surface.

pub mod file;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{TaskMessage, TaskRecord, TaskStatus, TodoItem};

pub use file::FileStorage;

/// Persistence contract consumed by the storage method handlers.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>>;

    async fn get_tasks(&self) -> Result<Vec<TaskRecord>>;

    /// Insert or replace a record, returning the stored copy.
    async fn save_task(&self, task: TaskRecord) -> Result<TaskRecord>;

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()>;

    async fn update_task_summary(&self, task_id: &str, summary: String) -> Result<()>;

    async fn add_task_message(&self, task_id: &str, message: TaskMessage) -> Result<()>;

    async fn delete_task(&self, task_id: &str) -> Result<()>;

    /// Remove all stored tasks.
    async fn clear_history(&self) -> Result<()>;

    async fn get_todos_for_task(&self, task_id: &str) -> Result<Vec<TodoItem>>;
}
