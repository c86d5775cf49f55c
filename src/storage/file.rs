//! JSON-file storage collaborator.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;

use crate::error::{ForemanError, Result};
use crate::models::{TaskMessage, TaskRecord, TaskStatus, TodoItem};
use crate::storage::StorageApi;
use crate::sync::lock;

/// Task storage backed by a single `tasks.json` under the data directory.
///
/// All operations rewrite the whole file; the store is small and accessed by
/// one process at a time.
pub struct FileStorage {
    path: PathBuf,
    // serializes read-modify-write cycles
    guard: Mutex<()>,
}

impl FileStorage {
    pub fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let data_dir = data_dir.as_ref();
        std::fs::create_dir_all(data_dir)?;
        Ok(Self {
            path: data_dir.join("tasks.json"),
            guard: Mutex::new(()),
        })
    }

    fn load(&self) -> Result<Vec<TaskRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    fn store(&self, tasks: &[TaskRecord]) -> Result<()> {
        let raw = serde_json::to_string_pretty(tasks)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }

    /// Apply a mutation to one record, erroring if the id is unknown.
    fn update_record<F>(&self, task_id: &str, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut TaskRecord),
    {
        let _guard = lock(&self.guard);
        let mut tasks = self.load()?;
        let record = tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ForemanError::TaskNotFound(task_id.to_string()))?;
        mutate(record);
        record.updated_at = Local::now();
        self.store(&tasks)
    }
}

#[async_trait]
impl StorageApi for FileStorage {
    async fn get_task(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let _guard = lock(&self.guard);
        Ok(self.load()?.into_iter().find(|t| t.id == task_id))
    }

    async fn get_tasks(&self) -> Result<Vec<TaskRecord>> {
        let _guard = lock(&self.guard);
        self.load()
    }

    async fn save_task(&self, task: TaskRecord) -> Result<TaskRecord> {
        let _guard = lock(&self.guard);
        let mut tasks = self.load()?;
        match tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task.clone(),
            None => tasks.push(task.clone()),
        }
        self.store(&tasks)?;
        Ok(task)
    }

    async fn update_task_status(&self, task_id: &str, status: TaskStatus) -> Result<()> {
        self.update_record(task_id, |t| t.status = status)
    }

    async fn update_task_summary(&self, task_id: &str, summary: String) -> Result<()> {
        self.update_record(task_id, |t| t.summary = Some(summary))
    }

    async fn add_task_message(&self, task_id: &str, message: TaskMessage) -> Result<()> {
        self.update_record(task_id, |t| t.messages.push(message))
    }

    async fn delete_task(&self, task_id: &str) -> Result<()> {
        let _guard = lock(&self.guard);
        let mut tasks = self.load()?;
        let before = tasks.len();
        tasks.retain(|t| t.id != task_id);
        if tasks.len() == before {
            return Err(ForemanError::TaskNotFound(task_id.to_string()));
        }
        self.store(&tasks)
    }

    async fn clear_history(&self) -> Result<()> {
        let _guard = lock(&self.guard);
        self.store(&[])
    }

    async fn get_todos_for_task(&self, task_id: &str) -> Result<Vec<TodoItem>> {
        let _guard = lock(&self.guard);
        let tasks = self.load()?;
        let record = tasks
            .iter()
            .find(|t| t.id == task_id)
            .ok_or_else(|| ForemanError::TaskNotFound(task_id.to_string()))?;
        Ok(record.todos.clone())
    }
}
