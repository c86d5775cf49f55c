use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "queued" => Ok(TaskStatus::Queued),
            "running" => Ok(TaskStatus::Running),
            "completed" | "done" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            _ => Err(()),
        }
    }
}

/// One message in a task's conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMessage {
    pub role: String,
    pub content: String,
    pub timestamp: DateTime<Local>,
}

/// One todo entry attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TodoItem {
    pub content: String,
    pub completed: bool,
}

/// A persisted task record.
///
/// Messages and todos are stored inline; the storage contract exposes them
/// through `add_task_message` and `get_todos_for_task`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub prompt: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
    #[serde(default)]
    pub messages: Vec<TaskMessage>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
}

impl TaskRecord {
    pub fn new(prompt: impl Into<String>) -> Self {
        let now = Local::now();
        Self {
            id: generate_task_record_id(now),
            prompt: prompt.into(),
            status: TaskStatus::Pending,
            summary: None,
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
            todos: Vec::new(),
        }
    }
}

fn generate_task_record_id(now: DateTime<Local>) -> String {
    let suffix = nanoid::nanoid!(6, &nanoid::alphabet::SAFE);
    format!("task-{}-{}", now.timestamp_millis(), suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parsing() {
        assert_eq!("running".parse::<TaskStatus>(), Ok(TaskStatus::Running));
        assert_eq!("Done".parse::<TaskStatus>(), Ok(TaskStatus::Completed));
        assert!("bogus".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
    }

    #[test]
    fn test_record_wire_shape() {
        let record = TaskRecord::new("do the thing");
        let wire = serde_json::to_value(&record).unwrap();
        assert!(wire.get("createdAt").is_some());
        assert_eq!(wire["status"], "pending");
        assert!(record.id.starts_with("task-"));
    }
}
