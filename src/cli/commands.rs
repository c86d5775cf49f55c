//! Command handlers. Each one issues `client.call` and renders the result.

use serde_json::json;
use tabled::{Table, Tabled};

use crate::daemon::methods;
use crate::error::Result;
use crate::models::TaskRecord;
use crate::rpc::client::RpcClient;
use crate::scheduler::ScheduledTask;

pub async fn ping(client: &RpcClient) -> Result<()> {
    let result = client.call(methods::DAEMON_PING, None).await?;
    let uptime = result["uptime"].as_u64().unwrap_or(0);
    println!("Daemon status: {} (uptime {} ms)", result["status"].as_str().unwrap_or("?"), uptime);
    Ok(())
}

pub async fn run(client: &RpcClient, prompt: String) -> Result<()> {
    let result = client
        .call(methods::TASK_START, Some(json!({"prompt": prompt})))
        .await?;
    println!("Started task {}", result["taskId"].as_str().unwrap_or("?"));
    Ok(())
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Prompt")]
    prompt: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl From<&TaskRecord> for TaskRow {
    fn from(task: &TaskRecord) -> Self {
        Self {
            id: task.id.clone(),
            status: task.status.as_str().to_string(),
            prompt: truncate(&task.prompt, 40),
            updated: task.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

pub async fn list(client: &RpcClient) -> Result<()> {
    let result = client.call(methods::TASK_LIST, None).await?;
    let tasks: Vec<TaskRecord> = serde_json::from_value(result)?;
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    let rows: Vec<TaskRow> = tasks.iter().map(TaskRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub async fn schedule(client: &RpcClient, cron: String, prompt: String) -> Result<()> {
    let result = client
        .call(
            methods::TASK_SCHEDULE,
            Some(json!({"cron": cron, "prompt": prompt})),
        )
        .await?;
    let task: ScheduledTask = serde_json::from_value(result)?;
    println!("Scheduled {} ({})", task.id, task.cron_expression);
    match task.next_run_at {
        Some(next) => println!("  Next run: {}", next.format("%Y-%m-%d %H:%M")),
        None => println!("  Next run: none within 7 days"),
    }
    Ok(())
}

#[derive(Tabled)]
struct ScheduledRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Cron")]
    cron: String,
    #[tabled(rename = "Prompt")]
    prompt: String,
    #[tabled(rename = "Next Run")]
    next_run: String,
    #[tabled(rename = "Last Run")]
    last_run: String,
}

impl From<&ScheduledTask> for ScheduledRow {
    fn from(task: &ScheduledTask) -> Self {
        let format_run = |at: Option<chrono::DateTime<chrono::Local>>| {
            at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string())
        };
        Self {
            id: task.id.clone(),
            cron: task.cron_expression.clone(),
            prompt: truncate(&task.prompt, 30),
            next_run: format_run(task.next_run_at),
            last_run: format_run(task.last_run_at),
        }
    }
}

pub async fn list_scheduled(client: &RpcClient) -> Result<()> {
    let result = client.call(methods::TASK_LIST_SCHEDULED, None).await?;
    let tasks: Vec<ScheduledTask> = serde_json::from_value(result)?;
    if tasks.is_empty() {
        println!("No scheduled tasks.");
        return Ok(());
    }
    let rows: Vec<ScheduledRow> = tasks.iter().map(ScheduledRow::from).collect();
    println!("{}", Table::new(rows));
    Ok(())
}

pub async fn cancel_scheduled(client: &RpcClient, id: String) -> Result<()> {
    let result = client
        .call(methods::TASK_CANCEL_SCHEDULED, Some(json!({"id": id})))
        .await?;
    if result["cancelled"].as_bool().unwrap_or(false) {
        println!("Cancelled {}", id);
    } else {
        println!("No scheduled task with id {}", id);
    }
    Ok(())
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
