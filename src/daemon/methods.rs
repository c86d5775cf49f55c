//! RPC method surface.
//!
//! Method and notification names, their parameter shapes, and the handler
//! registration that bridges requests to the storage, task-manager, and
//! scheduler collaborators.
//!
//! The child-process daemon registers only [`register_storage_methods`];
//! task-lifecycle and scheduling methods exist solely in the host's
//! in-process registration. Calling one of them against a child-process
//! daemon therefore answers method-not-found: a deliberate partial method
//! map, not an oversight.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::daemon::tasks::TaskManagerApi;
use crate::models::{TaskMessage, TaskRecord, TaskStatus};
use crate::rpc::protocol::RpcError;
use crate::rpc::server::RpcServer;
use crate::scheduler::Scheduler;
use crate::storage::StorageApi;

// Method names served over RPC.

// storage persistence (served in both daemon modes)
pub const TASK_LIST: &str = "task.list";
pub const TASK_GET: &str = "task.get";
pub const TASK_DELETE: &str = "task.delete";
pub const TASK_CLEAR_HISTORY: &str = "task.clearHistory";
pub const TASK_GET_TODOS: &str = "task.getTodos";
pub const STORAGE_SAVE_TASK: &str = "storage.saveTask";
pub const STORAGE_UPDATE_TASK_STATUS: &str = "storage.updateTaskStatus";
pub const STORAGE_UPDATE_TASK_SUMMARY: &str = "storage.updateTaskSummary";
pub const STORAGE_ADD_TASK_MESSAGE: &str = "storage.addTaskMessage";

// task lifecycle (in-process mode only)
pub const TASK_START: &str = "task.start";
pub const TASK_CANCEL: &str = "task.cancel";
pub const TASK_INTERRUPT: &str = "task.interrupt";
pub const TASK_SEND_RESPONSE: &str = "task.sendResponse";
pub const TASK_GET_ACTIVE_IDS: &str = "task.getActiveIds";
pub const TASK_GET_ACTIVE_COUNT: &str = "task.getActiveCount";
pub const TASK_HAS_ACTIVE: &str = "task.hasActive";
pub const TASK_IS_QUEUED: &str = "task.isQueued";
pub const TASK_CANCEL_QUEUED: &str = "task.cancelQueued";
pub const SESSION_RESUME: &str = "session.resume";
pub const PERMISSION_RESPOND: &str = "permission.respond";

// scheduling (in-process mode only)
pub const TASK_SCHEDULE: &str = "task.schedule";
pub const TASK_LIST_SCHEDULED: &str = "task.listScheduled";
pub const TASK_CANCEL_SCHEDULED: &str = "task.cancelScheduled";

// built-in
pub const DAEMON_PING: &str = "daemon.ping";

/// Notification names pushed by the server side.
pub mod notifications {
    pub const TASK_PROGRESS: &str = "task.progress";
    pub const TASK_MESSAGE: &str = "task.message";
    pub const TASK_STATUS_CHANGE: &str = "task.statusChange";
    pub const TASK_SUMMARY: &str = "task.summary";
    pub const TASK_COMPLETE: &str = "task.complete";
    pub const PERMISSION_REQUEST: &str = "permission.request";
    pub const TODO_UPDATE: &str = "todo.update";
    pub const THOUGHT_EVENT: &str = "thought.event";
    pub const CHECKPOINT_EVENT: &str = "checkpoint.event";

    // bootstrap handshake
    pub const DAEMON_INIT: &str = "daemon.init";
    pub const DAEMON_READY: &str = "daemon.ready";
}

/// The task-lifecycle names, used to stub the surface when no task manager
/// is configured.
const LIFECYCLE_METHODS: [&str; 11] = [
    TASK_START,
    TASK_CANCEL,
    TASK_INTERRUPT,
    TASK_SEND_RESPONSE,
    TASK_GET_ACTIVE_IDS,
    TASK_GET_ACTIVE_COUNT,
    TASK_HAS_ACTIVE,
    TASK_IS_QUEUED,
    TASK_CANCEL_QUEUED,
    SESSION_RESUME,
    PERMISSION_RESPOND,
];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskIdParams {
    pub task_id: String,
}

#[derive(Debug, Deserialize)]
pub struct SaveTaskParams {
    pub task: TaskRecord,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStatusParams {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSummaryParams {
    pub task_id: String,
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddMessageParams {
    pub task_id: String,
    pub message: TaskMessage,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartTaskParams {
    pub prompt: String,
    #[serde(default)]
    pub task_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponseParams {
    pub task_id: String,
    pub response: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeSessionParams {
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRespondParams {
    pub request_id: String,
    pub approved: bool,
}

#[derive(Debug, Deserialize)]
pub struct ScheduleParams {
    pub cron: String,
    pub prompt: String,
}

#[derive(Debug, Deserialize)]
pub struct CancelScheduledParams {
    pub id: String,
}

/// Host configuration carried by the `daemon.init` handshake notification.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitParams {
    pub data_dir: PathBuf,
}

/// Payload of the `daemon.ready` handshake notification.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadyParams {
    pub pid: u32,
}

fn parse_params<T: DeserializeOwned>(params: Option<Value>) -> Result<T, RpcError> {
    serde_json::from_value(params.unwrap_or(Value::Null))
        .map_err(|e| RpcError::invalid_params(e.to_string()))
}

fn to_value<T: Serialize>(value: T) -> Result<Value, RpcError> {
    serde_json::to_value(value).map_err(|e| RpcError::internal(e.to_string()))
}

/// Register the storage-persistence subset. This is the whole method map of
/// a child-process daemon and part of the full in-process map.
pub fn register_storage_methods(server: &RpcServer, storage: Arc<dyn StorageApi>) {
    server.register_method(TASK_LIST, {
        let storage = Arc::clone(&storage);
        move |_params| {
            let storage = Arc::clone(&storage);
            async move { to_value(storage.get_tasks().await.map_err(RpcError::from)?) }
        }
    });

    server.register_method(TASK_GET, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                match storage.get_task(&p.task_id).await.map_err(RpcError::from)? {
                    Some(task) => to_value(task),
                    None => Err(RpcError::task_not_found(&p.task_id)),
                }
            }
        }
    });

    server.register_method(TASK_DELETE, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                storage.delete_task(&p.task_id).await.map_err(RpcError::from)?;
                Ok(json!({"deleted": true}))
            }
        }
    });

    server.register_method(TASK_CLEAR_HISTORY, {
        let storage = Arc::clone(&storage);
        move |_params| {
            let storage = Arc::clone(&storage);
            async move {
                storage.clear_history().await.map_err(RpcError::from)?;
                Ok(json!({"cleared": true}))
            }
        }
    });

    server.register_method(TASK_GET_TODOS, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                to_value(
                    storage
                        .get_todos_for_task(&p.task_id)
                        .await
                        .map_err(RpcError::from)?,
                )
            }
        }
    });

    server.register_method(STORAGE_SAVE_TASK, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: SaveTaskParams = parse_params(params)?;
                to_value(storage.save_task(p.task).await.map_err(RpcError::from)?)
            }
        }
    });

    server.register_method(STORAGE_UPDATE_TASK_STATUS, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: UpdateStatusParams = parse_params(params)?;
                storage
                    .update_task_status(&p.task_id, p.status)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"updated": true}))
            }
        }
    });

    server.register_method(STORAGE_UPDATE_TASK_SUMMARY, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: UpdateSummaryParams = parse_params(params)?;
                storage
                    .update_task_summary(&p.task_id, p.summary)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"updated": true}))
            }
        }
    });

    server.register_method(STORAGE_ADD_TASK_MESSAGE, {
        let storage = Arc::clone(&storage);
        move |params| {
            let storage = Arc::clone(&storage);
            async move {
                let p: AddMessageParams = parse_params(params)?;
                storage
                    .add_task_message(&p.task_id, p.message)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"added": true}))
            }
        }
    });
}

/// Register the task-lifecycle methods.
///
/// With no task manager configured every lifecycle method answers
/// no-provider, keeping the surface stable for callers.
pub fn register_task_methods(server: &RpcServer, manager: Option<Arc<dyn TaskManagerApi>>) {
    let Some(manager) = manager else {
        for name in LIFECYCLE_METHODS {
            server.register_method(name, |_params| async { Err(RpcError::no_provider()) });
        }
        return;
    };

    server.register_method(TASK_START, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: StartTaskParams = parse_params(params)?;
                let task_id = manager
                    .start(p.prompt, p.task_id)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"taskId": task_id}))
            }
        }
    });

    server.register_method(TASK_CANCEL, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                manager.cancel(&p.task_id).await.map_err(RpcError::from)?;
                Ok(json!({"cancelled": true}))
            }
        }
    });

    server.register_method(TASK_INTERRUPT, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                manager.interrupt(&p.task_id).await.map_err(RpcError::from)?;
                Ok(json!({"interrupted": true}))
            }
        }
    });

    server.register_method(TASK_SEND_RESPONSE, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: SendResponseParams = parse_params(params)?;
                manager
                    .send_response(&p.task_id, p.response)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"sent": true}))
            }
        }
    });

    server.register_method(TASK_GET_ACTIVE_IDS, {
        let manager = Arc::clone(&manager);
        move |_params| {
            let manager = Arc::clone(&manager);
            async move { to_value(manager.get_active_task_ids().await) }
        }
    });

    server.register_method(TASK_GET_ACTIVE_COUNT, {
        let manager = Arc::clone(&manager);
        move |_params| {
            let manager = Arc::clone(&manager);
            async move { Ok(json!({"count": manager.get_active_task_count().await})) }
        }
    });

    server.register_method(TASK_HAS_ACTIVE, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                Ok(json!({"active": manager.has_active_task(&p.task_id).await}))
            }
        }
    });

    server.register_method(TASK_IS_QUEUED, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                Ok(json!({"queued": manager.is_task_queued(&p.task_id).await}))
            }
        }
    });

    server.register_method(TASK_CANCEL_QUEUED, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: TaskIdParams = parse_params(params)?;
                Ok(json!({"cancelled": manager.cancel_queued_task(&p.task_id).await}))
            }
        }
    });

    server.register_method(SESSION_RESUME, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: ResumeSessionParams = parse_params(params)?;
                let task_id = manager
                    .resume_session(&p.session_id)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"taskId": task_id}))
            }
        }
    });

    server.register_method(PERMISSION_RESPOND, {
        let manager = Arc::clone(&manager);
        move |params| {
            let manager = Arc::clone(&manager);
            async move {
                let p: PermissionRespondParams = parse_params(params)?;
                manager
                    .respond_to_permission(&p.request_id, p.approved)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({"responded": true}))
            }
        }
    });
}

/// Register the scheduling methods, delegating to the scheduler.
pub fn register_scheduler_methods(server: &RpcServer, scheduler: Arc<Scheduler>) {
    server.register_method(TASK_SCHEDULE, {
        let scheduler = Arc::clone(&scheduler);
        move |params| {
            let scheduler = Arc::clone(&scheduler);
            async move {
                let p: ScheduleParams = parse_params(params)?;
                let task = scheduler
                    .add_task(&p.cron, &p.prompt)
                    .map_err(RpcError::from)?;
                to_value(task)
            }
        }
    });

    server.register_method(TASK_LIST_SCHEDULED, {
        let scheduler = Arc::clone(&scheduler);
        move |_params| {
            let scheduler = Arc::clone(&scheduler);
            async move { to_value(scheduler.list_tasks()) }
        }
    });

    server.register_method(TASK_CANCEL_SCHEDULED, {
        let scheduler = Arc::clone(&scheduler);
        move |params| {
            let scheduler = Arc::clone(&scheduler);
            async move {
                let p: CancelScheduledParams = parse_params(params)?;
                Ok(json!({"cancelled": scheduler.cancel_task(&p.id)}))
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::client::RpcClient;
    use crate::rpc::protocol::error_codes;
    use crate::rpc::transport::linked_pair;
    use crate::storage::FileStorage;
    use tempfile::TempDir;

    async fn storage_fixture() -> (TempDir, RpcClient, RpcServer) {
        let dir = TempDir::new().unwrap();
        let storage = Arc::new(FileStorage::new(dir.path()).unwrap());

        let (server_end, client_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        register_storage_methods(&server, storage);
        let client = RpcClient::new(Arc::new(client_end));
        (dir, client, server)
    }

    #[tokio::test]
    async fn test_storage_methods_over_rpc() {
        let (_dir, client, _server) = storage_fixture().await;

        let task = TaskRecord::new("rpc roundtrip");
        let saved = client
            .call(STORAGE_SAVE_TASK, Some(json!({"task": task})))
            .await
            .unwrap();
        let task_id = saved["id"].as_str().unwrap().to_string();

        let listed = client.call(TASK_LIST, None).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        client
            .call(
                STORAGE_UPDATE_TASK_STATUS,
                Some(json!({"taskId": task_id, "status": "running"})),
            )
            .await
            .unwrap();

        let fetched = client
            .call(TASK_GET, Some(json!({"taskId": task_id})))
            .await
            .unwrap();
        assert_eq!(fetched["status"], "running");

        client
            .call(TASK_DELETE, Some(json!({"taskId": task_id})))
            .await
            .unwrap();
        let error = client
            .call(TASK_GET, Some(json!({"taskId": task_id})))
            .await
            .unwrap_err();
        assert_eq!(error.code, error_codes::TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_params_are_rejected() {
        let (_dir, client, _server) = storage_fixture().await;

        let error = client
            .call(TASK_GET, Some(json!({"wrong": "shape"})))
            .await
            .unwrap_err();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_lifecycle_without_provider_answers_no_provider() {
        let (server_end, client_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        register_task_methods(&server, None);
        let client = RpcClient::new(Arc::new(client_end));

        for method in [TASK_START, TASK_CANCEL, SESSION_RESUME] {
            let error = client
                .call(method, Some(json!({"prompt": "x", "taskId": "t", "sessionId": "s"})))
                .await
                .unwrap_err();
            assert_eq!(error.code, error_codes::NO_PROVIDER, "method {}", method);
        }
    }

    #[tokio::test]
    async fn test_scheduler_methods_over_rpc() {
        let (server_end, client_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        let scheduler = Arc::new(Scheduler::new());
        register_scheduler_methods(&server, Arc::clone(&scheduler));
        let client = RpcClient::new(Arc::new(client_end));

        let scheduled = client
            .call(
                TASK_SCHEDULE,
                Some(json!({"cron": "0 9 * * 1-5", "prompt": "standup"})),
            )
            .await
            .unwrap();
        let id = scheduled["id"].as_str().unwrap().to_string();
        assert!(scheduled.get("nextRunAt").is_some());

        let listed = client.call(TASK_LIST_SCHEDULED, None).await.unwrap();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        let cancelled = client
            .call(TASK_CANCEL_SCHEDULED, Some(json!({"id": id})))
            .await
            .unwrap();
        assert_eq!(cancelled["cancelled"], true);

        let error = client
            .call(
                TASK_SCHEDULE,
                Some(json!({"cron": "*/5 * * * *", "prompt": "bad"})),
            )
            .await
            .unwrap_err();
        assert_eq!(error.code, error_codes::INVALID_PARAMS);
        scheduler.dispose();
    }
}
