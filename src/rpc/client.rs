//! RPC client endpoint.
//!
//! Issues correlated requests over a transport and fans pushed notifications
//! out to subscribers. Every call is tracked in a pending table keyed by its
//! id; a call settles exactly once, through whichever of the three paths
//! happens first: a matching response, its timeout timer, or client close.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::rpc::protocol::{Message, RequestId, Response, RpcError};
use crate::rpc::transport::Transport;
use crate::sync::lock;

/// Default per-call timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Callback invoked for a subscribed notification name.
pub type NotificationHandler = Arc<dyn Fn(Option<Value>) + Send + Sync>;

/// One outstanding call awaiting a response or its timeout.
struct PendingCall {
    resolver: oneshot::Sender<Result<Value, RpcError>>,
    timer: JoinHandle<()>,
}

struct ClientInner {
    next_id: AtomicU64,
    timeout: Duration,
    pending: Mutex<HashMap<u64, PendingCall>>,
    notification_handlers: Mutex<HashMap<String, Vec<NotificationHandler>>>,
    closed: AtomicBool,
}

/// RPC client bound to one transport.
///
/// Cheap to clone; clones share the pending table and id counter.
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn Transport>,
    inner: Arc<ClientInner>,
}

impl RpcClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::with_timeout(transport, DEFAULT_CALL_TIMEOUT)
    }

    pub fn with_timeout(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        let inner = Arc::new(ClientInner {
            next_id: AtomicU64::new(1),
            timeout,
            pending: Mutex::new(HashMap::new()),
            notification_handlers: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        });

        let dispatch_inner = Arc::clone(&inner);
        transport.on_message(Arc::new(move |message| match message {
            Message::Response(response) => Self::settle(&dispatch_inner, response),
            Message::Notification(notification) => {
                let handlers: Vec<NotificationHandler> = lock(&dispatch_inner.notification_handlers)
                    .get(&notification.method)
                    .cloned()
                    .unwrap_or_default();
                // unknown notification names are silently dropped
                for handler in handlers {
                    handler(notification.params.clone());
                }
            }
            // a client never serves requests
            Message::Request(_) => {}
        }));

        Self { transport, inner }
    }

    /// Issue a request and await its response.
    ///
    /// Resolves with the response's `result`, or rejects with the response's
    /// error, a timeout naming the method and duration, or a closed-client
    /// error. No retry is attempted on any failure path.
    pub async fn call(&self, method: &str, params: Option<Value>) -> Result<Value, RpcError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(RpcError::client_closed());
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (resolver, settled) = oneshot::channel();

        let timer = tokio::spawn({
            let inner = Arc::clone(&self.inner);
            let method = method.to_string();
            async move {
                tokio::time::sleep(inner.timeout).await;
                if let Some(pending) = lock(&inner.pending).remove(&id) {
                    let _ = pending.resolver.send(Err(RpcError::call_timeout(
                        &method,
                        inner.timeout.as_millis(),
                    )));
                }
            }
        });

        lock(&self.inner.pending).insert(id, PendingCall { resolver, timer });
        self.transport.send(Message::request(id, method, params));

        match settled.await {
            Ok(outcome) => outcome,
            // resolver dropped without settling; only happens on teardown
            Err(_) => Err(RpcError::client_closed()),
        }
    }

    /// Subscribe to a pushed notification name. Handlers for the same name
    /// are invoked in registration order.
    pub fn on_notification(&self, name: &str, handler: NotificationHandler) {
        lock(&self.inner.notification_handlers)
            .entry(name.to_string())
            .or_default()
            .push(handler);
    }

    /// Reject all pending calls, drop all timers and subscriptions, and
    /// close the transport. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let drained: Vec<PendingCall> = lock(&self.inner.pending).drain().map(|(_, p)| p).collect();
        for pending in drained {
            pending.timer.abort();
            let _ = pending.resolver.send(Err(RpcError::client_closed()));
        }
        lock(&self.inner.notification_handlers).clear();
        self.transport.close();
    }

    /// Route a response to its pending call; unmatched ids are dropped.
    fn settle(inner: &Arc<ClientInner>, response: Response) {
        let RequestId::Number(id) = response.id else {
            return;
        };
        let Some(pending) = lock(&inner.pending).remove(&id) else {
            // already timed out, or stale
            tracing::trace!(id, "Dropping response with no pending call");
            return;
        };
        pending.timer.abort();

        let outcome = match response.error {
            Some(error) => Err(error),
            None => Ok(response.result.unwrap_or(Value::Null)),
        };
        let _ = pending.resolver.send(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::error_codes;
    use crate::rpc::server::RpcServer;
    use crate::rpc::transport::linked_pair;
    use serde_json::json;
    use std::time::Instant;

    /// Client and server over a linked pair.
    fn rpc_fixture() -> (RpcClient, RpcServer) {
        let (server_end, client_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        let client = RpcClient::new(Arc::new(client_end));
        (client, server)
    }

    #[tokio::test]
    async fn test_call_resolves_and_clears_pending() {
        let (client, server) = rpc_fixture();
        server.register_method("echo", |params| async move {
            Ok(params.unwrap_or(Value::Null))
        });

        let result = client.call("echo", Some(json!({"k": "v"}))).await.unwrap();
        assert_eq!(result["k"], "v");
        assert!(lock(&client.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_response_error_rejects_with_code() {
        let (client, server) = rpc_fixture();
        server.register_method("task.get", |_params| async {
            Err(RpcError::task_not_found("t-1"))
        });

        let error = client.call("task.get", None).await.unwrap_err();
        assert_eq!(error.code, error_codes::TASK_NOT_FOUND);
        assert!(error.message.contains("t-1"));
        assert!(lock(&client.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_names_method_and_duration() {
        let (server_end, client_end) = linked_pair();
        // no server bound: requests vanish and the call must time out
        let _server_end = server_end;
        let client =
            RpcClient::with_timeout(Arc::new(client_end), Duration::from_millis(50));

        let started = Instant::now();
        let error = client.call("slow.method", None).await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(error.message.contains("slow.method"));
        assert!(error.message.contains("50"));
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_millis(500));
        assert!(lock(&client.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_ids_are_monotonic() {
        let (client, server) = rpc_fixture();
        server.register_method("noop", |_params| async { Ok(Value::Null) });

        client.call("noop", None).await.unwrap();
        client.call("noop", None).await.unwrap();
        assert_eq!(client.inner.next_id.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_ping_twice_uptime_monotonic() {
        let (client, _server) = rpc_fixture();

        let first = client.call("daemon.ping", None).await.unwrap();
        let second = client.call("daemon.ping", None).await.unwrap();
        assert_eq!(first["status"], "ok");
        assert_eq!(second["status"], "ok");
        assert!(second["uptime"].as_u64().unwrap() >= first["uptime"].as_u64().unwrap());
    }

    #[tokio::test]
    async fn test_notification_fanout_in_registration_order() {
        let (client, server) = rpc_fixture();
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let seen = Arc::clone(&seen);
            client.on_notification(
                "task.progress",
                Arc::new(move |_params| {
                    seen.lock().unwrap().push(label.to_string());
                }),
            );
        }

        server.notify("task.progress", Some(json!({"pct": 50})));
        server.notify("task.unknown", None);

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_close_rejects_pending_and_stops_timers() {
        let (server_end, client_end) = linked_pair();
        let _server_end = server_end;
        let client = RpcClient::with_timeout(Arc::new(client_end), Duration::from_secs(30));

        let call = {
            let client = client.clone();
            tokio::spawn(async move { client.call("never.answered", None).await })
        };
        // let the call register its pending entry
        tokio::time::sleep(Duration::from_millis(20)).await;
        client.close();

        let error = call.await.unwrap().unwrap_err();
        assert!(error.message.contains("client closed"));
        assert!(lock(&client.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_call_after_close_rejects_immediately() {
        let (client, _server) = rpc_fixture();
        client.close();

        let error = client.call("daemon.ping", None).await.unwrap_err();
        assert!(error.message.contains("client closed"));
    }

    #[tokio::test]
    async fn test_stale_response_is_dropped() {
        let (server_end, client_end) = linked_pair();
        let server_end = Arc::new(server_end);
        let client = RpcClient::new(Arc::new(client_end));

        // a response for an id nobody is waiting on
        server_end.send(Message::response(RequestId::Number(777), json!(1)));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lock(&client.inner.pending).is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_calls_correlate_by_id() {
        let (client, server) = rpc_fixture();
        server.register_method("delay.echo", |params| async move {
            let params = params.unwrap_or(Value::Null);
            let ms = params["ms"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(params["tag"].clone())
        });

        // the slower call is issued first; responses arrive out of order
        let slow = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call("delay.echo", Some(json!({"ms": 80, "tag": "slow"})))
                    .await
            })
        };
        let fast = {
            let client = client.clone();
            tokio::spawn(async move {
                client
                    .call("delay.echo", Some(json!({"ms": 5, "tag": "fast"})))
                    .await
            })
        };

        assert_eq!(fast.await.unwrap().unwrap(), json!("fast"));
        assert_eq!(slow.await.unwrap().unwrap(), json!("slow"));
    }
}
