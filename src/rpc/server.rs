//! RPC server endpoint.
//!
//! Binds to a transport, dispatches inbound requests to registered method
//! handlers, and pushes notifications. A handler fault is converted into an
//! error response and logged; it never takes the server down.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::rpc::protocol::{Message, Request, RpcError};
use crate::rpc::transport::Transport;
use crate::sync::lock;

/// Boxed async method handler stored in the registry.
pub type MethodHandler =
    Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

struct ServerInner {
    transport: Arc<dyn Transport>,
    handlers: Mutex<HashMap<String, MethodHandler>>,
    started_at: Instant,
    closed: AtomicBool,
}

/// RPC server bound to one transport.
///
/// Cheap to clone; clones share the same registry and transport.
#[derive(Clone)]
pub struct RpcServer {
    inner: Arc<ServerInner>,
}

impl RpcServer {
    /// Bind a server to a transport and auto-register the built-in
    /// `daemon.ping` method.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        let inner = Arc::new(ServerInner {
            transport: Arc::clone(&transport),
            handlers: Mutex::new(HashMap::new()),
            started_at: Instant::now(),
            closed: AtomicBool::new(false),
        });

        let server = Self { inner };

        let started_at = server.inner.started_at;
        server.register_method("daemon.ping", move |_params| {
            let uptime = started_at.elapsed().as_millis() as u64;
            async move { Ok(json!({"status": "ok", "uptime": uptime})) }
        });

        let dispatch_inner = Arc::clone(&server.inner);
        transport.on_message(Arc::new(move |message| {
            Self::handle_message(&dispatch_inner, message);
        }));

        server
    }

    /// Register a method handler. Re-registering a name silently replaces
    /// the previous handler.
    pub fn register_method<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, RpcError>> + Send + 'static,
    {
        let handler: MethodHandler = Arc::new(move |params| handler(params).boxed());
        lock(&self.inner.handlers).insert(name.to_string(), handler);
    }

    /// Push a notification to the peer. Fire-and-forget.
    pub fn notify(&self, method: &str, params: Option<Value>) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        self.inner
            .transport
            .send(Message::notification(method, params));
    }

    /// Close the transport and clear the handler registry. Idempotent.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.transport.close();
        lock(&self.inner.handlers).clear();
    }

    /// Inbound dispatch: requests are routed to their handler, everything
    /// else (responses we did not originate, notifications) is inert.
    fn handle_message(inner: &Arc<ServerInner>, message: Message) {
        let Message::Request(request) = message else {
            return;
        };
        if inner.closed.load(Ordering::SeqCst) {
            return;
        }

        let handler = lock(&inner.handlers).get(&request.method).cloned();
        match handler {
            Some(handler) => {
                let inner = Arc::clone(inner);
                tokio::spawn(Self::run_handler(inner, handler, request));
            }
            None => {
                tracing::debug!(method = %request.method, "No handler registered");
                inner.transport.send(Message::error_response(
                    request.id,
                    RpcError::method_not_found(&request.method),
                ));
            }
        }
    }

    async fn run_handler(inner: Arc<ServerInner>, handler: MethodHandler, request: Request) {
        let Request { id, method, params } = request;

        let outcome = AssertUnwindSafe(handler(params)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(result)) => Message::response(id, result),
            Ok(Err(error)) => {
                tracing::warn!(method = %method, code = error.code, "Handler returned error: {}", error.message);
                Message::error_response(id, error)
            }
            Err(panic) => {
                let detail = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());
                tracing::error!(method = %method, "Handler panicked: {}", detail);
                Message::error_response(id, RpcError::internal(detail))
            }
        };
        inner.transport.send(response);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::protocol::{RequestId, error_codes};
    use crate::rpc::transport::linked_pair;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Server on one end of a linked pair, raw message inbox on the other.
    fn server_fixture() -> (RpcServer, RawPeer) {
        let (server_end, caller_end) = linked_pair();
        let server = RpcServer::new(Arc::new(server_end));
        let caller_end = Arc::new(caller_end);
        let (tx, rx) = mpsc::unbounded_channel();
        caller_end.on_message(Arc::new(move |msg| {
            let _ = tx.send(msg);
        }));
        (server, RawPeer { transport: caller_end, inbox: rx })
    }

    struct RawPeer {
        transport: Arc<crate::rpc::transport::LinkedTransport>,
        inbox: mpsc::UnboundedReceiver<Message>,
    }

    impl RawPeer {
        async fn roundtrip(&mut self, id: u64, method: &str, params: Option<Value>) -> Message {
            self.transport.send(Message::request(id, method, params));
            tokio::time::timeout(Duration::from_secs(1), self.inbox.recv())
                .await
                .expect("timed out waiting for response")
                .expect("channel closed")
        }
    }

    fn expect_response(message: Message) -> crate::rpc::protocol::Response {
        match message {
            Message::Response(r) => r,
            other => panic!("expected Response, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_builtin_ping() {
        let (_server, mut peer) = server_fixture();

        let response = expect_response(peer.roundtrip(1, "daemon.ping", None).await);
        let result = response.result.unwrap();
        assert_eq!(result["status"], "ok");
        assert!(result["uptime"].is_u64());
    }

    #[tokio::test]
    async fn test_ping_uptime_is_monotonic() {
        let (_server, mut peer) = server_fixture();

        let first = expect_response(peer.roundtrip(1, "daemon.ping", None).await);
        tokio::time::sleep(Duration::from_millis(10)).await;
        let second = expect_response(peer.roundtrip(2, "daemon.ping", None).await);

        let first_uptime = first.result.unwrap()["uptime"].as_u64().unwrap();
        let second_uptime = second.result.unwrap()["uptime"].as_u64().unwrap();
        assert!(second_uptime >= first_uptime);
    }

    #[tokio::test]
    async fn test_unregistered_method_yields_method_not_found() {
        let (_server, mut peer) = server_fixture();

        let response = expect_response(peer.roundtrip(9, "foo.bar", None).await);
        assert_eq!(response.id, RequestId::Number(9));
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::METHOD_NOT_FOUND);
        assert!(error.message.contains("foo.bar"));
    }

    #[tokio::test]
    async fn test_handler_result_flows_back() {
        let (server, mut peer) = server_fixture();
        server.register_method("math.double", |params| async move {
            let n = params
                .and_then(|p| p.get("n").and_then(|v| v.as_i64()))
                .ok_or_else(|| RpcError::invalid_params("missing n"))?;
            Ok(json!({"n": n * 2}))
        });

        let response =
            expect_response(peer.roundtrip(2, "math.double", Some(json!({"n": 21}))).await);
        assert_eq!(response.result.unwrap()["n"], 42);
    }

    #[tokio::test]
    async fn test_handler_error_passes_through() {
        let (server, mut peer) = server_fixture();
        server.register_method("task.get", |_params| async {
            Err(RpcError::task_not_found("t-404"))
        });

        let response = expect_response(peer.roundtrip(3, "task.get", None).await);
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::TASK_NOT_FOUND);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        let (server, mut peer) = server_fixture();
        server.register_method("explode", |_params| async {
            panic!("boom: {}", 42);
        });

        let response = expect_response(peer.roundtrip(4, "explode", None).await);
        let error = response.error.unwrap();
        assert_eq!(error.code, error_codes::INTERNAL_ERROR);
        assert!(error.message.contains("boom"));

        // the server is still alive afterwards
        let response = expect_response(peer.roundtrip(5, "daemon.ping", None).await);
        assert!(response.result.is_some());
    }

    #[tokio::test]
    async fn test_reregistration_replaces_handler() {
        let (server, mut peer) = server_fixture();
        server.register_method("answer", |_params| async { Ok(json!(1)) });
        server.register_method("answer", |_params| async { Ok(json!(2)) });

        let response = expect_response(peer.roundtrip(6, "answer", None).await);
        assert_eq!(response.result.unwrap(), json!(2));
    }

    #[tokio::test]
    async fn test_non_request_messages_are_ignored() {
        let (_server, mut peer) = server_fixture();

        peer.transport
            .send(Message::notification("task.progress", None));
        peer.transport
            .send(Message::response(RequestId::Number(99), json!(null)));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_close_clears_registry_and_is_idempotent() {
        let (server, mut peer) = server_fixture();
        server.close();
        server.close();

        peer.transport.send(Message::request(7u64, "daemon.ping", None));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(peer.inbox.try_recv().is_err());
    }
}
