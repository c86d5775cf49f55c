//! Transport abstraction and the in-process linked pair.
//!
//! A transport is a bidirectional channel carrying protocol envelopes between
//! two participants. Delivery is best-effort: once the channel is closed or
//! the peer is gone, `send` degrades to a silent no-op: no error, no
//! buffering, no retry. In-flight callers observe the loss as a timeout.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::rpc::protocol::Message;
use crate::sync::lock;

/// Callback invoked for every inbound message.
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Bidirectional message channel between two participants.
pub trait Transport: Send + Sync {
    /// Send a message to the peer. Silent no-op if the channel is closed.
    fn send(&self, message: Message);

    /// Register an inbound handler. All registered handlers are invoked for
    /// every message, in registration order.
    fn on_message(&self, handler: MessageHandler);

    /// Detach all handlers and mark the transport inert. Idempotent;
    /// subsequent `send` calls remain no-ops.
    fn close(&self);
}

struct LinkedInner {
    handlers: [Mutex<Vec<MessageHandler>>; 2],
    closed: AtomicBool,
}

/// One endpoint of an in-process linked transport pair.
///
/// `send` on one side synchronously invokes every handler registered on the
/// other side, in registration order, with no serialization. The handler
/// list is cloned out of its lock before invocation, so handlers may send
/// back through the pair re-entrantly.
pub struct LinkedTransport {
    side: usize,
    inner: Arc<LinkedInner>,
}

/// Create a connected pair of in-process transports.
///
/// Closing either side closes the pair.
pub fn linked_pair() -> (LinkedTransport, LinkedTransport) {
    let inner = Arc::new(LinkedInner {
        handlers: [Mutex::new(Vec::new()), Mutex::new(Vec::new())],
        closed: AtomicBool::new(false),
    });
    (
        LinkedTransport {
            side: 0,
            inner: Arc::clone(&inner),
        },
        LinkedTransport { side: 1, inner },
    )
}

impl Transport for LinkedTransport {
    fn send(&self, message: Message) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        let peers: Vec<MessageHandler> = lock(&self.inner.handlers[1 - self.side]).clone();
        for handler in peers {
            handler(message.clone());
        }
    }

    fn on_message(&self, handler: MessageHandler) {
        if self.inner.closed.load(Ordering::SeqCst) {
            return;
        }
        lock(&self.inner.handlers[self.side]).push(handler);
    }

    fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.inner.handlers[0]).clear();
        lock(&self.inner.handlers[1]).clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) -> MessageHandler) {
        let seen: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let make = {
            let seen = Arc::clone(&seen);
            move |label: &str| -> MessageHandler {
                let seen = Arc::clone(&seen);
                let label = label.to_string();
                Arc::new(move |_msg| seen.lock().unwrap().push(label.clone()))
            }
        };
        (seen, make)
    }

    #[test]
    fn test_send_reaches_peer_handlers_in_order() {
        let (a, b) = linked_pair();
        let (seen, make) = recorder();

        b.on_message(make("first"));
        b.on_message(make("second"));

        a.send(Message::notification("x", None));

        assert_eq!(*seen.lock().unwrap(), vec!["first", "second"]);
    }

    #[test]
    fn test_send_does_not_echo_to_own_handlers() {
        let (a, b) = linked_pair();
        let (seen, make) = recorder();

        a.on_message(make("own"));
        a.send(Message::notification("x", Some(json!(1))));
        drop(b);

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_send_after_close_is_noop() {
        let (a, b) = linked_pair();
        let (seen, make) = recorder();

        b.on_message(make("handler"));
        a.close();
        a.send(Message::notification("x", None));
        b.send(Message::notification("y", None));

        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (a, _b) = linked_pair();
        a.close();
        a.close();
    }

    #[test]
    fn test_reentrant_send_from_handler() {
        let (a, b) = linked_pair();
        let (seen, make) = recorder();
        let b = Arc::new(b);

        a.on_message(make("reply-received"));
        b.on_message({
            let b = Arc::clone(&b);
            Arc::new(move |msg| {
                if let Message::Notification(n) = &msg {
                    if n.method == "ping" {
                        // reply through the same pair while still inside dispatch
                        b.send(Message::notification("pong", None));
                    }
                }
            })
        });

        a.send(Message::notification("ping", None));

        assert_eq!(*seen.lock().unwrap(), vec!["reply-received"]);
    }
}
