//! Child-process pipe transport.
//!
//! Carries protocol envelopes between a host process and its daemon
//! subprocess over a pair of byte pipes (the child's stdin/stdout). Each
//! envelope is written as one NDJSON line, wrapped in a discriminated wire
//! frame so daemon traffic cannot collide with anything else the subprocess
//! prints on the same descriptor:
//!
//! ```json
//! {"__daemon": true, "payload": {"version": "2.0", ...}}
//! ```
//!
//! Lines that are not valid JSON, lack the `__daemon` tag, or carry a
//! malformed payload are ignored. The child must keep its own stdout clean
//! of stray prints only to the extent it cares about wasted bytes; the
//! framing makes stray output harmless. Diagnostics belong on stderr.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::rpc::protocol::Message;
use crate::rpc::transport::{MessageHandler, Transport};
use crate::sync::lock;

/// Discriminated wire frame wrapping every envelope on the pipe.
#[derive(Serialize, Deserialize)]
struct WireFrame {
    #[serde(rename = "__daemon")]
    daemon: bool,
    payload: Message,
}

struct PipeState {
    handlers: Mutex<Vec<MessageHandler>>,
    outgoing: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    // frames decoded before the first handler attaches; a line already
    // sitting in the pipe at construction time must not be lost
    pending: Mutex<Vec<Message>>,
    armed: AtomicBool,
}

impl PipeState {
    fn mark_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.handlers).clear();
        let _ = self.closed_tx.send(true);
    }
}

/// Pipe transport endpoint.
///
/// The parent side wraps the subprocess's stdin/stdout pipes; the child side
/// wraps its own stdin/stdout. Both directions use the same wire frame and
/// the same ignore rules, so the two constructors share one implementation.
pub struct PipeTransport {
    state: Arc<PipeState>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PipeTransport {
    /// Parent-side transport over a spawned child's pipes.
    pub fn parent(stdin: ChildStdin, stdout: ChildStdout) -> Self {
        Self::over(stdout, stdin)
    }

    /// Child-side transport over the process's own stdin/stdout.
    pub fn child() -> Self {
        Self::over(tokio::io::stdin(), tokio::io::stdout())
    }

    /// Build a transport over an arbitrary reader/writer pair.
    pub fn over<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<Message>();
        let (closed_tx, closed_rx) = watch::channel(false);

        let state = Arc::new(PipeState {
            handlers: Mutex::new(Vec::new()),
            outgoing,
            closed: AtomicBool::new(false),
            closed_tx,
            closed_rx,
            pending: Mutex::new(Vec::new()),
            armed: AtomicBool::new(false),
        });

        let writer_task = tokio::spawn(async move {
            let mut writer = writer;
            while let Some(message) = outgoing_rx.recv().await {
                let frame = WireFrame {
                    daemon: true,
                    payload: message,
                };
                let line = match serde_json::to_string(&frame) {
                    Ok(line) => line,
                    Err(e) => {
                        tracing::warn!("Failed to encode outgoing frame: {}", e);
                        continue;
                    }
                };
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
                if writer.flush().await.is_err() {
                    break;
                }
            }
        });

        let reader_task = tokio::spawn({
            let state = Arc::clone(&state);
            async move {
                let mut lines = BufReader::new(reader).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            let frame: WireFrame = match serde_json::from_str(line) {
                                Ok(frame) => frame,
                                Err(_) => {
                                    // unrelated traffic on the channel
                                    tracing::trace!("Ignoring non-daemon line on pipe");
                                    continue;
                                }
                            };
                            if !frame.daemon {
                                continue;
                            }
                            {
                                let mut pending = lock(&state.pending);
                                if !state.armed.load(Ordering::SeqCst) {
                                    pending.push(frame.payload);
                                    continue;
                                }
                            }
                            let handlers: Vec<MessageHandler> = lock(&state.handlers).clone();
                            for handler in handlers {
                                handler(frame.payload.clone());
                            }
                        }
                        Ok(None) | Err(_) => break,
                    }
                }
                // peer hung up; further sends are no-ops
                state.mark_closed();
            }
        });

        Self {
            state,
            tasks: Mutex::new(vec![writer_task, reader_task]),
        }
    }

    /// Resolve once the peer hangs up or the transport is closed locally.
    ///
    /// The child daemon parks on this after signalling ready, exiting when
    /// the host goes away.
    pub async fn wait_closed(&self) {
        let mut closed = self.state.closed_rx.clone();
        while !*closed.borrow() {
            if closed.changed().await.is_err() {
                break;
            }
        }
    }
}

impl Transport for PipeTransport {
    fn send(&self, message: Message) {
        if self.state.closed.load(Ordering::SeqCst) {
            return;
        }
        // fails only when the writer task is gone, which is the closed case
        let _ = self.state.outgoing.send(message);
    }

    fn on_message(&self, handler: MessageHandler) {
        if self.state.closed.load(Ordering::SeqCst) {
            return;
        }
        lock(&self.state.handlers).push(handler.clone());
        // the first handler drains anything decoded before it attached
        let buffered: Vec<Message> = {
            let mut pending = lock(&self.state.pending);
            if self.state.armed.swap(true, Ordering::SeqCst) {
                Vec::new()
            } else {
                pending.drain(..).collect()
            }
        };
        for message in buffered {
            handler(message);
        }
    }

    fn close(&self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        lock(&self.state.handlers).clear();
        let _ = self.state.closed_tx.send(true);
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

impl Drop for PipeTransport {
    fn drop(&mut self) {
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }
}
