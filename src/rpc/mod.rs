//! RPC layer for daemon communication.
//!
//! This module provides the protocol envelopes and the transport/server/client
//! stack used on both sides of the host-daemon boundary.
//!
//! ## Components
//!
//! - [`protocol`]: Request/Response/Notification envelopes and error codes
//! - [`transport`]: the bidirectional channel contract and the in-process
//!   linked pair
//! - [`stdio`]: the child-process pipe transport (NDJSON frames tagged with
//!   `__daemon`)
//! - [`server`]: method registry and request dispatch
//! - [`client`]: correlated calls with timeouts and notification fan-out

pub mod client;
pub mod protocol;
pub mod server;
pub mod stdio;
pub mod transport;

pub use client::RpcClient;
pub use protocol::{Message, RequestId, RpcError};
pub use server::RpcServer;
pub use stdio::PipeTransport;
pub use transport::{MessageHandler, Transport, linked_pair};
