//! RPC protocol types for daemon communication.
//!
//! This module defines the three envelope shapes (Request, Response,
//! Notification) exchanged between the host and the daemon, plus the error
//! code vocabulary shared by all participants.
//!
//! ## Wire Format
//!
//! Every envelope is a JSON object carrying a fixed `version: "2.0"` marker:
//!
//! ```json
//! {"version": "2.0", "id": 1, "method": "daemon.ping"}
//! {"version": "2.0", "id": 1, "result": {"status": "ok"}}
//! {"version": "2.0", "method": "task.progress", "params": {...}}
//! ```
//!
//! Discrimination is structural and unambiguous: a message with both `id`
//! and `method` is a Request, `id` without `method` is a Response, and
//! `method` without `id` is a Notification. Both the server and the client
//! rely on this three-way split for dispatch.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Protocol version marker carried by every envelope.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Error codes used in RPC error responses.
///
/// Standard protocol codes plus custom codes in the -32000 range.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
    pub const TASK_NOT_FOUND: i32 = -32000;
    pub const NO_PROVIDER: i32 = -32001;
    pub const DAEMON_NOT_READY: i32 = -32002;
}

/// Request identifier, chosen by the caller.
///
/// The client allocates numeric ids from a monotonic counter, but the wire
/// format also admits string ids from other callers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(u64),
    Text(String),
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{}", n),
            RequestId::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<u64> for RequestId {
    fn from(n: u64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::Text(s.to_string())
    }
}

/// Error payload carried by an error Response.
///
/// Also used as the client-side error type for failed calls, so timeout and
/// closed-client rejections share the same shape as wire errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message} (code {code})")]
pub struct RpcError {
    /// Defaults to internal-error when a peer omits the code.
    #[serde(default = "default_error_code")]
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

fn default_error_code() -> i32 {
    error_codes::INTERNAL_ERROR
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn parse_error(detail: impl Into<String>) -> Self {
        Self::new(error_codes::PARSE_ERROR, detail)
    }

    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, detail)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("Method not found: {}", method),
        )
    }

    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_PARAMS, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(error_codes::INTERNAL_ERROR, detail)
    }

    pub fn task_not_found(task_id: &str) -> Self {
        Self::new(
            error_codes::TASK_NOT_FOUND,
            format!("Task not found: {}", task_id),
        )
    }

    pub fn no_provider() -> Self {
        Self::new(error_codes::NO_PROVIDER, "No provider configured")
    }

    pub fn daemon_not_ready() -> Self {
        Self::new(error_codes::DAEMON_NOT_READY, "Daemon not ready")
    }

    /// Client-side rejection for a call outstanding when the client closed.
    pub fn client_closed() -> Self {
        Self::new(error_codes::INTERNAL_ERROR, "client closed")
    }

    /// Client-side rejection for a call that exceeded its timeout.
    pub fn call_timeout(method: &str, timeout_ms: u128) -> Self {
        Self::new(
            error_codes::INTERNAL_ERROR,
            format!("Call to '{}' timed out after {} ms", method, timeout_ms),
        )
    }
}

impl From<crate::error::ForemanError> for RpcError {
    fn from(err: crate::error::ForemanError) -> Self {
        use crate::error::ForemanError;
        match err {
            ForemanError::TaskNotFound(id) => RpcError::task_not_found(&id),
            ForemanError::DaemonNotReady => RpcError::daemon_not_ready(),
            ForemanError::InvalidCron(detail) => RpcError::invalid_params(detail),
            ForemanError::InvalidArgument(detail) => RpcError::invalid_params(detail),
            ForemanError::Rpc(e) => e,
            other => RpcError::internal(other.to_string()),
        }
    }
}

/// A call from one endpoint to the other, answered by exactly one Response.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: RequestId,
    pub method: String,
    pub params: Option<Value>,
}

/// The answer to a Request, correlated by `id`.
///
/// Exactly one of `result`/`error` is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    pub id: RequestId,
    pub result: Option<Value>,
    pub error: Option<RpcError>,
}

/// A one-way push with no `id`; never answered.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub method: String,
    pub params: Option<Value>,
}

/// One message on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Request(Request),
    Response(Response),
    Notification(Notification),
}

impl Message {
    pub fn request(id: impl Into<RequestId>, method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Request(Request {
            id: id.into(),
            method: method.into(),
            params,
        })
    }

    pub fn response(id: RequestId, result: Value) -> Self {
        Message::Response(Response {
            id,
            result: Some(result),
            error: None,
        })
    }

    pub fn error_response(id: RequestId, error: RpcError) -> Self {
        Message::Response(Response {
            id,
            result: None,
            error: Some(error),
        })
    }

    pub fn notification(method: impl Into<String>, params: Option<Value>) -> Self {
        Message::Notification(Notification {
            method: method.into(),
            params,
        })
    }
}

/// Flattened envelope used for (de)serialization.
///
/// `Message` variants are structural, not tagged, so serde derive cannot
/// discriminate them directly; this intermediate carries all optional fields
/// and the conversion enforces the id/method rules.
#[derive(Serialize, Deserialize)]
struct RawEnvelope {
    version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<RequestId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl From<&Message> for RawEnvelope {
    fn from(message: &Message) -> Self {
        let mut raw = RawEnvelope {
            version: PROTOCOL_VERSION.to_string(),
            id: None,
            method: None,
            params: None,
            result: None,
            error: None,
        };
        match message {
            Message::Request(r) => {
                raw.id = Some(r.id.clone());
                raw.method = Some(r.method.clone());
                raw.params = r.params.clone();
            }
            Message::Response(r) => {
                raw.id = Some(r.id.clone());
                raw.result = r.result.clone();
                raw.error = r.error.clone();
            }
            Message::Notification(n) => {
                raw.method = Some(n.method.clone());
                raw.params = n.params.clone();
            }
        }
        raw
    }
}

impl TryFrom<RawEnvelope> for Message {
    type Error = String;

    fn try_from(raw: RawEnvelope) -> std::result::Result<Self, String> {
        match (raw.id, raw.method) {
            (Some(id), Some(method)) => Ok(Message::Request(Request {
                id,
                method,
                params: raw.params,
            })),
            (Some(id), None) => Ok(Message::Response(Response {
                id,
                result: raw.result,
                error: raw.error,
            })),
            (None, Some(method)) => Ok(Message::Notification(Notification {
                method,
                params: raw.params,
            })),
            (None, None) => Err("envelope has neither id nor method".to_string()),
        }
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        RawEnvelope::from(self).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = RawEnvelope::deserialize(deserializer)?;
        Message::try_from(raw).map_err(serde::de::Error::custom)
    }
}
