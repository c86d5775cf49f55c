//! Record types shared by the storage contract and the RPC method surface.

pub mod task;

pub use task::{TaskMessage, TaskRecord, TaskStatus, TodoItem};
