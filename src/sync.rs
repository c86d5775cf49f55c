//! Small locking helper shared by the RPC and scheduler modules.

use std::sync::{Mutex, MutexGuard};

/// Acquire a mutex, recovering the guard if a previous holder panicked.
///
/// Handler and callback panics are already caught and logged at the dispatch
/// boundary, so a poisoned lock only means a handler died mid-fault; the
/// protected maps stay structurally valid.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
