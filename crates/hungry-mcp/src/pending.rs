//! Request id allocation and the pending-request map.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::oneshot;
use tracing::warn;

use crate::error::McpError;

/// What a waiting caller eventually receives.
pub(crate) type Completion = Result<Value, McpError>;

/// Monotonic request id source shared by every worker lifetime of a client.
#[derive(Debug)]
pub struct RequestIds(AtomicU64);

impl RequestIds {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    /// Allocate the next id. Ids are never handed out twice.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for RequestIds {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct PendingState {
    waiters: HashMap<u64, oneshot::Sender<Completion>>,
    /// Set once the connection is gone; no new waiters are accepted.
    closed: bool,
}

/// In-flight requests of one worker connection, keyed by request id.
#[derive(Default)]
pub(crate) struct PendingRequests {
    state: Mutex<PendingState>,
}

impl PendingRequests {
    fn state(&self) -> MutexGuard<'_, PendingState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a completion handle for `id`.
    ///
    /// Must happen before the request is written, so a fast response always
    /// finds its waiter.
    pub(crate) fn register(&self, id: u64) -> Result<oneshot::Receiver<Completion>, McpError> {
        let mut state = self.state();
        if state.closed {
            return Err(McpError::ConnectionLost);
        }
        let (tx, rx) = oneshot::channel();
        if state.waiters.insert(id, tx).is_some() {
            warn!(id, "Replaced a pending request registered under the same id");
        }
        Ok(rx)
    }

    /// Hand `completion` to the waiter of `id`.
    ///
    /// Returns false if nobody is waiting for that id (expired or unknown).
    pub(crate) fn resolve(&self, id: u64, completion: Completion) -> bool {
        let waiter = self.state().waiters.remove(&id);
        match waiter {
            Some(tx) => {
                // The caller may have given up between removal and send.
                let _ = tx.send(completion);
                true
            }
            None => false,
        }
    }

    /// Forget the waiter of `id`.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.state().waiters.remove(&id).is_some()
    }

    /// Fail every waiter with [`McpError::ConnectionLost`] and refuse new ones.
    ///
    /// Returns the number of waiters failed.
    pub(crate) fn fail_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state();
            state.closed = true;
            state.waiters.drain().collect()
        };
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(McpError::ConnectionLost));
        }
        count
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state().closed
    }

    pub(crate) fn len(&self) -> usize {
        self.state().waiters.len()
    }
}

/// Removes a pending entry when the waiting caller returns or is cancelled.
pub(crate) struct PendingGuard<'a> {
    pending: &'a PendingRequests,
    id: u64,
}

impl<'a> PendingGuard<'a> {
    pub(crate) fn new(pending: &'a PendingRequests, id: u64) -> Self {
        Self { pending, id }
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(self.id);
    }
}
