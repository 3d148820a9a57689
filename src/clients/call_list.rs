//! Pending-call tracking for the client core (§4.6): a map keyed by
//! request id, a monotonic id counter, and a promise per call that the
//! response (or a cancellation) resolves exactly once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::common::{Result, Status};
use crate::messages::{CallResult, MessageId};

struct Call {
    responder: oneshot::Sender<Result<CallResult>>,
}

/// `map<MessageId, Call>` plus the id counter, per §4.6. Ids wrap at
/// `u32::MAX`; a wrapped id can only collide with one still in flight if
/// 2^32 calls are outstanding at once, which the map's own capacity rules
/// out in practice.
pub struct CallList {
    next_id: AtomicU32,
    calls: Mutex<HashMap<MessageId, Call>>,
}

impl CallList {
    pub fn new() -> Self {
        CallList {
            next_id: AtomicU32::new(0),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// Allocates the next id and registers a promise for it.
    pub fn create(&self) -> (MessageId, oneshot::Receiver<Result<CallResult>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.calls.lock().unwrap().insert(id, Call { responder: tx });
        (id, rx)
    }

    /// Resolves the call registered for `id` with `result`. A response for
    /// an id with no matching call (already answered, timed out, or never
    /// issued) is dropped silently, per §4.6.
    pub fn handle(&self, id: MessageId, result: CallResult) {
        let call = self.calls.lock().unwrap().remove(&id);
        match call {
            Some(call) => {
                let _ = call.responder.send(Ok(result));
            }
            None => tracing::trace!(id, "response for unknown or already-settled call id"),
        }
    }

    /// Settles every outstanding call with `status` and clears the map.
    /// Used by `Client::stop` (§4.6: `OPERATION_ABORTED`) and by a calling
    /// deadline's own timeout path.
    pub fn cancel_all(&self, status: Status) {
        let calls = std::mem::take(&mut *self.calls.lock().unwrap());
        for (_, call) in calls {
            let _ = call.responder.send(Err(status.clone()));
        }
    }

    /// Removes `id` without resolving it, used when a call's own deadline
    /// elapses before a response arrives (the deadline path resolves the
    /// receiver itself with `Status::timeout`).
    pub fn forget(&self, id: MessageId) {
        self.calls.lock().unwrap().remove(&id);
    }
}

impl Default for CallList {
    fn default() -> Self {
        Self::new()
    }
}
