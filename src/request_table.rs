//! The pending-request table (§4.2).
//!
//! A bare `HashMap` wrapper with no internal locking of its own: it lives
//! inside [`crate::shared::Shared`], which is guarded by the single mutex
//! that also protects the allocator and the intercept registry.

use std::collections::HashMap;

use axum::response::Response;
use chrono::{DateTime, Utc};
use tokio::sync::oneshot;

use crate::types::{ReplyMessage, RequestId};

/// The HTTP responder handle: resolving it sends the response body that's
/// awaited by the handler that created the request.
pub type Responder = oneshot::Sender<Response>;

/// Fired once a reply (or resolver enrichment) settles the request.
/// Takes ownership of the responder so it can only be used once.
pub type CompletionCallback = Box<dyn FnOnce(Responder, DateTime<Utc>, ReplyMessage) + Send>;

/// Evaluated against a reply before the completion callback fires. Returning
/// `false`, or panicking, suppresses the callback (§4.5 step 5) — by design
/// this is the one place a reply can vanish without ever producing an HTTP
/// response of its own; the caller observes it as a later timeout.
pub type Validator = Box<dyn Fn(&ReplyMessage) -> bool + Send + Sync>;

/// A single in-flight request awaiting a broker reply.
pub struct PendingRequest {
    pub uid: RequestId,
    pub responder: Responder,
    pub completion: CompletionCallback,
    pub timestamp: DateTime<Utc>,
    pub validator: Option<Validator>,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingRequest")
            .field("uid", &self.uid)
            .field("timestamp", &self.timestamp)
            .field("has_validator", &self.validator.is_some())
            .finish()
    }
}

/// Mapping from request id to pending-request record.
#[derive(Default)]
pub struct RequestTable {
    entries: HashMap<RequestId, PendingRequest>,
}

/// Returned by [`RequestTable::insert`] when the id is already present —
/// this should never happen given the allocator's collision-freedom
/// guarantee, but the table enforces invariant 3 independently.
#[derive(Debug, thiserror::Error)]
#[error("request id {0} already has a pending record")]
pub struct AlreadyPending(pub RequestId);

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: PendingRequest) -> Result<(), AlreadyPending> {
        let uid = record.uid;
        if self.entries.contains_key(&uid) {
            return Err(AlreadyPending(uid));
        }
        self.entries.insert(uid, record);
        Ok(())
    }

    /// Atomic remove-and-return.
    pub fn take(&mut self, id: RequestId) -> Option<PendingRequest> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.entries.contains_key(&id)
    }

    /// Removes and returns every record older than `deadline_ms` as of `now`.
    pub fn sweep(&mut self, now: DateTime<Utc>, deadline_ms: i64) -> Vec<PendingRequest> {
        let expired_ids: Vec<RequestId> = self
            .entries
            .iter()
            .filter(|(_, record)| (now - record.timestamp).num_milliseconds() > deadline_ms)
            .map(|(id, _)| *id)
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| self.entries.remove(&id))
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
