//! The single coarse lock guarding the allocator, request table, and
//! intercept registry together (§5's single-mutex design note).
//!
//! Every method here is synchronous and returns quickly; nothing holds
//! `parking_lot::Mutex` across an `.await` point anywhere in this crate.

use std::collections::HashSet;

use chrono::Utc;
use parking_lot::Mutex;

use crate::identifiers::Allocator;
use crate::request_table::{AlreadyPending, PendingRequest, RequestTable};
use crate::types::RequestId;

#[derive(Default)]
struct Inner {
    allocator: Allocator,
    table: RequestTable,
    intercepted: HashSet<RequestId>,
}

/// Owns the allocator, request table, and intercept registry behind one
/// `parking_lot::Mutex`, matching the spec's requirement that all three
/// shared structures be protected by a single lock rather than
/// fine-grained per-structure locking.
#[derive(Default)]
pub struct Shared {
    inner: Mutex<Inner>,
}

impl Shared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh id. The allocator's collision-freedom guarantee
    /// means this id is never already present in the table or the
    /// intercept registry.
    pub fn allocate(&self) -> RequestId {
        self.inner.lock().allocator.allocate()
    }

    /// Inserts a pending record for an id that was just allocated. Invariant
    /// 1 (§3): every id in the table is also allocated.
    pub fn insert_pending(&self, record: PendingRequest) -> Result<(), AlreadyPending> {
        self.inner.lock().table.insert(record)
    }

    pub fn take_pending(&self, id: RequestId) -> Option<PendingRequest> {
        let mut inner = self.inner.lock();
        let record = inner.table.take(id);
        if record.is_some() {
            inner.allocator.release(id);
        }
        record
    }

    /// Claims `id` for the resolver. An id may be in at most one of
    /// {request table, intercept registry} at a time (§3) — enforced here by
    /// only ever calling this for ids the dispatcher allocated specifically
    /// for a resolver sub-fetch, never inserted into the table.
    pub fn mark_intercepted(&self, id: RequestId) {
        self.inner.lock().intercepted.insert(id);
    }

    pub fn is_intercepted(&self, id: RequestId) -> bool {
        self.inner.lock().intercepted.contains(&id)
    }

    /// Releases an intercepted id: removes it from the registry and the
    /// allocator, per §4.5 step 3.
    pub fn release_intercept(&self, id: RequestId) {
        let mut inner = self.inner.lock();
        inner.intercepted.remove(&id);
        inner.allocator.release(id);
    }

    /// Runs the sweep (§4.2): returns every record older than `deadline_ms`,
    /// removed from the table, with its id released.
    pub fn sweep(&self, deadline_ms: i64) -> Vec<PendingRequest> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let expired = inner.table.sweep(now, deadline_ms);
        for record in &expired {
            inner.allocator.release(record.uid);
        }
        expired
    }

    #[cfg(test)]
    pub fn pending_count(&self) -> usize {
        self.inner.lock().table.len()
    }
}
