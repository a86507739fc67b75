//! Ambient diagnostic counters (SPEC_FULL.md §B: "Diagnostics counters").
//!
//! Grounded on the counter style of
//! `fimo_tasks_impl::worker_group::event_loop::stack_manager`, which tracks
//! live/parked resource counts with plain atomics rather than a metrics
//! crate. These counters are not a scheduling policy and carry no timing
//! information, so they stay in scope despite a performance model being
//! out of scope for this core.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Live counters for a single [`crate::dispatcher::Dispatcher`] instance.
#[derive(Debug, Default)]
pub struct Stats {
    live_handles: AtomicI64,
    outstanding_requesters: AtomicI64,
    refs_granted: AtomicU64,
    arbiter_fast_takes: AtomicU64,
    arbiter_rollbacks: AtomicU64,
    arbiter_notify_promotions: AtomicU64,
}

impl Stats {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub(crate) fn handle_registered(&self) {
        self.live_handles.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn handle_unregistered(&self) {
        self.live_handles.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn requester_parked(&self) {
        self.outstanding_requesters.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn ref_granted(&self) {
        self.refs_granted.fetch_add(1, Ordering::Relaxed);
    }

    /// A requester left some handle's queue, either cohort-promoted or
    /// removed as the sibling of an arbiter promotion elsewhere in the
    /// task's group.
    pub(crate) fn requester_dequeued(&self) {
        self.outstanding_requesters.fetch_sub(1, Ordering::Relaxed);
    }

    pub(crate) fn arbiter_fast_take(&self) {
        self.arbiter_fast_takes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn arbiter_rollback(&self) {
        self.arbiter_rollbacks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn arbiter_notify_promoted(&self) {
        self.arbiter_notify_promotions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn live_handles(&self) -> i64 {
        self.live_handles.load(Ordering::Relaxed)
    }

    pub fn outstanding_requesters(&self) -> i64 {
        self.outstanding_requesters.load(Ordering::Relaxed)
    }

    pub fn refs_granted(&self) -> u64 {
        self.refs_granted.load(Ordering::Relaxed)
    }

    pub fn arbiter_fast_takes(&self) -> u64 {
        self.arbiter_fast_takes.load(Ordering::Relaxed)
    }

    pub fn arbiter_rollbacks(&self) -> u64 {
        self.arbiter_rollbacks.load(Ordering::Relaxed)
    }

    pub fn arbiter_notify_promotions(&self) -> u64 {
        self.arbiter_notify_promotions.load(Ordering::Relaxed)
    }
}
