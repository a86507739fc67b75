//! The data handle state machine.
//!
//! Grounded on `fimo_tasks_int::sync::{mutex, rwlock}` for the
//! guard/RAII shape of a lock type, but — unlike those task-fair,
//! scheduler-integrated locks — `Handle`'s `header_lock` is a plain
//! `parking_lot::Mutex` (the dependency core parks *tasks* in a queue
//! rather than ever blocking a worker thread on a handle).

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::arbiter::Arbiter;
use crate::error::contract_violation;
use crate::mode::{compatible, join, Access, Mode};
use crate::requester::Requester;
use crate::stats::Stats;
use crate::task::Task;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque, totally-ordered identity for a handle.
///
/// Used as the sort key for the non-arbitered prefix of a task's buffer
/// list ("a stable total order is used (e.g., pointer-
/// identity) to prevent AB/BA deadlock").
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HandleId(u64);

/// Result of attempting to acquire (or park on) a handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Outcome {
    /// The reference was granted immediately.
    Acquired,
    /// The task was appended to the handle's requester queue.
    Parked,
}

struct State<T> {
    ref_count: u32,
    busy_count: u32,
    current: Option<Access>,
    queue: VecDeque<Requester<T>>,
}

impl<T> State<T> {
    fn new() -> Self {
        Self {
            ref_count: 0,
            busy_count: 0,
            current: None,
            queue: VecDeque::new(),
        }
    }
}

struct Inner<T> {
    id: HandleId,
    header_lock: Mutex<State<T>>,
    drained: Condvar,
    arbiter: std::sync::OnceLock<Arc<Arbiter>>,
    stats: Arc<Stats>,
}

/// A dependency-tracked identifier for a data buffer.
///
/// `Handle` is a cheap `Arc`-backed handle to the shared state; cloning it
/// shares the same underlying counters, queue and (optional) arbiter.
pub struct Handle<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.inner.header_lock.lock();
        f.debug_struct("Handle")
            .field("id", &self.inner.id)
            .field("ref_count", &st.ref_count)
            .field("busy_count", &st.busy_count)
            .field("current", &st.current)
            .field("queued", &st.queue.len())
            .field("has_arbiter", &self.inner.arbiter.get().is_some())
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}
impl<T> Eq for Handle<T> {}

impl<T> Handle<T> {
    /// `handle_register`. `layout`/`initial_owner` describe the
    /// underlying buffer and are the data layer's concern; the dependency
    /// core only ever needs the handle's identity and counters, so we do
    /// not model them here.
    pub fn register(stats: Arc<Stats>) -> Self {
        let id = HandleId(NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed));
        stats.handle_registered();
        Self {
            inner: Arc::new(Inner {
                id,
                header_lock: Mutex::new(State::new()),
                drained: Condvar::new(),
                arbiter: std::sync::OnceLock::new(),
                stats,
            }),
        }
    }

    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    pub fn has_arbiter(&self) -> bool {
        self.inner.arbiter.get().is_some()
    }

    pub(crate) fn arbiter(&self) -> Option<Arc<Arbiter>> {
        self.inner.arbiter.get().cloned()
    }

    /// `handle_assign_arbiter`. Precondition: `ref_count ==
    /// busy_count == 0`. Immutable for the handle's lifetime once set (I5).
    pub fn assign_arbiter(&self, arbiter: Arc<Arbiter>) {
        let st = self.inner.header_lock.lock();
        if st.ref_count != 0 || st.busy_count != 0 {
            contract_violation(format!(
                "assign_arbiter on handle {:?} with ref_count={} busy_count={}",
                self.inner.id, st.ref_count, st.busy_count
            ));
        }
        drop(st);
        if self.inner.arbiter.set(arbiter).is_err() {
            contract_violation(format!("arbiter already assigned to handle {:?}", self.inner.id));
        }
    }

    /// `handle_unregister`: blocks the calling thread until
    /// `busy_count == 0`. Unlike task suspension (which never blocks an OS
    /// thread), this is a synchronous user-facing call and is explicitly
    /// allowed to block its caller.
    pub fn unregister(self) {
        let mut st = self.inner.header_lock.lock();
        while st.busy_count != 0 {
            self.inner.drained.wait(&mut st);
        }
        self.inner.stats.handle_unregistered();
    }

    /// Non-arbitered acquisition attempt. Returns
    /// [`Outcome::Parked`] if a [`Requester`] was appended to `queue`
    /// instead of granting a reference immediately.
    pub(crate) fn try_acquire_or_park(&self, task: Arc<Task<T>>, buf_index: usize, access: Access) -> Outcome {
        debug_assert!(!self.has_arbiter(), "arbitered handles go through Arbiter::try_acquire");
        let mut st = self.inner.header_lock.lock();
        let grantable = st.queue.is_empty() && (st.ref_count == 0 || compatible(&st.current.unwrap(), &access));
        if grantable {
            st.ref_count += 1;
            st.busy_count += 1;
            st.current = Some(match st.current {
                Some(current) => join(current, access),
                None => access,
            });
            log::trace!("handle {:?}: granted {access} immediately (ref_count={})", self.inner.id, st.ref_count);
            self.inner.stats.ref_granted();
            Outcome::Acquired
        } else {
            st.queue.push_back(Requester::new(task, buf_index, access));
            st.busy_count += 1;
            log::trace!("handle {:?}: parked {access} (queue_len={})", self.inner.id, st.queue.len());
            self.inner.stats.requester_parked();
            Outcome::Parked
        }
    }

    /// Releases one reference previously granted by [`Self::try_acquire_or_park`]
    /// or cohort-promoted out of the queue, then promotes as many
    /// compatible head-of-queue requesters as possible (cohort promotion).
    /// `drive` resumes each promoted task's buffer walk
    /// starting at `requester.buf_index + 1`.
    ///
    /// Must only be called for non-arbitered handles; arbitered handles are
    /// released through [`Arbiter::notify`].
    pub(crate) fn release_non_arbiter(&self, drive: &dyn Fn(Arc<Task<T>>, usize)) {
        debug_assert!(!self.has_arbiter());
        let promoted = {
            let mut st = self.inner.header_lock.lock();
            if st.ref_count == 0 {
                contract_violation(format!("release of handle {:?} with ref_count already 0", self.inner.id));
            }
            st.ref_count -= 1;
            st.busy_count -= 1;
            if st.ref_count == 0 {
                st.current = None;
            }

            let mut promoted = Vec::new();
            loop {
                let Some(head) = st.queue.front() else { break };
                let ok = st.ref_count == 0 || compatible(&st.current.unwrap(), &head.access);
                if !ok {
                    break;
                }
                let req = st.queue.pop_front().expect("front just peeked");
                st.ref_count += 1;
                st.current = Some(match st.current {
                    Some(current) => join(current, req.access),
                    None => req.access,
                });
                self.inner.stats.ref_granted();
                self.inner.stats.requester_dequeued();
                log::debug!(
                    "handle {:?}: cohort-promoted task {:?} buf {} (ref_count={})",
                    self.inner.id,
                    req.task.id(),
                    req.buf_index,
                    st.ref_count
                );
                promoted.push((req.task, req.buf_index + 1));
            }
            if st.busy_count == 0 {
                self.inner.drained.notify_all();
            }
            promoted
        };
        for (task, next_index) in promoted {
            task.grant(1);
            drive(task, next_index);
        }
    }

    /// Fast, unconditional-on-queue take used only by the arbiter protocol
    ///: succeeds iff `ref_count == 0`.
    pub(crate) fn fast_take(&self, access: Access) -> bool {
        debug_assert!(self.has_arbiter());
        let mut st = self.inner.header_lock.lock();
        if st.ref_count == 0 {
            st.ref_count = 1;
            st.busy_count += 1;
            st.current = Some(access);
            self.inner.stats.ref_granted();
            self.inner.stats.arbiter_fast_take();
            true
        } else {
            false
        }
    }

    /// Rolls back a [`Self::fast_take`] performed moments ago during an
    /// aborted try-acquire.
    pub(crate) fn fast_release(&self) {
        debug_assert!(self.has_arbiter());
        let mut st = self.inner.header_lock.lock();
        if st.ref_count == 0 {
            contract_violation(format!("fast_release of handle {:?} with ref_count already 0", self.inner.id));
        }
        st.ref_count -= 1;
        st.busy_count -= 1;
        if st.ref_count == 0 {
            st.current = None;
        }
        self.inner.stats.arbiter_rollback();
        if st.busy_count == 0 {
            self.inner.drained.notify_all();
        }
    }

    /// Releases a reference granted through the arbiter, without consulting
    /// the local queue (that is the arbiter's job via [`Arbiter::notify`]).
    pub(crate) fn release_arbiter_ref(&self) {
        debug_assert!(self.has_arbiter());
        let mut st = self.inner.header_lock.lock();
        if st.ref_count == 0 {
            contract_violation(format!("release of handle {:?} with ref_count already 0", self.inner.id));
        }
        st.ref_count -= 1;
        st.busy_count -= 1;
        if st.ref_count == 0 {
            st.current = None;
        }
        if st.busy_count == 0 {
            self.inner.drained.notify_all();
        }
    }

    /// Appends a requester to the queue unconditionally; used by the
    /// arbiter to park a task on every handle of an arbiter group after an
    /// aborted try-acquire.
    pub(crate) fn park_arbiter_requester(&self, task: Arc<Task<T>>, buf_index: usize, access: Access) {
        let mut st = self.inner.header_lock.lock();
        st.queue.push_back(Requester::new(task, buf_index, access));
        st.busy_count += 1;
        self.inner.stats.requester_parked();
    }

    /// Prepends a requester, used by [`crate::redux::redux_flush`] to slot
    /// the synthetic combine task ahead of whatever is already waiting.
    pub(crate) fn push_front_requester(&self, task: Arc<Task<T>>, buf_index: usize, access: Access) {
        let mut st = self.inner.header_lock.lock();
        st.queue.push_front(Requester::new(task, buf_index, access));
        st.busy_count += 1;
        self.inner.stats.requester_parked();
    }

    /// Current mode and whether the head-of-queue requester is
    /// redux-incompatible; used by [`crate::redux::needs_flush`].
    pub(crate) fn redux_snapshot(&self) -> (Option<Mode>, bool) {
        let st = self.inner.header_lock.lock();
        let mode = st.current.map(|a| a.mode);
        let head_is_non_redux = st
            .queue
            .front()
            .is_some_and(|r| r.access.mode != Mode::Redux);
        (mode, head_is_non_redux)
    }

    /// Looks up and removes, across this handle's queue, the requester
    /// entry belonging to `task` (used during arbiter notify to remove the
    /// sibling requesters on every handle of the group). The removed entry's
    /// parked slot is now accounted for by the `fast_take` that granted it,
    /// so `busy_count` drops back by one here.
    pub(crate) fn remove_requester_for_task(&self, task: &Arc<Task<T>>) -> Option<Requester<T>> {
        let mut st = self.inner.header_lock.lock();
        let pos = st.queue.iter().position(|r| r.belongs_to(task))?;
        let removed = st.queue.remove(pos);
        if removed.is_some() {
            st.busy_count -= 1;
            self.inner.stats.requester_dequeued();
            if st.busy_count == 0 {
                self.inner.drained.notify_all();
            }
        }
        removed
    }

    /// Snapshot of the requester at the front of the queue, without
    /// removing it, used by the arbiter's FIFO scan over a handle's queue.
    pub(crate) fn queue_front(&self) -> Option<(Arc<Task<T>>, usize)> {
        let st = self.inner.header_lock.lock();
        st.queue.front().map(|r| (r.task.clone(), r.buf_index))
    }

    /// Peeks the `n`-th entry in the queue (used by the arbiter's FIFO
    /// scan to advance past a requester whose group could not be
    /// satisfied this round).
    pub(crate) fn queue_nth(&self, n: usize) -> Option<(Arc<Task<T>>, usize)> {
        let st = self.inner.header_lock.lock();
        st.queue.get(n).map(|r| (r.task.clone(), r.buf_index))
    }

    #[cfg(test)]
    pub(crate) fn snapshot(&self) -> (u32, u32, usize) {
        let st = self.inner.header_lock.lock();
        (st.ref_count, st.busy_count, st.queue.len())
    }

    fn with_state<R>(&self, f: impl FnOnce(MutexGuard<'_, State<T>>) -> R) -> R {
        f(self.inner.header_lock.lock())
    }
}

/// Public read-only counters, exposing the ref-count/busy-count invariants
/// without exposing internal mutability.
#[derive(Debug, Copy, Clone)]
pub struct HandleSnapshot {
    pub ref_count: u32,
    pub busy_count: u32,
    pub queue_len: usize,
    pub current_mode: Option<Mode>,
}

impl<T> Handle<T> {
    pub fn snapshot_pub(&self) -> HandleSnapshot {
        self.with_state(|st| HandleSnapshot {
            ref_count: st.ref_count,
            busy_count: st.busy_count,
            queue_len: st.queue.len(),
            current_mode: st.current.map(|a| a.mode),
        })
    }
}
