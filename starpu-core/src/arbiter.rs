//! The arbiter: opportunistic multi-handle acquisition.
//!
//! Centralizes the mutual exclusion for a group of handles so that a task
//! can acquire several of them as a single atomic step without pairwise
//! lock ordering serializing unrelated work — the "dining philosophers"
//! trick. Grounded on the same `parking_lot::Mutex`
//! idiom as [`crate::handle::Handle`]'s `header_lock`; the arbiter mutex is
//! deliberately per-arbiter rather than global ("keep it
//! per-arbiter...so that independent arbiter groups scale").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::handle::Handle;
use crate::stats::Stats;
use crate::task::Task;

static NEXT_ARBITER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ArbiterId(u64);

/// Centralized mediator for a set of handles.
pub struct Arbiter {
    id: ArbiterId,
    mutex: Mutex<()>,
    stats: Arc<Stats>,
}

impl std::fmt::Debug for Arbiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arbiter").field("id", &self.id).finish_non_exhaustive()
    }
}

/// Outcome of [`Arbiter::try_acquire`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum TryAcquireOutcome {
    /// Every buffer in the group was granted.
    Acquired,
    /// At least one buffer was busy; the task was parked on every handle of
    /// the group.
    Parked,
}

impl Arbiter {
    /// `arbiter_create`.
    pub fn create(stats: Arc<Stats>) -> Arc<Self> {
        Arc::new(Self {
            id: ArbiterId(NEXT_ARBITER_ID.fetch_add(1, Ordering::Relaxed)),
            mutex: Mutex::new(()),
            stats,
        })
    }

    pub fn id(&self) -> ArbiterId {
        self.id
    }

    /// `arbiter_destroy`. The precondition ("no live handle
    /// references it") is structural in this implementation: a `Handle`
    /// holds an `Arc<Arbiter>`, so the arbiter cannot be dropped while any
    /// handle still references it. Consuming `self: Arc<Self>` here makes
    /// that precondition explicit at the call site — the caller must have
    /// given up every other `Arc` clone.
    pub fn destroy(self: Arc<Self>) {
        if Arc::strong_count(&self) != 1 {
            crate::error::contract_violation(format!(
                "arbiter_destroy on arbiter {:?} while {} references remain",
                self.id,
                Arc::strong_count(&self) - 1
            ));
        }
    }

    /// Try-acquire: attempts a fast-take of every buffer in
    /// `task.buffers[start..end]`, all belonging to this arbiter. On any
    /// failure, rolls back every fast-take already performed this call and
    /// parks the task on every handle of the group (including ones not yet
    /// reached), then returns [`TryAcquireOutcome::Parked`].
    pub(crate) fn try_acquire<T>(self: &Arc<Self>, task: &Arc<Task<T>>, start: usize, end: usize) -> TryAcquireOutcome {
        let _guard = self.mutex.lock();
        let mut taken = 0;
        for i in start..end {
            let buf = &task.buffers()[i];
            if buf.handle.fast_take(buf.access) {
                taken += 1;
            } else {
                for j in start..start + taken {
                    task.buffers()[j].handle.fast_release();
                }
                for i in start..end {
                    task.buffers()[i].handle.park_arbiter_requester(task.clone(), i, task.buffers()[i].access);
                }
                log::debug!(
                    "arbiter {:?}: try_acquire aborted for task {:?} at buffer {i}, parked group [{start}, {end})",
                    self.id,
                    task.id()
                );
                return TryAcquireOutcome::Parked;
            }
        }
        log::debug!(
            "arbiter {:?}: try_acquire granted group [{start}, {end}) to task {:?}",
            self.id,
            task.id()
        );
        TryAcquireOutcome::Acquired
    }

    /// Notify: called whenever a release frees up one of
    /// this arbiter's handles. Scans `h`'s queue in FIFO order, attempting
    /// a full group fast-take for each candidate task in turn, and stops
    /// after the first successful promotion (bounding the critical
    /// section). `drive` resumes the promoted task's buffer walk at the
    /// index just past its arbiter group — which may land on another
    /// arbiter group, a non-arbitered tail (never happens given the
    /// ordering rule that arbitered buffers sort to the front, but handled
    /// uniformly by `drive` regardless), or the end of the list (task
    /// becomes Ready).
    ///
    /// Must be called with no `header_lock` held.
    pub(crate) fn notify<T>(self: &Arc<Self>, h: &Handle<T>, drive: &dyn Fn(Arc<Task<T>>, usize)) {
        let _guard = self.mutex.lock();
        let mut scan = 0usize;
        loop {
            let Some((task, this_index)) = h.queue_nth(scan) else {
                return;
            };
            let Some((start, end)) = task.arbiter_group_containing(this_index) else {
                // Shouldn't happen: every parked entry in an arbitered
                // handle's queue was placed there as part of a group.
                scan += 1;
                continue;
            };

            let mut taken = 0;
            let mut ok = true;
            for i in start..end {
                let buf = &task.buffers()[i];
                if buf.handle.fast_take(buf.access) {
                    taken += 1;
                } else {
                    ok = false;
                    break;
                }
            }

            if ok {
                for i in start..end {
                    task.buffers()[i].handle.remove_requester_for_task(&task);
                }
                task.grant((end - start) as u32);
                self.stats.arbiter_notify_promoted();
                log::debug!(
                    "arbiter {:?}: notify promoted task {:?} group [{start}, {end})",
                    self.id,
                    task.id()
                );
                drop(_guard);
                drive(task, end);
                return;
            } else {
                for j in start..start + taken {
                    task.buffers()[j].handle.fast_release();
                }
                scan += 1;
            }
        }
    }
}
