//! The task descriptor and its builder.
//!
//! `TaskBuilder` performs the pre-sort the dispatch walk assumes the caller
//! has already done: collapsing duplicate accesses to the same handle,
//! partitioning non-arbitered buffers ahead of arbitered ones, sorting the
//! non-arbitered prefix by a stable total order over [`HandleId`] to
//! prevent AB/BA deadlock, and grouping the arbitered tail by arbiter so
//! that [`Arbiter::try_acquire`](crate::arbiter::Arbiter::try_acquire) and
//! [`Arbiter::notify`](crate::arbiter::Arbiter::notify) can address a whole
//! group by a contiguous `[start, end)` index range.

use std::fmt;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use crate::arbiter::Arbiter;
use crate::error::Error;
use crate::handle::{Handle, HandleId};
use crate::mode::{try_join_mode, Access};

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct TaskId(u64);

/// The task's lifecycle.
///
/// ```text
/// Submitted -> (all buffers acquired?) -> Ready -> Running -> Done
///    |                                              |
///    +-- any buffer parked -> Waiting --------------+ (via release promotion)
/// ```
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    Submitted,
    Waiting,
    Ready,
    Running,
    Done,
}

/// One `(handle, mode)` pair in a task's buffer list, post pre-sort.
pub(crate) struct Buffer<T> {
    pub handle: Handle<T>,
    pub access: Access,
}

/// A contiguous run of `buffers[start..end]` that all belong to the same
/// arbiter.
#[derive(Clone)]
pub(crate) struct ArbiterGroup {
    pub arbiter: Arc<Arbiter>,
    pub start: usize,
    pub end: usize,
}

/// A submitted unit of work and its data dependencies.
///
/// The core never executes a task's body: it only tracks `T`, an opaque
/// payload supplied by the caller (e.g. a closure, or an identifier the
/// executor resolves), and hands it back to the [`crate::policy::Policy`]
/// once every buffer has been acquired. This mirrors
/// `fimo_tasks_impl::worker_group::task::EnqueuedTask`, which likewise
/// carries an opaque, executor-owned `RawTask` rather than running
/// anything itself.
pub struct Task<T> {
    id: TaskId,
    buffers: Vec<Buffer<T>>,
    arbiter_groups: Vec<ArbiterGroup>,
    unmet: AtomicU32,
    state: Mutex<TaskState>,
    payload: Mutex<Option<T>>,
    ready_signal: Option<Arc<ReadySignal>>,
}

/// Lets a non-worker thread block until the dependency core has granted
/// every buffer of a synthetic, single-use task — the mechanism behind
/// `handle_acquire`'s synchronous wait. Modeled on
/// `fimo_tasks_int::runtime::IRuntimeExt::block_on_and_enter`'s
/// `CleanupData { condvar, completed }` pattern for joining a task from a
/// thread the runtime doesn't own.
pub(crate) struct ReadySignal {
    ready: Mutex<bool>,
    cv: Condvar,
}

impl ReadySignal {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            ready: Mutex::new(false),
            cv: Condvar::new(),
        })
    }

    pub(crate) fn signal(&self) {
        let mut ready = self.ready.lock();
        *ready = true;
        self.cv.notify_all();
    }

    pub(crate) fn wait(&self) {
        let mut ready = self.ready.lock();
        while !*ready {
            self.cv.wait(&mut ready);
        }
    }
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("buffers", &self.buffers.len())
            .field("state", &*self.state.lock())
            .field("unmet", &self.unmet.load(Ordering::Relaxed))
            .finish()
    }
}

impl<T> Task<T> {
    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn state(&self) -> TaskState {
        *self.state.lock()
    }

    pub(crate) fn set_state(&self, state: TaskState) {
        *self.state.lock() = state;
    }

    pub fn unmet(&self) -> u32 {
        self.unmet.load(Ordering::Acquire)
    }

    pub(crate) fn buffers(&self) -> &[Buffer<T>] {
        &self.buffers
    }

    pub(crate) fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Decrements `unmet` by one for each buffer granted in
    /// `[start, end)`. Returns the new value.
    pub(crate) fn grant(&self, count: u32) -> u32 {
        self.unmet.fetch_sub(count, Ordering::AcqRel) - count
    }

    /// Takes the caller's opaque payload, leaving `None` behind. Called
    /// exactly once, when a worker pops the task off the policy to run it.
    pub fn take_payload(&self) -> Option<T> {
        self.payload.lock().take()
    }

    /// The arbiter group (if any) whose range contains `index`.
    pub(crate) fn arbiter_group_containing(&self, index: usize) -> Option<(usize, usize)> {
        self.arbiter_groups
            .iter()
            .find(|g| g.start <= index && index < g.end)
            .map(|g| (g.start, g.end))
    }

    /// The arbiter group starting exactly at `index`, if any — used by the
    /// dispatcher's walk to decide whether the next buffer begins a new
    /// arbiter group.
    pub(crate) fn arbiter_group_at(&self, index: usize) -> Option<&ArbiterGroup> {
        self.arbiter_groups.iter().find(|g| g.start == index)
    }

    pub(crate) fn ready_signal(&self) -> Option<&Arc<ReadySignal>> {
        self.ready_signal.as_ref()
    }

    /// Blocks the calling thread until this task reaches Ready. Only valid
    /// for tasks built with [`TaskBuilder::synchronous`].
    pub(crate) fn wait_for_ready(&self) {
        self.ready_signal
            .as_ref()
            .expect("wait_for_ready called on a task without a ready signal")
            .wait();
    }
}

/// Builds a [`Task`] from an unordered set of `(handle, access)` requests,
/// performing the pre-sort the dispatch walk requires (see module docs).
pub struct TaskBuilder<T> {
    requests: Vec<(Handle<T>, Access)>,
    payload: Option<T>,
    synchronous: bool,
}

impl<T> Default for TaskBuilder<T> {
    fn default() -> Self {
        Self {
            requests: Vec::new(),
            payload: None,
            synchronous: false,
        }
    }
}

impl<T> TaskBuilder<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payload(mut self, payload: T) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Marks the task as driven by a blocking caller rather than a worker:
    /// instead of handing the task to the [`crate::policy::Policy`] once
    /// Ready, the dispatcher signals a [`ReadySignal`] the caller can wait
    /// on instead, used by `handle_acquire`.
    pub(crate) fn synchronous(mut self) -> Self {
        self.synchronous = true;
        self
    }

    /// Requests `access` on `handle`. Calling this more than once for the
    /// same handle is legal: the modes are joined into one entry, matching
    /// duplicate accesses to the same handle being collapsed rather than
    /// queued twice.
    pub fn with_buffer(mut self, handle: Handle<T>, access: Access) -> Self {
        self.requests.push((handle, access));
        self
    }

    /// Builds the task, or rejects it with [`Error::InvalidArgument`] if
    /// two requests on the same handle cannot be joined ("Mode
    /// incompatibility at task level: rejected at `task_submit`").
    pub fn build(self) -> Result<Arc<Task<T>>, Error> {
        let mut by_handle: FxHashMap<HandleId, (Handle<T>, Access)> = FxHashMap::default();
        let mut first_seen_order: Vec<HandleId> = Vec::new();

        for (handle, access) in self.requests {
            match by_handle.get_mut(&handle.id()) {
                Some((_, existing)) => {
                    let joined_mode = try_join_mode(existing.mode, access.mode).ok_or_else(|| {
                        Error::InvalidArgument(format!(
                            "incompatible modes {:?} and {:?} requested on the same handle",
                            existing.mode, access.mode
                        ))
                    })?;
                    let commute = existing.is_commute() && access.is_commute();
                    *existing = Access {
                        mode: joined_mode,
                        flags: if commute {
                            crate::mode::Flags::COMMUTE
                        } else {
                            crate::mode::Flags::empty()
                        },
                    };
                }
                None => {
                    first_seen_order.push(handle.id());
                    by_handle.insert(handle.id(), (handle, access));
                }
            }
        }

        let mut non_arbitered: Vec<(Handle<T>, Access)> = Vec::new();
        let mut arbitered_groups: Vec<(Arc<Arbiter>, Vec<(Handle<T>, Access)>)> = Vec::new();
        let mut group_index: FxHashMap<crate::arbiter::ArbiterId, usize> = FxHashMap::default();

        for id in first_seen_order {
            let (handle, access) = by_handle.remove(&id).expect("just inserted");
            match handle.arbiter() {
                None => non_arbitered.push((handle, access)),
                Some(arbiter) => {
                    let idx = *group_index.entry(arbiter.id()).or_insert_with(|| {
                        arbitered_groups.push((arbiter.clone(), Vec::new()));
                        arbitered_groups.len() - 1
                    });
                    arbitered_groups[idx].1.push((handle, access));
                }
            }
        }

        non_arbitered.sort_by_key(|(h, _)| h.id());

        let mut buffers = Vec::with_capacity(non_arbitered.len());
        for (handle, access) in non_arbitered {
            buffers.push(Buffer { handle, access });
        }

        let mut arbiter_groups = Vec::with_capacity(arbitered_groups.len());
        for (arbiter, members) in arbitered_groups {
            let start = buffers.len();
            for (handle, access) in members {
                buffers.push(Buffer { handle, access });
            }
            let end = buffers.len();
            arbiter_groups.push(ArbiterGroup { arbiter, start, end });
        }

        let unmet = buffers.len() as u32;
        Ok(Arc::new(Task {
            id: TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed)),
            buffers,
            arbiter_groups,
            unmet: AtomicU32::new(unmet),
            state: Mutex::new(TaskState::Submitted),
            payload: Mutex::new(self.payload),
            ready_signal: self.synchronous.then(ReadySignal::new),
        }))
    }
}
