//! The dispatcher: the state machine that drives task submission and
//! release.

use std::sync::Arc;

use crate::arbiter::TryAcquireOutcome;
use crate::error::Error;
use crate::handle::{Handle, Outcome};
use crate::mode::Access;
use crate::policy::Policy;
use crate::stats::Stats;
use crate::task::{Task, TaskBuilder, TaskState};

/// Drives tasks from `Submitted` to `Ready` by acquiring their buffers in
/// order, and drives promotion of parked requesters back through the same
/// walk on release.
///
/// `Dispatcher` itself holds no handles and no tasks: it is a thin,
/// `Clone`-able façade over a `Policy` plus the shared [`Stats`] counters,
/// matching framing of the dependency core as a mediator
/// between handles/tasks and a pluggable policy it does not own.
pub struct Dispatcher<T, P> {
    policy: Arc<P>,
    stats: Arc<Stats>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

impl<T, P> Clone for Dispatcher<T, P> {
    fn clone(&self) -> Self {
        Self {
            policy: self.policy.clone(),
            stats: self.stats.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<T, P: Policy<T>> Dispatcher<T, P> {
    pub fn new(policy: Arc<P>) -> Self {
        Self {
            policy,
            stats: Stats::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn stats(&self) -> &Arc<Stats> {
        &self.stats
    }

    /// `handle_register`, convenience wrapper that threads
    /// this dispatcher's shared [`Stats`] through.
    pub fn register_handle(&self) -> Handle<T> {
        Handle::register(self.stats.clone())
    }

    /// `task_submit`. Returns once the task is queued
    /// (`Accepted`); a zero-buffer task is Ready immediately.
    pub fn submit(&self, task: Arc<Task<T>>) -> Result<(), Error> {
        task.set_state(TaskState::Submitted);
        self.drive(task, 0);
        Ok(())
    }

    /// Builds and submits a task in one step, surfacing build-time
    /// [`Error::InvalidArgument`] to the caller.
    pub fn submit_new(&self, buffers: impl IntoIterator<Item = (Handle<T>, Access)>, payload: T) -> Result<Arc<Task<T>>, Error> {
        let mut builder = TaskBuilder::new().payload(payload);
        for (handle, access) in buffers {
            builder = builder.with_buffer(handle, access);
        }
        let task = builder.build()?;
        self.submit(task.clone())?;
        Ok(task)
    }

    /// `task_complete`, called by the worker after running the
    /// task's body to trigger §4.3's release protocol. Buffers are released
    /// one handle at a time; the release loop never holds two handle locks
    /// simultaneously ("must not hold two handle locks
    /// simultaneously").
    pub fn task_complete(&self, task: Arc<Task<T>>) {
        task.set_state(TaskState::Done);
        let drive = |t: Arc<Task<T>>, idx: usize| self.drive(t, idx);
        for i in 0..task.buffer_count() {
            let handle = task.buffers()[i].handle.clone();
            if let Some(arbiter) = handle.arbiter() {
                handle.release_arbiter_ref();
                arbiter.notify(&handle, &drive);
            } else {
                handle.release_non_arbiter(&drive);
            }
        }
    }

    /// `handle_acquire`: a synchronous, non-task acquisition
    /// that still goes through the ordinary handle queue ("still obeys
    /// queue"). Blocks the calling thread until the buffer is granted.
    /// Requires `T: Default` to stand in for the (unused) task payload on
    /// this synthetic single-buffer task (see `DESIGN.md` for the
    /// rationale).
    pub fn handle_acquire(&self, handle: &Handle<T>, access: Access) -> Result<Arc<Task<T>>, Error>
    where
        T: Default,
    {
        let task = TaskBuilder::new()
            .payload(T::default())
            .synchronous()
            .with_buffer(handle.clone(), access)
            .build()?;
        self.drive(task.clone(), 0);
        task.wait_for_ready();
        Ok(task)
    }

    /// `handle_release`: releases a reference obtained through
    /// [`Self::handle_acquire`].
    pub fn handle_release(&self, task: Arc<Task<T>>) {
        self.task_complete(task);
    }

    /// Walks `task.buffers()[index..]`, acquiring (or parking on) each
    /// buffer in order. Recurses into the arbiter
    /// sub-protocol for any arbitered group encountered, and
    /// marks the task Ready once every buffer has been granted.
    ///
    /// This single function implements both the initial submission walk
    /// and the continuation after a parked requester is promoted: callers
    /// resume at `requester.buf_index + 1` (plain handles) or at the end of
    /// an arbiter group (arbitered handles), so the walk never re-acquires
    /// a buffer twice.
    fn drive(&self, task: Arc<Task<T>>, mut index: usize) {
        loop {
            if index >= task.buffer_count() {
                task.set_state(TaskState::Ready);
                match task.ready_signal() {
                    Some(signal) => signal.signal(),
                    None => self.policy.push_ready(task),
                }
                return;
            }

            if let Some(group) = task.arbiter_group_at(index) {
                let arbiter = group.arbiter.clone();
                let (start, end) = (group.start, group.end);
                match arbiter.try_acquire(&task, start, end) {
                    TryAcquireOutcome::Acquired => {
                        task.grant((end - start) as u32);
                        index = end;
                    }
                    TryAcquireOutcome::Parked => {
                        task.set_state(TaskState::Waiting);
                        return;
                    }
                }
                continue;
            }

            let (handle, access) = {
                let buf = &task.buffers()[index];
                (buf.handle.clone(), buf.access)
            };
            match handle.try_acquire_or_park(task.clone(), index, access) {
                Outcome::Acquired => {
                    task.grant(1);
                    index += 1;
                }
                Outcome::Parked => {
                    task.set_state(TaskState::Waiting);
                    return;
                }
            }
        }
    }
}
