//! Data-handle dependency tracking and task dispatch for a heterogeneous
//! task runtime.
//!
//! This crate implements the layer that sits between a task submission API
//! and a pluggable scheduling [`policy::Policy`]: it tracks which buffers a
//! task touches and in which [`mode::Mode`], queues tasks whose buffers are
//! busy, and hands a task to the policy exactly once all of its buffers have
//! been granted. It executes nothing itself — the caller's task payload
//! `T` is opaque to the core and is only ever handed back via
//! [`task::Task::take_payload`].
//!
//! # Module map
//!
//! - [`mode`]: the `R`/`W`/`Rw`/`Scratch`/`Redux` access lattice and its
//!   compatibility/join rules.
//! - [`handle`]: the per-buffer state machine (ref/busy counts, current
//!   mode, FIFO requester queue).
//! - [`arbiter`]: opportunistic atomic acquisition across a group of
//!   handles, avoiding pairwise lock-order serialization.
//! - [`task`]: the task descriptor and its builder, which performs the
//!   duplicate-collapsing, arbiter-grouping and deadlock-avoiding sort a
//!   task's buffer list needs before dispatch.
//! - [`dispatcher`]: `submit` / `task_complete` / `handle_acquire` and the
//!   `drive` continuation shared by all three.
//! - [`policy`]: the narrow trait a scheduler implements to receive ready
//!   tasks; see the `starpu-policy-fifo` crate for a reference
//!   implementation.
//! - [`redux`]: the reduction barrier's `needs_flush`/`redux_flush` pair.
//! - [`stats`]: ambient diagnostic counters, independent of any policy.
//! - [`error`]: the recoverable/fatal error split.

mod arbiter;
mod dispatcher;
mod error;
mod handle;
mod mode;
mod policy;
mod redux;
mod requester;
mod stats;
mod task;

pub use arbiter::{Arbiter, ArbiterId};
pub use dispatcher::Dispatcher;
pub use error::{Error, FatalKind};
pub use handle::{Handle, HandleId, HandleSnapshot};
pub use mode::{compatible, join, join_mode, try_join_mode, Access, Flags, Mode};
pub use policy::{Policy, WorkerId};
pub use redux::{needs_flush, redux_flush};
pub use stats::Stats;
pub use task::{Task, TaskBuilder, TaskId, TaskState};
