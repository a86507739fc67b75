//! The narrow boundary to the (unspecified, pluggable) scheduling policy.
//!
//! The dependency core owns no policy state; it only ever calls
//! [`Policy::push_ready`] and expects [`Policy::pop_for_worker`] to be
//! called by workers. Concrete policies (FIFO, work-stealing, priority,
//! ...) live entirely outside this crate — see `starpu-policy-fifo` for a
//! minimal reference implementation used by this crate's own integration
//! tests.

use std::sync::Arc;

use crate::task::Task;

/// Opaque identifier for a worker, passed through to
/// [`Policy::pop_for_worker`] uninterpreted by the core.
pub type WorkerId = usize;

/// The scheduling policy interface.
///
/// # Contract
///
/// `push_ready` must not call back into the dependency core synchronously:
/// re-entrant submission from inside `push_ready` is not supported by this
/// crate's `Dispatcher` and will deadlock if it targets the same
/// `Dispatcher` instance recursively through a single-threaded caller.
pub trait Policy<T>: Send + Sync {
    /// Called by the dependency core when `task` becomes Ready. Called
    /// with no core lock held.
    fn push_ready(&self, task: Arc<Task<T>>);

    /// Called by a worker to obtain its next unit of work, or `None` if
    /// none is currently available.
    fn pop_for_worker(&self, worker: WorkerId) -> Option<Arc<Task<T>>>;
}
