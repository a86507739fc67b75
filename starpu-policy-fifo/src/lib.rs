//! A minimal, single-queue [`Policy`] implementation: every worker shares
//! one FIFO of ready tasks.
//!
//! Grounded on the `crossbeam_deque::Injector` half of
//! `fimo_tasks_impl::worker_group::worker_thread`'s worker pool — that
//! module pairs a per-worker `Worker`/`Stealer` with a shared `Injector` for
//! globally-submitted work; this crate keeps only the shared `Injector`
//! side, since a real work-stealing scheduler is out of scope for the
//! dependency core this policy plugs into, which deliberately leaves
//! scheduling policy unspecified and pluggable.

use std::sync::Arc;

use crossbeam_deque::{Injector, Steal};
use starpu_core::{Policy, Task, WorkerId};

/// A `Policy` backed by a single `crossbeam_deque::Injector`. Every worker
/// pops from the same queue; there is no per-worker affinity or stealing.
pub struct FifoPolicy<T> {
    injector: Injector<Arc<Task<T>>>,
}

impl<T> Default for FifoPolicy<T> {
    fn default() -> Self {
        Self {
            injector: Injector::new(),
        }
    }
}

impl<T> FifoPolicy<T> {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl<T: Send + Sync> Policy<T> for FifoPolicy<T> {
    fn push_ready(&self, task: Arc<Task<T>>) {
        log::trace!("fifo policy: task {:?} ready", task.id());
        self.injector.push(task);
    }

    fn pop_for_worker(&self, worker: WorkerId) -> Option<Arc<Task<T>>> {
        loop {
            match self.injector.steal() {
                Steal::Success(task) => {
                    log::trace!("fifo policy: worker {worker} took task {:?}", task.id());
                    return Some(task);
                }
                Steal::Empty => return None,
                Steal::Retry => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use starpu_core::Dispatcher;

    #[test]
    fn push_then_pop_is_fifo() {
        let policy = FifoPolicy::new();
        let dispatcher = Dispatcher::new(policy.clone());
        let h1 = dispatcher.register_handle();
        let h2 = dispatcher.register_handle();

        let t1 = dispatcher
            .submit_new([(h1, starpu_core::Access::rw())], 1)
            .expect("build t1");
        let t2 = dispatcher
            .submit_new([(h2, starpu_core::Access::rw())], 2)
            .expect("build t2");

        let first = policy.pop_for_worker(0).expect("t1 ready");
        assert_eq!(first.id(), t1.id());
        let second = policy.pop_for_worker(0).expect("t2 ready");
        assert_eq!(second.id(), t2.id());
        assert!(policy.pop_for_worker(0).is_none());
    }
}
