//! A single parked request for one handle by one task.

use std::sync::Arc;

use crate::mode::Access;
use crate::task::Task;

/// One entry in a handle's `queue`: a task waiting to acquire `access` on
/// the handle it is parked on.
///
/// `buf_index` is the position of this access within the owning task's
/// buffer list. It doubles as the resumption point: once this requester is
/// promoted, the dispatcher continues walking the task's buffer list
/// starting at `buf_index + 1` rather than re-processing buffers already
/// granted ("processing of later buffers is deferred to when
/// this requester is promoted").
pub struct Requester<T> {
    pub task: Arc<Task<T>>,
    pub buf_index: usize,
    pub access: Access,
}

impl<T> Requester<T> {
    pub fn new(task: Arc<Task<T>>, buf_index: usize, access: Access) -> Self {
        Self {
            task,
            buf_index,
            access,
        }
    }

    /// Whether this requester was parked on behalf of `task`, used by the
    /// arbiter to remove sibling entries across a task's arbitered handles.
    pub fn belongs_to(&self, task: &Arc<Task<T>>) -> bool {
        Arc::ptr_eq(&self.task, task)
    }
}

impl<T> Clone for Requester<T> {
    fn clone(&self) -> Self {
        Self {
            task: self.task.clone(),
            buf_index: self.buf_index,
            access: self.access,
        }
    }
}

impl<T> std::fmt::Debug for Requester<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("task", &self.task.id())
            .field("buf_index", &self.buf_index)
            .field("access", &self.access)
            .finish()
    }
}
