//! Reduction barrier and flush.
//!
//! While a handle is in `Redux` mode, any number of producers may hold it
//! concurrently (`Redux` is compatible with `Redux`, see
//! [`crate::mode::compatible`]). The first non-`Redux` access queued behind
//! them must wait for a synthetic *combine* task to run before it is
//! granted. this leaves the combine task's own semantics to the
//! executor but requires the core to "surface an explicit `redux_flush`
//! operation that injects" it.
//!
//! **Design decision (recorded here and in `DESIGN.md`):** the combine
//! task is injected by prepending it to the handle's queue — ahead of the
//! non-`Redux` requester already waiting — via
//! [`crate::handle::Handle::push_front_requester`]. Once the outstanding
//! `Redux` holders drain (ordinary reference-counted release), the
//! combine task is the new head of the queue and is cohort-promoted first
//! by the existing, unmodified release machinery; only once *it* completes
//! does its own release promote the original waiter. No special-casing is
//! needed in [`crate::handle::Handle::release_non_arbiter`] at all — the
//! barrier falls out of ordinary FIFO order once the combine task is
//! correctly positioned.

use std::sync::Arc;

use crate::error::Error;
use crate::handle::Handle;
use crate::mode::Access;
use crate::task::{Task, TaskBuilder};

/// Whether `handle` currently needs a reduction flush: it is held in
/// `Redux` mode and the head of its queue is a non-`Redux` requester.
pub fn needs_flush<T>(handle: &Handle<T>) -> bool {
    let (mode, head_is_non_redux) = handle.redux_snapshot();
    matches!(mode, Some(crate::mode::Mode::Redux)) && head_is_non_redux
}

/// Builds and parks the synthetic combine task for `handle` ahead of the
/// requester already waiting, returning the combine task so the caller can
/// hand it to the policy once it becomes Ready (it has exactly one buffer,
/// so it becomes Ready — and is pushed to the policy — as soon as it is
/// promoted to the front of the queue by an ordinary release).
///
/// Returns [`Error::InvalidArgument`] if `handle` does not currently need a
/// flush (calling this speculatively, without checking [`needs_flush`]
/// first, is a caller error but not severe enough to be a fatal contract
/// violation — the caller may simply have lost a race with another
/// flusher).
pub fn redux_flush<T>(handle: &Handle<T>, combine_payload: T) -> Result<Arc<Task<T>>, Error> {
    debug_assert!(
        !handle.has_arbiter(),
        "reduction handles under an arbiter are out of scope"
    );
    if !needs_flush(handle) {
        return Err(Error::InvalidArgument(format!(
            "redux_flush({:?}) called without a pending reduction barrier",
            handle.id()
        )));
    }

    let combine = TaskBuilder::new()
        .payload(combine_payload)
        .with_buffer(handle.clone(), Access::rw())
        .build()?;
    combine.set_state(crate::task::TaskState::Waiting);
    handle.push_front_requester(combine.clone(), 0, Access::rw());
    Ok(combine)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Stats;

    #[test]
    fn needs_flush_false_on_fresh_handle() {
        let handle: Handle<()> = Handle::register(Stats::new());
        assert!(!needs_flush(&handle));
    }
}
