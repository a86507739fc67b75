//! Error taxonomy for the dependency core.
//!
//! Modeled on the status-code split of `fimo_module_core::error::ErrorKind`
//! (itself a gRPC-style taxonomy), narrowed to the three kinds the
//! dependency core actually distinguishes. Only [`Error::InvalidArgument`]
//! is returned to a caller; contract violations and resource exhaustion are
//! fatal and are raised by panicking after logging, not by
//! returning an `Err` a caller could silently ignore.

use std::fmt;

/// Recoverable errors surfaced to callers of [`crate::dispatcher::Dispatcher::submit`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Mode incompatibility (or another malformed request) detected at
    /// `task_submit`. The caller is expected to fix the task and resubmit;
    /// the core performs no internal retry.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// Kind of a fatal, unrecoverable failure. Carried only for
/// diagnostics; both kinds abort the process.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FatalKind {
    /// Misuse of the core's contract: releasing a handle never acquired,
    /// unregistering a handle with non-zero `busy_count`, reassigning an
    /// arbiter mid-life, and similar.
    Contract,
    /// An internal allocation (e.g. a requester node) failed and the core
    /// has no safe retry path.
    ResourceExhausted,
}

impl fmt::Display for FatalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FatalKind::Contract => "contract violation",
            FatalKind::ResourceExhausted => "resource exhausted",
        })
    }
}

/// Logs and aborts,: "fatal, aborts the process with a
/// diagnostic". Never returns.
#[track_caller]
pub fn fatal(kind: FatalKind, msg: impl fmt::Display) -> ! {
    log::error!("starpu-core: {kind}: {msg}");
    panic!("starpu-core {kind}: {msg}");
}

/// Shorthand for [`fatal`] with [`FatalKind::Contract`].
#[track_caller]
pub fn contract_violation(msg: impl fmt::Display) -> ! {
    fatal(FatalKind::Contract, msg)
}

/// Shorthand for [`fatal`] with [`FatalKind::ResourceExhausted`].
#[track_caller]
pub fn resource_exhausted(msg: impl fmt::Display) -> ! {
    fatal(FatalKind::ResourceExhausted, msg)
}
