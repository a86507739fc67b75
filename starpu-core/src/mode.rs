//! Access modes and the compatibility lattice they form.
//!
//! Grounded on `fimo_tasks_int::raw`'s small `#[repr(u8)]` enums (e.g.
//! `TaskScheduleStatus`) for the tagged-variant style, and on the bitflags
//! idiom used throughout the `fimo` workspace for orthogonal hint flags.

use std::fmt;

/// The access kind requested for a single buffer on a single handle.
///
/// Forms the lattice `NONE ⊏ R ⊏ RW`, `NONE ⊏ W ⊏ RW`, with `Scratch` and
/// `Redux` as unrelated, self-joining modes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Mode {
    /// No access; the bottom of the lattice. Only ever produced by [`join`].
    None,
    /// Shared read access.
    R,
    /// Exclusive write access.
    W,
    /// Exclusive read-write access, the join of `R` and `W`.
    Rw,
    /// Scratch access: a private, uninitialized working buffer. Never shared.
    Scratch,
    /// Reduction access: multiple concurrent contributors combined later by
    /// a flush (see [`crate::redux`]).
    Redux,
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::None => "none",
            Mode::R => "r",
            Mode::W => "w",
            Mode::Rw => "rw",
            Mode::Scratch => "scratch",
            Mode::Redux => "redux",
        })
    }
}

bitflags::bitflags! {
    /// Hints orthogonal to [`Mode`].
    ///
    /// `Commute` is semantically meaningful to the dependency core (it
    /// relaxes the compatibility rule); `Ssend` and `Locality` are pure
    /// hints passed through to collaborators and never inspected here.
    #[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Default)]
    pub struct Flags: u8 {
        /// This access commutes with other `Commute` accesses on the same
        /// handle, regardless of mode (unless either side is `Scratch` or
        /// `Redux`).
        const COMMUTE = 1 << 0;
        /// Synchronous-send hint; non-semantic to the dependency core.
        const SSEND = 1 << 1;
        /// Locality hint; non-semantic to the dependency core.
        const LOCALITY = 1 << 2;
    }
}

/// A requested access: a [`Mode`] plus orthogonal [`Flags`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Access {
    pub mode: Mode,
    pub flags: Flags,
}

impl Access {
    pub const fn new(mode: Mode, flags: Flags) -> Self {
        Self { mode, flags }
    }

    pub const fn r() -> Self {
        Self::new(Mode::R, Flags::empty())
    }

    pub const fn w() -> Self {
        Self::new(Mode::W, Flags::empty())
    }

    pub const fn rw() -> Self {
        Self::new(Mode::Rw, Flags::empty())
    }

    pub const fn scratch() -> Self {
        Self::new(Mode::Scratch, Flags::empty())
    }

    pub const fn redux() -> Self {
        Self::new(Mode::Redux, Flags::empty())
    }

    pub fn commute(mut self) -> Self {
        self.flags |= Flags::COMMUTE;
        self
    }

    pub fn is_commute(&self) -> bool {
        self.flags.contains(Flags::COMMUTE)
    }
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.mode)?;
        if self.is_commute() {
            write!(f, "|commute")?;
        }
        Ok(())
    }
}

/// Two accesses on the same handle are compatible iff:
/// - both are `R`, or
/// - both carry `COMMUTE` and neither is `Scratch`/`Redux`, or
/// - both are `Redux`.
///
/// All other pairs conflict.
pub fn compatible(current: &Access, incoming: &Access) -> bool {
    if current.mode == Mode::R && incoming.mode == Mode::R {
        return true;
    }
    if current.is_commute()
        && incoming.is_commute()
        && !matches!(current.mode, Mode::Scratch | Mode::Redux)
        && !matches!(incoming.mode, Mode::Scratch | Mode::Redux)
    {
        return true;
    }
    if current.mode == Mode::Redux && incoming.mode == Mode::Redux {
        return true;
    }
    false
}

/// Joins the modes of two accesses known to be either identical or
/// combinable (used both when collapsing duplicate buffer entries on the
/// same handle at task-build time, and when cohort-promoting compatible
/// requesters in [`crate::handle`]).
///
/// Panics (a contract violation, see [`crate::error`]) if the two modes
/// cannot be joined, e.g. `Scratch` with anything else.
pub fn join_mode(a: Mode, b: Mode) -> Mode {
    try_join_mode(a, b)
        .unwrap_or_else(|| crate::error::contract_violation(format!("cannot join incompatible modes {a} and {b}")))
}

/// Fallible counterpart of [`join_mode`], used at task-build time where an
/// invalid combination is a recoverable [`crate::error::Error::InvalidArgument`]
/// rather than a fatal contract violation.
pub fn try_join_mode(a: Mode, b: Mode) -> Option<Mode> {
    use Mode::*;
    match (a, b) {
        (None, x) | (x, None) => Some(x),
        (R, R) => Some(R),
        (W, W) => Some(W),
        (R, W) | (W, R) => Some(Rw),
        (Rw, R) | (R, Rw) | (Rw, W) | (W, Rw) | (Rw, Rw) => Some(Rw),
        (Scratch, Scratch) => Some(Scratch),
        (Redux, Redux) => Some(Redux),
        _ => None,
    }
}

/// Joins two accesses. The `COMMUTE` flag of the result is the
/// intersection: a cohort only remains a commute cohort while every member
/// still carries the flag.
pub fn join(a: Access, b: Access) -> Access {
    let mut flags = Flags::empty();
    if a.is_commute() && b.is_commute() {
        flags |= Flags::COMMUTE;
    }
    Access {
        mode: join_mode(a.mode, b.mode),
        flags,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_read_compatible() {
        assert!(compatible(&Access::r(), &Access::r()));
    }

    #[test]
    fn write_write_incompatible() {
        assert!(!compatible(&Access::w(), &Access::w()));
    }

    #[test]
    fn read_write_incompatible() {
        assert!(!compatible(&Access::r(), &Access::w()));
    }

    #[test]
    fn commute_commute_compatible_regardless_of_mode() {
        assert!(compatible(&Access::w().commute(), &Access::r().commute()));
    }

    #[test]
    fn commute_scratch_incompatible() {
        assert!(!compatible(&Access::scratch().commute(), &Access::w().commute()));
    }

    #[test]
    fn redux_redux_compatible() {
        assert!(compatible(&Access::redux(), &Access::redux()));
    }

    #[test]
    fn redux_write_incompatible() {
        assert!(!compatible(&Access::redux(), &Access::w()));
    }

    #[test]
    fn join_mode_lattice() {
        assert_eq!(join_mode(Mode::R, Mode::R), Mode::R);
        assert_eq!(join_mode(Mode::R, Mode::W), Mode::Rw);
        assert_eq!(join_mode(Mode::None, Mode::W), Mode::W);
    }
}
