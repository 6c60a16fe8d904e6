//! Structural self-checks for coordinate layouts and meshes.
//!
//! Checks run in debug builds, and in release builds with the
//! `check-invariants` feature. A failed check panics: a displaced mesh whose
//! layout has drifted from its reference cannot be repaired in place.

use crate::coupling_error::CouplingError;

/// A structure that can verify its own layout.
pub trait DebugInvariants {
    /// Label used in the panic message of [`DebugInvariants::debug_assert_invariants`].
    const KIND: &'static str;

    /// First violated invariant, if any.
    fn validate_invariants(&self) -> Result<(), CouplingError>;

    /// Panic on a violated invariant when checks are enabled.
    fn debug_assert_invariants(&self) {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = self.validate_invariants() {
            log::error!("{} failed its structural check: {e}", Self::KIND);
            panic!("[invariants] {} invalid: {e}", Self::KIND);
        }
    }
}

/// Run a fallible check and panic with `msg` on error when checks are
/// enabled; compiles to nothing otherwise.
#[macro_export]
macro_rules! debug_invariants {
    ($check:expr, $msg:literal) => {
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        if let Err(e) = $check {
            ::log::error!(concat!($msg, ": {}"), e);
            panic!(concat!("[invariants] ", $msg, ": {}"), e);
        }
    };
}
