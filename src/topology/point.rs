//! `PointId`: a strong, zero-cost handle for mesh entities
//!
//! Nodes and elements of both the reference and the displaced mesh are named
//! by `PointId`. Because the displaced mesh is a topological copy of the
//! reference mesh, the same `PointId` refers to the same entity in both.
//! `PointId` wraps a nonzero `u64`; 0 is reserved as an invalid sentinel.

use crate::coupling_error::CouplingError;
use std::{fmt, num::NonZeroU64};

/// Opaque, non-zero identifier of a node or element.
///
/// # Memory layout
/// `repr(transparent)` over `NonZeroU64`, so `Option<PointId>` is the size of a `u64`.
#[derive(
    Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[repr(transparent)]
pub struct PointId(NonZeroU64);

impl PointId {
    /// Creates a new `PointId` from a raw `u64` value.
    ///
    /// # Errors
    /// Returns [`CouplingError::InvalidPointId`] if `raw == 0`.
    ///
    /// # Example
    /// ```rust
    /// # use mesh_displace::topology::point::PointId;
    /// let p = PointId::new(1).unwrap();
    /// assert_eq!(p.get(), 1);
    /// assert!(PointId::new(0).is_err());
    /// ```
    #[inline]
    pub fn new(raw: u64) -> Result<Self, CouplingError> {
        NonZeroU64::new(raw)
            .map(PointId)
            .ok_or(CouplingError::InvalidPointId)
    }

    /// Returns the inner `u64` value of this `PointId`.
    #[inline]
    pub const fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Debug for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PointId").field(&self.get()).finish()
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

#[cfg(test)]
mod layout_tests {
    use super::*;
    use static_assertions::assert_eq_size;

    assert_eq_size!(PointId, u64);
    assert_eq_size!(Option<PointId>, u64);
}
