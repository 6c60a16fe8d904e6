//! Atlas: Mapping mesh points to contiguous slices in a flat data array.
//!
//! Coordinates and other per-point data are packed into a single `Vec`; the
//! atlas records where each point's slice starts and how long it is.
//! Offsets are contiguous in insertion order, so two atlases built from the
//! same point sequence with the same lengths are interchangeable.

use crate::coupling_error::CouplingError;
use crate::debug_invariants::DebugInvariants;
use crate::topology::point::PointId;
use std::collections::HashMap;

/// `Atlas` maintains a lookup from each `PointId` to its `(offset, len)` and
/// the insertion order used for deterministic iteration.
///
/// # Invariants
/// - Each point appears exactly once in `order`.
/// - `map` contains precisely the keys listed in `order`.
/// - Offsets are contiguous in insertion order and `total_len` is the sum of
///   all lengths.
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Atlas {
    map: HashMap<PointId, (usize, usize)>,
    order: Vec<PointId>,
    total_len: usize,
}

impl Atlas {
    /// Insert a new point `p` with a slice of length `len`, returning its offset.
    ///
    /// # Errors
    /// `SliceLengthMismatch` if `len == 0`, `DuplicatePoint` if `p` is present.
    pub fn try_insert(&mut self, p: PointId, len: usize) -> Result<usize, CouplingError> {
        if len == 0 {
            return Err(CouplingError::SliceLengthMismatch {
                point: p,
                expected: 1,
                found: 0,
            });
        }
        if self.map.contains_key(&p) {
            return Err(CouplingError::DuplicatePoint(p));
        }
        let offset = self.total_len;
        self.map.insert(p, (offset, len));
        self.order.push(p);
        self.total_len += len;
        #[cfg(any(debug_assertions, feature = "check-invariants"))]
        self.debug_assert_invariants();
        Ok(offset)
    }

    /// Slice descriptor `(offset, len)` for `p`, if registered.
    #[inline]
    pub fn get(&self, p: PointId) -> Option<(usize, usize)> {
        self.map.get(&p).copied()
    }

    /// Returns true iff `p` is registered in the atlas.
    #[inline]
    pub fn contains(&self, p: PointId) -> bool {
        self.map.contains_key(&p)
    }

    /// Number of registered points.
    #[inline]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the atlas has zero points.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Total length of all registered slices.
    #[inline]
    pub fn total_len(&self) -> usize {
        self.total_len
    }

    /// Registered points in insertion order.
    #[inline]
    pub fn points(&self) -> &[PointId] {
        &self.order
    }

    /// Borrowing iterator over `(PointId, (offset, len))` in insertion order.
    pub fn iter_entries(&self) -> impl Iterator<Item = (PointId, (usize, usize))> + '_ {
        self.order.iter().map(move |&p| (p, self.map[&p]))
    }
}

impl DebugInvariants for Atlas {
    const KIND: &'static str = "atlas";

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        if self.order.len() != self.map.len() {
            return Err(CouplingError::InvalidGeometry(format!(
                "atlas order has {} points, map has {}",
                self.order.len(),
                self.map.len()
            )));
        }
        let mut next = 0usize;
        for &p in &self.order {
            let (offset, len) = self.map.get(&p).copied().ok_or(CouplingError::MissingPoint(p))?;
            if offset != next {
                return Err(CouplingError::InvalidGeometry(format!(
                    "atlas offset for {p} is {offset}, expected {next}"
                )));
            }
            next += len;
        }
        if next != self.total_len {
            return Err(CouplingError::InvalidGeometry(format!(
                "atlas total_len {} does not match span sum {next}",
                self.total_len
            )));
        }
        Ok(())
    }
}
