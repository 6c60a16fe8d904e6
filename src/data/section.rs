//! Section: Field data storage over an atlas.
//!
//! The `Section<V>` type couples an [`Atlas`] with a `Vec<V>` holding the
//! actual per-point values.

use crate::coupling_error::CouplingError;
use crate::data::atlas::Atlas;
use crate::topology::point::PointId;

/// Storage for per-point field data, backed by an `Atlas`.
#[derive(Clone, Debug, PartialEq)]
pub struct Section<V> {
    atlas: Atlas,
    data: Vec<V>,
}

impl<V: Clone + Default> Section<V> {
    /// Construct a section over `atlas`, filled with `V::default()`.
    pub fn new(atlas: Atlas) -> Self {
        let data = vec![V::default(); atlas.total_len()];
        Section { atlas, data }
    }

    /// Add a new point with a slice of `len` default values.
    pub fn try_add_point(&mut self, p: PointId, len: usize) -> Result<(), CouplingError> {
        self.atlas.try_insert(p, len)?;
        self.data.resize(self.atlas.total_len(), V::default());
        Ok(())
    }

    /// Overwrite the slice at `p` with `val`.
    ///
    /// # Errors
    /// `MissingPoint` if `p` is not registered, `SliceLengthMismatch` if the
    /// lengths differ.
    pub fn try_set(&mut self, p: PointId, val: &[V]) -> Result<(), CouplingError> {
        let target = self.try_restrict_mut(p)?;
        if target.len() != val.len() {
            return Err(CouplingError::SliceLengthMismatch {
                point: p,
                expected: target.len(),
                found: val.len(),
            });
        }
        target.clone_from_slice(val);
        Ok(())
    }
}

impl<V> Section<V> {
    /// The atlas describing this section's layout.
    #[inline]
    pub fn atlas(&self) -> &Atlas {
        &self.atlas
    }

    /// Read-only view of the slice for `p`.
    #[inline]
    pub fn try_restrict(&self, p: PointId) -> Result<&[V], CouplingError> {
        let (offset, len) = self.atlas.get(p).ok_or(CouplingError::MissingPoint(p))?;
        Ok(&self.data[offset..offset + len])
    }

    /// Mutable view of the slice for `p`.
    #[inline]
    pub fn try_restrict_mut(&mut self, p: PointId) -> Result<&mut [V], CouplingError> {
        let (offset, len) = self.atlas.get(p).ok_or(CouplingError::MissingPoint(p))?;
        Ok(&mut self.data[offset..offset + len])
    }

    /// Flat data buffer in atlas order.
    #[inline]
    pub fn as_slice(&self) -> &[V] {
        &self.data
    }

    /// Mutable flat data buffer in atlas order.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [V] {
        &mut self.data
    }

    /// Borrow the atlas and the mutable value buffer at the same time.
    #[inline]
    pub fn split_mut(&mut self) -> (&Atlas, &mut [V]) {
        (&self.atlas, &mut self.data)
    }

    /// Iterate over `(PointId, &[V])` in atlas order.
    pub fn iter(&self) -> impl Iterator<Item = (PointId, &[V])> {
        self.atlas
            .iter_entries()
            .map(move |(p, (offset, len))| (p, &self.data[offset..offset + len]))
    }
}
