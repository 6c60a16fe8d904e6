//! Geometry/coordinates storage for mesh nodes.
//!
//! Coordinates are stored in a `Section` with a fixed dimension per node, so
//! the flat buffer is a sequence of equally sized chunks in node order. The
//! node visitors rely on that stride to hand out disjoint mutable chunks to
//! worker threads.

use crate::coupling_error::CouplingError;
use crate::data::atlas::Atlas;
use crate::data::section::Section;
use crate::topology::point::PointId;

/// Node coordinate storage with an attached spatial dimension.
#[derive(Clone, Debug, PartialEq)]
pub struct Coordinates {
    dimension: usize,
    section: Section<f64>,
}

impl Coordinates {
    /// Empty coordinate storage for `dimension`-dimensional nodes.
    pub fn new(dimension: usize) -> Result<Self, CouplingError> {
        if dimension == 0 || dimension > 3 {
            return Err(CouplingError::InvalidGeometry(format!(
                "unsupported spatial dimension {dimension}"
            )));
        }
        Ok(Self {
            dimension,
            section: Section::new(Atlas::default()),
        })
    }

    /// Spatial dimension per node.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of stored nodes.
    #[inline]
    pub fn len(&self) -> usize {
        self.section.atlas().len()
    }

    /// Whether no node is stored.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.section.atlas().is_empty()
    }

    /// Nodes in storage order.
    #[inline]
    pub fn points(&self) -> &[PointId] {
        self.section.atlas().points()
    }

    /// Whether `p` has coordinates.
    #[inline]
    pub fn contains(&self, p: PointId) -> bool {
        self.section.atlas().contains(p)
    }

    /// Append node `p` at `xyz`.
    pub fn try_add_point(&mut self, p: PointId, xyz: &[f64]) -> Result<(), CouplingError> {
        if xyz.len() != self.dimension {
            return Err(CouplingError::SliceLengthMismatch {
                point: p,
                expected: self.dimension,
                found: xyz.len(),
            });
        }
        self.section.try_add_point(p, self.dimension)?;
        self.section.try_set(p, xyz)
    }

    /// Read-only view of the coordinate slice for `p`.
    #[inline]
    pub fn try_restrict(&self, p: PointId) -> Result<&[f64], CouplingError> {
        self.section.try_restrict(p)
    }

    /// Mutable view of the coordinate slice for `p`.
    #[inline]
    pub fn try_restrict_mut(&mut self, p: PointId) -> Result<&mut [f64], CouplingError> {
        self.section.try_restrict_mut(p)
    }

    /// Node ids and the flat mutable buffer, both in storage order.
    ///
    /// Node `points[i]` owns `data[i * dimension..(i + 1) * dimension]`.
    pub fn split_mut(&mut self) -> (&[PointId], &mut [f64]) {
        let (atlas, data) = self.section.split_mut();
        (atlas.points(), data)
    }

    /// Flat coordinate buffer in storage order.
    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        self.section.as_slice()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: u64) -> PointId {
        PointId::new(raw).unwrap()
    }

    #[test]
    fn stride_matches_dimension() {
        let mut coords = Coordinates::new(2).unwrap();
        coords.try_add_point(pid(5), &[0.0, 1.0]).unwrap();
        coords.try_add_point(pid(2), &[2.0, 3.0]).unwrap();
        let (points, data) = coords.split_mut();
        let pairs: Vec<_> = points
            .iter()
            .copied()
            .zip(data.chunks_mut(2).map(|c| c.to_vec()))
            .collect();
        assert_eq!(pairs, vec![(pid(5), vec![0.0, 1.0]), (pid(2), vec![2.0, 3.0])]);
    }

    #[test]
    fn wrong_length_is_rejected() {
        let mut coords = Coordinates::new(3).unwrap();
        assert!(matches!(
            coords.try_add_point(pid(1), &[0.0]),
            Err(CouplingError::SliceLengthMismatch { expected: 3, found: 1, .. })
        ));
    }
}
