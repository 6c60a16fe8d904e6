//! Node visitors that move a displaced mesh relative to its reference.
//!
//! [`UpdateDisplacedMeshVisitor`] writes `reference + offset` where the offset
//! in direction `d` is the nodal value of the `d`-th displacement variable.
//! [`ResetDisplacedMeshVisitor`] writes the reference coordinate back
//! verbatim, so undisplacing is exact regardless of round-off in the offset.
//!
//! Both are driven by [`visit_nodes`], which hands disjoint coordinate chunks
//! to worker threads. Nodes are independent, so splitting the range in any way
//! yields the same coordinates as one sequential pass.

use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::system::{FieldSystem, FieldType, VariableFamily};
use crate::topology::PointId;
use itertools::{EitherOrBoth, Itertools};
#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Per-node operation applied by [`visit_nodes`].
pub trait NodeVisitor: Sync {
    /// Overwrite `xyz` (the coordinates of `node`) in place.
    fn visit(&self, node: PointId, xyz: &mut [f64]) -> Result<(), CouplingError>;
}

/// Half-open range of node positions in coordinate storage order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeRange {
    pub start: usize,
    pub end: usize,
}

impl NodeRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self {
            start,
            end: end.max(start),
        }
    }

    /// Every node of `mesh`.
    pub fn full(mesh: &Mesh) -> Self {
        Self::new(0, mesh.n_nodes())
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    /// Split at absolute position `mid`, clamped into the range.
    pub fn split_at(self, mid: usize) -> (Self, Self) {
        let mid = mid.clamp(self.start, self.end);
        (Self::new(self.start, mid), Self::new(mid, self.end))
    }
}

/// Apply `visitor` to every node of `range` in `mesh`, returning the count.
///
/// With the `rayon` feature the range is processed in parallel in pieces of at
/// least `grain` nodes.
pub fn visit_nodes<V: NodeVisitor + ?Sized>(
    visitor: &V,
    mesh: &mut Mesh,
    range: NodeRange,
    grain: usize,
) -> Result<usize, CouplingError> {
    let dim = mesh.dimension();
    let n_nodes = mesh.n_nodes();
    if range.end > n_nodes {
        return Err(CouplingError::InvalidGeometry(format!(
            "node range {}..{} exceeds {n_nodes} nodes",
            range.start, range.end
        )));
    }
    let (points, data) = mesh.coordinates_mut().split_mut();
    let points = &points[range.start..range.end];
    let data = &mut data[range.start * dim..range.end * dim];

    #[cfg(feature = "rayon")]
    {
        data.par_chunks_mut(dim)
            .zip(points.par_iter())
            .with_min_len(grain.max(1))
            .map(|(xyz, &node)| visitor.visit(node, xyz).map(|()| 1usize))
            .try_reduce(|| 0, |a, b| Ok(a + b))
    }
    #[cfg(not(feature = "rayon"))]
    {
        let _ = grain;
        let mut count = 0;
        for (xyz, &node) in data.chunks_mut(dim).zip(points) {
            visitor.visit(node, xyz)?;
            count += 1;
        }
        Ok(count)
    }
}

/// Check that `target` stores exactly the nodes of `reference`, in order.
///
/// Run before any write so a mismatch never leaves a half-moved mesh.
pub fn check_node_correspondence(reference: &Mesh, target: &Mesh) -> Result<(), CouplingError> {
    if reference.dimension() != target.dimension() {
        return Err(CouplingError::InvalidGeometry(format!(
            "reference mesh is {}-D, displaced mesh is {}-D",
            reference.dimension(),
            target.dimension()
        )));
    }
    for pair in reference.node_ids().iter().zip_longest(target.node_ids()) {
        match pair {
            EitherOrBoth::Both(&a, &b) if a != b => {
                return Err(CouplingError::MissingPoint(if target.has_node(a) { b } else { a }));
            }
            EitherOrBoth::Both(..) => {}
            EitherOrBoth::Left(&p) | EitherOrBoth::Right(&p) => {
                return Err(CouplingError::MissingPoint(p));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, Debug)]
struct Source<'a> {
    system: &'a FieldSystem,
    var: usize,
}

/// Writes `reference + displacement` into each visited node.
#[derive(Debug)]
pub struct UpdateDisplacedMeshVisitor<'a> {
    reference: &'a Mesh,
    directions: Vec<Source<'a>>,
}

impl<'a> UpdateDisplacedMeshVisitor<'a> {
    /// Resolve `displacements` (one name per direction) in `nl`, then `aux`.
    ///
    /// Each must be a nodal Lagrange standard variable. Directions past the
    /// end of `displacements` get no offset.
    pub fn new(
        reference: &'a Mesh,
        displacements: &[String],
        nl: &'a FieldSystem,
        aux: &'a FieldSystem,
    ) -> Result<Self, CouplingError> {
        if displacements.len() > reference.dimension() {
            return Err(CouplingError::DisplacementCountMismatch {
                dimension: reference.dimension(),
                found: displacements.len(),
            });
        }
        let directions = displacements
            .iter()
            .map(|name| {
                let system = if nl.has_variable(name) {
                    nl
                } else if aux.has_variable(name) {
                    aux
                } else {
                    return Err(CouplingError::VariableNotFound(name.clone()));
                };
                let var = system.variable(name)?;
                if var.family != VariableFamily::Lagrange || var.field_type != FieldType::Standard {
                    return Err(CouplingError::VariableTypeMismatch {
                        name: name.clone(),
                        expected: "nodal Lagrange standard".to_string(),
                        found: format!("{:?} {}", var.family, var.field_type),
                    });
                }
                Ok(Source {
                    system,
                    var: var.number,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            reference,
            directions,
        })
    }

    /// Offset applied to `node`; directions without a dof contribute zero.
    pub fn offset(&self, node: PointId) -> Vec<f64> {
        let mut offset = vec![0.0; self.reference.dimension()];
        for (d, src) in self.directions.iter().enumerate() {
            offset[d] = src.system.nodal_value(node, src.var, 0).unwrap_or(0.0);
        }
        offset
    }
}

impl NodeVisitor for UpdateDisplacedMeshVisitor<'_> {
    fn visit(&self, node: PointId, xyz: &mut [f64]) -> Result<(), CouplingError> {
        let reference = self.reference.node(node)?;
        for (d, (x, x0)) in xyz.iter_mut().zip(reference).enumerate() {
            let offset = self
                .directions
                .get(d)
                .and_then(|src| src.system.nodal_value(node, src.var, 0))
                .unwrap_or(0.0);
            *x = x0 + offset;
        }
        Ok(())
    }
}

/// Writes the reference coordinate into each visited node.
#[derive(Clone, Copy, Debug)]
pub struct ResetDisplacedMeshVisitor<'a> {
    reference: &'a Mesh,
}

impl<'a> ResetDisplacedMeshVisitor<'a> {
    pub fn new(reference: &'a Mesh) -> Self {
        Self { reference }
    }
}

impl NodeVisitor for ResetDisplacedMeshVisitor<'_> {
    fn visit(&self, node: PointId, xyz: &mut [f64]) -> Result<(), CouplingError> {
        xyz.copy_from_slice(self.reference.node(node)?);
        Ok(())
    }
}
