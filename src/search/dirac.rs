//! Dirac point bookkeeping: which elements carry arbitrary evaluation points.

use crate::coupling_error::CouplingError;
use crate::fe::contains_point;
use crate::mesh::Mesh;
use crate::topology::{CellType, PointId};
use std::collections::BTreeMap;

const CONTAINS_TOL: f64 = 1e-10;

#[derive(Clone, Debug)]
struct LocatedElement {
    id: PointId,
    cell_type: CellType,
    coords: Vec<Vec<f64>>,
    lo: Vec<f64>,
    hi: Vec<f64>,
}

/// Snapshot of element geometry answering "which element holds this point".
///
/// Built from the coordinates at construction time; rebuild after the mesh
/// moves.
#[derive(Clone, Debug)]
pub struct PointLocator {
    elements: Vec<LocatedElement>,
    mesh_revision: u64,
}

impl PointLocator {
    pub fn build(mesh: &Mesh) -> Result<Self, CouplingError> {
        let mut elements = Vec::with_capacity(mesh.n_elements());
        for (id, e) in mesh.elements() {
            let coords = mesh.element_coordinates(id)?;
            let dim = mesh.dimension();
            let mut lo = vec![f64::INFINITY; dim];
            let mut hi = vec![f64::NEG_INFINITY; dim];
            for xyz in &coords {
                for d in 0..dim {
                    lo[d] = lo[d].min(xyz[d]);
                    hi[d] = hi[d].max(xyz[d]);
                }
            }
            elements.push(LocatedElement {
                id,
                cell_type: e.cell_type,
                coords,
                lo,
                hi,
            });
        }
        Ok(Self {
            elements,
            mesh_revision: mesh.revision(),
        })
    }

    /// Revision of the mesh this locator was built from.
    pub fn mesh_revision(&self) -> u64 {
        self.mesh_revision
    }

    /// Lowest-id element containing `point`.
    pub fn locate(&self, point: &[f64]) -> Option<PointId> {
        self.elements
            .iter()
            .filter(|e| {
                point.len() == e.lo.len()
                    && point
                        .iter()
                        .zip(e.lo.iter().zip(&e.hi))
                        .all(|(p, (lo, hi))| *p >= lo - CONTAINS_TOL && *p <= hi + CONTAINS_TOL)
            })
            .find(|e| contains_point(e.cell_type, &e.coords, point, CONTAINS_TOL))
            .map(|e| e.id)
    }
}

/// Registered Dirac points per element plus the locator used to place them.
#[derive(Clone, Debug, Default)]
pub struct DiracKernelInfo {
    points: BTreeMap<PointId, Vec<Vec<f64>>>,
    locator: Option<PointLocator>,
}

impl DiracKernelInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `point` on `elem` directly.
    pub fn add_point(&mut self, elem: PointId, point: Vec<f64>) {
        self.points.entry(elem).or_default().push(point);
    }

    /// Register `point` on whichever element contains it.
    ///
    /// Returns `None` (and registers nothing) when no element does.
    pub fn add_point_located(&mut self, point: Vec<f64>) -> Result<Option<PointId>, CouplingError> {
        let locator = self
            .locator
            .as_ref()
            .ok_or(CouplingError::NotInitialized("Dirac point locator"))?;
        let found = locator.locate(&point);
        if let Some(elem) = found {
            self.add_point(elem, point);
        }
        Ok(found)
    }

    /// Points registered on `elem`, empty if none.
    pub fn points(&self, elem: PointId) -> &[Vec<f64>] {
        self.points.get(&elem).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_points(&self, elem: PointId) -> bool {
        self.points.get(&elem).is_some_and(|p| !p.is_empty())
    }

    /// Elements with at least one point, in id order.
    pub fn elements(&self) -> Vec<PointId> {
        self.points
            .iter()
            .filter(|(_, p)| !p.is_empty())
            .map(|(&e, _)| e)
            .collect()
    }

    pub fn clear_points(&mut self) {
        self.points.clear();
    }

    /// Drop the old locator and rebuild it from the current coordinates.
    pub fn update_point_locator(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        self.locator = Some(PointLocator::build(mesh)?);
        Ok(())
    }

    pub fn point_locator(&self) -> Option<&PointLocator> {
        self.locator.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;

    fn pid(raw: u64) -> PointId {
        PointId::new(raw).unwrap()
    }

    #[test]
    fn locate_uses_current_coordinates() {
        let mut mesh = generation::line(2, 2.0).unwrap();
        let mut info = DiracKernelInfo::new();
        assert!(info.add_point_located(vec![0.5]).is_err());
        info.update_point_locator(&mesh).unwrap();
        assert_eq!(info.add_point_located(vec![1.5]).unwrap(), Some(pid(5)));

        // Stretch the mesh; a stale locator would still answer from [0, 2].
        mesh.node_mut(pid(3)).unwrap()[0] = 4.0;
        mesh.mesh_changed();
        info.update_point_locator(&mesh).unwrap();
        assert_eq!(info.point_locator().unwrap().mesh_revision(), mesh.revision());
        assert_eq!(info.add_point_located(vec![3.0]).unwrap(), Some(pid(5)));
        assert_eq!(info.add_point_located(vec![9.0]).unwrap(), None);
        assert_eq!(info.points(pid(5)).len(), 2);
    }

    #[test]
    fn clear_forgets_every_element() {
        let mut info = DiracKernelInfo::new();
        info.add_point(pid(4), vec![0.25]);
        assert!(info.has_points(pid(4)));
        assert_eq!(info.elements(), vec![pid(4)]);
        info.clear_points();
        assert!(info.elements().is_empty());
        assert!(info.points(pid(4)).is_empty());
    }
}
