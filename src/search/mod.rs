//! Geometric search on the displaced mesh.
//!
//! The displaced problem treats search as an opaque service: it calls
//! [`GeometricSearch::update`] after every displacement and
//! [`GeometricSearch::reinit`] after every topology change.
//! [`GeometricSearchData`] is the stock implementation, a set of nearest-node
//! locators keyed by boundary pair.

pub mod dirac;
pub mod nearest_node;

pub use dirac::{DiracKernelInfo, PointLocator};
pub use nearest_node::{NearestNode, NearestNodeLocator};

use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::topology::BoundaryId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Which search structures an update should refresh.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchKind {
    #[default]
    All,
    NearestNode,
}

/// Proximity structures keyed on current node coordinates.
pub trait GeometricSearch: Debug + Send + Sync {
    /// Refresh against moved coordinates, keeping cached node sets.
    fn update(&mut self, mesh: &Mesh, kind: SearchKind) -> Result<(), CouplingError>;

    /// Rebuild from scratch after the topology changed.
    fn reinit(&mut self, mesh: &Mesh) -> Result<(), CouplingError>;
}

/// Nearest-node locators for every registered boundary pair.
#[derive(Clone, Debug, Default)]
pub struct GeometricSearchData {
    nearest_node: BTreeMap<(BoundaryId, BoundaryId), NearestNodeLocator>,
    n_updates: usize,
    n_reinits: usize,
}

impl GeometricSearchData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator pairing `secondary` nodes with `primary` nodes, created on
    /// first request and searched against `mesh` right away.
    pub fn nearest_node_locator(
        &mut self,
        mesh: &Mesh,
        primary: BoundaryId,
        secondary: BoundaryId,
    ) -> Result<&NearestNodeLocator, CouplingError> {
        let locator = match self.nearest_node.entry((primary, secondary)) {
            std::collections::btree_map::Entry::Occupied(e) => e.into_mut(),
            std::collections::btree_map::Entry::Vacant(e) => {
                let locator = e.insert(NearestNodeLocator::new(primary, secondary));
                locator.reinit(mesh)?;
                locator
            }
        };
        Ok(locator)
    }

    /// Already-built locator for the pair, if any.
    pub fn get_nearest_node_locator(
        &self,
        primary: BoundaryId,
        secondary: BoundaryId,
    ) -> Option<&NearestNodeLocator> {
        self.nearest_node.get(&(primary, secondary))
    }

    pub fn n_updates(&self) -> usize {
        self.n_updates
    }

    pub fn n_reinits(&self) -> usize {
        self.n_reinits
    }
}

impl GeometricSearch for GeometricSearchData {
    fn update(&mut self, mesh: &Mesh, kind: SearchKind) -> Result<(), CouplingError> {
        match kind {
            SearchKind::All | SearchKind::NearestNode => {
                for locator in self.nearest_node.values_mut() {
                    locator.find_nodes(mesh)?;
                }
            }
        }
        self.n_updates += 1;
        Ok(())
    }

    fn reinit(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        for locator in self.nearest_node.values_mut() {
            locator.reinit(mesh)?;
        }
        self.n_reinits += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;
    use crate::topology::PointId;

    #[test]
    fn update_refreshes_every_locator() {
        let mut mesh = generation::line(2, 2.0).unwrap();
        let mut search = GeometricSearchData::new();
        let right = PointId::new(3).unwrap();
        let hit = search.nearest_node_locator(&mesh, 0, 1).unwrap().nearest_node(right);
        assert!((hit.unwrap().distance - 2.0).abs() < 1e-12);

        mesh.node_mut(right).unwrap()[0] = 5.0;
        search.update(&mesh, SearchKind::All).unwrap();
        let hit = search.get_nearest_node_locator(0, 1).unwrap().nearest_node(right);
        assert!((hit.unwrap().distance - 5.0).abs() < 1e-12);
        assert_eq!((search.n_updates(), search.n_reinits()), (1, 0));
    }
}
