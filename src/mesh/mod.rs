//! Unstructured mesh: node coordinates plus element connectivity.
//!
//! Two live instances exist per displaced problem: the reference mesh owned by
//! the reference problem and a displaced copy whose coordinates follow the
//! displacement field. Both share ids, connectivity, subdomains, and boundary
//! sides; [`Mesh::topology_eq`] checks exactly that.
//!
//! Parallel distribution is modelled by [`NodeDistribution`]. The predicates
//! and repairs mirror the collective calls of a distributed mesh: they must be
//! issued in the same order on every process.

pub mod generation;

use crate::coupling_error::CouplingError;
use crate::data::coordinates::Coordinates;
use crate::debug_invariants::DebugInvariants;
use crate::topology::{BoundaryId, CellType, PointId, SubdomainId};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// One mesh element.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Element {
    /// Shape of the element.
    pub cell_type: CellType,
    /// Connectivity in local node order.
    pub nodes: Vec<PointId>,
    /// Subdomain (block) the element belongs to.
    pub subdomain: SubdomainId,
    /// Neighbor across each side, `None` on the boundary.
    pub neighbors: Vec<Option<PointId>>,
}

impl Element {
    /// Global node ids on side `side`.
    pub fn side_nodes(&self, side: usize) -> Option<Vec<PointId>> {
        let local = self.cell_type.side_nodes(side)?;
        Some(local.into_iter().map(|i| self.nodes[i]).collect())
    }
}

/// How the mesh's nodes are spread over processes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum NodeDistribution {
    /// Every process holds every node.
    #[default]
    Replicated,
    /// Process zero holds every node, the others only their own.
    GatheredOnZero,
    /// Each process holds its partition plus ghosts.
    Distributed,
}

/// Node coordinates plus element connectivity.
#[derive(Clone, Debug)]
pub struct Mesh {
    coordinates: Coordinates,
    elements: BTreeMap<PointId, Element>,
    boundary_sides: BTreeMap<(PointId, usize), BTreeSet<BoundaryId>>,
    distribution: NodeDistribution,
    revision: u64,
}

impl Mesh {
    /// Empty mesh embedded in `dimension` spatial dimensions.
    pub fn new(dimension: usize) -> Result<Self, CouplingError> {
        Ok(Self {
            coordinates: Coordinates::new(dimension)?,
            elements: BTreeMap::new(),
            boundary_sides: BTreeMap::new(),
            distribution: NodeDistribution::Replicated,
            revision: 0,
        })
    }

    /// Spatial dimension.
    #[inline]
    pub fn dimension(&self) -> usize {
        self.coordinates.dimension()
    }

    /// Append a node at `xyz`.
    pub fn add_node(&mut self, id: PointId, xyz: &[f64]) -> Result<(), CouplingError> {
        if self.elements.contains_key(&id) {
            return Err(CouplingError::DuplicatePoint(id));
        }
        self.coordinates.try_add_point(id, xyz)
    }

    /// Add an element; neighbors are filled in by [`Mesh::find_neighbors`].
    pub fn add_element(
        &mut self,
        id: PointId,
        cell_type: CellType,
        nodes: Vec<PointId>,
        subdomain: SubdomainId,
    ) -> Result<(), CouplingError> {
        if self.elements.contains_key(&id) || self.coordinates.contains(id) {
            return Err(CouplingError::DuplicatePoint(id));
        }
        if nodes.len() != cell_type.num_nodes() {
            return Err(CouplingError::InvalidGeometry(format!(
                "{cell_type:?} element {id} needs {} nodes, got {}",
                cell_type.num_nodes(),
                nodes.len()
            )));
        }
        if cell_type.dimension() > self.dimension() {
            return Err(CouplingError::InvalidGeometry(format!(
                "{cell_type:?} element {id} does not fit a {}-dimensional mesh",
                self.dimension()
            )));
        }
        if let Some(&missing) = nodes.iter().find(|n| !self.coordinates.contains(**n)) {
            return Err(CouplingError::MissingPoint(missing));
        }
        self.elements.insert(
            id,
            Element {
                cell_type,
                nodes,
                subdomain,
                neighbors: vec![None; cell_type.num_sides()],
            },
        );
        Ok(())
    }

    /// Tag side `side` of `elem` with boundary `bid`.
    pub fn add_boundary_side(
        &mut self,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
    ) -> Result<(), CouplingError> {
        let e = self.elem(elem)?;
        if side >= e.cell_type.num_sides() {
            return Err(CouplingError::MissingNeighbor { elem, side });
        }
        self.boundary_sides.entry((elem, side)).or_default().insert(bid);
        Ok(())
    }

    /// Recompute side neighbors by matching side node sets.
    pub fn find_neighbors(&mut self) {
        let mut by_side: HashMap<Vec<PointId>, Vec<(PointId, usize)>> = HashMap::new();
        for (&id, e) in &self.elements {
            for side in 0..e.cell_type.num_sides() {
                if let Some(mut key) = e.side_nodes(side) {
                    key.sort_unstable();
                    by_side.entry(key).or_default().push((id, side));
                }
            }
        }
        for e in self.elements.values_mut() {
            e.neighbors.iter_mut().for_each(|n| *n = None);
        }
        for owners in by_side.values() {
            if let [(a, sa), (b, sb)] = owners.as_slice() {
                if let Some(e) = self.elements.get_mut(a) {
                    e.neighbors[*sa] = Some(*b);
                }
                if let Some(e) = self.elements.get_mut(b) {
                    e.neighbors[*sb] = Some(*a);
                }
            }
        }
    }

    /// Element lookup.
    pub fn elem(&self, id: PointId) -> Result<&Element, CouplingError> {
        self.elements.get(&id).ok_or(CouplingError::MissingPoint(id))
    }

    /// Elements in id order.
    pub fn elements(&self) -> impl Iterator<Item = (PointId, &Element)> {
        self.elements.iter().map(|(&id, e)| (id, e))
    }

    /// Number of elements.
    pub fn n_elements(&self) -> usize {
        self.elements.len()
    }

    /// Nodes in storage order.
    pub fn node_ids(&self) -> &[PointId] {
        self.coordinates.points()
    }

    /// Number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.coordinates.len()
    }

    /// Whether `id` is a node of this mesh.
    pub fn has_node(&self, id: PointId) -> bool {
        self.coordinates.contains(id)
    }

    /// Coordinates of node `id`.
    pub fn node(&self, id: PointId) -> Result<&[f64], CouplingError> {
        self.coordinates.try_restrict(id)
    }

    /// Mutable coordinates of node `id`.
    pub fn node_mut(&mut self, id: PointId) -> Result<&mut [f64], CouplingError> {
        self.coordinates.try_restrict_mut(id)
    }

    /// Coordinate store.
    pub fn coordinates(&self) -> &Coordinates {
        &self.coordinates
    }

    /// Mutable coordinate store.
    pub fn coordinates_mut(&mut self) -> &mut Coordinates {
        &mut self.coordinates
    }

    /// Node coordinates of `elem` in local node order.
    pub fn element_coordinates(&self, elem: PointId) -> Result<Vec<Vec<f64>>, CouplingError> {
        self.elem(elem)?
            .nodes
            .iter()
            .map(|&n| self.node(n).map(<[f64]>::to_vec))
            .collect()
    }

    /// Neighbor of `elem` across `side`.
    pub fn neighbor(&self, elem: PointId, side: usize) -> Result<PointId, CouplingError> {
        self.elem(elem)?
            .neighbors
            .get(side)
            .copied()
            .flatten()
            .ok_or(CouplingError::MissingNeighbor { elem, side })
    }

    /// Side of `neighbor` that faces `elem`.
    pub fn which_neighbor_am_i(&self, neighbor: PointId, elem: PointId) -> Option<usize> {
        self.elements
            .get(&neighbor)?
            .neighbors
            .iter()
            .position(|n| *n == Some(elem))
    }

    /// Boundary ids attached to `(elem, side)`.
    pub fn boundary_ids(&self, elem: PointId, side: usize) -> Vec<BoundaryId> {
        self.boundary_sides
            .get(&(elem, side))
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Every node lying on a side tagged `bid`.
    pub fn boundary_nodes(&self, bid: BoundaryId) -> BTreeSet<PointId> {
        let mut out = BTreeSet::new();
        for (&(elem, side), ids) in &self.boundary_sides {
            if !ids.contains(&bid) {
                continue;
            }
            if let Some(nodes) = self.elements.get(&elem).and_then(|e| e.side_nodes(side)) {
                out.extend(nodes);
            }
        }
        out
    }

    /// All boundary ids in use.
    pub fn boundary_id_set(&self) -> BTreeSet<BoundaryId> {
        self.boundary_sides.values().flatten().copied().collect()
    }

    /// Subdomains touching each node.
    pub fn node_subdomains(&self) -> HashMap<PointId, BTreeSet<SubdomainId>> {
        let mut out: HashMap<PointId, BTreeSet<SubdomainId>> = HashMap::new();
        for e in self.elements.values() {
            for &n in &e.nodes {
                out.entry(n).or_default().insert(e.subdomain);
            }
        }
        out
    }

    /// Current parallel distribution.
    pub fn distribution(&self) -> NodeDistribution {
        self.distribution
    }

    /// Mark the parallel distribution, e.g. after an external partitioner ran.
    pub fn set_distribution(&mut self, distribution: NodeDistribution) {
        self.distribution = distribution;
    }

    /// Every process holds every node.
    pub fn is_serial(&self) -> bool {
        self.distribution == NodeDistribution::Replicated
    }

    /// Process zero holds every node.
    pub fn is_serial_on_zero(&self) -> bool {
        matches!(
            self.distribution,
            NodeDistribution::Replicated | NodeDistribution::GatheredOnZero
        )
    }

    /// Collective: replicate every node on every process.
    pub fn allgather(&mut self) {
        self.distribution = NodeDistribution::Replicated;
    }

    /// Collective: gather every node onto process zero.
    pub fn gather_to_zero(&mut self) {
        if self.distribution == NodeDistribution::Distributed {
            self.distribution = NodeDistribution::GatheredOnZero;
        }
    }

    /// Notify the mesh that its structure (or the systems built on it) changed.
    pub fn mesh_changed(&mut self) {
        self.revision = self.revision.wrapping_add(1);
        self.debug_assert_invariants();
    }

    /// Number of structural-change notifications received.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Same ids, connectivity, subdomains, neighbors, and boundary sides.
    ///
    /// Coordinates and distribution are ignored.
    pub fn topology_eq(&self, other: &Mesh) -> bool {
        self.dimension() == other.dimension()
            && self.node_ids() == other.node_ids()
            && self.elements == other.elements
            && self.boundary_sides == other.boundary_sides
    }
}

impl DebugInvariants for Mesh {
    const KIND: &'static str = "mesh";

    fn validate_invariants(&self) -> Result<(), CouplingError> {
        for (&id, e) in &self.elements {
            if let Some(&n) = e.nodes.iter().find(|n| !self.coordinates.contains(**n)) {
                return Err(CouplingError::MissingPoint(n));
            }
            for (side, nb) in e.neighbors.iter().enumerate() {
                if let Some(nb) = nb {
                    if self.which_neighbor_am_i(*nb, id).is_none() {
                        return Err(CouplingError::MissingNeighbor { elem: id, side });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pid(raw: u64) -> PointId {
        PointId::new(raw).unwrap()
    }

    fn two_segments() -> Mesh {
        let mut mesh = Mesh::new(1).unwrap();
        for (i, x) in [0.0, 1.0, 2.0].into_iter().enumerate() {
            mesh.add_node(pid(i as u64 + 1), &[x]).unwrap();
        }
        mesh.add_element(pid(10), CellType::Segment, vec![pid(1), pid(2)], 0)
            .unwrap();
        mesh.add_element(pid(11), CellType::Segment, vec![pid(2), pid(3)], 1)
            .unwrap();
        mesh.find_neighbors();
        mesh
    }

    #[test]
    fn neighbors_are_symmetric() {
        let mesh = two_segments();
        assert_eq!(mesh.neighbor(pid(10), 1).unwrap(), pid(11));
        assert_eq!(mesh.which_neighbor_am_i(pid(11), pid(10)), Some(0));
        assert!(mesh.neighbor(pid(10), 0).is_err());
    }

    #[test]
    fn clone_keeps_topology_but_not_coordinates() {
        let mesh = two_segments();
        let mut copy = mesh.clone();
        copy.node_mut(pid(2)).unwrap()[0] = 5.0;
        assert!(mesh.topology_eq(&copy));
        assert_ne!(mesh.node(pid(2)).unwrap(), copy.node(pid(2)).unwrap());
    }

    #[test]
    fn distribution_repairs() {
        let mut mesh = two_segments();
        mesh.set_distribution(NodeDistribution::Distributed);
        assert!(!mesh.is_serial_on_zero());
        mesh.gather_to_zero();
        assert!(mesh.is_serial_on_zero() && !mesh.is_serial());
        mesh.allgather();
        assert!(mesh.is_serial());
    }

    #[test]
    fn element_with_unknown_node_is_rejected() {
        let mut mesh = two_segments();
        let err = mesh
            .add_element(pid(12), CellType::Segment, vec![pid(3), pid(4)], 0)
            .unwrap_err();
        assert_eq!(err, CouplingError::MissingPoint(pid(4)));
    }
}
