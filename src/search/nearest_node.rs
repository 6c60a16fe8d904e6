//! Nearest-node pairing between two boundaries on a uniform grid.
//!
//! Primary boundary nodes are binned into cubic cells; each secondary node is
//! then answered by scanning rings of cells outward from its own cell until no
//! unscanned cell can hold anything closer than the best match so far.

use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::topology::{BoundaryId, PointId};
use std::collections::{BTreeMap, HashMap};

type CellKey = [i64; 3];

/// Closest primary node to one secondary node.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NearestNode {
    pub node: PointId,
    pub distance: f64,
}

/// Pairs every node on `secondary` with its nearest node on `primary`.
#[derive(Clone, Debug)]
pub struct NearestNodeLocator {
    primary: BoundaryId,
    secondary: BoundaryId,
    primary_nodes: Vec<PointId>,
    secondary_nodes: Vec<PointId>,
    inv_cell_size: f64,
    grid: HashMap<CellKey, Vec<(PointId, [f64; 3])>>,
    key_min: CellKey,
    key_max: CellKey,
    dim: usize,
    nearest: BTreeMap<PointId, NearestNode>,
}

fn padded(xyz: &[f64]) -> [f64; 3] {
    let mut p = [0.0; 3];
    for (dst, src) in p.iter_mut().zip(xyz) {
        *dst = *src;
    }
    p
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

impl NearestNodeLocator {
    pub fn new(primary: BoundaryId, secondary: BoundaryId) -> Self {
        Self {
            primary,
            secondary,
            primary_nodes: Vec::new(),
            secondary_nodes: Vec::new(),
            inv_cell_size: 1.0,
            grid: HashMap::new(),
            key_min: [0; 3],
            key_max: [0; 3],
            dim: 3,
            nearest: BTreeMap::new(),
        }
    }

    pub fn primary(&self) -> BoundaryId {
        self.primary
    }

    pub fn secondary(&self) -> BoundaryId {
        self.secondary
    }

    /// Re-collect both boundary node sets from `mesh`, then search.
    pub fn reinit(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        self.primary_nodes = mesh.boundary_nodes(self.primary).into_iter().collect();
        self.secondary_nodes = mesh.boundary_nodes(self.secondary).into_iter().collect();
        self.find_nodes(mesh)
    }

    /// Search again with the current coordinates of the cached node sets.
    pub fn find_nodes(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        self.dim = mesh.dimension().clamp(1, 3);
        self.build_grid(mesh)?;
        self.nearest.clear();
        for &node in &self.secondary_nodes {
            let p = padded(mesh.node(node)?);
            if let Some(hit) = self.query(&p) {
                self.nearest.insert(node, hit);
            }
        }
        log::trace!(
            "nearest-node {}->{}: {} of {} secondary nodes paired",
            self.secondary,
            self.primary,
            self.nearest.len(),
            self.secondary_nodes.len()
        );
        Ok(())
    }

    /// Match for `secondary_node`, if it lies on the secondary boundary.
    pub fn nearest_node(&self, secondary_node: PointId) -> Option<NearestNode> {
        self.nearest.get(&secondary_node).copied()
    }

    pub fn secondary_nodes(&self) -> &[PointId] {
        &self.secondary_nodes
    }

    fn build_grid(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        let points = self
            .primary_nodes
            .iter()
            .map(|&n| Ok((n, padded(mesh.node(n)?))))
            .collect::<Result<Vec<_>, CouplingError>>()?;
        self.grid.clear();
        if points.is_empty() {
            return Ok(());
        }
        let mut lo = [f64::INFINITY; 3];
        let mut hi = [f64::NEG_INFINITY; 3];
        for (_, p) in &points {
            for d in 0..3 {
                lo[d] = lo[d].min(p[d]);
                hi[d] = hi[d].max(p[d]);
            }
        }
        let extent = (0..3).map(|d| hi[d] - lo[d]).fold(0.0, f64::max);
        let cell_size = if extent > 0.0 {
            extent / (points.len() as f64).sqrt().max(1.0)
        } else {
            1.0
        };
        self.inv_cell_size = 1.0 / cell_size;
        self.key_min = [i64::MAX; 3];
        self.key_max = [i64::MIN; 3];
        for (node, p) in points {
            let key = self.cell_key(&p);
            for d in 0..3 {
                self.key_min[d] = self.key_min[d].min(key[d]);
                self.key_max[d] = self.key_max[d].max(key[d]);
            }
            self.grid.entry(key).or_default().push((node, p));
        }
        Ok(())
    }

    fn cell_key(&self, p: &[f64; 3]) -> CellKey {
        let mut key = [0; 3];
        for d in 0..3 {
            key[d] = (p[d] * self.inv_cell_size).floor() as i64;
        }
        key
    }

    fn query(&self, p: &[f64; 3]) -> Option<NearestNode> {
        if self.grid.is_empty() {
            return None;
        }
        let center = self.cell_key(p);
        let max_ring = (0..self.dim)
            .map(|d| {
                (center[d] - self.key_min[d])
                    .abs()
                    .max((center[d] - self.key_max[d]).abs())
            })
            .max()
            .unwrap_or(0);
        let cell_size = 1.0 / self.inv_cell_size;
        let mut best: Option<NearestNode> = None;
        for ring in 0..=max_ring {
            // Cells in ring `r` are at least `r - 1` cell widths away.
            if best.is_some_and(|b| b.distance <= ring as f64 * cell_size - cell_size) {
                break;
            }
            for offset in self.ring_offsets(ring) {
                let key = [center[0] + offset[0], center[1] + offset[1], center[2] + offset[2]];
                let Some(bucket) = self.grid.get(&key) else {
                    continue;
                };
                for (node, q) in bucket {
                    let dist = distance(p, q);
                    let closer = best.is_none_or(|b| {
                        dist < b.distance || (dist == b.distance && *node < b.node)
                    });
                    if closer {
                        best = Some(NearestNode {
                            node: *node,
                            distance: dist,
                        });
                    }
                }
            }
        }
        best
    }

    /// Cell offsets on the shell of Chebyshev radius `ring`. Axes beyond the
    /// mesh dimension stay at zero.
    fn ring_offsets(&self, ring: i64) -> impl Iterator<Item = CellKey> + '_ {
        let span = move |d: usize| if d < self.dim { ring } else { 0 };
        (-span(0)..=span(0)).flat_map(move |dx| {
            (-span(1)..=span(1)).flat_map(move |dy| {
                (-span(2)..=span(2))
                    .map(move |dz| [dx, dy, dz])
                    .filter(move |o| o.iter().map(|c| c.abs()).max() == Some(ring))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation::{self, StructuredCellType};

    #[test]
    fn pairs_opposite_edges_of_a_rectangle() {
        // bottom (0) nodes 1..=4, top (2) nodes 9..=12 on a 3x2 grid
        let mesh = generation::rectangle(3, 2, 3.0, 2.0, StructuredCellType::Quadrilateral).unwrap();
        let mut loc = NearestNodeLocator::new(0, 2);
        loc.reinit(&mesh).unwrap();
        assert_eq!(loc.secondary_nodes().len(), 4);
        let hit = loc.nearest_node(PointId::new(10).unwrap()).unwrap();
        assert_eq!(hit.node, PointId::new(2).unwrap());
        assert!((hit.distance - 2.0).abs() < 1e-12);
    }

    #[test]
    fn find_nodes_tracks_moved_coordinates() {
        let mut mesh = generation::rectangle(3, 1, 3.0, 1.0, StructuredCellType::Quadrilateral).unwrap();
        let mut loc = NearestNodeLocator::new(0, 2);
        loc.reinit(&mesh).unwrap();
        let top_left = PointId::new(5).unwrap();
        assert_eq!(loc.nearest_node(top_left).unwrap().node, PointId::new(1).unwrap());
        mesh.node_mut(top_left).unwrap()[0] = 2.9;
        loc.find_nodes(&mesh).unwrap();
        assert_eq!(loc.nearest_node(top_left).unwrap().node, PointId::new(4).unwrap());
    }

    #[test]
    fn ring_scan_is_limited_to_the_mesh_dimension() {
        let mesh = generation::rectangle(3, 2, 3.0, 2.0, StructuredCellType::Quadrilateral).unwrap();
        let mut loc = NearestNodeLocator::new(0, 2);
        loc.reinit(&mesh).unwrap();
        assert_eq!(loc.ring_offsets(0).count(), 1);
        assert_eq!(loc.ring_offsets(1).count(), 8);
        assert_eq!(loc.ring_offsets(2).count(), 16);
        assert!(loc.ring_offsets(2).all(|o| o[2] == 0));
    }

    #[test]
    fn pairs_the_ends_of_a_line() {
        // left (0) is node 1 at x = 0, right (1) is node 4 at x = 3
        let mesh = generation::line(3, 3.0).unwrap();
        let mut loc = NearestNodeLocator::new(0, 1);
        loc.reinit(&mesh).unwrap();
        assert_eq!(loc.ring_offsets(1).count(), 2);
        let hit = loc.nearest_node(PointId::new(4).unwrap()).unwrap();
        assert_eq!(hit.node, PointId::new(1).unwrap());
        assert!((hit.distance - 3.0).abs() < 1e-12);
    }
}
