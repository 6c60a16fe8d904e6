//! Cell type metadata for mesh elements.

use serde::{Deserialize, Serialize};

/// Element shapes supported by the reinit machinery.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum CellType {
    /// 1D two-node segment.
    Segment,
    /// 2D three-node simplex.
    Triangle,
    /// 2D four-node tensor-product cell, counter-clockwise node order.
    Quadrilateral,
}

impl CellType {
    /// Topological dimension of the cell.
    pub fn dimension(self) -> usize {
        match self {
            CellType::Segment => 1,
            CellType::Triangle | CellType::Quadrilateral => 2,
        }
    }

    /// Number of vertices (and linear Lagrange nodes).
    pub fn num_nodes(self) -> usize {
        match self {
            CellType::Segment => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral => 4,
        }
    }

    /// Number of sides (faces of codimension one).
    pub fn num_sides(self) -> usize {
        match self {
            CellType::Segment => 2,
            CellType::Triangle => 3,
            CellType::Quadrilateral => 4,
        }
    }

    /// Local node indices bounding side `side`, in the element's orientation.
    ///
    /// Segment sides are its end points; 2D sides are edges `(i, i+1)`.
    pub fn side_nodes(self, side: usize) -> Option<Vec<usize>> {
        if side >= self.num_sides() {
            return None;
        }
        Some(match self {
            CellType::Segment => vec![side],
            CellType::Triangle | CellType::Quadrilateral => {
                vec![side, (side + 1) % self.num_nodes()]
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quad_sides_wrap_around() {
        assert_eq!(CellType::Quadrilateral.side_nodes(3), Some(vec![3, 0]));
        assert_eq!(CellType::Quadrilateral.side_nodes(4), None);
    }

    #[test]
    fn segment_sides_are_end_points() {
        assert_eq!(CellType::Segment.side_nodes(0), Some(vec![0]));
        assert_eq!(CellType::Segment.side_nodes(1), Some(vec![1]));
    }
}
