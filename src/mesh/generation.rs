//! Basic generators for structured lines and rectangles.
//!
//! Nodes are numbered first (ids `1..=n_nodes`), elements follow. Boundary
//! ids follow the usual convention: a line has `0` (left) and `1` (right);
//! a rectangle has `0` bottom, `1` right, `2` top, `3` left.

use super::Mesh;
use crate::coupling_error::CouplingError;
use crate::topology::{CellType, PointId};

/// Cell-type choices for structured rectangles.
#[derive(Clone, Copy, Debug)]
pub enum StructuredCellType {
    Triangle,
    Quadrilateral,
}

fn invalid_geometry(message: impl Into<String>) -> CouplingError {
    CouplingError::InvalidGeometry(message.into())
}

/// `n_elems` equal segments covering `[0, length]`.
pub fn line(n_elems: usize, length: f64) -> Result<Mesh, CouplingError> {
    if n_elems == 0 || length <= 0.0 {
        return Err(invalid_geometry("line needs at least one element and positive length"));
    }
    let mut mesh = Mesh::new(1)?;
    let h = length / n_elems as f64;
    for i in 0..=n_elems {
        mesh.add_node(PointId::new(i as u64 + 1)?, &[i as f64 * h])?;
    }
    let first_elem = n_elems as u64 + 2;
    for i in 0..n_elems {
        let nodes = vec![PointId::new(i as u64 + 1)?, PointId::new(i as u64 + 2)?];
        mesh.add_element(PointId::new(first_elem + i as u64)?, CellType::Segment, nodes, 0)?;
    }
    mesh.find_neighbors();
    mesh.add_boundary_side(PointId::new(first_elem)?, 0, 0)?;
    mesh.add_boundary_side(PointId::new(first_elem + n_elems as u64 - 1)?, 1, 1)?;
    Ok(mesh)
}

/// `nx * ny` cells covering `[0, lx] x [0, ly]`.
///
/// Triangles split every quad along its rising diagonal.
pub fn rectangle(
    nx: usize,
    ny: usize,
    lx: f64,
    ly: f64,
    cell: StructuredCellType,
) -> Result<Mesh, CouplingError> {
    if nx == 0 || ny == 0 || lx <= 0.0 || ly <= 0.0 {
        return Err(invalid_geometry("rectangle needs positive cell counts and extents"));
    }
    let mut mesh = Mesh::new(2)?;
    let node = |i: usize, j: usize| PointId::new((j * (nx + 1) + i) as u64 + 1);
    for j in 0..=ny {
        for i in 0..=nx {
            let xy = [i as f64 * lx / nx as f64, j as f64 * ly / ny as f64];
            mesh.add_node(node(i, j)?, &xy)?;
        }
    }

    let mut next_elem = ((nx + 1) * (ny + 1)) as u64 + 1;
    let mut boundary = Vec::new();
    for j in 0..ny {
        for i in 0..nx {
            let (a, b, c, d) = (node(i, j)?, node(i + 1, j)?, node(i + 1, j + 1)?, node(i, j + 1)?);
            match cell {
                StructuredCellType::Quadrilateral => {
                    let id = PointId::new(next_elem)?;
                    next_elem += 1;
                    mesh.add_element(id, CellType::Quadrilateral, vec![a, b, c, d], 0)?;
                    if j == 0 {
                        boundary.push((id, 0, 0));
                    }
                    if i + 1 == nx {
                        boundary.push((id, 1, 1));
                    }
                    if j + 1 == ny {
                        boundary.push((id, 2, 2));
                    }
                    if i == 0 {
                        boundary.push((id, 3, 3));
                    }
                }
                StructuredCellType::Triangle => {
                    let lower = PointId::new(next_elem)?;
                    let upper = PointId::new(next_elem + 1)?;
                    next_elem += 2;
                    // lower: a-b-c, sides (a,b) (b,c) (c,a); upper: a-c-d, sides (a,c) (c,d) (d,a)
                    mesh.add_element(lower, CellType::Triangle, vec![a, b, c], 0)?;
                    mesh.add_element(upper, CellType::Triangle, vec![a, c, d], 0)?;
                    if j == 0 {
                        boundary.push((lower, 0, 0));
                    }
                    if i + 1 == nx {
                        boundary.push((lower, 1, 1));
                    }
                    if j + 1 == ny {
                        boundary.push((upper, 1, 2));
                    }
                    if i == 0 {
                        boundary.push((upper, 2, 3));
                    }
                }
            }
        }
    }
    mesh.find_neighbors();
    for (elem, side, bid) in boundary {
        mesh.add_boundary_side(elem, side, bid)?;
    }
    Ok(mesh)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_has_expected_counts_and_boundaries() {
        let mesh = line(2, 2.0).unwrap();
        assert_eq!(mesh.n_nodes(), 3);
        assert_eq!(mesh.n_elements(), 2);
        assert_eq!(mesh.node(PointId::new(3).unwrap()).unwrap(), &[2.0]);
        assert_eq!(
            mesh.boundary_nodes(1).into_iter().collect::<Vec<_>>(),
            vec![PointId::new(3).unwrap()]
        );
    }

    #[test]
    fn quad_rectangle_interior_sides_have_neighbors() {
        let mesh = rectangle(2, 2, 1.0, 1.0, StructuredCellType::Quadrilateral).unwrap();
        assert_eq!(mesh.n_nodes(), 9);
        assert_eq!(mesh.n_elements(), 4);
        let first = PointId::new(10).unwrap();
        assert_eq!(mesh.neighbor(first, 1).unwrap(), PointId::new(11).unwrap());
        assert_eq!(mesh.boundary_nodes(0).len(), 3);
    }

    #[test]
    fn triangle_rectangle_pairs_diagonals() {
        let mesh = rectangle(1, 1, 1.0, 1.0, StructuredCellType::Triangle).unwrap();
        let lower = PointId::new(5).unwrap();
        let upper = PointId::new(6).unwrap();
        assert_eq!(mesh.neighbor(lower, 2).unwrap(), upper);
        assert_eq!(mesh.which_neighbor_am_i(upper, lower), Some(0));
    }
}
