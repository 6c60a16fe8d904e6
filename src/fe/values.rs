//! Shape-function values on a physical element.
//!
//! [`FeValues`] is what an assembly context recomputes on every reinit: the
//! evaluation points in physical space, their integration weights, and the
//! basis values and physical gradients there.

use super::basis::Basis;
use super::quadrature::{QuadratureRule, side_to_reference};
use crate::coupling_error::CouplingError;
use crate::topology::CellType;

const NEWTON_TOL: f64 = 1e-12;
const NEWTON_MAX_ITERS: usize = 25;

/// Tabulation data on a physical element, volume or side.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FeValues {
    /// Evaluation points in reference space.
    pub reference_points: Vec<Vec<f64>>,
    /// Evaluation points in physical space.
    pub q_points: Vec<Vec<f64>>,
    /// Integration weight times Jacobian measure per point.
    pub jxw: Vec<f64>,
    /// Basis values per point: `[qp][basis]`.
    pub phi: Vec<Vec<f64>>,
    /// Basis gradients in physical coordinates: `[qp][basis][dim]`.
    pub grad_phi: Vec<Vec<Vec<f64>>>,
    /// Outward unit normals, populated for side evaluations only.
    pub normals: Vec<Vec<f64>>,
}

impl FeValues {
    /// Number of evaluation points.
    pub fn n_points(&self) -> usize {
        self.q_points.len()
    }

    /// Number of shape functions.
    pub fn n_shapes(&self) -> usize {
        self.phi.first().map(Vec::len).unwrap_or(0)
    }

    /// Volume evaluation at the points of `rule`.
    pub fn volume(
        cell_type: CellType,
        rule: &QuadratureRule,
        node_coords: &[Vec<f64>],
    ) -> Result<Self, CouplingError> {
        let mut values = Self::at_reference(cell_type, &rule.points, node_coords)?;
        for (jxw, w) in values.jxw.iter_mut().zip(&rule.weights) {
            *jxw *= w;
        }
        Ok(values)
    }

    /// Side evaluation on side `side` using the side-local `rule`.
    pub fn side(
        cell_type: CellType,
        side: usize,
        rule: &QuadratureRule,
        node_coords: &[Vec<f64>],
    ) -> Result<Self, CouplingError> {
        let local = cell_type.side_nodes(side).ok_or_else(|| {
            CouplingError::InvalidGeometry(format!("{cell_type:?} has no side {side}"))
        })?;
        let ref_points: Vec<Vec<f64>> = rule
            .points
            .iter()
            .map(|p| side_to_reference(cell_type, side, p))
            .collect();
        let mut values = Self::at_reference(cell_type, &ref_points, node_coords)?;

        let (measure, normal) = match cell_type {
            CellType::Segment => {
                let x0 = node_coords[0][0];
                let x1 = node_coords[1][0];
                let outward = if side == 0 { x0 - x1 } else { x1 - x0 };
                (1.0, vec![outward.signum()])
            }
            CellType::Triangle | CellType::Quadrilateral => {
                let a = &node_coords[local[0]];
                let b = &node_coords[local[1]];
                let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
                let len = (dx * dx + dy * dy).sqrt();
                if len < f64::EPSILON {
                    return Err(CouplingError::InvalidGeometry(format!(
                        "degenerate side {side} on {cell_type:?}"
                    )));
                }
                // Reference side length is 2, so the line Jacobian is len / 2.
                (0.5 * len, vec![dy / len, -dx / len])
            }
        };
        for (jxw, w) in values.jxw.iter_mut().zip(&rule.weights) {
            *jxw = w * measure;
        }
        values.normals = vec![normal; values.n_points()];
        Ok(values)
    }

    /// Evaluation at caller-supplied physical points.
    ///
    /// The stored `q_points` are exactly `physical_points` (not the
    /// forward-mapped inverse images) and every weight is one.
    pub fn at_physical(
        cell_type: CellType,
        physical_points: &[Vec<f64>],
        node_coords: &[Vec<f64>],
    ) -> Result<Self, CouplingError> {
        let basis = Basis::for_cell(cell_type);
        let ref_points = physical_points
            .iter()
            .map(|p| inverse_map(basis, node_coords, p))
            .collect::<Result<Vec<_>, _>>()?;
        let mut values = Self::at_reference(cell_type, &ref_points, node_coords)?;
        values.q_points = physical_points.to_vec();
        values.jxw = vec![1.0; physical_points.len()];
        Ok(values)
    }

    /// Values at a single node of the element (`phi` is the Kronecker delta).
    pub fn at_node(xyz: &[f64]) -> Self {
        Self {
            reference_points: vec![Vec::new()],
            q_points: vec![xyz.to_vec()],
            jxw: vec![1.0],
            phi: vec![vec![1.0]],
            grad_phi: vec![vec![vec![0.0; xyz.len()]]],
            normals: Vec::new(),
        }
    }

    fn at_reference(
        cell_type: CellType,
        ref_points: &[Vec<f64>],
        node_coords: &[Vec<f64>],
    ) -> Result<Self, CouplingError> {
        let basis = Basis::for_cell(cell_type);
        let dim = check_coords(basis, node_coords)?;
        let tab = basis.tabulate(ref_points)?;
        let mut out = FeValues {
            reference_points: ref_points.to_vec(),
            ..Default::default()
        };
        for (values, ref_grads) in tab.values.into_iter().zip(tab.gradients) {
            let jac = build_jacobian(dim, node_coords, &ref_grads);
            let (det, inv) = invert_jacobian(dim, &jac)?;
            let grads = ref_grads
                .iter()
                .map(|g| {
                    (0..dim)
                        .map(|p| (0..dim).map(|r| inv[r * dim + p] * g[r]).sum())
                        .collect()
                })
                .collect();
            out.q_points.push(map_point(dim, node_coords, &values));
            out.jxw.push(det.abs());
            out.phi.push(values);
            out.grad_phi.push(grads);
        }
        Ok(out)
    }
}

/// Reference coordinates of `physical` inside the element spanned by `node_coords`.
///
/// Newton iteration on the isoparametric map; exact in one step for affine
/// elements.
pub fn inverse_map(
    basis: Basis,
    node_coords: &[Vec<f64>],
    physical: &[f64],
) -> Result<Vec<f64>, CouplingError> {
    let dim = check_coords(basis, node_coords)?;
    if physical.len() != dim {
        return Err(CouplingError::InvalidGeometry(format!(
            "point has dimension {}, element lives in {dim}D",
            physical.len()
        )));
    }
    let mut xi = basis.reference_centroid();
    for _ in 0..NEWTON_MAX_ITERS {
        let tab = basis.tabulate(std::slice::from_ref(&xi))?;
        let x = map_point(dim, node_coords, &tab.values[0]);
        let residual: Vec<f64> = physical.iter().zip(&x).map(|(p, x)| p - x).collect();
        let jac = build_jacobian(dim, node_coords, &tab.gradients[0]);
        let (_, inv) = invert_jacobian(dim, &jac)?;
        let mut step_norm = 0.0;
        for r in 0..dim {
            let dxi: f64 = (0..dim).map(|p| inv[r * dim + p] * residual[p]).sum();
            xi[r] += dxi;
            step_norm += dxi * dxi;
        }
        if step_norm.sqrt() < NEWTON_TOL {
            break;
        }
    }
    Ok(xi)
}

/// Whether `physical` lies inside the element, up to `tol` in reference space.
pub fn contains_point(
    cell_type: CellType,
    node_coords: &[Vec<f64>],
    physical: &[f64],
    tol: f64,
) -> bool {
    let basis = Basis::for_cell(cell_type);
    inverse_map(basis, node_coords, physical)
        .map(|xi| basis.contains_reference(&xi, tol))
        .unwrap_or(false)
}

fn check_coords(basis: Basis, node_coords: &[Vec<f64>]) -> Result<usize, CouplingError> {
    let num_nodes = basis.num_nodes();
    if node_coords.len() != num_nodes {
        return Err(CouplingError::InvalidGeometry(format!(
            "expected {num_nodes} node coordinates, found {}",
            node_coords.len()
        )));
    }
    let dim = basis.dimension();
    if node_coords.iter().any(|c| c.len() != dim) {
        return Err(CouplingError::InvalidGeometry(format!(
            "{basis:?} needs {dim}D node coordinates"
        )));
    }
    Ok(dim)
}

fn map_point(dim: usize, node_coords: &[Vec<f64>], values: &[f64]) -> Vec<f64> {
    let mut x = vec![0.0; dim];
    for (node, value) in node_coords.iter().zip(values) {
        for d in 0..dim {
            x[d] += value * node[d];
        }
    }
    x
}

fn build_jacobian(dim: usize, node_coords: &[Vec<f64>], ref_grads: &[Vec<f64>]) -> Vec<f64> {
    let mut jac = vec![0.0; dim * dim];
    for (node, grad) in node_coords.iter().zip(ref_grads) {
        for phys_dim in 0..dim {
            for ref_dim in 0..dim {
                jac[phys_dim * dim + ref_dim] += node[phys_dim] * grad[ref_dim];
            }
        }
    }
    jac
}

fn invert_jacobian(dim: usize, jac: &[f64]) -> Result<(f64, Vec<f64>), CouplingError> {
    let singular = || CouplingError::InvalidGeometry("zero Jacobian determinant".to_string());
    match dim {
        1 => {
            let det = jac[0];
            if det.abs() < f64::EPSILON {
                return Err(singular());
            }
            Ok((det, vec![1.0 / det]))
        }
        2 => {
            let (a, b, c, d) = (jac[0], jac[1], jac[2], jac[3]);
            let det = a * d - b * c;
            if det.abs() < f64::EPSILON {
                return Err(singular());
            }
            Ok((det, vec![d / det, -b / det, -c / det, a / det]))
        }
        _ => Err(CouplingError::InvalidGeometry(format!(
            "unsupported Jacobian dimension {dim}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<Vec<f64>> {
        vec![vec![0.0, 0.0], vec![2.0, 0.0], vec![2.0, 1.0], vec![0.0, 1.0]]
    }

    #[test]
    fn volume_weights_integrate_area() {
        let rule = QuadratureRule::for_cell("gauss2", CellType::Quadrilateral).unwrap();
        let fe = FeValues::volume(CellType::Quadrilateral, &rule, &unit_square()).unwrap();
        assert!((fe.jxw.iter().sum::<f64>() - 2.0).abs() < 1e-12);
    }

    #[test]
    fn side_weights_integrate_edge_length_with_outward_normal() {
        let rule = QuadratureRule::for_side("gauss2", CellType::Quadrilateral).unwrap();
        let fe = FeValues::side(CellType::Quadrilateral, 0, &rule, &unit_square()).unwrap();
        assert!((fe.jxw.iter().sum::<f64>() - 2.0).abs() < 1e-12);
        assert_eq!(fe.normals[0], vec![0.0, -1.0]);
        assert!(fe.q_points.iter().all(|p| p[1].abs() < 1e-14));
    }

    #[test]
    fn physical_points_are_kept_verbatim() {
        let pts = vec![vec![0.5, 0.25], vec![1.5, 0.75]];
        let fe = FeValues::at_physical(CellType::Quadrilateral, &pts, &unit_square()).unwrap();
        assert_eq!(fe.q_points, pts);
        // Bilinear interpolation of x at (0.5, 0.25) reproduces x.
        let x: f64 = fe.phi[0]
            .iter()
            .zip(unit_square())
            .map(|(phi, node)| phi * node[0])
            .sum();
        assert!((x - 0.5).abs() < 1e-12);
    }

    #[test]
    fn containment_uses_reference_bounds() {
        let tri = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(contains_point(CellType::Triangle, &tri, &[0.2, 0.2], 1e-10));
        assert!(!contains_point(CellType::Triangle, &tri, &[0.8, 0.8], 1e-10));
    }
}
