//! Quadrature rules on reference elements and their sides.

use crate::coupling_error::CouplingError;
use crate::topology::CellType;

/// Quadrature rule on a reference element.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadratureRule {
    /// Name for diagnostics.
    pub name: String,
    /// Quadrature points in reference coordinates.
    pub points: Vec<Vec<f64>>,
    /// Quadrature weights.
    pub weights: Vec<f64>,
}

impl QuadratureRule {
    /// Volume rule named `name` for `cell_type`.
    ///
    /// Accepted names: `gauss1` (alias `midpoint`), `gauss2`, `gauss3`.
    pub fn for_cell(name: &str, cell_type: CellType) -> Result<Self, CouplingError> {
        let order = gauss_order(name)?;
        Ok(match cell_type {
            CellType::Segment => gauss_legendre_1d(order, name),
            CellType::Quadrilateral => {
                let line = gauss_legendre_1d(order, name);
                tensor_product_quadrature(&line, &line, name)
            }
            CellType::Triangle => triangle_rule(order, name),
        })
    }

    /// Rule on the sides of `cell_type`, in side-local coordinates.
    ///
    /// Segment sides are points and get a single unit-weight point with an
    /// empty coordinate vector; 2D sides are lines on `[-1, 1]`.
    pub fn for_side(name: &str, cell_type: CellType) -> Result<Self, CouplingError> {
        let order = gauss_order(name)?;
        Ok(match cell_type {
            CellType::Segment => QuadratureRule {
                name: name.to_string(),
                points: vec![vec![]],
                weights: vec![1.0],
            },
            CellType::Triangle | CellType::Quadrilateral => gauss_legendre_1d(order, name),
        })
    }

    /// Number of points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the rule has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Map a side-local coordinate onto the element reference coordinates.
pub fn side_to_reference(cell_type: CellType, side: usize, local: &[f64]) -> Vec<f64> {
    match cell_type {
        CellType::Segment => vec![if side == 0 { -1.0 } else { 1.0 }],
        CellType::Quadrilateral => {
            let t = local[0];
            match side {
                0 => vec![t, -1.0],
                1 => vec![1.0, t],
                2 => vec![-t, 1.0],
                _ => vec![-1.0, -t],
            }
        }
        CellType::Triangle => {
            let s = 0.5 * (local[0] + 1.0);
            match side {
                0 => vec![s, 0.0],
                1 => vec![1.0 - s, s],
                _ => vec![0.0, 1.0 - s],
            }
        }
    }
}

fn gauss_order(name: &str) -> Result<usize, CouplingError> {
    match name.to_lowercase().as_str() {
        "gauss1" | "midpoint" => Ok(1),
        "gauss2" => Ok(2),
        "gauss3" => Ok(3),
        _ => Err(CouplingError::InvalidGeometry(format!(
            "unsupported quadrature '{name}'"
        ))),
    }
}

fn gauss_legendre_1d(order: usize, name: &str) -> QuadratureRule {
    let (points, weights) = match order {
        1 => (vec![0.0], vec![2.0]),
        2 => {
            let pt = 1.0_f64 / 3.0_f64.sqrt();
            (vec![-pt, pt], vec![1.0, 1.0])
        }
        _ => {
            let pt = (3.0_f64 / 5.0).sqrt();
            (vec![-pt, 0.0, pt], vec![5.0 / 9.0, 8.0 / 9.0, 5.0 / 9.0])
        }
    };
    QuadratureRule {
        name: name.to_string(),
        points: points.into_iter().map(|p| vec![p]).collect(),
        weights,
    }
}

fn tensor_product_quadrature(a: &QuadratureRule, b: &QuadratureRule, name: &str) -> QuadratureRule {
    let mut points = Vec::with_capacity(a.len() * b.len());
    let mut weights = Vec::with_capacity(a.len() * b.len());
    for (pa, wa) in a.points.iter().zip(&a.weights) {
        for (pb, wb) in b.points.iter().zip(&b.weights) {
            points.push(vec![pa[0], pb[0]]);
            weights.push(wa * wb);
        }
    }
    QuadratureRule {
        name: name.to_string(),
        points,
        weights,
    }
}

fn triangle_rule(order: usize, name: &str) -> QuadratureRule {
    let (points, weights) = match order {
        1 => (vec![vec![1.0 / 3.0, 1.0 / 3.0]], vec![0.5]),
        2 => (
            vec![
                vec![1.0 / 6.0, 1.0 / 6.0],
                vec![2.0 / 3.0, 1.0 / 6.0],
                vec![1.0 / 6.0, 2.0 / 3.0],
            ],
            vec![1.0 / 6.0; 3],
        ),
        _ => (
            vec![
                vec![1.0 / 3.0, 1.0 / 3.0],
                vec![0.6, 0.2],
                vec![0.2, 0.6],
                vec![0.2, 0.2],
            ],
            vec![-27.0 / 96.0, 25.0 / 96.0, 25.0 / 96.0, 25.0 / 96.0],
        ),
    };
    QuadratureRule {
        name: name.to_string(),
        points,
        weights,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_reference_measure() {
        for name in ["gauss1", "gauss2", "gauss3"] {
            let seg = QuadratureRule::for_cell(name, CellType::Segment).unwrap();
            let quad = QuadratureRule::for_cell(name, CellType::Quadrilateral).unwrap();
            let tri = QuadratureRule::for_cell(name, CellType::Triangle).unwrap();
            assert!((seg.weights.iter().sum::<f64>() - 2.0).abs() < 1e-14);
            assert!((quad.weights.iter().sum::<f64>() - 4.0).abs() < 1e-14);
            assert!((tri.weights.iter().sum::<f64>() - 0.5).abs() < 1e-14);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!(QuadratureRule::for_cell("simpson", CellType::Segment).is_err());
    }

    #[test]
    fn quad_side_endpoints_hit_vertices() {
        assert_eq!(side_to_reference(CellType::Quadrilateral, 1, &[-1.0]), vec![1.0, -1.0]);
        assert_eq!(side_to_reference(CellType::Triangle, 1, &[1.0]), vec![0.0, 1.0]);
    }
}
