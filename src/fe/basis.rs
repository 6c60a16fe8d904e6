//! Linear Lagrange bases on the reference elements.
//!
//! Reference elements: segment `[-1, 1]`, quadrilateral `[-1, 1]^2`, and the
//! unit triangle with vertices `(0,0) (1,0) (0,1)`.

use crate::coupling_error::CouplingError;
use crate::topology::CellType;

/// Supported basis implementations.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Basis {
    /// Linear Lagrange basis on a segment.
    LagrangeP1Segment,
    /// Linear Lagrange basis on a triangle.
    LagrangeP1Triangle,
    /// Bilinear Lagrange basis on a quadrilateral.
    LagrangeQ1Quadrilateral,
}

/// Basis function tabulation on the reference element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BasisTabulation {
    /// Basis values per point: `[qp][basis]`.
    pub values: Vec<Vec<f64>>,
    /// Reference gradients per point: `[qp][basis][dim]`.
    pub gradients: Vec<Vec<Vec<f64>>>,
}

impl Basis {
    /// The linear Lagrange basis of `cell_type`.
    pub fn for_cell(cell_type: CellType) -> Self {
        match cell_type {
            CellType::Segment => Basis::LagrangeP1Segment,
            CellType::Triangle => Basis::LagrangeP1Triangle,
            CellType::Quadrilateral => Basis::LagrangeQ1Quadrilateral,
        }
    }

    /// Reference dimension of the basis.
    pub fn dimension(&self) -> usize {
        match self {
            Basis::LagrangeP1Segment => 1,
            Basis::LagrangeP1Triangle | Basis::LagrangeQ1Quadrilateral => 2,
        }
    }

    /// Number of basis functions per element.
    pub fn num_nodes(&self) -> usize {
        match self {
            Basis::LagrangeP1Segment => 2,
            Basis::LagrangeP1Triangle => 3,
            Basis::LagrangeQ1Quadrilateral => 4,
        }
    }

    /// Centroid of the reference element, used as Newton start.
    pub fn reference_centroid(&self) -> Vec<f64> {
        match self {
            Basis::LagrangeP1Segment => vec![0.0],
            Basis::LagrangeP1Triangle => vec![1.0 / 3.0, 1.0 / 3.0],
            Basis::LagrangeQ1Quadrilateral => vec![0.0, 0.0],
        }
    }

    /// Whether `xi` lies inside the reference element, up to `tol`.
    pub fn contains_reference(&self, xi: &[f64], tol: f64) -> bool {
        match self {
            Basis::LagrangeP1Segment => xi[0].abs() <= 1.0 + tol,
            Basis::LagrangeQ1Quadrilateral => xi[0].abs() <= 1.0 + tol && xi[1].abs() <= 1.0 + tol,
            Basis::LagrangeP1Triangle => {
                xi[0] >= -tol && xi[1] >= -tol && xi[0] + xi[1] <= 1.0 + tol
            }
        }
    }

    /// Evaluate basis values and gradients at reference points.
    pub fn tabulate(&self, points: &[Vec<f64>]) -> Result<BasisTabulation, CouplingError> {
        let dim = self.dimension();
        let mut tab = BasisTabulation {
            values: Vec::with_capacity(points.len()),
            gradients: Vec::with_capacity(points.len()),
        };
        for point in points {
            if point.len() != dim {
                return Err(CouplingError::InvalidGeometry(format!(
                    "{self:?} needs {dim}D reference points, got {}D",
                    point.len()
                )));
            }
            let (values, grads) = match self {
                Basis::LagrangeP1Segment => p1_segment(point[0]),
                Basis::LagrangeP1Triangle => p1_triangle(point[0], point[1]),
                Basis::LagrangeQ1Quadrilateral => q1_quad(point[0], point[1]),
            };
            tab.values.push(values);
            tab.gradients.push(grads);
        }
        Ok(tab)
    }
}

fn p1_segment(xi: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    (
        vec![0.5 * (1.0 - xi), 0.5 * (1.0 + xi)],
        vec![vec![-0.5], vec![0.5]],
    )
}

fn p1_triangle(xi: f64, eta: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    (
        vec![1.0 - xi - eta, xi, eta],
        vec![vec![-1.0, -1.0], vec![1.0, 0.0], vec![0.0, 1.0]],
    )
}

fn q1_quad(xi: f64, eta: f64) -> (Vec<f64>, Vec<Vec<f64>>) {
    let values = vec![
        0.25 * (1.0 - xi) * (1.0 - eta),
        0.25 * (1.0 + xi) * (1.0 - eta),
        0.25 * (1.0 + xi) * (1.0 + eta),
        0.25 * (1.0 - xi) * (1.0 + eta),
    ];
    let grads = vec![
        vec![-0.25 * (1.0 - eta), -0.25 * (1.0 - xi)],
        vec![0.25 * (1.0 - eta), -0.25 * (1.0 + xi)],
        vec![0.25 * (1.0 + eta), 0.25 * (1.0 + xi)],
        vec![-0.25 * (1.0 + eta), 0.25 * (1.0 - xi)],
    ];
    (values, grads)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partition_of_unity() {
        let pts = vec![vec![0.3, -0.7], vec![-1.0, 1.0]];
        let tab = Basis::LagrangeQ1Quadrilateral.tabulate(&pts).unwrap();
        for values in &tab.values {
            assert!((values.iter().sum::<f64>() - 1.0).abs() < 1e-14);
        }
        let tri = Basis::LagrangeP1Triangle
            .tabulate(&[vec![0.2, 0.3]])
            .unwrap();
        assert!((tri.values[0].iter().sum::<f64>() - 1.0).abs() < 1e-14);
    }

    #[test]
    fn wrong_point_dimension_is_rejected() {
        assert!(Basis::LagrangeP1Segment.tabulate(&[vec![0.0, 0.0]]).is_err());
    }
}
