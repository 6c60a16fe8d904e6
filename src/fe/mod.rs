//! Finite-element evaluation: bases, quadrature, and physical shape data.

pub mod basis;
pub mod quadrature;
pub mod values;

pub use basis::{Basis, BasisTabulation};
pub use quadrature::QuadratureRule;
pub use values::{FeValues, contains_point, inverse_map};
