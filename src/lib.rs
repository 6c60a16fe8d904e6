#![cfg_attr(docsrs, feature(doc_cfg))]
//! # mesh-displace
//!
//! mesh-displace is the displaced-mesh coupling layer of a finite-element
//! multiphysics framework. A reference problem owns the authoritative mesh,
//! solution vectors, and tag registries; a [`DisplacedProblem`] mirrors it on
//! a structurally identical mesh whose node coordinates follow a
//! solution-dependent displacement field, so physics kernels can be evaluated
//! on the deformed geometry without disturbing the reference frame.
//!
//! ## Features
//! - Dual meshes: a reference mesh and a displaced clone sharing ids and
//!   connectivity, with independent coordinate storage
//! - Mirrored field systems with identical dof numbering, synced from the
//!   reference solution
//! - One [`AssemblyContext`] per worker for element, face, neighbor, node, and
//!   Dirac-point evaluation with tagged residual/Jacobian scatter
//! - Data-parallel node displacement (Rayon) with a sequential fallback
//! - [`CoupledProblem`] composition of sub-problems under a declared solve
//!   order and one shared simulation clock
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! mesh-displace = "0.3"
//! # Optional features:
//! # features = ["check-invariants"]
//! ```
//!
//! ```
//! use mesh_displace::prelude::*;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), CouplingError> {
//! let reference = Arc::new(FeProblem::new("solid", generation::line(2, 2.0)?, 1));
//! reference.add_variable(VariableSpec::lagrange("disp_x"))?;
//! reference.init()?;
//!
//! let config = DisplacedProblemConfig::new(["disp_x"]).with_threads(1);
//! let mut displaced = DisplacedProblem::new(reference.clone(), config)?;
//! displaced.init()?;
//!
//! reference
//!     .nonlinear_system()
//!     .write()
//!     .set_solution(&NumericVector::from_vec(vec![0.0, 0.1, 0.2]))?;
//! displaced.update_mesh()?;
//! assert_eq!(displaced.mesh().node(PointId::new(3)?)?, &[2.2]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Logging
//! Lifecycle transitions are reported through the [`log`] facade at `debug`,
//! per-element assembly at `trace`, and automatic parallel repairs at `warn`.
//! No logger is installed by the library.

pub mod algs;
pub mod assembly;
pub mod config;
pub mod coupling_error;
pub mod data;
pub mod debug_invariants;
pub mod fe;
pub mod mesh;
pub mod parallel;
pub mod problem;
pub mod search;
pub mod system;
pub mod tags;
pub mod topology;

pub use assembly::AssemblyContext;
pub use coupling_error::CouplingError;
pub use debug_invariants::DebugInvariants;
pub use problem::{CoupledProblem, DisplacedProblem};

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::algs::displace::{NodeRange, NodeVisitor, visit_nodes};
    pub use crate::assembly::{AssemblyContext, BlockKind, CouplingMatrix};
    pub use crate::config::{CoupledProblemConfig, DisplacedProblemConfig, QuadratureConfig};
    pub use crate::coupling_error::CouplingError;
    pub use crate::data::{Atlas, Coordinates, Section};
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::mesh::{Mesh, NodeDistribution, generation};
    pub use crate::problem::{
        CoordinateSystem, CoupledProblem, DisplacedProblem, FeProblem, ReferenceProblem,
        SimulationClock,
    };
    pub use crate::search::{DiracKernelInfo, GeometricSearch, GeometricSearchData, SearchKind};
    pub use crate::system::{FieldSystem, NumericVector, SparseMatrix, VariableSpec};
    pub use crate::tags::{TagId, TagRegistry};
    pub use crate::topology::{BoundaryId, CellType, PointId, SubdomainId};
}
