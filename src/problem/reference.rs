//! What a displaced problem needs from the problem it mirrors.

use crate::assembly::CouplingMatrix;
use crate::mesh::Mesh;
use crate::system::FieldSystem;
use crate::tags::TagRegistry;
use crate::topology::{BoundaryId, PointId, SubdomainId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Coordinate system a subdomain is integrated in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CoordinateSystem {
    #[default]
    Cartesian,
    Axisymmetric,
    Spherical,
}

/// The authoritative problem a [`DisplacedProblem`](super::DisplacedProblem)
/// follows.
///
/// Everything here is shared state: the displaced side reads solutions and
/// flags through it and forwards ghosting requests to it, but never owns a
/// copy of the tag registry.
pub trait ReferenceProblem: Send + Sync {
    fn name(&self) -> &str;

    /// The reference mesh.
    fn mesh(&self) -> &RwLock<Mesh>;

    fn nonlinear_system(&self) -> &RwLock<FieldSystem>;

    fn auxiliary_system(&self) -> &RwLock<FieldSystem>;

    /// The one registry of vector and matrix tags.
    fn tags(&self) -> &TagRegistry;

    /// Which Jacobian blocks exist.
    fn coupling(&self) -> CouplingMatrix;

    fn coord_system(&self, subdomain: SubdomainId) -> CoordinateSystem;

    /// Whether any system declares `name`.
    fn has_variable(&self, name: &str) -> bool {
        self.nonlinear_system().read().has_variable(name)
            || self.auxiliary_system().read().has_variable(name)
    }

    fn add_ghosted_elem(&self, elem: PointId);

    fn add_ghosted_boundary(&self, boundary: BoundaryId);

    /// Extend ghosting to every element touching a ghosted boundary.
    fn ghost_ghosted_boundaries(&self);

    fn ghosted_elems(&self) -> Vec<PointId>;

    fn is_transient(&self) -> bool;

    fn converged(&self) -> bool;

    fn computing_initial_residual(&self) -> bool;

    /// Whether a Jacobian has been assembled at least once.
    fn has_jacobian(&self) -> bool;

    /// Whether the Jacobian never changes once assembled.
    fn const_jacobian(&self) -> bool;
}

impl std::fmt::Debug for dyn ReferenceProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReferenceProblem")
            .field("name", &self.name())
            .finish_non_exhaustive()
    }
}
