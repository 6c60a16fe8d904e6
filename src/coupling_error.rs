//! CouplingError: Unified error type for mesh-displace public APIs
//!
//! Every variant describes a malformed problem setup or a misuse of the
//! reinit/assembly protocol. None of them is transient: a driver receiving one
//! of these is expected to abort the run rather than retry.

use crate::topology::point::PointId;
use thiserror::Error;

/// Unified error type for displaced-mesh and coupled-problem operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CouplingError {
    /// Attempted to construct a PointId with a zero value (invalid).
    #[error("PointId must be non-zero (0 is reserved as invalid/sentinel)")]
    InvalidPointId,
    /// A node or element id is not present in the mesh.
    #[error("point {0} is not present in the mesh")]
    MissingPoint(PointId),
    /// A point was inserted twice.
    #[error("point {0} already exists")]
    DuplicatePoint(PointId),
    /// A coordinate or data slice has the wrong length.
    #[error("slice length mismatch at point {point}: expected {expected}, found {found}")]
    SliceLengthMismatch {
        point: PointId,
        expected: usize,
        found: usize,
    },
    /// Degenerate or unsupported geometry.
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),
    /// Neither displaced system holds the variable.
    #[error("no variable with name '{0}'")]
    VariableNotFound(String),
    /// `system_for` could not place the variable in any displaced system.
    #[error("unable to find a system containing the variable {0}")]
    SystemNotFound(String),
    /// A variable exists but with a different kind or field type than requested.
    #[error("variable '{name}' is {found}, expected {expected}")]
    VariableTypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    /// A variable with the same name was already declared.
    #[error("variable '{0}' is already declared")]
    DuplicateVariable(String),
    /// Solution vectors disagree in size with the target DOF map.
    #[error("solution size mismatch for system '{system}': DOF map has {expected} entries, vector has {found}")]
    SolutionSizeMismatch {
        system: String,
        expected: usize,
        found: usize,
    },
    /// More displacement variables were supplied than the mesh has spatial directions.
    #[error("{found} displacement variables supplied for a {dimension}-dimensional mesh")]
    DisplacementCountMismatch { dimension: usize, found: usize },
    /// A degree-of-freedom index lies outside the target vector or matrix.
    #[error("dof index {dof} out of range for {n_dofs} dofs")]
    DofOutOfRange { dof: usize, n_dofs: usize },
    /// A Jacobian block was requested for a variable pair the coupling matrix excludes.
    #[error("variables {ivar} and {jvar} are not coupled")]
    UncoupledBlock { ivar: usize, jvar: usize },
    /// Caller-supplied dof indices disagree with a prepared local block.
    #[error("local block is {expected} wide, {found} dof indices supplied")]
    BlockSizeMismatch { expected: usize, found: usize },
    /// Vector tag id or name is unknown to the registry.
    #[error("unknown vector tag {0}")]
    UnknownVectorTag(String),
    /// Matrix tag id or name is unknown to the registry.
    #[error("unknown matrix tag {0}")]
    UnknownMatrixTag(String),
    /// A sub-problem name is not registered with the coupled problem.
    #[error("unknown sub-problem '{0}'")]
    UnknownSubProblem(String),
    /// A sub-problem name was registered twice.
    #[error("sub-problem '{0}' is already registered")]
    DuplicateSubProblem(String),
    /// Two sub-problems declare a system of the same name.
    #[error("system '{system}' is already owned by sub-problem '{owner}'")]
    DuplicateSystem { system: String, owner: String },
    /// A solve order lists the same sub-problem more than once.
    #[error("sub-problem '{0}' appears more than once in the solve order")]
    DuplicateSolveOrderEntry(String),
    /// A solve order omits registered sub-problems while partial orders are disabled.
    #[error("solve order omits registered sub-problems: {0:?}")]
    IncompleteSolveOrder(Vec<String>),
    /// An operation required `init()` to have been called first.
    #[error("{0} used before init()")]
    NotInitialized(&'static str),
    /// An assembly operation needs a current element but none is set.
    #[error("assembly context {tid} has no current element")]
    NoCurrentElement { tid: usize },
    /// Thread ordinal outside of the fixed context pool.
    #[error("thread id {tid} out of range (pool has {n_threads} contexts)")]
    ThreadOutOfRange { tid: usize, n_threads: usize },
    /// Element side index out of range or side without a neighbor.
    #[error("element {elem} has no neighbor across side {side}")]
    MissingNeighbor { elem: PointId, side: usize },
    /// A sub-problem reported a failed solve.
    #[error("solve failed in '{problem}': {reason}")]
    Solve { problem: String, reason: String },
}
