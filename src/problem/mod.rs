//! Problems: the reference problem, its displaced mirror, and their
//! composition.

pub mod coupled;
pub mod displaced;
pub mod equation_systems;
pub mod fe_problem;
pub mod initial_condition;
pub mod reference;

pub use coupled::{CoupledProblem, CoupledProblemDump, SubProblem, SubProblemSummary, SystemSummary};
pub use displaced::DisplacedProblem;
pub use equation_systems::{EquationSystems, SharedClock, SimulationClock};
pub use fe_problem::{FeProblem, SolveHook};
pub use initial_condition::{InitialCondition, InitialConditions};
pub use reference::{CoordinateSystem, ReferenceProblem};
