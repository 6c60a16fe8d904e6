//! Systems of variables and the linear-algebra containers they own.

pub mod dof_map;
pub mod field_system;
pub mod numeric;
pub mod tensors;
pub mod variable;

pub use dof_map::{DofMap, ExtraSendListFn};
pub use field_system::{FieldSystem, ThreadValues, VarDofs, VariableValues};
pub use numeric::{NumericVector, SparseMatrix};
pub use tensors::TaggedTensors;
pub use variable::{FieldType, Variable, VariableFamily, VariableKind, VariableSpec};
