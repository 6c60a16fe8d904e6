//! Per-thread local assembly: evaluation data, local blocks, caches.

pub mod context;
pub mod coupling;

pub use context::{AssemblyContext, AssemblyState, BlockKind, DenseBlock};
pub use coupling::CouplingMatrix;
