//! Identifiers and shape metadata shared by the reference and displaced meshes.

pub mod cell_type;
pub mod point;

pub use cell_type::CellType;
pub use point::PointId;

/// Block (subdomain) identifier carried by every element.
pub type SubdomainId = u16;

/// Boundary identifier attached to element sides.
pub type BoundaryId = u16;

/// Placeholder boundary id used when a face is visited without a boundary.
pub const ANY_BOUNDARY_ID: BoundaryId = BoundaryId::MAX;
