//! Data module: atlas, section, and the node coordinate store.
#![warn(missing_docs)]

pub mod atlas;
pub mod coordinates;
pub mod section;

pub use atlas::Atlas;
pub use coordinates::Coordinates;
pub use section::Section;
