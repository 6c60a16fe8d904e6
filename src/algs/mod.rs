//! Algorithms run over whole meshes.

pub mod displace;

pub use displace::{
    NodeRange, NodeVisitor, ResetDisplacedMeshVisitor, UpdateDisplacedMeshVisitor,
    check_node_correspondence, visit_nodes,
};
