//! Vector and matrix tag registry.
//!
//! A tag names one residual vector or Jacobian matrix accumulated during
//! assembly (time-derivative terms versus spatial terms, for instance). The
//! registry is owned by the reference problem; a displaced problem only ever
//! forwards to it, so both sides agree on every id.
//!
//! Names are case-insensitive and stored upper-cased. Adding a name twice
//! returns the id handed out the first time.

use crate::coupling_error::CouplingError;
use parking_lot::RwLock;

/// Index of a tag inside its registry.
pub type TagId = usize;

/// Default vector tag for time-derivative contributions.
pub const TIME_TAG: &str = "TIME";
/// Default vector tag for everything that is not a time derivative.
pub const NONTIME_TAG: &str = "NONTIME";
/// Default matrix tag for the system Jacobian.
pub const SYSTEM_TAG: &str = "SYSTEM";

#[derive(Debug, Default)]
struct TagTable {
    names: Vec<String>,
}

impl TagTable {
    fn add(&mut self, name: &str) -> TagId {
        let name = name.to_uppercase();
        if let Some(id) = self.find(&name) {
            return id;
        }
        self.names.push(name);
        self.names.len() - 1
    }

    fn find(&self, upper: &str) -> Option<TagId> {
        self.names.iter().position(|n| n == upper)
    }
}

/// Registry of vector and matrix tags, shared by reference.
#[derive(Debug, Default)]
pub struct TagRegistry {
    vector: RwLock<TagTable>,
    matrix: RwLock<TagTable>,
}

impl TagRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry pre-populated with the default `TIME`/`NONTIME` vector tags
    /// and the `SYSTEM` matrix tag.
    pub fn with_defaults() -> Self {
        let tags = Self::new();
        tags.add_vector_tag(TIME_TAG);
        tags.add_vector_tag(NONTIME_TAG);
        tags.add_matrix_tag(SYSTEM_TAG);
        tags
    }

    /// Register a vector tag, returning its id.
    pub fn add_vector_tag(&self, name: &str) -> TagId {
        self.vector.write().add(name)
    }

    /// Id of a registered vector tag.
    pub fn get_vector_tag_id(&self, name: &str) -> Result<TagId, CouplingError> {
        self.vector
            .read()
            .find(&name.to_uppercase())
            .ok_or_else(|| CouplingError::UnknownVectorTag(name.to_string()))
    }

    /// Name of vector tag `tag`.
    pub fn vector_tag_name(&self, tag: TagId) -> Result<String, CouplingError> {
        self.vector
            .read()
            .names
            .get(tag)
            .cloned()
            .ok_or_else(|| CouplingError::UnknownVectorTag(tag.to_string()))
    }

    pub fn vector_tag_exists(&self, tag: TagId) -> bool {
        tag < self.vector.read().names.len()
    }

    pub fn vector_tag_name_exists(&self, name: &str) -> bool {
        self.vector.read().find(&name.to_uppercase()).is_some()
    }

    pub fn num_vector_tags(&self) -> usize {
        self.vector.read().names.len()
    }

    /// Every vector tag id in registration order.
    pub fn vector_tags(&self) -> Vec<TagId> {
        (0..self.num_vector_tags()).collect()
    }

    /// Register a matrix tag, returning its id.
    pub fn add_matrix_tag(&self, name: &str) -> TagId {
        self.matrix.write().add(name)
    }

    /// Id of a registered matrix tag.
    pub fn get_matrix_tag_id(&self, name: &str) -> Result<TagId, CouplingError> {
        self.matrix
            .read()
            .find(&name.to_uppercase())
            .ok_or_else(|| CouplingError::UnknownMatrixTag(name.to_string()))
    }

    /// Name of matrix tag `tag`.
    pub fn matrix_tag_name(&self, tag: TagId) -> Result<String, CouplingError> {
        self.matrix
            .read()
            .names
            .get(tag)
            .cloned()
            .ok_or_else(|| CouplingError::UnknownMatrixTag(tag.to_string()))
    }

    pub fn matrix_tag_exists(&self, tag: TagId) -> bool {
        tag < self.matrix.read().names.len()
    }

    pub fn matrix_tag_name_exists(&self, name: &str) -> bool {
        self.matrix.read().find(&name.to_uppercase()).is_some()
    }

    pub fn num_matrix_tags(&self) -> usize {
        self.matrix.read().names.len()
    }

    /// Every matrix tag id in registration order.
    pub fn matrix_tags(&self) -> Vec<TagId> {
        (0..self.num_matrix_tags()).collect()
    }
}
