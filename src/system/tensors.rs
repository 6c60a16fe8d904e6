//! Global residual vectors and Jacobian matrices keyed by tag.
//!
//! One [`TaggedTensors`] is created by a reference nonlinear system and shared
//! (`Arc`) with its displaced mirror, so contributions assembled on either
//! geometry land in the same accumulation.

use super::numeric::{NumericVector, SparseMatrix};
use crate::coupling_error::CouplingError;
use crate::tags::TagId;
use parking_lot::Mutex;
use std::collections::BTreeMap;

#[derive(Debug, Default)]
struct TensorStore {
    n_dofs: usize,
    vectors: BTreeMap<TagId, NumericVector>,
    matrices: BTreeMap<TagId, SparseMatrix>,
}

impl TensorStore {
    fn vector_mut(&mut self, tag: TagId) -> &mut NumericVector {
        let n = self.n_dofs;
        self.vectors.entry(tag).or_insert_with(|| NumericVector::new(n))
    }

    fn matrix_mut(&mut self, tag: TagId) -> &mut SparseMatrix {
        let n = self.n_dofs;
        self.matrices.entry(tag).or_insert_with(|| SparseMatrix::new(n))
    }
}

/// Tag-keyed global tensors, safe to scatter into from several threads.
#[derive(Debug, Default)]
pub struct TaggedTensors {
    inner: Mutex<TensorStore>,
}

impl TaggedTensors {
    pub fn new(n_dofs: usize) -> Self {
        Self {
            inner: Mutex::new(TensorStore {
                n_dofs,
                ..Default::default()
            }),
        }
    }

    pub fn n_dofs(&self) -> usize {
        self.inner.lock().n_dofs
    }

    /// Resize every stored tensor to `n_dofs`.
    pub fn resize(&self, n_dofs: usize) {
        let mut store = self.inner.lock();
        store.n_dofs = n_dofs;
        store.vectors.values_mut().for_each(|v| v.resize(n_dofs));
        store.matrices.values_mut().for_each(|m| m.resize(n_dofs));
    }

    /// Zero every stored vector and matrix.
    pub fn zero(&self) {
        let mut store = self.inner.lock();
        store.vectors.values_mut().for_each(NumericVector::zero);
        store.matrices.values_mut().for_each(SparseMatrix::zero);
    }

    /// `vector[tag][dofs[i]] += values[i]`.
    pub fn add_to_vector(
        &self,
        tag: TagId,
        dofs: &[usize],
        values: &[f64],
    ) -> Result<(), CouplingError> {
        let mut store = self.inner.lock();
        let vector = store.vector_mut(tag);
        for (&dof, &value) in dofs.iter().zip(values) {
            vector.add(dof, value)?;
        }
        Ok(())
    }

    /// `matrix[tag][row][col] += value` for each triplet.
    pub fn add_to_matrix(
        &self,
        tag: TagId,
        triplets: &[(usize, usize, f64)],
    ) -> Result<(), CouplingError> {
        let mut store = self.inner.lock();
        let matrix = store.matrix_mut(tag);
        for &(row, col, value) in triplets {
            matrix.add(row, col, value)?;
        }
        Ok(())
    }

    /// Copy of the vector for `tag`, if anything was scattered into it.
    pub fn vector(&self, tag: TagId) -> Option<NumericVector> {
        self.inner.lock().vectors.get(&tag).cloned()
    }

    /// Copy of the matrix for `tag`, if anything was scattered into it.
    pub fn matrix(&self, tag: TagId) -> Option<SparseMatrix> {
        self.inner.lock().matrices.get(&tag).cloned()
    }

    /// Sum of the vectors stored under `tags`.
    pub fn sum_vectors(&self, tags: &[TagId]) -> NumericVector {
        let store = self.inner.lock();
        let mut out = NumericVector::new(store.n_dofs);
        for tag in tags {
            if let Some(v) = store.vectors.get(tag) {
                for (o, x) in out.as_mut_slice().iter_mut().zip(v.as_slice()) {
                    *o += x;
                }
            }
        }
        out
    }
}
