//! Dense vectors and coordinate-format sparse matrices indexed by dof.

use crate::coupling_error::CouplingError;
use std::collections::BTreeMap;

/// Dense, fixed-size vector of dof values.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NumericVector {
    values: Vec<f64>,
}

impl NumericVector {
    /// Zero vector of length `n`.
    pub fn new(n: usize) -> Self {
        Self {
            values: vec![0.0; n],
        }
    }

    pub fn from_vec(values: Vec<f64>) -> Self {
        Self { values }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[inline]
    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }

    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn get(&self, dof: usize) -> Result<f64, CouplingError> {
        self.values
            .get(dof)
            .copied()
            .ok_or(CouplingError::DofOutOfRange {
                dof,
                n_dofs: self.values.len(),
            })
    }

    pub fn set(&mut self, dof: usize, value: f64) -> Result<(), CouplingError> {
        *self.slot(dof)? = value;
        Ok(())
    }

    pub fn add(&mut self, dof: usize, value: f64) -> Result<(), CouplingError> {
        *self.slot(dof)? += value;
        Ok(())
    }

    fn slot(&mut self, dof: usize) -> Result<&mut f64, CouplingError> {
        let n_dofs = self.values.len();
        self.values
            .get_mut(dof)
            .ok_or(CouplingError::DofOutOfRange { dof, n_dofs })
    }

    /// Set every entry to zero, keeping the length.
    pub fn zero(&mut self) {
        self.values.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Resize to `n` entries, zero-filling new ones.
    pub fn resize(&mut self, n: usize) {
        self.values.resize(n, 0.0);
    }

    /// Copy `other` into `self`; the lengths must agree.
    pub fn assign(&mut self, other: &NumericVector, system: &str) -> Result<(), CouplingError> {
        if other.len() != self.len() {
            return Err(CouplingError::SolutionSizeMismatch {
                system: system.to_string(),
                expected: self.len(),
                found: other.len(),
            });
        }
        self.values.copy_from_slice(&other.values);
        Ok(())
    }

    /// `self += other` entrywise; the lengths must agree.
    pub fn add_vector(&mut self, other: &NumericVector, system: &str) -> Result<(), CouplingError> {
        if other.len() != self.len() {
            return Err(CouplingError::SolutionSizeMismatch {
                system: system.to_string(),
                expected: self.len(),
                found: other.len(),
            });
        }
        for (a, b) in self.values.iter_mut().zip(&other.values) {
            *a += b;
        }
        Ok(())
    }

    /// Euclidean norm.
    pub fn l2_norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }
}

/// Square sparse matrix in coordinate form.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SparseMatrix {
    n: usize,
    entries: BTreeMap<(usize, usize), f64>,
}

impl SparseMatrix {
    /// Empty `n x n` matrix.
    pub fn new(n: usize) -> Self {
        Self {
            n,
            entries: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.n
    }

    /// Number of stored entries.
    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.entries.get(&(row, col)).copied().unwrap_or(0.0)
    }

    pub fn add(&mut self, row: usize, col: usize, value: f64) -> Result<(), CouplingError> {
        self.check(row)?;
        self.check(col)?;
        *self.entries.entry((row, col)).or_insert(0.0) += value;
        Ok(())
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), CouplingError> {
        self.check(row)?;
        self.check(col)?;
        self.entries.insert((row, col), value);
        Ok(())
    }

    /// Zero the values, keeping the sparsity pattern.
    pub fn zero(&mut self) {
        self.entries.values_mut().for_each(|v| *v = 0.0);
    }

    /// Resize, dropping entries outside the new bounds.
    pub fn resize(&mut self, n: usize) {
        self.n = n;
        self.entries.retain(|&(r, c), _| r < n && c < n);
    }

    /// Stored entries in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = ((usize, usize), f64)> + '_ {
        self.entries.iter().map(|(&k, &v)| (k, v))
    }

    fn check(&self, dof: usize) -> Result<(), CouplingError> {
        if dof < self.n {
            Ok(())
        } else {
            Err(CouplingError::DofOutOfRange { dof, n_dofs: self.n })
        }
    }
}
