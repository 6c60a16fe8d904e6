//! Which variable pairs produce Jacobian blocks.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Sparse set of coupled `(ivar, jvar)` pairs.
///
/// `Full` couples every pair; `Explicit` lists them.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CouplingMatrix {
    /// Only the diagonal blocks.
    #[default]
    Diagonal,
    /// Every variable with every other.
    Full,
    /// Diagonal blocks plus the listed off-diagonal pairs.
    Explicit(BTreeSet<(usize, usize)>),
}

impl CouplingMatrix {
    /// Diagonal plus the listed pairs.
    pub fn explicit(pairs: impl IntoIterator<Item = (usize, usize)>) -> Self {
        CouplingMatrix::Explicit(pairs.into_iter().collect())
    }

    pub fn coupled(&self, ivar: usize, jvar: usize) -> bool {
        match self {
            CouplingMatrix::Diagonal => ivar == jvar,
            CouplingMatrix::Full => true,
            CouplingMatrix::Explicit(pairs) => ivar == jvar || pairs.contains(&(ivar, jvar)),
        }
    }

    /// Coupled pairs among `vars`, row-major.
    pub fn pairs(&self, vars: &[usize]) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for &i in vars {
            for &j in vars {
                if self.coupled(i, j) {
                    out.push((i, j));
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_always_keeps_diagonal() {
        let c = CouplingMatrix::explicit([(0, 2)]);
        assert!(c.coupled(1, 1));
        assert!(c.coupled(0, 2));
        assert!(!c.coupled(2, 0));
        assert_eq!(c.pairs(&[0, 2]), vec![(0, 0), (0, 2), (2, 2)]);
    }
}
