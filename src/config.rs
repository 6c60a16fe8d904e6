//! Serde-backed configuration for displaced and coupled problems.

use serde::{Deserialize, Serialize};

/// Quadrature rule names used by every assembly context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadratureConfig {
    pub volume: String,
    pub face: String,
}

impl Default for QuadratureConfig {
    fn default() -> Self {
        Self {
            volume: "gauss2".to_string(),
            face: "gauss2".to_string(),
        }
    }
}

/// Construction parameters of a [`DisplacedProblem`](crate::problem::DisplacedProblem).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacedProblemConfig {
    /// One displacement variable per spatial direction, in order.
    pub displacements: Vec<String>,
    /// Size of the assembly context pool; defaults to the worker pool size.
    pub n_threads: Option<usize>,
    /// Minimum nodes per parallel work item in the node visitor; 0 means 1.
    pub grain_size: usize,
    pub quadrature: QuadratureConfig,
}

impl DisplacedProblemConfig {
    pub fn new<S: Into<String>>(displacements: impl IntoIterator<Item = S>) -> Self {
        Self {
            displacements: displacements.into_iter().map(Into::into).collect(),
            grain_size: 1,
            ..Self::default()
        }
    }

    pub fn with_threads(mut self, n_threads: usize) -> Self {
        self.n_threads = Some(n_threads);
        self
    }

    /// Pool size after applying the default.
    pub fn resolved_threads(&self) -> usize {
        self.n_threads.unwrap_or_else(crate::parallel::n_threads).max(1)
    }
}

/// Construction parameters of a [`CoupledProblem`](crate::problem::CoupledProblem).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoupledProblemConfig {
    /// Initial solve order; empty means registration order.
    pub solve_order: Vec<String>,
    /// Whether a solve order may name only some of the sub-problems.
    pub allow_partial_solve_order: bool,
    /// Initial time step.
    pub dt: f64,
}

impl Default for CoupledProblemConfig {
    fn default() -> Self {
        Self {
            solve_order: Vec::new(),
            allow_partial_solve_order: true,
            dt: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let cfg: DisplacedProblemConfig =
            serde_json::from_str(r#"{ "displacements": ["disp_x", "disp_y"] }"#).unwrap();
        assert_eq!(cfg.displacements, vec!["disp_x", "disp_y"]);
        assert_eq!(cfg.quadrature.volume, "gauss2");
        assert_eq!(cfg.n_threads, None);

        let cfg: CoupledProblemConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.allow_partial_solve_order);
        assert_eq!(cfg.dt, 1.0);
    }
}
