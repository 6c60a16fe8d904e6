//! Initial values of field variables, given as functions of position.

use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::system::{FieldSystem, VariableFamily};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Value of a variable at a point.
pub type ValueFn = Arc<dyn Fn(&[f64]) -> f64 + Send + Sync>;

/// Gradient of a variable at a point.
pub type GradientFn = Arc<dyn Fn(&[f64]) -> Vec<f64> + Send + Sync>;

/// Initial state of one variable. Every component starts from the same value.
#[derive(Clone)]
pub struct InitialCondition {
    value: ValueFn,
    gradient: Option<GradientFn>,
}

impl fmt::Debug for InitialCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InitialCondition")
            .field("gradient", &self.gradient.is_some())
            .finish()
    }
}

impl InitialCondition {
    pub fn new(value: impl Fn(&[f64]) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            value: Arc::new(value),
            gradient: None,
        }
    }

    /// Uniform `value` with zero gradient.
    pub fn constant(value: f64) -> Self {
        Self::new(move |_| value)
    }

    pub fn with_gradient(
        mut self,
        gradient: impl Fn(&[f64]) -> Vec<f64> + Send + Sync + 'static,
    ) -> Self {
        self.gradient = Some(Arc::new(gradient));
        self
    }

    pub fn value(&self, point: &[f64]) -> f64 {
        (self.value)(point)
    }

    /// Gradient at `point`, zero in every direction when none was given.
    pub fn gradient(&self, point: &[f64]) -> Vec<f64> {
        match &self.gradient {
            Some(g) => g(point),
            None => vec![0.0; point.len()],
        }
    }
}

/// Initial conditions keyed by variable name.
#[derive(Clone, Debug, Default)]
pub struct InitialConditions {
    by_var: BTreeMap<String, InitialCondition>,
}

impl InitialConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, var: impl Into<String>, ic: InitialCondition) {
        self.by_var.insert(var.into(), ic);
    }

    pub fn get(&self, var: &str) -> Option<&InitialCondition> {
        self.by_var.get(var)
    }

    pub fn len(&self) -> usize {
        self.by_var.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_var.is_empty()
    }

    /// Value of `var` at `point`; zero without an initial condition.
    pub fn value(&self, var: &str, point: &[f64]) -> f64 {
        self.get(var).map_or(0.0, |ic| ic.value(point))
    }

    pub fn gradient(&self, var: &str, point: &[f64]) -> Vec<f64> {
        self.get(var)
            .map_or_else(|| vec![0.0; point.len()], |ic| ic.gradient(point))
    }

    /// Write the initial value of every variable of `sys` into its solution,
    /// then refresh the current view.
    ///
    /// Nodal dofs take the value at their node, elemental dofs the value at
    /// the element centroid and scalar dofs the value at the origin.
    /// Variables without an initial condition are left untouched. Returns
    /// the number of dofs written.
    pub fn project(&self, mesh: &Mesh, sys: &mut FieldSystem) -> Result<usize, CouplingError> {
        if !sys.is_initialized() {
            return Err(CouplingError::NotInitialized("InitialConditions::project"));
        }
        let origin = vec![0.0; mesh.dimension()];
        let mut writes: Vec<(usize, f64)> = Vec::new();
        for var in sys.variables() {
            let Some(ic) = self.get(&var.name) else {
                continue;
            };
            let dofs = sys.dof_map();
            match var.family {
                VariableFamily::Lagrange => {
                    for &node in mesh.node_ids() {
                        if let Some(idx) = dofs.node_dofs(node, var.number) {
                            let v = ic.value(mesh.node(node)?);
                            writes.extend(idx.iter().map(|&d| (d, v)));
                        }
                    }
                }
                VariableFamily::Monomial => {
                    for (elem, _) in mesh.elements() {
                        if let Some(idx) = dofs.elem_dofs(elem, var.number) {
                            let v = ic.value(&centroid(mesh, elem)?);
                            writes.extend(idx.iter().map(|&d| (d, v)));
                        }
                    }
                }
                VariableFamily::Scalar => {
                    let v = ic.value(&origin);
                    writes.extend(dofs.scalar_dofs(var.number).iter().map(|&d| (d, v)));
                }
            }
        }
        let solution = sys.solution_mut().as_mut_slice();
        for &(dof, v) in &writes {
            let n_dofs = solution.len();
            *solution
                .get_mut(dof)
                .ok_or(CouplingError::DofOutOfRange { dof, n_dofs })? = v;
        }
        sys.update();
        log::debug!("projected {} initial dof values into '{}'", writes.len(), sys.name());
        Ok(writes.len())
    }
}

fn centroid(mesh: &Mesh, elem: crate::topology::PointId) -> Result<Vec<f64>, CouplingError> {
    let coords = mesh.element_coordinates(elem)?;
    let mut c = vec![0.0; mesh.dimension()];
    for xyz in &coords {
        for (dst, x) in c.iter_mut().zip(xyz) {
            *dst += x;
        }
    }
    let n = coords.len().max(1) as f64;
    c.iter_mut().for_each(|x| *x /= n);
    Ok(c)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;
    use crate::system::{VariableKind, VariableSpec};

    #[test]
    fn projection_samples_nodes_and_centroids() {
        let mesh = generation::line(2, 2.0).unwrap();
        let mut sys = FieldSystem::new("s", VariableKind::Nonlinear, 1);
        sys.add_variable(VariableSpec::lagrange("u")).unwrap();
        sys.add_variable(VariableSpec::monomial("k")).unwrap();
        sys.init(&mesh).unwrap();

        let mut ics = InitialConditions::new();
        ics.set("u", InitialCondition::new(|p| 2.0 * p[0]));
        ics.set("k", InitialCondition::new(|p| p[0] + 10.0));
        assert_eq!(ics.project(&mesh, &mut sys).unwrap(), 5);
        // u on nodes 0, 1, 2 then k on the two element centroids
        assert_eq!(sys.current_solution().as_slice(), &[0.0, 2.0, 4.0, 10.5, 11.5]);
    }

    #[test]
    fn missing_condition_reads_as_zero() {
        let mut ics = InitialConditions::new();
        ics.set("u", InitialCondition::constant(3.0).with_gradient(|_| vec![1.0, 2.0]));
        assert_eq!(ics.value("u", &[0.5, 0.5]), 3.0);
        assert_eq!(ics.gradient("u", &[0.5, 0.5]), vec![1.0, 2.0]);
        assert_eq!(ics.value("v", &[0.5, 0.5]), 0.0);
        assert_eq!(ics.gradient("v", &[0.5, 0.5]), vec![0.0, 0.0]);
        assert_eq!(InitialCondition::constant(1.0).gradient(&[0.0]), vec![0.0]);
    }

    #[test]
    fn projection_needs_distributed_dofs() {
        let mesh = generation::line(1, 1.0).unwrap();
        let mut sys = FieldSystem::new("s", VariableKind::Auxiliary, 1);
        assert!(matches!(
            InitialConditions::new().project(&mesh, &mut sys),
            Err(CouplingError::NotInitialized(_))
        ));
    }
}
