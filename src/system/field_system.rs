//! A named system of variables: dof map, solution history, and the
//! per-thread element values projected from the global solution.
//!
//! Control operations (`init`, `set_solution`, `update`, history shifts) take
//! `&mut self` and run on the controlling thread. The reinit family takes
//! `&self` plus a thread id and only touches that thread's slot.

use super::dof_map::DofMap;
use super::numeric::NumericVector;
use super::tensors::TaggedTensors;
use super::variable::{Variable, VariableFamily, VariableKind, VariableSpec};
use crate::coupling_error::CouplingError;
use crate::fe::FeValues;
use crate::mesh::Mesh;
use crate::tags::TagId;
use crate::topology::{BoundaryId, PointId};
use parking_lot::{Mutex, MutexGuard};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Values of one variable at the current evaluation points.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VariableValues {
    pub dof_indices: Vec<usize>,
    pub dof_values: Vec<f64>,
    pub dof_values_old: Vec<f64>,
    /// `[qp][component]`.
    pub u: Vec<Vec<f64>>,
    /// `[qp][component][dim]`.
    pub grad_u: Vec<Vec<Vec<f64>>>,
    /// `[qp][component]`.
    pub u_old: Vec<Vec<f64>>,
}

/// Dofs of one variable on the current element, as handed to assembly.
#[derive(Clone, Debug, PartialEq)]
pub struct VarDofs {
    pub var: usize,
    pub dof_indices: Vec<usize>,
    pub scale_factor: f64,
}

/// Per-thread evaluation state of a system.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ThreadValues {
    pub elem: Option<PointId>,
    pub side: Option<usize>,
    pub boundary_id: Option<BoundaryId>,
    pub neighbor: Option<PointId>,
    pub node: Option<PointId>,
    /// Keyed by variable number.
    pub current: BTreeMap<usize, VariableValues>,
    pub neighbor_values: BTreeMap<usize, VariableValues>,
    pub scalars: BTreeMap<usize, VariableValues>,
}

/// One system of variables on one mesh.
#[derive(Debug)]
pub struct FieldSystem {
    name: String,
    kind: VariableKind,
    variables: Vec<Variable>,
    dof_map: DofMap,
    solution: NumericVector,
    current_solution: NumericVector,
    old_solutions: Vec<NumericVector>,
    saved_old_solutions: Option<Vec<NumericVector>>,
    tensors: Arc<TaggedTensors>,
    time_vector_tag: Option<TagId>,
    non_time_vector_tag: Option<TagId>,
    threads: Vec<Mutex<ThreadValues>>,
    initialized: bool,
    n_updates: u64,
}

/// Time-history depth kept behind the current solution (old and older).
pub const HISTORY_DEPTH: usize = 2;

impl FieldSystem {
    /// Empty system with `n_threads` evaluation slots.
    pub fn new(name: impl Into<String>, kind: VariableKind, n_threads: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            variables: Vec::new(),
            dof_map: DofMap::default(),
            solution: NumericVector::default(),
            current_solution: NumericVector::default(),
            old_solutions: vec![NumericVector::default(); HISTORY_DEPTH],
            saved_old_solutions: None,
            tensors: Arc::new(TaggedTensors::default()),
            time_vector_tag: None,
            non_time_vector_tag: None,
            threads: (0..n_threads.max(1)).map(|_| Mutex::default()).collect(),
            initialized: false,
            n_updates: 0,
        }
    }

    /// A system named `name` with the same variables as `self`, sharing its
    /// tagged tensors. Dofs are distributed by [`FieldSystem::init`].
    pub fn mirror(&self, name: impl Into<String>, n_threads: usize) -> Self {
        let mut sys = Self::new(name, self.kind, n_threads);
        sys.variables = self.variables.clone();
        sys.tensors = Arc::clone(&self.tensors);
        sys.time_vector_tag = self.time_vector_tag;
        sys.non_time_vector_tag = self.non_time_vector_tag;
        sys
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> VariableKind {
        self.kind
    }

    pub fn n_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Declare a variable, returning its number.
    pub fn add_variable(&mut self, spec: VariableSpec) -> Result<usize, CouplingError> {
        if self.has_variable(&spec.name) {
            return Err(CouplingError::DuplicateVariable(spec.name));
        }
        let number = self.variables.len();
        self.variables
            .push(Variable::from_spec(spec, number, self.kind));
        Ok(number)
    }

    /// Declare a global scalar variable of `order` dofs.
    pub fn add_scalar_variable(
        &mut self,
        name: &str,
        order: usize,
        scale_factor: f64,
    ) -> Result<usize, CouplingError> {
        self.add_variable(VariableSpec::scalar(name, order).scale(scale_factor))
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    pub fn has_scalar_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name && v.is_scalar())
    }

    pub fn variable(&self, name: &str) -> Result<&Variable, CouplingError> {
        self.variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| CouplingError::VariableNotFound(name.to_string()))
    }

    pub fn variable_by_number(&self, number: usize) -> Option<&Variable> {
        self.variables.get(number)
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    pub fn dof_map(&self) -> &DofMap {
        &self.dof_map
    }

    pub fn dof_map_mut(&mut self) -> &mut DofMap {
        &mut self.dof_map
    }

    pub fn n_dofs(&self) -> usize {
        self.dof_map.n_dofs()
    }

    pub fn tensors(&self) -> &Arc<TaggedTensors> {
        &self.tensors
    }

    pub fn set_vector_tags(&mut self, time: TagId, non_time: TagId) {
        self.time_vector_tag = Some(time);
        self.non_time_vector_tag = Some(non_time);
    }

    pub fn time_vector_tag(&self) -> Result<TagId, CouplingError> {
        self.time_vector_tag
            .ok_or_else(|| CouplingError::UnknownVectorTag(crate::tags::TIME_TAG.to_string()))
    }

    pub fn non_time_vector_tag(&self) -> Result<TagId, CouplingError> {
        self.non_time_vector_tag
            .ok_or_else(|| CouplingError::UnknownVectorTag(crate::tags::NONTIME_TAG.to_string()))
    }

    /// Distribute dofs on `mesh` and size every vector to match.
    pub fn init(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        self.dof_map.distribute_dofs(mesh, &self.variables);
        self.dof_map.prepare_send_list();
        let n = self.dof_map.n_dofs();
        self.solution = NumericVector::new(n);
        self.current_solution = NumericVector::new(n);
        self.old_solutions = vec![NumericVector::new(n); HISTORY_DEPTH];
        self.saved_old_solutions = None;
        if self.tensors.n_dofs() < n {
            self.tensors.resize(n);
        }
        self.initialized = true;
        log::debug!("system '{}' initialized with {} dofs", self.name, n);
        Ok(())
    }

    /// Redistribute dofs after a topology change, keeping values whose
    /// indices survive.
    pub fn reinit_dofs(&mut self, mesh: &Mesh) -> Result<(), CouplingError> {
        if !self.initialized {
            return Err(CouplingError::NotInitialized("FieldSystem::reinit_dofs"));
        }
        self.dof_map.distribute_dofs(mesh, &self.variables);
        self.dof_map.prepare_send_list();
        let n = self.dof_map.n_dofs();
        self.solution.resize(n);
        self.current_solution.resize(n);
        self.old_solutions.iter_mut().for_each(|v| v.resize(n));
        self.saved_old_solutions = None;
        if self.tensors.n_dofs() < n {
            self.tensors.resize(n);
        }
        Ok(())
    }

    /// Global solution vector.
    pub fn solution(&self) -> &NumericVector {
        &self.solution
    }

    pub fn solution_mut(&mut self) -> &mut NumericVector {
        &mut self.solution
    }

    /// Local view refreshed by [`FieldSystem::update`]; what the reinit family reads.
    pub fn current_solution(&self) -> &NumericVector {
        &self.current_solution
    }

    pub fn solution_old(&self) -> &NumericVector {
        &self.old_solutions[0]
    }

    pub fn solution_older(&self) -> &NumericVector {
        &self.old_solutions[1]
    }

    /// Overwrite the solution; sizes must match the dof map.
    pub fn set_solution(&mut self, values: &NumericVector) -> Result<(), CouplingError> {
        if !self.initialized {
            return Err(CouplingError::NotInitialized("FieldSystem::set_solution"));
        }
        self.solution.assign(values, &self.name)
    }

    /// Overwrite the old solution; sizes must match the dof map.
    pub fn set_solution_old(&mut self, values: &NumericVector) -> Result<(), CouplingError> {
        self.old_solutions[0].assign(values, &self.name)
    }

    /// Refresh the local solution view from the global solution.
    pub fn update(&mut self) {
        self.current_solution.as_mut_slice().copy_from_slice(self.solution.as_slice());
        self.n_updates += 1;
    }

    /// Number of completed [`FieldSystem::update`] calls.
    pub fn n_updates(&self) -> u64 {
        self.n_updates
    }

    /// Shift history: older <- old <- current.
    pub fn copy_old_solutions(&mut self) {
        self.old_solutions.rotate_right(1);
        self.old_solutions[0]
            .as_mut_slice()
            .copy_from_slice(self.solution.as_slice());
    }

    /// Stash the old-solution ring so it can be restored later.
    pub fn save_old_solutions(&mut self) {
        self.saved_old_solutions = Some(self.old_solutions.clone());
    }

    /// Restore the ring stashed by [`FieldSystem::save_old_solutions`].
    pub fn restore_old_solutions(&mut self) {
        if let Some(saved) = self.saved_old_solutions.take() {
            self.old_solutions = saved;
        }
    }

    /// Value of component `component` of nodal `var` at `node`.
    ///
    /// `None` when the variable has no dof there.
    pub fn nodal_value(&self, node: PointId, var: usize, component: usize) -> Option<f64> {
        let dof = *self.dof_map.node_dofs(node, var)?.get(component)?;
        self.current_solution.as_slice().get(dof).copied()
    }

    /// Snapshot of thread `tid`'s evaluation state.
    pub fn thread_values(&self, tid: usize) -> Result<ThreadValues, CouplingError> {
        Ok(self.slot(tid)?.clone())
    }

    /// Dofs of every field variable on the current element of thread `tid`.
    pub fn element_dofs(&self, tid: usize) -> Result<Vec<VarDofs>, CouplingError> {
        let slot = self.slot(tid)?;
        Ok(self.collect_dofs(&slot.current))
    }

    /// Dofs of every field variable on the current neighbor of thread `tid`.
    pub fn neighbor_dofs(&self, tid: usize) -> Result<Vec<VarDofs>, CouplingError> {
        let slot = self.slot(tid)?;
        Ok(self.collect_dofs(&slot.neighbor_values))
    }

    /// Dofs of every scalar variable.
    pub fn scalar_var_dofs(&self) -> Vec<VarDofs> {
        self.variables
            .iter()
            .filter(|v| v.is_scalar())
            .map(|v| VarDofs {
                var: v.number,
                dof_indices: self.dof_map.scalar_dofs(v.number).to_vec(),
                scale_factor: v.scale_factor,
            })
            .collect()
    }

    /// Every dof of every field variable, for nonlocal coupling.
    pub fn all_dofs(&self) -> Vec<VarDofs> {
        self.variables
            .iter()
            .filter(|v| !v.is_scalar())
            .map(|v| VarDofs {
                var: v.number,
                dof_indices: self.dof_map.variable_dofs(v.number),
                scale_factor: v.scale_factor,
            })
            .collect()
    }

    /// Compute dof indices of every variable on `elem` for thread `tid`.
    pub fn prepare(&self, mesh: &Mesh, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        let current = self.dofs_on(mesh, elem)?;
        let mut slot = self.slot(tid)?;
        slot.elem = Some(elem);
        slot.side = None;
        slot.current = current;
        Ok(())
    }

    /// Refresh dof indices on `elem` ahead of a face evaluation.
    pub fn prepare_face(&self, mesh: &Mesh, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        self.prepare(mesh, elem, tid)
    }

    /// Compute dof indices on the neighbor element.
    pub fn prepare_neighbor(
        &self,
        mesh: &Mesh,
        neighbor: PointId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let values = self.dofs_on(mesh, neighbor)?;
        let mut slot = self.slot(tid)?;
        slot.neighbor = Some(neighbor);
        slot.neighbor_values = values;
        Ok(())
    }

    /// Evaluate every variable on `elem` at the volume points of `fe`.
    pub fn reinit_elem(
        &self,
        mesh: &Mesh,
        elem: PointId,
        fe: &FeValues,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let values = self.evaluate_on(mesh, elem, fe)?;
        let mut slot = self.slot(tid)?;
        slot.elem = Some(elem);
        slot.side = None;
        slot.boundary_id = None;
        slot.current = values;
        Ok(())
    }

    /// Evaluate every variable on side `side` of `elem`.
    pub fn reinit_elem_face(
        &self,
        mesh: &Mesh,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        fe_face: &FeValues,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let values = self.evaluate_on(mesh, elem, fe_face)?;
        let mut slot = self.slot(tid)?;
        slot.elem = Some(elem);
        slot.side = Some(side);
        slot.boundary_id = Some(bid);
        slot.current = values;
        Ok(())
    }

    /// Evaluate every variable on `neighbor` at the points of `fe_neighbor`.
    pub fn reinit_neighbor(
        &self,
        mesh: &Mesh,
        neighbor: PointId,
        fe_neighbor: &FeValues,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let values = self.evaluate_on(mesh, neighbor, fe_neighbor)?;
        let mut slot = self.slot(tid)?;
        slot.neighbor = Some(neighbor);
        slot.neighbor_values = values;
        Ok(())
    }

    /// Neighbor evaluation on a side; the side only matters for bookkeeping.
    pub fn reinit_neighbor_face(
        &self,
        mesh: &Mesh,
        neighbor: PointId,
        _neighbor_side: usize,
        bid: BoundaryId,
        fe_neighbor: &FeValues,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.reinit_neighbor(mesh, neighbor, fe_neighbor, tid)?;
        self.slot(tid)?.boundary_id = Some(bid);
        Ok(())
    }

    /// Nodal values of every nodal variable at `node`.
    pub fn reinit_node(&self, node: PointId, tid: usize) -> Result<(), CouplingError> {
        let values = self.nodal_values(&[node]);
        let mut slot = self.slot(tid)?;
        slot.node = Some(node);
        slot.boundary_id = None;
        slot.current = values;
        Ok(())
    }

    /// [`FieldSystem::reinit_node`] on a boundary node.
    pub fn reinit_node_face(
        &self,
        node: PointId,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.reinit_node(node, tid)?;
        self.slot(tid)?.boundary_id = Some(bid);
        Ok(())
    }

    /// Nodal values at several nodes, concatenated in `nodes` order.
    pub fn reinit_nodes(&self, nodes: &[PointId], tid: usize) -> Result<(), CouplingError> {
        let values = self.nodal_values(nodes);
        self.slot(tid)?.current = values;
        Ok(())
    }

    /// [`FieldSystem::reinit_nodes`] into the neighbor slot.
    pub fn reinit_nodes_neighbor(&self, nodes: &[PointId], tid: usize) -> Result<(), CouplingError> {
        let values = self.nodal_values(nodes);
        self.slot(tid)?.neighbor_values = values;
        Ok(())
    }

    /// Values of every scalar variable.
    pub fn reinit_scalars(&self, tid: usize) -> Result<(), CouplingError> {
        let mut scalars = BTreeMap::new();
        for var in self.variables.iter().filter(|v| v.is_scalar()) {
            let dofs = self.dof_map.scalar_dofs(var.number).to_vec();
            let mut vals = self.gather(&dofs);
            vals.u = vec![vals.dof_values.clone()];
            vals.u_old = vec![vals.dof_values_old.clone()];
            scalars.insert(var.number, vals);
        }
        self.slot(tid)?.scalars = scalars;
        Ok(())
    }

    fn slot(&self, tid: usize) -> Result<MutexGuard<'_, ThreadValues>, CouplingError> {
        self.threads
            .get(tid)
            .map(Mutex::lock)
            .ok_or(CouplingError::ThreadOutOfRange {
                tid,
                n_threads: self.threads.len(),
            })
    }

    fn collect_dofs(&self, values: &BTreeMap<usize, VariableValues>) -> Vec<VarDofs> {
        values
            .iter()
            .filter_map(|(&var, v)| {
                let variable = self.variables.get(var)?;
                Some(VarDofs {
                    var,
                    dof_indices: v.dof_indices.clone(),
                    scale_factor: variable.scale_factor,
                })
            })
            .collect()
    }

    fn gather(&self, dofs: &[usize]) -> VariableValues {
        let cur = self.current_solution.as_slice();
        let old = self.old_solutions[0].as_slice();
        VariableValues {
            dof_indices: dofs.to_vec(),
            dof_values: dofs.iter().map(|&d| cur.get(d).copied().unwrap_or(0.0)).collect(),
            dof_values_old: dofs.iter().map(|&d| old.get(d).copied().unwrap_or(0.0)).collect(),
            ..Default::default()
        }
    }

    fn dofs_on(
        &self,
        mesh: &Mesh,
        elem: PointId,
    ) -> Result<BTreeMap<usize, VariableValues>, CouplingError> {
        let e = mesh.elem(elem)?;
        Ok(self
            .variables
            .iter()
            .filter(|v| !v.is_scalar() && v.active_on(e.subdomain))
            .map(|v| {
                let dofs = self.dof_map.element_dofs(elem, &e.nodes, v);
                (v.number, self.gather(&dofs))
            })
            .collect())
    }

    fn evaluate_on(
        &self,
        mesh: &Mesh,
        elem: PointId,
        fe: &FeValues,
    ) -> Result<BTreeMap<usize, VariableValues>, CouplingError> {
        let mut values = self.dofs_on(mesh, elem)?;
        for (&var, vals) in values.iter_mut() {
            let Some(variable) = self.variables.get(var) else {
                continue;
            };
            interpolate(variable, fe, vals);
        }
        Ok(values)
    }

    fn nodal_values(&self, nodes: &[PointId]) -> BTreeMap<usize, VariableValues> {
        let mut out = BTreeMap::new();
        for var in self.variables.iter().filter(|v| v.is_nodal()) {
            let dofs: Vec<usize> = nodes
                .iter()
                .filter_map(|&n| self.dof_map.node_dofs(n, var.number))
                .flatten()
                .copied()
                .collect();
            if dofs.is_empty() {
                continue;
            }
            let mut vals = self.gather(&dofs);
            let nc = var.n_components;
            vals.u = vals.dof_values.chunks(nc).map(<[f64]>::to_vec).collect();
            vals.u_old = vals.dof_values_old.chunks(nc).map(<[f64]>::to_vec).collect();
            out.insert(var.number, vals);
        }
        out
    }
}

/// Fill `u`, `grad_u`, `u_old` of `vals` at the points of `fe`.
fn interpolate(var: &Variable, fe: &FeValues, vals: &mut VariableValues) {
    let nc = var.n_components;
    let n_qp = fe.n_points();
    let dim = fe.grad_phi.first().and_then(|g| g.first()).map_or(0, Vec::len);
    vals.u = vec![vec![0.0; nc]; n_qp];
    vals.u_old = vec![vec![0.0; nc]; n_qp];
    vals.grad_u = vec![vec![vec![0.0; dim]; nc]; n_qp];
    match var.family {
        VariableFamily::Lagrange => {
            let n_shapes = fe.n_shapes();
            if vals.dof_values.len() != n_shapes * nc {
                // Partially active element: leave zeros.
                return;
            }
            for qp in 0..n_qp {
                for c in 0..nc {
                    for i in 0..n_shapes {
                        let k = c * n_shapes + i;
                        let phi = fe.phi[qp][i];
                        vals.u[qp][c] += phi * vals.dof_values[k];
                        vals.u_old[qp][c] += phi * vals.dof_values_old[k];
                        for d in 0..dim {
                            vals.grad_u[qp][c][d] += fe.grad_phi[qp][i][d] * vals.dof_values[k];
                        }
                    }
                }
            }
        }
        VariableFamily::Monomial => {
            for qp in 0..n_qp {
                for c in 0..nc.min(vals.dof_values.len()) {
                    vals.u[qp][c] = vals.dof_values[c];
                    vals.u_old[qp][c] = vals.dof_values_old[c];
                }
            }
        }
        VariableFamily::Scalar => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fe::QuadratureRule;
    use crate::mesh::generation;
    use crate::topology::CellType;

    fn pid(raw: u64) -> PointId {
        PointId::new(raw).unwrap()
    }

    fn line_system() -> (Mesh, FieldSystem) {
        let mesh = generation::line(2, 2.0).unwrap();
        let mut sys = FieldSystem::new("nl0", VariableKind::Nonlinear, 2);
        sys.add_variable(VariableSpec::lagrange("u")).unwrap();
        sys.add_variable(VariableSpec::monomial("p")).unwrap();
        sys.init(&mesh).unwrap();
        (mesh, sys)
    }

    #[test]
    fn duplicate_variable_is_rejected() {
        let (_, mut sys) = line_system();
        assert_eq!(
            sys.add_variable(VariableSpec::lagrange("u")),
            Err(CouplingError::DuplicateVariable("u".into()))
        );
    }

    #[test]
    fn set_solution_checks_size_and_update_refreshes_view() {
        let (_, mut sys) = line_system();
        assert!(matches!(
            sys.set_solution(&NumericVector::new(2)),
            Err(CouplingError::SolutionSizeMismatch { expected: 5, found: 2, .. })
        ));
        sys.set_solution(&NumericVector::from_vec(vec![0.0, 1.0, 2.0, 7.0, 8.0]))
            .unwrap();
        assert_eq!(sys.nodal_value(pid(2), 0, 0), Some(0.0));
        sys.update();
        assert_eq!(sys.nodal_value(pid(2), 0, 0), Some(1.0));
        assert_eq!(sys.nodal_value(pid(2), 1, 0), None);
    }

    #[test]
    fn reinit_elem_interpolates_linear_field() {
        let (mesh, mut sys) = line_system();
        sys.set_solution(&NumericVector::from_vec(vec![0.0, 1.0, 2.0, 7.0, 8.0]))
            .unwrap();
        sys.update();
        let rule = QuadratureRule::for_cell("gauss2", CellType::Segment).unwrap();
        let elem = pid(5);
        let fe = FeValues::volume(CellType::Segment, &rule, &mesh.element_coordinates(elem).unwrap())
            .unwrap();
        sys.reinit_elem(&mesh, elem, &fe, 1).unwrap();
        let values = sys.thread_values(1).unwrap();
        let u = &values.current[&0];
        for (qp, x) in fe.q_points.iter().enumerate() {
            assert!((u.u[qp][0] - x[0]).abs() < 1e-12);
            assert!((u.grad_u[qp][0][0] - 1.0).abs() < 1e-12);
        }
        assert_eq!(values.current[&1].u[0][0], 8.0);
        assert!(sys.thread_values(0).unwrap().current.is_empty());
    }

    #[test]
    fn history_shift_and_restore() {
        let (_, mut sys) = line_system();
        sys.set_solution(&NumericVector::from_vec(vec![1.0; 5])).unwrap();
        sys.copy_old_solutions();
        sys.save_old_solutions();
        sys.set_solution(&NumericVector::from_vec(vec![2.0; 5])).unwrap();
        sys.copy_old_solutions();
        assert_eq!(sys.solution_old().as_slice(), &[2.0; 5]);
        assert_eq!(sys.solution_older().as_slice(), &[1.0; 5]);
        sys.restore_old_solutions();
        assert_eq!(sys.solution_old().as_slice(), &[1.0; 5]);
    }

    #[test]
    fn thread_out_of_range() {
        let (_, sys) = line_system();
        assert_eq!(
            sys.reinit_scalars(4),
            Err(CouplingError::ThreadOutOfRange { tid: 4, n_threads: 2 })
        );
    }
}
