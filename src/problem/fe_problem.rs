//! A concrete reference problem: one mesh, one nonlinear and one auxiliary
//! system, the tag registry, and the solver-facing flags.
//!
//! Every piece of state sits behind a lock or an atomic so the problem can be
//! shared through an `Arc` with the displaced problem that mirrors it and the
//! coupled problem that drives it.

use super::equation_systems::{EquationSystems, SharedClock};
use super::initial_condition::{InitialCondition, InitialConditions};
use super::reference::{CoordinateSystem, ReferenceProblem};
use crate::assembly::{AssemblyContext, CouplingMatrix};
use crate::config::QuadratureConfig;
use crate::coupling_error::CouplingError;
use crate::mesh::Mesh;
use crate::system::{
    FieldSystem, NumericVector, SparseMatrix, Variable, VariableKind, VariableSpec,
};
use crate::tags::{NONTIME_TAG, SYSTEM_TAG, TIME_TAG, TagRegistry};
use crate::topology::{BoundaryId, PointId, SubdomainId};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Solver callback run by [`FeProblem::solve`].
pub type SolveHook = Box<dyn FnMut(&FeProblem) -> Result<(), String> + Send>;

/// Reference finite-element problem.
pub struct FeProblem {
    name: String,
    mesh: RwLock<Mesh>,
    nl: RwLock<FieldSystem>,
    aux: RwLock<FieldSystem>,
    eq: RwLock<EquationSystems>,
    tags: TagRegistry,
    coupling: RwLock<CouplingMatrix>,
    coord_systems: RwLock<BTreeMap<SubdomainId, CoordinateSystem>>,
    ghosted_elems: RwLock<BTreeSet<PointId>>,
    ghosted_boundaries: RwLock<BTreeSet<BoundaryId>>,
    transient: AtomicBool,
    converged: AtomicBool,
    computing_initial_residual: AtomicBool,
    has_jacobian: AtomicBool,
    const_jacobian: AtomicBool,
    solve_hook: Mutex<Option<SolveHook>>,
    n_solves: AtomicUsize,
    assembly: RwLock<Vec<Mutex<AssemblyContext>>>,
    quadrature: RwLock<QuadratureConfig>,
    initial_conditions: RwLock<InitialConditions>,
}

impl std::fmt::Debug for FeProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeProblem")
            .field("name", &self.name)
            .field("n_nodes", &self.mesh.read().n_nodes())
            .field("nl_dofs", &self.nl.read().n_dofs())
            .field("aux_dofs", &self.aux.read().n_dofs())
            .field("transient", &self.is_transient())
            .finish()
    }
}

impl FeProblem {
    /// Problem on `mesh` with `n_threads` evaluation slots per system.
    pub fn new(name: impl Into<String>, mesh: Mesh, n_threads: usize) -> Self {
        let name = name.into();
        let tags = TagRegistry::with_defaults();
        let mut nl = FieldSystem::new(format!("{name}_nl"), VariableKind::Nonlinear, n_threads);
        let time = tags.add_vector_tag(TIME_TAG);
        let non_time = tags.add_vector_tag(NONTIME_TAG);
        nl.set_vector_tags(time, non_time);
        let aux = FieldSystem::new(format!("{name}_aux"), VariableKind::Auxiliary, n_threads);
        Self {
            name,
            mesh: RwLock::new(mesh),
            nl: RwLock::new(nl),
            aux: RwLock::new(aux),
            eq: RwLock::new(EquationSystems::new()),
            tags,
            coupling: RwLock::new(CouplingMatrix::default()),
            coord_systems: RwLock::new(BTreeMap::new()),
            ghosted_elems: RwLock::new(BTreeSet::new()),
            ghosted_boundaries: RwLock::new(BTreeSet::new()),
            transient: AtomicBool::new(false),
            converged: AtomicBool::new(false),
            computing_initial_residual: AtomicBool::new(false),
            has_jacobian: AtomicBool::new(false),
            const_jacobian: AtomicBool::new(false),
            solve_hook: Mutex::new(None),
            n_solves: AtomicUsize::new(0),
            assembly: RwLock::new(Vec::new()),
            quadrature: RwLock::new(QuadratureConfig::default()),
            initial_conditions: RwLock::new(InitialConditions::new()),
        }
    }

    pub fn add_variable(&self, spec: VariableSpec) -> Result<usize, CouplingError> {
        self.nl.write().add_variable(spec)
    }

    pub fn add_aux_variable(&self, spec: VariableSpec) -> Result<usize, CouplingError> {
        self.aux.write().add_variable(spec)
    }

    /// Distribute dofs of both systems and build one assembly context per
    /// evaluation slot.
    pub fn init(&self) -> Result<(), CouplingError> {
        let mesh = self.mesh.read();
        let mut nl = self.nl.write();
        let mut aux = self.aux.write();
        self.eq.write().init(&mesh, &mut [&mut *nl, &mut *aux])?;
        let quadrature = self.quadrature.read().clone();
        let coupling = self.coupling.read().clone();
        let contexts = (0..nl.n_threads())
            .map(|tid| -> Result<_, CouplingError> {
                let mut ctx = AssemblyContext::new(tid, &quadrature)?;
                ctx.init(coupling.clone());
                Ok(Mutex::new(ctx))
            })
            .collect::<Result<Vec<_>, _>>()?;
        *self.assembly.write() = contexts;
        log::debug!("problem '{}' initialized", self.name);
        Ok(())
    }

    /// Quadrature used by contexts built at the next [`FeProblem::init`].
    pub fn set_quadrature(&self, quadrature: QuadratureConfig) {
        *self.quadrature.write() = quadrature;
    }

    /// Run `f` on the assembly context of thread `tid`.
    pub fn with_assembly<R>(
        &self,
        tid: usize,
        f: impl FnOnce(&mut AssemblyContext) -> Result<R, CouplingError>,
    ) -> Result<R, CouplingError> {
        let contexts = self.assembly.read();
        if contexts.is_empty() {
            return Err(CouplingError::NotInitialized("FeProblem assembly"));
        }
        let ctx = contexts.get(tid).ok_or(CouplingError::ThreadOutOfRange {
            tid,
            n_threads: contexts.len(),
        })?;
        f(&mut ctx.lock())
    }

    /// Switch the rules of thread `tid` to `volume` and `face`.
    pub fn attach_quadrature_rule(&self, volume: &str, face: &str, tid: usize) -> Result<(), CouplingError> {
        self.with_assembly(tid, |ctx| ctx.create_qrules(volume, face))
    }

    /// Evaluate both systems on `elem` at its quadrature points.
    pub fn reinit_elem(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        let mesh = self.mesh.read();
        self.with_assembly(tid, |ctx| {
            ctx.reinit_elem(&mesh, elem)?;
            self.nl.read().reinit_elem(&mesh, elem, ctx.fe(), tid)?;
            self.aux.read().reinit_elem(&mesh, elem, ctx.fe(), tid)
        })
    }

    pub fn reinit_elem_face(
        &self,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        let mesh = self.mesh.read();
        self.with_assembly(tid, |ctx| {
            ctx.reinit_elem_face(&mesh, elem, side)?;
            self.nl
                .read()
                .reinit_elem_face(&mesh, elem, side, bid, ctx.fe_face(), tid)?;
            self.aux
                .read()
                .reinit_elem_face(&mesh, elem, side, bid, ctx.fe_face(), tid)
        })
    }

    pub fn reinit_node(&self, node: PointId, tid: usize) -> Result<(), CouplingError> {
        let mesh = self.mesh.read();
        self.with_assembly(tid, |ctx| {
            ctx.reinit_node(&mesh, node)?;
            self.nl.read().reinit_node(node, tid)?;
            self.aux.read().reinit_node(node, tid)
        })
    }

    pub fn reinit_node_face(&self, node: PointId, bid: BoundaryId, tid: usize) -> Result<(), CouplingError> {
        let mesh = self.mesh.read();
        self.with_assembly(tid, |ctx| {
            ctx.reinit_node(&mesh, node)?;
            self.nl.read().reinit_node_face(node, bid, tid)?;
            self.aux.read().reinit_node_face(node, bid, tid)
        })
    }

    /// `name` from the nonlinear system, else the auxiliary one.
    pub fn get_variable(&self, tid: usize, name: &str) -> Result<Variable, CouplingError> {
        let nl = self.nl.read();
        if tid >= nl.n_threads() {
            return Err(CouplingError::ThreadOutOfRange {
                tid,
                n_threads: nl.n_threads(),
            });
        }
        if let Ok(var) = nl.variable(name) {
            return Ok(var.clone());
        }
        self.aux.read().variable(name).cloned()
    }

    /// Give `var` an initial condition; it must be declared in either system.
    pub fn set_initial_condition(&self, var: &str, ic: InitialCondition) -> Result<(), CouplingError> {
        if !ReferenceProblem::has_variable(self, var) {
            return Err(CouplingError::VariableNotFound(var.to_string()));
        }
        self.initial_conditions.write().set(var, ic);
        Ok(())
    }

    /// The system called `system`, checked to declare `var`.
    fn system_declaring(
        &self,
        system: &str,
        var: &str,
    ) -> Result<&RwLock<FieldSystem>, CouplingError> {
        let sys = self.system_named(system)?;
        sys.read().variable(var)?;
        Ok(sys)
    }

    fn system_named(&self, system: &str) -> Result<&RwLock<FieldSystem>, CouplingError> {
        [&self.nl, &self.aux]
            .into_iter()
            .find(|s| s.read().name() == system)
            .ok_or_else(|| CouplingError::SystemNotFound(system.to_string()))
    }

    /// Initial value of `var` of `system` at `point`.
    pub fn initial_value(&self, point: &[f64], system: &str, var: &str) -> Result<f64, CouplingError> {
        self.system_declaring(system, var)?;
        Ok(self.initial_conditions.read().value(var, point))
    }

    pub fn initial_gradient(
        &self,
        point: &[f64],
        system: &str,
        var: &str,
    ) -> Result<Vec<f64>, CouplingError> {
        self.system_declaring(system, var)?;
        Ok(self.initial_conditions.read().gradient(var, point))
    }

    /// Project every initial condition of `system` into its solution.
    pub fn initial_condition(&self, system: &str) -> Result<(), CouplingError> {
        let sys = self.system_named(system)?;
        let mesh = self.mesh.read();
        self.initial_conditions.read().project(&mesh, &mut sys.write())?;
        Ok(())
    }

    /// Simulation clock of this problem.
    pub fn clock(&self) -> SharedClock {
        self.eq.read().clock()
    }

    pub fn set_clock(&self, clock: SharedClock) {
        self.eq.write().set_clock(clock);
    }

    pub fn set_coupling(&self, coupling: CouplingMatrix) {
        *self.coupling.write() = coupling;
    }

    pub fn set_coord_system(&self, subdomain: SubdomainId, coord: CoordinateSystem) {
        self.coord_systems.write().insert(subdomain, coord);
    }

    pub fn set_transient(&self, transient: bool) {
        self.transient.store(transient, Ordering::Relaxed);
    }

    pub fn set_computing_initial_residual(&self, value: bool) {
        self.computing_initial_residual.store(value, Ordering::Relaxed);
    }

    /// Declare whether the Jacobian stays fixed after its first assembly.
    pub fn set_const_jacobian(&self, value: bool) {
        self.const_jacobian.store(value, Ordering::Relaxed);
    }

    /// Install the callback that [`FeProblem::solve`] runs.
    pub fn set_solve_hook(&self, hook: SolveHook) {
        *self.solve_hook.lock() = Some(hook);
    }

    /// Run the solve hook, or mark converged if none is installed.
    pub fn solve(&self) -> Result<(), CouplingError> {
        let mut hook = self.solve_hook.lock().take();
        let result = match hook.as_mut() {
            Some(f) => f(self),
            None => Ok(()),
        };
        if let Some(f) = hook {
            self.solve_hook.lock().get_or_insert(f);
        }
        self.n_solves.fetch_add(1, Ordering::Relaxed);
        self.converged.store(result.is_ok(), Ordering::Relaxed);
        result.map_err(|reason| CouplingError::Solve {
            problem: self.name.clone(),
            reason,
        })
    }

    pub fn n_solves(&self) -> usize {
        self.n_solves.load(Ordering::Relaxed)
    }

    /// Refresh the current-solution view of both systems.
    pub fn update(&self) {
        self.nl.write().update();
        self.aux.write().update();
    }

    /// Shift current solutions into the old-solution history.
    pub fn copy_solutions_backwards(&self) {
        self.nl.write().copy_old_solutions();
        self.aux.write().copy_old_solutions();
    }

    /// Sum of every tagged residual vector assembled so far.
    pub fn compute_residual(&self) -> NumericVector {
        let tags = self.tags.vector_tags();
        self.nl.read().tensors().sum_vectors(&tags)
    }

    /// The `SYSTEM` Jacobian, marking that a Jacobian now exists.
    pub fn compute_jacobian(&self) -> Result<SparseMatrix, CouplingError> {
        let tag = self.tags.get_matrix_tag_id(SYSTEM_TAG)?;
        let nl = self.nl.read();
        let jac = nl
            .tensors()
            .matrix(tag)
            .unwrap_or_else(|| SparseMatrix::new(nl.n_dofs()));
        self.has_jacobian.store(true, Ordering::Relaxed);
        Ok(jac)
    }
}

impl ReferenceProblem for FeProblem {
    fn name(&self) -> &str {
        &self.name
    }

    fn mesh(&self) -> &RwLock<Mesh> {
        &self.mesh
    }

    fn nonlinear_system(&self) -> &RwLock<FieldSystem> {
        &self.nl
    }

    fn auxiliary_system(&self) -> &RwLock<FieldSystem> {
        &self.aux
    }

    fn tags(&self) -> &TagRegistry {
        &self.tags
    }

    fn coupling(&self) -> CouplingMatrix {
        self.coupling.read().clone()
    }

    fn coord_system(&self, subdomain: SubdomainId) -> CoordinateSystem {
        self.coord_systems
            .read()
            .get(&subdomain)
            .copied()
            .unwrap_or_default()
    }

    fn add_ghosted_elem(&self, elem: PointId) {
        self.ghosted_elems.write().insert(elem);
    }

    fn add_ghosted_boundary(&self, boundary: BoundaryId) {
        self.ghosted_boundaries.write().insert(boundary);
    }

    fn ghost_ghosted_boundaries(&self) {
        let boundaries = self.ghosted_boundaries.read().clone();
        let mesh = self.mesh.read();
        let mut ghosted = self.ghosted_elems.write();
        for (id, e) in mesh.elements() {
            let touches = (0..e.neighbors.len())
                .any(|side| mesh.boundary_ids(id, side).iter().any(|b| boundaries.contains(b)));
            if touches {
                ghosted.insert(id);
            }
        }
    }

    fn ghosted_elems(&self) -> Vec<PointId> {
        self.ghosted_elems.read().iter().copied().collect()
    }

    fn is_transient(&self) -> bool {
        self.transient.load(Ordering::Relaxed)
    }

    fn converged(&self) -> bool {
        self.converged.load(Ordering::Relaxed)
    }

    fn computing_initial_residual(&self) -> bool {
        self.computing_initial_residual.load(Ordering::Relaxed)
    }

    fn has_jacobian(&self) -> bool {
        self.has_jacobian.load(Ordering::Relaxed)
    }

    fn const_jacobian(&self) -> bool {
        self.const_jacobian.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::generation;

    #[test]
    fn default_tags_are_registered_once() {
        let p = FeProblem::new("ref", generation::line(1, 1.0).unwrap(), 1);
        assert_eq!(p.tags().num_vector_tags(), 2);
        assert_eq!(p.tags().get_matrix_tag_id("system").unwrap(), 0);
        let nl = p.nonlinear_system().read();
        assert_eq!(nl.time_vector_tag().unwrap(), 0);
        assert_eq!(nl.non_time_vector_tag().unwrap(), 1);
    }

    #[test]
    fn solve_hook_failure_is_reported() {
        let p = FeProblem::new("ref", generation::line(1, 1.0).unwrap(), 1);
        p.solve().unwrap();
        assert!(p.converged());
        p.set_solve_hook(Box::new(|_| Err("diverged".to_string())));
        let err = p.solve().unwrap_err();
        assert_eq!(
            err,
            CouplingError::Solve {
                problem: "ref".into(),
                reason: "diverged".into()
            }
        );
        assert!(!p.converged());
        assert_eq!(p.n_solves(), 2);
    }

    #[test]
    fn ghosted_boundaries_pull_in_their_elements() {
        let p = FeProblem::new("ref", generation::line(3, 3.0).unwrap(), 1);
        p.add_ghosted_boundary(1);
        p.ghost_ghosted_boundaries();
        assert_eq!(p.ghosted_elems(), vec![PointId::new(7).unwrap()]);
    }

    #[test]
    fn assembly_exists_only_after_init() {
        let p = FeProblem::new("ref", generation::line(2, 2.0).unwrap(), 2);
        p.add_variable(VariableSpec::lagrange("u")).unwrap();
        let elem = PointId::new(4).unwrap();
        assert!(matches!(
            p.reinit_elem(elem, 0),
            Err(CouplingError::NotInitialized(_))
        ));
        p.init().unwrap();
        p.reinit_elem(elem, 1).unwrap();
        assert_eq!(p.with_assembly(1, |ctx| Ok(ctx.q_points().len())).unwrap(), 2);
        assert_eq!(p.nonlinear_system().read().thread_values(1).unwrap().elem, Some(elem));
        assert_eq!(
            p.reinit_elem(elem, 2).unwrap_err(),
            CouplingError::ThreadOutOfRange { tid: 2, n_threads: 2 }
        );
    }

    #[test]
    fn configured_quadrature_applies_at_init() {
        let p = FeProblem::new("ref", generation::line(1, 1.0).unwrap(), 1);
        p.set_quadrature(QuadratureConfig {
            volume: "gauss3".into(),
            ..Default::default()
        });
        p.init().unwrap();
        p.reinit_elem(PointId::new(3).unwrap(), 0).unwrap();
        assert_eq!(p.with_assembly(0, |ctx| Ok(ctx.q_points().len())).unwrap(), 3);
    }

    #[test]
    fn initial_condition_fills_the_named_system_only() {
        let p = FeProblem::new("ref", generation::line(2, 2.0).unwrap(), 1);
        p.add_variable(VariableSpec::lagrange("u")).unwrap();
        p.add_aux_variable(VariableSpec::monomial("k")).unwrap();
        p.init().unwrap();
        p.set_initial_condition("u", InitialCondition::constant(2.0)).unwrap();
        p.set_initial_condition("k", InitialCondition::constant(7.0)).unwrap();

        p.initial_condition("ref_aux").unwrap();
        assert_eq!(p.auxiliary_system().read().solution().as_slice(), &[7.0, 7.0]);
        assert_eq!(p.nonlinear_system().read().solution().as_slice(), &[0.0; 3]);
        assert_eq!(
            p.initial_condition("ref").unwrap_err(),
            CouplingError::SystemNotFound("ref".into())
        );
        assert_eq!(p.get_variable(0, "k").unwrap().name, "k");
    }
}
