//! Composition of independent sub-problems advanced in a declared order.

use super::displaced::DisplacedProblem;
use super::equation_systems::{EquationSystems, SharedClock};
use super::fe_problem::FeProblem;
use super::reference::ReferenceProblem;
use crate::config::CoupledProblemConfig;
use crate::coupling_error::CouplingError;
use crate::system::{FieldSystem, NumericVector, SparseMatrix, Variable};
use crate::topology::{BoundaryId, PointId};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// One participant of a [`CoupledProblem`].
pub trait SubProblem: Send + Sync {
    fn name(&self) -> &str;

    /// One-time setup, run in solve order by [`CoupledProblem::init`].
    fn init(&mut self) -> Result<(), CouplingError>;

    /// The solve/update step run once per coupled update.
    fn update(&mut self) -> Result<(), CouplingError>;

    fn has_variable(&self, name: &str) -> bool;

    /// Names of the systems this sub-problem owns.
    fn system_names(&self) -> Vec<String>;

    fn copy_solutions_backwards(&mut self);

    fn set_transient(&mut self, transient: bool);

    /// Follow `clock` from now on.
    fn attach_clock(&mut self, clock: SharedClock);

    fn compute_residual(&self, system: &str) -> Result<NumericVector, CouplingError>;

    fn compute_jacobian(&self, system: &str) -> Result<SparseMatrix, CouplingError>;

    fn summary(&self) -> SubProblemSummary;

    /// The concrete sub-problem, for [`CoupledProblem::sub_problem_as`].
    fn as_any(&self) -> &dyn Any;

    fn get_variable(&self, _tid: usize, name: &str) -> Result<Variable, CouplingError> {
        Err(CouplingError::VariableNotFound(name.to_string()))
    }

    /// Switch the quadrature of thread `tid`. Sub-problems that do not
    /// assemble accept and ignore it, as they do the reinit family below.
    fn attach_quadrature_rule(&self, _volume: &str, _face: &str, _tid: usize) -> Result<(), CouplingError> {
        Ok(())
    }

    fn reinit_elem(&self, _elem: PointId, _tid: usize) -> Result<(), CouplingError> {
        Ok(())
    }

    fn reinit_elem_face(
        &self,
        _elem: PointId,
        _side: usize,
        _bid: BoundaryId,
        _tid: usize,
    ) -> Result<(), CouplingError> {
        Ok(())
    }

    fn reinit_node(&self, _node: PointId, _tid: usize) -> Result<(), CouplingError> {
        Ok(())
    }

    fn reinit_node_face(&self, _node: PointId, _bid: BoundaryId, _tid: usize) -> Result<(), CouplingError> {
        Ok(())
    }

    fn initial_value(&self, _point: &[f64], system: &str, _var: &str) -> Result<f64, CouplingError> {
        Err(unknown_system(system))
    }

    fn initial_gradient(&self, _point: &[f64], system: &str, _var: &str) -> Result<Vec<f64>, CouplingError> {
        Err(unknown_system(system))
    }

    /// Set the initial state of `system`.
    fn initial_condition(&mut self, system: &str) -> Result<(), CouplingError> {
        Err(unknown_system(system))
    }
}

/// Per-system line of a [`CoupledProblemDump`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub name: String,
    pub n_dofs: usize,
    pub variables: Vec<String>,
}

impl SystemSummary {
    fn of(sys: &FieldSystem) -> Self {
        Self {
            name: sys.name().to_string(),
            n_dofs: sys.n_dofs(),
            variables: sys.variable_names(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SubProblemSummary {
    pub name: String,
    pub systems: Vec<SystemSummary>,
}

/// Structured snapshot returned by [`CoupledProblem::dump`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoupledProblemDump {
    pub time: f64,
    pub time_step: u64,
    pub dt: f64,
    pub dt_old: f64,
    pub transient: bool,
    pub solve_order: Vec<String>,
    pub sub_problems: Vec<SubProblemSummary>,
}

fn unknown_system(system: &str) -> CouplingError {
    CouplingError::SystemNotFound(system.to_string())
}

impl SubProblem for Arc<FeProblem> {
    fn name(&self) -> &str {
        ReferenceProblem::name(self.as_ref())
    }

    fn init(&mut self) -> Result<(), CouplingError> {
        FeProblem::init(self)
    }

    fn update(&mut self) -> Result<(), CouplingError> {
        self.solve()?;
        FeProblem::update(self);
        Ok(())
    }

    fn has_variable(&self, name: &str) -> bool {
        ReferenceProblem::has_variable(self.as_ref(), name)
    }

    fn system_names(&self) -> Vec<String> {
        vec![
            self.nonlinear_system().read().name().to_string(),
            self.auxiliary_system().read().name().to_string(),
        ]
    }

    fn copy_solutions_backwards(&mut self) {
        FeProblem::copy_solutions_backwards(self);
    }

    fn set_transient(&mut self, transient: bool) {
        FeProblem::set_transient(self, transient);
    }

    fn attach_clock(&mut self, clock: SharedClock) {
        self.set_clock(clock);
    }

    fn compute_residual(&self, system: &str) -> Result<NumericVector, CouplingError> {
        if self.nonlinear_system().read().name() == system {
            Ok(FeProblem::compute_residual(self))
        } else {
            Err(unknown_system(system))
        }
    }

    fn compute_jacobian(&self, system: &str) -> Result<SparseMatrix, CouplingError> {
        if self.nonlinear_system().read().name() == system {
            FeProblem::compute_jacobian(self)
        } else {
            Err(unknown_system(system))
        }
    }

    fn summary(&self) -> SubProblemSummary {
        SubProblemSummary {
            name: SubProblem::name(self).to_string(),
            systems: vec![
                SystemSummary::of(&self.nonlinear_system().read()),
                SystemSummary::of(&self.auxiliary_system().read()),
            ],
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_variable(&self, tid: usize, name: &str) -> Result<Variable, CouplingError> {
        FeProblem::get_variable(self, tid, name)
    }

    fn attach_quadrature_rule(&self, volume: &str, face: &str, tid: usize) -> Result<(), CouplingError> {
        FeProblem::attach_quadrature_rule(self, volume, face, tid)
    }

    fn reinit_elem(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        FeProblem::reinit_elem(self, elem, tid)
    }

    fn reinit_elem_face(
        &self,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        FeProblem::reinit_elem_face(self, elem, side, bid, tid)
    }

    fn reinit_node(&self, node: PointId, tid: usize) -> Result<(), CouplingError> {
        FeProblem::reinit_node(self, node, tid)
    }

    fn reinit_node_face(&self, node: PointId, bid: BoundaryId, tid: usize) -> Result<(), CouplingError> {
        FeProblem::reinit_node_face(self, node, bid, tid)
    }

    fn initial_value(&self, point: &[f64], system: &str, var: &str) -> Result<f64, CouplingError> {
        FeProblem::initial_value(self, point, system, var)
    }

    fn initial_gradient(&self, point: &[f64], system: &str, var: &str) -> Result<Vec<f64>, CouplingError> {
        FeProblem::initial_gradient(self, point, system, var)
    }

    fn initial_condition(&mut self, system: &str) -> Result<(), CouplingError> {
        FeProblem::initial_condition(self, system)
    }
}

impl SubProblem for DisplacedProblem {
    fn name(&self) -> &str {
        DisplacedProblem::name(self)
    }

    fn init(&mut self) -> Result<(), CouplingError> {
        DisplacedProblem::init(self)
    }

    /// Follow the reference solution onto the displaced geometry.
    fn update(&mut self) -> Result<(), CouplingError> {
        self.update_mesh()
    }

    fn has_variable(&self, name: &str) -> bool {
        DisplacedProblem::has_variable(self, name)
    }

    fn system_names(&self) -> Vec<String> {
        vec![self.nl().name().to_string(), self.aux().name().to_string()]
    }

    fn copy_solutions_backwards(&mut self) {
        DisplacedProblem::copy_solutions_backwards(self);
    }

    /// Transience belongs to the reference problem.
    fn set_transient(&mut self, _transient: bool) {}

    fn attach_clock(&mut self, clock: SharedClock) {
        self.eq_mut().set_clock(clock);
    }

    fn compute_residual(&self, system: &str) -> Result<NumericVector, CouplingError> {
        if self.nl().name() == system {
            Ok(DisplacedProblem::compute_residual(self))
        } else {
            Err(unknown_system(system))
        }
    }

    fn compute_jacobian(&self, system: &str) -> Result<SparseMatrix, CouplingError> {
        if self.nl().name() == system {
            DisplacedProblem::compute_jacobian(self)
        } else {
            Err(unknown_system(system))
        }
    }

    fn summary(&self) -> SubProblemSummary {
        SubProblemSummary {
            name: self.name().to_string(),
            systems: vec![SystemSummary::of(self.nl()), SystemSummary::of(self.aux())],
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn get_variable(&self, tid: usize, name: &str) -> Result<Variable, CouplingError> {
        DisplacedProblem::get_variable(self, tid, name).cloned()
    }

    fn attach_quadrature_rule(&self, volume: &str, face: &str, tid: usize) -> Result<(), CouplingError> {
        self.assembly(tid)?.create_qrules(volume, face)
    }

    fn reinit_elem(&self, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        DisplacedProblem::reinit_elem(self, elem, tid)
    }

    fn reinit_elem_face(
        &self,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        DisplacedProblem::reinit_elem_face(self, elem, side, bid, tid)
    }

    fn reinit_node(&self, node: PointId, tid: usize) -> Result<(), CouplingError> {
        DisplacedProblem::reinit_node(self, node, tid)
    }

    fn reinit_node_face(&self, node: PointId, bid: BoundaryId, tid: usize) -> Result<(), CouplingError> {
        DisplacedProblem::reinit_node_face(self, node, bid, tid)
    }

    /// Displaced systems start from the reference solution.
    fn initial_condition(&mut self, system: &str) -> Result<(), CouplingError> {
        if self.nl().name() == system || self.aux().name() == system {
            self.sync_solutions()
        } else {
            Err(unknown_system(system))
        }
    }
}

/// Named sub-problems sharing one clock, advanced in a declared order.
pub struct CoupledProblem {
    config: CoupledProblemConfig,
    sub_problems: BTreeMap<String, Box<dyn SubProblem>>,
    registration: Vec<String>,
    solve_order: Vec<String>,
    /// System name to the sub-problem owning it.
    system_owners: BTreeMap<String, String>,
    eq: EquationSystems,
    transient: bool,
}

impl std::fmt::Debug for CoupledProblem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoupledProblem")
            .field("sub_problems", &self.registration)
            .field("solve_order", &self.solve_order)
            .field("transient", &self.transient)
            .finish()
    }
}

impl Default for CoupledProblem {
    fn default() -> Self {
        Self::new(CoupledProblemConfig::default())
    }
}

impl CoupledProblem {
    /// Empty composition; the configured solve order is applied by
    /// [`CoupledProblem::init`] once sub-problems are registered.
    pub fn new(config: CoupledProblemConfig) -> Self {
        let eq = EquationSystems::new();
        eq.clock().write().dt = config.dt;
        Self {
            config,
            sub_problems: BTreeMap::new(),
            registration: Vec::new(),
            solve_order: Vec::new(),
            system_owners: BTreeMap::new(),
            eq,
            transient: false,
        }
    }

    /// The container owning the shared clock and recording every
    /// sub-problem system.
    pub fn eq(&self) -> &EquationSystems {
        &self.eq
    }

    pub fn clock(&self) -> SharedClock {
        self.eq.clock()
    }

    /// Register `sub` under `name`, record its systems and hand it the
    /// shared clock.
    ///
    /// System names are unique across sub-problems; nothing is registered
    /// when one is already taken.
    pub fn add_sub_problem(
        &mut self,
        name: impl Into<String>,
        mut sub: Box<dyn SubProblem>,
    ) -> Result<(), CouplingError> {
        let name = name.into();
        if self.sub_problems.contains_key(&name) {
            return Err(CouplingError::DuplicateSubProblem(name));
        }
        let systems = sub.system_names();
        for system in &systems {
            if let Some(owner) = self.system_owners.get(system) {
                return Err(CouplingError::DuplicateSystem {
                    system: system.clone(),
                    owner: owner.clone(),
                });
            }
        }
        sub.attach_clock(self.eq.clock());
        sub.set_transient(self.transient);
        for system in systems {
            self.system_owners.insert(system, name.clone());
        }
        log::debug!("registered sub-problem '{name}'");
        self.registration.push(name.clone());
        self.sub_problems.insert(name, sub);
        self.refresh_systems();
        Ok(())
    }

    /// Re-read the dof count of every owned system into [`Self::eq`].
    fn refresh_systems(&mut self) {
        for sub in self.sub_problems.values() {
            for sys in sub.summary().systems {
                if self.system_owners.contains_key(&sys.name) {
                    self.eq.register_system(sys.name, sys.n_dofs);
                }
            }
        }
    }

    pub fn sub_problem(&self, name: &str) -> Result<&dyn SubProblem, CouplingError> {
        self.sub_problems
            .get(name)
            .map(Box::as_ref)
            .ok_or_else(|| CouplingError::UnknownSubProblem(name.to_string()))
    }

    pub fn sub_problem_mut(&mut self, name: &str) -> Result<&mut (dyn SubProblem + 'static), CouplingError> {
        self.sub_problems
            .get_mut(name)
            .map(Box::as_mut)
            .ok_or_else(|| CouplingError::UnknownSubProblem(name.to_string()))
    }

    /// `name` downcast to the type it was registered as.
    pub fn sub_problem_as<T: Any>(&self, name: &str) -> Result<&T, CouplingError> {
        self.sub_problem(name)?
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| CouplingError::UnknownSubProblem(name.to_string()))
    }

    pub fn n_sub_problems(&self) -> usize {
        self.sub_problems.len()
    }

    /// Replace the solve order wholesale.
    ///
    /// Every entry must name a registered sub-problem exactly once. Unless
    /// partial orders are allowed, every registered sub-problem must appear.
    /// On error the previous order is kept.
    pub fn set_solve_order<S: Into<String>>(
        &mut self,
        order: impl IntoIterator<Item = S>,
    ) -> Result<(), CouplingError> {
        let order: Vec<String> = order.into_iter().map(Into::into).collect();
        let mut seen = BTreeSet::new();
        for name in &order {
            if !self.sub_problems.contains_key(name) {
                return Err(CouplingError::UnknownSubProblem(name.clone()));
            }
            if !seen.insert(name.as_str()) {
                return Err(CouplingError::DuplicateSolveOrderEntry(name.clone()));
            }
        }
        if !self.config.allow_partial_solve_order {
            let missing: Vec<String> = self
                .registration
                .iter()
                .filter(|n| !seen.contains(n.as_str()))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(CouplingError::IncompleteSolveOrder(missing));
            }
        }
        log::debug!("solve order set to {order:?}");
        self.solve_order = order;
        Ok(())
    }

    /// The declared order, or registration order if none was declared.
    pub fn solve_order(&self) -> &[String] {
        if self.solve_order.is_empty() {
            &self.registration
        } else {
            &self.solve_order
        }
    }

    /// Apply the configured order, then initialize every sub-problem in
    /// solve order.
    pub fn init(&mut self) -> Result<(), CouplingError> {
        if !self.config.solve_order.is_empty() && self.solve_order.is_empty() {
            let order = self.config.solve_order.clone();
            self.set_solve_order(order)?;
        }
        for name in self.solve_order().to_vec() {
            self.sub_problem_mut(&name)?.init()?;
        }
        self.refresh_systems();
        log::debug!(
            "coupled problem initialized: {:?}, {} systems",
            self.solve_order(),
            self.eq.n_systems()
        );
        Ok(())
    }

    /// Run each sub-problem's update step once, in solve order.
    pub fn update(&mut self) -> Result<(), CouplingError> {
        for name in self.solve_order().to_vec() {
            log::trace!("updating sub-problem '{name}'");
            self.sub_problem_mut(&name)?.update()?;
        }
        Ok(())
    }

    pub fn transient(&self) -> bool {
        self.transient
    }

    pub fn set_transient(&mut self, transient: bool) {
        self.transient = transient;
        for sub in self.sub_problems.values_mut() {
            sub.set_transient(transient);
        }
    }

    pub fn time(&self) -> f64 {
        self.eq.clock().read().time
    }

    pub fn set_time(&self, time: f64) {
        self.eq.clock().write().time = time;
    }

    pub fn time_step(&self) -> u64 {
        self.eq.clock().read().t_step
    }

    pub fn dt(&self) -> f64 {
        self.eq.clock().read().dt
    }

    pub fn dt_old(&self) -> f64 {
        self.eq.clock().read().dt_old
    }

    pub fn set_dt(&self, dt: f64) {
        self.eq.clock().write().set_dt(dt);
    }

    /// Advance the shared clock by one step.
    pub fn advance(&self) {
        self.eq.clock().write().advance();
    }

    pub fn copy_solutions_backwards(&mut self) {
        for sub in self.sub_problems.values_mut() {
            sub.copy_solutions_backwards();
        }
    }

    pub fn has_variable(&self, name: &str) -> bool {
        self.sub_problems.values().any(|s| s.has_variable(name))
    }

    /// First sub-problem in solve order declaring `var`.
    pub fn variable_owner(&self, var: &str) -> Result<&str, CouplingError> {
        self.solve_order()
            .iter()
            .chain(self.registration.iter())
            .find(|n| self.sub_problems.get(n.as_str()).is_some_and(|s| s.has_variable(var)))
            .map(String::as_str)
            .ok_or_else(|| CouplingError::VariableNotFound(var.to_string()))
    }

    /// Sub-problem owning the system called `system`.
    pub fn system_owner(&self, system: &str) -> Result<&str, CouplingError> {
        self.system_owners
            .get(system)
            .map(String::as_str)
            .ok_or_else(|| unknown_system(system))
    }

    fn owner_of_system(&self, system: &str) -> Result<&dyn SubProblem, CouplingError> {
        self.sub_problem(self.system_owner(system)?)
    }

    /// `var` as declared by the first sub-problem in solve order that has it.
    pub fn get_variable(&self, tid: usize, var: &str) -> Result<Variable, CouplingError> {
        self.sub_problem(self.variable_owner(var)?)?.get_variable(tid, var)
    }

    /// Switch the quadrature of thread `tid` in the sub-problem owning `system`.
    pub fn attach_quadrature_rule(
        &self,
        system: &str,
        volume: &str,
        face: &str,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.owner_of_system(system)?
            .attach_quadrature_rule(volume, face, tid)
    }

    /// Evaluate the sub-problem owning `system` on `elem`.
    pub fn reinit_elem(&self, system: &str, elem: PointId, tid: usize) -> Result<(), CouplingError> {
        self.owner_of_system(system)?.reinit_elem(elem, tid)
    }

    pub fn reinit_elem_face(
        &self,
        system: &str,
        elem: PointId,
        side: usize,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.owner_of_system(system)?
            .reinit_elem_face(elem, side, bid, tid)
    }

    pub fn reinit_node(&self, system: &str, node: PointId, tid: usize) -> Result<(), CouplingError> {
        self.owner_of_system(system)?.reinit_node(node, tid)
    }

    pub fn reinit_node_face(
        &self,
        system: &str,
        node: PointId,
        bid: BoundaryId,
        tid: usize,
    ) -> Result<(), CouplingError> {
        self.owner_of_system(system)?.reinit_node_face(node, bid, tid)
    }

    /// Initial value of `var` of `system` at `point`.
    pub fn initial_value(&self, point: &[f64], system: &str, var: &str) -> Result<f64, CouplingError> {
        self.owner_of_system(system)?.initial_value(point, system, var)
    }

    pub fn initial_gradient(
        &self,
        point: &[f64],
        system: &str,
        var: &str,
    ) -> Result<Vec<f64>, CouplingError> {
        self.owner_of_system(system)?
            .initial_gradient(point, system, var)
    }

    /// Set the initial state of `system` through its owner.
    pub fn initial_condition(&mut self, system: &str) -> Result<(), CouplingError> {
        let owner = self.system_owner(system)?.to_string();
        log::debug!("initial condition for '{system}' via '{owner}'");
        self.sub_problem_mut(&owner)?.initial_condition(system)
    }

    /// Residual of the named nonlinear system, from whichever sub-problem
    /// owns it.
    pub fn compute_residual(&self, system: &str) -> Result<NumericVector, CouplingError> {
        self.owner_of_system(system)?.compute_residual(system)
    }

    pub fn compute_jacobian(&self, system: &str) -> Result<SparseMatrix, CouplingError> {
        self.owner_of_system(system)?.compute_jacobian(system)
    }

    /// Snapshot of the clock and every sub-problem, in solve order.
    pub fn dump(&self) -> CoupledProblemDump {
        let clock = *self.eq.clock().read();
        let order = self.solve_order().to_vec();
        let listed: BTreeSet<&str> = order.iter().map(String::as_str).collect();
        let sub_problems = order
            .iter()
            .chain(self.registration.iter().filter(|n| !listed.contains(n.as_str())))
            .filter_map(|n| self.sub_problems.get(n))
            .map(|s| s.summary())
            .collect();
        CoupledProblemDump {
            time: clock.time,
            time_step: clock.t_step,
            dt: clock.dt,
            dt_old: clock.dt_old,
            transient: self.transient,
            solve_order: order,
            sub_problems,
        }
    }
}
