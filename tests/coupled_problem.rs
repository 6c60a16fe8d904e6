mod util;

use mesh_displace::prelude::*;
use mesh_displace::problem::{InitialCondition, SharedClock, SubProblem, SubProblemSummary};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;
use util::{assert_close, pid};

/// Sub-problem that only records what was asked of it.
struct Recorder {
    name: String,
    log: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    fn boxed(name: &str, log: &Arc<Mutex<Vec<String>>>) -> Box<dyn SubProblem> {
        Box::new(Self {
            name: name.to_string(),
            log: Arc::clone(log),
        })
    }

    fn record(&self, what: &str) {
        self.log.lock().push(format!("{what}:{}", self.name));
    }
}

impl SubProblem for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn init(&mut self) -> Result<(), CouplingError> {
        self.record("init");
        Ok(())
    }

    fn update(&mut self) -> Result<(), CouplingError> {
        self.record("update");
        Ok(())
    }

    fn has_variable(&self, name: &str) -> bool {
        name == self.name.to_lowercase()
    }

    fn system_names(&self) -> Vec<String> {
        Vec::new()
    }

    fn copy_solutions_backwards(&mut self) {
        self.record("copy");
    }

    fn set_transient(&mut self, _transient: bool) {}

    fn attach_clock(&mut self, _clock: SharedClock) {}

    fn compute_residual(&self, system: &str) -> Result<NumericVector, CouplingError> {
        Err(CouplingError::SystemNotFound(system.to_string()))
    }

    fn compute_jacobian(&self, system: &str) -> Result<SparseMatrix, CouplingError> {
        Err(CouplingError::SystemNotFound(system.to_string()))
    }

    fn summary(&self) -> SubProblemSummary {
        SubProblemSummary {
            name: self.name.clone(),
            systems: Vec::new(),
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[test]
fn update_follows_the_declared_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut cp = CoupledProblem::default();
    for name in ["C", "A", "B"] {
        cp.add_sub_problem(name, Recorder::boxed(name, &log)).unwrap();
    }
    cp.set_solve_order(["A", "B", "C"]).unwrap();
    cp.init().unwrap();
    cp.update().unwrap();
    cp.update().unwrap();

    assert_eq!(
        *log.lock(),
        [
            "init:A", "init:B", "init:C", "update:A", "update:B", "update:C", "update:A",
            "update:B", "update:C",
        ]
    );
}

#[test]
fn configured_order_is_applied_at_init() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut cp = CoupledProblem::new(CoupledProblemConfig {
        solve_order: vec!["B".into(), "A".into()],
        ..Default::default()
    });
    cp.add_sub_problem("A", Recorder::boxed("A", &log)).unwrap();
    cp.add_sub_problem("B", Recorder::boxed("B", &log)).unwrap();
    assert_eq!(cp.solve_order(), ["A", "B"]);
    cp.init().unwrap();
    assert_eq!(cp.solve_order(), ["B", "A"]);
    assert_eq!(*log.lock(), ["init:B", "init:A"]);
}

#[test]
fn unknown_names_in_the_configured_order_fail_init() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut cp = CoupledProblem::new(CoupledProblemConfig {
        solve_order: vec!["A".into(), "Z".into()],
        ..Default::default()
    });
    cp.add_sub_problem("A", Recorder::boxed("A", &log)).unwrap();
    assert_eq!(cp.init().unwrap_err(), CouplingError::UnknownSubProblem("Z".into()));
    assert!(log.lock().is_empty());
}

#[test]
fn displaced_problem_follows_the_reference_solve() {
    let reference = Arc::new(FeProblem::new("solid", generation::line(2, 2.0).unwrap(), 1));
    reference.add_variable(VariableSpec::lagrange("disp_x")).unwrap();
    reference.set_solve_hook(Box::new(|p: &FeProblem| {
        p.nonlinear_system()
            .write()
            .set_solution(&NumericVector::from_vec(vec![0.0, 0.1, 0.2]))
            .map_err(|e| e.to_string())
    }));
    let displaced = DisplacedProblem::new(
        reference.clone(),
        DisplacedProblemConfig::new(["disp_x"]).with_threads(1),
    )
    .unwrap();

    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("displaced", Box::new(displaced)).unwrap();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&reference))).unwrap();
    cp.set_solve_order(["solid", "displaced"]).unwrap();
    cp.init().unwrap();
    cp.update().unwrap();

    assert_eq!(reference.n_solves(), 1);
    let d = cp.sub_problem_as::<DisplacedProblem>("displaced").unwrap();
    assert_close(&util::coords(d.mesh()), &[0.0, 1.1, 2.2]);
    assert!(cp.sub_problem_as::<DisplacedProblem>("solid").is_err());

    cp.copy_solutions_backwards();
    assert_eq!(
        reference.nonlinear_system().read().solution_old().as_slice(),
        &[0.0, 0.1, 0.2]
    );
}

#[test]
fn failed_solve_stops_the_update() {
    let reference = Arc::new(FeProblem::new("solid", generation::line(1, 1.0).unwrap(), 1));
    reference.set_solve_hook(Box::new(|_: &FeProblem| Err("diverged".to_string())));
    let log = Arc::new(Mutex::new(Vec::new()));

    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&reference))).unwrap();
    cp.add_sub_problem("after", Recorder::boxed("after", &log)).unwrap();
    cp.init().unwrap();
    assert!(matches!(cp.update(), Err(CouplingError::Solve { .. })));
    assert_eq!(*log.lock(), ["init:after"]);
}

#[test]
fn one_clock_drives_every_sub_problem() {
    let r = util::reference(generation::line(1, 1.0).unwrap(), &["disp_x"], 1);
    let displaced = util::displaced(&r, &["disp_x"], 1);
    let mut cp = CoupledProblem::new(CoupledProblemConfig {
        dt: 0.1,
        ..Default::default()
    });
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.add_sub_problem("displaced", Box::new(displaced)).unwrap();

    cp.advance();
    cp.set_dt(0.2);
    cp.advance();
    assert_close(&[cp.time()], &[0.3]);
    assert_eq!(cp.time_step(), 2);
    assert_eq!(cp.dt_old(), 0.1);
    assert_close(&[r.clock().read().time], &[0.3]);
    let d = cp.sub_problem_as::<DisplacedProblem>("displaced").unwrap();
    assert_close(&[d.eq().time()], &[0.3]);

    cp.set_transient(true);
    assert!(cp.transient());
    assert!(r.is_transient());
}

#[test]
fn residuals_are_routed_by_system_name() {
    let r = util::reference(generation::line(1, 1.0).unwrap(), &["disp_x"], 1);
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();

    assert_eq!(cp.compute_residual("solid_nl").unwrap().len(), 2);
    assert_eq!(cp.compute_jacobian("solid_nl").unwrap().n_rows(), 2);
    assert_eq!(
        cp.compute_residual("solid_aux").unwrap_err(),
        CouplingError::SystemNotFound("solid_aux".into())
    );
    assert!(matches!(
        cp.compute_residual("fluid_nl"),
        Err(CouplingError::SystemNotFound(_))
    ));
    assert_eq!(cp.variable_owner("disp_x").unwrap(), "solid");
}

#[test]
fn systems_are_registered_with_their_owner() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.add_sub_problem("displaced", Box::new(d)).unwrap();
    cp.add_sub_problem("log", Recorder::boxed("log", &log)).unwrap();

    assert_eq!(cp.eq().n_systems(), 4);
    assert_eq!(cp.eq().n_dofs("solid_nl"), Some(3));
    assert_eq!(cp.eq().n_dofs("solid_displaced_aux"), Some(2));
    assert_eq!(cp.system_owner("solid_displaced_nl").unwrap(), "displaced");
    assert_eq!(cp.system_owner("solid_aux").unwrap(), "solid");
    assert_eq!(
        cp.system_owner("log_nl").unwrap_err(),
        CouplingError::SystemNotFound("log_nl".into())
    );

    assert_eq!(
        cp.add_sub_problem("again", Box::new(Arc::clone(&r))).unwrap_err(),
        CouplingError::DuplicateSystem {
            system: "solid_nl".into(),
            owner: "solid".into()
        }
    );
    assert_eq!(cp.n_sub_problems(), 3);
    assert_eq!(cp.system_owner("solid_nl").unwrap(), "solid");
}

#[test]
fn system_sizes_are_refreshed_at_init() {
    let fluid = Arc::new(FeProblem::new("fluid", generation::line(3, 3.0).unwrap(), 1));
    fluid.add_variable(VariableSpec::lagrange("p")).unwrap();
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("fluid", Box::new(fluid)).unwrap();
    assert_eq!(cp.eq().n_dofs("fluid_nl"), Some(0));
    cp.init().unwrap();
    assert_eq!(cp.eq().n_dofs("fluid_nl"), Some(4));
    assert_eq!(cp.eq().n_dofs("fluid_aux"), Some(0));
}

#[test]
fn variables_are_fetched_from_their_owner() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("displaced", Box::new(d)).unwrap();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.set_solve_order(["solid", "displaced"]).unwrap();

    assert_eq!(cp.get_variable(0, "disp_x").unwrap().name, "disp_x");
    assert_eq!(cp.get_variable(0, "stress").unwrap().name, "stress");
    assert_eq!(
        cp.get_variable(0, "temp").unwrap_err(),
        CouplingError::VariableNotFound("temp".into())
    );
    assert_eq!(
        cp.get_variable(1, "disp_x").unwrap_err(),
        CouplingError::ThreadOutOfRange { tid: 1, n_threads: 1 }
    );
}

#[test]
fn initial_conditions_are_routed_by_system_name() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    r.set_initial_condition(
        "disp_x",
        InitialCondition::new(|p| 0.5 * p[0]).with_gradient(|_| vec![0.5]),
    )
    .unwrap();
    assert_eq!(
        r.set_initial_condition("temp", InitialCondition::constant(1.0)).unwrap_err(),
        CouplingError::VariableNotFound("temp".into())
    );
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.add_sub_problem("displaced", Box::new(d)).unwrap();

    assert_eq!(cp.initial_value(&[1.0], "solid_nl", "disp_x").unwrap(), 0.5);
    assert_eq!(cp.initial_gradient(&[1.0], "solid_nl", "disp_x").unwrap(), vec![0.5]);
    assert_eq!(cp.initial_value(&[1.0], "solid_aux", "stress").unwrap(), 0.0);
    assert_eq!(cp.initial_gradient(&[1.0], "solid_aux", "stress").unwrap(), vec![0.0]);
    assert_eq!(
        cp.initial_value(&[1.0], "solid_nl", "stress").unwrap_err(),
        CouplingError::VariableNotFound("stress".into())
    );
    assert!(matches!(
        cp.initial_value(&[1.0], "solid_displaced_nl", "disp_x"),
        Err(CouplingError::SystemNotFound(_))
    ));

    cp.initial_condition("solid_nl").unwrap();
    assert_eq!(
        r.nonlinear_system().read().current_solution().as_slice(),
        &[0.0, 0.5, 1.0]
    );
    cp.initial_condition("solid_displaced_nl").unwrap();
    let d = cp.sub_problem_as::<DisplacedProblem>("displaced").unwrap();
    assert_eq!(d.nl().solution().as_slice(), &[0.0, 0.5, 1.0]);
    assert_eq!(
        cp.initial_condition("fluid_nl").unwrap_err(),
        CouplingError::SystemNotFound("fluid_nl".into())
    );
}

#[test]
fn reinit_is_routed_to_the_system_owner() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.add_sub_problem("displaced", Box::new(d)).unwrap();
    let displaced_nl = |cp: &CoupledProblem| {
        cp.sub_problem_as::<DisplacedProblem>("displaced")
            .unwrap()
            .nl()
            .thread_values(0)
            .unwrap()
    };

    cp.reinit_elem("solid_nl", pid(4), 0).unwrap();
    assert_eq!(r.nonlinear_system().read().thread_values(0).unwrap().elem, Some(pid(4)));
    assert_eq!(displaced_nl(&cp).elem, None);

    cp.reinit_elem("solid_displaced_aux", pid(5), 0).unwrap();
    assert_eq!(displaced_nl(&cp).elem, Some(pid(5)));

    cp.reinit_elem_face("solid_aux", pid(5), 1, 1, 0).unwrap();
    let aux = r.auxiliary_system().read().thread_values(0).unwrap();
    assert_eq!((aux.elem, aux.side, aux.boundary_id), (Some(pid(5)), Some(1), Some(1)));

    cp.reinit_node("solid_nl", pid(2), 0).unwrap();
    assert_eq!(r.nonlinear_system().read().thread_values(0).unwrap().node, Some(pid(2)));

    cp.reinit_node_face("solid_displaced_nl", pid(3), 1, 0).unwrap();
    let values = displaced_nl(&cp);
    assert_eq!((values.node, values.boundary_id), (Some(pid(3)), Some(1)));

    assert!(matches!(
        cp.reinit_elem("fluid_nl", pid(4), 0),
        Err(CouplingError::SystemNotFound(_))
    ));
}

#[test]
fn quadrature_rules_are_attached_through_the_owner() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let mut cp = CoupledProblem::default();
    cp.add_sub_problem("solid", Box::new(Arc::clone(&r))).unwrap();
    cp.add_sub_problem("displaced", Box::new(d)).unwrap();

    cp.attach_quadrature_rule("solid_nl", "gauss3", "gauss1", 0).unwrap();
    cp.reinit_elem("solid_nl", pid(4), 0).unwrap();
    assert_eq!(r.with_assembly(0, |ctx| Ok(ctx.q_points().len())).unwrap(), 3);

    cp.attach_quadrature_rule("solid_displaced_nl", "gauss1", "gauss1", 0).unwrap();
    cp.reinit_elem("solid_displaced_nl", pid(4), 0).unwrap();
    let d = cp.sub_problem_as::<DisplacedProblem>("displaced").unwrap();
    assert_eq!(d.assembly(0).unwrap().q_points().len(), 1);

    assert!(cp.attach_quadrature_rule("solid_nl", "gauss9", "gauss1", 0).is_err());
    assert!(matches!(
        cp.attach_quadrature_rule("solid_nl", "gauss2", "gauss2", 4),
        Err(CouplingError::ThreadOutOfRange { tid: 4, n_threads: 1 })
    ));
}
