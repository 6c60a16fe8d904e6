mod util;

use mesh_displace::prelude::*;
use proptest::prelude::*;
use util::{assert_close, coords, pid};

#[test]
fn line_displaces_and_resets() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 2);
    let mut d = util::displaced(&r, &["disp_x"], 2);
    util::set_solution(&r, vec![0.0, 0.1, 0.2]);

    d.update_mesh().unwrap();
    assert_close(&coords(d.mesh()), &[0.0, 1.1, 2.2]);
    assert_eq!(coords(&d.ref_mesh()), vec![0.0, 1.0, 2.0]);

    d.undisplace_mesh().unwrap();
    assert_eq!(coords(d.mesh()), vec![0.0, 1.0, 2.0]);
}

#[test]
fn displaced_mesh_keeps_reference_topology() {
    let r = util::reference(util::quads(3, 2), &["disp_x", "disp_y"], 1);
    let mut d = util::displaced(&r, &["disp_x", "disp_y"], 1);
    util::set_solution(&r, (0..24).map(|i| 0.01 * i as f64).collect());
    d.update_mesh().unwrap();

    let reference = d.ref_mesh();
    assert!(reference.topology_eq(d.mesh()));
    assert_eq!(reference.n_nodes(), d.mesh().n_nodes());
    assert_eq!(reference.n_elements(), d.mesh().n_elements());
    assert_ne!(coords(&reference), coords(d.mesh()));
}

#[test]
fn unnamed_trailing_directions_stay_put() {
    let r = util::reference(util::quads(1, 1), &["disp_x", "disp_y"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    util::set_solution(&r, vec![0.25, 0.25, 0.25, 0.25, 9.0, 9.0, 9.0, 9.0]);
    d.update_mesh().unwrap();
    assert_close(d.mesh().node(pid(4)).unwrap(), &[1.25, 1.0]);
}

#[test]
fn sync_twice_leaves_systems_unchanged() {
    let r = util::reference(util::quads(2, 2), &["disp_x", "disp_y"], 1);
    let mut d = util::displaced(&r, &["disp_x", "disp_y"], 1);
    util::set_solution(&r, (0..18).map(|i| i as f64).collect());

    d.sync_solutions().unwrap();
    let first = (d.nl().solution().clone(), d.nl().current_solution().clone());
    let aux = d.aux().current_solution().clone();
    d.sync_solutions().unwrap();
    assert_eq!(d.nl().solution(), &first.0);
    assert_eq!(d.nl().current_solution(), &first.1);
    assert_eq!(d.aux().current_solution(), &aux);
    assert_eq!(d.nl().solution().as_slice(), r.nonlinear_system().read().solution().as_slice());
}

#[test]
fn sync_before_init_is_rejected() {
    let r = util::reference(generation::line(1, 1.0).unwrap(), &["disp_x"], 1);
    let mut d = DisplacedProblem::new(r, DisplacedProblemConfig::new(["disp_x"]).with_threads(1)).unwrap();
    assert!(matches!(d.sync_solutions(), Err(CouplingError::NotInitialized(_))));
}

#[test]
fn mismatched_solution_is_rejected() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    let err = d
        .update_mesh_with(&NumericVector::new(5), &NumericVector::new(2))
        .unwrap_err();
    assert!(matches!(
        err,
        CouplingError::SolutionSizeMismatch { expected: 3, found: 5, .. }
    ));
    assert_eq!(coords(d.mesh()), vec![0.0, 1.0, 2.0]);
}

#[test]
fn bad_displacement_variables_are_reported() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);

    let too_many = DisplacedProblemConfig::new(["disp_x", "disp_y"]).with_threads(1);
    assert_eq!(
        DisplacedProblem::new(r.clone(), too_many).unwrap_err(),
        CouplingError::DisplacementCountMismatch { dimension: 1, found: 2 }
    );

    let mut d = util::displaced(&r, &["disp_z"], 1);
    assert_eq!(
        d.update_mesh().unwrap_err(),
        CouplingError::VariableNotFound("disp_z".into())
    );

    let mut d = util::displaced(&r, &["stress"], 1);
    assert!(matches!(
        d.update_mesh(),
        Err(CouplingError::VariableTypeMismatch { .. })
    ));
}

#[test]
fn serial_state_is_repaired_in_both_directions() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    r.mesh().write().set_distribution(NodeDistribution::Distributed);
    d.update_mesh().unwrap();
    assert!(r.mesh().read().is_serial());

    r.mesh().write().set_distribution(NodeDistribution::Distributed);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    assert!(!d.mesh().is_serial());
    r.mesh().write().set_distribution(NodeDistribution::Replicated);
    d.update_mesh().unwrap();
    assert!(d.mesh().is_serial());
}

#[test]
fn mesh_changed_redistributes_and_keeps_geometry() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    util::set_solution(&r, vec![0.0, 0.5, 1.0]);
    d.update_mesh().unwrap();
    let revision = d.mesh().revision();

    d.mesh_changed().unwrap();
    assert_eq!(d.eq().n_reinits(), 1);
    assert!(d.mesh().revision() > revision);
    assert_close(&coords(d.mesh()), &[0.0, 1.5, 3.0]);
    assert_eq!(d.nl().n_dofs(), 3);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn undisplace_restores_reference_exactly(values in prop::collection::vec(-0.3f64..0.3, 24)) {
        let r = util::reference(util::quads(3, 2), &["disp_x", "disp_y"], 1);
        let mut d = util::displaced(&r, &["disp_x", "disp_y"], 1);
        let original = coords(&r.mesh().read());
        util::set_solution(&r, values.clone());

        d.update_mesh().unwrap();
        let moved = coords(d.mesh());
        for k in 0..12 {
            prop_assert_eq!(moved[2 * k], original[2 * k] + values[k]);
            prop_assert_eq!(moved[2 * k + 1], original[2 * k + 1] + values[12 + k]);
        }

        d.undisplace_mesh().unwrap();
        prop_assert_eq!(coords(d.mesh()), original);
    }
}
