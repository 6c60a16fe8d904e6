mod util;

use mesh_displace::assembly::AssemblyState;
use mesh_displace::prelude::*;
use util::{assert_close, pid};

#[test]
fn tags_are_shared_with_the_reference() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);

    let contact = d.add_vector_tag("contact");
    assert_eq!(r.tags().get_vector_tag_id("CONTACT").unwrap(), contact);
    assert_eq!(r.tags().add_vector_tag("Contact"), contact);

    let mass = r.tags().add_matrix_tag("mass");
    assert_eq!(d.get_matrix_tag_id("mass").unwrap(), mass);
    assert!(d.matrix_tag_exists(mass));
    assert_eq!(d.matrix_tag_name(mass).unwrap(), "MASS");

    assert_eq!(d.num_vector_tags(), 3);
    assert_eq!(d.vector_tags(), r.tags().vector_tags());
    assert!(matches!(
        d.get_vector_tag_id("missing"),
        Err(CouplingError::UnknownVectorTag(_))
    ));
}

#[test]
fn reinit_dirac_without_points_is_a_no_op() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let elem = pid(4);

    d.reinit_elem(elem, 0).unwrap();
    let before = d.assembly(0).unwrap().q_points().to_vec();
    assert!(!d.reinit_dirac(elem, 0).unwrap());
    assert_eq!(d.assembly(0).unwrap().q_points(), before.as_slice());
}

const GAUSS2_ON_UNIT: [f64; 2] = [0.21132486540518708, 0.7886751345948129];

fn assert_gauss2_on_first_elem(d: &DisplacedProblem) {
    let ctx = d.assembly(0).unwrap();
    let got: Vec<f64> = ctx.q_points().iter().map(|p| p[0]).collect();
    assert_close(&got, &GAUSS2_ON_UNIT);
    assert_eq!(ctx.state(), AssemblyState::ElementReinit);
    assert_eq!(ctx.fe_elem(), Some(pid(4)));
}

#[test]
fn reinit_elem_after_physical_points_restores_quadrature() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let elem = pid(4);

    d.reinit_elem(elem, 0).unwrap();
    assert_gauss2_on_first_elem(&d);

    d.reinit_elem_phys(elem, &[vec![0.25]], 0).unwrap();
    assert_eq!(d.assembly(0).unwrap().q_points(), &[vec![0.25]]);
    assert_eq!(d.assembly(0).unwrap().state(), AssemblyState::Prepared);

    d.reinit_elem(elem, 0).unwrap();
    assert_gauss2_on_first_elem(&d);
}

#[test]
fn reinit_elem_after_dirac_points_restores_quadrature() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    d.dirac_info_mut().add_point(pid(4), vec![0.5]);

    assert!(d.reinit_dirac(pid(4), 0).unwrap());
    assert_eq!(d.assembly(0).unwrap().q_points(), &[vec![0.5]]);

    d.reinit_elem(pid(4), 0).unwrap();
    assert_gauss2_on_first_elem(&d);
}

#[test]
fn reinit_dirac_evaluates_at_registered_points() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    util::set_solution(&r, vec![0.0, 0.0, 1.0]);
    d.update_mesh().unwrap();

    // element 5 now spans [1, 3]
    assert_eq!(d.dirac_info_mut().add_point_located(vec![2.5]).unwrap(), Some(pid(5)));
    d.dirac_info_mut().add_point(pid(5), vec![1.5]);
    assert_eq!(d.dirac_elements(), vec![pid(5)]);

    assert!(d.reinit_dirac(pid(5), 0).unwrap());
    let ctx = d.assembly(0).unwrap();
    assert_eq!(ctx.q_points(), &[vec![2.5], vec![1.5]]);
    assert_eq!(ctx.current_elem(), Some(pid(5)));
    drop(ctx);

    d.clear_dirac_info();
    assert!(d.dirac_elements().is_empty());
}

#[test]
fn displaced_residual_lands_in_reference_vectors() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let non_time = r.tags().get_vector_tag_id("NONTIME").unwrap();

    d.prepare(pid(5), 0).unwrap();
    d.assembly(0)
        .unwrap()
        .residual_block_mut(non_time, 0)
        .unwrap()
        .copy_from_slice(&[1.0, 2.0]);
    d.add_residual(0).unwrap();
    assert_eq!(r.compute_residual().as_slice(), &[0.0, 1.0, 2.0]);

    d.cache_residual(0).unwrap();
    d.cache_residual(0).unwrap();
    d.add_cached_residual(0).unwrap();
    assert_eq!(r.compute_residual().as_slice(), &[0.0, 3.0, 6.0]);
}

#[test]
fn set_residual_overwrites_entries() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);
    let non_time = r.tags().get_vector_tag_id("NONTIME").unwrap();

    d.prepare(pid(4), 0).unwrap();
    d.assembly(0)
        .unwrap()
        .residual_block_mut(non_time, 0)
        .unwrap()
        .copy_from_slice(&[4.0, 5.0]);
    let mut residual = NumericVector::from_vec(vec![1.0, 1.0, 1.0]);
    d.set_residual(&mut residual, 0).unwrap();
    assert_eq!(residual.as_slice(), &[4.0, 5.0, 1.0]);
}

#[test]
fn jacobian_blocks_follow_the_coupling() {
    let r = util::reference(util::quads(1, 1), &["disp_x", "disp_y"], 1);
    let d = util::displaced(&r, &["disp_x", "disp_y"], 1);
    let system = r.tags().get_matrix_tag_id("SYSTEM").unwrap();

    d.prepare(pid(5), 0).unwrap();
    {
        let mut ctx = d.assembly(0).unwrap();
        assert_eq!(
            ctx.jacobian_block_mut(system, BlockKind::ElementElement, 0, 1)
                .unwrap_err(),
            CouplingError::UncoupledBlock { ivar: 0, jvar: 1 }
        );
        let block = ctx
            .jacobian_block_mut(system, BlockKind::ElementElement, 1, 1)
            .unwrap();
        assert_eq!((block.n_rows(), block.n_cols()), (4, 4));
        block.add(0, 0, 2.0).unwrap();
    }
    d.add_jacobian(0).unwrap();
    let jac = r.compute_jacobian().unwrap();
    assert_eq!(jac.get(4, 4), 2.0);
    assert_eq!(jac.get(0, 0), 0.0);
    // one dense 4x4 disp_y block
    assert_eq!(jac.nnz(), 16);
}

#[test]
fn neighbor_reinit_pairs_faces() {
    let r = util::reference(generation::line(2, 2.0).unwrap(), &["disp_x"], 1);
    let d = util::displaced(&r, &["disp_x"], 1);

    d.reinit_neighbor(pid(4), 1, 0).unwrap();
    let ctx = d.assembly(0).unwrap();
    assert_eq!(ctx.current_neighbor(), Some(pid(5)));
    assert_eq!(ctx.neighbor_side(), Some(0));
    assert_close(&ctx.fe_neighbor().q_points[0], &ctx.fe_face().q_points[0]);
    drop(ctx);

    assert!(matches!(
        d.reinit_neighbor(pid(4), 0, 0),
        Err(CouplingError::MissingNeighbor { .. })
    ));
}

#[test]
fn thread_ids_are_bounded_by_the_pool() {
    let r = util::reference(generation::line(1, 1.0).unwrap(), &["disp_x"], 2);
    let d = util::displaced(&r, &["disp_x"], 2);
    assert_eq!(d.n_threads(), 2);
    assert!(d.prepare(pid(3), 1).is_ok());
    assert_eq!(
        d.prepare(pid(3), 2).unwrap_err(),
        CouplingError::ThreadOutOfRange { tid: 2, n_threads: 2 }
    );
}

#[test]
fn identity_queries_follow_the_reference() {
    let r = util::reference(generation::line(1, 1.0).unwrap(), &["disp_x"], 1);
    let mut d = util::displaced(&r, &["disp_x"], 1);
    assert!(d.has_variable("stress"));
    assert!(!d.is_transient());
    r.set_transient(true);
    assert!(d.is_transient());
    r.set_coord_system(0, CoordinateSystem::Axisymmetric);
    assert_eq!(d.coord_system(0), CoordinateSystem::Axisymmetric);

    d.add_ghosted_boundary(1);
    d.ghost_ghosted_boundaries();
    assert_eq!(r.ghosted_elems(), vec![pid(3)]);
    assert_eq!(d.ghosted_elems(), r.ghosted_elems());

    d.add_aux_variable(VariableSpec::lagrange("gap")).unwrap();
    assert!(d.system_for("gap").is_ok());
    assert!(!d.has_variable("gap"));
}
