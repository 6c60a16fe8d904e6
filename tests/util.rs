#![allow(dead_code)]
use mesh_displace::prelude::*;
use std::sync::Arc;

pub fn pid(u: u64) -> PointId {
    PointId::new(u).unwrap()
}

/// Reference problem with nodal displacement variables `disp` and one
/// elemental auxiliary field, initialized.
pub fn reference(mesh: Mesh, disp: &[&str], n_threads: usize) -> Arc<FeProblem> {
    let p = Arc::new(FeProblem::new("solid", mesh, n_threads));
    for name in disp {
        p.add_variable(VariableSpec::lagrange(*name)).unwrap();
    }
    p.add_aux_variable(VariableSpec::monomial("stress")).unwrap();
    p.init().unwrap();
    p
}

/// Initialized displaced mirror of `reference`.
pub fn displaced(reference: &Arc<FeProblem>, disp: &[&str], n_threads: usize) -> DisplacedProblem {
    let cfg = DisplacedProblemConfig::new(disp.iter().copied()).with_threads(n_threads);
    let mut d = DisplacedProblem::new(reference.clone(), cfg).unwrap();
    d.init().unwrap();
    d
}

/// Overwrite the reference nonlinear solution and refresh its local view.
pub fn set_solution(reference: &FeProblem, values: Vec<f64>) {
    let mut nl = reference.nonlinear_system().write();
    nl.set_solution(&NumericVector::from_vec(values)).unwrap();
    nl.update();
}

/// `nx * ny` unit-spaced quads.
pub fn quads(nx: usize, ny: usize) -> Mesh {
    generation::rectangle(nx, ny, nx as f64, ny as f64, generation::StructuredCellType::Quadrilateral)
        .unwrap()
}

/// Every coordinate of `mesh`, flattened in node order.
pub fn coords(mesh: &Mesh) -> Vec<f64> {
    mesh.node_ids()
        .iter()
        .flat_map(|&n| mesh.node(n).unwrap().to_vec())
        .collect()
}

pub fn assert_close(got: &[f64], want: &[f64]) {
    assert_eq!(got.len(), want.len(), "length differs\n got={got:?}\nwant={want:?}");
    for (g, w) in got.iter().zip(want) {
        assert!((g - w).abs() < 1e-12, "got={got:?}\nwant={want:?}");
    }
}
