use criterion::{BenchmarkId, Criterion, black_box, criterion_group, criterion_main};

use mesh_displace::algs::displace::{NodeRange, ResetDisplacedMeshVisitor, visit_nodes};
use mesh_displace::mesh::Mesh;
use mesh_displace::mesh::generation::{self, StructuredCellType};
use mesh_displace::prelude::{
    DisplacedProblem, DisplacedProblemConfig, FeProblem, NumericVector, ReferenceProblem,
    VariableSpec,
};
use std::sync::Arc;

fn grid(n: usize) -> Mesh {
    generation::rectangle(n, n, 1.0, 1.0, StructuredCellType::Quadrilateral)
        .expect("valid rectangle")
}

fn bench_reset_visitor(c: &mut Criterion) {
    let mut group = c.benchmark_group("reset_visitor");

    for &n in &[64usize, 256] {
        let reference = grid(n);
        let mut target = reference.clone();
        let range = NodeRange::full(&reference);
        for &grain in &[1usize, 64, 1024] {
            group.bench_with_input(
                BenchmarkId::new(format!("{n}x{n}"), grain),
                &grain,
                |b, &grain| {
                    let visitor = ResetDisplacedMeshVisitor::new(&reference);
                    b.iter(|| {
                        let visited = visit_nodes(&visitor, &mut target, range, grain)
                            .expect("range within mesh");
                        black_box(visited);
                    })
                },
            );
        }
    }
    group.finish();
}

fn bench_update_mesh(c: &mut Criterion) {
    let mut group = c.benchmark_group("update_mesh");

    for &n in &[32usize, 128] {
        let reference = Arc::new(FeProblem::new("solid", grid(n), 1));
        reference
            .add_variable(VariableSpec::lagrange("disp_x"))
            .expect("fresh variable");
        reference
            .add_variable(VariableSpec::lagrange("disp_y"))
            .expect("fresh variable");
        reference.init().expect("reference init");
        {
            let mut nl = reference.nonlinear_system().write();
            let values = (0..nl.n_dofs()).map(|i| 1e-3 * i as f64).collect();
            nl.set_solution(&NumericVector::from_vec(values))
                .expect("matching size");
            nl.update();
        }
        let config = DisplacedProblemConfig::new(["disp_x", "disp_y"]);
        let mut displaced = DisplacedProblem::new(reference.clone(), config).expect("config");
        displaced.init().expect("displaced init");

        group.bench_function(BenchmarkId::from_parameter(format!("{n}x{n}")), |b| {
            b.iter(|| displaced.update_mesh().expect("update"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_reset_visitor, bench_update_mesh);
criterion_main!(benches);
