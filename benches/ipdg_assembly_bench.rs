use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};

use dg_assembly::algs::assembly::{AssemblyOptions, PenaltyParams, build_ipdg_operator};
use dg_assembly::algs::communicator::NoComm;
use dg_assembly::discretization::dg_mesh::DgMesh;
use dg_assembly::topology::boundary::BoundaryTypeMap;
use dg_assembly::topology::mesh::GlobalTriMesh;

fn bench_assembly(c: &mut Criterion) {
    let mut group = c.benchmark_group("ipdg-assembly");
    let bc = BoundaryTypeMap::new().with(1, 1);

    for &(n, order) in &[(8, 2), (16, 2), (8, 4)] {
        let global = GlobalTriMesh::rectangle(n, n, [0.0, 1.0], [0.0, 1.0], [1; 4]);
        let mesh = global.partition(0, 1).unwrap();
        let mut dg = DgMesh::setup(&NoComm, mesh, order, None).unwrap();

        group.bench_with_input(
            BenchmarkId::new(format!("N{order}"), 2 * n * n),
            &order,
            |b, _| {
                b.iter(|| {
                    build_ipdg_operator(
                        &NoComm,
                        &mut dg,
                        None,
                        &bc,
                        PenaltyParams::default(),
                        AssemblyOptions::default(),
                    )
                    .unwrap()
                })
            },
        );
    }
    group.finish();
}

fn bench_setup(c: &mut Criterion) {
    let mut group = c.benchmark_group("dg-mesh-setup");
    for &n in &[8, 16] {
        let global = GlobalTriMesh::rectangle(n, n, [0.0, 1.0], [0.0, 1.0], [1; 4]);
        group.bench_with_input(BenchmarkId::from_parameter(2 * n * n), &global, |b, g| {
            b.iter(|| DgMesh::setup(&NoComm, g.partition(0, 1).unwrap(), 3, None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_assembly, bench_setup);
criterion_main!(benches);
