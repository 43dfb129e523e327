mod util;

use dg_assembly::algs::communicator::Communicator;
use dg_assembly::geometry::length::{element_characteristic_length, min_characteristic_length};
use dg_assembly::topology::mesh::TriMesh;
use util::run_ranks;

fn one_triangle(rank: usize, scale: f64) -> TriMesh {
    TriMesh::new(
        rank,
        rank as u64,
        2,
        6,
        vec![[3 * rank as u64, 3 * rank as u64 + 1, 3 * rank as u64 + 2]],
        vec![[0.0, scale, 0.0]],
        vec![[0.0, 0.0, scale]],
        vec![[1, 1, 1]],
    )
    .unwrap()
}

#[test]
fn every_rank_sees_the_global_minimum() {
    let small = element_characteristic_length(&[0.0, 0.1, 0.0], &[0.0, 0.0, 0.1]);
    let out = run_ranks(2, |comm| {
        let scale = if comm.rank() == 0 { 0.1 } else { 1.0 };
        min_characteristic_length(&comm, &one_triangle(comm.rank(), scale)).unwrap()
    });
    assert_eq!(out, vec![small, small]);
}
