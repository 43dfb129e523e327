#![allow(dead_code)]
use dg_assembly::{
    algs::communicator::LocalComm,
    topology::mesh::{GlobalTriMesh, TriMesh},
};

/// Run `f` on every rank of an in-process universe of `size` ranks, one
/// thread each, and collect the results in rank order.
pub fn run_ranks<R, F>(size: usize, f: F) -> Vec<R>
where
    R: Send,
    F: Fn(LocalComm) -> R + Sync,
{
    std::thread::scope(|s| {
        let handles: Vec<_> = LocalComm::universe(size)
            .into_iter()
            .map(|comm| {
                let f = &f;
                s.spawn(move || f(comm))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    })
}

/// `[0, 2] x [0, 1]` split into four triangles; with two ranks each rank
/// holds one unit square and the ranks share the edge `x = 1`.
pub fn strip() -> GlobalTriMesh {
    GlobalTriMesh::rectangle(2, 1, [0.0, 2.0], [0.0, 1.0], [1, 2, 1, 2])
}

pub fn strip_part(rank: usize, size: usize) -> TriMesh {
    strip().partition(rank, size).unwrap()
}
