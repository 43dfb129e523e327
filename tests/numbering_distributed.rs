mod util;

use dg_assembly::algs::communicator::{Communicator, NoComm};
use dg_assembly::algs::numbering::{GlobalNumbering, nodal_candidate_ids};
use dg_assembly::discretization::reference::ReferenceTriangle;
use dg_assembly::topology::connect::connect;
use std::collections::HashMap;
use util::{run_ranks, strip, strip_part};

#[test]
fn unique_numbering_is_contiguous_per_rank() {
    let out = run_ranks(3, |comm| {
        let n_local = 2 + comm.rank();
        GlobalNumbering::per_rank_unique(&comm, n_local).unwrap()
    });
    assert_eq!(out[0].global_starts, vec![0, 2, 5, 9]);
    assert_eq!(out[1].global_ids, vec![2, 3, 4]);
    assert_eq!(out[2].global_owners, vec![2; 4]);
}

#[test]
fn shared_edge_receives_one_id_per_point() {
    let refel = ReferenceTriangle::new(3).unwrap();
    let out = run_ranks(2, |comm| {
        let mut mesh = strip_part(comm.rank(), comm.size());
        connect(&comm, &mut mesh).unwrap();
        let candidates = nodal_candidate_ids(&mesh, &refel).unwrap();
        let num = GlobalNumbering::consecutive(&comm, &candidates).unwrap();
        (candidates, num)
    });

    // 6 vertices, 9 edges with 2 interior nodes each, 4 elements with 1 interior node
    assert_eq!(out[0].1.n_global(), 6 + 9 * 2 + 4);
    assert_eq!(out[0].1.global_starts, out[1].1.global_starts);

    let mut by_candidate: HashMap<u64, (u64, usize)> = HashMap::new();
    for (candidates, num) in &out {
        for ((&c, &id), &owner) in candidates.iter().zip(&num.global_ids).zip(&num.global_owners) {
            let prev = by_candidate.entry(c).or_insert((id, owner));
            assert_eq!(*prev, (id, owner), "candidate {c} numbered inconsistently");
        }
    }
    let mut ids: Vec<u64> = by_candidate.values().map(|&(id, _)| id).collect();
    ids.sort_unstable();
    assert_eq!(ids, (0..28).collect::<Vec<u64>>());

    // ids owned by a rank fall inside its block
    for &(id, owner) in by_candidate.values() {
        let starts = &out[0].1.global_starts;
        assert!(starts[owner] <= id && id < starts[owner + 1]);
    }
    // points on x = 1 are touched by both ranks and owned by the lower one
    let g = strip();
    let shared = [1u64, 4];
    for v in shared {
        assert!(g.vx[v as usize] == 1.0);
        assert_eq!(by_candidate[&v].1, 0);
    }
}

#[test]
fn distributed_matches_serial_up_to_relabelling() {
    let refel = ReferenceTriangle::new(2).unwrap();
    let serial = {
        let mesh = strip().partition(0, 1).unwrap();
        let candidates = nodal_candidate_ids(&mesh, &refel).unwrap();
        GlobalNumbering::consecutive(&NoComm, &candidates).unwrap()
    };
    let out = run_ranks(2, |comm| {
        let mesh = strip_part(comm.rank(), comm.size());
        let candidates = nodal_candidate_ids(&mesh, &refel).unwrap();
        GlobalNumbering::consecutive(&comm, &candidates).unwrap()
    });
    assert_eq!(out[0].n_global(), serial.n_global());

    // same partition of DOFs into groups
    let distributed: Vec<u64> = out.iter().flat_map(|n| n.global_ids.clone()).collect();
    assert_eq!(distributed.len(), serial.len());
    let mut relabel: HashMap<u64, u64> = HashMap::new();
    for (&s, &d) in serial.global_ids.iter().zip(&distributed) {
        assert_eq!(*relabel.entry(s).or_insert(d), d);
    }
}
