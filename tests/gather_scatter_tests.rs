mod util;

use dg_assembly::algs::communicator::{Communicator, NoComm};
use dg_assembly::algs::gather_scatter::{AddOp, GatherScatter, MaxOp};
use dg_assembly::algs::numbering::{GlobalNumbering, nodal_candidate_ids};
use dg_assembly::discretization::reference::ReferenceTriangle;
use std::collections::{HashMap, HashSet};
use util::{run_ranks, strip, strip_part};

/// How many element nodes of the whole mesh share each candidate id.
fn multiplicity(refel: &ReferenceTriangle) -> HashMap<u64, usize> {
    let mesh = strip().partition(0, 1).unwrap();
    let mut count = HashMap::new();
    for c in nodal_candidate_ids(&mesh, refel).unwrap() {
        *count.entry(c).or_insert(0) += 1;
    }
    count
}

#[test]
fn gather_counts_copies_and_scatter_is_idempotent() {
    let refel = ReferenceTriangle::new(2).unwrap();
    let count = multiplicity(&refel);
    let out = run_ranks(2, |comm| {
        let mesh = strip_part(comm.rank(), comm.size());
        let candidates = nodal_candidate_ids(&mesh, &refel).unwrap();
        let num = GlobalNumbering::consecutive(&comm, &candidates).unwrap();
        let gs = GatherScatter::new(&comm, &num.global_ids, &num.global_owners).unwrap();

        let mut v = vec![1.0f64; candidates.len()];
        gs.gather(&comm, &mut v, &AddOp).unwrap();
        let gathered = v.clone();
        gs.scatter(&comm, &mut v).unwrap();
        let once = v.clone();
        gs.scatter(&comm, &mut v).unwrap();
        (num, candidates, gathered, once, v)
    });
    for (rank, (num, candidates, gathered, once, twice)) in out.iter().enumerate() {
        // the first local copy of an owned id holds the total, the rest are untouched
        let mut seen = HashSet::new();
        for (i, (&id, &owner)) in num.global_ids.iter().zip(&num.global_owners).enumerate() {
            if owner == rank && seen.insert(id) {
                assert_eq!(gathered[i], count[&candidates[i]] as f64);
            } else {
                assert_eq!(gathered[i], 1.0);
            }
        }
        assert_eq!(once, twice);
        for (c, &val) in candidates.iter().zip(once) {
            assert_eq!(val, count[c] as f64, "candidate {c}");
        }
    }
}

#[test]
fn max_reduction_reaches_every_copy() {
    let refel = ReferenceTriangle::new(1).unwrap();
    let out = run_ranks(2, |comm| {
        let mesh = strip_part(comm.rank(), comm.size());
        let candidates = nodal_candidate_ids(&mesh, &refel).unwrap();
        let num = GlobalNumbering::consecutive(&comm, &candidates).unwrap();
        let gs = GatherScatter::new(&comm, &num.global_ids, &num.global_owners).unwrap();
        let mut v = vec![comm.rank() as i64; candidates.len()];
        gs.gather(&comm, &mut v, &MaxOp).unwrap();
        gs.scatter(&comm, &mut v).unwrap();
        (candidates, v)
    });
    // rank 1 touches vertices 1, 2, 4 and 5
    for (candidates, v) in &out {
        for (&c, &val) in candidates.iter().zip(v) {
            let expected = if [1, 2, 4, 5].contains(&c) { 1 } else { 0 };
            assert_eq!(val, expected, "vertex {c}");
        }
    }
}

#[test]
fn serial_gather_without_communication() {
    let gs = GatherScatter::new(&NoComm, &[3, 3, 1], &[0, 0, 0]).unwrap();
    let mut v = vec![2.5f64, 0.5, 7.0];
    gs.gather(&NoComm, &mut v, &AddOp).unwrap();
    gs.scatter(&NoComm, &mut v).unwrap();
    assert_eq!(v, vec![3.0, 3.0, 7.0]);
}
