//! Collective exchanges expressed over the point-to-point [`Communicator`].
//!
//! All functions guarantee that every send/receive handle is drained before
//! returning, even if an error occurs, so a failed call never leaves a stray
//! message behind for the next phase using the same tag.

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, cast_slice, decode_records};
use crate::mesh_error::MeshError;

/// All-to-all exchange of one count per rank.
///
/// Returns `recv_counts[r]` = the count rank `r` announced for this rank.
pub fn exchange_counts<C>(
    comm: &C,
    tag: CommTag,
    send_counts: &[usize],
) -> Result<Vec<usize>, MeshError>
where
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    if send_counts.len() != size {
        return Err(MeshError::BufferShape {
            expected: size,
            got: send_counts.len(),
        });
    }

    // 1) post all receives
    let recvs: Vec<(usize, C::RecvHandle)> = (0..size)
        .filter(|&r| r != me)
        .map(|r| (r, comm.irecv(r, tag.as_u16())))
        .collect();

    // 2) post all sends
    let sends: Vec<C::SendHandle> = (0..size)
        .filter(|&r| r != me)
        .map(|r| {
            let count = WireCount::new(send_counts[r]);
            comm.isend(r, tag.as_u16(), cast_slice(std::slice::from_ref(&count)))
        })
        .collect();

    // 3) wait for all recvs, collect counts (but do not early-return)
    let mut recv_counts = vec![0usize; size];
    recv_counts[me] = send_counts[me];
    let mut maybe_err = None;
    for (nbr, h) in recvs {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                match decode_records::<WireCount>(nbr, &data) {
                    Ok(cnt) => recv_counts[nbr] = cnt.first().map_or(0, WireCount::get),
                    Err(err) => {
                        maybe_err.get_or_insert(err);
                    }
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MeshError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MeshError::CommError {
                    neighbor: nbr,
                    message: format!("failed to receive count from rank {nbr}"),
                });
            }
            _ => {} // already have an error; just drain
        }
    }

    // 4) always drain all send handles before returning
    for send in sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok(recv_counts),
    }
}

/// Variable all-to-all of `Pod` records.
///
/// `send` must be grouped by destination rank, with `send_counts[r]` records
/// for rank `r`. Returns the received records ordered by source rank together
/// with the per-source counts. Record boundaries are recovered from byte
/// counts, so a payload whose size disagrees with the announced count is a
/// fatal [`MeshError::CountMismatch`].
pub fn all_to_all_v<T, C>(
    comm: &C,
    tag: CommTag,
    send: &[T],
    send_counts: &[usize],
) -> Result<(Vec<T>, Vec<usize>), MeshError>
where
    T: Pod,
    C: Communicator,
{
    let me = comm.rank();
    let size = comm.size();
    let total: usize = send_counts.iter().sum();
    if total != send.len() {
        return Err(MeshError::BufferShape {
            expected: total,
            got: send.len(),
        });
    }
    let recv_counts = exchange_counts(comm, tag, send_counts)?;
    let send_displs = displacements(send_counts);
    let recv_displs = displacements(&recv_counts);
    let data_tag = tag.offset(1).as_u16();

    let recvs: Vec<(usize, C::RecvHandle)> = (0..size)
        .filter(|&r| r != me && recv_counts[r] > 0)
        .map(|r| (r, comm.irecv(r, data_tag)))
        .collect();
    let sends: Vec<C::SendHandle> = (0..size)
        .filter(|&r| r != me && send_counts[r] > 0)
        .map(|r| {
            let block = &send[send_displs[r]..send_displs[r] + send_counts[r]];
            comm.isend(r, data_tag, cast_slice(block))
        })
        .collect();

    let mut out = vec![T::zeroed(); recv_displs[size]];
    out[recv_displs[me]..recv_displs[me] + recv_counts[me]]
        .copy_from_slice(&send[send_displs[me]..send_displs[me] + send_counts[me]]);

    let mut maybe_err = None;
    for (nbr, h) in recvs {
        let result = h
            .wait()
            .ok_or_else(|| MeshError::CommError {
                neighbor: nbr,
                message: "no payload received".into(),
            })
            .and_then(|raw| decode_records::<T>(nbr, &raw));
        match result {
            Ok(records) if records.len() == recv_counts[nbr] => {
                out[recv_displs[nbr]..recv_displs[nbr + 1]].copy_from_slice(&records);
            }
            Ok(records) => {
                maybe_err.get_or_insert(MeshError::CountMismatch {
                    neighbor: nbr,
                    expected: recv_counts[nbr],
                    got: records.len(),
                });
            }
            Err(err) => {
                maybe_err.get_or_insert(err);
            }
        }
    }
    for send in sends {
        let _ = send.wait();
    }

    match maybe_err {
        Some(err) => Err(err),
        None => Ok((out, recv_counts)),
    }
}

/// Group `(destination, item)` pairs by destination, keeping the input order
/// within each destination. Returns the grouped items and per-rank counts.
pub fn bucket_by_rank<T>(items: Vec<(usize, T)>, size: usize) -> (Vec<T>, Vec<usize>) {
    let mut counts = vec![0usize; size];
    for (dest, _) in &items {
        counts[*dest] += 1;
    }
    let mut buckets: Vec<Vec<T>> = counts.iter().map(|&n| Vec::with_capacity(n)).collect();
    for (dest, item) in items {
        buckets[dest].push(item);
    }
    (buckets.into_iter().flatten().collect(), counts)
}

/// Exclusive prefix sums with a trailing total: `len + 1` entries.
pub fn displacements(counts: &[usize]) -> Vec<usize> {
    let mut displs = Vec::with_capacity(counts.len() + 1);
    let mut acc = 0;
    displs.push(0);
    for &c in counts {
        acc += c;
        displs.push(acc);
    }
    displs
}

/// Gather one `u64` from every rank, ordered by rank.
pub fn all_gather_u64<C: Communicator>(comm: &C, value: u64) -> Result<Vec<u64>, MeshError> {
    let mut recvbuf = vec![0u8; comm.size() * 8];
    comm.allgather(&value.to_le_bytes(), &mut recvbuf)?;
    Ok(recvbuf
        .chunks_exact(8)
        .map(|chunk| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        })
        .collect())
}

/// Rank starts from an exclusive scan of `local`: `size + 1` entries, the
/// last being the global total.
pub fn exclusive_scan<C: Communicator>(comm: &C, local: u64) -> Result<Vec<u64>, MeshError> {
    let totals = all_gather_u64(comm, local)?;
    let mut starts = Vec::with_capacity(totals.len() + 1);
    let mut acc = 0u64;
    starts.push(0);
    for t in totals {
        acc += t;
        starts.push(acc);
    }
    Ok(starts)
}

/// Global minimum of `value` and the lowest rank holding it.
///
/// Every rank reduces the same all-gathered vector in rank order, so the
/// result is identical everywhere and independent of arrival order.
pub fn all_reduce_min<C: Communicator>(comm: &C, value: f64) -> Result<(f64, usize), MeshError> {
    let bits = all_gather_u64(comm, value.to_bits())?;
    let mut best = (f64::INFINITY, 0usize);
    for (rank, b) in bits.into_iter().enumerate() {
        let v = f64::from_bits(b);
        if v < best.0 {
            best = (v, rank);
        }
    }
    Ok(best)
}
