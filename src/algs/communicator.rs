//! Thin façade over intra-process (thread) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices*. All handles are **waitable** but
//! non-blocking: callers post every receive and send of a phase first and only
//! then `.wait()` on the handles. Within one `(source, destination, tag)`
//! triple messages are delivered in posting order, matching MPI's
//! non-overtaking rule, so collectives may reuse a tag as long as every rank
//! calls them in the same order.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::mesh_error::MeshError;

/// Typed message tag. Each protocol phase derives its own tag with
/// [`CommTag::offset`] so concurrent phases never share a mailbox.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommTag(u16);

impl CommTag {
    /// Reserved for the default [`Communicator::barrier`].
    pub const BARRIER: CommTag = CommTag(0xFF00);
    /// Reserved for the default [`Communicator::allgather`].
    pub const ALLGATHER: CommTag = CommTag(0xFF01);

    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derive a tag `delta` steps after this one.
    #[inline]
    pub const fn offset(self, delta: u16) -> Self {
        Self(self.0.wrapping_add(delta))
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Non-blocking point-to-point interface plus the two collectives the
/// numbering and reduction code needs.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Block until every rank has entered the barrier.
    fn barrier(&self) {
        let me = self.rank();
        let tag = CommTag::BARRIER.as_u16();
        let recvs: Vec<_> = (0..self.size())
            .filter(|&r| r != me)
            .map(|r| self.irecv(r, tag))
            .collect();
        let sends: Vec<_> = (0..self.size())
            .filter(|&r| r != me)
            .map(|r| self.isend(r, tag, &[]))
            .collect();
        for h in recvs {
            let _ = h.wait();
        }
        for h in sends {
            let _ = h.wait();
        }
    }

    /// Gather `send` from every rank into `recv`, ordered by rank.
    ///
    /// `recv.len()` must equal `size() * send.len()`.
    fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), MeshError> {
        let me = self.rank();
        let n = send.len();
        if recv.len() != n * self.size() {
            return Err(MeshError::BufferShape {
                expected: n * self.size(),
                got: recv.len(),
            });
        }
        let tag = CommTag::ALLGATHER.as_u16();
        let recvs: Vec<_> = (0..self.size())
            .filter(|&r| r != me)
            .map(|r| (r, self.irecv(r, tag)))
            .collect();
        let sends: Vec<_> = (0..self.size())
            .filter(|&r| r != me)
            .map(|r| self.isend(r, tag, send))
            .collect();
        recv[me * n..(me + 1) * n].copy_from_slice(send);

        // drain every handle before reporting the first failure
        let mut maybe_err = None;
        for (r, h) in recvs {
            match h.wait() {
                Some(data) if data.len() == n => {
                    recv[r * n..(r + 1) * n].copy_from_slice(&data);
                }
                Some(data) => {
                    maybe_err.get_or_insert(MeshError::BufferSizeMismatch {
                        neighbor: r,
                        expected: n,
                        got: data.len(),
                    });
                }
                None => {
                    maybe_err.get_or_insert(MeshError::CommError {
                        neighbor: r,
                        message: "allgather receive returned no data".into(),
                    });
                }
            }
        }
        for h in sends {
            let _ = h.wait();
        }
        match maybe_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Compile-time no-op comm for pure serial runs: a single rank, no peers.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
}

// --- LocalComm: intra-process ranks, one per thread ---
type Key = (usize, usize, u16); // (src, dst, tag)
type Mailbox = DashMap<Key, VecDeque<Bytes>>;

/// In-process communicator: every rank is a thread sharing one mailbox.
///
/// Create all ranks of a run at once with [`LocalComm::universe`] and move one
/// handle into each worker thread.
#[derive(Clone, Debug)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl LocalComm {
    /// Build `size` connected ranks.
    pub fn universe(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new());
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

/// Receive handle for [`LocalComm`]; polls the mailbox on `wait`.
pub struct LocalHandle {
    key: Key,
    mailbox: Arc<Mailbox>,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(mut queue) = self.mailbox.get_mut(&self.key) {
                if let Some(bytes) = queue.pop_front() {
                    return Some(bytes.to_vec());
                }
            }
            std::thread::yield_now();
        }
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.rank, peer, tag);
        self.mailbox
            .entry(key)
            .or_default()
            .push_back(Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle {
        LocalHandle {
            key: (peer, self.rank, tag),
            mailbox: Arc::clone(&self.mailbox),
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{Communicator, Wait};
    use crate::mesh_error::MeshError;
    use mpi::environment::Universe;
    use mpi::request::StaticScope;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Source as _,
    };

    /// World communicator. Dropping it finalizes MPI.
    pub struct MpiComm {
        pub world: SimpleCommunicator,
        pub rank: usize,
        pub size: usize,
        _universe: Universe,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshError> {
            let universe = mpi::initialize().ok_or_else(|| MeshError::CommError {
                neighbor: 0,
                message: "MPI is already initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                world,
                rank,
                size,
                _universe: universe,
            })
        }
    }

    /// Pending send; owns the payload until the request completes.
    pub struct MpiSend {
        finish: Box<dyn FnOnce()>,
    }

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            (self.finish)();
            None
        }
    }

    /// Deferred receive: matched by `(peer, tag)` when waited on. Sends are
    /// always posted non-blocking before any wait, so deferring cannot deadlock.
    pub struct MpiRecv {
        peer: i32,
        tag: i32,
    }

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            let world = SimpleCommunicator::world();
            let (data, _status) = world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            let payload: &'static [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let raw = payload as *const [u8] as *mut [u8];
            let req = self.world.process_at_rank(peer as i32).immediate_send_with_tag(
                StaticScope,
                payload,
                i32::from(tag),
            );
            MpiSend {
                finish: Box::new(move || {
                    req.wait();
                    // SAFETY: `raw` came from `Box::leak` above and the only
                    // borrow of it (the request) has just completed.
                    unsafe { drop(Box::from_raw(raw)) };
                }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            MpiRecv {
                peer: peer as i32,
                tag: i32::from(tag),
            }
        }

        fn barrier(&self) {
            self.world.barrier();
        }

        fn allgather(&self, send: &[u8], recv: &mut [u8]) -> Result<(), MeshError> {
            if recv.len() != send.len() * self.size {
                return Err(MeshError::BufferShape {
                    expected: send.len() * self.size,
                    got: recv.len(),
                });
            }
            self.world.all_gather_into(send, recv);
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_roundtrip_two_ranks() {
        let mut ranks = LocalComm::universe(2);
        let comm1 = ranks.pop().unwrap();
        let comm0 = ranks.pop().unwrap();

        let recv_handle = comm1.irecv(0, 7);
        comm0.isend(1, 7, &[1, 2, 3, 4]).wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        assert_eq!(data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn messages_with_same_tag_arrive_in_order() {
        let ranks = LocalComm::universe(2);
        ranks[0].isend(1, 3, &[1]);
        ranks[0].isend(1, 3, &[2]);
        assert_eq!(ranks[1].irecv(0, 3).wait(), Some(vec![1]));
        assert_eq!(ranks[1].irecv(0, 3).wait(), Some(vec![2]));
    }

    #[test]
    fn allgather_three_threads() {
        let results: Vec<Vec<u8>> = std::thread::scope(|s| {
            let handles: Vec<_> = LocalComm::universe(3)
                .into_iter()
                .map(|comm| {
                    s.spawn(move || {
                        let mine = [comm.rank() as u8 * 10, 1];
                        let mut all = vec![0u8; 6];
                        comm.allgather(&mine, &mut all).unwrap();
                        comm.barrier();
                        all
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for all in results {
            assert_eq!(all, vec![0, 1, 10, 1, 20, 1]);
        }
    }

    #[test]
    fn nocomm_is_a_single_rank() {
        let comm = NoComm;
        let mut out = [0u8; 2];
        comm.allgather(&[5, 6], &mut out).unwrap();
        assert_eq!(out, [5, 6]);
        assert!(comm.allgather(&[5, 6], &mut [0u8; 3]).is_err());
    }
}
