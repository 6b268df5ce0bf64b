//! The process grid and communicator abstraction (spec §2 item 1, §5, §6).
//!
//! Real MPI is explicitly out of scope (§1 Non-goals, §6): only the
//! communicator *abstractions* the process-grid constructor exposes are
//! used. [`Communicator`] is therefore our own minimal collective-ops
//! surface, kept dyn-safe by moving bytes rather than generic types (the
//! typed convenience wrappers below reinterpret through `bytemuck`, the way
//! the teacher reinterprets its own geometry types for SIMD/storage).
//!
//! [`InProcessCommunicator`] is the one concrete, fully-working
//! implementation: it wires up a full mesh of in-process "lanes" connected
//! by channels, so a multi-rank run is just P threads in one process. It is
//! what the CLI binary and the test suite both drive.

pub mod types;

use std::sync::mpsc::{Receiver, Sender};
use std::sync::Arc;

use bytemuck::Pod;

use crate::error::{DistEmbedError, Result};

/// Collective operations a [`ProcessGrid`] needs. Kept dyn-safe: every
/// method works in bytes/i32, never in a generic `T`. Typed collectives are
/// layered on top as free functions ([`all_to_all_v`]).
pub trait Communicator: Send + Sync {
    fn rank(&self) -> usize;
    fn world_size(&self) -> usize;

    /// Exchange one `i32` per peer (used for count negotiation).
    fn all_to_all_counts(&self, send_counts: &[i32]) -> Result<Vec<i32>>;

    /// Variable-size all-to-all over raw bytes. `elem_size` is the size in
    /// bytes of one logical element; counts/displs are expressed in
    /// elements, not bytes, matching `MPI_Alltoallv` semantics.
    fn all_to_all_v_bytes(
        &self,
        send_buf: &[u8],
        send_counts: &[i32],
        send_displs: &[i32],
        recv_counts: &[i32],
        recv_displs: &[i32],
        elem_size: usize,
    ) -> Result<Vec<u8>>;

    /// A failed collective aborts the run (§5 "Cancellation & timeout",
    /// §7 policy): there is no retry.
    fn abort(&self, message: &str) -> !;
}

/// Compute prefix-sum displacements from per-peer counts (§4.1 step 2).
pub fn prefix_sum(counts: &[i32]) -> Vec<i32> {
    let mut displs = vec![0i32; counts.len()];
    for i in 1..counts.len() {
        displs[i] = displs[i - 1] + counts[i - 1];
    }
    displs
}

/// Typed all-to-all-v built on [`Communicator::all_to_all_v_bytes`] via
/// `bytemuck`. `send_counts`/`recv_counts`/displs are in elements of `T`.
pub fn all_to_all_v<T: Pod>(
    comm: &dyn Communicator,
    send_buf: &[T],
    send_counts: &[i32],
    send_displs: &[i32],
    recv_counts: &[i32],
    recv_displs: &[i32],
) -> Result<Vec<T>> {
    let elem_size = std::mem::size_of::<T>();
    let send_bytes: &[u8] = bytemuck::cast_slice(send_buf);
    let recv_bytes = comm.all_to_all_v_bytes(
        send_bytes,
        send_counts,
        send_displs,
        recv_counts,
        recv_displs,
        elem_size,
    )?;
    Ok(bytemuck::cast_slice(&recv_bytes).to_vec())
}

/// Thin descriptor exposing world size, rank, and the column communicator
/// used for all exchanges (spec §2 item 1).
#[derive(Clone)]
pub struct ProcessGrid {
    pub world_size: usize,
    pub rank: usize,
    pub col_world_size: usize,
    comm: Arc<dyn Communicator>,
}

impl ProcessGrid {
    pub fn new(comm: Arc<dyn Communicator>) -> Self {
        let world_size = comm.world_size();
        let rank = comm.rank();
        Self {
            world_size,
            rank,
            col_world_size: world_size,
            comm,
        }
    }

    pub fn comm(&self) -> &dyn Communicator {
        self.comm.as_ref()
    }
}

/// One rank's endpoint into an in-process mesh of `world_size` peers.
///
/// A full mesh is built once with [`InProcessCommunicator::new_mesh`]; each
/// endpoint owns one outgoing [`Sender`] and one incoming [`Receiver`] per
/// peer (including a loopback pair for messages to itself), so an
/// `all_to_all_v` round is simply: push every outgoing segment, then drain
/// every incoming one. Because every rank issues exactly one round per
/// collective call and channels are FIFO, rounds never need to carry a tag.
pub struct InProcessCommunicator {
    rank: usize,
    world_size: usize,
    senders: Vec<Sender<Vec<u8>>>,
    receivers: Vec<Receiver<Vec<u8>>>,
}

impl InProcessCommunicator {
    /// Build a full mesh of `world_size` connected endpoints, one per rank,
    /// indexed by rank order. Hand each out to the thread/task that will
    /// play that rank.
    pub fn new_mesh(world_size: usize) -> Vec<Self> {
        assert!(world_size > 0, "world_size must be positive");

        // channels[i][j] carries messages sent by rank i to rank j.
        let mut senders: Vec<Vec<Sender<Vec<u8>>>> = Vec::with_capacity(world_size);
        let mut receivers: Vec<Vec<Option<Receiver<Vec<u8>>>>> = Vec::with_capacity(world_size);
        for _ in 0..world_size {
            senders.push(Vec::with_capacity(world_size));
            receivers.push(Vec::with_capacity(world_size));
        }
        for i in 0..world_size {
            for _ in 0..world_size {
                let (tx, rx) = std::sync::mpsc::channel();
                senders[i].push(tx);
                receivers[i].push(Some(rx));
            }
        }

        // rank r's inbound channel from peer p is channels[p][r].
        let mut endpoints = Vec::with_capacity(world_size);
        for r in 0..world_size {
            let my_senders: Vec<Sender<Vec<u8>>> = (0..world_size).map(|p| senders[r][p].clone()).collect();
            let my_receivers: Vec<Receiver<Vec<u8>>> = (0..world_size)
                .map(|p| receivers[p][r].take().expect("receiver taken twice"))
                .collect();
            endpoints.push(InProcessCommunicator {
                rank: r,
                world_size,
                senders: my_senders,
                receivers: my_receivers,
            });
        }
        endpoints
    }

    /// A single-rank, loopback-only mesh. Used by unit tests that want a
    /// deterministic, communication-free `ProcessGrid`.
    pub fn sequential() -> Self {
        InProcessCommunicator::new_mesh(1).pop().unwrap()
    }
}

/// `world_size == 1` communicator for single-machine runs and unit tests
/// that have no peers to talk to (spec §1 "process grid"). A thin wrapper
/// around [`InProcessCommunicator::sequential`] rather than a second
/// implementation of [`Communicator`]: every collective on a one-rank world
/// is already a no-op loopback, so there is nothing to specialize.
pub struct SequentialCommunicator(InProcessCommunicator);

impl SequentialCommunicator {
    pub fn new() -> Self {
        Self(InProcessCommunicator::sequential())
    }
}

impl Default for SequentialCommunicator {
    fn default() -> Self {
        Self::new()
    }
}

impl Communicator for SequentialCommunicator {
    fn rank(&self) -> usize {
        self.0.rank()
    }

    fn world_size(&self) -> usize {
        self.0.world_size()
    }

    fn all_to_all_counts(&self, send_counts: &[i32]) -> Result<Vec<i32>> {
        self.0.all_to_all_counts(send_counts)
    }

    fn all_to_all_v_bytes(
        &self,
        send_buf: &[u8],
        send_counts: &[i32],
        send_displs: &[i32],
        recv_counts: &[i32],
        recv_displs: &[i32],
        elem_size: usize,
    ) -> Result<Vec<u8>> {
        self.0
            .all_to_all_v_bytes(send_buf, send_counts, send_displs, recv_counts, recv_displs, elem_size)
    }

    fn abort(&self, message: &str) -> ! {
        self.0.abort(message)
    }
}

impl Communicator for InProcessCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn world_size(&self) -> usize {
        self.world_size
    }

    fn all_to_all_counts(&self, send_counts: &[i32]) -> Result<Vec<i32>> {
        if send_counts.len() != self.world_size {
            return Err(DistEmbedError::ShapeMismatch(format!(
                "all_to_all_counts: expected {} entries, got {}",
                self.world_size,
                send_counts.len()
            )));
        }
        for (peer, count) in send_counts.iter().enumerate() {
            let bytes = count.to_le_bytes().to_vec();
            self.senders[peer]
                .send(bytes)
                .map_err(|e| DistEmbedError::CommFailure(e.to_string()))?;
        }
        let mut recv_counts = vec![0i32; self.world_size];
        for (peer, slot) in recv_counts.iter_mut().enumerate() {
            let bytes = self.receivers[peer]
                .recv()
                .map_err(|e| DistEmbedError::CommFailure(e.to_string()))?;
            *slot = i32::from_le_bytes(bytes.try_into().unwrap());
        }
        Ok(recv_counts)
    }

    fn all_to_all_v_bytes(
        &self,
        send_buf: &[u8],
        send_counts: &[i32],
        send_displs: &[i32],
        recv_counts: &[i32],
        recv_displs: &[i32],
        elem_size: usize,
    ) -> Result<Vec<u8>> {
        for peer in 0..self.world_size {
            let start = send_displs[peer] as usize * elem_size;
            let len = send_counts[peer] as usize * elem_size;
            let segment = send_buf[start..start + len].to_vec();
            self.senders[peer]
                .send(segment)
                .map_err(|e| DistEmbedError::CommFailure(e.to_string()))?;
        }
        let total_recv: usize = recv_counts.iter().map(|&c| c as usize).sum();
        let mut recv_buf = vec![0u8; total_recv * elem_size];
        for peer in 0..self.world_size {
            let segment = self.receivers[peer]
                .recv()
                .map_err(|e| DistEmbedError::CommFailure(e.to_string()))?;
            let start = recv_displs[peer] as usize * elem_size;
            recv_buf[start..start + segment.len()].copy_from_slice(&segment);
        }
        Ok(recv_buf)
    }

    fn abort(&self, message: &str) -> ! {
        tracing::error!(rank = self.rank, "communicator abort: {message}");
        std::process::abort()
    }
}
