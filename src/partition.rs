//! Partitioner (spec §4.1) — redistributes coordinate triples so each rank
//! ends up owning a contiguous row (or, in transpose/`col_merged` mode,
//! column) stripe.
//!
//! Grounded in `original_source/cpp/partition/partitioner.hpp`'s
//! `partition_data`: bucket-count, prefix-sum, scatter, `AllToAll` of
//! counts, `AllToAllV` of the typed triple, then a column-major sort to
//! speed up CSR construction.

use bytemuck::{Pod, Zeroable};

use crate::comm::{all_to_all_v, prefix_sum, Communicator};
use crate::comm::types::Coord;
use crate::coord::CoordinateStore;
use crate::error::{DistEmbedError, Result};
use crate::par::Scheduler;

/// Which axis a rank's owned range is measured along after partitioning.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionView {
    /// owner = floor(row / W_row)
    Row,
    /// owner = floor(col / W_col)
    Col,
}

fn owner_of(row: u64, col: u64, row_width: u64, col_width: u64, view: PartitionView) -> usize {
    match view {
        PartitionView::Row => (row / row_width) as usize,
        PartitionView::Col => (col / col_width) as usize,
    }
}

/// Redistribute `store`'s coordinates across `comm`'s ranks per
/// `view` (spec §4.1 contract). Mutates `store.coords` in place.
pub fn partition<V: Pod + Send + Sync>(
    store: &mut CoordinateStore<V>,
    comm: &dyn Communicator,
    view: PartitionView,
    scheduler: Scheduler,
) -> Result<()> {
    let world_size = comm.world_size();
    if world_size <= 1 {
        return Ok(());
    }

    let row_width = store.row_stripe_width(world_size);
    let col_width = store.col_stripe_width(world_size);

    // Step 1: compute the owner of every coordinate, data-parallel over
    // disjoint chunks (no locking needed — each slot is written once).
    let n = store.coords.len();
    let mut owners = vec![0i32; n];
    let coords_ref = &store.coords;
    let chunk_size = n.div_ceil(scheduler.current_num_threads().max(1)).max(1);
    let compute_owners = |chunk_id: usize, chunk: &mut [i32]| {
        let base = chunk_id * chunk_size;
        for (local_i, slot) in chunk.iter_mut().enumerate() {
            let c = &coords_ref[base + local_i];
            *slot = owner_of(c.row, c.col, row_width, col_width, view) as i32;
        }
    };
    scheduler.par_chunks_mut(&mut owners, &compute_owners, chunk_size);

    // Step 2: count sends per peer, overflow check (§4.1 Failure).
    let mut send_counts = vec![0i32; world_size];
    for &owner in &owners {
        send_counts[owner as usize] = send_counts[owner as usize]
            .checked_add(1)
            .ok_or_else(|| {
                DistEmbedError::IntegerOverflow(format!(
                    "peer {owner} would receive >= 2^31 tuples"
                ))
            })?;
    }

    // Step 3: prefix-sum offsets, scatter into a contiguous send buffer.
    let send_displs = prefix_sum(&send_counts);
    let mut cursor = send_displs.clone();
    let mut send_buf: Vec<Coord<V>> = vec![Coord::new(0, 0, V::zeroed()); n];
    for (i, &owner) in owners.iter().enumerate() {
        let idx = cursor[owner as usize] as usize;
        send_buf[idx] = store.coords[i];
        cursor[owner as usize] += 1;
    }

    // Step 4: AllToAll of counts.
    let recv_counts = comm.all_to_all_counts(&send_counts)?;
    let recv_displs = prefix_sum(&recv_counts);
    let total_recv: usize = recv_counts.iter().map(|&c| c as usize).sum();

    // Step 5: AllToAllV of the typed triple.
    let received: Vec<Coord<V>> = all_to_all_v(
        comm,
        &send_buf,
        &send_counts,
        &send_displs,
        &recv_counts,
        &recv_displs,
    )?;
    debug_assert_eq!(received.len(), total_recv);

    // Step 6: sort received triples column-major to accelerate CSR
    // construction downstream.
    let mut received = received;
    received.sort_unstable_by(|a, b| (a.col, a.row).cmp(&(b.col, b.row)));
    store.coords = received;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::InProcessCommunicator;
    use std::thread;

    #[test]
    fn partition_closure_holds_for_row_view() {
        // Build 8 ranks' worth of scattered coordinates on rank 0 only, then
        // let every rank partition its (possibly empty) local slice; since
        // partitioning is itself the thing under test we seed every rank
        // with the *same* full coordinate list (a harmless over-count — the
        // property only checks the post-condition on owned rows).
        let world_size = 4usize;
        let g_rows = 40u64;
        let g_cols = 40u64;
        let mut all_coords = Vec::new();
        for r in 0..g_rows {
            for c in 0..g_cols {
                if (r + c) % 7 == 0 {
                    all_coords.push(Coord::new(r, c, 1.0f32));
                }
            }
        }

        let mesh = InProcessCommunicator::new_mesh(world_size);
        thread::scope(|s| {
            for comm in mesh.into_iter() {
                let coords = all_coords.clone();
                s.spawn(move || {
                    let mut store = CoordinateStore::new(coords, g_rows, g_cols, 0, false);
                    partition(&mut store, &comm, PartitionView::Row, Scheduler::Sequential).unwrap();
                    let row_width = store.row_stripe_width(world_size);
                    let rank = comm.rank() as u64;
                    for c in &store.coords {
                        assert!(c.row >= rank * row_width);
                        assert!(c.row < (rank + 1) * row_width);
                    }
                });
            }
        });
    }
}
