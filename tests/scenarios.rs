//! End-to-end scenarios (spec §8).
//!
//! Each test drives a small in-process "cluster" via
//! `InProcessCommunicator::new_mesh`, one OS thread per simulated rank, the
//! same harness the CLI binary uses for single-machine runs.

use std::thread;

use distembed::comm::types::Coord;
use distembed::comm::{Communicator, InProcessCommunicator};
use distembed::coord::CoordinateStore;
use distembed::csr::SpMat;
use distembed::dense::DenseMat;
use distembed::driver::{run_embedding, run_spmm, EmbeddingParams};
use distembed::par::Scheduler;
use distembed::partition::{partition, PartitionView};

fn euclidean_distance<const D: usize>(a: &[f32; D], b: &[f32; D]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum::<f32>().sqrt()
}

/// S1 — trivial 2x2 on two ranks: A = {(0,1,1),(1,0,1)}, init E = I, one
/// attractive-only update (ns=0) should pull the two rows together.
#[test]
fn s1_trivial_two_by_two_moves_rows_closer() {
    let world_size = 2usize;
    let mesh = InProcessCommunicator::new_mesh(world_size);
    thread::scope(|s| {
        for comm in mesh.into_iter() {
            s.spawn(move || {
                let rank = comm.rank();
                let coords = vec![Coord::new(rank as u64, 1 - rank as u64, 1.0f32)];
                let normal = SpMat::initialize_csr_blocks(
                    coords.clone(), 2, 2, 1, 1, 1, 1, true, false, rank, world_size, Scheduler::Sequential,
                );
                let trans = SpMat::initialize_csr_blocks(
                    coords, 2, 2, 1, 1, 1, 1, true, true, rank, world_size, Scheduler::Sequential,
                );

                let mut dense: DenseMat<2> = DenseMat::zeros(1, world_size);
                dense.set_row(0, if rank == 0 { &[1.0, 0.0] } else { &[0.0, 1.0] });

                let before = dense.fetch_local_data(0);

                let params = EmbeddingParams {
                    iterations: 1,
                    batch_size: 1,
                    negative_samples: 0,
                    learning_rate: 0.1,
                    max_bound: 5.0,
                    alpha: 1.0,
                    sync_comm: true,
                };
                run_embedding::<2>(&comm, &normal, &trans, &mut dense, params).unwrap();

                let after = dense.fetch_local_data(0);
                let before_gap = euclidean_distance(&before, &[0.5, 0.5]);
                let after_gap = euclidean_distance(&after, &[0.5, 0.5]);
                assert!(
                    after_gap < before_gap,
                    "rank {rank}: expected row to move toward its neighbor, before={before:?} after={after:?}"
                );
            });
        }
    });
}

/// S2 — CSR round trip: the union of every CSR block's triples equals the
/// coordinate multiset it was built from.
#[test]
fn s2_csr_round_trip_preserves_coordinate_multiset() {
    let g_rows = 1000u64;
    let g_cols = 1000u64;
    let proc_row_width = 1000u64;
    let proc_col_width = 1000u64;

    let mut seed = 12345u64;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        seed
    };
    let mut coords = Vec::new();
    let mut seen = std::collections::HashSet::new();
    while coords.len() < 2000 {
        let row = next() % g_rows;
        let col = next() % g_cols;
        if seen.insert((row, col)) {
            coords.push(Coord::new(row, col, 1.0f32));
        }
    }
    coords.sort_unstable_by_key(|c| (c.col, c.row));
    let expected: std::collections::BTreeSet<(u64, u64)> =
        coords.iter().map(|c| (c.row, c.col)).collect();

    let sp = SpMat::initialize_csr_blocks(
        coords, g_rows, g_cols, proc_row_width, proc_col_width, 64, 128, true, false, 0, 1,
        Scheduler::Sequential,
    );

    let mut seen_in_csr = std::collections::BTreeSet::new();
    for block in sp.all_blocks() {
        for (row, col, _) in block.iter_triples() {
            seen_in_csr.insert((row, col + block.col_base));
        }
    }
    assert_eq!(seen_in_csr, expected);
}

/// S3 — partition invariant: after partitioning, every row this rank owns
/// falls in its assigned stripe.
#[test]
fn s3_partition_invariant_holds_across_eight_ranks() {
    let world_size = 8usize;
    let g_rows = 10_000u64;
    let g_cols = 10_000u64;

    let mut seed = 99u64;
    let mut next = || {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        seed
    };
    let coords: Vec<Coord<f32>> = (0..5000)
        .map(|_| Coord::new(next() % g_rows, next() % g_cols, 1.0f32))
        .collect();

    let mesh = InProcessCommunicator::new_mesh(world_size);
    thread::scope(|s| {
        for comm in mesh.into_iter() {
            let coords = coords.clone();
            s.spawn(move || {
                let mut store = CoordinateStore::new(coords, g_rows, g_cols, 0, false);
                partition(&mut store, &comm, PartitionView::Row, Scheduler::Rayon).unwrap();
                let row_width = store.row_stripe_width(world_size);
                let rank = comm.rank() as u64;
                for c in &store.coords {
                    assert!(c.row >= rank * row_width && c.row < (rank + 1) * row_width);
                }
            });
        }
    });
}

/// S5 — SpGEMM/SpMM identity: A = I, B dense-random, product AB == B.
#[test]
fn s5_spmm_identity_reproduces_dense_input() {
    let n = 16u64;
    let coords: Vec<Coord<f32>> = (0..n).map(|i| Coord::new(i, i, 1.0f32)).collect();
    let sp = SpMat::initialize_csr_blocks(
        coords, n, n, n, n, 4, n, true, false, 0, 1, Scheduler::Sequential,
    );

    let b: DenseMat<3> = DenseMat::random(n as usize, 1, 0.0, 1.0, 42);
    let plan = distembed::datacomm::ColumnPlan { receive: vec![Vec::new()], send: vec![Vec::new()] };
    let mut y: DenseMat<3> = DenseMat::zeros(n as usize, 1);
    run_spmm(&sp, &b, &mut y, 0, n, &plan);

    for i in 0..n as usize {
        assert_eq!(y.fetch_local_data(i), b.fetch_local_data(i));
    }
}

/// S4 — send/receive match, plus testable properties 3 (send/receive
/// symmetry) and 4 (no self-shuffle): a 3-rank ring where rank r's one local
/// nonzero references column `(r+1) mod 3`'s owner, so each rank both sends
/// a column it owns to its successor and receives one from its predecessor.
/// `onboard_data` needs, per rank, the receiver-view CSR (its own
/// row-partitioned data) and the sender-view CSR (the global view of just
/// the columns it owns, gathered across every row) — here supplied directly
/// since this test exercises `DataComm` itself, not the upstream partition
/// pipeline that would normally gather the sender view.
#[test]
fn s4_send_receive_maps_are_symmetric_and_self_free() {
    let world_size = 3usize;
    let g_rows = 6u64;
    let g_cols = 6u64;
    let proc_row_width = 2u64;
    let proc_col_width = 2u64;
    let batch_rows = 2u64;

    // (row, col) ring: rank 0 owns row 0 and references col 3 (rank 1's);
    // rank 1 owns row 2 and references col 5 (rank 2's); rank 2 owns row 4
    // and references col 1 (rank 0's).
    let receiver_coords = [vec![Coord::new(0, 3, 1.0f32)], vec![Coord::new(2, 5, 1.0f32)], vec![Coord::new(4, 1, 1.0f32)]];
    // Sender-view coords: the same three triples, regrouped by which rank
    // owns the referenced column rather than the referencing row.
    let sender_coords = [vec![Coord::new(4, 1, 1.0f32)], vec![Coord::new(0, 3, 1.0f32)], vec![Coord::new(2, 5, 1.0f32)]];

    let plans: Vec<distembed::datacomm::ColumnPlan> = (0..world_size)
        .map(|rank| {
            let normal = SpMat::initialize_csr_blocks(
                receiver_coords[rank].clone(), g_rows, g_cols, proc_row_width, proc_col_width, batch_rows,
                proc_col_width, true, false, rank, world_size, Scheduler::Sequential,
            );
            let trans = SpMat::initialize_csr_blocks(
                sender_coords[rank].clone(), g_rows, g_cols, proc_row_width, proc_col_width, batch_rows,
                proc_col_width, true, true, rank, world_size, Scheduler::Sequential,
            );
            let local_batches_per_peer = trans.node_count(0).max(1) / world_size.max(1);
            distembed::datacomm::DataComm::new(&normal, &trans, rank, world_size).onboard_data(local_batches_per_peer)
        })
        .collect();

    assert_eq!(plans[0].receive[1], vec![3]);
    assert_eq!(plans[1].receive[2], vec![5]);
    assert_eq!(plans[2].receive[0], vec![1]);

    for a in 0..world_size {
        // Property 4: no self-shuffle.
        assert!(plans[a].send[a].is_empty());
        assert!(plans[a].receive[a].is_empty());

        for b in 0..world_size {
            if a == b {
                continue;
            }
            // Property 3: send/receive symmetry — what a sends to b must be
            // exactly what b thinks it receives from a.
            assert_eq!(
                plans[a].send[b], plans[b].receive[a],
                "send[{a}][{b}] must match receive[{b}][{a}]"
            );
        }
    }
}

/// S6 — long batch boundary: proc_row_width=1000, batch_size=300 should
/// yield batches of size 300/300/300/100.
#[test]
fn s6_long_batch_boundary_sizes() {
    let proc_row_width = 1000u64;
    let batch_size = 300u64;
    let coords = vec![Coord::new(0u64, 0u64, 1.0f32)];
    let sp = SpMat::initialize_csr_blocks(
        coords, proc_row_width, proc_row_width, proc_row_width, proc_row_width, batch_size,
        proc_row_width, true, false, 0, 1, Scheduler::Sequential,
    );

    assert_eq!(sp.list_count(), 4);
    for list in 0..3 {
        let block = sp.block(list, 0).unwrap();
        assert_eq!(block.rows(), 300);
    }
    let last = sp.block(3, 0).unwrap();
    assert_eq!(last.rows(), 100);
}
