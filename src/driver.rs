//! Algorithm driver (spec §2 item 7, §4.5).
//!
//! `run_embedding` is grounded in `original_source/cpp/embedding/algo.hpp`'s
//! `EmbeddingAlgo::algo_force2_vec_ns` / `calc_t_dist_grad_rowptr` /
//! `calc_t_dist_replus_rowptr` / `update_data_matrix_rowptr`: a t-distributed
//! force-directed attractive/repulsive update with negative sampling, mini
//! batched over this rank's row stripe. `run_spmm` generalizes the same
//! local/remote row-tile iteration (the part of `calc_t_dist_grad_rowptr`
//! that walks a CSR block and either reads a local row or pulls one from the
//! remote-row cache) into a plain sparse-times-dense accumulation, since the
//! corpus that `sparse_mat.hpp`/`data_comm.hpp` came from defines the
//! `SpTuple` wire record for a dedicated SpGEMM/SpMM mode (spec §1 overview)
//! without shipping that mode's own source file.

use std::collections::{BTreeSet, HashMap};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::comm::{all_to_all_v, prefix_sum, Communicator};
use crate::csr::SpMat;
use crate::datacomm::{
    transfer_dense, transfer_dense_with_alpha, transfer_negative_samples, transfer_sparse_data, ColumnPlan, DataComm,
};
use crate::dense::DenseMat;
use crate::error::{DistEmbedError, Result};

/// Clamp to `[-bound, bound]` (`EmbeddingAlgo::scale`).
fn scale(v: f32, bound: f32) -> f32 {
    v.clamp(-bound, bound)
}

const EPS: f32 = 1e-6;

/// Hyperparameters for one `run_embedding` call (spec §4.5, §6 Config).
///
/// `-fix_batch_training` (divide the configured batch by `world_size`) acts
/// on `batch_size` before `run_embedding` is ever called, since the CSR
/// tiling it produces must already be built against the adjusted batch width
/// (spec §6) — see `bin/distembed.rs`'s construction of both the `SpMat`s
/// and this struct.
#[derive(Clone, Copy, Debug)]
pub struct EmbeddingParams {
    pub iterations: u32,
    pub batch_size: u64,
    pub negative_samples: u32,
    pub learning_rate: f32,
    pub max_bound: f32,
    /// Push/pull split for the α-driven transfer (spec §4.4), used only when
    /// `sync_comm` is false.
    pub alpha: f64,
    /// `true`: one blocking `AllToAllV` per batch (`transfer_dense`). `false`:
    /// the α/ring-ordered two-phase transfer (`transfer_dense_with_alpha`),
    /// spec §6 `-sync_comm`.
    pub sync_comm: bool,
}

impl Default for EmbeddingParams {
    fn default() -> Self {
        Self {
            iterations: 1,
            batch_size: 128,
            negative_samples: 5,
            learning_rate: 0.02,
            max_bound: 5.0,
            alpha: 1.0,
            sync_comm: true,
        }
    }
}

fn owner_of_row(global_row: u64, proc_row_width: u64) -> usize {
    (global_row / proc_row_width) as usize
}

/// Run the embedding epoch/batch loop for this rank's row stripe, mutating
/// `dense` in place. `sp_local` is the row-owner-view CSR (normal mode,
/// list = batch); `sp_local_trans` is the column-owner-view CSR used to
/// drive outbound transfers.
pub fn run_embedding<const D: usize>(
    comm: &dyn Communicator,
    sp_local: &SpMat<f32>,
    sp_local_trans: &SpMat<f32>,
    dense: &mut DenseMat<D>,
    params: EmbeddingParams,
) -> Result<()> {
    let rank = comm.rank();
    let world_size = comm.world_size();
    let proc_row_width = sp_local.proc_row_width;
    let g_rows = sp_local.g_rows;
    let batches = sp_local.list_count();
    let local_batches_per_peer = sp_local_trans.node_count(0).max(1) / world_size.max(1);

    let dc = DataComm::new(sp_local, sp_local_trans, rank, world_size);
    let onboard = if world_size > 1 { Some(dc.onboard_data(local_batches_per_peer)) } else { None };
    if let Some(plan) = &onboard {
        transfer_dense(comm, dense, plan, |col| (col - rank as u64 * proc_row_width) as usize, 0, 0, false)?;
    }

    for iteration in 0..params.iterations {
        if iteration > 0 {
            dense.evict_durable();
        }
        for batch in 0..batches {
            let row_base = batch as u64 * params.batch_size;
            let block_size =
                ((proc_row_width.saturating_sub(row_base)).min(params.batch_size)) as usize;
            if block_size == 0 {
                continue;
            }

            let seed = iteration as u64 + batch as u64;
            let negative_ids = generate_negative_samples(g_rows, params.negative_samples, seed);

            if world_size > 1 {
                transfer_negative_samples(comm, dense, &negative_ids, proc_row_width, batch as u64, iteration as u64)?;

                let plan = dc.batch_columns(batch, local_batches_per_peer);
                let local_row_of = |col: u64| (col - rank as u64 * proc_row_width) as usize;
                if params.sync_comm {
                    transfer_dense(comm, dense, &plan, local_row_of, batch as u64, iteration as u64, false)?;
                } else {
                    transfer_dense_with_alpha(
                        comm, dense, &plan, local_row_of, batch as u64, iteration as u64, false, params.alpha,
                    )?;
                }
            }

            let mut prev = vec![[0.0f32; D]; block_size];
            let mut first_miss: Option<(usize, u64)> = None;

            attractive_pass::<D>(
                sp_local, batch, dense, rank, proc_row_width, params.max_bound, params.learning_rate,
                row_base, batch as u64, iteration as u64, &mut prev, &mut first_miss,
            );
            repulsive_pass::<D>(
                &negative_ids, dense, rank, proc_row_width, params.max_bound, params.learning_rate,
                row_base, block_size, batch as u64, iteration as u64, &mut prev, &mut first_miss,
            );

            if let Some((peer, col)) = first_miss {
                tracing::warn!(
                    "{}",
                    DistEmbedError::CacheMiss { peer, col, batch_id: batch as u64, iteration: iteration as u64 }
                );
            }

            for (i, delta) in prev.iter().enumerate() {
                let local_row = (row_base as usize) + i;
                let row = dense.row_mut(local_row);
                for d in 0..D {
                    row[d] += delta[d];
                }
            }

            dense.evict_temp();
        }
    }
    Ok(())
}

fn generate_negative_samples(g_rows: u64, count: u32, seed: u64) -> Vec<u64> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..count).map(|_| rng.random_range(0..g_rows)).collect()
}

#[allow(clippy::too_many_arguments)]
fn attractive_pass<const D: usize>(
    sp_local: &SpMat<f32>,
    batch: usize,
    dense: &DenseMat<D>,
    rank: usize,
    proc_row_width: u64,
    max_bound: f32,
    lr: f32,
    row_base: u64,
    batch_id: u64,
    iteration: u64,
    prev: &mut [[f32; D]],
    first_miss: &mut Option<(usize, u64)>,
) {
    for node in 0..sp_local.node_count(batch) {
        let Some(block) = sp_local.block(batch, node) else { continue };
        for row in 0..block.rows() {
            let global_row = block.row_base + row as u64;
            if global_row < row_base || global_row - row_base >= prev.len() as u64 {
                continue;
            }
            let my_local_row = (global_row - rank as u64 * proc_row_width) as usize;
            let own = dense.fetch_local_data(my_local_row);
            let out = &mut prev[(global_row - row_base) as usize];
            let start = block.row_start[row] as usize;
            let end = block.row_start[row + 1] as usize;
            for j in start..end {
                let global_col = block.col_idx[j] + block.col_base;
                let target_rank = owner_of_row(global_col, proc_row_width);
                let neighbor = if target_rank == rank {
                    let local_col = (global_col - rank as u64 * proc_row_width) as usize;
                    Some(dense.fetch_local_data(local_col))
                } else {
                    dense.fetch_from_cache(target_rank, global_col, batch_id, iteration)
                };
                let Some(neighbor) = neighbor else {
                    first_miss.get_or_insert((target_rank, global_col));
                    continue;
                };
                let mut diff = [0.0f32; D];
                let mut attrc = 0.0f32;
                for d in 0..D {
                    diff[d] = own[d] - neighbor[d];
                    attrc += diff[d] * diff[d];
                }
                let d1 = -2.0 / (1.0 + attrc);
                for d in 0..D {
                    out[d] += lr * scale(diff[d] * d1, max_bound);
                }
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn repulsive_pass<const D: usize>(
    negative_ids: &[u64],
    dense: &DenseMat<D>,
    rank: usize,
    proc_row_width: u64,
    max_bound: f32,
    lr: f32,
    row_base: u64,
    block_size: usize,
    batch_id: u64,
    iteration: u64,
    prev: &mut [[f32; D]],
    first_miss: &mut Option<(usize, u64)>,
) {
    for i in 0..block_size {
        let global_row = row_base + i as u64;
        let local_row = (global_row - rank as u64 * proc_row_width) as usize;
        let own = dense.row(local_row);
        for &neg_id in negative_ids {
            let owner_rank = owner_of_row(neg_id, proc_row_width);
            let neighbor: [f32; D] = if owner_rank == rank {
                let local_col = (neg_id - rank as u64 * proc_row_width) as usize;
                let mut out = [0.0f32; D];
                out.copy_from_slice(dense.row(local_col));
                out
            } else {
                match dense.fetch_from_cache(owner_rank, neg_id, batch_id, iteration) {
                    Some(value) => value,
                    None => {
                        first_miss.get_or_insert((owner_rank, neg_id));
                        continue;
                    }
                }
            };
            let mut diff = [0.0f32; D];
            let mut repuls = 0.0f32;
            for d in 0..D {
                diff[d] = own[d] - neighbor[d];
                repuls += diff[d] * diff[d];
            }
            let d1 = 2.0 / ((repuls + EPS) * (1.0 + repuls));
            for d in 0..D {
                prev[i][d] += lr * scale(diff[d] * d1, max_bound);
            }
        }
    }
}

/// Sparse-times-dense accumulation: `y_local += A_local * x`, where `A_local`
/// is this rank's row-partitioned CSR and `x`'s rows not owned locally are
/// pulled from `x`'s remote-row cache (already populated via [`ColumnPlan`]
/// + a durable `transfer_dense(..., batch_id: 0, iteration: 0, temp: false)`
/// call, matched against the fixed `(0, 0)` context this one-shot operation
/// always reads with) instead of from a local row.
pub fn run_spmm<const D: usize>(
    sp_local: &SpMat<f32>,
    x: &DenseMat<D>,
    y: &mut DenseMat<D>,
    rank: usize,
    proc_row_width: u64,
    _plan: &ColumnPlan,
) {
    for list in 0..sp_local.list_count() {
        for node in 0..sp_local.node_count(list) {
            let Some(block) = sp_local.block(list, node) else { continue };
            for row in 0..block.rows() {
                let global_row = block.row_base + row as u64;
                let local_row = (global_row - rank as u64 * proc_row_width) as usize;
                let start = block.row_start[row] as usize;
                let end = block.row_start[row + 1] as usize;
                let mut acc = [0.0f32; D];
                for j in start..end {
                    let global_col = block.col_idx[j] + block.col_base;
                    let target_rank = owner_of_row(global_col, proc_row_width);
                    let rhs: [f32; D] = if target_rank == rank {
                        let local_col = (global_col - rank as u64 * proc_row_width) as usize;
                        let mut out = [0.0f32; D];
                        out.copy_from_slice(x.row(local_col));
                        out
                    } else {
                        match x.fetch_from_cache(target_rank, global_col, 0, 0) {
                            Some(value) => value,
                            None => continue,
                        }
                    };
                    let value = block.values[j];
                    for d in 0..D {
                        acc[d] += value * rhs[d];
                    }
                }
                let out_row = y.row_mut(local_row);
                for d in 0..D {
                    out_row[d] += acc[d];
                }
            }
        }
    }
}

/// Distributed sparse-times-sparse product `C = A · B` (spec §1's "second
/// mode", distinct from [`run_spmm`]'s sparse-times-dense): both `sp_a` and
/// `sp_b` are row-partitioned the same way, so a nonzero `A[row, k]` needs
/// `B`'s row `k`, wherever it lives. Unlike [`transfer_negative_samples`],
/// every rank's requested row set is different here, so gathering takes a
/// real two-round exchange: round one tells each owner which of `B`'s rows
/// this rank needs (a variable-size `u64` `AllToAllV`), round two packs and
/// returns those rows with [`transfer_sparse_data`] (spec §4.4 "Sparse
/// variant"), grounded in `tile_based_data_comm.hpp`'s request/response
/// shape for tiles this rank doesn't already own.
pub fn run_spgemm(
    comm: &dyn Communicator,
    sp_a: &SpMat<f32>,
    sp_b: &SpMat<f32>,
    rank: usize,
    proc_row_width: u64,
) -> Result<Vec<(u64, Vec<(u64, f32)>)>> {
    let world_size = comm.world_size();

    let mut wanted: Vec<BTreeSet<u64>> = vec![BTreeSet::new(); world_size];
    for list in 0..sp_a.list_count() {
        for node in 0..sp_a.node_count(list) {
            let Some(block) = sp_a.block(list, node) else { continue };
            for (_, col, _) in block.iter_triples() {
                let global_col = col + block.col_base;
                let owner = owner_of_row(global_col, proc_row_width);
                if owner != rank {
                    wanted[owner].insert(global_col);
                }
            }
        }
    }
    let wanted: Vec<Vec<u64>> = wanted.into_iter().map(|s| s.into_iter().collect()).collect();

    let send_counts: Vec<i32> = wanted.iter().map(|v| v.len() as i32).collect();
    let send_displs = prefix_sum(&send_counts);
    let mut send_buf: Vec<u64> = Vec::with_capacity(send_counts.iter().sum::<i32>() as usize);
    for ids in &wanted {
        send_buf.extend_from_slice(ids);
    }
    let recv_counts = comm.all_to_all_counts(&send_counts)?;
    let recv_displs = prefix_sum(&recv_counts);
    let requested: Vec<u64> =
        all_to_all_v(comm, &send_buf, &send_counts, &send_displs, &recv_counts, &recv_displs)?;

    let mut owed: Vec<Vec<(u64, Vec<(u64, f32)>)>> = vec![Vec::new(); world_size];
    for peer in 0..world_size {
        let start = recv_displs[peer] as usize;
        let len = recv_counts[peer] as usize;
        for &row_id in &requested[start..start + len] {
            owed[peer].push((row_id, sp_b.local_row(row_id)));
        }
    }
    let received = transfer_sparse_data::<8, 16>(comm, &owed)?;

    let mut remote_b_rows: HashMap<u64, Vec<(u64, f32)>> = HashMap::new();
    for peer_rows in received {
        for (row, col, value) in peer_rows {
            remote_b_rows.entry(row).or_default().push((col, value));
        }
    }

    let mut out: Vec<(u64, Vec<(u64, f32)>)> = Vec::new();
    for list in 0..sp_a.list_count() {
        for node in 0..sp_a.node_count(list) {
            let Some(block) = sp_a.block(list, node) else { continue };
            for row in 0..block.rows() {
                let global_row = block.row_base + row as u64;
                let start = block.row_start[row] as usize;
                let end = block.row_start[row + 1] as usize;
                let mut acc: HashMap<u64, f32> = HashMap::new();
                for j in start..end {
                    let global_col = block.col_idx[j] + block.col_base;
                    let a_val = block.values[j];
                    let owner = owner_of_row(global_col, proc_row_width);
                    let b_row = if owner == rank {
                        sp_b.local_row(global_col)
                    } else {
                        remote_b_rows.get(&global_col).cloned().unwrap_or_default()
                    };
                    for (b_col, b_val) in b_row {
                        *acc.entry(b_col).or_insert(0.0) += a_val * b_val;
                    }
                }
                if !acc.is_empty() {
                    let mut cols: Vec<(u64, f32)> = acc.into_iter().collect();
                    cols.sort_unstable_by_key(|&(c, _)| c);
                    out.push((global_row, cols));
                }
            }
        }
    }
    Ok(out)
}
