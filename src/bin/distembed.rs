//! CLI entry point (spec §6).
//!
//! Single-process runs simulate a `world_size`-rank cluster with
//! [`distembed::comm::InProcessCommunicator`]'s in-process mesh, one OS
//! thread per rank, exactly as the unit test suite does. Logging is set up
//! with `tracing-subscriber`'s `EnvFilter`, matching how the rest of the
//! pack wires up structured logging (`RUST_LOG=distembed=info` to see
//! per-batch progress).

use std::sync::Arc;

use distembed::comm::{Communicator, InProcessCommunicator, ProcessGrid};
use distembed::config::{Cli, Config};
use distembed::csr::SpMat;
use distembed::dense::DenseMat;
use distembed::driver::{run_embedding, run_spgemm, run_spmm, EmbeddingParams};
use distembed::mm::{generate_random_sparse, read_matrix_market_partitioned, write_embedding};
use distembed::par::Scheduler;
use distembed::partition::{partition, PartitionView};
use distembed::stats::RunStats;

const EMBEDDING_DIM: usize = 128;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli: Cli = argh::from_env();
    let config = match Config::from_cli(cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    let world_size: usize = std::env::var("DISTEMBED_WORLD_SIZE")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);

    let mesh = InProcessCommunicator::new_mesh(world_size);
    std::thread::scope(|s| {
        for comm in mesh.into_iter() {
            let config = config.clone();
            s.spawn(move || run_rank(comm, config));
        }
    });
}

fn run_rank(comm: InProcessCommunicator, config: Config) {
    let rank = comm.rank();
    let world_size = comm.world_size();
    let comm: Arc<dyn Communicator> = Arc::new(comm);
    let grid = ProcessGrid::new(comm);

    let view = if config.col_major { PartitionView::Col } else { PartitionView::Row };

    let mut store = match read_matrix_market_partitioned(&config.input, rank, world_size, true) {
        Ok(s) => s,
        Err(e) => {
            tracing::error!(rank, "failed to read {}: {e}", config.input);
            return;
        }
    };

    if let Err(e) = partition(&mut store, grid.comm(), view, config.scheduler) {
        tracing::error!(rank, "partition failed: {e}");
        return;
    }

    let proc_row_width = store.row_stripe_width(world_size);
    let proc_col_width = store.col_stripe_width(world_size);

    // `-fix_batch_training`: shrink the configured batch by world_size before
    // it ever reaches CSR tiling, since batch width is baked into the CSR at
    // construction time and can't be adjusted afterward.
    let batch = if config.fix_batch_training {
        (config.batch / world_size.max(1) as u64).max(1)
    } else {
        config.batch
    };

    let sp_local = SpMat::initialize_csr_blocks(
        store.coords.clone(),
        store.g_rows,
        store.g_cols,
        proc_row_width,
        proc_col_width,
        batch,
        proc_col_width,
        true,
        false,
        rank,
        world_size,
        config.scheduler,
    );
    let sp_local_trans = SpMat::initialize_csr_blocks(
        store.coords,
        store.g_rows,
        store.g_cols,
        proc_row_width,
        proc_col_width,
        batch,
        proc_col_width,
        true,
        true,
        rank,
        world_size,
        config.scheduler,
    );

    let mut dense: DenseMat<EMBEDDING_DIM> =
        DenseMat::random(proc_row_width as usize, world_size, 0.0, 1.0, rank as u64);

    let start = std::time::Instant::now();

    if config.spmm {
        let dc = distembed::datacomm::DataComm::new(&sp_local, &sp_local_trans, rank, world_size);
        let local_batches_per_peer = sp_local_trans.node_count(0).max(1) / world_size.max(1);
        let plan = dc.onboard_data(local_batches_per_peer);
        let mut y: DenseMat<EMBEDDING_DIM> = DenseMat::zeros(proc_row_width as usize, world_size);
        run_spmm(&sp_local, &dense, &mut y, rank, proc_row_width, &plan);
        dense = y;
    } else if config.spgemm {
        let b_store = match &config.input_sparse_file {
            Some(path) => match read_matrix_market_partitioned(path, rank, world_size, false) {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(rank, "failed to read sparse B from {path}: {e}");
                    return;
                }
            },
            None => generate_random_sparse(store.g_cols, store.g_cols, config.density, rank, world_size, 0),
        };
        let b_proc_row_width = b_store.row_stripe_width(world_size);
        let b_proc_col_width = b_store.col_stripe_width(world_size);
        let sp_b = SpMat::initialize_csr_blocks(
            b_store.coords,
            b_store.g_rows,
            b_store.g_cols,
            b_proc_row_width,
            b_proc_col_width,
            batch,
            b_proc_col_width,
            true,
            false,
            rank,
            world_size,
            config.scheduler,
        );
        match run_spgemm(grid.comm(), &sp_local, &sp_b, rank, b_proc_row_width) {
            Ok(rows) => {
                tracing::info!(rank, "spgemm produced {} local nonzero rows", rows.len());
            }
            Err(e) => {
                tracing::error!(rank, "spgemm failed: {e}");
                return;
            }
        }
    } else {
        let params = EmbeddingParams {
            iterations: config.iter,
            batch_size: batch,
            negative_samples: config.nsamples,
            learning_rate: config.lr,
            max_bound: 5.0,
            alpha: config.alpha,
            sync_comm: config.sync_comm,
        };
        if let Err(e) = run_embedding::<EMBEDDING_DIM>(grid.comm(), &sp_local, &sp_local_trans, &mut dense, params)
        {
            tracing::error!(rank, "embedding run failed: {e}");
            return;
        }
    }

    let elapsed = start.elapsed();
    tracing::info!(rank, "run finished in {}", distembed::stats::PrettyDuration(elapsed));

    if !config.spgemm {
        let rows: Vec<[f32; EMBEDDING_DIM]> = (0..dense.rows()).map(|i| dense.fetch_local_data(i)).collect();
        let output_path = format!("{}.rank{rank}", config.output);
        match std::fs::File::create(&output_path) {
            Ok(mut file) => {
                if let Err(e) = write_embedding(&mut file, &rows, proc_row_width, rank) {
                    tracing::error!(rank, "failed to write {output_path}: {e}");
                }
            }
            Err(e) => tracing::error!(rank, "failed to create {output_path}: {e}"),
        }
    }

    // `perf_output` (spec §6) is written once per run by rank 0 only.
    if rank == 0 {
        if let Some(path) = &config.save_results {
            let stats = RunStats {
                rank,
                world_size,
                iterations: config.iter,
                batch_size: batch,
                embedding_dim: EMBEDDING_DIM,
                total_seconds: elapsed.as_secs_f64(),
                comm_seconds: 0.0,
                compute_seconds: elapsed.as_secs_f64(),
            };
            if let Err(e) = stats.append_to_file(path) {
                tracing::error!(rank, "failed to append stats to {path}: {e}");
            }
        }
    }
}
