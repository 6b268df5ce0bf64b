//! CLI configuration (spec §6 "Config").
//!
//! Flags are parsed with `argh`, the teacher crate's own CLI dependency
//! (used by its demo binaries via `argh::from_env()`); validation follows
//! the fail-fast contract spec §7 assigns to [`DistEmbedError::InvalidConfig`].

use argh::FromArgs;

use crate::error::{DistEmbedError, Result};
use crate::par::Scheduler;

#[derive(FromArgs, Debug)]
/// distributed graph-embedding / sparse-matrix engine
pub struct Cli {
    /// path to the input Matrix Market file
    #[argh(option)]
    pub input: String,

    /// path to write the output embedding to
    #[argh(option)]
    pub output: String,

    /// mini-batch size (rows per batch)
    #[argh(option, default = "128")]
    pub batch: u64,

    /// number of epochs
    #[argh(option, default = "100")]
    pub iter: u32,

    /// push/pull communication overlap fraction, in [0, 1]
    #[argh(option, default = "0.2")]
    pub alpha: f64,

    /// negative-sample repulsive-force weight
    #[argh(option, default = "1.0")]
    pub beta: f64,

    /// learning rate
    #[argh(option, default = "0.02")]
    pub lr: f32,

    /// negative samples per row per batch
    #[argh(option, default = "5")]
    pub nsamples: u32,

    /// embedding dimension; must match the binary's compiled-in `D`
    #[argh(option, default = "128")]
    pub dataset_dim: usize,

    /// partition by column stripe instead of row stripe
    #[argh(switch)]
    pub col_major: bool,

    /// use blocking (synchronous) collectives instead of overlapped ones
    #[argh(switch)]
    pub sync_comm: bool,

    /// divide the configured batch size by world_size before tiling
    #[argh(switch)]
    pub fix_batch_training: bool,

    /// run the SpMM driver instead of the embedding driver
    #[argh(switch)]
    pub spmm: bool,

    /// run the SpGEMM driver instead of the embedding driver
    #[argh(switch)]
    pub spgemm: bool,

    /// expected nonzero density, used only for log output
    #[argh(option, default = "0.0")]
    pub density: f64,

    /// append a JSON stats line to this path after the run
    #[argh(option)]
    pub save_results: Option<String>,

    /// optional pre-partitioned sparse input, skipping the MM reader
    #[argh(option)]
    pub input_sparse_file: Option<String>,

    /// data-parallel backend: "seq" or "rayon"
    #[argh(option, default = "String::from(\"rayon\")")]
    pub scheduler: String,
}

/// Validated configuration the driver actually runs with.
#[derive(Debug, Clone)]
pub struct Config {
    pub input: String,
    pub output: String,
    pub batch: u64,
    pub iter: u32,
    pub alpha: f64,
    pub beta: f64,
    pub lr: f32,
    pub nsamples: u32,
    pub dataset_dim: usize,
    pub col_major: bool,
    pub sync_comm: bool,
    pub fix_batch_training: bool,
    pub spmm: bool,
    pub spgemm: bool,
    pub density: f64,
    pub save_results: Option<String>,
    pub input_sparse_file: Option<String>,
    pub scheduler: Scheduler,
}

impl Config {
    /// Validate CLI flags, turning out-of-range values into
    /// [`DistEmbedError::InvalidConfig`] (spec §7).
    pub fn from_cli(cli: Cli) -> Result<Self> {
        if !(0.0..=1.0).contains(&cli.alpha) {
            return Err(DistEmbedError::InvalidConfig(format!(
                "alpha must be in [0, 1], got {}",
                cli.alpha
            )));
        }
        if cli.batch == 0 {
            return Err(DistEmbedError::InvalidConfig("batch must be > 0".into()));
        }
        if cli.dataset_dim == 0 {
            return Err(DistEmbedError::InvalidConfig("dataset_dim must be > 0".into()));
        }
        if cli.spmm && cli.spgemm {
            return Err(DistEmbedError::InvalidConfig(
                "spmm and spgemm are mutually exclusive".into(),
            ));
        }
        let scheduler = cli
            .scheduler
            .parse::<Scheduler>()
            .map_err(DistEmbedError::InvalidConfig)?;

        Ok(Config {
            input: cli.input,
            output: cli.output,
            batch: cli.batch,
            iter: cli.iter,
            alpha: cli.alpha,
            beta: cli.beta,
            lr: cli.lr,
            nsamples: cli.nsamples,
            dataset_dim: cli.dataset_dim,
            col_major: cli.col_major,
            sync_comm: cli.sync_comm,
            fix_batch_training: cli.fix_batch_training,
            spmm: cli.spmm,
            spgemm: cli.spgemm,
            density: cli.density,
            save_results: cli.save_results,
            input_sparse_file: cli.input_sparse_file,
            scheduler,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_cli() -> Cli {
        Cli {
            input: "in.mtx".into(),
            output: "out.txt".into(),
            batch: 128,
            iter: 10,
            alpha: 0.2,
            beta: 1.0,
            lr: 0.02,
            nsamples: 5,
            dataset_dim: 128,
            col_major: false,
            sync_comm: false,
            fix_batch_training: false,
            spmm: false,
            spgemm: false,
            density: 0.0,
            save_results: None,
            input_sparse_file: None,
            scheduler: "rayon".into(),
        }
    }

    #[test]
    fn rejects_out_of_range_alpha() {
        let mut cli = base_cli();
        cli.alpha = 1.5;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_zero_batch() {
        let mut cli = base_cli();
        cli.batch = 0;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn rejects_conflicting_modes() {
        let mut cli = base_cli();
        cli.spmm = true;
        cli.spgemm = true;
        assert!(Config::from_cli(cli).is_err());
    }

    #[test]
    fn accepts_valid_config() {
        let cli = base_cli();
        assert!(Config::from_cli(cli).is_ok());
    }
}
