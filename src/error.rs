//! Error kinds for the engine (spec §7).
//!
//! Partition/CSR errors are fatal: callers should treat them as reasons to
//! abort the communicator, not retry. `CacheMiss` is the one recoverable
//! kind — call sites decide per use whether a miss degrades to a
//! zero-contribution or triggers a re-fetch.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DistEmbedError {
    #[error("io error: {0}")]
    IoError(String),

    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("integer overflow: {0}")]
    IntegerOverflow(String),

    #[error("collective communication failure: {0}")]
    CommFailure(String),

    #[error("cache miss for peer {peer} column {col} (batch {batch_id}, iteration {iteration})")]
    CacheMiss {
        peer: usize,
        col: u64,
        batch_id: u64,
        iteration: u64,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, DistEmbedError>;
