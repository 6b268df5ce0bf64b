//! Dense embedding store (spec §2 item 5, §3 "Dense store").
//!
//! Grounded in `original_source/cpp/core/dense_mat.hpp`'s `DenseMat`: an
//! owned `rows x D` matrix plus one remote-row cache per peer. The original
//! wraps Eigen; here the owned matrix is a flat row-major `Vec<V>` (no
//! linear-algebra library is pulled in since this engine only ever touches
//! one row at a time) and each peer's cache is a `HashMap<u64, CacheEntry>`
//! keyed by global column id, carrying the `(batch_id, iteration)` freshness
//! tag `data_comm.hpp`'s invalidation logic checks before reusing a cached
//! row.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};

/// One cached remote row tagged with the `(batch_id, iteration)` it was
/// installed under (spec §4.3). `temp` marks a per-batch install (the
/// negative-sample fetch: ids change every batch, so the stored `batch_id`
/// must match exactly) versus a durable, per-iteration install (the main
/// CSR-neighbor fetch: valid for every batch of the current iteration, so
/// only `iteration` must match) — the two eviction policies spec §4.3
/// describes ("temp entries dropped when batch_id advances, durable entries
/// when iteration advances") fall out of this single `temp` flag plus
/// [`DenseMat::fetch_from_cache`]'s match rule.
#[derive(Clone, Copy, Debug)]
pub struct CacheEntry<const D: usize> {
    pub value: [f32; D],
    pub batch_id: u64,
    pub iteration: u64,
    pub temp: bool,
}

/// Local `rows x D` embedding matrix plus a per-peer remote-row cache.
pub struct DenseMat<const D: usize> {
    rows: usize,
    data: Vec<f32>,
    cache: Vec<std::collections::HashMap<u64, CacheEntry<D>>>,
}

impl<const D: usize> DenseMat<D> {
    /// Zero-initialized matrix (used when the caller will overwrite every
    /// row, e.g. an output accumulator).
    pub fn zeros(rows: usize, world_size: usize) -> Self {
        Self {
            rows,
            data: vec![0.0f32; rows * D],
            cache: vec![std::collections::HashMap::new(); world_size],
        }
    }

    /// `Normal(init_mean, std)` initialization, seeded for reproducibility
    /// (spec §3 "seeded RNG" requirement) — mirrors the constructor that
    /// takes `init_mean`/`std` in `dense_mat.hpp`.
    pub fn random(rows: usize, world_size: usize, init_mean: f64, std: f64, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let dist = Normal::new(init_mean, std).expect("std must be positive");
        let mut data = vec![0.0f32; rows * D];
        for v in data.iter_mut() {
            *v = dist.sample(&mut rng) as f32;
        }
        Self {
            rows,
            data,
            cache: vec![std::collections::HashMap::new(); world_size],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Copy of the local row at `local_key` (`fetch_local_data`).
    pub fn fetch_local_data(&self, local_key: usize) -> [f32; D] {
        let mut out = [0.0f32; D];
        out.copy_from_slice(&self.data[local_key * D..(local_key + 1) * D]);
        out
    }

    pub fn row(&self, local_key: usize) -> &[f32] {
        &self.data[local_key * D..(local_key + 1) * D]
    }

    pub fn row_mut(&mut self, local_key: usize) -> &mut [f32] {
        &mut self.data[local_key * D..(local_key + 1) * D]
    }

    /// Overwrite a local row in place (write-back after a gradient step).
    pub fn set_row(&mut self, local_key: usize, value: &[f32; D]) {
        self.data[local_key * D..(local_key + 1) * D].copy_from_slice(value);
    }

    /// Insert/refresh a remote row in peer `rank`'s cache (`insert_cache`).
    /// `temp` selects the entry's eviction policy — see [`CacheEntry`].
    pub fn insert_cache(
        &mut self,
        rank: usize,
        key: u64,
        value: [f32; D],
        batch_id: u64,
        iteration: u64,
        temp: bool,
    ) {
        self.cache[rank].insert(key, CacheEntry { value, batch_id, iteration, temp });
    }

    /// `fetch_data_vector_from_cache`: a hit requires `iteration` to match
    /// always, and — for a `temp` (per-batch) entry only — `batch_id` to
    /// match too (spec §4.3). A durable entry installed earlier this
    /// iteration is still a hit for a later batch of the same iteration; a
    /// temp entry from a previous batch never is. Returns `None` on a true
    /// cache miss; callers turn that into
    /// [`crate::error::DistEmbedError::CacheMiss`].
    pub fn fetch_from_cache(&self, rank: usize, key: u64, batch_id: u64, iteration: u64) -> Option<[f32; D]> {
        self.cache[rank]
            .get(&key)
            .filter(|e| e.iteration == iteration && (!e.temp || e.batch_id == batch_id))
            .map(|e| e.value)
    }

    /// Drop every temp (per-batch) cache entry — called at a batch boundary
    /// once that batch's negative samples are no longer needed.
    pub fn evict_temp(&mut self) {
        for peer_cache in self.cache.iter_mut() {
            peer_cache.retain(|_, entry| !entry.temp);
        }
    }

    /// Drop every durable (per-iteration) cache entry — called when an
    /// iteration advances, so the next iteration's first batch starts from a
    /// clean durable cache rather than accumulating stale rows forever.
    pub fn evict_durable(&mut self) {
        for peer_cache in self.cache.iter_mut() {
            peer_cache.retain(|_, entry| entry.temp);
        }
    }

    pub fn cache_len(&self, rank: usize) -> usize {
        self.cache[rank].len()
    }
}
