//! Coordinate store — the in-memory list of `(row, col, value)` triples
//! owned by a rank after partitioning (spec §2 item 2, §3).

use bytemuck::Pod;

use crate::comm::types::Coord;

/// Owning view over this rank's slice of the global coordinate list, plus
/// the global shape it was cut from.
///
/// Lifecycle (§3): created by the reader, mutated only by the partitioner,
/// never mutated again once [`crate::csr::SpMat::initialize_csr_blocks`] has
/// run.
#[derive(Clone, Debug)]
pub struct CoordinateStore<V: Pod> {
    pub coords: Vec<Coord<V>>,
    pub g_rows: u64,
    pub g_cols: u64,
    pub g_nnz: u64,
    /// `true`: rank r owns columns `[r*W_col, (r+1)*W_col)` (sender/transpose
    /// view). `false`: rank r owns rows `[r*W_row, (r+1)*W_row)` (receiver
    /// view).
    pub col_partitioned: bool,
}

impl<V: Pod> CoordinateStore<V> {
    pub fn new(coords: Vec<Coord<V>>, g_rows: u64, g_cols: u64, g_nnz: u64, col_partitioned: bool) -> Self {
        Self {
            coords,
            g_rows,
            g_cols,
            g_nnz,
            col_partitioned,
        }
    }

    pub fn len(&self) -> usize {
        self.coords.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coords.is_empty()
    }

    /// `W_row = ceil(g_rows / world_size)`, the row stripe width every rank
    /// but the last owns exactly (spec §3).
    pub fn row_stripe_width(&self, world_size: usize) -> u64 {
        self.g_rows.div_ceil(world_size as u64)
    }

    /// `W_col = ceil(g_cols / world_size)`.
    pub fn col_stripe_width(&self, world_size: usize) -> u64 {
        self.g_cols.div_ceil(world_size as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_widths_round_up() {
        let store: CoordinateStore<f32> = CoordinateStore::new(vec![], 10_000, 7, 0, false);
        assert_eq!(store.row_stripe_width(3), 3334);
        assert_eq!(store.col_stripe_width(3), 3);
    }
}
