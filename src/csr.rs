//! Tiled CSR store (spec §3, §4.2, §2 item 4 — "SpMat").
//!
//! Grounded in `original_source/cpp/core/sparse_mat.hpp`'s
//! `divide_block_cols` / `sort_by_rows` / `divide_block_rows` /
//! `initialize_CSR_blocks` / `fill_col_ids`. The C++ linked lists of CSR
//! blocks become an arena `Vec<CsrBlock>` indexed by integer node id per
//! design note §9 ("Linked lists of CSR blocks ... map naturally to an
//! arena `Vec<CsrBlock>` with integer node indices per list"); tile
//! boundaries are located with `partition_point` binary search over the
//! row-sorted column block rather than the original's pointer-bumping scan,
//! since by that point the block is already sorted and a bisection is the
//! idiomatic Rust way to locate a boundary in sorted data.

use std::ops::Range;

use bytemuck::{Pod, Zeroable};

use crate::comm::types::Coord;
use crate::par::Scheduler;

/// One CSR block: `row_start` is non-decreasing with `row_start[rows] ==
/// nnz`; `col_idx[j] ∈ [0, gCols)` (or tile-local range when `mod_ind` was
/// set); row index is implied by the `row_start` bucket (spec §3 CSR block
/// invariants).
#[derive(Clone, Debug, Default)]
pub struct CsrBlock<V> {
    pub row_start: Vec<u32>,
    pub col_idx: Vec<u64>,
    pub values: Vec<V>,
    /// Global row this block's local row 0 corresponds to.
    pub row_base: u64,
    /// Global column this block's local col 0 corresponds to (only
    /// meaningful when columns were rebased with `mod_ind`).
    pub col_base: u64,
}

impl<V> CsrBlock<V> {
    pub fn rows(&self) -> usize {
        self.row_start.len().saturating_sub(1)
    }

    pub fn nnz(&self) -> usize {
        self.col_idx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.col_idx.is_empty()
    }

    /// Iterate `(row, col, &value)` triples this block holds, reproducing
    /// the coordinate multiset it was built from (spec §8 property 2).
    pub fn iter_triples(&self) -> impl Iterator<Item = (u64, u64, &V)> + '_ {
        (0..self.rows()).flat_map(move |row| {
            let start = self.row_start[row] as usize;
            let end = self.row_start[row + 1] as usize;
            (start..end).map(move |j| (self.row_base + row as u64, self.col_idx[j], &self.values[j]))
        })
    }
}

/// Per-(list, node) tile index, normal mode: list = row batch, node = col
/// block (peer). Transpose mode: list = col tile, node = global row batch
/// (spec §4.2 step 4).
#[derive(Clone, Debug, Default)]
pub struct CsrBlockList {
    pub nodes: Vec<Vec<usize>>,
}

impl CsrBlockList {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node_count(&self, list_id: usize) -> usize {
        self.nodes[list_id].len()
    }
}

/// Owns the coordinate-derived CSR arena for one rank (spec §2 item 4).
#[derive(Clone, Debug)]
pub struct SpMat<V> {
    arena: Vec<CsrBlock<V>>,
    lists: CsrBlockList,
    pub g_rows: u64,
    pub g_cols: u64,
    pub proc_row_width: u64,
    pub proc_col_width: u64,
    pub block_row_width: u64,
    pub block_col_width: u64,
    pub transpose: bool,
    pub mod_ind: bool,
    pub rank: usize,
    pub world_size: usize,
}

/// Find the row-batch boundaries within `range` of an already row-sorted
/// column block, padding with empty trailing batches so every column block
/// in a construction yields exactly `expected_batches` slots — the "longer,
/// padding" resolution of Open Question (a) that the uniform per-list slot
/// count depends on.
fn divide_block_rows_for_range<V: Pod>(
    coords: &[Coord<V>],
    range: Range<usize>,
    batch_rows: u64,
    base: u64,
    expected_batches: usize,
) -> Vec<usize> {
    let mut starts = Vec::with_capacity(expected_batches + 1);
    starts.push(range.start);
    for b in 0..expected_batches {
        let boundary = base + (b as u64 + 1) * batch_rows;
        let pos = range.start
            + coords[range.start..range.end].partition_point(|c| c.row < boundary);
        let pos = pos.max(*starts.last().unwrap()).min(range.end);
        starts.push(pos);
    }
    *starts.last_mut().unwrap() = range.end;
    starts
}

impl<V: Pod + Clone + Send> SpMat<V> {
    /// Build the tiled CSR store from a rank's (already partitioned)
    /// coordinates (spec §4.2). `batch_rows` is the algorithm driver's
    /// mini-batch size; `considered_col_width` is the tile column width
    /// (equal to `proc_col_width` for a single untiled column block per
    /// peer, or a finer tile width when the SpGEMM tiled transfer variant
    /// is in play, §4.4 "Tiled variant").
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_csr_blocks(
        mut coords: Vec<Coord<V>>,
        g_rows: u64,
        g_cols: u64,
        proc_row_width: u64,
        proc_col_width: u64,
        batch_rows: u64,
        considered_col_width: u64,
        mod_ind: bool,
        transpose: bool,
        rank: usize,
        world_size: usize,
        scheduler: Scheduler,
    ) -> Self {
        // Step 1: divide into column blocks. Normal mode starts at column 0
        // (receiver view spans all gCols); transpose mode starts at this
        // rank's owned column stripe (sender view).
        let col_base = if transpose { proc_col_width * rank as u64 } else { 0 };
        let col_block_starts =
            divide_block_cols_simple(&mut coords, considered_col_width, col_base, mod_ind);
        let col_bases: Vec<u64> = (0..col_block_starts.len() - 1)
            .map(|col_block| col_block_starts_col_base(col_block, considered_col_width, col_base))
            .collect();

        Self::build(
            coords,
            col_block_starts,
            col_bases,
            g_rows,
            g_cols,
            proc_row_width,
            proc_col_width,
            batch_rows,
            considered_col_width,
            mod_ind,
            transpose,
            rank,
            world_size,
            scheduler,
        )
    }

    /// `col_merged` variant of [`Self::initialize_csr_blocks`] (spec §4.2
    /// step 1): when this rank's local columns form a single contiguous
    /// owned range, rotate the coordinate array so that range becomes a
    /// prefix instead of laying out one column block per peer. The result
    /// has exactly two column blocks — owned, then remote — rather than
    /// `world_size` of them, collapsing what would otherwise be a per-peer
    /// fan-out into two.
    #[allow(clippy::too_many_arguments)]
    pub fn initialize_csr_blocks_col_merged(
        coords: Vec<Coord<V>>,
        g_rows: u64,
        g_cols: u64,
        proc_row_width: u64,
        proc_col_width: u64,
        batch_rows: u64,
        mod_ind: bool,
        transpose: bool,
        rank: usize,
        world_size: usize,
        scheduler: Scheduler,
    ) -> Self {
        let owned_lo = rank as u64 * proc_col_width;
        let (coords, col_block_starts) = divide_block_cols_col_merged(coords, owned_lo, proc_col_width, mod_ind);
        let col_bases = vec![owned_lo, 0];

        Self::build(
            coords,
            col_block_starts,
            col_bases,
            g_rows,
            g_cols,
            proc_row_width,
            proc_col_width,
            batch_rows,
            proc_col_width,
            mod_ind,
            transpose,
            rank,
            world_size,
            scheduler,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        mut coords: Vec<Coord<V>>,
        col_block_starts: Vec<usize>,
        col_bases: Vec<u64>,
        g_rows: u64,
        g_cols: u64,
        proc_row_width: u64,
        proc_col_width: u64,
        batch_rows: u64,
        considered_col_width: u64,
        mod_ind: bool,
        transpose: bool,
        rank: usize,
        world_size: usize,
        scheduler: Scheduler,
    ) -> Self {
        // Step 2: sort each column block by (row, col) ascending, in
        // parallel across column blocks — each range is disjoint so no
        // synchronization is needed.
        sort_blocks_by_row(&mut coords, &col_block_starts, scheduler);

        // Step 3/4: divide each column block into row batches and build one
        // CSR block per (col_block, row_batch) slot, inserting into the
        // arena + list structure.
        let row_base_start = if transpose { 0 } else { proc_row_width * rank as u64 };
        let expected_batches = if transpose {
            g_rows.div_ceil(batch_rows) as usize
        } else {
            proc_row_width.div_ceil(batch_rows) as usize
        };

        let num_col_blocks = col_block_starts.len() - 1;
        let mut arena = Vec::new();
        let num_lists = if transpose { num_col_blocks } else { expected_batches };
        let mut lists = vec![Vec::with_capacity(if transpose { expected_batches } else { num_col_blocks }); num_lists];

        for (col_block, window) in col_block_starts.windows(2).enumerate() {
            let range = window[0]..window[1];
            let row_starts =
                divide_block_rows_for_range(&coords, range, batch_rows, row_base_start, expected_batches);

            for batch in 0..expected_batches {
                let r = row_starts[batch]..row_starts[batch + 1];
                let row_base = row_base_start + batch as u64 * batch_rows;
                let rows = if batch + 1 == expected_batches {
                    // last batch may be short
                    let last_row_width = if transpose {
                        g_rows - row_base.min(g_rows)
                    } else {
                        proc_row_width - batch as u64 * batch_rows
                    };
                    last_row_width.min(batch_rows).max(0) as usize
                } else {
                    batch_rows as usize
                };
                let mut row_start = vec![0u32; rows + 1];
                for idx in r.clone() {
                    let local_row = ((coords[idx].row - row_base) as usize).min(rows.saturating_sub(1));
                    row_start[local_row + 1] += 1;
                }
                for i in 1..=rows {
                    row_start[i] += row_start[i - 1];
                }
                let nnz = r.len();
                let mut col_idx = vec![0u64; nnz];
                let mut values = vec![V::zeroed(); nnz];
                let mut cursor = row_start.clone();
                for idx in r.clone() {
                    let local_row = ((coords[idx].row - row_base) as usize).min(rows.saturating_sub(1));
                    let slot = cursor[local_row] as usize;
                    col_idx[slot] = coords[idx].col;
                    values[slot] = coords[idx].value.clone();
                    cursor[local_row] += 1;
                }
                let block = CsrBlock {
                    row_start,
                    col_idx,
                    values,
                    row_base,
                    col_base: col_bases[col_block],
                };
                let node_id = arena.len();
                arena.push(block);
                if transpose {
                    lists[col_block].push(node_id);
                } else {
                    lists[batch].push(node_id);
                }
            }
        }

        SpMat {
            arena,
            lists: CsrBlockList { nodes: lists },
            g_rows,
            g_cols,
            proc_row_width,
            proc_col_width,
            block_row_width: batch_rows,
            block_col_width: considered_col_width,
            transpose,
            mod_ind,
            rank,
            world_size,
        }
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn node_count(&self, list_id: usize) -> usize {
        self.lists.node_count(list_id)
    }

    pub fn block(&self, list_id: usize, node_id: usize) -> Option<&CsrBlock<V>> {
        self.lists.nodes[list_id].get(node_id).map(|&idx| &self.arena[idx])
    }

    pub fn all_blocks(&self) -> impl Iterator<Item = &CsrBlock<V>> {
        self.arena.iter()
    }

    /// Enumerate the column ids referenced by block (list_id, node_id),
    /// optionally rebased to global ids (spec §4.2 `fill_col_ids`). `col_base`
    /// is already an absolute global offset in both modes (normal mode starts
    /// dividing column blocks at 0, transpose mode starts at `rank *
    /// proc_col_width`), so no further per-mode adjustment is needed here.
    pub fn fill_col_ids(&self, list_id: usize, node_id: usize, return_global_ids: bool) -> Vec<u64> {
        let Some(block) = self.block(list_id, node_id) else {
            return Vec::new();
        };
        if !return_global_ids || !self.mod_ind {
            return block.col_idx.clone();
        }
        block.col_idx.iter().map(|&v| v + block.col_base).collect()
    }

    /// Collect every `(col, value)` pair this rank stores for global row
    /// `global_row`, scanning every block that covers it. Used by the
    /// SpGEMM driver to pack a specific sparse row into a `SpTuple` record
    /// (spec §4.4 "Sparse variant") — not on the hot path of the main
    /// attractive/repulsive loop, which never needs a single arbitrary row.
    pub fn local_row(&self, global_row: u64) -> Vec<(u64, V)> {
        let mut out = Vec::new();
        for block in &self.arena {
            if global_row < block.row_base || global_row - block.row_base >= block.rows() as u64 {
                continue;
            }
            let row = (global_row - block.row_base) as usize;
            let start = block.row_start[row] as usize;
            let end = block.row_start[row + 1] as usize;
            for j in start..end {
                out.push((block.col_idx[j] + block.col_base, block.values[j].clone()));
            }
        }
        out
    }
}

fn col_block_starts_col_base(col_block: usize, width: u64, base: u64) -> u64 {
    base + col_block as u64 * width
}

/// Clean re-implementation of column-block division: locate boundaries by
/// scanning the (column-major-sorted) coordinate list once, optionally
/// rebasing `col` to a tile-local index as each boundary is crossed.
fn divide_block_cols_simple<V: Pod>(
    coords: &mut [Coord<V>],
    batch_cols: u64,
    base: u64,
    mod_ind: bool,
) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut current_start = base;
    let mut block_base = base;
    for i in 0..coords.len() {
        while coords[i].col >= current_start {
            starts.push(i);
            block_base = current_start;
            current_start += batch_cols;
        }
        if mod_ind {
            coords[i].col -= block_base;
        }
    }
    starts.push(coords.len());
    starts
}

/// `col_merged` column division (spec §4.2 step 1): stable-partition the
/// coordinates so every entry whose column falls in `[owned_lo, owned_lo +
/// width)` comes first, producing exactly two blocks — `[0, owned_count)`
/// owned, `[owned_count, len)` remote — instead of one block per peer.
/// Optionally rebase the owned block's columns to `[0, width)` when
/// `mod_ind` is set, mirroring `divide_block_cols_simple`'s rebasing.
fn divide_block_cols_col_merged<V: Pod>(
    mut coords: Vec<Coord<V>>,
    owned_lo: u64,
    width: u64,
    mod_ind: bool,
) -> (Vec<Coord<V>>, Vec<usize>) {
    let owned_hi = owned_lo + width;
    let is_owned = |c: &Coord<V>| c.col >= owned_lo && c.col < owned_hi;
    coords.sort_by_key(|c| !is_owned(c));
    let owned_count = coords.iter().take_while(|c| is_owned(c)).count();
    if mod_ind {
        for c in coords[..owned_count].iter_mut() {
            c.col -= owned_lo;
        }
    }
    (coords, vec![0, owned_count, coords.len()])
}

fn sort_blocks_by_row<V: Pod + Send>(coords: &mut [Coord<V>], block_col_starts: &[usize], scheduler: Scheduler) {
    if block_col_starts.len() < 2 {
        return;
    }
    match scheduler {
        Scheduler::Sequential => {
            for window in block_col_starts.windows(2) {
                coords[window[0]..window[1]].sort_unstable_by_key(|c| (c.row, c.col));
            }
        }
        Scheduler::Rayon => {
            use rayon::prelude::*;
            // Build disjoint mutable sub-slices by repeatedly splitting the
            // front off the remaining tail, then sort each independently —
            // same disjoint-range idiom the teacher uses for its per-chunk
            // gradient/cost kernels.
            let mut rest = coords;
            let mut ranges: Vec<&mut [Coord<V>]> = Vec::with_capacity(block_col_starts.len() - 1);
            let mut prev = 0usize;
            for &boundary in &block_col_starts[1..] {
                let (left, right) = rest.split_at_mut(boundary - prev);
                ranges.push(left);
                rest = right;
                prev = boundary;
            }
            ranges.into_par_iter().for_each(|slice| {
                slice.sort_unstable_by_key(|c| (c.row, c.col));
            });
        }
    }
}
