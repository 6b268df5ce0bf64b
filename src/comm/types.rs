//! Typed wire descriptors (spec §6 "Wire types").
//!
//! Real MPI datatype registration is out of scope for this engine (§1/§6);
//! what the communication layer actually needs is a fixed, `Pod` layout it
//! can reinterpret as bytes for the `all_to_all_v` transport in
//! [`crate::comm`]. `bytemuck` gives us that without hand-rolled
//! (de)serialization, the same way the teacher crate uses it for its own
//! fixed-layout geometry types.

use bytemuck::{Pod, Zeroable};

/// `(row, col, value)` triple used during partitioning (§3, §6 `Coord`).
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Coord<V: Pod> {
    pub row: u64,
    pub col: u64,
    pub value: V,
}

impl<V: Pod> Coord<V> {
    pub fn new(row: u64, col: u64, value: V) -> Self {
        Self { row, col, value }
    }
}

/// One dense embedding row keyed by its global column id (§6 `DenseTuple`).
///
/// `D` is the embedding dimension, fixed at compile time the way the
/// original engine fixes `embedding_dim` as a template constant.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct DenseTuple<V: Pod, const D: usize> {
    pub col: u64,
    pub value: [V; D],
}

/// A fixed-size sparse tile record used by the sparse (SpMM/SpGEMM) transfer
/// variant (§4.4 "Sparse variant"). Multiple source rows may be packed into
/// one record; `rows[0]` is the next row-index cursor and `rows[1]` the next
/// col/value cursor, per spec.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct SpTuple<V: Pod, const R: usize, const D: usize> {
    pub rows: [u64; R],
    pub cols: [u64; D],
    pub values: [V; D],
    pub offset: u64,
}

/// Per-tile push/pull negotiation metadata (§4.4 "Tiled variant").
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct TileTuple {
    pub batch_id: i32,
    pub tile_id: i32,
    pub count: i32,
    pub send_merge_count: i32,
}

impl TileTuple {
    /// mode = (count <= send_merge_count) ? pull : push — the side with the
    /// lower data volume wins.
    pub fn mode(&self) -> TileMode {
        if self.count <= self.send_merge_count {
            TileMode::Pull
        } else {
            TileMode::Push
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileMode {
    Push,
    Pull,
}
