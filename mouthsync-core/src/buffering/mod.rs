//! Sample-format helpers and the pending-chunk queue.
//!
//! Everything downstream of a render backend works on S16LE mono bytes; the
//! streaming synthesizer's float chunks are converted here before chunking.
//! The queue is a plain FIFO owned by a single session task, so it needs no
//! lock.

pub mod chunk;

use std::collections::VecDeque;

use crate::error::{MouthSyncError, Result};

pub use chunk::{AudioBuffer, Chunk, ChunkingPlan};

/// Bytes per S16 sample.
pub const SAMPLE_WIDTH: usize = 2;

/// Decode S16LE bytes.
///
/// # Errors
/// `MalformedBuffer` when the slice length is not a whole number of samples.
pub fn decode_s16le(bytes: &[u8]) -> Result<Vec<i16>> {
    if bytes.len() % SAMPLE_WIDTH != 0 {
        return Err(MouthSyncError::MalformedBuffer(format!(
            "{} bytes is not a multiple of the {SAMPLE_WIDTH}-byte sample width",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(SAMPLE_WIDTH)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect())
}

pub fn s16_to_le_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Convert float samples in [-1.0, 1.0] to S16LE bytes. Out-of-range and
/// non-finite values are clamped (NaN becomes silence).
pub fn f32_to_s16le(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .map(|&s| {
            let s = if s.is_nan() { 0.0 } else { s.clamp(-1.0, 1.0) };
            (s * i16::MAX as f32).round() as i16
        })
        .flat_map(|s| s.to_le_bytes())
        .collect()
}

/// Strict FIFO of chunks waiting to be shown. Append at the tail, pop at the
/// head, clear on cancel or error.
#[derive(Debug, Default)]
pub struct ChunkQueue {
    pending: VecDeque<Chunk>,
}

impl ChunkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend(&mut self, chunks: impl IntoIterator<Item = Chunk>) {
        self.pending.extend(chunks);
    }

    pub fn front(&self) -> Option<&Chunk> {
        self.pending.front()
    }

    pub fn pop(&mut self) -> Option<Chunk> {
        self.pending.pop_front()
    }

    /// Drop everything still queued, returning how many chunks were discarded.
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending.len();
        self.pending.clear();
        discarded
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
