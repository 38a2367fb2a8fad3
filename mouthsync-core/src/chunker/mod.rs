//! Splits one arrived audio buffer into fixed-period animation chunks.
//!
//! ## Algorithm
//!
//! 1. Resolve a trusted duration (see [`duration`]).
//! 2. Derive a [`ChunkingPlan`]: a byte stride proportional to the chunk
//!    period, aligned to the sample width, never zero.
//! 3. Walk the buffer in strides. Each stride is decoded as S16LE and gets a
//!    peak amplitude. An empty or undecodable stride ends the walk; whatever
//!    was produced before it is kept.
//! 4. Timestamps start at the buffer's `pts` and advance by exactly one
//!    period per chunk, even when the last stride is short.
//! 5. The walk ends once the timestamp reaches `pts + duration`.

pub mod duration;

use std::time::Duration;

use tracing::{debug, warn};

use crate::buffering::{decode_s16le, AudioBuffer, Chunk, ChunkingPlan};

pub use duration::DurationEstimator;

/// Output of one chunking pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedBuffer {
    pub chunks: Vec<Chunk>,
    /// Duration the buffer was treated as having.
    pub duration: Duration,
    /// `None` for an empty buffer.
    pub plan: Option<ChunkingPlan>,
}

impl ChunkedBuffer {
    fn empty(duration: Duration) -> Self {
        Self {
            chunks: Vec::new(),
            duration,
            plan: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    period: Duration,
    min_chunk_bytes: usize,
    estimator: DurationEstimator,
}

impl Chunker {
    pub fn new(period: Duration, min_chunk_bytes: usize, estimator: DurationEstimator) -> Self {
        Self {
            period,
            min_chunk_bytes,
            estimator,
        }
    }

    /// Consume `buffer` and produce its chunks in playback order.
    pub fn split(&self, buffer: AudioBuffer) -> ChunkedBuffer {
        let size = buffer.size();
        if size == 0 {
            debug!("empty buffer, nothing to chunk");
            return ChunkedBuffer::empty(Duration::ZERO);
        }

        let duration = self.estimator.estimate(buffer.duration, size);
        let Some(plan) =
            ChunkingPlan::derive(size, duration, self.period, self.min_chunk_bytes)
        else {
            return ChunkedBuffer::empty(duration);
        };

        let mut chunks = Vec::with_capacity(plan.chunk_count);
        let mut offset = 0usize;
        let mut when = buffer.pts;
        let last = buffer.pts.saturating_add(duration);

        loop {
            let end = offset.saturating_add(plan.bytes_per_chunk).min(size);
            let raw = buffer.data.get(offset..end).unwrap_or_default();
            if raw.is_empty() {
                debug!(offset, "empty stride, ending walk");
                break;
            }

            let waveform = match decode_s16le(raw) {
                Ok(w) => w,
                Err(e) => {
                    warn!(offset, error = %e, "undecodable stride, ending walk");
                    break;
                }
            };
            if waveform.is_empty() {
                debug!(offset, "stride decoded to no samples, ending walk");
                break;
            }

            chunks.push(Chunk::new(waveform, when));

            offset = end;
            when = when.saturating_add(self.period);
            if when >= last || self.period.is_zero() {
                break;
            }
        }

        debug!(
            size,
            duration_ns = duration.as_nanos() as u64,
            bytes_per_chunk = plan.bytes_per_chunk,
            chunks = chunks.len(),
            "buffer chunked"
        );

        ChunkedBuffer {
            chunks,
            duration,
            plan: Some(plan),
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(Duration::from_millis(50), 4096, DurationEstimator::default())
    }
}
