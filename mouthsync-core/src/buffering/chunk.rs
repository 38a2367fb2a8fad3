//! Typed audio payloads passed from a render backend to the chunker, and the
//! animation chunks the chunker hands to the scheduler.

use std::time::Duration;

/// One raw buffer delivered by a render backend.
///
/// `data` is little-endian signed 16-bit mono PCM. `duration` is whatever the
/// backend declared and may be absent or nonsense; `pts` is the buffer's
/// presentation timestamp in the backend's playback timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    pub data: Vec<u8>,
    pub duration: Option<Duration>,
    pub pts: Duration,
}

impl AudioBuffer {
    pub fn new(data: Vec<u8>, duration: Option<Duration>, pts: Duration) -> Self {
        Self {
            data,
            duration,
            pts,
        }
    }

    /// Encode `samples` as S16LE and wrap them in a buffer.
    pub fn from_samples(samples: &[i16], duration: Option<Duration>, pts: Duration) -> Self {
        Self::new(super::s16_to_le_bytes(samples), duration, pts)
    }

    /// Payload size in bytes.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A fixed-time slice of decoded audio driving one mouth animation step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Decoded samples of this slice, in arrival order.
    pub waveform: Vec<i16>,
    /// `max(|sample|)` over `waveform`. `u16` so that `i16::MIN` fits.
    pub peak: u16,
    /// Position in the playback timeline at which this chunk should show.
    pub timestamp: Duration,
}

impl Chunk {
    pub fn new(waveform: Vec<i16>, timestamp: Duration) -> Self {
        let peak = peak_amplitude(&waveform);
        Self {
            waveform,
            peak,
            timestamp,
        }
    }
}

/// Largest absolute sample value; 0 for an empty or silent slice.
pub fn peak_amplitude(samples: &[i16]) -> u16 {
    samples
        .iter()
        .map(|s| s.unsigned_abs())
        .max()
        .unwrap_or(0)
}

/// How one incoming buffer is sliced.
///
/// `bytes_per_chunk` is always even and never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkingPlan {
    pub bytes_per_chunk: usize,
    pub chunk_count: usize,
}

impl ChunkingPlan {
    /// Derive a plan from buffer size, its (trusted) duration and the target
    /// chunk period. `min_chunk_bytes` is substituted when the proportional
    /// stride rounds down to zero.
    ///
    /// Returns `None` for an empty buffer.
    pub fn derive(
        size: usize,
        duration: Duration,
        period: Duration,
        min_chunk_bytes: usize,
    ) -> Option<Self> {
        if size == 0 {
            return None;
        }

        let duration_ns = duration.as_nanos().max(1);
        let period_ns = period.as_nanos();

        let proportional = (size as u128).saturating_mul(period_ns) / duration_ns;
        let proportional = usize::try_from(proportional).unwrap_or(usize::MAX);
        let mut bytes_per_chunk = align_to_sample(proportional);
        if bytes_per_chunk == 0 {
            bytes_per_chunk = align_to_sample(min_chunk_bytes).max(super::SAMPLE_WIDTH);
        }

        let byte_steps = size.div_ceil(bytes_per_chunk);
        let time_steps = if period_ns == 0 {
            byte_steps
        } else {
            usize::try_from(duration_ns.div_ceil(period_ns)).unwrap_or(usize::MAX)
        };

        Some(Self {
            bytes_per_chunk,
            chunk_count: byte_steps.min(time_steps).max(1),
        })
    }
}

fn align_to_sample(bytes: usize) -> usize {
    bytes / super::SAMPLE_WIDTH * super::SAMPLE_WIDTH
}
