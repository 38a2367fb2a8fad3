//! Emission scheduler: decides when the head of the pending queue is shown.
//!
//! ## Strategies
//!
//! | Strategy | Used when | Tick | Emits when |
//! |----------|-----------|------|------------|
//! | `PositionPolling` | backend reports playback position | `poll_period` | position ≥ head timestamp |
//! | `FixedPeriod` | a position query failed once | `fallback_period` | every tick |
//! | `Timer` | backend streams without position | per-utterance interval | every tick |
//!
//! At most one chunk is emitted per tick, including when playback is far
//! ahead of the queue. The scheduler owns no timer itself: the session loop
//! sleeps until [`EmissionScheduler::next_deadline`] and then calls
//! [`EmissionScheduler::tick`].

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use crate::buffering::{Chunk, ChunkQueue};
use crate::chunker::ChunkedBuffer;
use crate::error::Result;

/// Scheduling strategy chosen from backend capability at session start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulingMode {
    PositionPolling,
    /// Entered permanently after a failed position query.
    FixedPeriod,
    Timer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_period: Duration,
    pub fallback_period: Duration,
    pub min_timer_interval: Duration,
    /// Timer interval used before any chunk has been counted.
    pub default_timer_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(25),
            fallback_period: Duration::from_millis(25),
            min_timer_interval: Duration::from_millis(10),
            default_timer_interval: Duration::from_millis(25),
        }
    }
}

/// Even spacing for timer-based emission: `total_duration / chunk_count`,
/// never below `min`. With no chunks counted, `fallback` is returned.
pub fn timer_interval(
    total_duration: Duration,
    chunk_count: usize,
    min: Duration,
    fallback: Duration,
) -> Duration {
    let Ok(count) = u32::try_from(chunk_count) else {
        return min;
    };
    if count == 0 {
        return fallback.max(min);
    }
    (total_duration / count).max(min)
}

#[derive(Debug)]
pub struct EmissionScheduler {
    mode: SchedulingMode,
    config: SchedulerConfig,
    queue: ChunkQueue,
    total_duration: Duration,
    total_chunks: usize,
    next_tick: Option<Instant>,
}

impl EmissionScheduler {
    pub fn new(mode: SchedulingMode, config: SchedulerConfig) -> Self {
        Self {
            mode,
            config,
            queue: ChunkQueue::new(),
            total_duration: Duration::ZERO,
            total_chunks: 0,
            next_tick: None,
        }
    }

    pub fn mode(&self) -> SchedulingMode {
        self.mode
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.next_tick
    }

    /// Current spacing between timer-mode emissions.
    pub fn interval(&self) -> Duration {
        timer_interval(
            self.total_duration,
            self.total_chunks,
            self.config.min_timer_interval,
            self.config.default_timer_interval,
        )
    }

    /// Append a freshly chunked buffer. Arms the first tick if the scheduler
    /// was idle; an already armed scheduler keeps its deadline.
    pub fn enqueue(&mut self, chunked: ChunkedBuffer, now: Instant) {
        if chunked.chunks.is_empty() {
            return;
        }
        self.total_duration = self.total_duration.saturating_add(chunked.duration);
        self.total_chunks = self.total_chunks.saturating_add(chunked.chunks.len());
        self.queue.extend(chunked.chunks);

        if self.next_tick.is_none() {
            self.next_tick = Some(now + self.period());
        }
    }

    /// Handle a due tick. `position` is only queried in polling mode.
    ///
    /// Returns the chunk to show now, if any, and re-arms the next tick while
    /// chunks remain.
    pub fn tick<F>(&mut self, now: Instant, position: F) -> Option<Chunk>
    where
        F: FnOnce() -> Result<Duration>,
    {
        self.next_tick = None;
        let head_ts = self.queue.front()?.timestamp;

        if self.mode == SchedulingMode::PositionPolling {
            match position() {
                Ok(pos) if pos < head_ts => {
                    self.next_tick = Some(now + self.config.poll_period);
                    return None;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "position query failed, switching to fixed-period draining");
                    self.mode = SchedulingMode::FixedPeriod;
                }
            }
        }

        let chunk = self.queue.pop();
        if !self.queue.is_empty() {
            self.next_tick = Some(now + self.period());
        }
        chunk
    }

    /// Drop everything still queued and disarm. Returns the discarded count.
    pub fn clear(&mut self) -> usize {
        self.next_tick = None;
        let discarded = self.queue.clear();
        if discarded > 0 {
            debug!(discarded, "pending chunks discarded");
        }
        discarded
    }

    fn period(&self) -> Duration {
        match self.mode {
            SchedulingMode::PositionPolling => self.config.poll_period,
            SchedulingMode::FixedPeriod => self.config.fallback_period,
            SchedulingMode::Timer => self.interval(),
        }
    }
}
