//! Deterministic stand-ins for the two synthesizer families.
//!
//! Neither produces intelligible speech. They render a "babble" of tone
//! bursts shaped by the text (vowels loud and long, consonants short and
//! soft, spaces and punctuation silent) so that the whole engine path can be
//! exercised without a real synthesizer:
//!
//! - [`StubFormantBackend`] renders the utterance up front and delivers one
//!   buffer with a reliable duration, then reports playback position from a
//!   clock.
//! - [`StubStreamingBackend`] renders word by word on a Tokio task with a
//!   configurable per-chunk latency, as float chunks without duration
//!   metadata, and cannot report playback position.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;

use crate::backend::{
    BackendCapabilities, BackendNotifier, RenderBackend, Utterance, VoiceParameters,
};
use crate::buffering::{f32_to_s16le, AudioBuffer};
use crate::error::{MouthSyncError, Result};

const BASE_PITCH_HZ: f32 = 140.0;
const VOWEL_MS: f32 = 70.0;
const CONSONANT_MS: f32 = 40.0;
const PAUSE_MS: f32 = 60.0;
const VOWEL_LEVEL: f32 = 0.6;
const CONSONANT_LEVEL: f32 = 0.25;

/// Render `text` as tone-burst babble at `sample_rate`.
pub fn render_babble(text: &str, voice: &VoiceParameters, sample_rate: u32) -> Vec<f32> {
    // rate 200 → twice as fast, rate 0 → half speed
    let speed = 2f32.powf(voice.rate_offset() as f32 / 100.0);
    let freq = BASE_PITCH_HZ * 2f32.powf(voice.pitch_offset() as f32 / 200.0);
    let rate = sample_rate.max(1) as f32;

    let mut out = Vec::new();
    for c in text.chars() {
        let (ms, level) = match c.to_ascii_lowercase() {
            'a' | 'e' | 'i' | 'o' | 'u' | 'y' => (VOWEL_MS, VOWEL_LEVEL),
            c if c.is_alphanumeric() => (CONSONANT_MS, CONSONANT_LEVEL),
            _ => (PAUSE_MS, 0.0),
        };
        let len = (ms / speed * rate / 1000.0).round() as usize;
        let start = out.len();
        out.extend((0..len).map(|i| {
            let t = (start + i) as f32 / rate;
            // Short linear fade at both ends of every burst.
            let edge = (i.min(len - i) as f32 / (rate * 0.005)).min(1.0);
            level * edge * (2.0 * std::f32::consts::PI * freq * t).sin()
        }));
    }
    out
}

fn duration_of(samples: usize, sample_rate: u32) -> Duration {
    Duration::from_nanos(samples as u64 * 1_000_000_000 / u64::from(sample_rate.max(1)))
}

/// Single-buffer backend with a reliable duration and a playback clock.
#[derive(Debug)]
pub struct StubFormantBackend {
    sample_rate: u32,
    started_at: Option<Instant>,
}

impl StubFormantBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            started_at: None,
        }
    }
}

impl Default for StubFormantBackend {
    fn default() -> Self {
        Self::new(16_000)
    }
}

impl RenderBackend for StubFormantBackend {
    fn name(&self) -> &str {
        "stub-formant"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_position_query: true,
            delivers_incrementally: false,
        }
    }

    fn start(&mut self, utterance: &Utterance, notifier: BackendNotifier) -> Result<()> {
        let samples = render_babble(&utterance.text, &utterance.voice, self.sample_rate);
        let duration = duration_of(samples.len(), self.sample_rate);
        debug!(
            session = %notifier.session(),
            samples = samples.len(),
            pitch = utterance.voice.pitch_offset(),
            rate = utterance.voice.rate_offset(),
            "StubFormantBackend rendered utterance"
        );

        self.started_at = Some(Instant::now());
        notifier.buffer(AudioBuffer::new(
            f32_to_s16le(&samples),
            Some(duration),
            Duration::ZERO,
        ));
        notifier.end_of_stream();
        Ok(())
    }

    fn stop(&mut self) {
        if self.started_at.take().is_some() {
            debug!("StubFormantBackend::stop");
        }
    }

    fn query_position(&mut self) -> Result<Duration> {
        self.started_at
            .map(|t| t.elapsed())
            .ok_or_else(|| MouthSyncError::PositionUnavailable("not playing".into()))
    }
}

/// Word-by-word float-chunk backend without position reporting.
#[derive(Debug)]
pub struct StubStreamingBackend {
    sample_rate: u32,
    chunk_latency: Duration,
    worker: Option<JoinHandle<()>>,
}

impl StubStreamingBackend {
    pub fn new(sample_rate: u32, chunk_latency: Duration) -> Self {
        Self {
            sample_rate,
            chunk_latency,
            worker: None,
        }
    }
}

impl Default for StubStreamingBackend {
    fn default() -> Self {
        Self::new(16_000, Duration::from_millis(30))
    }
}

impl RenderBackend for StubStreamingBackend {
    fn name(&self) -> &str {
        "stub-streaming"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_position_query: false,
            delivers_incrementally: true,
        }
    }

    fn start(&mut self, utterance: &Utterance, notifier: BackendNotifier) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| MouthSyncError::NoRuntime)?;
        self.stop();

        let words: Vec<String> = utterance
            .text
            .split_whitespace()
            .map(|w| format!("{w} "))
            .collect();
        let voice = utterance.voice.clone();
        let sample_rate = self.sample_rate;
        let latency = self.chunk_latency;

        self.worker = Some(runtime.spawn(async move {
            let mut pts = Duration::ZERO;
            for (i, word) in words.iter().enumerate() {
                tokio::time::sleep(latency).await;
                let samples = render_babble(word, &voice, sample_rate);
                let duration = duration_of(samples.len(), sample_rate);
                debug!(chunk = i, samples = samples.len(), "streaming chunk rendered");
                // Streaming synthesizers do not report a usable duration.
                if !notifier.buffer(AudioBuffer::new(f32_to_s16le(&samples), None, pts)) {
                    return;
                }
                pts = pts.saturating_add(duration);
            }
            notifier.end_of_stream();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
            debug!("StubStreamingBackend::stop, worker aborted");
        }
    }
}
