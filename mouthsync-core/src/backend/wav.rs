//! Pre-recorded WAV playback backend.
//!
//! The file is decoded with `hound` when the backend is opened: the first
//! channel is kept and converted to S16LE. `start()` only hands the clip to
//! the engine, as consecutive segments of at most [`SEGMENT`] with exact
//! durations and contiguous `pts`, so that no declared duration ever exceeds
//! the estimator's plausibility ceiling. Playback position is reported from a
//! clock started at `start()`. The utterance text is ignored.

use std::path::Path;
use std::time::Duration;

use hound::SampleFormat;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::backend::{BackendCapabilities, BackendNotifier, RenderBackend, Utterance};
use crate::buffering::{f32_to_s16le, s16_to_le_bytes, AudioBuffer, SAMPLE_WIDTH};
use crate::error::{MouthSyncError, Result};

/// Longest stretch of audio delivered in one buffer.
pub const SEGMENT: Duration = Duration::from_secs(1);

/// Decoded WAV content ready for the chunker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavClip {
    pub data: Vec<u8>,
    pub duration: Duration,
    pub sample_rate: u32,
}

impl WavClip {
    /// Split the clip into buffers of at most `max` each, timed against the
    /// clip's own sample rate.
    pub fn segments(&self, max: Duration) -> Vec<AudioBuffer> {
        let rate = u64::from(self.sample_rate.max(1));
        let frames_per_segment = (u128::from(rate) * max.as_nanos() / 1_000_000_000).max(1);
        let frames_per_segment = usize::try_from(frames_per_segment).unwrap_or(usize::MAX);
        let at = |frames: usize| Duration::from_nanos(frames as u64 * 1_000_000_000 / rate);

        let mut offset = 0usize;
        self.data
            .chunks(frames_per_segment.saturating_mul(SAMPLE_WIDTH))
            .map(|bytes| {
                let frames = bytes.len() / SAMPLE_WIDTH;
                let pts = at(offset);
                offset += frames;
                AudioBuffer::new(bytes.to_vec(), Some(at(offset) - pts), pts)
            })
            .collect()
    }
}

/// Read `path` and return its first channel as S16LE.
pub fn load_wav(path: &Path) -> Result<WavClip> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let data = match spec.sample_format {
        SampleFormat::Int => {
            let bits = u32::from(spec.bits_per_sample);
            let samples = reader
                .samples::<i32>()
                .step_by(channels)
                .map(|s| s.map(|v| rescale_int(v, bits)))
                .collect::<std::result::Result<Vec<i16>, _>>()?;
            s16_to_le_bytes(&samples)
        }
        SampleFormat::Float => {
            let samples = reader
                .samples::<f32>()
                .step_by(channels)
                .collect::<std::result::Result<Vec<f32>, _>>()?;
            f32_to_s16le(&samples)
        }
    };

    if spec.sample_rate == 0 {
        return Err(MouthSyncError::MalformedBuffer(format!(
            "{} declares a zero sample rate",
            path.display()
        )));
    }
    let frames = (data.len() / 2) as u64;
    let duration =
        Duration::from_nanos(frames * 1_000_000_000 / u64::from(spec.sample_rate));

    debug!(
        path = %path.display(),
        channels,
        sample_rate = spec.sample_rate,
        bits = spec.bits_per_sample,
        frames,
        "WAV decoded"
    );

    Ok(WavClip {
        data,
        duration,
        sample_rate: spec.sample_rate,
    })
}

/// Bring an integer sample of `bits` width to 16 bits.
fn rescale_int(value: i32, bits: u32) -> i16 {
    let shifted = match bits {
        0..=16 => value << (16 - bits.max(1)),
        _ => value >> (bits - 16).min(31),
    };
    shifted.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[derive(Debug)]
pub struct WavBackend {
    label: String,
    clip: WavClip,
    started_at: Option<Instant>,
}

impl WavBackend {
    /// Decode `path` now so that `start()` does no file I/O.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_clip(path.display().to_string(), load_wav(path)?))
    }

    pub fn from_clip(label: impl Into<String>, clip: WavClip) -> Self {
        Self {
            label: label.into(),
            clip,
            started_at: None,
        }
    }
}

impl RenderBackend for WavBackend {
    fn name(&self) -> &str {
        "wav"
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            supports_position_query: true,
            delivers_incrementally: false,
        }
    }

    fn start(&mut self, _utterance: &Utterance, notifier: BackendNotifier) -> Result<()> {
        let segments = self.clip.segments(SEGMENT);
        info!(
            clip = %self.label,
            duration_ms = self.clip.duration.as_millis() as u64,
            sample_rate = self.clip.sample_rate,
            segments = segments.len(),
            "WavBackend playing"
        );

        self.started_at = Some(Instant::now());
        for buffer in segments {
            if !notifier.buffer(buffer) {
                return Ok(());
            }
        }
        notifier.end_of_stream();
        Ok(())
    }

    fn stop(&mut self) {
        self.started_at = None;
    }

    fn query_position(&mut self) -> Result<Duration> {
        self.started_at
            .map(|t| t.elapsed())
            .ok_or_else(|| MouthSyncError::PositionUnavailable("not playing".into()))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::backend::{BackendMessage, VoiceParameters};
    use crate::chunker::Chunker;
    use crate::ipc::events::SessionId;

    type FileWriter = hound::WavWriter<std::io::BufWriter<std::fs::File>>;

    fn write_wav(
        dir: &tempfile::TempDir,
        spec: hound::WavSpec,
        write: impl FnOnce(&mut FileWriter),
    ) -> PathBuf {
        let path = dir.path().join("clip.wav");
        let mut writer = hound::WavWriter::create(&path, spec).expect("create wav");
        write(&mut writer);
        writer.finalize().expect("finalize wav");
        path
    }

    fn mono16(sample_rate: u32) -> hound::WavSpec {
        hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }

    fn drain(rx: &mut UnboundedReceiver<BackendMessage>) -> Vec<BackendMessage> {
        std::iter::from_fn(|| rx.try_recv().ok()).collect()
    }

    #[test]
    fn stereo_int16_keeps_first_channel() {
        let dir = tempfile::tempdir().expect("temp dir");
        let spec = hound::WavSpec {
            channels: 2,
            ..mono16(16_000)
        };
        let path = write_wav(&dir, spec, |w| {
            for i in 0..1_600i16 {
                w.write_sample(i).expect("left");
                w.write_sample(-1i16).expect("right");
            }
        });

        let clip = load_wav(&path).expect("load");
        assert_eq!(clip.duration, Duration::from_millis(100));
        assert_eq!(clip.data.len(), 3_200);
        assert_eq!(&clip.data[2..4], &1i16.to_le_bytes());
        assert_eq!(&clip.data[3_198..], &1_599i16.to_le_bytes());
    }

    #[test]
    fn float_samples_are_converted() {
        let dir = tempfile::tempdir().expect("temp dir");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 32,
            sample_format: SampleFormat::Float,
        };
        let path = write_wav(&dir, spec, |w| {
            for s in [1.0f32, -1.0, 0.0, 2.0] {
                w.write_sample(s).expect("sample");
            }
        });

        let clip = load_wav(&path).expect("load");
        let decoded = crate::buffering::decode_s16le(&clip.data).expect("even length");
        assert_eq!(decoded, vec![i16::MAX, -i16::MAX, 0, i16::MAX]);
        assert_eq!(clip.duration, Duration::from_micros(500));
    }

    #[test]
    fn int_widths_rescale_to_sixteen_bits() {
        assert_eq!(rescale_int(127, 8), 127 << 8);
        assert_eq!(rescale_int(-8_388_608, 24), i16::MIN);
        assert_eq!(rescale_int(1_000, 16), 1_000);
    }

    #[test]
    fn missing_file_fails_open() {
        let err = WavBackend::open("/nonexistent/mouthsync.wav").unwrap_err();
        assert!(matches!(err, MouthSyncError::Wav(_)));
    }

    #[test]
    fn start_delivers_clip_then_eos() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_wav(&dir, mono16(16_000), |w| {
            for _ in 0..800 {
                w.write_sample(500i16).expect("sample");
            }
        });

        let mut backend = WavBackend::open(&path).expect("open");
        drop(dir);

        let (notifier, mut rx) = BackendNotifier::channel(SessionId(10));
        backend
            .start(&Utterance::new("ignored", VoiceParameters::default()), notifier)
            .expect("start");

        let Ok(BackendMessage::Buffer(buffer)) = rx.try_recv() else {
            panic!("expected buffer");
        };
        assert_eq!(buffer.duration, Some(Duration::from_millis(50)));
        assert_eq!(rx.try_recv().ok(), Some(BackendMessage::EndOfStream));
        assert!(backend.query_position().is_ok());
    }

    #[test]
    fn long_clip_keeps_its_own_timeline() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = write_wav(&dir, mono16(44_100), |w| {
            for i in 0..44_100 * 12 {
                w.write_sample(((i % 200) as i16 - 100) * 100).expect("sample");
            }
        });
        let mut backend = WavBackend::open(&path).expect("open");
        assert_eq!(backend.clip.duration, Duration::from_secs(12));

        let (notifier, mut rx) = BackendNotifier::channel(SessionId(11));
        backend
            .start(&Utterance::new("", VoiceParameters::default()), notifier)
            .expect("start");
        let messages = drain(&mut rx);
        assert_eq!(messages.last(), Some(&BackendMessage::EndOfStream));

        let chunker = Chunker::default();
        let mut expected_pts = Duration::ZERO;
        let mut last_timestamp = Duration::ZERO;
        let mut chunks = 0;
        for message in &messages[..messages.len() - 1] {
            let BackendMessage::Buffer(buffer) = message else {
                panic!("unexpected message {message:?}");
            };
            assert_eq!(buffer.pts, expected_pts);
            assert_eq!(buffer.duration, Some(SEGMENT));
            expected_pts += SEGMENT;

            let chunked = chunker.split(buffer.clone());
            assert_eq!(chunked.duration, SEGMENT);
            chunks += chunked.chunks.len();
            if let Some(chunk) = chunked.chunks.last() {
                last_timestamp = chunk.timestamp;
            }
        }

        assert_eq!(expected_pts, Duration::from_secs(12));
        assert_eq!(chunks, 240);
        assert!(last_timestamp < Duration::from_secs(12));
    }

    #[test]
    fn segments_cover_a_short_tail() {
        let clip = WavClip {
            data: vec![0; 2 * 2_500],
            duration: Duration::from_millis(250),
            sample_rate: 10_000,
        };
        let segments = clip.segments(Duration::from_millis(100));
        let timing: Vec<_> = segments.iter().map(|b| (b.pts, b.duration)).collect();
        assert_eq!(
            timing,
            vec![
                (Duration::ZERO, Some(Duration::from_millis(100))),
                (Duration::from_millis(100), Some(Duration::from_millis(100))),
                (Duration::from_millis(200), Some(Duration::from_millis(50))),
            ]
        );
    }
}
