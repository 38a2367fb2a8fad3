//! Render-backend abstraction.
//!
//! A render backend turns an [`Utterance`] into audible PCM and, as a side
//! channel, pushes the same PCM to the engine as [`BackendMessage`]s through a
//! [`BackendNotifier`]. Backends differ in two capabilities only:
//!
//! - whether they can report the true playback position, and
//! - whether they deliver audio incrementally or as one buffer.
//!
//! The engine picks a scheduling strategy from those capabilities; it never
//! matches on the concrete backend type.
//!
//! Methods take `&mut self` because backends own a playback device and worker
//! state. All access is serialised through `BackendHandle`'s
//! `parking_lot::Mutex`.

pub mod stub;
pub mod wav;

pub use stub::{StubFormantBackend, StubStreamingBackend};
pub use wav::WavBackend;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::trace;

use crate::buffering::AudioBuffer;
use crate::error::{MouthSyncError, Result};
use crate::ipc::events::SessionId;
use crate::scheduler::SchedulingMode;

pub const PITCH_MIN: u32 = 0;
pub const PITCH_MAX: u32 = 200;
pub const RATE_MIN: u32 = 0;
pub const RATE_MAX: u32 = 200;
/// Midpoint of the pitch/rate scale; maps to a backend offset of zero.
const SCALE_CENTER: i32 = 100;

/// Voice settings handed to the backend with every utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceParameters {
    pub voice: String,
    /// 0..=200, 100 is neutral.
    pub pitch: u32,
    /// 0..=200, 100 is neutral.
    pub rate: u32,
}

impl VoiceParameters {
    pub fn new(voice: impl Into<String>, pitch: u32, rate: u32) -> Self {
        Self {
            voice: voice.into(),
            pitch: pitch.clamp(PITCH_MIN, PITCH_MAX),
            rate: rate.clamp(RATE_MIN, RATE_MAX),
        }
    }

    /// Signed pitch in −100..=100 as formant synthesizers expect it.
    pub fn pitch_offset(&self) -> i32 {
        self.pitch.min(PITCH_MAX) as i32 - SCALE_CENTER
    }

    /// Signed rate in −100..=100.
    pub fn rate_offset(&self) -> i32 {
        self.rate.min(RATE_MAX) as i32 - SCALE_CENTER
    }
}

impl Default for VoiceParameters {
    fn default() -> Self {
        Self::new("default", 100, 100)
    }
}

/// One speak request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub text: String,
    pub voice: VoiceParameters,
}

impl Utterance {
    pub fn new(text: impl Into<String>, voice: VoiceParameters) -> Self {
        Self {
            text: text.into(),
            voice,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub supports_position_query: bool,
    pub delivers_incrementally: bool,
}

impl BackendCapabilities {
    /// Position polling whenever the backend can report where playback is;
    /// timer-based emission otherwise.
    pub fn scheduling_mode(&self) -> SchedulingMode {
        if self.supports_position_query {
            SchedulingMode::PositionPolling
        } else {
            SchedulingMode::Timer
        }
    }
}

/// Notifications a backend sends during one utterance: any number of
/// `Buffer`/`Warning`, then exactly one of `EndOfStream` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    Buffer(AudioBuffer),
    Warning(String),
    EndOfStream,
    Error { code: i32, message: String },
}

/// Sending half handed to a backend at `start()`. Cheap to clone; sends after
/// the session is gone are silently dropped.
#[derive(Debug, Clone)]
pub struct BackendNotifier {
    session: SessionId,
    tx: mpsc::UnboundedSender<BackendMessage>,
}

impl BackendNotifier {
    pub fn new(session: SessionId, tx: mpsc::UnboundedSender<BackendMessage>) -> Self {
        Self { session, tx }
    }

    /// Create a notifier and the receiving end the session task drains.
    pub fn channel(session: SessionId) -> (Self, mpsc::UnboundedReceiver<BackendMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(session, tx), rx)
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Returns `false` once the session has ended.
    pub fn send(&self, message: BackendMessage) -> bool {
        let delivered = self.tx.send(message).is_ok();
        if !delivered {
            trace!(session = %self.session, "notification dropped, session gone");
        }
        delivered
    }

    pub fn buffer(&self, buffer: AudioBuffer) -> bool {
        self.send(BackendMessage::Buffer(buffer))
    }

    pub fn warning(&self, detail: impl Into<String>) -> bool {
        self.send(BackendMessage::Warning(detail.into()))
    }

    pub fn end_of_stream(&self) -> bool {
        self.send(BackendMessage::EndOfStream)
    }

    pub fn error(&self, code: i32, message: impl Into<String>) -> bool {
        self.send(BackendMessage::Error {
            code,
            message: message.into(),
        })
    }
}

/// Contract for audio render backends.
pub trait RenderBackend: Send + 'static {
    /// Short name for logs.
    fn name(&self) -> &str;

    fn capabilities(&self) -> BackendCapabilities;

    /// Begin rendering `utterance`. Audio for the face goes to `notifier`.
    ///
    /// # Errors
    /// Returns an error if the backend could not begin playback; no
    /// notification is expected afterwards.
    fn start(&mut self, utterance: &Utterance, notifier: BackendNotifier) -> Result<()>;

    /// Stop playback and release the output device. Must be idempotent.
    fn stop(&mut self);

    /// Current playback position in the buffers' `pts` timeline.
    ///
    /// # Errors
    /// `PositionUnavailable` when the backend cannot answer right now.
    fn query_position(&mut self) -> Result<Duration> {
        Err(MouthSyncError::PositionUnavailable(format!(
            "{} does not report playback position",
            self.name()
        )))
    }
}

/// Thread-safe reference-counted handle to any `RenderBackend` implementor.
#[derive(Clone)]
pub struct BackendHandle(pub Arc<Mutex<dyn RenderBackend>>);

impl BackendHandle {
    pub fn new<B: RenderBackend>(backend: B) -> Self {
        Self(Arc::new(Mutex::new(backend)))
    }
}

impl std::fmt::Debug for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendHandle").finish_non_exhaustive()
    }
}
