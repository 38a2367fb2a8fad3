//! # mouthsync-core
//!
//! Drives a talking face's mouth from the audio a speech synthesizer is
//! playing.
//!
//! ## Architecture
//!
//! ```text
//! speak(text) → RenderBackend::start ──► BackendNotifier (mpsc)
//!                                              │
//!                                   session task (one per utterance)
//!                                              │
//!                         Chunker::split → EmissionScheduler queue
//!                                              │
//!                         tick (position poll | fixed period | timer)
//!                                              │
//!                         SessionGate → FaceRenderer::on_peak / on_waveform
//! ```
//!
//! Renderer callbacks always come from the session task, one chunk per tick,
//! peak before waveform.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod backend;
pub mod buffering;
pub mod chunker;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod render;
pub mod scheduler;

// Convenience re-exports for downstream crates
pub use backend::{
    BackendCapabilities, BackendHandle, BackendMessage, BackendNotifier, RenderBackend,
    StubFormantBackend, StubStreamingBackend, Utterance, VoiceParameters, WavBackend,
};
pub use engine::{EngineConfig, LipSyncEngine};
pub use error::{MouthSyncError, Result};
pub use ipc::events::{MouthEvent, MouthPayload, SessionId, SessionState, SessionStatusEvent};
pub use render::{BroadcastRenderer, FaceRenderer};
