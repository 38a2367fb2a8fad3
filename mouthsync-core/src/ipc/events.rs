//! Event types emitted by the engine.
//!
//! | Event | Published by |
//! |-------|--------------|
//! | `MouthEvent` | `BroadcastRenderer` |
//! | `SessionStatusEvent` | `LipSyncEngine::subscribe_status` |

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Session identity
// ---------------------------------------------------------------------------

/// Identity of one utterance session. Strictly increasing per engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "utt-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Mouth events
// ---------------------------------------------------------------------------

/// One face-renderer callback, in serialisable form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MouthEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    pub payload: MouthPayload,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum MouthPayload {
    /// Mouth opening for the chunk, max |sample|.
    Peak { amplitude: u16 },
    /// Raw chunk samples for waveform-driven faces.
    Waveform { samples: Vec<i16> },
    /// The utterance ended; the face should return to rest.
    Idle,
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Lifecycle state of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing is speaking.
    #[default]
    Idle,
    /// Previous session torn down, backend being started.
    Building,
    /// Backend is delivering buffers.
    Running,
    /// Backend finished; queued chunks are still being emitted.
    Draining,
    /// Backend failed or stalled; queued chunks discarded.
    Erroring,
}

/// Emitted whenever the lifecycle state changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    /// `None` once the engine is idle with no session attached.
    pub session: Option<SessionId>,
    pub status: SessionState,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}
