//! Face-renderer boundary.
//!
//! The engine calls a [`FaceRenderer`] once per emitted chunk: `on_peak`
//! first, then `on_waveform`, always as a pair and always from the session
//! task. Implementations must not block; anything slow belongs on the far side
//! of a channel, which is what [`BroadcastRenderer`] provides.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use tokio::sync::broadcast;

use crate::ipc::events::{MouthEvent, MouthPayload};

/// Receives mouth animation for the active utterance.
pub trait FaceRenderer: Send + Sync + 'static {
    /// Mouth opening for the next chunk (max |sample|, 0..=32768).
    fn on_peak(&self, amplitude: u16);

    /// Samples of the same chunk.
    fn on_waveform(&self, samples: &[i16]);

    /// The active utterance ended. Not called when a session is superseded
    /// by a new `speak`.
    fn on_idle(&self) {}
}

/// Publishes renderer callbacks as [`MouthEvent`]s.
///
/// Sends never block; with no subscribers the events are dropped.
#[derive(Debug, Clone)]
pub struct BroadcastRenderer {
    tx: broadcast::Sender<MouthEvent>,
    seq: Arc<AtomicU64>,
}

impl BroadcastRenderer {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MouthEvent> {
        self.tx.subscribe()
    }

    fn publish(&self, payload: MouthPayload) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let _ = self.tx.send(MouthEvent { seq, payload });
    }
}

impl Default for BroadcastRenderer {
    fn default() -> Self {
        Self::new(256)
    }
}

impl FaceRenderer for BroadcastRenderer {
    fn on_peak(&self, amplitude: u16) {
        self.publish(MouthPayload::Peak { amplitude });
    }

    fn on_waveform(&self, samples: &[i16]) {
        self.publish(MouthPayload::Waveform {
            samples: samples.to_vec(),
        });
    }

    fn on_idle(&self) {
        self.publish(MouthPayload::Idle);
    }
}
