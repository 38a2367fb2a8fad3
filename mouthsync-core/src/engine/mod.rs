//! `LipSyncEngine`: top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! LipSyncEngine::new()
//!     └─► speak()      → previous session cancelled, backend started,
//!                        session task spawned, status = Building → Running
//!         ├─► (EOS)    → Draining → queued chunks emitted → Idle
//!         ├─► (error)  → Erroring → queue discarded, backend stopped → Idle
//!         ├─► (stall)  → same as error, after the grace window
//!         └─► stop()   → backend stopped, task aborted → Idle
//! ```
//!
//! ## Cancellation
//!
//! `speak()` invalidates the active session in the [`gate::SessionGate`]
//! before anything else. Because every renderer callback runs under the gate
//! lock, no event from the old session can be observed once `speak()` has
//! returned, even if its task has not yet been aborted.
//!
//! `speak()` must be called from within a Tokio runtime; the session task is
//! spawned onto it.

pub mod gate;
pub mod session;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    backend::{BackendHandle, BackendNotifier, Utterance, VoiceParameters},
    chunker::{Chunker, DurationEstimator},
    error::{MouthSyncError, Result},
    ipc::events::{SessionId, SessionState, SessionStatusEvent},
    render::FaceRenderer,
    scheduler::SchedulerConfig,
};

use gate::SessionGate;
use session::{DiagnosticsSnapshot, SessionContext, SessionDiagnostics, StatusBoard};

/// Status broadcast capacity: 64 state changes buffered for slow consumers.
const STATUS_CAP: usize = 64;

/// Configuration for `LipSyncEngine`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Playback time covered by one chunk. Default: 50 ms.
    pub chunk_period: Duration,
    /// Position-polling tick. Default: 25 ms.
    pub poll_period: Duration,
    /// Tick after a failed position query. Default: 25 ms.
    pub fallback_period: Duration,
    /// Floor for the timer-mode interval. Default: 10 ms.
    pub min_timer_interval: Duration,
    /// Timer-mode interval before any chunk is counted. Default: 25 ms.
    pub default_timer_interval: Duration,
    /// How long a warning may go unanswered before the session is stopped.
    /// Default: 500 ms.
    pub stall_grace: Duration,
    /// Declared buffer durations above this are ignored. Default: 10 s.
    pub max_plausible_duration: Duration,
    /// Sample rate assumed when estimating durations from byte counts.
    /// Default: 16000.
    pub reference_sample_rate: u32,
    /// Chunk stride used when the computed stride rounds to zero.
    /// Default: 4096 bytes.
    pub min_chunk_bytes: usize,
    pub status_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_period: Duration::from_millis(50),
            poll_period: Duration::from_millis(25),
            fallback_period: Duration::from_millis(25),
            min_timer_interval: Duration::from_millis(10),
            default_timer_interval: Duration::from_millis(25),
            stall_grace: Duration::from_millis(500),
            max_plausible_duration: Duration::from_secs(10),
            reference_sample_rate: 16_000,
            min_chunk_bytes: 4096,
            status_capacity: STATUS_CAP,
        }
    }
}

impl EngineConfig {
    /// Apply `MOUTHSYNC_CHUNK_PERIOD_MS`, `MOUTHSYNC_POLL_PERIOD_MS` and
    /// `MOUTHSYNC_STALL_GRACE_MS` from the process environment.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::with_env_overrides`] with an arbitrary lookup.
    /// Unparseable values are ignored; parsed values are clamped.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, min: u64, max: u64| {
            lookup(key)
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(|v| Duration::from_millis(v.clamp(min, max)))
        };

        if let Some(v) = millis("MOUTHSYNC_CHUNK_PERIOD_MS", 5, 500) {
            self.chunk_period = v;
        }
        if let Some(v) = millis("MOUTHSYNC_POLL_PERIOD_MS", 1, 200) {
            self.poll_period = v;
        }
        if let Some(v) = millis("MOUTHSYNC_STALL_GRACE_MS", 50, 10_000) {
            self.stall_grace = v;
        }
        self
    }

    /// Raise zero periods and floors to their smallest legal value.
    pub fn sanitized(mut self) -> Self {
        let one_ms = Duration::from_millis(1);
        self.chunk_period = self.chunk_period.max(one_ms);
        self.poll_period = self.poll_period.max(one_ms);
        self.fallback_period = self.fallback_period.max(one_ms);
        self.min_timer_interval = self.min_timer_interval.max(one_ms);
        self.default_timer_interval = self.default_timer_interval.max(self.min_timer_interval);
        self.stall_grace = self.stall_grace.max(one_ms);
        self.reference_sample_rate = self.reference_sample_rate.max(1);
        self.min_chunk_bytes = self.min_chunk_bytes.max(crate::buffering::SAMPLE_WIDTH);
        self.status_capacity = self.status_capacity.max(1);
        self
    }

    pub fn estimator(&self) -> DurationEstimator {
        DurationEstimator::new(self.reference_sample_rate, self.max_plausible_duration)
    }

    pub fn chunker(&self) -> Chunker {
        Chunker::new(self.chunk_period, self.min_chunk_bytes, self.estimator())
    }

    pub fn scheduler(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_period: self.poll_period,
            fallback_period: self.fallback_period,
            min_timer_interval: self.min_timer_interval,
            default_timer_interval: self.default_timer_interval,
        }
    }
}

/// The top-level engine handle.
///
/// `LipSyncEngine` is `Send + Sync`; wrap it in `Arc` to share it between
/// tasks.
pub struct LipSyncEngine {
    config: EngineConfig,
    backend: BackendHandle,
    renderer: Arc<dyn FaceRenderer>,
    gate: SessionGate,
    status: StatusBoard,
    /// Counters of the most recent session; replaced on every `speak`.
    diagnostics: Mutex<Arc<SessionDiagnostics>>,
    /// Active session task. Held for the whole of `speak`/`stop`, which
    /// serialises concurrent callers.
    task: Mutex<Option<JoinHandle<()>>>,
}

impl LipSyncEngine {
    pub fn new(
        config: EngineConfig,
        backend: BackendHandle,
        renderer: Arc<dyn FaceRenderer>,
    ) -> Self {
        let config = config.sanitized();
        let status = StatusBoard::new(config.status_capacity);
        Self {
            config,
            backend,
            renderer,
            gate: SessionGate::new(),
            status,
            diagnostics: Mutex::new(Arc::new(SessionDiagnostics::default())),
            task: Mutex::new(None),
        }
    }

    /// Start speaking `text`, cancelling any utterance in flight.
    ///
    /// # Errors
    /// - `MouthSyncError::NoRuntime` outside a Tokio runtime.
    /// - Whatever the backend's `start()` returned; the engine is Idle again.
    pub fn speak(&self, text: &str, voice: &VoiceParameters) -> Result<SessionId> {
        let runtime =
            tokio::runtime::Handle::try_current().map_err(|_| MouthSyncError::NoRuntime)?;
        let mut task = self.task.lock();

        self.cancel_active(&mut task);
        let diagnostics = Arc::new(SessionDiagnostics::default());
        *self.diagnostics.lock() = Arc::clone(&diagnostics);

        let id = self.gate.open();
        self.status.set(Some(id), SessionState::Building, None);

        let (notifier, messages) = BackendNotifier::channel(id);
        let utterance = Utterance::new(text, voice.clone());
        let started = {
            let mut backend = self.backend.0.lock();
            let capabilities = backend.capabilities();
            debug!(session = %id, backend = backend.name(), ?capabilities, "starting backend");
            backend.start(&utterance, notifier).map(|()| capabilities)
        };

        let capabilities = match started {
            Ok(c) => c,
            Err(e) => {
                warn!(session = %id, error = %e, "backend failed to start");
                self.gate.invalidate();
                self.status.set(None, SessionState::Idle, Some(e.to_string()));
                return Err(e);
            }
        };

        *task = Some(runtime.spawn(session::run(SessionContext {
            id,
            config: self.config.clone(),
            backend: self.backend.clone(),
            capabilities,
            messages,
            gate: self.gate.clone(),
            renderer: Arc::clone(&self.renderer),
            status: self.status.clone(),
            diagnostics,
        })));

        info!(
            session = %id,
            chars = text.chars().count(),
            voice = %voice.voice,
            pitch = voice.pitch,
            rate = voice.rate,
            "utterance started"
        );
        Ok(id)
    }

    /// Cancel the active utterance. The face gets `on_idle`.
    ///
    /// # Errors
    /// - `MouthSyncError::NotSpeaking` if no utterance is active.
    pub fn stop(&self) -> Result<()> {
        let mut task = self.task.lock();
        let Some(id) = self.cancel_active(&mut task) else {
            return Err(MouthSyncError::NotSpeaking);
        };

        self.status.set(None, SessionState::Idle, None);
        self.renderer.on_idle();
        info!(session = %id, "utterance stopped");
        Ok(())
    }

    /// Current lifecycle state (snapshot).
    pub fn status(&self) -> SessionState {
        self.status.get()
    }

    /// Id of the utterance currently holding the backend, if any.
    pub fn active_session(&self) -> Option<SessionId> {
        self.gate.current()
    }

    /// Subscribe to lifecycle state changes.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status.subscribe()
    }

    /// Counters for the most recent utterance.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.lock().snapshot()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    /// Invalidate the active session, release the backend and abort its task.
    /// Returns the id that was active.
    fn cancel_active(&self, task: &mut Option<JoinHandle<()>>) -> Option<SessionId> {
        let previous = self.gate.invalidate();
        if let Some(id) = previous {
            self.backend.0.lock().stop();
            debug!(session = %id, "active session cancelled");
        }
        if let Some(handle) = task.take() {
            handle.abort();
        }
        previous
    }
}

impl Drop for LipSyncEngine {
    fn drop(&mut self) {
        let task = self.task.get_mut();
        if self.gate.invalidate().is_some() {
            self.backend.0.lock().stop();
        }
        if let Some(handle) = task.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use tokio::time::{sleep, Instant};

    use crate::backend::{BackendCapabilities, RenderBackend};
    use crate::buffering::AudioBuffer;

    // ── Test doubles ─────────────────────────────────────────────────────────

    #[derive(Default)]
    struct Probe {
        notifier: Mutex<Option<BackendNotifier>>,
        starts: AtomicUsize,
        stops: AtomicUsize,
        /// `None` makes position queries fail.
        position: Mutex<Option<Duration>>,
        fail_start: AtomicBool,
    }

    impl Probe {
        fn notifier(&self) -> BackendNotifier {
            self.notifier.lock().clone().expect("backend was started")
        }

        fn stops(&self) -> usize {
            self.stops.load(Ordering::SeqCst)
        }
    }

    struct ScriptedBackend {
        probe: Arc<Probe>,
        capabilities: BackendCapabilities,
    }

    impl RenderBackend for ScriptedBackend {
        fn name(&self) -> &str {
            "scripted"
        }

        fn capabilities(&self) -> BackendCapabilities {
            self.capabilities
        }

        fn start(&mut self, _utterance: &Utterance, notifier: BackendNotifier) -> Result<()> {
            if self.probe.fail_start.load(Ordering::SeqCst) {
                return Err(MouthSyncError::BackendStart("device busy".into()));
            }
            self.probe.starts.fetch_add(1, Ordering::SeqCst);
            *self.probe.notifier.lock() = Some(notifier);
            Ok(())
        }

        fn stop(&mut self) {
            self.probe.stops.fetch_add(1, Ordering::SeqCst);
        }

        fn query_position(&mut self) -> Result<Duration> {
            let position = *self.probe.position.lock();
            position.ok_or_else(|| MouthSyncError::PositionUnavailable("scripted".into()))
        }
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Rec {
        Peak(u16),
        Wave(usize),
        Idle,
    }

    #[derive(Default)]
    struct RecordingRenderer {
        events: Mutex<Vec<(Instant, Rec)>>,
    }

    impl RecordingRenderer {
        fn kinds(&self) -> Vec<Rec> {
            self.events.lock().iter().map(|(_, r)| *r).collect()
        }

        fn peaks(&self) -> Vec<u16> {
            self.kinds()
                .into_iter()
                .filter_map(|r| match r {
                    Rec::Peak(p) => Some(p),
                    _ => None,
                })
                .collect()
        }

        fn peak_times(&self) -> Vec<Instant> {
            self.events
                .lock()
                .iter()
                .filter(|(_, r)| matches!(r, Rec::Peak(_)))
                .map(|(t, _)| *t)
                .collect()
        }

        fn idles(&self) -> usize {
            self.kinds().iter().filter(|r| **r == Rec::Idle).count()
        }
    }

    impl FaceRenderer for RecordingRenderer {
        fn on_peak(&self, amplitude: u16) {
            self.events.lock().push((Instant::now(), Rec::Peak(amplitude)));
        }

        fn on_waveform(&self, samples: &[i16]) {
            self.events.lock().push((Instant::now(), Rec::Wave(samples.len())));
        }

        fn on_idle(&self) {
            self.events.lock().push((Instant::now(), Rec::Idle));
        }
    }

    const TIMER: BackendCapabilities = BackendCapabilities {
        supports_position_query: false,
        delivers_incrementally: true,
    };
    const POLLING: BackendCapabilities = BackendCapabilities {
        supports_position_query: true,
        delivers_incrementally: false,
    };

    type Harness = (LipSyncEngine, Arc<Probe>, Arc<RecordingRenderer>);

    fn engine(capabilities: BackendCapabilities) -> Harness {
        let probe = Arc::new(Probe::default());
        let renderer = Arc::new(RecordingRenderer::default());
        let backend = BackendHandle::new(ScriptedBackend {
            probe: Arc::clone(&probe),
            capabilities,
        });
        let engine = LipSyncEngine::new(
            EngineConfig::default(),
            backend,
            Arc::clone(&renderer) as Arc<dyn FaceRenderer>,
        );
        (engine, probe, renderer)
    }

    /// 800-sample blocks (one 50 ms chunk each at 16 kHz) at the given
    /// amplitudes, with an exact declared duration.
    fn blocks(amplitudes: &[i16]) -> AudioBuffer {
        let samples: Vec<i16> = amplitudes
            .iter()
            .flat_map(|&a| std::iter::repeat(a).take(800))
            .collect();
        let duration = Duration::from_millis(50 * amplitudes.len() as u64);
        AudioBuffer::from_samples(&samples, Some(duration), Duration::ZERO)
    }

    fn voice() -> VoiceParameters {
        VoiceParameters::default()
    }

    // ── Tests ────────────────────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn end_of_stream_drains_queued_chunks_in_order() {
        let (engine, probe, renderer) = engine(TIMER);
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier();
        notifier.buffer(blocks(&[100, 200, 300]));
        notifier.end_of_stream();

        sleep(Duration::from_secs(1)).await;

        assert_eq!(
            renderer.kinds(),
            vec![
                Rec::Peak(100),
                Rec::Wave(800),
                Rec::Peak(200),
                Rec::Wave(800),
                Rec::Peak(300),
                Rec::Wave(800),
                Rec::Idle,
            ]
        );
        assert_eq!(engine.status(), SessionState::Idle);
        assert_eq!(engine.active_session(), None);
        assert_eq!(probe.stops(), 1);

        let diag = engine.diagnostics_snapshot();
        assert_eq!(diag.chunks_produced, 3);
        assert_eq!(diag.chunks_emitted, 3);
        assert_eq!(diag.chunks_discarded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn backend_error_discards_queue_and_stops_immediately() {
        let (engine, probe, renderer) = engine(TIMER);
        let mut status = engine.subscribe_status();
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier();
        notifier.buffer(blocks(&[100, 200, 300]));
        notifier.error(7, "device lost");

        sleep(Duration::from_millis(1)).await;
        assert_eq!(probe.stops(), 1);
        assert_eq!(renderer.peaks(), Vec::<u16>::new());
        assert_eq!(renderer.idles(), 1);
        assert_eq!(engine.status(), SessionState::Idle);

        sleep(Duration::from_secs(1)).await;
        assert!(renderer.peaks().is_empty());
        assert_eq!(engine.diagnostics_snapshot().chunks_discarded, 3);

        let states: Vec<_> = std::iter::from_fn(|| status.try_recv().ok())
            .map(|e| e.status)
            .collect();
        assert_eq!(
            states,
            vec![
                SessionState::Building,
                SessionState::Running,
                SessionState::Erroring,
                SessionState::Idle,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn closed_notification_channel_drains_like_end_of_stream() {
        let (engine, probe, renderer) = engine(TIMER);
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier.lock().take().expect("backend was started");
        notifier.buffer(blocks(&[10, 20, 30]));
        drop(notifier);

        sleep(Duration::from_secs(1)).await;

        assert_eq!(renderer.peaks(), vec![10, 20, 30]);
        assert_eq!(renderer.idles(), 1);
        assert_eq!(renderer.kinds().last(), Some(&Rec::Idle));
        assert_eq!(engine.status(), SessionState::Idle);
        assert_eq!(engine.active_session(), None);
        assert_eq!(probe.stops(), 1);

        let diag = engine.diagnostics_snapshot();
        assert_eq!(diag.chunks_emitted, 3);
        assert_eq!(diag.chunks_discarded, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn each_utterance_counts_into_fresh_diagnostics() {
        let (engine, probe, _renderer) = engine(TIMER);
        engine.speak("first", &voice()).expect("speak first");
        probe.notifier().buffer(blocks(&[1, 1]));
        sleep(Duration::from_millis(1)).await;

        let first = Arc::clone(&*engine.diagnostics.lock());
        assert_eq!(first.snapshot().buffers_in, 1);

        engine.speak("second", &voice()).expect("speak second");
        // A superseded task finishing on another worker only reaches its own set.
        first.buffers_in.fetch_add(1, Ordering::Relaxed);
        first.chunks_discarded.fetch_add(2, Ordering::Relaxed);

        let current = engine.diagnostics_snapshot();
        assert_eq!(current.buffers_in, 0);
        assert_eq!(current.chunks_discarded, 0);
        assert_eq!(first.snapshot().buffers_in, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_session_emits_nothing() {
        let (engine, probe, renderer) = engine(TIMER);

        let b = engine.speak("first", &voice()).expect("speak b");
        let stale = probe.notifier();
        stale.buffer(blocks(&[111, 111, 111]));

        let c = engine.speak("second", &voice()).expect("speak c");
        assert!(c > b);
        assert_eq!(probe.stops(), 1);

        // Late traffic for the cancelled session goes nowhere.
        stale.buffer(blocks(&[111]));
        stale.end_of_stream();

        let fresh = probe.notifier();
        fresh.buffer(blocks(&[222, 222]));
        fresh.end_of_stream();

        sleep(Duration::from_secs(1)).await;

        assert_eq!(renderer.peaks(), vec![222, 222]);
        assert_eq!(renderer.idles(), 1);
        assert_eq!(engine.status(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_position_query_falls_back_to_fixed_period() {
        let (engine, probe, renderer) = engine(POLLING);
        engine.speak("abc", &voice()).expect("speak");
        let t0 = Instant::now();

        let notifier = probe.notifier();
        notifier.buffer(blocks(&[1, 2, 3, 4, 5]));
        notifier.end_of_stream();

        sleep(Duration::from_secs(1)).await;

        let times = renderer.peak_times();
        assert_eq!(times.len(), 5);
        assert_eq!(times[0] - t0, Duration::from_millis(25));
        for pair in times.windows(2) {
            assert_eq!(pair[1] - pair[0], Duration::from_millis(25));
        }
        assert_eq!(engine.diagnostics_snapshot().position_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn polling_waits_for_playback_position() {
        let (engine, probe, renderer) = engine(POLLING);
        *probe.position.lock() = Some(Duration::ZERO);
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier();
        notifier.buffer(blocks(&[10, 20]));
        notifier.end_of_stream();

        sleep(Duration::from_millis(200)).await;
        assert_eq!(renderer.peaks(), vec![10]);
        assert_eq!(engine.status(), SessionState::Draining);

        *probe.position.lock() = Some(Duration::from_millis(50));
        sleep(Duration::from_millis(30)).await;
        assert_eq!(renderer.peaks(), vec![10, 20]);
        assert_eq!(engine.status(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_warning_forces_stop_after_grace_window() {
        let (engine, probe, renderer) = engine(TIMER);
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier();
        notifier.buffer(blocks(&[9; 20]));
        notifier.warning("buffer underrun");

        sleep(Duration::from_millis(490)).await;
        assert_eq!(probe.stops(), 0);
        assert_eq!(engine.status(), SessionState::Running);

        sleep(Duration::from_millis(20)).await;
        assert_eq!(probe.stops(), 1);
        assert_eq!(engine.status(), SessionState::Idle);
        assert_eq!(renderer.idles(), 1);

        let emitted = renderer.peaks().len();
        assert!(emitted < 20);
        sleep(Duration::from_secs(2)).await;
        assert_eq!(renderer.peaks().len(), emitted);

        let diag = engine.diagnostics_snapshot();
        assert_eq!(diag.stalls, 1);
        assert_eq!(diag.chunks_emitted + diag.chunks_discarded, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn notification_within_grace_window_disarms_stall() {
        let (engine, probe, renderer) = engine(TIMER);
        engine.speak("abc", &voice()).expect("speak");

        let notifier = probe.notifier();
        notifier.warning("slow start");
        sleep(Duration::from_millis(300)).await;
        notifier.buffer(blocks(&[5, 6]));

        sleep(Duration::from_millis(400)).await;
        assert_eq!(probe.stops(), 0);
        assert_eq!(renderer.peaks(), vec![5, 6]);

        notifier.end_of_stream();
        sleep(Duration::from_millis(10)).await;
        assert_eq!(probe.stops(), 1);
        assert_eq!(engine.diagnostics_snapshot().stalls, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_silences_session_and_idles_face() {
        let (engine, probe, renderer) = engine(TIMER);
        engine.speak("abc", &voice()).expect("speak");
        probe.notifier().buffer(blocks(&[4; 10]));

        sleep(Duration::from_millis(120)).await;
        let before = renderer.peaks().len();
        assert!(before > 0);

        engine.stop().expect("stop");
        assert_eq!(probe.stops(), 1);
        assert_eq!(engine.status(), SessionState::Idle);
        assert_eq!(renderer.idles(), 1);

        sleep(Duration::from_secs(1)).await;
        assert_eq!(renderer.peaks().len(), before);
        assert!(matches!(engine.stop(), Err(MouthSyncError::NotSpeaking)));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_start_returns_error_and_idles() {
        let (engine, probe, _renderer) = engine(TIMER);
        probe.fail_start.store(true, Ordering::SeqCst);

        let err = engine.speak("abc", &voice()).unwrap_err();
        assert!(matches!(err, MouthSyncError::BackendStart(_)));
        assert_eq!(engine.status(), SessionState::Idle);
        assert_eq!(engine.active_session(), None);

        probe.fail_start.store(false, Ordering::SeqCst);
        assert!(engine.speak("again", &voice()).is_ok());
    }

    #[test]
    fn speak_outside_runtime_is_rejected() {
        let (engine, probe, _renderer) = engine(TIMER);
        let err = engine.speak("abc", &voice()).unwrap_err();
        assert!(matches!(err, MouthSyncError::NoRuntime));
        assert_eq!(probe.starts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let config = EngineConfig::default().with_overrides(|key| match key {
            "MOUTHSYNC_CHUNK_PERIOD_MS" => Some("40".into()),
            "MOUTHSYNC_POLL_PERIOD_MS" => Some("100000".into()),
            "MOUTHSYNC_STALL_GRACE_MS" => Some("soon".into()),
            _ => None,
        });
        assert_eq!(config.chunk_period, Duration::from_millis(40));
        assert_eq!(config.poll_period, Duration::from_millis(200));
        assert_eq!(config.stall_grace, Duration::from_millis(500));
    }

    #[test]
    fn sanitized_config_never_has_zero_periods() {
        let config = EngineConfig {
            chunk_period: Duration::ZERO,
            poll_period: Duration::ZERO,
            min_chunk_bytes: 0,
            reference_sample_rate: 0,
            status_capacity: 0,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(config.chunk_period, Duration::from_millis(1));
        assert_eq!(config.poll_period, Duration::from_millis(1));
        assert_eq!(config.min_chunk_bytes, 2);
        assert_eq!(config.reference_sample_rate, 1);
        assert_eq!(config.status_capacity, 1);
        assert_eq!(EngineConfig::default().sanitized(), EngineConfig::default());
    }
}
