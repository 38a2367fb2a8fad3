//! Per-utterance session task.
//!
//! One task per `speak()`. It owns the chunker, the scheduler and its
//! pending queue, and selects over three event sources:
//!
//! 1. backend notifications (buffers, warnings, EOS, errors),
//! 2. the scheduler's next tick deadline,
//! 3. the stall deadline armed by a warning.
//!
//! Notifications are always handled before a due tick or stall so that a
//! message arriving in the same instant as the stall deadline disarms it.
//!
//! ## Termination
//!
//! | Cause | Queued chunks | Backend | `on_idle` |
//! |-------|---------------|---------|-----------|
//! | EOS (or channel closed) | emitted | stopped after drain | yes |
//! | Backend error | discarded | stopped immediately | yes |
//! | Stall | discarded | stopped | yes |
//! | Superseded | dropped with the task | stopped by `speak` | no |

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::{BackendCapabilities, BackendHandle, BackendMessage};
use crate::engine::gate::SessionGate;
use crate::engine::EngineConfig;
use crate::ipc::events::{SessionId, SessionState, SessionStatusEvent};
use crate::render::FaceRenderer;
use crate::scheduler::EmissionScheduler;

/// Counters for one utterance. Each session gets a fresh set, so a
/// superseded task still winding down never touches its successor's.
pub struct SessionDiagnostics {
    pub buffers_in: AtomicUsize,
    pub bytes_in: AtomicUsize,
    pub durations_estimated: AtomicUsize,
    pub chunks_produced: AtomicUsize,
    pub chunks_emitted: AtomicUsize,
    pub chunks_discarded: AtomicUsize,
    pub position_failures: AtomicUsize,
    pub warnings: AtomicUsize,
    pub stalls: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            buffers_in: AtomicUsize::new(0),
            bytes_in: AtomicUsize::new(0),
            durations_estimated: AtomicUsize::new(0),
            chunks_produced: AtomicUsize::new(0),
            chunks_emitted: AtomicUsize::new(0),
            chunks_discarded: AtomicUsize::new(0),
            position_failures: AtomicUsize::new(0),
            warnings: AtomicUsize::new(0),
            stalls: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            buffers_in: self.buffers_in.load(Ordering::Relaxed),
            bytes_in: self.bytes_in.load(Ordering::Relaxed),
            durations_estimated: self.durations_estimated.load(Ordering::Relaxed),
            chunks_produced: self.chunks_produced.load(Ordering::Relaxed),
            chunks_emitted: self.chunks_emitted.load(Ordering::Relaxed),
            chunks_discarded: self.chunks_discarded.load(Ordering::Relaxed),
            position_failures: self.position_failures.load(Ordering::Relaxed),
            warnings: self.warnings.load(Ordering::Relaxed),
            stalls: self.stalls.load(Ordering::Relaxed),
        }
    }

    fn add(counter: &AtomicUsize, n: usize) {
        counter.fetch_add(n, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiagnosticsSnapshot {
    pub buffers_in: usize,
    pub bytes_in: usize,
    pub durations_estimated: usize,
    pub chunks_produced: usize,
    pub chunks_emitted: usize,
    pub chunks_discarded: usize,
    pub position_failures: usize,
    pub warnings: usize,
    pub stalls: usize,
}

/// Canonical lifecycle state plus its broadcast channel.
#[derive(Debug, Clone)]
pub struct StatusBoard {
    state: Arc<Mutex<SessionState>>,
    tx: broadcast::Sender<SessionStatusEvent>,
}

impl StatusBoard {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(SessionState::Idle)),
            tx,
        }
    }

    pub fn get(&self) -> SessionState {
        *self.state.lock()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.tx.subscribe()
    }

    pub fn set(&self, session: Option<SessionId>, status: SessionState, detail: Option<String>) {
        *self.state.lock() = status;
        let _ = self.tx.send(SessionStatusEvent {
            session,
            status,
            detail,
        });
    }
}

/// Everything one session task owns or shares with the engine.
pub struct SessionContext {
    pub id: SessionId,
    pub config: EngineConfig,
    pub backend: BackendHandle,
    pub capabilities: BackendCapabilities,
    pub messages: mpsc::UnboundedReceiver<BackendMessage>,
    pub gate: SessionGate,
    pub renderer: Arc<dyn FaceRenderer>,
    pub status: StatusBoard,
    pub diagnostics: Arc<SessionDiagnostics>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed(String),
    Stalled,
    Superseded,
}

/// Stand-in deadline for a disabled `select!` branch. The branch future is
/// still constructed even when its precondition is false.
fn deadline_or_far(deadline: Option<Instant>) -> Instant {
    deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400))
}

/// Drive one utterance to completion.
pub async fn run(ctx: SessionContext) {
    let span = info_span!("utterance", session = %ctx.id);
    run_inner(ctx).instrument(span).await;
}

async fn run_inner(mut ctx: SessionContext) {
    let chunker = ctx.config.chunker();
    let estimator = ctx.config.estimator();
    let mode = ctx.capabilities.scheduling_mode();
    let mut scheduler = EmissionScheduler::new(mode, ctx.config.scheduler());
    let mut end_of_stream = false;
    let mut stall_deadline: Option<Instant> = None;
    let diag = Arc::clone(&ctx.diagnostics);

    debug!(?mode, incremental = ctx.capabilities.delivers_incrementally, "session started");

    let outcome = loop {
        if end_of_stream && scheduler.is_drained() {
            break Outcome::Completed;
        }

        let next_tick = scheduler.next_deadline();

        tokio::select! {
            biased;

            message = ctx.messages.recv(), if !end_of_stream => {
                stall_deadline = None;
                let closed = message.is_none();
                match message {
                    Some(BackendMessage::Buffer(buffer)) => {
                        SessionDiagnostics::add(&diag.buffers_in, 1);
                        SessionDiagnostics::add(&diag.bytes_in, buffer.size());
                        if !buffer.is_empty() && !estimator.is_plausible(buffer.duration) {
                            SessionDiagnostics::add(&diag.durations_estimated, 1);
                        }

                        let chunked = chunker.split(buffer);
                        SessionDiagnostics::add(&diag.chunks_produced, chunked.chunks.len());
                        scheduler.enqueue(chunked, Instant::now());

                        let status = &ctx.status;
                        let id = ctx.id;
                        ctx.gate.with_current(id, || {
                            if status.get() == SessionState::Building {
                                status.set(Some(id), SessionState::Running, None);
                            }
                        });
                    }
                    Some(BackendMessage::Warning(detail)) => {
                        SessionDiagnostics::add(&diag.warnings, 1);
                        warn!(
                            %detail,
                            grace_ms = ctx.config.stall_grace.as_millis() as u64,
                            "backend warning, arming stall timer"
                        );
                        stall_deadline = Some(Instant::now() + ctx.config.stall_grace);
                    }
                    Some(BackendMessage::EndOfStream) | None => {
                        if closed {
                            debug!("notification channel closed, treating as end of stream");
                        }
                        end_of_stream = true;
                        let status = &ctx.status;
                        let id = ctx.id;
                        let pending = scheduler.pending();
                        ctx.gate.with_current(id, || {
                            status.set(Some(id), SessionState::Draining, None);
                        });
                        debug!(pending, "end of stream, draining");
                    }
                    Some(BackendMessage::Error { code, message: reason }) => {
                        warn!(code, %reason, "backend error");
                        break Outcome::Failed(format!("backend error {code}: {reason}"));
                    }
                }
            }

            _ = sleep_until(deadline_or_far(next_tick)), if next_tick.is_some() => {
                let backend = ctx.backend.clone();
                let chunk = scheduler.tick(Instant::now(), || {
                    let position = backend.0.lock().query_position();
                    if position.is_err() {
                        SessionDiagnostics::add(&diag.position_failures, 1);
                    }
                    position
                });

                if let Some(chunk) = chunk {
                    let renderer = &ctx.renderer;
                    let shown = ctx.gate.with_current(ctx.id, || {
                        renderer.on_peak(chunk.peak);
                        renderer.on_waveform(&chunk.waveform);
                    });
                    if shown.is_none() {
                        break Outcome::Superseded;
                    }
                    SessionDiagnostics::add(&diag.chunks_emitted, 1);
                }
            }

            _ = sleep_until(deadline_or_far(stall_deadline)), if stall_deadline.is_some() => {
                SessionDiagnostics::add(&diag.stalls, 1);
                warn!("no backend notification within grace window, forcing stop");
                break Outcome::Stalled;
            }

            else => break Outcome::Completed,
        }
    };

    let discarded = scheduler.clear();
    SessionDiagnostics::add(&diag.chunks_discarded, discarded);
    finish(&ctx, &outcome);

    let snap = diag.snapshot();
    info!(
        outcome = ?outcome,
        buffers_in = snap.buffers_in,
        bytes_in = snap.bytes_in,
        durations_estimated = snap.durations_estimated,
        chunks_produced = snap.chunks_produced,
        chunks_emitted = snap.chunks_emitted,
        chunks_discarded = snap.chunks_discarded,
        position_failures = snap.position_failures,
        warnings = snap.warnings,
        stalls = snap.stalls,
        "utterance finished"
    );
}

/// Release the backend and notify the face, unless a newer session owns
/// them by now.
fn finish(ctx: &SessionContext, outcome: &Outcome) {
    let detail = match outcome {
        Outcome::Completed => None,
        Outcome::Failed(detail) => Some(detail.clone()),
        Outcome::Stalled => Some("backend stalled".to_string()),
        Outcome::Superseded => return,
    };

    let finished = ctx.gate.finish(ctx.id, || {
        if detail.is_some() {
            ctx.status.set(Some(ctx.id), SessionState::Erroring, detail.clone());
        }
        ctx.backend.0.lock().stop();
        ctx.status.set(None, SessionState::Idle, None);
        ctx.renderer.on_idle();
    });

    if finished.is_none() {
        debug!("session superseded before teardown");
    }
}
