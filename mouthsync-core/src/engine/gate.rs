//! Session identity gate.
//!
//! Every renderer callback and every state change made by a session task
//! runs while holding the gate lock and only if that task's [`SessionId`] is
//! still current. [`SessionGate::invalidate`] takes the same lock, so once it
//! returns no callback from the invalidated session can start or still be
//! running.
//!
//! Lock order is gate → backend. Renderer callbacks run under the gate lock
//! and must not call back into the engine.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::ipc::events::SessionId;

#[derive(Debug, Default)]
struct GateState {
    last_issued: u64,
    current: Option<SessionId>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionGate {
    inner: Arc<Mutex<GateState>>,
}

impl SessionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue a fresh session id and make it current. Any previous session is
    /// implicitly invalidated.
    pub fn open(&self) -> SessionId {
        let mut state = self.inner.lock();
        state.last_issued += 1;
        let id = SessionId(state.last_issued);
        state.current = Some(id);
        id
    }

    pub fn current(&self) -> Option<SessionId> {
        self.inner.lock().current
    }

    pub fn is_current(&self, id: SessionId) -> bool {
        self.inner.lock().current == Some(id)
    }

    /// Detach the current session, returning it.
    pub fn invalidate(&self) -> Option<SessionId> {
        self.inner.lock().current.take()
    }

    /// Run `f` under the gate lock if `id` is current.
    pub fn with_current<R>(&self, id: SessionId, f: impl FnOnce() -> R) -> Option<R> {
        let state = self.inner.lock();
        if state.current != Some(id) {
            return None;
        }
        let out = f();
        drop(state);
        Some(out)
    }

    /// Detach `id` and run `f` under the gate lock, if `id` is current.
    pub fn finish<R>(&self, id: SessionId, f: impl FnOnce() -> R) -> Option<R> {
        let mut state = self.inner.lock();
        if state.current != Some(id) {
            return None;
        }
        state.current = None;
        let out = f();
        drop(state);
        Some(out)
    }
}
