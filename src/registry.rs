// bridge/src/registry.rs

use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

use crate::diff::{DiffSession, SessionStatus};
use crate::error::{BridgeError, Result};

/// Process-wide table of diff sessions, keyed by tab name. Single source of
/// truth for "what is currently under review". Created empty at subsystem
/// init and drained at shutdown; the at-most-one-entry-per-tab invariant is
/// enforced at insert.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    state: Arc<RwLock<BTreeMap<String, DiffSession>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a freshly created session. The caller must have resolved any
    /// incumbent under the same tab name first (supersession); finding one
    /// here is a bookkeeping bug, not a user error.
    pub fn insert(&self, session: DiffSession) -> Result<()> {
        let mut state = self.state.write();
        if state.contains_key(&session.tab_name) {
            return Err(BridgeError::session(format!(
                "session already registered for tab '{}'",
                session.tab_name
            )));
        }
        state.insert(session.tab_name.clone(), session);
        Ok(())
    }

    pub fn contains(&self, tab_name: &str) -> bool {
        self.state.read().contains_key(tab_name)
    }

    pub fn status(&self, tab_name: &str) -> Option<SessionStatus> {
        self.state.read().get(tab_name).map(|s| s.status)
    }

    pub fn tab_names(&self) -> Vec<String> {
        self.state.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().is_empty()
    }

    /// Run `f` against the live session entry, if present.
    pub fn with_session<R>(&self, tab_name: &str, f: impl FnOnce(&mut DiffSession) -> R) -> Option<R> {
        self.state.write().get_mut(tab_name).map(f)
    }

    /// Remove and return the session under `tab_name`.
    pub fn remove(&self, tab_name: &str) -> Option<DiffSession> {
        self.state.write().remove(tab_name)
    }

    /// Remove the session only if it is still `pending`, atomically marking
    /// it with the given terminal status. Returns `None` when the entry is
    /// missing or already resolved, which makes racing resolutions no-ops.
    pub fn take_pending(&self, tab_name: &str, terminal: SessionStatus) -> Option<DiffSession> {
        debug_assert!(terminal != SessionStatus::Pending);
        let mut state = self.state.write();
        match state.get(tab_name) {
            Some(s) if s.status == SessionStatus::Pending => {
                let mut session = state.remove(tab_name).expect("checked above");
                session.status = terminal;
                Some(session)
            }
            _ => None,
        }
    }

    /// Mark a pending session as saved in place, returning a snapshot of the
    /// fields teardown needs. The entry stays registered for the deferred
    /// reload window.
    pub fn mark_saved(&self, tab_name: &str) -> Option<DiffSession> {
        let mut state = self.state.write();
        match state.get_mut(tab_name) {
            Some(s) if s.status == SessionStatus::Pending => {
                s.status = SessionStatus::Saved;
                Some(s.snapshot())
            }
            _ => None,
        }
    }

    /// Remove the session only if it was accepted and is awaiting its
    /// deferred finalize. The deferred task and an explicit close both call
    /// this; the loser of the race sees `None`.
    pub fn remove_saved(&self, tab_name: &str) -> Option<DiffSession> {
        let mut state = self.state.write();
        match state.get(tab_name) {
            Some(s) if s.status == SessionStatus::Saved => state.remove(tab_name),
            _ => None,
        }
    }

    /// Tab name of the session whose proposed buffer is `buffer`, if any.
    /// Lifecycle events carry buffer ids; this maps them back to sessions.
    pub fn tab_for_buffer(&self, buffer: crate::editor::BufferId) -> Option<String> {
        self.state
            .read()
            .iter()
            .find(|(_, s)| s.proposed_buffer == buffer)
            .map(|(k, _)| k.clone())
    }

    /// Drain every remaining session, regardless of status.
    pub fn drain(&self) -> Vec<DiffSession> {
        let mut state = self.state.write();
        std::mem::take(&mut *state).into_values().collect()
    }

    /// Tab names of sessions still pending.
    pub fn pending_tabs(&self) -> Vec<String> {
        self.state
            .read()
            .iter()
            .filter(|(_, s)| s.status == SessionStatus::Pending)
            .map(|(k, _)| k.clone())
            .collect()
    }
}
