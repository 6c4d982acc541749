// bridge/src/selection.rs

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::protocol::Notification;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionPos {
    /// 1-based line.
    pub line: usize,
    /// 0-based character.
    pub character: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRange {
    pub start: SelectionPos,
    pub end: SelectionPos,
    pub is_empty: bool,
}

/// The most recent selection in the editor, in the shape clients expect on
/// the wire.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionState {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<PathBuf>,
    pub selection: SelectionRange,
}

struct TrackerState {
    latest: Option<SelectionState>,
    last_emit: Option<Instant>,
}

/// Caches the latest selection and turns changes into `selection_changed`
/// notifications, debounced so rapid cursor movement does not flood the
/// wire.
#[derive(Clone)]
pub struct SelectionTracker {
    state: Arc<RwLock<TrackerState>>,
    debounce: Duration,
}

impl SelectionTracker {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            state: Arc::new(RwLock::new(TrackerState { latest: None, last_emit: None })),
            debounce: Duration::from_millis(debounce_ms),
        }
    }

    pub fn latest(&self) -> Option<SelectionState> {
        self.state.read().latest.clone()
    }

    /// Record a new selection. Returns the notification to broadcast when
    /// the selection actually changed and the debounce window has passed.
    pub fn update(&self, selection: SelectionState) -> Option<Notification> {
        let mut st = self.state.write();
        if st.latest.as_ref() == Some(&selection) {
            return None;
        }
        let now = Instant::now();
        let debounced = st
            .last_emit
            .is_some_and(|t| now.duration_since(t) < self.debounce);
        st.latest = Some(selection.clone());
        if debounced {
            return None;
        }
        st.last_emit = Some(now);
        Some(Notification::new(
            "selection_changed",
            serde_json::to_value(selection).unwrap_or(serde_json::Value::Null),
        ))
    }
}
