// bridge/src/diff.rs
//
// The diff review subsystem. One DiffSession per tab name: a two-pane
// comparison of current vs. proposed file content whose caller stays
// suspended on a oneshot until the user saves (accept) or discards
// (reject) the proposed buffer. Exactly one resolution per session; every
// exit path disposes the session's buffers, windows, and subscriptions.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::ConfigManager;
use crate::editor::{
    window_is_suitable, BufferEvent, BufferEventKind, BufferId, CursorPos, EditorSurface,
    ScratchOpts, SubscriptionId, WindowId,
};
use crate::error::{BridgeError, Result};
use crate::protocol::ToolResult;
use crate::registry::SessionRegistry;
use crate::scratch::ScratchWorkspace;

/// One-way session state. `Pending` is the only non-terminal status; no
/// session re-enters it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Pending,
    Saved,
    Rejected,
}

/// Everything one comparison session owns. Buffers and windows are
/// exclusive to the session for its lifetime; `resolver` is a single-owner
/// handoff consumed at resolution.
pub struct DiffSession {
    pub tab_name: String,
    pub old_file_path: PathBuf,
    pub new_file_path: PathBuf,
    pub new_file_contents: String,
    pub is_new_file: bool,
    pub proposed_buffer: BufferId,
    pub original_buffer: BufferId,
    /// (window showing current content, window showing proposed content)
    pub windows: (WindowId, WindowId),
    pub subscriptions: Vec<SubscriptionId>,
    pub status: SessionStatus,
    pub resolver: Option<oneshot::Sender<ToolResult>>,
    pub result: Option<ToolResult>,
    pub original_cursor: CursorPos,
    /// Whether the proposed contents carried a trailing newline; buffers
    /// store lines, so this is reattached when text leaves the buffer.
    pub trailing_newline: bool,
    /// Set when the proposed pane had to be materialized on disk.
    pub scratch_path: Option<PathBuf>,
}

impl DiffSession {
    /// Detach a copy for the resolution path: the resolver moves out of the
    /// registered entry, everything else is cloned.
    pub(crate) fn snapshot(&mut self) -> DiffSession {
        DiffSession {
            tab_name: self.tab_name.clone(),
            old_file_path: self.old_file_path.clone(),
            new_file_path: self.new_file_path.clone(),
            new_file_contents: self.new_file_contents.clone(),
            is_new_file: self.is_new_file,
            proposed_buffer: self.proposed_buffer,
            original_buffer: self.original_buffer,
            windows: self.windows,
            subscriptions: self.subscriptions.clone(),
            status: self.status,
            resolver: self.resolver.take(),
            result: self.result.clone(),
            original_cursor: self.original_cursor,
            trailing_newline: self.trailing_newline,
            scratch_path: self.scratch_path.clone(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OpenDiffParams {
    pub old_file_path: PathBuf,
    pub new_file_path: PathBuf,
    pub new_file_contents: String,
    pub tab_name: String,
}

/// Resources created so far during setup; cleaned up when a later step
/// fails so no partial session survives.
#[derive(Default)]
struct PartialSetup {
    buffers: Vec<BufferId>,
    windows: Vec<WindowId>,
    subscriptions: Vec<SubscriptionId>,
    scratch_path: Option<PathBuf>,
    diff_windows: Vec<WindowId>,
}

struct EngineInner {
    editor: Arc<dyn EditorSurface>,
    registry: SessionRegistry,
    scratch: ScratchWorkspace,
    cfg: Arc<ConfigManager>,
    events_tx: mpsc::UnboundedSender<BufferEvent>,
}

/// Lifecycle controller and resolution dispatcher for diff sessions.
/// Cheap to clone; all clones share one registry and one event pump.
#[derive(Clone)]
pub struct DiffEngine {
    inner: Arc<EngineInner>,
}

impl DiffEngine {
    pub fn new(editor: Arc<dyn EditorSurface>, cfg: Arc<ConfigManager>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let scratch = ScratchWorkspace::new(cfg.get().diff.scratch_dir.clone());
        let inner = Arc::new(EngineInner {
            editor,
            registry: SessionRegistry::new(),
            scratch,
            cfg,
            events_tx,
        });
        let engine = Self { inner };
        engine.spawn_event_pump(events_rx);
        engine
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.inner.registry
    }

    /// Route editor lifecycle events to the resolution dispatcher. The pump
    /// holds only a weak handle so dropping the last engine clone ends it.
    fn spawn_event_pump(&self, mut rx: mpsc::UnboundedReceiver<BufferEvent>) {
        let weak: Weak<EngineInner> = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let engine = DiffEngine { inner };
                engine.handle_buffer_event(event).await;
            }
        });
    }

    async fn handle_buffer_event(&self, event: BufferEvent) {
        let Some(tab_name) = self.inner.registry.tab_for_buffer(event.buffer) else {
            // stale event from an already-resolved session
            return;
        };
        match event.kind {
            BufferEventKind::Save => {
                self.resolve_as_saved(&tab_name, event.buffer).await;
            }
            BufferEventKind::Delete | BufferEventKind::Unload | BufferEventKind::Wipe => {
                self.resolve_as_rejected(&tab_name).await;
            }
        }
    }

    /// Open a comparison session and stay suspended until the user accepts
    /// or rejects it. No timeout: resolution is user action, supersession,
    /// an explicit close, or shutdown.
    pub async fn open_diff(&self, params: OpenDiffParams) -> Result<ToolResult> {
        if params.tab_name.is_empty() {
            return Err(BridgeError::invalid_params("tab_name must not be empty"));
        }

        // supersession: an incumbent under this tab name is rejected before
        // any of the new session's setup runs
        if self.inner.registry.contains(&params.tab_name) {
            info!(tab = %params.tab_name, "superseding existing diff session");
            self.resolve_as_rejected(&params.tab_name).await;
            if let Some(SessionStatus::Saved) = self.inner.registry.status(&params.tab_name) {
                // incumbent was already accepted and only awaiting its
                // deferred reload; finish that now
                self.finalize_accepted(&params.tab_name).await;
            }
        }

        let is_new_file = !tokio::fs::try_exists(&params.old_file_path)
            .await
            .unwrap_or(false);

        let mut partial = PartialSetup::default();
        let (rx, tab_name) = match self.build_session(&params, is_new_file, &mut partial).await {
            Ok(rx) => (rx, params.tab_name.clone()),
            Err(e) => {
                warn!(tab = %params.tab_name, error = %e, "diff setup failed; rolling back");
                self.cleanup_partial(partial).await;
                return Err(match e {
                    e @ BridgeError::Scratch(_) => e,
                    e => BridgeError::setup(e.to_string()),
                });
            }
        };

        debug!(tab = %tab_name, new_file = is_new_file, "diff session open; suspending caller");
        rx.await
            .map_err(|_| BridgeError::session("diff session resolution channel dropped"))
    }

    /// Steps 2-6 of session setup. Every created resource is recorded in
    /// `partial` so the caller can roll back on error.
    async fn build_session(
        &self,
        params: &OpenDiffParams,
        is_new_file: bool,
        partial: &mut PartialSetup,
    ) -> Result<oneshot::Receiver<ToolResult>> {
        let editor = &self.inner.editor;
        let cfg = self.inner.cfg.get();

        // target window: prefer one already showing the file, else any
        // suitable main window, else a fresh split; never a terminal,
        // sidebar, or floating window
        let target_window = self.pick_target_window(&params.old_file_path, partial).await?;
        editor.focus_window(target_window).await?;
        let original_cursor = editor.cursor(target_window).await.unwrap_or_default();

        // original pane
        let original_buffer = if is_new_file {
            let placeholder = editor
                .create_scratch_buffer(
                    &format!("{} (new file)", params.old_file_path.display()),
                    vec![String::new()],
                    ScratchOpts { filetype: None, modifiable: false },
                )
                .await?;
            partial.buffers.push(placeholder);
            editor.set_window_buffer(target_window, placeholder).await?;
            placeholder
        } else {
            editor.open_file(target_window, &params.old_file_path).await?
        };

        // proposed pane
        let proposed_window = editor
            .split_window(target_window, cfg.diff.vertical_split)
            .await?;
        partial.windows.push(proposed_window);

        let filetype = self.detect_filetype(params).await;
        let proposed_name = format!("{} (proposed)", params.new_file_path.display());
        let lines: Vec<String> = params.new_file_contents.lines().map(String::from).collect();
        let (proposed_buffer, scratch_path) = match editor
            .create_scratch_buffer(
                &proposed_name,
                lines,
                ScratchOpts { filetype, modifiable: true },
            )
            .await
        {
            Ok(buf) => {
                partial.buffers.push(buf);
                editor.set_window_buffer(proposed_window, buf).await?;
                (buf, None)
            }
            Err(e) => {
                // fallback strategy: materialize the proposed content on
                // disk and diff against the real file
                debug!(error = %e, "scratch buffer unavailable; using temp file fallback");
                let filename = params
                    .new_file_path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("proposed");
                let path = self
                    .inner
                    .scratch
                    .create_temp_file(&params.new_file_contents, filename)
                    .await?;
                partial.scratch_path = Some(path.clone());
                let buf = editor.open_file(proposed_window, &path).await?;
                partial.buffers.push(buf);
                (buf, Some(path))
            }
        };

        editor.set_diff_mode(target_window, true).await?;
        partial.diff_windows.push(target_window);
        editor.set_diff_mode(proposed_window, true).await?;
        partial.diff_windows.push(proposed_window);
        editor.focus_window(proposed_window).await?;

        // lifecycle events on the proposed buffer only; the original file's
        // buffer belongs to the user and is never monitored
        let mut subscriptions = Vec::with_capacity(4);
        for kind in [
            BufferEventKind::Save,
            BufferEventKind::Delete,
            BufferEventKind::Unload,
            BufferEventKind::Wipe,
        ] {
            let sub = editor
                .subscribe(proposed_buffer, kind, self.inner.events_tx.clone())
                .await?;
            partial.subscriptions.push(sub);
            subscriptions.push(sub);
        }

        let (tx, rx) = oneshot::channel();
        let session = DiffSession {
            tab_name: params.tab_name.clone(),
            old_file_path: params.old_file_path.clone(),
            new_file_path: params.new_file_path.clone(),
            new_file_contents: params.new_file_contents.clone(),
            is_new_file,
            proposed_buffer,
            original_buffer,
            windows: (target_window, proposed_window),
            subscriptions,
            status: SessionStatus::Pending,
            resolver: Some(tx),
            result: None,
            original_cursor,
            trailing_newline: params.new_file_contents.ends_with('\n'),
            scratch_path,
        };
        self.inner.registry.insert(session)?;
        Ok(rx)
    }

    async fn pick_target_window(
        &self,
        old_file_path: &Path,
        partial: &mut PartialSetup,
    ) -> Result<WindowId> {
        let editor = &self.inner.editor;
        let windows = editor.list_windows().await;

        let mut first_suitable = None;
        for win in &windows {
            let Some(buf) = editor.buffer_info(win.buffer).await else { continue };
            if !window_is_suitable(win, &buf) {
                continue;
            }
            if buf.path.as_deref() == Some(old_file_path) {
                return Ok(win.id);
            }
            if first_suitable.is_none() {
                first_suitable = Some(win.id);
            }
        }
        if let Some(win) = first_suitable {
            return Ok(win);
        }

        // every window is a terminal/sidebar/float; make room
        let current = editor.current_window().await;
        let created = editor.split_window(current, false).await?;
        partial.windows.push(created);
        Ok(created)
    }

    /// Filetype for the proposed pane, so highlighting matches the file
    /// under review: editor matcher, then an open buffer's type, then the
    /// extension table.
    async fn detect_filetype(&self, params: &OpenDiffParams) -> Option<String> {
        let editor = &self.inner.editor;
        if let Some(ft) = editor.detect_filetype(&params.old_file_path).await {
            return Some(ft);
        }
        if let Some(buf) = editor.find_buffer_by_path(&params.old_file_path).await {
            if let Some(ft) = buf.filetype {
                return Some(ft);
            }
        }
        crate::editor::extension_filetype(&params.old_file_path)
            .or_else(|| crate::editor::extension_filetype(&params.new_file_path))
            .map(String::from)
    }

    async fn cleanup_partial(&self, partial: PartialSetup) {
        let editor = &self.inner.editor;
        for sub in partial.subscriptions {
            let _ = editor.unsubscribe(sub).await;
        }
        for win in partial.diff_windows {
            let _ = editor.set_diff_mode(win, false).await;
        }
        for buf in partial.buffers {
            if editor.buffer_info(buf).await.is_some() {
                let _ = editor.delete_buffer(buf, true).await;
            }
        }
        for win in partial.windows {
            let _ = editor.close_window(win).await;
        }
        if let Some(path) = partial.scratch_path {
            self.inner.scratch.cleanup_temp_file(&path).await;
        }
    }

    /// Accept path. No-op unless the session is still pending. Reads the
    /// (possibly user-edited) proposed text, answers the caller, tears the
    /// comparison down, and defers the file reload plus registry removal
    /// by the configured grace period so the assistant can write the file
    /// before the editor re-reads it.
    pub async fn resolve_as_saved(&self, tab_name: &str, buffer: BufferId) -> bool {
        let Some(mut session) = self.inner.registry.mark_saved(tab_name) else {
            return false;
        };
        debug!(tab = %tab_name, "diff accepted");

        let final_text = match self.inner.editor.buffer_lines(buffer).await {
            Ok(lines) => {
                let mut text = lines.join("\n");
                if session.trailing_newline && !text.ends_with('\n') {
                    text.push('\n');
                }
                text
            }
            Err(e) => {
                warn!(tab = %tab_name, error = %e, "proposed buffer unreadable; using original proposal");
                session.new_file_contents.clone()
            }
        };
        let result = ToolResult::file_saved(final_text);
        self.inner.registry.with_session(tab_name, |s| {
            s.result = Some(result.clone());
        });

        self.teardown_view(&session).await;

        if let Some(tx) = session.resolver.take() {
            let _ = tx.send(result);
        }

        let grace = Duration::from_millis(self.inner.cfg.get().diff.reload_grace_ms);
        let engine = self.clone();
        let tab = tab_name.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            engine.finalize_accepted(&tab).await;
        });
        true
    }

    /// Reject path. No-op unless the session is still pending. Teardown is
    /// ordered before the caller resumes so nothing half-dismantled is
    /// observable after resumption.
    pub async fn resolve_as_rejected(&self, tab_name: &str) -> bool {
        let Some(mut session) = self
            .inner
            .registry
            .take_pending(tab_name, SessionStatus::Rejected)
        else {
            return false;
        };
        debug!(tab = %tab_name, "diff rejected");

        let result = ToolResult::diff_rejected(tab_name);
        session.result = Some(result.clone());

        self.teardown_view(&session).await;

        if let Some(tx) = session.resolver.take() {
            let _ = tx.send(result);
        }
        true
    }

    /// Deferred tail of the accept path: ensure the accepted content exists
    /// on disk for new files, reload the file's buffer if it is open,
    /// restore the cursor, and drop the session from the registry. Safe to
    /// race with an explicit close; whoever removes the entry first does
    /// the work.
    pub async fn finalize_accepted(&self, tab_name: &str) -> bool {
        let Some(session) = self.inner.registry.remove_saved(tab_name) else {
            return false;
        };

        let accepted_text = session
            .result
            .as_ref()
            .and_then(|r| r.content.get(1))
            .map(|c| c.as_text().to_string())
            .unwrap_or_else(|| session.new_file_contents.clone());

        // the assistant normally persists the file during the grace period;
        // cover the new-file case where nothing existed before
        let on_disk = tokio::fs::try_exists(&session.old_file_path)
            .await
            .unwrap_or(false);
        if !on_disk {
            if let Some(parent) = session.old_file_path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!(path = %session.old_file_path.display(), error = %e, "mkdir for accepted file failed");
                }
            }
            if let Err(e) = tokio::fs::write(&session.old_file_path, &accepted_text).await {
                warn!(path = %session.old_file_path.display(), error = %e, "writing accepted file failed");
            }
        }

        let editor = &self.inner.editor;
        if let Some(buf) = editor.find_buffer_by_path(&session.old_file_path).await {
            if let Err(e) = editor.reload_buffer(buf.id).await {
                debug!(tab = %tab_name, error = %e, "post-accept reload failed");
            }
            for win in editor.list_windows().await {
                if win.buffer == buf.id {
                    let _ = editor.set_cursor(win.id, session.original_cursor).await;
                    break;
                }
            }
        }

        if let Some(path) = &session.scratch_path {
            self.inner.scratch.cleanup_temp_file(path).await;
        }
        debug!(tab = %tab_name, "diff session finalized");
        true
    }

    /// Dismantle the comparison view. Best-effort: every handle is checked
    /// before use and failures are logged, never raised, because a stuck
    /// teardown would leave a suspended caller behind.
    async fn teardown_view(&self, session: &DiffSession) {
        let editor = &self.inner.editor;

        for sub in &session.subscriptions {
            if let Err(e) = editor.unsubscribe(*sub).await {
                debug!(tab = %session.tab_name, error = %e, "unsubscribe failed");
            }
        }

        if editor.buffer_info(session.proposed_buffer).await.is_some() {
            if let Err(e) = editor.delete_buffer(session.proposed_buffer, true).await {
                debug!(tab = %session.tab_name, error = %e, "proposed buffer delete failed");
            }
        }
        if session.is_new_file && editor.buffer_info(session.original_buffer).await.is_some() {
            if let Err(e) = editor.delete_buffer(session.original_buffer, true).await {
                debug!(tab = %session.tab_name, error = %e, "placeholder delete failed");
            }
        }

        let (target, proposed) = session.windows;
        let live: Vec<WindowId> = editor.list_windows().await.iter().map(|w| w.id).collect();
        if live.contains(&proposed) {
            if let Err(e) = editor.close_window(proposed).await {
                debug!(tab = %session.tab_name, error = %e, "proposed window close failed");
            }
        }
        if live.contains(&target) {
            let _ = editor.set_diff_mode(target, false).await;
            let _ = editor.focus_window(target).await;
        }

        if session.status == SessionStatus::Rejected {
            if let Some(path) = &session.scratch_path {
                self.inner.scratch.cleanup_temp_file(path).await;
            }
        }
    }

    /// Companion close-by-display-name operation. A saved session gets its
    /// deferred reload now; a pending one is rejected; anything else is a
    /// no-op. Returns whether a session was found and acted on.
    pub async fn close_by_tab_name(&self, tab_name: &str) -> bool {
        match self.inner.registry.status(tab_name) {
            Some(SessionStatus::Pending) => self.resolve_as_rejected(tab_name).await,
            Some(SessionStatus::Saved) => self.finalize_accepted(tab_name).await,
            _ => false,
        }
    }

    /// Reject every open review. Returns how many sessions were acted on.
    pub async fn close_all(&self) -> usize {
        let mut closed = 0;
        for tab in self.inner.registry.tab_names() {
            if self.close_by_tab_name(&tab).await {
                closed += 1;
            }
        }
        closed
    }

    /// Shutdown hook: every pending session resolves as rejected (the safe
    /// default) so no caller is left suspended, and accepted sessions get
    /// their deferred finalize immediately. Drains the registry.
    pub async fn shutdown(&self) {
        let tabs = self.inner.registry.tab_names();
        if !tabs.is_empty() {
            info!(count = tabs.len(), "shutdown: resolving open diff sessions");
        }
        for tab in tabs {
            self.close_by_tab_name(&tab).await;
        }
        // anything still here had no recognized status; drop it
        for mut orphan in self.inner.registry.drain() {
            if let Some(tx) = orphan.resolver.take() {
                let _ = tx.send(ToolResult::diff_rejected(orphan.tab_name.clone()));
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_session(tab_name: &str) -> DiffSession {
    let (tx, _rx) = oneshot::channel();
    DiffSession {
        tab_name: tab_name.to_string(),
        old_file_path: PathBuf::from("/tmp/old.txt"),
        new_file_path: PathBuf::from("/tmp/new.txt"),
        new_file_contents: "x\n".into(),
        is_new_file: false,
        proposed_buffer: BufferId(1),
        original_buffer: BufferId(2),
        windows: (WindowId(1), WindowId(2)),
        subscriptions: vec![SubscriptionId(1)],
        status: SessionStatus::Pending,
        resolver: Some(tx),
        result: None,
        original_cursor: CursorPos { line: 1, col: 0 },
        trailing_newline: true,
        scratch_path: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_moves_the_resolver_out() {
        let mut s = test_session("t");
        assert!(s.resolver.is_some());
        let snap = s.snapshot();
        assert!(snap.resolver.is_some());
        assert!(s.resolver.is_none());
        assert_eq!(snap.tab_name, "t");
    }

    #[test]
    fn trailing_newline_bookkeeping() {
        let with = "a\nb\n";
        let without = "a\nb";
        assert!(with.ends_with('\n'));
        let lines: Vec<&str> = with.lines().collect();
        assert_eq!(lines.join("\n") + "\n", with);
        let lines: Vec<&str> = without.lines().collect();
        assert_eq!(lines.join("\n"), without);
    }
}
