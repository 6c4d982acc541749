// bridge/src/shim.rs
//
// In-memory implementation of the editor surface. Backs the headless
// binary and every test that exercises the diff engine; behaves like a
// small single-tabpage editor: buffers hold lines, windows hold buffers,
// lifecycle events fan out to subscribers over channels.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::editor::{
    BufferEvent, BufferEventKind, BufferId, BufferInfo, BufferKind, CursorPos, Diagnostic,
    EditorSurface, ScratchOpts, SubscriptionId, WindowId, WindowInfo,
};
use crate::error::{BridgeError, Result};

struct ShimBuffer {
    name: String,
    path: Option<PathBuf>,
    kind: BufferKind,
    filetype: Option<String>,
    modified: bool,
    modifiable: bool,
    lines: Vec<String>,
}

struct ShimWindow {
    buffer: BufferId,
    floating: bool,
    diff_mode: bool,
    cursor: CursorPos,
}

struct Subscription {
    buffer: BufferId,
    kind: BufferEventKind,
    tx: mpsc::UnboundedSender<BufferEvent>,
}

#[derive(Default)]
struct ShimState {
    buffers: BTreeMap<u64, ShimBuffer>,
    windows: BTreeMap<u64, ShimWindow>,
    subscriptions: BTreeMap<u64, Subscription>,
    diagnostics: Vec<Diagnostic>,
    current_window: u64,
    next_buffer: u64,
    next_window: u64,
    next_subscription: u64,
}

#[derive(Default)]
pub struct ShimEditor {
    state: Mutex<ShimState>,
}

impl ShimEditor {
    /// A shim with one normal window showing one empty scratch buffer,
    /// which is the minimal layout a running editor always has.
    pub fn new() -> Self {
        let me = Self::default();
        {
            let mut st = me.state.lock();
            let buf = st.alloc_buffer(ShimBuffer {
                name: String::new(),
                path: None,
                kind: BufferKind::Normal,
                filetype: None,
                modified: false,
                modifiable: true,
                lines: vec![String::new()],
            });
            let win = st.alloc_window(ShimWindow {
                buffer: buf,
                floating: false,
                diff_mode: false,
                cursor: CursorPos { line: 1, col: 0 },
            });
            st.current_window = win.0;
        }
        me
    }

    // test/bench helpers; also used by the headless binary

    pub fn window_count(&self) -> usize {
        self.state.lock().windows.len()
    }

    pub fn buffer_exists(&self, id: BufferId) -> bool {
        self.state.lock().buffers.contains_key(&id.0)
    }

    pub fn subscription_count(&self) -> usize {
        self.state.lock().subscriptions.len()
    }

    pub fn diff_mode(&self, win: WindowId) -> Option<bool> {
        self.state.lock().windows.get(&win.0).map(|w| w.diff_mode)
    }

    pub fn set_diagnostics(&self, diags: Vec<Diagnostic>) {
        self.state.lock().diagnostics = diags;
    }

    /// Replace a buffer's text as a user edit would: contents change and
    /// the modified flag goes up.
    pub fn edit_buffer(&self, id: BufferId, lines: Vec<String>) -> Result<()> {
        let mut st = self.state.lock();
        let buf = st
            .buffers
            .get_mut(&id.0)
            .ok_or_else(|| BridgeError::editor(format!("no buffer {}", id.0)))?;
        if !buf.modifiable {
            return Err(BridgeError::editor("buffer is not modifiable"));
        }
        buf.lines = lines;
        buf.modified = true;
        Ok(())
    }

    /// Open a floating window (completion popup, hover, ...) for tests that
    /// need an unsuitable window in the layout.
    pub fn open_floating_window(&self, buffer: BufferId) -> WindowId {
        let mut st = self.state.lock();
        st.alloc_window(ShimWindow {
            buffer,
            floating: true,
            diff_mode: false,
            cursor: CursorPos { line: 1, col: 0 },
        })
    }

    fn emit(st: &mut ShimState, buffer: BufferId, kind: BufferEventKind) {
        let mut dead = Vec::new();
        for (id, sub) in st.subscriptions.iter() {
            if sub.buffer == buffer && sub.kind == kind {
                let event = BufferEvent { buffer, kind };
                if sub.tx.send(event).is_err() {
                    dead.push(*id);
                }
            }
        }
        for id in dead {
            st.subscriptions.remove(&id);
        }
    }
}

impl ShimState {
    fn alloc_buffer(&mut self, buf: ShimBuffer) -> BufferId {
        self.next_buffer += 1;
        let id = self.next_buffer;
        self.buffers.insert(id, buf);
        BufferId(id)
    }

    fn alloc_window(&mut self, win: ShimWindow) -> WindowId {
        self.next_window += 1;
        let id = self.next_window;
        self.windows.insert(id, win);
        WindowId(id)
    }

    fn info(&self, id: u64, buf: &ShimBuffer) -> BufferInfo {
        BufferInfo {
            id: BufferId(id),
            name: buf.name.clone(),
            path: buf.path.clone(),
            kind: buf.kind,
            filetype: buf.filetype.clone(),
            modified: buf.modified,
        }
    }
}

#[async_trait]
impl EditorSurface for ShimEditor {
    async fn list_buffers(&self) -> Vec<BufferInfo> {
        let st = self.state.lock();
        st.buffers.iter().map(|(id, b)| st.info(*id, b)).collect()
    }

    async fn buffer_info(&self, id: BufferId) -> Option<BufferInfo> {
        let st = self.state.lock();
        st.buffers.get(&id.0).map(|b| st.info(id.0, b))
    }

    async fn find_buffer_by_path(&self, path: &Path) -> Option<BufferInfo> {
        let st = self.state.lock();
        st.buffers
            .iter()
            .find(|(_, b)| b.path.as_deref() == Some(path))
            .map(|(id, b)| st.info(*id, b))
    }

    async fn create_scratch_buffer(
        &self,
        name: &str,
        lines: Vec<String>,
        opts: ScratchOpts,
    ) -> Result<BufferId> {
        let mut st = self.state.lock();
        Ok(st.alloc_buffer(ShimBuffer {
            name: name.to_string(),
            path: None,
            kind: BufferKind::Scratch,
            filetype: opts.filetype,
            modified: false,
            modifiable: opts.modifiable,
            lines,
        }))
    }

    async fn buffer_lines(&self, id: BufferId) -> Result<Vec<String>> {
        let st = self.state.lock();
        st.buffers
            .get(&id.0)
            .map(|b| b.lines.clone())
            .ok_or_else(|| BridgeError::editor(format!("no buffer {}", id.0)))
    }

    async fn set_buffer_lines(&self, id: BufferId, lines: Vec<String>) -> Result<()> {
        let mut st = self.state.lock();
        let buf = st
            .buffers
            .get_mut(&id.0)
            .ok_or_else(|| BridgeError::editor(format!("no buffer {}", id.0)))?;
        buf.lines = lines;
        Ok(())
    }

    async fn delete_buffer(&self, id: BufferId, force: bool) -> Result<()> {
        let mut st = self.state.lock();
        let Some(buf) = st.buffers.get(&id.0) else {
            return Err(BridgeError::editor(format!("no buffer {}", id.0)));
        };
        if buf.modified && !force {
            return Err(BridgeError::editor("buffer has unsaved changes"));
        }
        // deleting surfaces as three distinct lifecycle events, matching
        // editors where delete implies unload and wipe
        Self::emit(&mut st, id, BufferEventKind::Delete);
        Self::emit(&mut st, id, BufferEventKind::Unload);
        Self::emit(&mut st, id, BufferEventKind::Wipe);
        st.buffers.remove(&id.0);
        st.subscriptions.retain(|_, s| s.buffer != id);
        // windows showing the deleted buffer fall back to an empty scratch
        let ids: Vec<u64> = st
            .windows
            .iter()
            .filter(|(_, w)| w.buffer == id)
            .map(|(wid, _)| *wid)
            .collect();
        if !ids.is_empty() {
            let fallback = st.alloc_buffer(ShimBuffer {
                name: String::new(),
                path: None,
                kind: BufferKind::Normal,
                filetype: None,
                modified: false,
                modifiable: true,
                lines: vec![String::new()],
            });
            for wid in ids {
                if let Some(w) = st.windows.get_mut(&wid) {
                    w.buffer = fallback;
                    w.diff_mode = false;
                }
            }
        }
        Ok(())
    }

    async fn reload_buffer(&self, id: BufferId) -> Result<()> {
        let path = {
            let st = self.state.lock();
            let buf = st
                .buffers
                .get(&id.0)
                .ok_or_else(|| BridgeError::editor(format!("no buffer {}", id.0)))?;
            buf.path.clone()
        };
        let Some(path) = path else {
            return Err(BridgeError::editor("cannot reload a scratch buffer"));
        };
        let lines = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text.lines().map(String::from).collect(),
            // file may not exist yet; an editor shows an empty buffer
            Err(_) => vec![String::new()],
        };
        let mut st = self.state.lock();
        if let Some(buf) = st.buffers.get_mut(&id.0) {
            buf.lines = lines;
            buf.modified = false;
        }
        Ok(())
    }

    async fn save_buffer(&self, id: BufferId) -> Result<()> {
        let (path, text) = {
            let st = self.state.lock();
            let buf = st
                .buffers
                .get(&id.0)
                .ok_or_else(|| BridgeError::editor(format!("no buffer {}", id.0)))?;
            (buf.path.clone(), buf.lines.join("\n"))
        };
        if let Some(path) = path {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::write(&path, text).await?;
        }
        let mut st = self.state.lock();
        if let Some(buf) = st.buffers.get_mut(&id.0) {
            buf.modified = false;
        }
        Self::emit(&mut st, id, BufferEventKind::Save);
        Ok(())
    }

    async fn list_windows(&self) -> Vec<WindowInfo> {
        let st = self.state.lock();
        st.windows
            .iter()
            .map(|(id, w)| WindowInfo { id: WindowId(*id), buffer: w.buffer, floating: w.floating })
            .collect()
    }

    async fn current_window(&self) -> WindowId {
        WindowId(self.state.lock().current_window)
    }

    async fn split_window(&self, from: WindowId, _vertical: bool) -> Result<WindowId> {
        let mut st = self.state.lock();
        let buffer = st
            .windows
            .get(&from.0)
            .map(|w| w.buffer)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", from.0)))?;
        Ok(st.alloc_window(ShimWindow {
            buffer,
            floating: false,
            diff_mode: false,
            cursor: CursorPos { line: 1, col: 0 },
        }))
    }

    async fn close_window(&self, id: WindowId) -> Result<()> {
        let mut st = self.state.lock();
        if st.windows.len() == 1 {
            return Err(BridgeError::editor("cannot close the last window"));
        }
        st.windows
            .remove(&id.0)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", id.0)))?;
        if st.current_window == id.0 {
            st.current_window = *st.windows.keys().next().expect("at least one window left");
        }
        Ok(())
    }

    async fn focus_window(&self, id: WindowId) -> Result<()> {
        let mut st = self.state.lock();
        if !st.windows.contains_key(&id.0) {
            return Err(BridgeError::editor(format!("no window {}", id.0)));
        }
        st.current_window = id.0;
        Ok(())
    }

    async fn set_window_buffer(&self, win: WindowId, buf: BufferId) -> Result<()> {
        let mut st = self.state.lock();
        if !st.buffers.contains_key(&buf.0) {
            return Err(BridgeError::editor(format!("no buffer {}", buf.0)));
        }
        let w = st
            .windows
            .get_mut(&win.0)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", win.0)))?;
        w.buffer = buf;
        Ok(())
    }

    async fn open_file(&self, win: WindowId, path: &Path) -> Result<BufferId> {
        if let Some(existing) = self.find_buffer_by_path(path).await {
            self.set_window_buffer(win, existing.id).await?;
            return Ok(existing.id);
        }
        let lines: Vec<String> = match tokio::fs::read_to_string(path).await {
            Ok(text) => text.lines().map(String::from).collect(),
            Err(_) => vec![String::new()],
        };
        let filetype = crate::editor::extension_filetype(path).map(String::from);
        let mut st = self.state.lock();
        let buf = st.alloc_buffer(ShimBuffer {
            name: path.display().to_string(),
            path: Some(path.to_path_buf()),
            kind: BufferKind::Normal,
            filetype,
            modified: false,
            modifiable: true,
            lines,
        });
        let w = st
            .windows
            .get_mut(&win.0)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", win.0)))?;
        w.buffer = buf;
        Ok(buf)
    }

    async fn set_diff_mode(&self, win: WindowId, on: bool) -> Result<()> {
        let mut st = self.state.lock();
        let w = st
            .windows
            .get_mut(&win.0)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", win.0)))?;
        w.diff_mode = on;
        Ok(())
    }

    async fn cursor(&self, win: WindowId) -> Result<CursorPos> {
        let st = self.state.lock();
        st.windows
            .get(&win.0)
            .map(|w| w.cursor)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", win.0)))
    }

    async fn set_cursor(&self, win: WindowId, pos: CursorPos) -> Result<()> {
        let mut st = self.state.lock();
        let w = st
            .windows
            .get_mut(&win.0)
            .ok_or_else(|| BridgeError::editor(format!("no window {}", win.0)))?;
        w.cursor = pos;
        Ok(())
    }

    async fn detect_filetype(&self, _path: &Path) -> Option<String> {
        // the shim has no language machinery; callers fall through to the
        // open-buffer and extension-table stages
        None
    }

    async fn diagnostics(&self, path: Option<&Path>) -> Vec<Diagnostic> {
        let st = self.state.lock();
        match path {
            None => st.diagnostics.clone(),
            Some(p) => st
                .diagnostics
                .iter()
                .filter(|d| d.file_path == p)
                .cloned()
                .collect(),
        }
    }

    async fn subscribe(
        &self,
        buffer: BufferId,
        kind: BufferEventKind,
        tx: mpsc::UnboundedSender<BufferEvent>,
    ) -> Result<SubscriptionId> {
        let mut st = self.state.lock();
        if !st.buffers.contains_key(&buffer.0) {
            return Err(BridgeError::editor(format!("no buffer {}", buffer.0)));
        }
        st.next_subscription += 1;
        let id = st.next_subscription;
        st.subscriptions.insert(id, Subscription { buffer, kind, tx });
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        self.state.lock().subscriptions.remove(&id.0);
        Ok(())
    }
}
