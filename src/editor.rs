// bridge/src/editor.rs
//
// Abstract editor surface the bridge drives. A real frontend implements
// `EditorSurface` against its UI main loop; `shim.rs` implements it in
// memory for headless runs and tests. The diff engine assumes exactly the
// semantics documented on each method.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

use crate::error::Result;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BufferId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WindowId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Normal,
    Scratch,
    Terminal,
    Prompt,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BufferInfo {
    pub id: BufferId,
    /// Display name; for file-backed buffers this is the path string.
    pub name: String,
    pub path: Option<PathBuf>,
    pub kind: BufferKind,
    pub filetype: Option<String>,
    pub modified: bool,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct WindowInfo {
    pub id: WindowId,
    pub buffer: BufferId,
    pub floating: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorPos {
    /// 1-based line.
    pub line: usize,
    /// 0-based column.
    pub col: usize,
}

/// Buffer lifecycle events the diff engine listens for. Distinct user
/// actions (closing a window, deleting a buffer, wiping it) surface through
/// different events; any one of them is sufficient to detect abandonment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferEventKind {
    Save,
    Delete,
    Unload,
    Wipe,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferEvent {
    pub buffer: BufferId,
    pub kind: BufferEventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticSeverity {
    Error,
    Warning,
    Info,
    Hint,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostic {
    pub file_path: PathBuf,
    pub line: usize,
    pub col: usize,
    pub severity: DiagnosticSeverity,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Options for `create_scratch_buffer`.
#[derive(Clone, Debug, Default)]
pub struct ScratchOpts {
    pub filetype: Option<String>,
    pub modifiable: bool,
}

/// Filetypes of sidebar/tree panels a comparison must never land in.
/// Extension point: data, not control flow.
pub const SIDEBAR_FILETYPES: &[&str] = &[
    "neo-tree", "NvimTree", "netrw", "oil", "aerial", "tagbar", "undotree", "Trouble", "fugitive",
];

/// Extension -> filetype fallback used when neither the editor's matcher
/// nor an open buffer can name the type.
pub const EXTENSION_FILETYPES: &[(&str, &str)] = &[
    ("rs", "rust"),
    ("py", "python"),
    ("js", "javascript"),
    ("jsx", "javascriptreact"),
    ("ts", "typescript"),
    ("tsx", "typescriptreact"),
    ("go", "go"),
    ("c", "c"),
    ("h", "c"),
    ("cpp", "cpp"),
    ("hpp", "cpp"),
    ("java", "java"),
    ("rb", "ruby"),
    ("lua", "lua"),
    ("sh", "sh"),
    ("bash", "bash"),
    ("zsh", "zsh"),
    ("md", "markdown"),
    ("json", "json"),
    ("toml", "toml"),
    ("yml", "yaml"),
    ("yaml", "yaml"),
    ("html", "html"),
    ("css", "css"),
    ("sql", "sql"),
    ("vim", "vim"),
    ("txt", "text"),
];

pub fn extension_filetype(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    EXTENSION_FILETYPES
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, ft)| *ft)
}

/// A window is unsuitable for hosting a comparison when it floats, holds a
/// terminal or prompt buffer, or shows a sidebar/tree panel.
pub fn window_is_suitable(win: &WindowInfo, buf: &BufferInfo) -> bool {
    if win.floating {
        return false;
    }
    if matches!(buf.kind, BufferKind::Terminal | BufferKind::Prompt) {
        return false;
    }
    if let Some(ft) = &buf.filetype {
        if SIDEBAR_FILETYPES.iter().any(|s| s == ft) {
            return false;
        }
    }
    true
}

/// The editor surface contract. All handle-taking methods fail on stale
/// handles; teardown paths therefore validate before calling.
#[async_trait]
pub trait EditorSurface: Send + Sync {
    // buffers
    async fn list_buffers(&self) -> Vec<BufferInfo>;
    async fn buffer_info(&self, id: BufferId) -> Option<BufferInfo>;
    async fn find_buffer_by_path(&self, path: &Path) -> Option<BufferInfo>;
    async fn create_scratch_buffer(
        &self,
        name: &str,
        lines: Vec<String>,
        opts: ScratchOpts,
    ) -> Result<BufferId>;
    async fn buffer_lines(&self, id: BufferId) -> Result<Vec<String>>;
    async fn set_buffer_lines(&self, id: BufferId, lines: Vec<String>) -> Result<()>;
    async fn delete_buffer(&self, id: BufferId, force: bool) -> Result<()>;
    /// Re-read a file-backed buffer from disk, clearing the modified flag.
    async fn reload_buffer(&self, id: BufferId) -> Result<()>;
    /// Write a file-backed buffer to disk.
    async fn save_buffer(&self, id: BufferId) -> Result<()>;

    // windows
    async fn list_windows(&self) -> Vec<WindowInfo>;
    async fn current_window(&self) -> WindowId;
    async fn split_window(&self, from: WindowId, vertical: bool) -> Result<WindowId>;
    async fn close_window(&self, id: WindowId) -> Result<()>;
    async fn focus_window(&self, id: WindowId) -> Result<()>;
    async fn set_window_buffer(&self, win: WindowId, buf: BufferId) -> Result<()>;
    /// Open `path` in `win`, creating or reusing a file-backed buffer.
    async fn open_file(&self, win: WindowId, path: &Path) -> Result<BufferId>;
    async fn set_diff_mode(&self, win: WindowId, on: bool) -> Result<()>;
    async fn cursor(&self, win: WindowId) -> Result<CursorPos>;
    async fn set_cursor(&self, win: WindowId, pos: CursorPos) -> Result<()>;

    // metadata
    /// The editor's built-in filetype matcher, if it has one.
    async fn detect_filetype(&self, path: &Path) -> Option<String>;
    async fn diagnostics(&self, path: Option<&Path>) -> Vec<Diagnostic>;

    // events
    /// Subscribe to one lifecycle event on one buffer. Events are delivered
    /// on `tx` until the handle is unsubscribed or the buffer goes away.
    async fn subscribe(
        &self,
        buffer: BufferId,
        kind: BufferEventKind,
        tx: mpsc::UnboundedSender<BufferEvent>,
    ) -> Result<SubscriptionId>;
    /// Dropping a subscription that is already gone is not an error.
    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()>;
}
