// bridge/src/tools.rs
//
// Named tools the assistant can invoke. Dispatch validates parameters
// before any editor state is touched; blocking tools additionally demand a
// deferred dispatch context so they can stay suspended without stalling
// the connection that carried them.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::ConfigManager;
use crate::diff::{DiffEngine, OpenDiffParams};
use crate::editor::{window_is_suitable, BufferKind, CursorPos, EditorSurface};
use crate::error::{BridgeError, Result};
use crate::protocol::ToolResult;
use crate::selection::SelectionTracker;

/// How the dispatcher is running this call. Blocking tools refuse
/// `Immediate`: resolving them can take arbitrarily long (a human decides),
/// so running one on a caller that cannot stay suspended is a programming
/// error, never something to paper over by going synchronous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchKind {
    Immediate,
    Deferred,
}

#[derive(Clone, Copy, Debug)]
pub struct ToolContext {
    pub kind: DispatchKind,
}

impl ToolContext {
    pub fn deferred() -> Self {
        Self { kind: DispatchKind::Deferred }
    }

    pub fn immediate() -> Self {
        Self { kind: DispatchKind::Immediate }
    }

    pub fn is_deferred(&self) -> bool {
        self.kind == DispatchKind::Deferred
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    /// Blocking tools suspend until a human acts; the server dispatches
    /// them on their own task.
    fn blocking(&self) -> bool {
        false
    }
    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<ToolResult>;
}

#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.push(tool);
    }

    pub fn is_blocking(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name() == name && t.blocking())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    pub async fn dispatch(&self, name: &str, ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        for t in &self.tools {
            if t.name() == name {
                return t.call(ctx, params).await;
            }
        }
        Err(BridgeError::MethodNotFound(name.to_string()))
    }
}

/// Shared handles the built-in tools close over.
#[derive(Clone)]
pub struct ToolDeps {
    pub engine: DiffEngine,
    pub editor: Arc<dyn EditorSurface>,
    pub selection: SelectionTracker,
    pub cfg: Arc<ConfigManager>,
}

/// The full built-in tool set.
pub fn default_registry(deps: &ToolDeps) -> ToolRegistry {
    let mut reg = ToolRegistry::new();
    reg.register(Arc::new(OpenDiffTool { engine: deps.engine.clone() }));
    reg.register(Arc::new(CloseTabTool { engine: deps.engine.clone() }));
    reg.register(Arc::new(CloseAllDiffTabsTool { engine: deps.engine.clone() }));
    reg.register(Arc::new(OpenFileTool { editor: deps.editor.clone() }));
    reg.register(Arc::new(GetCurrentSelectionTool { selection: deps.selection.clone(), name: "getCurrentSelection" }));
    reg.register(Arc::new(GetCurrentSelectionTool { selection: deps.selection.clone(), name: "getLatestSelection" }));
    reg.register(Arc::new(GetOpenEditorsTool { editor: deps.editor.clone() }));
    reg.register(Arc::new(GetWorkspaceFoldersTool { cfg: deps.cfg.clone() }));
    reg.register(Arc::new(GetDiagnosticsTool { editor: deps.editor.clone() }));
    reg.register(Arc::new(CheckDocumentDirtyTool { editor: deps.editor.clone() }));
    reg.register(Arc::new(SaveDocumentTool { editor: deps.editor.clone() }));
    reg
}

fn required_str(params: &Value, key: &str) -> Result<String> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| BridgeError::invalid_params(format!("{key} is required and must be a string")))
}

fn optional_usize(params: &Value, key: &str) -> Option<usize> {
    params.get(key).and_then(|v| v.as_u64()).map(|n| n as usize)
}

fn json_content(value: Value) -> ToolResult {
    ToolResult::text_parts([value.to_string()])
}

/// The blocking diff-review entry point.
pub struct OpenDiffTool {
    pub engine: DiffEngine,
}

#[async_trait]
impl Tool for OpenDiffTool {
    fn name(&self) -> &'static str {
        "openDiff"
    }

    fn blocking(&self) -> bool {
        true
    }

    async fn call(&self, ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        if !ctx.is_deferred() {
            return Err(BridgeError::BlockingContext { tool: "openDiff" });
        }
        // all four parameters are required; fail before touching the editor
        let old_file_path = required_str(&params, "old_file_path")?;
        let new_file_path = required_str(&params, "new_file_path")?;
        let new_file_contents = required_str(&params, "new_file_contents")?;
        let tab_name = required_str(&params, "tab_name")?;

        self.engine
            .open_diff(OpenDiffParams {
                old_file_path: PathBuf::from(old_file_path),
                new_file_path: PathBuf::from(new_file_path),
                new_file_contents,
                tab_name,
            })
            .await
    }
}

/// Close a review by its display name: finalizes an accepted session,
/// rejects a pending one.
pub struct CloseTabTool {
    pub engine: DiffEngine,
}

#[async_trait]
impl Tool for CloseTabTool {
    fn name(&self) -> &'static str {
        "closeTab"
    }

    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        let tab_name = required_str(&params, "tab_name")?;
        let acted = self.engine.close_by_tab_name(&tab_name).await;
        Ok(ToolResult::text_parts([if acted {
            "TAB_CLOSED".to_string()
        } else {
            "NO_MATCHING_TAB".to_string()
        }]))
    }
}

pub struct CloseAllDiffTabsTool {
    pub engine: DiffEngine,
}

#[async_trait]
impl Tool for CloseAllDiffTabsTool {
    fn name(&self) -> &'static str {
        "closeAllDiffTabs"
    }

    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<ToolResult> {
        let closed = self.engine.close_all().await;
        Ok(ToolResult::text_parts([format!("CLOSED_{closed}_DIFF_TABS")]))
    }
}

/// Open a file in a suitable main window, optionally positioning the
/// cursor.
pub struct OpenFileTool {
    pub editor: Arc<dyn EditorSurface>,
}

#[async_trait]
impl Tool for OpenFileTool {
    fn name(&self) -> &'static str {
        "openFile"
    }

    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        let file_path = PathBuf::from(required_str(&params, "filePath")?);
        let start_line = optional_usize(&params, "startLine");

        let mut target = None;
        for win in self.editor.list_windows().await {
            let Some(buf) = self.editor.buffer_info(win.buffer).await else { continue };
            if window_is_suitable(&win, &buf) {
                target = Some(win.id);
                break;
            }
        }
        let win = match target {
            Some(w) => w,
            None => {
                let current = self.editor.current_window().await;
                self.editor.split_window(current, false).await?
            }
        };
        self.editor.open_file(win, &file_path).await?;
        self.editor.focus_window(win).await?;
        if let Some(line) = start_line {
            self.editor
                .set_cursor(win, CursorPos { line: line.max(1), col: 0 })
                .await?;
        }
        Ok(ToolResult::text_parts([format!("Opened {}", file_path.display())]))
    }
}

pub struct GetCurrentSelectionTool {
    pub selection: SelectionTracker,
    pub name: &'static str,
}

#[async_trait]
impl Tool for GetCurrentSelectionTool {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<ToolResult> {
        let payload = match self.selection.latest() {
            Some(sel) => serde_json::to_value(sel)?,
            None => json!({ "text": "", "selection": { "isEmpty": true } }),
        };
        Ok(json_content(payload))
    }
}

pub struct GetOpenEditorsTool {
    pub editor: Arc<dyn EditorSurface>,
}

#[async_trait]
impl Tool for GetOpenEditorsTool {
    fn name(&self) -> &'static str {
        "getOpenEditors"
    }

    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<ToolResult> {
        let mut editors = Vec::new();
        for buf in self.editor.list_buffers().await {
            if buf.kind != BufferKind::Normal {
                continue;
            }
            let Some(path) = &buf.path else { continue };
            editors.push(json!({
                "filePath": path,
                "isDirty": buf.modified,
            }));
        }
        Ok(json_content(json!({ "editors": editors })))
    }
}

pub struct GetWorkspaceFoldersTool {
    pub cfg: Arc<ConfigManager>,
}

#[async_trait]
impl Tool for GetWorkspaceFoldersTool {
    fn name(&self) -> &'static str {
        "getWorkspaceFolders"
    }

    async fn call(&self, _ctx: &ToolContext, _params: Value) -> Result<ToolResult> {
        let mut folders = self.cfg.get().workspace.folders;
        if folders.is_empty() {
            if let Ok(cwd) = std::env::current_dir() {
                folders.push(cwd);
            }
        }
        Ok(json_content(json!({ "folders": folders })))
    }
}

pub struct GetDiagnosticsTool {
    pub editor: Arc<dyn EditorSurface>,
}

#[async_trait]
impl Tool for GetDiagnosticsTool {
    fn name(&self) -> &'static str {
        "getDiagnostics"
    }

    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        let path = params
            .get("filePath")
            .and_then(|v| v.as_str())
            .map(PathBuf::from);
        let diags = self.editor.diagnostics(path.as_deref()).await;
        Ok(json_content(serde_json::to_value(diags)?))
    }
}

pub struct CheckDocumentDirtyTool {
    pub editor: Arc<dyn EditorSurface>,
}

#[async_trait]
impl Tool for CheckDocumentDirtyTool {
    fn name(&self) -> &'static str {
        "checkDocumentDirty"
    }

    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        let path = PathBuf::from(required_str(&params, "filePath")?);
        let payload = match self.editor.find_buffer_by_path(&path).await {
            Some(buf) => json!({ "isOpen": true, "isDirty": buf.modified }),
            None => json!({ "isOpen": false, "isDirty": false }),
        };
        Ok(json_content(payload))
    }
}

pub struct SaveDocumentTool {
    pub editor: Arc<dyn EditorSurface>,
}

#[async_trait]
impl Tool for SaveDocumentTool {
    fn name(&self) -> &'static str {
        "saveDocument"
    }

    async fn call(&self, _ctx: &ToolContext, params: Value) -> Result<ToolResult> {
        let path = PathBuf::from(required_str(&params, "filePath")?);
        let Some(buf) = self.editor.find_buffer_by_path(&path).await else {
            return Err(BridgeError::invalid_params(format!(
                "no open document for {}",
                path.display()
            )));
        };
        self.editor.save_buffer(buf.id).await?;
        Ok(json_content(json!({ "saved": true, "filePath": path })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::shim::ShimEditor;

    fn deps() -> ToolDeps {
        let editor: Arc<dyn EditorSurface> = Arc::new(ShimEditor::new());
        let cfg = Arc::new(ConfigManager::ephemeral(Config::default()));
        ToolDeps {
            engine: DiffEngine::new(editor.clone(), cfg.clone()),
            editor,
            selection: SelectionTracker::new(0),
            cfg,
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_method_not_found() {
        let reg = default_registry(&deps());
        let err = reg
            .dispatch("noSuchTool", &ToolContext::deferred(), json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn open_diff_requires_all_params() {
        let reg = default_registry(&deps());
        let err = reg
            .dispatch(
                "openDiff",
                &ToolContext::deferred(),
                json!({ "old_file_path": "/a", "tab_name": "t" }),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), crate::error::INVALID_PARAMS);
        assert!(err.to_string().contains("new_file_path"));
    }

    #[tokio::test]
    async fn open_diff_refuses_an_immediate_context() {
        let d = deps();
        let reg = default_registry(&d);
        let before = d.editor.list_buffers().await.len();
        let err = reg
            .dispatch(
                "openDiff",
                &ToolContext::immediate(),
                json!({
                    "old_file_path": "/w/a.rs",
                    "new_file_path": "/w/a.rs",
                    "new_file_contents": "x",
                    "tab_name": "t",
                }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::BlockingContext { tool: "openDiff" }));
        assert_eq!(err.code(), crate::error::INTERNAL_ERROR);
        // precondition failures never touch editor state
        assert_eq!(d.editor.list_buffers().await.len(), before);
        assert_eq!(d.editor.list_windows().await.len(), 1);
        assert!(d.engine.registry().is_empty());
    }

    #[tokio::test]
    async fn open_diff_is_marked_blocking() {
        let reg = default_registry(&deps());
        assert!(reg.is_blocking("openDiff"));
        assert!(!reg.is_blocking("closeTab"));
        assert!(!reg.is_blocking("getOpenEditors"));
    }

    #[tokio::test]
    async fn selection_tools_share_one_cache() {
        let d = deps();
        let reg = default_registry(&d);
        let _ = d.selection.update(crate::selection::SelectionState {
            text: "picked".into(),
            file_path: Some(PathBuf::from("/w/x.rs")),
            selection: Default::default(),
        });
        for name in ["getCurrentSelection", "getLatestSelection"] {
            let res = reg
                .dispatch(name, &ToolContext::deferred(), json!({}))
                .await
                .unwrap();
            assert!(res.content[0].as_text().contains("picked"));
        }
    }

    #[tokio::test]
    async fn check_document_dirty_reports_closed_documents() {
        let reg = default_registry(&deps());
        let res = reg
            .dispatch(
                "checkDocumentDirty",
                &ToolContext::deferred(),
                json!({ "filePath": "/nowhere.rs" }),
            )
            .await
            .unwrap();
        let v: Value = serde_json::from_str(res.content[0].as_text()).unwrap();
        assert_eq!(v["isOpen"], json!(false));
    }

    #[tokio::test]
    async fn close_tab_reports_missing_sessions() {
        let reg = default_registry(&deps());
        let res = reg
            .dispatch(
                "closeTab",
                &ToolContext::deferred(),
                json!({ "tab_name": "ghost" }),
            )
            .await
            .unwrap();
        assert_eq!(res.content[0].as_text(), "NO_MATCHING_TAB");
    }
}
