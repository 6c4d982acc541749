// bridge/src/config.rs

use anyhow::{Context, Result};
use directories::ProjectDirs;
use notify::{recommended_watcher, Event, RecursiveMode, Watcher};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{fs, path::{Path, PathBuf}, sync::Arc};
use tokio::sync::broadcast;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub workspace: WorkspaceConfig,
    pub diff: DiffConfig,
    pub selection: SelectionConfig,
    pub log: LogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    /// Inclusive port range scanned for a free local port.
    pub port_min: u16,
    pub port_max: u16,
    /// Override for the lockfile directory; defaults to `<data dir>/ide`.
    pub lock_dir: Option<PathBuf>,
}
impl Default for ServerConfig {
    fn default() -> Self {
        Self { host: "127.0.0.1".into(), port_min: 10000, port_max: 10999, lock_dir: None }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub folders: Vec<PathBuf>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// Grace period between accepting a diff and reloading the underlying
    /// file buffer, so the assistant can persist the file first. Tuning
    /// value, not load-bearing.
    pub reload_grace_ms: u64,
    /// Override for the scratch base directory; defaults to the OS temp dir.
    pub scratch_dir: Option<PathBuf>,
    /// Open the comparison as a vertical split.
    pub vertical_split: bool,
}
impl Default for DiffConfig {
    fn default() -> Self {
        Self { reload_grace_ms: 150, scratch_dir: None, vertical_split: true }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Minimum ms between selection_changed notifications.
    pub debounce_ms: u64,
}
impl Default for SelectionConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct LogConfig {
    pub level: Option<String>, // "trace" | "debug" | "info" | "warn" | "error"
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Scope { System, User, Workspace, Runtime }

/// A config file on disk: any subset of fields, missing ones defaulted by
/// the inner type.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PartialConfig(pub Config);

fn merge(a: &mut Config, b: &Config) {
    let overlay = |dst: &mut Option<String>, src: &Option<String>| { if src.is_some() { *dst = src.clone(); } };

    if b.server.host != ServerConfig::default().host { a.server.host = b.server.host.clone(); }
    if b.server.port_min != 0 && b.server.port_min != ServerConfig::default().port_min {
        a.server.port_min = b.server.port_min;
    }
    if b.server.port_max != 0 && b.server.port_max != ServerConfig::default().port_max {
        a.server.port_max = b.server.port_max;
    }
    if b.server.lock_dir.is_some() { a.server.lock_dir = b.server.lock_dir.clone(); }

    if !b.workspace.folders.is_empty() { a.workspace.folders = b.workspace.folders.clone(); }

    if b.diff.reload_grace_ms != 0 && b.diff.reload_grace_ms != DiffConfig::default().reload_grace_ms {
        a.diff.reload_grace_ms = b.diff.reload_grace_ms;
    }
    if b.diff.scratch_dir.is_some() { a.diff.scratch_dir = b.diff.scratch_dir.clone(); }
    a.diff.vertical_split = b.diff.vertical_split;

    if b.selection.debounce_ms != 0 && b.selection.debounce_ms != SelectionConfig::default().debounce_ms {
        a.selection.debounce_ms = b.selection.debounce_ms;
    }

    overlay(&mut a.log.level, &b.log.level);
}

fn config_paths(workspace_root: &Path) -> Result<(PathBuf, PathBuf, PathBuf)> {
    let proj = ProjectDirs::from("dev", "earthlings", "editor-bridge")
        .context("ProjectDirs not available")?;
    let user = proj.config_dir().join("bridge.toml");
    let system = if cfg!(target_os = "windows") {
        PathBuf::from(r"C:\ProgramData\EditorBridge\bridge.toml")
    } else {
        PathBuf::from("/etc/editor-bridge/bridge.toml")
    };
    let workspace = workspace_root.join(".bridge").join("bridge.toml");
    Ok((system, user, workspace))
}

#[derive(Clone)]
pub struct ConfigManager {
    inner: Arc<RwLock<Config>>,
    tx: broadcast::Sender<Config>,
    _watcher: Arc<RwLock<Option<notify::RecommendedWatcher>>>,
    system_path: PathBuf,
    user_path: PathBuf,
    workspace_path: PathBuf,
    runtime_overlay: Arc<RwLock<Config>>,
}

impl ConfigManager {
    pub fn load(workspace_root: impl AsRef<Path>) -> Result<Self> {
        let (system_path, user_path, workspace_path) = config_paths(workspace_root.as_ref())?;
        let me = Self {
            inner: Arc::new(RwLock::new(Config::default())),
            tx: broadcast::channel(64).0,
            _watcher: Arc::new(RwLock::new(None)),
            system_path, user_path, workspace_path,
            runtime_overlay: Arc::new(RwLock::new(Config::default())),
        };
        me.reload_all()?;
        me.start_watch()?;
        Ok(me)
    }

    /// In-memory manager with no files behind it; used by the headless
    /// binary's --no-config mode and by tests.
    pub fn ephemeral(initial: Config) -> Self {
        Self {
            inner: Arc::new(RwLock::new(initial.clone())),
            tx: broadcast::channel(64).0,
            _watcher: Arc::new(RwLock::new(None)),
            system_path: PathBuf::new(),
            user_path: PathBuf::new(),
            workspace_path: PathBuf::new(),
            // the initial value doubles as the overlay base so later
            // runtime patches merge on top of it, not on defaults
            runtime_overlay: Arc::new(RwLock::new(initial)),
        }
    }

    fn read_file(path: &Path) -> Option<Config> {
        let text = fs::read_to_string(path).ok()?;
        let p: PartialConfig = toml::from_str(&text).ok()?;
        Some(p.0)
    }

    pub fn reload_all(&self) -> Result<()> {
        let mut merged = Config::default();
        if let Some(sys) = Self::read_file(&self.system_path) { merge(&mut merged, &sys); }
        if let Some(usr) = Self::read_file(&self.user_path) { merge(&mut merged, &usr); }
        if let Some(ws)  = Self::read_file(&self.workspace_path) { merge(&mut merged, &ws); }
        let rt = self.runtime_overlay.read().clone();
        merge(&mut merged, &rt);
        *self.inner.write() = merged.clone();
        let _ = self.tx.send(merged);
        Ok(())
    }

    fn start_watch(&self) -> Result<()> {
        let system = self.system_path.clone();
        let user = self.user_path.clone();
        let workspace = self.workspace_path.clone();
        let tx = self.tx.clone();
        let inner = self.inner.clone();
        let runtime_overlay = self.runtime_overlay.clone();

        let mut watcher = recommended_watcher(move |res: Result<Event, _>| {
            if res.is_err() { return; }
            let mut merged = Config::default();
            if let Some(sys) = ConfigManager::read_file(&system) { merge(&mut merged, &sys); }
            if let Some(usr) = ConfigManager::read_file(&user) { merge(&mut merged, &usr); }
            if let Some(ws)  = ConfigManager::read_file(&workspace) { merge(&mut merged, &ws); }
            let rt = runtime_overlay.read().clone();
            merge(&mut merged, &rt);
            *inner.write() = merged.clone();
            let _ = tx.send(merged);
        })?;
        for p in [&self.system_path, &self.user_path, &self.workspace_path] {
            if let Some(dir) = p.parent() {
                if dir.exists() { watcher.watch(dir, RecursiveMode::NonRecursive)?; }
            }
        }
        *self._watcher.write() = Some(watcher);
        Ok(())
    }

    pub fn get(&self) -> Config { self.inner.read().clone() }
    pub fn subscribe(&self) -> broadcast::Receiver<Config> { self.tx.subscribe() }

    pub fn apply_runtime_overlay(&self, patch: Config) -> Result<()> {
        {
            let mut rt = self.runtime_overlay.write();
            merge(&mut *rt, &patch);
        }
        self.reload_all()
    }

    pub fn write_patch(&self, scope: Scope, patch: &Config) -> Result<()> {
        use std::io::Write;
        let path = match scope {
            Scope::System    => &self.system_path,
            Scope::User      => &self.user_path,
            Scope::Workspace => &self.workspace_path,
            Scope::Runtime   => anyhow::bail!("Runtime scope is ephemeral; cannot persist"),
        };
        if let Some(dir) = path.parent() { fs::create_dir_all(dir)?; }
        let current = Self::read_file(path).unwrap_or_default();
        let mut merged = current.clone();
        merge(&mut merged, patch);
        let text = toml::to_string_pretty(&PartialConfig(merged)).context("serialize toml")?;
        let mut f = fs::File::create(path)?;
        f.write_all(text.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let c = Config::default();
        assert_eq!(c.server.host, "127.0.0.1");
        assert!(c.server.port_min <= c.server.port_max);
        assert_eq!(c.diff.reload_grace_ms, 150);
        assert!(c.diff.vertical_split);
    }

    #[test]
    fn merge_overlays_set_fields_only() {
        let mut base = Config::default();
        let mut over = Config::default();
        over.diff.reload_grace_ms = 400;
        over.log.level = Some("debug".into());
        merge(&mut base, &over);
        assert_eq!(base.diff.reload_grace_ms, 400);
        assert_eq!(base.log.level.as_deref(), Some("debug"));
        // untouched fields keep their defaults
        assert_eq!(base.server.port_min, 10000);
    }

    #[test]
    fn partial_toml_round_trips() {
        let text = "[diff]\nreload_grace_ms = 250\n";
        let p: PartialConfig = toml::from_str(text).unwrap();
        assert_eq!(p.0.diff.reload_grace_ms, 250);
        assert_eq!(p.0.selection.debounce_ms, 50);
    }

    #[test]
    fn ephemeral_manager_serves_overlays() {
        let cm = ConfigManager::ephemeral(Config::default());
        let mut patch = Config::default();
        patch.diff.reload_grace_ms = 10;
        cm.apply_runtime_overlay(patch).unwrap();
        assert_eq!(cm.get().diff.reload_grace_ms, 10);
    }
}
