// bridge/src/lockfile.rs
//
// Discovery lockfile. Assistant processes find running bridges by scanning
// `<data dir>/ide/` for `<port>.json` files carrying the auth token and
// workspace folders. One file per running server; removed on shutdown.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockInfo {
    pub pid: u32,
    pub workspace_folders: Vec<PathBuf>,
    pub ide_name: String,
    pub transport: String,
    pub auth_token: String,
    pub started_at: String,
}

impl LockInfo {
    pub fn new(workspace_folders: Vec<PathBuf>, auth_token: String) -> Self {
        Self {
            pid: std::process::id(),
            workspace_folders,
            ide_name: "editor-bridge".into(),
            transport: "ws".into(),
            auth_token,
            started_at: chrono::Utc::now().to_rfc3339(),
        }
    }
}

pub fn default_lock_dir() -> Result<PathBuf> {
    let proj = directories::ProjectDirs::from("dev", "earthlings", "editor-bridge")
        .context("ProjectDirs not available")?;
    Ok(proj.data_dir().join("ide"))
}

/// A written lockfile; removing it is best-effort and also happens on drop.
#[derive(Debug)]
pub struct Lockfile {
    path: PathBuf,
}

impl Lockfile {
    /// Write `<dir>/<port>.json`, replacing any stale file a crashed
    /// instance left behind.
    pub fn write(dir: Option<&Path>, port: u16, info: &LockInfo) -> Result<Self> {
        let dir = match dir {
            Some(d) => d.to_path_buf(),
            None => default_lock_dir()?,
        };
        fs::create_dir_all(&dir).with_context(|| format!("mkdir {}", dir.display()))?;
        let path = dir.join(format!("{port}.json"));
        let text = serde_json::to_string_pretty(info)?;
        fs::write(&path, text).with_context(|| format!("write {}", path.display()))?;
        Ok(Self { path })
    }

    pub fn read(dir: &Path, port: u16) -> Result<LockInfo> {
        let path = dir.join(format!("{port}.json"));
        let text = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remove(&self) {
        if let Err(e) = fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "lockfile removal failed");
        }
    }
}

impl Drop for Lockfile {
    fn drop(&mut self) {
        self.remove();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_read_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let info = LockInfo::new(vec![PathBuf::from("/w")], "token-123".into());
        let lock = Lockfile::write(Some(dir.path()), 10123, &info).unwrap();
        assert!(lock.path().exists());

        let read = Lockfile::read(dir.path(), 10123).unwrap();
        assert_eq!(read.auth_token, "token-123");
        assert_eq!(read.workspace_folders, vec![PathBuf::from("/w")]);
        assert_eq!(read.transport, "ws");

        let path = lock.path().to_path_buf();
        drop(lock);
        assert!(!path.exists());
    }

    #[test]
    fn write_replaces_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let stale = LockInfo::new(vec![], "stale".into());
        let first = Lockfile::write(Some(dir.path()), 10200, &stale).unwrap();
        // keep the first handle alive so its drop doesn't race the check
        let fresh = LockInfo::new(vec![], "fresh".into());
        let _second = Lockfile::write(Some(dir.path()), 10200, &fresh).unwrap();
        assert_eq!(Lockfile::read(dir.path(), 10200).unwrap().auth_token, "fresh");
        std::mem::forget(first);
    }
}
