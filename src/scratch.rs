// bridge/src/scratch.rs

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;

use crate::error::{BridgeError, Result};

const DIR_PREFIX: &str = "bridge-diff-";

/// Collision-resistant scratch location for content that must exist as a
/// real file (the write-to-disk fallback strategy for comparisons).
/// Cleanup is advisory: the session directory is transient and not meant to
/// survive or be inspected after a session ends.
#[derive(Clone, Debug)]
pub struct ScratchWorkspace {
    primary: PathBuf,
    fallback: PathBuf,
}

/// Reduce a random token to a filesystem-safe character set.
fn sanitize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

/// Strip any directory components from a caller-supplied filename.
fn sanitize_filename(name: &str) -> &str {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("scratch")
}

impl ScratchWorkspace {
    pub fn new(primary_override: Option<PathBuf>) -> Self {
        let primary = primary_override.unwrap_or_else(std::env::temp_dir);
        let fallback = directories::ProjectDirs::from("dev", "earthlings", "editor-bridge")
            .map(|p| p.cache_dir().to_path_buf())
            .unwrap_or_else(std::env::temp_dir);
        Self { primary, fallback }
    }

    /// Write `content` into `filename` under a fresh per-session directory
    /// and return the file's path. Tries the primary base directory first,
    /// the fallback once, then fails with a descriptive error.
    pub async fn create_temp_file(&self, content: &str, filename: &str) -> Result<PathBuf> {
        let token = sanitize_token(&uuid::Uuid::new_v4().simple().to_string());
        let filename = sanitize_filename(filename);

        let mut last_err = None;
        for base in [&self.primary, &self.fallback] {
            let dir = base.join(format!("{DIR_PREFIX}{token}"));
            match fs::create_dir_all(&dir).await {
                Ok(()) => {
                    let path = dir.join(filename);
                    match fs::write(&path, content).await {
                        Ok(()) => return Ok(path),
                        Err(e) => {
                            last_err = Some(format!("write {}: {e}", path.display()));
                        }
                    }
                }
                Err(e) => {
                    last_err = Some(format!("mkdir {}: {e}", dir.display()));
                }
            }
        }
        Err(BridgeError::scratch(format!(
            "no writable scratch location: {}",
            last_err.unwrap_or_else(|| "unknown".into())
        )))
    }

    /// Best-effort removal of a scratch file and its session directory.
    /// Failures are logged and swallowed.
    pub async fn cleanup_temp_file(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path).await {
            debug!(path = %path.display(), error = %e, "scratch file removal failed");
        }
        let Some(dir) = path.parent() else { return };
        let ours = dir
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(DIR_PREFIX));
        if !ours {
            return;
        }
        if let Err(e) = fs::remove_dir(dir).await {
            debug!(dir = %dir.display(), error = %e, "scratch dir removal failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_filesystem_safe() {
        assert_eq!(sanitize_token("ab/../cd:ef"), "abcdef");
        assert_eq!(sanitize_token("a-b_c9"), "a-b_c9");
    }

    #[test]
    fn filenames_lose_directory_components() {
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("plain.rs"), "plain.rs");
        assert_eq!(sanitize_filename(""), "scratch");
    }

    #[tokio::test]
    async fn create_and_cleanup_round_trip() {
        let base = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::new(Some(base.path().to_path_buf()));
        let path = ws.create_temp_file("proposed text", "lib.rs").await.unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "proposed text");
        assert!(path.parent().unwrap().starts_with(base.path()));

        ws.cleanup_temp_file(&path).await;
        assert!(!path.exists());
        assert!(!path.parent().unwrap().exists());
    }

    #[tokio::test]
    async fn distinct_sessions_never_collide() {
        let base = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace::new(Some(base.path().to_path_buf()));
        let a = ws.create_temp_file("a", "f.txt").await.unwrap();
        let b = ws.create_temp_file("b", "f.txt").await.unwrap();
        assert_ne!(a.parent(), b.parent());
    }

    #[tokio::test]
    async fn unwritable_primary_falls_back() {
        // a primary rooted under a regular file cannot host directories
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let primary = blocker.path().join("sub");
        let fallback_dir = tempfile::tempdir().unwrap();
        let ws = ScratchWorkspace {
            primary,
            fallback: fallback_dir.path().to_path_buf(),
        };
        let path = ws.create_temp_file("x", "f.txt").await.unwrap();
        assert!(path.starts_with(fallback_dir.path()));
    }
}
