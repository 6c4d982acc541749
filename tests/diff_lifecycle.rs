// End-to-end coverage of the diff review subsystem against the in-memory
// editor: resolution outcomes, supersession, teardown, and the deferred
// accept finalizer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use editor_bridge::config::{Config, ConfigManager};
use editor_bridge::diff::{DiffEngine, OpenDiffParams, SessionStatus};
use editor_bridge::editor::{BufferId, EditorSurface};
use editor_bridge::protocol::{DIFF_REJECTED, FILE_SAVED};
use editor_bridge::shim::ShimEditor;

const GRACE_MS: u64 = 20;

fn engine_with_shim(grace_ms: u64) -> (DiffEngine, Arc<ShimEditor>) {
    let editor = Arc::new(ShimEditor::new());
    let mut config = Config::default();
    config.diff.reload_grace_ms = grace_ms;
    let cfg = Arc::new(ConfigManager::ephemeral(config));
    let engine = DiffEngine::new(editor.clone() as Arc<dyn EditorSurface>, cfg);
    (engine, editor)
}

fn params(old: &Path, contents: &str, tab: &str) -> OpenDiffParams {
    OpenDiffParams {
        old_file_path: old.to_path_buf(),
        new_file_path: old.to_path_buf(),
        new_file_contents: contents.to_string(),
        tab_name: tab.to_string(),
    }
}

async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..400 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

async fn open_session(
    engine: &DiffEngine,
    p: OpenDiffParams,
) -> (tokio::task::JoinHandle<editor_bridge::Result<editor_bridge::ToolResult>>, BufferId) {
    let tab = p.tab_name.clone();
    let eng = engine.clone();
    let handle = tokio::spawn(async move { eng.open_diff(p).await });
    let reg = engine.registry().clone();
    let wait_tab = tab.clone();
    wait_until(move || reg.contains(&wait_tab)).await;
    let proposed = engine.registry().with_session(&tab, |s| s.proposed_buffer);
    (handle, proposed.expect("session registered"))
}

#[tokio::test]
async fn accept_returns_file_saved_and_clears_registry() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "line1\nline2").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (handle, proposed) = open_session(&engine, params(&old, "line1\nCHANGED", "t1")).await;

    // the comparison is on screen: two windows, both in diff mode
    assert_eq!(editor.window_count(), 2);

    editor.save_buffer(proposed).await.unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), FILE_SAVED);
    assert_eq!(result.content[1].as_text(), "line1\nCHANGED");

    let reg = engine.registry().clone();
    wait_until(move || !reg.contains("t1")).await;
    // layout restored, proposed buffer gone
    assert_eq!(editor.window_count(), 1);
    assert!(!editor.buffer_exists(proposed));
}

#[tokio::test]
async fn wipe_returns_diff_rejected_and_removes_immediately() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "line1\nline2").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (handle, proposed) = open_session(&engine, params(&old, "line1\nCHANGED", "t1")).await;

    // user abandons the review by deleting the proposed buffer; the shim
    // fans this out as delete + unload + wipe and only the first resolves
    editor.delete_buffer(proposed, true).await.unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), DIFF_REJECTED);
    assert_eq!(result.content[1].as_text(), "t1");

    let reg = engine.registry().clone();
    wait_until(move || !reg.contains("t1")).await;
    assert_eq!(editor.subscription_count(), 0);
    assert_eq!(editor.window_count(), 1);
}

#[tokio::test]
async fn supersession_rejects_the_incumbent_first() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "v0").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (first, _) = open_session(&engine, params(&old, "v1", "t1")).await;

    let eng = engine.clone();
    let second = tokio::spawn(async move { eng.open_diff(params(&old, "v2", "t1")).await });

    // the incumbent's caller gets DIFF_REJECTED before the successor is up
    let first_result = first.await.unwrap().unwrap();
    assert_eq!(first_result.content[0].as_text(), DIFF_REJECTED);

    let reg = engine.registry().clone();
    wait_until(move || reg.status("t1") == Some(SessionStatus::Pending)).await;

    let proposed = engine
        .registry()
        .with_session("t1", |s| {
            assert_eq!(s.new_file_contents, "v2");
            s.proposed_buffer
        })
        .unwrap();
    editor.save_buffer(proposed).await.unwrap();
    let second_result = second.await.unwrap().unwrap();
    assert_eq!(second_result.content[0].as_text(), FILE_SAVED);
    assert_eq!(second_result.content[1].as_text(), "v2");
}

#[tokio::test]
async fn new_file_acceptance_creates_the_file_with_parents() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("deep").join("nested").join("new.rs");

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (handle, proposed) = open_session(&engine, params(&old, "fn main() {}\n", "t1")).await;

    let is_new = engine.registry().with_session("t1", |s| s.is_new_file).unwrap();
    assert!(is_new);
    // original pane holds an empty placeholder, not a file buffer
    let original = engine.registry().with_session("t1", |s| s.original_buffer).unwrap();
    let lines = editor.buffer_lines(original).await.unwrap();
    assert_eq!(lines, vec![String::new()]);

    editor.save_buffer(proposed).await.unwrap();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), FILE_SAVED);
    assert_eq!(result.content[1].as_text(), "fn main() {}\n");

    let old_path = old.clone();
    wait_until(move || old_path.exists()).await;
    assert_eq!(
        tokio::fs::read_to_string(&old).await.unwrap(),
        "fn main() {}\n"
    );
    let reg = engine.registry().clone();
    wait_until(move || reg.is_empty()).await;
}

#[tokio::test]
async fn accept_round_trips_user_edits_and_trailing_newline() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "x\n").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (handle, proposed) = open_session(&engine, params(&old, "line1\nCHANGED\n", "t1")).await;

    // the user hand-edits the proposed pane before accepting
    editor
        .edit_buffer(proposed, vec!["line1".into(), "EDITED".into()])
        .unwrap();
    editor.save_buffer(proposed).await.unwrap();

    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[1].as_text(), "line1\nEDITED\n");
}

#[tokio::test]
async fn duplicate_events_after_save_are_no_ops() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "x").await.unwrap();

    // long grace so the saved session is still registered when the storm hits
    let (engine, editor) = engine_with_shim(5_000);
    let (handle, proposed) = open_session(&engine, params(&old, "y", "t1")).await;

    editor.save_buffer(proposed).await.unwrap();
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), FILE_SAVED);
    assert_eq!(engine.registry().status("t1"), Some(SessionStatus::Saved));

    // a racing wipe right after the save resolves nothing a second time
    assert!(!engine.resolve_as_rejected("t1").await);
    assert!(!engine.resolve_as_saved("t1", proposed).await);
    assert_eq!(engine.registry().status("t1"), Some(SessionStatus::Saved));

    // explicit close finalizes the deferred reload without waiting
    assert!(engine.close_by_tab_name("t1").await);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn close_by_tab_name_rejects_pending_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "x").await.unwrap();

    let (engine, _editor) = engine_with_shim(GRACE_MS);
    let (handle, _) = open_session(&engine, params(&old, "y", "t1")).await;

    assert!(engine.close_by_tab_name("t1").await);
    let result = handle.await.unwrap().unwrap();
    assert_eq!(result.content[0].as_text(), DIFF_REJECTED);
    assert!(engine.registry().is_empty());

    // closing again is a reported no-op
    assert!(!engine.close_by_tab_name("t1").await);
}

#[tokio::test]
async fn explicit_close_reloads_accepted_content_into_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "before").await.unwrap();

    let (engine, editor) = engine_with_shim(60_000);
    let (handle, proposed) = open_session(&engine, params(&old, "after", "t1")).await;

    editor.save_buffer(proposed).await.unwrap();
    handle.await.unwrap().unwrap();

    // the assistant persists the accepted content during the grace period
    tokio::fs::write(&old, "after").await.unwrap();
    assert!(engine.close_by_tab_name("t1").await);

    let buf = editor.find_buffer_by_path(&old).await.unwrap();
    assert_eq!(editor.buffer_lines(buf.id).await.unwrap(), vec!["after".to_string()]);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn shutdown_rejects_every_pending_session() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    tokio::fs::write(&a, "x").await.unwrap();
    tokio::fs::write(&b, "x").await.unwrap();

    let (engine, _editor) = engine_with_shim(GRACE_MS);
    let (h1, _) = open_session(&engine, params(&a, "y", "ta")).await;
    let eng = engine.clone();
    let p = params(&b, "z", "tb");
    let h2 = tokio::spawn(async move { eng.open_diff(p).await });
    let reg = engine.registry().clone();
    wait_until(move || reg.len() == 2).await;

    engine.shutdown().await;

    for handle in [h1, h2] {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.content[0].as_text(), DIFF_REJECTED);
    }
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn concurrent_sessions_under_different_tabs_are_independent() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.txt");
    let b = dir.path().join("b.txt");
    tokio::fs::write(&a, "a0").await.unwrap();
    tokio::fs::write(&b, "b0").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    let (ha, _) = open_session(&engine, params(&a, "a1", "ta")).await;
    let eng = engine.clone();
    let p = params(&b, "b1", "tb");
    let hb = tokio::spawn(async move { eng.open_diff(p).await });
    let reg = engine.registry().clone();
    wait_until(move || reg.len() == 2).await;

    let proposed_b = engine.registry().with_session("tb", |s| s.proposed_buffer).unwrap();
    editor.save_buffer(proposed_b).await.unwrap();
    let rb = hb.await.unwrap().unwrap();
    assert_eq!(rb.content[0].as_text(), FILE_SAVED);
    assert_eq!(rb.content[1].as_text(), "b1");

    // session ta is untouched by tb's resolution
    assert_eq!(engine.registry().status("ta"), Some(SessionStatus::Pending));
    let proposed_a = engine.registry().with_session("ta", |s| s.proposed_buffer).unwrap();
    editor.delete_buffer(proposed_a, true).await.unwrap();
    let ra = ha.await.unwrap().unwrap();
    assert_eq!(ra.content[0].as_text(), DIFF_REJECTED);
    assert_eq!(ra.content[1].as_text(), "ta");
}

#[tokio::test]
async fn empty_tab_name_fails_before_touching_the_editor() {
    let (engine, editor) = engine_with_shim(GRACE_MS);
    let err = engine
        .open_diff(OpenDiffParams {
            old_file_path: PathBuf::from("/tmp/x"),
            new_file_path: PathBuf::from("/tmp/x"),
            new_file_contents: "y".into(),
            tab_name: String::new(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), editor_bridge::error::INVALID_PARAMS);
    assert_eq!(editor.window_count(), 1);
    assert!(engine.registry().is_empty());
}

#[tokio::test]
async fn comparison_never_lands_in_an_unsuitable_window() {
    let dir = tempfile::tempdir().unwrap();
    let old = dir.path().join("a.txt");
    tokio::fs::write(&old, "x").await.unwrap();

    let (engine, editor) = engine_with_shim(GRACE_MS);
    // add a floating window to the layout; setup must ignore it
    let some_buffer = editor.list_buffers().await[0].id;
    let float = editor.open_floating_window(some_buffer);

    let (handle, _) = open_session(&engine, params(&old, "y", "t1")).await;
    let (target, proposed_win) = engine.registry().with_session("t1", |s| s.windows).unwrap();
    assert_ne!(target, float);
    assert_ne!(proposed_win, float);
    assert_eq!(editor.diff_mode(float), Some(false));

    engine.close_by_tab_name("t1").await;
    handle.await.unwrap().unwrap();
}
