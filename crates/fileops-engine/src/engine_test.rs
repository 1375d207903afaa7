//! Tests for the engine facade: single-item operations, undo wiring and remote discovery.

use crate::cloud::{CloudProvider, InMemoryProvider, ProviderOp};
use crate::engine::{FileOpsEngine, validate_name};
use crate::errors::ErrorCode;
use crate::events::EngineEvent;
use crate::path_ref::PathRef;
use crate::settings::EngineSettings;
use crate::undo::UndoStatus;
use crate::write_operations::{ConflictPolicy, TransferMode};
use std::fs;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};
use tokio_util::sync::CancellationToken;

struct Fixture {
    engine: FileOpsEngine,
    provider: Arc<InMemoryProvider>,
    _events: UnboundedReceiver<EngineEvent>,
    dir: TempDir,
}

fn fixture() -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let provider = InMemoryProvider::new()
        .with_remote("gdrive", "drive")
        .with_remote("od", "onedrive");
    provider.add_file("od", "docs/report.txt", b"r");
    provider.add_file("od", "docs/notes.txt", b"n");
    provider.add_file("gdrive", "trash-me/a.txt", b"a");
    let provider = Arc::new(provider);
    let settings = EngineSettings {
        undo_dir: Some(dir.path().join("undo")),
        refresh_debounce_ms: 10,
        retry_attempts: 1,
        ..EngineSettings::default()
    };
    let (tx, events) = unbounded_channel();
    Fixture {
        engine: FileOpsEngine::new(settings, Arc::clone(&provider) as Arc<dyn CloudProvider>, Arc::new(tx)),
        provider,
        _events: events,
        dir,
    }
}

impl Fixture {
    fn local(&self, rel: &str) -> PathRef {
        PathRef::local(self.dir.path().join(rel))
    }

    fn write(&self, rel: &str, content: &str) {
        let path = self.dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }

    fn exists(&self, rel: &str) -> bool {
        fs::symlink_metadata(self.dir.path().join(rel)).is_ok()
    }
}

#[test]
fn test_validate_name() {
    assert!(validate_name("report.pdf").is_ok());
    assert!(validate_name(".env").is_ok());
    for bad in ["", "a/b", "..", ".", "nul\0"] {
        assert_eq!(validate_name(bad).unwrap_err().code, ErrorCode::Unsupported, "{bad:?}");
    }
}

#[tokio::test]
async fn test_local_rename_is_undoable() {
    let f = fixture();
    f.write("work/a.txt", "a");
    let result = f.engine.rename(&f.local("work/a.txt"), "b.txt").await.unwrap();
    assert_eq!(result.path, f.local("work/b.txt"));
    assert!(f.exists("work/b.txt") && !f.exists("work/a.txt"));

    let outcomes = f.engine.undo(&[result.undo_id.unwrap()]).await;
    assert_eq!(outcomes[0].status, UndoStatus::Applied);
    assert!(f.exists("work/a.txt") && !f.exists("work/b.txt"));
}

#[tokio::test]
async fn test_local_rename_onto_other_item_fails() {
    let f = fixture();
    f.write("work/a.txt", "a");
    f.write("work/b.txt", "b");
    let err = f.engine.rename(&f.local("work/a.txt"), "b.txt").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
    assert_eq!(fs::read_to_string(f.dir.path().join("work/b.txt")).unwrap(), "b");
    assert!(f.engine.undo_history().is_empty());
}

#[tokio::test]
async fn test_cloud_case_only_rename_on_case_insensitive_remote() {
    let f = fixture();
    let result = f
        .engine
        .rename(&PathRef::cloud("od", "docs/report.txt"), "Report.txt")
        .await
        .unwrap();
    assert_eq!(result.path, PathRef::cloud("od", "docs/Report.txt"));
    assert_eq!(result.undo_id, None);
    assert!(f.provider.exists("od", "docs/Report.txt"));
    assert!(!f.provider.exists("od", "docs/report.txt"));

    let err = f
        .engine
        .rename(&PathRef::cloud("od", "docs/Report.txt"), "NOTES.txt")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
}

#[tokio::test]
async fn test_new_local_folder_undo_refuses_once_filled() {
    let f = fixture();
    fs::create_dir_all(f.dir.path().join("work")).unwrap();
    let empty = f.engine.create_folder(&f.local("work"), "empty").await.unwrap();
    let filled = f.engine.create_folder(&f.local("work"), "filled").await.unwrap();
    f.write("work/filled/keep.txt", "k");

    let err = f.engine.create_folder(&f.local("work"), "empty").await.unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);

    let outcomes = f
        .engine
        .undo(&[empty.undo_id.unwrap(), filled.undo_id.unwrap()])
        .await;
    let statuses: Vec<_> = outcomes.iter().map(|o| o.status).collect();
    assert_eq!(statuses, vec![UndoStatus::Failed(ErrorCode::AlreadyExists), UndoStatus::Applied]);
    assert!(!f.exists("work/empty"));
    assert!(f.exists("work/filled/keep.txt"));
}

#[tokio::test]
async fn test_new_cloud_folder_checks_the_listing() {
    let f = fixture();
    let created = f.engine.create_folder(&PathRef::cloud("od", "docs"), "Archive").await.unwrap();
    assert!(f.provider.exists("od", "docs/Archive"));
    assert_eq!(created.undo_id, None);

    let err = f
        .engine
        .create_folder(&PathRef::cloud("od", "docs"), "archive")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::AlreadyExists);
    assert_eq!(f.provider.calls(ProviderOp::Mkdir), 1);
}

#[tokio::test]
async fn test_local_delete_goes_to_backup_and_undo_restores() {
    let f = fixture();
    f.write("work/a.txt", "a");
    f.write("work/sub/b.txt", "b");
    let result = f
        .engine
        .delete(&[f.local("work/a.txt"), f.local("work/sub")], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.deleted.len(), 2);
    assert_eq!(result.undo_ids.len(), 2);
    assert!(!f.exists("work/a.txt") && !f.exists("work/sub"));

    let outcomes = f.engine.undo_last().await;
    assert!(outcomes.iter().all(|o| o.status == UndoStatus::Applied));
    assert_eq!(fs::read_to_string(f.dir.path().join("work/sub/b.txt")).unwrap(), "b");
    assert!(f.exists("work/a.txt"));
}

#[tokio::test]
async fn test_delete_stops_at_first_failure() {
    let f = fixture();
    f.write("work/keep.txt", "k");
    let result = f
        .engine
        .delete(&[f.local("work/missing.txt"), f.local("work/keep.txt")], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.failed.len(), 1);
    assert_eq!(result.failed[0].1.code, ErrorCode::NotFound);
    assert_eq!(result.skipped, vec![f.local("work/keep.txt")]);
    assert!(f.exists("work/keep.txt"));
}

#[tokio::test]
async fn test_cloud_delete_is_permanent() {
    let f = fixture();
    let result = f
        .engine
        .delete(&[PathRef::cloud("gdrive", "trash-me")], &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.deleted, vec![PathRef::cloud("gdrive", "trash-me")]);
    assert!(result.undo_ids.is_empty());
    assert!(!f.provider.exists("gdrive", "trash-me/a.txt"));
}

#[tokio::test]
async fn test_mixed_delete_is_rejected() {
    let f = fixture();
    f.write("work/a.txt", "a");
    let err = f
        .engine
        .delete(&[f.local("work/a.txt"), PathRef::cloud("gdrive", "trash-me")], &CancellationToken::new())
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::Unsupported);
    assert!(f.exists("work/a.txt"));
}

#[tokio::test]
async fn test_write_invalidates_cached_listing() {
    let f = fixture();
    let token = CancellationToken::new();
    let folder = PathRef::cloud("od", "docs");
    assert_eq!(f.engine.list_folder(&folder, &token).await.unwrap().entries.len(), 2);
    f.engine.create_folder(&folder, "New").await.unwrap();
    let listing = f.engine.list_folder(&folder, &token).await.unwrap();
    assert!(listing.entries.iter().any(|e| e.name == "New"));
}

#[tokio::test]
async fn test_refresh_network_forgets_discovery() {
    let f = fixture();
    let token = CancellationToken::new();
    let remotes = f.engine.list_remotes(&token).await.unwrap();
    assert_eq!(remotes.len(), 2);
    f.engine.list_remotes(&token).await.unwrap();
    assert_eq!(f.provider.calls(ProviderOp::ListRemotes), 1);

    f.engine.refresh_network();
    f.engine.list_remotes(&token).await.unwrap();
    assert_eq!(f.provider.calls(ProviderOp::ListRemotes), 2);
}

#[tokio::test]
async fn test_planned_transfer_uses_default_policy_and_undoes() {
    let f = fixture();
    f.write("src/a.txt", "new");
    f.write("dst/a.txt", "old");
    let token = CancellationToken::new();
    let plan = f
        .engine
        .plan_transfer(&[f.local("src/a.txt")], &f.local("dst"), TransferMode::Copy, None, &token)
        .await
        .unwrap();
    assert_eq!(plan.policy, ConflictPolicy::Rename);
    assert_eq!(plan.items[0].proposed_target, f.local("dst/a-1.txt"));

    let result = f.engine.execute_transfer(plan, &token).await.unwrap();
    assert!(result.is_complete_success());
    assert!(f.exists("dst/a-1.txt"));

    f.engine.undo_last().await;
    assert!(!f.exists("dst/a-1.txt"));
    assert_eq!(fs::read_to_string(f.dir.path().join("dst/a.txt")).unwrap(), "old");
}

#[tokio::test]
async fn test_search_through_engine() {
    let f = fixture();
    let result = f
        .engine
        .search("filename:*.txt", &PathRef::cloud("od", ""), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(result.matches.len(), 2);
}
