//! Tests for the in-memory provider itself, so other tests can trust its counters.

use super::*;
use crate::errors::{ErrorCode, classify};

fn provider() -> InMemoryProvider {
    let p = InMemoryProvider::new().with_remote("gdrive", "drive");
    p.add_file("gdrive", "docs/a.txt", b"hello");
    p.add_dir("gdrive", "docs/empty");
    p
}

#[tokio::test]
async fn test_list_returns_direct_children_only() {
    let p = provider();
    p.add_file("gdrive", "docs/deep/b.txt", b"x");
    let mut names: Vec<_> = p.list("gdrive", "docs").await.unwrap().into_iter().map(|e| e.name).collect();
    names.sort();
    assert_eq!(names, vec!["a.txt", "deep", "empty"]);
    assert_eq!(p.calls(ProviderOp::List), 1);
    assert_eq!(p.calls_for(ProviderOp::List, "gdrive:docs"), 1);
}

#[tokio::test]
async fn test_list_missing_folder_is_not_found() {
    let p = provider();
    let err = p.list("gdrive", "nope").await.unwrap_err();
    assert_eq!(classify(&err), ErrorCode::NotFound);
}

#[tokio::test]
async fn test_injected_failure_is_consumed() {
    let p = provider();
    p.fail_next(ProviderOp::Stat, 1, InjectedFailure::TimedOut);
    assert!(matches!(p.stat("gdrive", "docs/a.txt").await, Err(NativeError::TimedOut)));
    assert!(p.stat("gdrive", "docs/a.txt").await.is_ok());
    assert_eq!(p.calls(ProviderOp::Stat), 2);
}

#[tokio::test]
async fn test_path_scoped_failure_only_hits_matching_path() {
    let p = provider();
    p.add_file("gdrive", "docs/b.txt", b"b");
    p.fail_path(ProviderOp::Copy, "b.txt", 1, InjectedFailure::stderr("permission denied"));
    let a = PathRef::cloud("gdrive", "docs/a.txt");
    let b = PathRef::cloud("gdrive", "docs/b.txt");
    assert!(p.copy(&a, &PathRef::cloud("gdrive", "a2.txt"), false).await.is_ok());
    assert!(p.copy(&b, &PathRef::cloud("gdrive", "b2.txt"), false).await.is_err());
}

#[tokio::test]
async fn test_move_folder_within_remote() {
    let p = provider();
    let src = PathRef::cloud("gdrive", "docs");
    let dst = PathRef::cloud("gdrive", "archive/docs");
    p.move_item(&src, &dst, true).await.unwrap();
    assert!(!p.exists("gdrive", "docs"));
    assert_eq!(p.read_file("gdrive", "archive/docs/a.txt").as_deref(), Some(&b"hello"[..]));
    assert!(p.exists("gdrive", "archive/docs/empty"));
}

#[tokio::test]
async fn test_upload_and_download_touch_local_disk() {
    let p = provider();
    let dir = tempfile::tempdir().unwrap();
    let local = dir.path().join("up.txt");
    std::fs::write(&local, b"upload me").unwrap();

    p.copy(&PathRef::local(&local), &PathRef::cloud("gdrive", "up.txt"), false)
        .await
        .unwrap();
    assert_eq!(p.read_file("gdrive", "up.txt").as_deref(), Some(&b"upload me"[..]));

    let down = dir.path().join("down");
    p.copy(&PathRef::cloud("gdrive", "docs"), &PathRef::local(&down), true)
        .await
        .unwrap();
    assert_eq!(std::fs::read(down.join("a.txt")).unwrap(), b"hello");
    assert!(down.join("empty").is_dir());
}

#[tokio::test]
async fn test_folder_transfer_can_be_disabled() {
    let p = provider();
    p.set_folder_transfer(false);
    assert!(!p.supports_folder_transfer());
    let err = p
        .copy(&PathRef::cloud("gdrive", "docs"), &PathRef::cloud("gdrive", "x"), true)
        .await
        .unwrap_err();
    assert_eq!(classify(&err), ErrorCode::Unsupported);
}

#[tokio::test]
async fn test_list_remotes_reports_kinds() {
    let p = provider().with_remote("od", "onedrive");
    let remotes = p.list_remotes().await.unwrap();
    assert_eq!(
        remotes,
        vec![
            RemoteInfo {
                name: "gdrive".to_string(),
                kind: "drive".to_string()
            },
            RemoteInfo {
                name: "od".to_string(),
                kind: "onedrive".to_string()
            },
        ]
    );
}

#[tokio::test]
async fn test_rmdir_only_removes_empty_folders() {
    let p = provider();
    let err = p.rmdir("gdrive", "docs").await.unwrap_err();
    assert_eq!(classify(&err), ErrorCode::AlreadyExists);
    assert!(p.exists("gdrive", "docs/a.txt"));

    p.rmdir("gdrive", "docs/empty").await.unwrap();
    assert!(!p.exists("gdrive", "docs/empty"));
    assert_eq!(p.calls(ProviderOp::Rmdir), 2);
}
