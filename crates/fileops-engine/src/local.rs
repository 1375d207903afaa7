//! Blocking local filesystem primitives.
//!
//! Everything here runs inside `spawn_blocking`. Paths are never followed through symlinks:
//! links are copied as links, removed as links, and checked with `symlink_metadata`.

use crate::entry::{Entry, EntryKind, is_hidden_name};
use crate::errors::{EngineError, ErrorCode};
use crate::path_ref::PathRef;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use uuid::Uuid;
use walkdir::WalkDir;

// ============================================================================
// Listing
// ============================================================================

/// Runs blocking filesystem work on tokio's blocking pool.
pub async fn run_blocking<T, F>(task: &'static str, work: F) -> Result<T, EngineError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, EngineError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| EngineError::new(ErrorCode::Unknown, format!("{task} task failed: {e}")))?
}

/// Lists a folder, directories first, then by case-insensitive name.
pub fn read_folder(path: &Path, include_hidden: bool) -> Result<Vec<Entry>, EngineError> {
    let start = std::time::Instant::now();
    let reader = fs::read_dir(path).map_err(|e| EngineError::from_io(&e, path.display()))?;
    let mut entries = Vec::new();
    for dir_entry in reader {
        let dir_entry = dir_entry.map_err(|e| EngineError::from_io(&e, path.display()))?;
        let name = dir_entry.file_name().to_string_lossy().into_owned();
        if !include_hidden && is_hidden_name(&name) {
            continue;
        }
        let child = dir_entry.path();
        match fs::symlink_metadata(&child) {
            Ok(metadata) => entries.push(Entry::from_local(&child, &metadata)),
            Err(e) => {
                // Vanished or unreadable between readdir and stat: keep a minimal row
                debug!("read_folder: stat failed for {}: {}", child.display(), e);
                entries.push(Entry {
                    hidden: is_hidden_name(&name),
                    name,
                    path: PathRef::Local(child),
                    kind: EntryKind::File,
                    size: None,
                    modified: None,
                    read_only: false,
                    trash_id: None,
                });
            }
        }
    }
    sort_entries(&mut entries);
    debug!(
        "read_folder: path={}, entries={}, total={}ms",
        path.display(),
        entries.len(),
        start.elapsed().as_millis()
    );
    Ok(entries)
}

pub fn sort_entries(entries: &mut [Entry]) {
    entries.sort_by(|a, b| {
        b.is_dir()
            .cmp(&a.is_dir())
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
            .then_with(|| a.name.cmp(&b.name))
    });
}

/// Metadata for one path, without following a final symlink.
pub fn stat(path: &Path) -> Result<Entry, EngineError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| EngineError::from_io(&e, path.display()))?;
    Ok(Entry::from_local(path, &metadata))
}

pub fn exists_no_follow(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn ensure_absent(path: &Path) -> Result<(), EngineError> {
    if exists_no_follow(path) {
        return Err(EngineError::already_exists(path.display()));
    }
    Ok(())
}

/// True if `destination` is `source` or lies inside it.
pub fn is_inside(destination: &Path, source: &Path) -> bool {
    destination.starts_with(source)
}

// ============================================================================
// Copy, move, remove
// ============================================================================

/// Copies a file, folder tree or symlink to `dst`, which must not exist yet.
pub fn copy_recursive(src: &Path, dst: &Path) -> Result<(), EngineError> {
    let metadata = fs::symlink_metadata(src).map_err(|e| EngineError::from_io(&e, src.display()))?;
    if metadata.is_dir() && is_inside(dst, src) {
        return Err(EngineError::unsupported("Can't copy a folder into itself").with_path(dst.display()));
    }
    ensure_absent(dst)?;

    for item in WalkDir::new(src).follow_links(false).sort_by_file_name() {
        let item = item.map_err(|e| {
            let path = e.path().map(|p| p.display().to_string()).unwrap_or_default();
            match e.into_io_error() {
                Some(io) => EngineError::from_io(&io, &path),
                None => EngineError::new(ErrorCode::Io, "Filesystem loop while copying").with_path(&path),
            }
        })?;
        let rel = item.path().strip_prefix(src).unwrap_or(Path::new(""));
        let target = if rel.as_os_str().is_empty() { dst.to_path_buf() } else { dst.join(rel) };
        let file_type = item.file_type();
        if file_type.is_symlink() {
            copy_symlink(item.path(), &target)?;
        } else if file_type.is_dir() {
            fs::create_dir(&target).map_err(|e| EngineError::from_io(&e, target.display()))?;
        } else {
            copy_file(item.path(), &target)?;
        }
    }
    Ok(())
}

/// Copies file contents and keeps the modification time.
fn copy_file(src: &Path, dst: &Path) -> Result<(), EngineError> {
    fs::copy(src, dst).map_err(|e| EngineError::from_io(&e, src.display()))?;
    if let Ok(metadata) = fs::metadata(src) {
        let mtime = filetime::FileTime::from_last_modification_time(&metadata);
        let atime = filetime::FileTime::from_last_access_time(&metadata);
        if let Err(e) = filetime::set_file_times(dst, atime, mtime) {
            warn!("copy_file: couldn't preserve times on {}: {}", dst.display(), e);
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, dst: &Path) -> Result<(), EngineError> {
    let target = fs::read_link(src).map_err(|e| EngineError::from_io(&e, src.display()))?;
    std::os::unix::fs::symlink(&target, dst).map_err(|e| EngineError::from_io(&e, dst.display()))
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, _dst: &Path) -> Result<(), EngineError> {
    Err(EngineError::unsupported("Copying symlinks isn't supported on this platform").with_path(src.display()))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    Renamed,
    /// The rename crossed filesystems, so the item was copied and the source removed.
    CopiedAndRemoved,
}

/// Moves `src` to `dst`, which must not exist. Falls back to copy + remove across devices.
pub fn move_path(src: &Path, dst: &Path) -> Result<MoveOutcome, EngineError> {
    if !exists_no_follow(src) {
        return Err(EngineError::not_found(src.display()));
    }
    ensure_absent(dst)?;
    match fs::rename(src, dst) {
        Ok(()) => Ok(MoveOutcome::Renamed),
        Err(e) => {
            let err = EngineError::from_io(&e, src.display());
            if err.code != ErrorCode::CrossDevice {
                return Err(err);
            }
            debug!(
                "move_path: {} -> {} crosses devices, copying instead",
                src.display(),
                dst.display()
            );
            copy_recursive(src, dst)?;
            remove_no_follow(src)?;
            Ok(MoveOutcome::CopiedAndRemoved)
        }
    }
}

/// Renames in place. Unlike [`move_path`] this allows a case-only rename where the
/// filesystem reports the new name as already existing (it's the same file).
pub fn rename_in_place(src: &Path, dst: &Path) -> Result<(), EngineError> {
    if !exists_no_follow(src) {
        return Err(EngineError::not_found(src.display()));
    }
    if exists_no_follow(dst) && !same_file(src, dst) {
        return Err(EngineError::already_exists(dst.display()));
    }
    fs::rename(src, dst).map_err(|e| EngineError::from_io(&e, src.display()))
}

#[cfg(unix)]
fn same_file(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::symlink_metadata(a), fs::symlink_metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(ca), Ok(cb)) => ca == cb,
        _ => false,
    }
}

/// Removes a file, symlink or whole folder. A symlink to a folder removes only the link.
pub fn remove_no_follow(path: &Path) -> Result<(), EngineError> {
    let metadata = fs::symlink_metadata(path).map_err(|e| EngineError::from_io(&e, path.display()))?;
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| EngineError::from_io(&e, path.display()))
}

/// Moves `path` into a fresh subfolder of `backup_dir` and returns where it landed.
pub fn move_to_backup(path: &Path, backup_dir: &Path) -> Result<PathBuf, EngineError> {
    let name = path
        .file_name()
        .ok_or_else(|| EngineError::unsupported("Can't back up a root folder").with_path(path.display()))?;
    let slot = backup_dir.join(Uuid::new_v4().to_string());
    fs::create_dir_all(&slot).map_err(|e| EngineError::from_io(&e, slot.display()))?;
    let backup = slot.join(name);
    if let Err(e) = move_path(path, &backup) {
        let _ = fs::remove_dir(&slot);
        return Err(e);
    }
    debug!("move_to_backup: {} -> {}", path.display(), backup.display());
    Ok(backup)
}

/// Deletes a backup and its per-backup folder. Best effort.
pub fn discard_backup(backup: &Path) {
    if let Err(e) = remove_no_follow(backup) {
        warn!("discard_backup: couldn't remove {}: {}", backup.display(), e);
        return;
    }
    if let Some(slot) = backup.parent() {
        let _ = fs::remove_dir(slot);
    }
}

// ============================================================================
// Fingerprints
// ============================================================================

/// Identity of a path at one point in time, used to refuse undoing onto something that was
/// replaced in the meantime (including a symlink swapped in for a folder).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    pub is_symlink: bool,
    pub is_dir: bool,
    pub dev: u64,
    pub ino: u64,
    /// Canonical path of the containing folder.
    pub parent: Option<PathBuf>,
}

impl Fingerprint {
    pub fn capture(path: &Path) -> Result<Self, EngineError> {
        let metadata = fs::symlink_metadata(path).map_err(|e| EngineError::from_io(&e, path.display()))?;
        let (dev, ino) = dev_ino(&metadata);
        Ok(Self {
            is_symlink: metadata.file_type().is_symlink(),
            is_dir: metadata.is_dir(),
            dev,
            ino,
            parent: path.parent().and_then(|p| p.canonicalize().ok()),
        })
    }

    /// Fails with `NotFound` if the path is gone and `Unsupported` if it's a different item now.
    pub fn verify(&self, path: &Path) -> Result<(), EngineError> {
        let current = Self::capture(path)?;
        if current != *self {
            return Err(EngineError::new(
                ErrorCode::Unsupported,
                "Item was replaced or redirected since the operation ran",
            )
            .with_path(path.display()));
        }
        Ok(())
    }
}

#[cfg(unix)]
fn dev_ino(metadata: &fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (metadata.dev(), metadata.ino())
}

#[cfg(not(unix))]
fn dev_ino(_metadata: &fs::Metadata) -> (u64, u64) {
    (0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn test_read_folder_sorts_and_filters_hidden() {
        let dir = tempfile::tempdir().unwrap();
        write(&dir.path().join("b.txt"), "b");
        write(&dir.path().join("A.txt"), "a");
        write(&dir.path().join(".hidden"), "h");
        fs::create_dir(dir.path().join("zdir")).unwrap();

        let names: Vec<_> = read_folder(dir.path(), false).unwrap().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["zdir", "A.txt", "b.txt"]);
        assert_eq!(read_folder(dir.path(), true).unwrap().len(), 4);
    }

    #[test]
    fn test_read_missing_folder_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = read_folder(&dir.path().join("nope"), true).unwrap_err();
        assert_eq!(err.code, ErrorCode::NotFound);
    }

    #[test]
    fn test_copy_recursive_copies_tree() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a.txt"), "a");
        write(&src.join("sub/b.txt"), "b");
        let dst = dir.path().join("dst");
        copy_recursive(&src, &dst).unwrap();
        assert_eq!(fs::read_to_string(dst.join("sub/b.txt")).unwrap(), "b");
        assert!(src.join("a.txt").exists());
    }

    #[test]
    fn test_copy_refuses_existing_target_and_self_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("a.txt"), "a");
        let err = copy_recursive(&src, &src.join("inner")).unwrap_err();
        assert_eq!(err.code, ErrorCode::Unsupported);

        let dst = dir.path().join("dst.txt");
        write(&dst, "x");
        let err = copy_recursive(&src.join("a.txt"), &dst).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
    }

    #[cfg(unix)]
    #[test]
    fn test_copy_keeps_symlinks_as_links() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("src");
        write(&src.join("real.txt"), "r");
        std::os::unix::fs::symlink("real.txt", src.join("link")).unwrap();
        let dst = dir.path().join("dst");
        copy_recursive(&src, &dst).unwrap();
        let meta = fs::symlink_metadata(dst.join("link")).unwrap();
        assert!(meta.file_type().is_symlink());
        assert_eq!(fs::read_link(dst.join("link")).unwrap(), PathBuf::from("real.txt"));
    }

    #[test]
    fn test_move_path_and_existing_target() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        write(&src, "a");
        let dst = dir.path().join("b.txt");
        assert_eq!(move_path(&src, &dst).unwrap(), MoveOutcome::Renamed);
        assert!(!src.exists());

        write(&src, "again");
        assert_eq!(move_path(&src, &dst).unwrap_err().code, ErrorCode::AlreadyExists);
        assert_eq!(fs::read_to_string(&dst).unwrap(), "a");
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_symlink_to_folder_keeps_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("target");
        write(&target.join("keep.txt"), "k");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).unwrap();
        remove_no_follow(&link).unwrap();
        assert!(target.join("keep.txt").exists());
        assert!(!exists_no_follow(&link));
    }

    #[test]
    fn test_backup_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let backups = dir.path().join("undo");
        let file = dir.path().join("doc.txt");
        write(&file, "doc");
        let backup = move_to_backup(&file, &backups).unwrap();
        assert!(!file.exists());
        assert_eq!(backup.file_name().unwrap(), "doc.txt");
        assert_eq!(fs::read_to_string(&backup).unwrap(), "doc");
        discard_backup(&backup);
        assert!(!backup.exists());
        assert!(!backup.parent().unwrap().exists());
    }

    #[test]
    fn test_fingerprint_detects_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("item");
        fs::create_dir(&path).unwrap();
        let fp = Fingerprint::capture(&path).unwrap();
        fp.verify(&path).unwrap();

        fs::remove_dir(&path).unwrap();
        assert_eq!(fp.verify(&path).unwrap_err().code, ErrorCode::NotFound);

        write(&path, "now a file");
        assert_eq!(fp.verify(&path).unwrap_err().code, ErrorCode::Unsupported);
    }

    #[cfg(unix)]
    #[test]
    fn test_fingerprint_detects_symlink_swap() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("folder");
        fs::create_dir(&path).unwrap();
        let fp = Fingerprint::capture(&path).unwrap();
        fs::remove_dir(&path).unwrap();
        let elsewhere = dir.path().join("elsewhere");
        fs::create_dir(&elsewhere).unwrap();
        std::os::unix::fs::symlink(&elsewhere, &path).unwrap();
        assert_eq!(fp.verify(&path).unwrap_err().code, ErrorCode::Unsupported);
    }

    #[test]
    fn test_rename_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        write(&a, "a");
        write(&b, "b");
        assert_eq!(rename_in_place(&a, &b).unwrap_err().code, ErrorCode::AlreadyExists);
        let c = dir.path().join("c.txt");
        rename_in_place(&a, &c).unwrap();
        assert_eq!(stat(&c).unwrap().kind, EntryKind::File);
    }
}
