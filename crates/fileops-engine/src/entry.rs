//! The listing entry shared by local and cloud folders.

use crate::path_ref::PathRef;
use chrono::DateTime;
use serde::{Deserialize, Serialize};
use std::fs::Metadata;
use std::path::Path;
use std::time::UNIX_EPOCH;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Dir,
    File,
    Link,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entry {
    pub name: String,
    pub path: PathRef,
    pub kind: EntryKind,
    pub size: Option<u64>,
    /// Unix timestamp in seconds.
    pub modified: Option<i64>,
    pub read_only: bool,
    pub hidden: bool,
    /// Set for entries that live in a trash, where the UI needs an id to restore them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trash_id: Option<String>,
}

impl Entry {
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Dir
    }

    /// Builds an entry from `symlink_metadata`, so symlinks are reported as links.
    pub fn from_local(path: &Path, metadata: &Metadata) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let kind = if metadata.file_type().is_symlink() {
            EntryKind::Link
        } else if metadata.is_dir() {
            EntryKind::Dir
        } else {
            EntryKind::File
        };
        let modified = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .and_then(|d| i64::try_from(d.as_secs()).ok());
        Self {
            hidden: is_hidden_name(&name),
            name,
            path: PathRef::Local(path.to_path_buf()),
            kind,
            size: (kind == EntryKind::File).then(|| metadata.len()),
            modified,
            read_only: metadata.permissions().readonly(),
            trash_id: None,
        }
    }

    /// Builds an entry for a provider listing row found in `folder`.
    pub fn from_raw(folder: &PathRef, raw: RawEntry) -> Self {
        let kind = if raw.is_dir { EntryKind::Dir } else { EntryKind::File };
        let modified = raw
            .mod_time
            .as_deref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.timestamp());
        Self {
            path: folder.join(&raw.name),
            hidden: is_hidden_name(&raw.name),
            kind,
            size: if raw.is_dir { None } else { u64::try_from(raw.size).ok() },
            modified,
            read_only: false,
            trash_id: None,
            name: raw.name,
        }
    }
}

/// Dotfiles are hidden on every platform we list.
pub fn is_hidden_name(name: &str) -> bool {
    name.starts_with('.')
}

/// One row of provider listing output, in rclone `lsjson` shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RawEntry {
    #[serde(default)]
    pub path: String,
    pub name: String,
    /// rclone reports -1 for folders and unknown sizes.
    #[serde(default = "unknown_size")]
    pub size: i64,
    #[serde(default)]
    pub mod_time: Option<String>,
    #[serde(default)]
    pub is_dir: bool,
    #[serde(default)]
    pub mime_type: Option<String>,
}

fn unknown_size() -> i64 {
    -1
}

impl RawEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            size: i64::try_from(size).unwrap_or(i64::MAX),
            mod_time: None,
            is_dir: false,
            mime_type: None,
        }
    }

    pub fn dir(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            path: name.clone(),
            name,
            size: -1,
            mod_time: None,
            is_dir: true,
            mime_type: Some("inode/directory".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_parses_lsjson_row() {
        let row = r#"{"Path":"docs/.env","Name":".env","Size":12,"MimeType":"text/plain","ModTime":"2024-03-01T10:00:00.000000000Z","IsDir":false}"#;
        let raw: RawEntry = serde_json::from_str(row).unwrap();
        let entry = Entry::from_raw(&PathRef::cloud("gdrive", "docs"), raw);
        assert_eq!(entry.path, PathRef::cloud("gdrive", "docs/.env"));
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(12));
        assert!(entry.hidden);
        assert_eq!(entry.modified, Some(1_709_287_200));
    }

    #[test]
    fn test_from_raw_folder_has_no_size() {
        let entry = Entry::from_raw(&PathRef::cloud("r", ""), RawEntry::dir("Photos"));
        assert!(entry.is_dir());
        assert_eq!(entry.size, None);
        assert_eq!(entry.path, PathRef::cloud("r", "Photos"));
    }

    #[test]
    fn test_from_local_reports_symlinks_as_links() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("a.txt");
        std::fs::write(&file, b"abc").unwrap();
        let entry = Entry::from_local(&file, &std::fs::symlink_metadata(&file).unwrap());
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, Some(3));
        assert!(!entry.hidden);

        #[cfg(unix)]
        {
            let link = dir.path().join(".link");
            std::os::unix::fs::symlink(&file, &link).unwrap();
            let entry = Entry::from_local(&link, &std::fs::symlink_metadata(&link).unwrap());
            assert_eq!(entry.kind, EntryKind::Link);
            assert!(entry.hidden);
            assert_eq!(entry.size, None);
        }
    }
}
