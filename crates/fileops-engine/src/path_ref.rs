//! Typed paths: either a local filesystem path or a location on a configured cloud remote.
//!
//! Raw strings from the UI are classified once, here. Everything downstream pattern-matches on
//! [`PathRef`] instead of sniffing prefixes. On the wire a `PathRef` is its display string
//! (`/home/me/a.txt` or `rclone://gdrive/docs/a.txt`).

use crate::errors::{EngineError, ErrorCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Scheme prefix for cloud paths: `rclone://<remote>/<path>`.
pub const CLOUD_SCHEME: &str = "rclone://";

/// Provider scope name used for local paths in cache keys and logs.
pub const LOCAL_SCOPE: &str = "local";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PathRef {
    /// An absolute, lexically normalized local path.
    Local(PathBuf),
    /// `rel_path` has no leading or trailing `/`; the remote root is `""`.
    Cloud { remote: String, rel_path: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    Empty,
    Relative(String),
    EmptyRemote(String),
    /// A `..` segment in a cloud path.
    ParentSegment(String),
}

impl fmt::Display for PathError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("Path is empty"),
            Self::Relative(raw) => write!(f, "Path is not absolute: {raw}"),
            Self::EmptyRemote(raw) => write!(f, "Cloud path has no remote name: {raw}"),
            Self::ParentSegment(raw) => write!(f, "Cloud path contains '..': {raw}"),
        }
    }
}

impl std::error::Error for PathError {}

impl From<PathError> for EngineError {
    fn from(err: PathError) -> Self {
        EngineError::new(ErrorCode::Unsupported, err.to_string())
    }
}

/// Classifies a raw path string. Only the `rclone://` scheme is special; everything else is a
/// local path, which must be absolute after `~` expansion.
pub fn classify(raw: &str) -> Result<PathRef, PathError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(PathError::Empty);
    }
    if let Some(rest) = raw.strip_prefix(CLOUD_SCHEME) {
        return classify_cloud(raw, rest);
    }
    let expanded = expand_tilde(raw);
    if !expanded.is_absolute() {
        return Err(PathError::Relative(raw.to_string()));
    }
    Ok(PathRef::Local(normalize_local(&expanded)))
}

fn classify_cloud(raw: &str, rest: &str) -> Result<PathRef, PathError> {
    let (remote, rel) = rest.split_once('/').unwrap_or((rest, ""));
    // Accept rclone's own `remote:` spelling too
    let remote = remote.trim_end_matches(':');
    if remote.is_empty() {
        return Err(PathError::EmptyRemote(raw.to_string()));
    }
    let rel_path = normalize_cloud(rel).ok_or_else(|| PathError::ParentSegment(raw.to_string()))?;
    Ok(PathRef::Cloud {
        remote: remote.to_string(),
        rel_path,
    })
}

/// Expands a leading `~` or `~/` to the home dir. `~user` forms are left alone.
fn expand_tilde(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = raw.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    PathBuf::from(raw)
}

/// Drops `.` segments and resolves `..` lexically, without touching the filesystem.
fn normalize_local(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Returns `None` if a `..` segment is present.
fn normalize_cloud(rel: &str) -> Option<String> {
    let mut segments = Vec::new();
    for segment in rel.split('/') {
        match segment {
            "" | "." => {}
            ".." => return None,
            other => segments.push(other),
        }
    }
    Some(segments.join("/"))
}

impl PathRef {
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self::Local(path.into())
    }

    pub fn cloud(remote: impl Into<String>, rel_path: impl Into<String>) -> Self {
        let rel_path: String = rel_path.into();
        Self::Cloud {
            remote: remote.into(),
            rel_path: rel_path.trim_matches('/').to_string(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn is_cloud(&self) -> bool {
        matches!(self, Self::Cloud { .. })
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Self::Local(path) => Some(path),
            Self::Cloud { .. } => None,
        }
    }

    pub fn remote(&self) -> Option<&str> {
        match self {
            Self::Local(_) => None,
            Self::Cloud { remote, .. } => Some(remote),
        }
    }

    /// `"local"` or the remote name. Used to key caches and limiter gates.
    pub fn scope(&self) -> &str {
        match self {
            Self::Local(_) => LOCAL_SCOPE,
            Self::Cloud { remote, .. } => remote,
        }
    }

    /// Last path segment, or `None` for a root.
    pub fn name(&self) -> Option<String> {
        match self {
            Self::Local(path) => path.file_name().map(|n| n.to_string_lossy().into_owned()),
            Self::Cloud { rel_path, .. } => {
                if rel_path.is_empty() {
                    None
                } else {
                    rel_path.rsplit('/').next().map(str::to_string)
                }
            }
        }
    }

    /// The containing folder, or `None` for a root.
    pub fn parent(&self) -> Option<PathRef> {
        match self {
            Self::Local(path) => path.parent().map(|p| Self::Local(p.to_path_buf())),
            Self::Cloud { remote, rel_path } => {
                if rel_path.is_empty() {
                    return None;
                }
                let parent = rel_path.rsplit_once('/').map(|(p, _)| p).unwrap_or("");
                Some(Self::Cloud {
                    remote: remote.clone(),
                    rel_path: parent.to_string(),
                })
            }
        }
    }

    /// Appends a single name segment.
    pub fn join(&self, name: &str) -> PathRef {
        match self {
            Self::Local(path) => Self::Local(path.join(name)),
            Self::Cloud { remote, rel_path } => {
                let rel_path = if rel_path.is_empty() {
                    name.to_string()
                } else {
                    format!("{rel_path}/{name}")
                };
                Self::Cloud {
                    remote: remote.clone(),
                    rel_path,
                }
            }
        }
    }

    /// True if `self` equals `other` or lies somewhere below it.
    pub fn is_within(&self, other: &PathRef) -> bool {
        match (self, other) {
            (Self::Local(a), Self::Local(b)) => a.starts_with(b),
            (
                Self::Cloud { remote: ra, rel_path: pa },
                Self::Cloud { remote: rb, rel_path: pb },
            ) => {
                ra == rb
                    && (pb.is_empty() || pa == pb || pa.strip_prefix(pb.as_str()).is_some_and(|r| r.starts_with('/')))
            }
            _ => false,
        }
    }

    /// The `remote:path` argument rclone expects, or the plain local path.
    pub fn provider_arg(&self) -> String {
        match self {
            Self::Local(path) => path.to_string_lossy().into_owned(),
            Self::Cloud { remote, rel_path } => format!("{remote}:{rel_path}"),
        }
    }
}

impl fmt::Display for PathRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Cloud { remote, rel_path } => write!(f, "{CLOUD_SCHEME}{remote}/{rel_path}"),
        }
    }
}

impl FromStr for PathRef {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        classify(s)
    }
}

impl TryFrom<String> for PathRef {
    type Error = PathError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        classify(&value)
    }
}

impl From<PathRef> for String {
    fn from(value: PathRef) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cloud_paths() {
        let p = classify("rclone://gdrive/docs//report.pdf/").unwrap();
        assert_eq!(p, PathRef::cloud("gdrive", "docs/report.pdf"));
        assert_eq!(p.to_string(), "rclone://gdrive/docs/report.pdf");
        assert_eq!(p.provider_arg(), "gdrive:docs/report.pdf");
        assert_eq!(p.name().as_deref(), Some("report.pdf"));
        assert_eq!(p.parent(), Some(PathRef::cloud("gdrive", "docs")));
        assert_eq!(p.scope(), "gdrive");
    }

    #[test]
    fn test_cloud_root() {
        let root = classify("rclone://onedrive:").unwrap();
        assert_eq!(root, PathRef::cloud("onedrive", ""));
        assert_eq!(root.name(), None);
        assert_eq!(root.parent(), None);
        assert_eq!(root.join("a"), PathRef::cloud("onedrive", "a"));
        assert_eq!(PathRef::cloud("onedrive", "a").parent(), Some(root));
    }

    #[test]
    fn test_cloud_rejects_parent_segments_and_empty_remote() {
        assert!(matches!(classify("rclone://gdrive/a/../b"), Err(PathError::ParentSegment(_))));
        assert!(matches!(classify("rclone:///a"), Err(PathError::EmptyRemote(_))));
    }

    #[test]
    fn test_local_paths() {
        let p = classify("/tmp/./x/../y").unwrap();
        assert_eq!(p, PathRef::local("/tmp/y"));
        assert_eq!(p.scope(), LOCAL_SCOPE);
        assert!(p.is_local());
    }

    #[test]
    fn test_relative_and_empty_are_rejected() {
        assert_eq!(classify(""), Err(PathError::Empty));
        assert!(matches!(classify("docs/a.txt"), Err(PathError::Relative(_))));
        // Unknown schemes are treated as (relative) local paths
        assert!(matches!(classify("ftp://host/a"), Err(PathError::Relative(_))));
        let err: EngineError = PathError::Empty.into();
        assert_eq!(err.code, ErrorCode::Unsupported);
    }

    #[test]
    fn test_tilde_expansion() {
        if let Some(home) = dirs::home_dir() {
            assert_eq!(classify("~/Documents").unwrap(), PathRef::local(home.join("Documents")));
            assert_eq!(classify("~").unwrap(), PathRef::local(home));
        }
    }

    #[test]
    fn test_is_within() {
        let root = PathRef::cloud("r", "");
        let a = PathRef::cloud("r", "a");
        let ab = PathRef::cloud("r", "a/b");
        let ax = PathRef::cloud("r", "ax");
        assert!(ab.is_within(&a));
        assert!(a.is_within(&a));
        assert!(!ax.is_within(&a));
        assert!(ab.is_within(&root));
        assert!(!ab.is_within(&PathRef::cloud("other", "a")));
        assert!(PathRef::local("/a/b").is_within(&PathRef::local("/a")));
        assert!(!PathRef::local("/a/b").is_within(&a));
    }

    #[test]
    fn test_serde_uses_display_string() {
        let p = PathRef::cloud("gdrive", "a b/c");
        let json = serde_json::to_string(&p).unwrap();
        assert_eq!(json, r#""rclone://gdrive/a b/c""#);
        let back: PathRef = serde_json::from_str(&json).unwrap();
        assert_eq!(back, p);
        assert!(serde_json::from_str::<PathRef>(r#""relative""#).is_err());
    }
}
