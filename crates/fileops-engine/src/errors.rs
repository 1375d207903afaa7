//! Error taxonomy shared by every layer of the engine.
//!
//! Native failures (OS errors, provider exit status and stderr text) are classified exactly
//! once, at the layer that owns the native error, into an [`ErrorCode`]. Everything above that
//! layer only sees [`EngineError`] and never inspects raw error strings again.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Stable, UI-facing error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    NotFound,
    PermissionDenied,
    ReadOnlyFs,
    AlreadyExists,
    CrossDevice,
    Unsupported,
    Timeout,
    Cancelled,
    Io,
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ReadOnlyFs => "read_only_fs",
            Self::AlreadyExists => "already_exists",
            Self::CrossDevice => "cross_device",
            Self::Unsupported => "unsupported",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Io => "io",
            Self::Unknown => "unknown",
        }
    }

    /// Returns a user-friendly message for this category.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::NotFound => "The file or folder no longer exists. It may have been moved or deleted.",
            Self::PermissionDenied => "You don't have permission to access this item.",
            Self::ReadOnlyFs => "This location is read-only.",
            Self::AlreadyExists => "An item with this name already exists.",
            Self::CrossDevice => "The item can't be moved directly between these locations.",
            Self::Unsupported => "This operation isn't supported here.",
            Self::Timeout => "The operation timed out. Try again.",
            Self::Cancelled => "The operation was cancelled.",
            Self::Io => "A read or write error occurred.",
            Self::Unknown => "An unexpected error occurred.",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure, as it crosses module boundaries and reaches the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineError {
    pub code: ErrorCode,
    /// Human-readable detail, usually the native message.
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Set by the classifier when the native failure looks temporary (rate limit, dropped connection).
    #[serde(default)]
    pub transient: bool,
}

impl EngineError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            path: None,
            transient: false,
        }
    }

    pub fn with_path(mut self, path: impl fmt::Display) -> Self {
        self.path = Some(path.to_string());
        self
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorCode::Cancelled, "Operation cancelled")
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unsupported, message)
    }

    pub fn not_found(path: impl fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, "No such file or folder").with_path(path)
    }

    pub fn already_exists(path: impl fmt::Display) -> Self {
        Self::new(ErrorCode::AlreadyExists, "Target already exists").with_path(path)
    }

    /// Classifies an OS error for `path`.
    pub fn from_io(err: &io::Error, path: impl fmt::Display) -> Self {
        Self {
            code: classify_io(err),
            message: err.to_string(),
            path: Some(path.to_string()),
            transient: is_transient_io(err),
        }
    }

    /// Returns true if the operation may succeed if retried.
    pub fn is_retryable(&self) -> bool {
        match self.code {
            ErrorCode::Timeout => true,
            ErrorCode::Io | ErrorCode::Unknown => self.transient,
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match &self.path {
            Some(path) => format!("{} ({})", self.code.user_message(), path),
            None => self.code.user_message().to_string(),
        }
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}: {} ({})", self.code, self.message, path),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self {
            code: classify_io(&err),
            message: err.to_string(),
            path: None,
            transient: is_transient_io(&err),
        }
    }
}

/// A failure as the producing layer reported it, before classification.
#[derive(Debug)]
pub enum NativeError {
    Io(io::Error),
    /// A provider call finished with a failure status. `stderr` is the provider's own text.
    Provider { exit_code: Option<i32>, stderr: String },
    /// The call didn't finish within its deadline.
    TimedOut,
    /// The call was abandoned because its owner cancelled it.
    Cancelled,
}

impl NativeError {
    pub fn provider(exit_code: Option<i32>, stderr: impl Into<String>) -> Self {
        Self::Provider {
            exit_code,
            stderr: stderr.into(),
        }
    }

    /// Classifies this failure and attaches `path` for display.
    pub fn into_engine_error(self, path: impl fmt::Display) -> EngineError {
        let code = classify(&self);
        let transient = is_transient(&self);
        let message = match &self {
            Self::Io(err) => err.to_string(),
            Self::Provider { exit_code, stderr } => match (exit_code, stderr.is_empty()) {
                (Some(code), true) => format!("Provider exited with status {code}"),
                (_, false) => stderr.clone(),
                (None, true) => "Provider was terminated".to_string(),
            },
            Self::TimedOut => "Provider call timed out".to_string(),
            Self::Cancelled => "Provider call cancelled".to_string(),
        };
        EngineError {
            code,
            message,
            path: Some(path.to_string()),
            transient,
        }
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Provider { exit_code, stderr } => {
                write!(f, "provider failed (status {exit_code:?}): {stderr}")
            }
            Self::TimedOut => f.write_str("provider call timed out"),
            Self::Cancelled => f.write_str("provider call cancelled"),
        }
    }
}

impl std::error::Error for NativeError {}

impl From<io::Error> for NativeError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Maps a native failure to its [`ErrorCode`]. Anything unrecognized is `Unknown`.
pub fn classify(native: &NativeError) -> ErrorCode {
    match native {
        NativeError::Io(err) => classify_io(err),
        NativeError::Provider { exit_code, stderr } => classify_provider(*exit_code, stderr),
        NativeError::TimedOut => ErrorCode::Timeout,
        NativeError::Cancelled => ErrorCode::Cancelled,
    }
}

fn is_transient(native: &NativeError) -> bool {
    match native {
        NativeError::Io(err) => is_transient_io(err),
        NativeError::Provider { exit_code, stderr } => is_transient_provider(*exit_code, stderr),
        NativeError::TimedOut => true,
        NativeError::Cancelled => false,
    }
}

/// Maps an OS error. The raw errno wins over `ErrorKind` because several kinds we care about
/// (EXDEV, EROFS) only got stable kinds recently and some platforms still report `Other`.
pub fn classify_io(err: &io::Error) -> ErrorCode {
    if let Some(errno) = err.raw_os_error()
        && let Some(code) = classify_errno(errno)
    {
        return code;
    }
    match err.kind() {
        io::ErrorKind::NotFound => ErrorCode::NotFound,
        io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
        io::ErrorKind::AlreadyExists | io::ErrorKind::DirectoryNotEmpty => ErrorCode::AlreadyExists,
        io::ErrorKind::ReadOnlyFilesystem => ErrorCode::ReadOnlyFs,
        io::ErrorKind::CrossesDevices => ErrorCode::CrossDevice,
        io::ErrorKind::TimedOut => ErrorCode::Timeout,
        io::ErrorKind::Unsupported => ErrorCode::Unsupported,
        io::ErrorKind::Other => ErrorCode::Unknown,
        _ => ErrorCode::Io,
    }
}

#[cfg(unix)]
fn classify_errno(errno: i32) -> Option<ErrorCode> {
    let code = match errno {
        libc::ENOENT => ErrorCode::NotFound,
        libc::EACCES | libc::EPERM => ErrorCode::PermissionDenied,
        libc::EROFS => ErrorCode::ReadOnlyFs,
        libc::EEXIST | libc::ENOTEMPTY => ErrorCode::AlreadyExists,
        libc::EXDEV => ErrorCode::CrossDevice,
        libc::ETIMEDOUT => ErrorCode::Timeout,
        libc::ECANCELED => ErrorCode::Cancelled,
        libc::ENOTSUP | libc::ENOSYS | libc::ENAMETOOLONG => ErrorCode::Unsupported,
        libc::EIO | libc::ENOSPC | libc::EDQUOT | libc::EBUSY | libc::EAGAIN | libc::EINTR | libc::ENOTDIR
        | libc::EISDIR => ErrorCode::Io,
        _ => return None,
    };
    Some(code)
}

#[cfg(not(unix))]
fn classify_errno(_errno: i32) -> Option<ErrorCode> {
    None
}

fn is_transient_io(err: &io::Error) -> bool {
    if let Some(errno) = err.raw_os_error()
        && let Some(transient) = is_transient_errno(errno)
    {
        return transient;
    }
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

#[cfg(unix)]
fn is_transient_errno(errno: i32) -> Option<bool> {
    Some(matches!(errno, libc::EAGAIN | libc::EBUSY | libc::EINTR | libc::ETIMEDOUT))
}

#[cfg(not(unix))]
fn is_transient_errno(_errno: i32) -> Option<bool> {
    None
}

/// rclone exit status: directory not found.
const EXIT_DIR_NOT_FOUND: i32 = 3;
/// rclone exit status: file not found.
const EXIT_FILE_NOT_FOUND: i32 = 4;
/// rclone exit status: temporary error, retrying may help.
const EXIT_TEMPORARY: i32 = 5;

const NOT_FOUND_MARKERS: &[&str] = &[
    "directory not found",
    "object not found",
    "file not found",
    "not found",
    "doesn't exist",
    "does not exist",
    "didn't find section in config file",
];
const PERMISSION_MARKERS: &[&str] = &[
    "permission denied",
    "access denied",
    "accessdenied",
    "forbidden",
    "unauthorized",
    "http error 403",
    "http error 401",
];
const READ_ONLY_MARKERS: &[&str] = &["read-only file system", "read only file system", "is read-only"];
const EXISTS_MARKERS: &[&str] = &["already exists", "file exists", "directory not empty"];
const TIMEOUT_MARKERS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const UNSUPPORTED_MARKERS: &[&str] = &["not supported", "doesn't support", "can't move", "can't copy"];
const TRANSIENT_MARKERS: &[&str] = &[
    "rate limit",
    "ratelimit",
    "too many requests",
    "http error 429",
    "http error 500",
    "http error 502",
    "http error 503",
    "connection reset",
    "connection refused",
    "unexpected eof",
    "temporary failure",
    "try again",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// Maps a provider failure from its exit status and stderr text.
pub fn classify_provider(exit_code: Option<i32>, stderr: &str) -> ErrorCode {
    let text = stderr.to_lowercase();
    // Order matters: "permission denied" must win over a trailing "not found" in wrapped messages
    if contains_any(&text, PERMISSION_MARKERS) {
        return ErrorCode::PermissionDenied;
    }
    if contains_any(&text, READ_ONLY_MARKERS) {
        return ErrorCode::ReadOnlyFs;
    }
    if contains_any(&text, TIMEOUT_MARKERS) {
        return ErrorCode::Timeout;
    }
    if contains_any(&text, EXISTS_MARKERS) {
        return ErrorCode::AlreadyExists;
    }
    if contains_any(&text, NOT_FOUND_MARKERS) {
        return ErrorCode::NotFound;
    }
    if contains_any(&text, UNSUPPORTED_MARKERS) {
        return ErrorCode::Unsupported;
    }
    match exit_code {
        Some(EXIT_DIR_NOT_FOUND) | Some(EXIT_FILE_NOT_FOUND) => ErrorCode::NotFound,
        Some(EXIT_TEMPORARY) => ErrorCode::Io,
        _ if contains_any(&text, TRANSIENT_MARKERS) => ErrorCode::Io,
        _ => ErrorCode::Unknown,
    }
}

fn is_transient_provider(exit_code: Option<i32>, stderr: &str) -> bool {
    let text = stderr.to_lowercase();
    exit_code == Some(EXIT_TEMPORARY) || contains_any(&text, TRANSIENT_MARKERS) || contains_any(&text, TIMEOUT_MARKERS)
}
