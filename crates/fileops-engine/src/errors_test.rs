//! Tests for native error classification.

use super::errors::*;
use std::io;

#[test]
fn test_io_kinds_map_to_codes() {
    let cases = [
        (io::ErrorKind::NotFound, ErrorCode::NotFound),
        (io::ErrorKind::PermissionDenied, ErrorCode::PermissionDenied),
        (io::ErrorKind::AlreadyExists, ErrorCode::AlreadyExists),
        (io::ErrorKind::TimedOut, ErrorCode::Timeout),
        (io::ErrorKind::Unsupported, ErrorCode::Unsupported),
        (io::ErrorKind::UnexpectedEof, ErrorCode::Io),
        (io::ErrorKind::Other, ErrorCode::Unknown),
    ];
    for (kind, expected) in cases {
        let err = io::Error::new(kind, "synthetic");
        assert_eq!(classify_io(&err), expected, "kind {kind:?}");
    }
}

#[cfg(unix)]
#[test]
fn test_errno_wins_over_kind() {
    let cases = [
        (libc::EXDEV, ErrorCode::CrossDevice),
        (libc::EROFS, ErrorCode::ReadOnlyFs),
        (libc::ENOENT, ErrorCode::NotFound),
        (libc::EACCES, ErrorCode::PermissionDenied),
        (libc::ENOTEMPTY, ErrorCode::AlreadyExists),
        (libc::ETIMEDOUT, ErrorCode::Timeout),
        (libc::ENOSPC, ErrorCode::Io),
    ];
    for (errno, expected) in cases {
        let err = io::Error::from_raw_os_error(errno);
        assert_eq!(classify(&NativeError::Io(err)), expected, "errno {errno}");
    }
}

#[cfg(unix)]
#[test]
fn test_busy_errno_is_transient() {
    let err = EngineError::from_io(&io::Error::from_raw_os_error(libc::EBUSY), "/tmp/x");
    assert_eq!(err.code, ErrorCode::Io);
    assert!(err.transient);
    assert!(err.is_retryable());

    let err = EngineError::from_io(&io::Error::from_raw_os_error(libc::ENOSPC), "/tmp/x");
    assert!(!err.is_retryable());
}

#[test]
fn test_provider_text_classification() {
    let cases = [
        ("directory not found", ErrorCode::NotFound),
        ("Failed to lsjson: error in ListJSON: object not found", ErrorCode::NotFound),
        ("couldn't list files: permission denied", ErrorCode::PermissionDenied),
        ("googleapi: Error 403: forbidden", ErrorCode::PermissionDenied),
        ("context deadline exceeded", ErrorCode::Timeout),
        ("file already exists", ErrorCode::AlreadyExists),
        ("Failed to rmdir: directory not empty", ErrorCode::AlreadyExists),
        ("can't move object - incompatible remotes", ErrorCode::Unsupported),
        ("something completely different", ErrorCode::Unknown),
    ];
    for (stderr, expected) in cases {
        assert_eq!(classify_provider(Some(1), stderr), expected, "stderr {stderr:?}");
    }
}

#[test]
fn test_provider_exit_codes() {
    assert_eq!(classify_provider(Some(3), ""), ErrorCode::NotFound);
    assert_eq!(classify_provider(Some(4), ""), ErrorCode::NotFound);
    assert_eq!(classify_provider(Some(5), ""), ErrorCode::Io);
    assert_eq!(classify_provider(Some(7), ""), ErrorCode::Unknown);
    assert_eq!(classify_provider(None, ""), ErrorCode::Unknown);
}

#[test]
fn test_rate_limit_is_transient_io() {
    let err = NativeError::provider(Some(1), "HTTP error 429: too many requests").into_engine_error("gdrive:a");
    assert_eq!(err.code, ErrorCode::Io);
    assert!(err.transient);
    assert!(err.is_retryable());
    assert_eq!(err.path.as_deref(), Some("gdrive:a"));
}

#[test]
fn test_timeout_and_cancel_variants() {
    assert_eq!(classify(&NativeError::TimedOut), ErrorCode::Timeout);
    assert!(NativeError::TimedOut.into_engine_error("x").is_retryable());
    let cancelled = NativeError::Cancelled.into_engine_error("x");
    assert_eq!(cancelled.code, ErrorCode::Cancelled);
    assert!(!cancelled.is_retryable());
}

#[test]
fn test_non_transient_failures_are_not_retryable() {
    let err = NativeError::provider(Some(3), "directory not found").into_engine_error("r:x");
    assert!(!err.is_retryable());
}

#[test]
fn test_empty_stderr_message_falls_back_to_status() {
    let err = NativeError::provider(Some(7), "").into_engine_error("r:x");
    assert_eq!(err.message, "Provider exited with status 7");
}

#[test]
fn test_error_serializes_snake_case_code() {
    let err = EngineError::already_exists("/tmp/a.txt");
    let json = serde_json::to_value(&err).unwrap();
    assert_eq!(json["code"], "already_exists");
    assert_eq!(json["path"], "/tmp/a.txt");
    assert_eq!(json["transient"], false);
}

#[test]
fn test_display_includes_path() {
    let err = EngineError::not_found("/tmp/missing");
    assert_eq!(err.to_string(), "not_found: No such file or folder (/tmp/missing)");
    assert!(err.user_message().ends_with("(/tmp/missing)"));
}
