//! Name comparison rules per storage provider.
//!
//! Two names "collide" when the destination would treat them as the same file. Some providers
//! (OneDrive, Dropbox, Box) and the default macOS/Windows filesystems are case-insensitive.
//! Linux filesystems are not. Names are always NFC-normalized first, since macOS hands out
//! decomposed names that otherwise look different from what a cloud listing returns.

use unicode_normalization::UnicodeNormalization;

/// Strategy for turning a name into its collision key.
pub trait NameMatcher: Send + Sync {
    fn is_case_sensitive(&self) -> bool;

    /// The key under which two colliding names compare equal.
    fn key(&self, name: &str) -> String {
        let normalized: String = name.nfc().collect();
        if self.is_case_sensitive() {
            normalized
        } else {
            normalized.to_lowercase()
        }
    }

    fn same(&self, a: &str, b: &str) -> bool {
        self.key(a) == self.key(b)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaseSensitiveNames;

impl NameMatcher for CaseSensitiveNames {
    fn is_case_sensitive(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CaseInsensitiveNames;

impl NameMatcher for CaseInsensitiveNames {
    fn is_case_sensitive(&self) -> bool {
        false
    }
}

static SENSITIVE: CaseSensitiveNames = CaseSensitiveNames;
static INSENSITIVE: CaseInsensitiveNames = CaseInsensitiveNames;

/// rclone backend types whose storage compares names case-insensitively.
const CASE_INSENSITIVE_KINDS: &[&str] = &[
    "onedrive",
    "dropbox",
    "box",
    "smb",
    "pcloud",
    "opendrive",
    "jottacloud",
    "sharefile",
    "premiumizeme",
];

/// Picks the matcher for an rclone backend type (the `type` key in rclone's config).
/// Unknown types are treated as case-sensitive, the stricter choice for collision checks.
pub fn matcher_for_kind(kind: &str) -> &'static dyn NameMatcher {
    let kind = kind.trim().to_ascii_lowercase();
    if kind == "local" {
        return local_matcher();
    }
    if CASE_INSENSITIVE_KINDS.contains(&kind.as_str()) {
        &INSENSITIVE
    } else {
        &SENSITIVE
    }
}

/// Matcher for the local filesystem, following the platform default.
pub fn local_matcher() -> &'static dyn NameMatcher {
    if cfg!(any(target_os = "macos", target_os = "windows")) {
        &INSENSITIVE
    } else {
        &SENSITIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_kinds() {
        for kind in ["onedrive", "Dropbox", "box"] {
            let m = matcher_for_kind(kind);
            assert!(!m.is_case_sensitive(), "{kind}");
            assert!(m.same("Report.PDF", "report.pdf"));
        }
    }

    #[test]
    fn test_case_sensitive_kinds() {
        for kind in ["drive", "s3", "sftp", "made-up"] {
            let m = matcher_for_kind(kind);
            assert!(m.is_case_sensitive(), "{kind}");
            assert!(!m.same("A.txt", "a.txt"));
        }
    }

    #[test]
    fn test_nfc_normalization_applies_to_both() {
        let decomposed = "cafe\u{301}.txt";
        let composed = "caf\u{e9}.txt";
        assert!(CaseSensitiveNames.same(decomposed, composed));
        assert!(CaseInsensitiveNames.same(decomposed, "CAF\u{c9}.TXT"));
    }

    #[test]
    fn test_local_follows_platform() {
        let expected_sensitive = !cfg!(any(target_os = "macos", target_os = "windows"));
        assert_eq!(local_matcher().is_case_sensitive(), expected_sensitive);
        assert_eq!(matcher_for_kind("local").is_case_sensitive(), expected_sensitive);
    }
}
