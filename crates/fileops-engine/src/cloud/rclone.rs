//! Cloud provider backed by the `rclone` command-line tool.
//!
//! Every call spawns one rclone process with a deadline. Listings use `lsjson`, remote
//! discovery uses `config dump`. Failures carry rclone's exit status and stderr verbatim;
//! classification happens in the gateway.

use super::{CloudProvider, ProviderResult, RemoteInfo};
use crate::entry::RawEntry;
use crate::errors::NativeError;
use crate::path_ref::PathRef;
use futures_util::future::BoxFuture;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Longest stderr we keep in an error message.
const MAX_STDERR_CHARS: usize = 2_000;

#[derive(Debug, Clone)]
pub struct RcloneCli {
    binary: PathBuf,
    timeout: Duration,
    /// Passed as `--config` when set; otherwise rclone uses its default config file.
    config_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
struct RemoteConfig {
    #[serde(rename = "type", default)]
    kind: String,
}

/// Builds the `remote:path` argument for a cloud location.
pub fn remote_arg(remote: &str, rel_path: &str) -> String {
    format!("{remote}:{rel_path}")
}

/// Parses `rclone lsjson` output.
pub fn parse_lsjson(stdout: &[u8]) -> Result<Vec<RawEntry>, serde_json::Error> {
    serde_json::from_slice(stdout)
}

/// Parses `rclone config dump` output into remotes, sorted by name.
pub fn parse_config_dump(stdout: &[u8]) -> Result<Vec<RemoteInfo>, serde_json::Error> {
    let remotes: BTreeMap<String, RemoteConfig> = serde_json::from_slice(stdout)?;
    Ok(remotes
        .into_iter()
        .map(|(name, config)| RemoteInfo { name, kind: config.kind })
        .collect())
}

fn invalid_output(op: &str, err: serde_json::Error) -> NativeError {
    NativeError::provider(None, format!("unexpected rclone {op} output: {err}"))
}

fn truncate_stderr(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    if text.chars().count() <= MAX_STDERR_CHARS {
        text.to_string()
    } else {
        text.chars().take(MAX_STDERR_CHARS).collect()
    }
}

/// Arguments for a copy or move between two locations, picking the file or folder verb.
pub fn transfer_args(verb_file: &str, verb_dir: &str, src: &PathRef, dst: &PathRef, is_dir: bool) -> Vec<String> {
    let mut args = vec![
        if is_dir { verb_dir } else { verb_file }.to_string(),
        src.provider_arg(),
        dst.provider_arg(),
    ];
    if is_dir && verb_dir == "move" {
        args.push("--delete-empty-src-dirs".to_string());
    }
    args
}

impl RcloneCli {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
            config_path: None,
        }
    }

    pub fn with_config(mut self, config_path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(config_path.into());
        self
    }

    /// Runs rclone with `args` and returns stdout.
    async fn run(&self, args: Vec<String>) -> ProviderResult<Vec<u8>> {
        let start = Instant::now();
        let mut command = Command::new(&self.binary);
        if let Some(config) = &self.config_path {
            command.arg("--config").arg(config);
        }
        command
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.timeout, command.output()).await {
            Ok(result) => result.map_err(NativeError::Io)?,
            Err(_) => {
                warn!(
                    "Rclone {}: timed out after {}ms",
                    args.first().map(String::as_str).unwrap_or(""),
                    self.timeout.as_millis()
                );
                return Err(NativeError::TimedOut);
            }
        };
        debug!(
            "Rclone {:?}: status={:?} in {}ms",
            args,
            output.status.code(),
            start.elapsed().as_millis()
        );
        if output.status.success() {
            Ok(output.stdout)
        } else {
            Err(NativeError::provider(output.status.code(), truncate_stderr(&output.stderr)))
        }
    }
}

impl CloudProvider for RcloneCli {
    fn name(&self) -> &str {
        "rclone"
    }

    fn list<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<Vec<RawEntry>>> {
        Box::pin(async move {
            let stdout = self
                .run(vec!["lsjson".to_string(), remote_arg(remote, rel_path)])
                .await?;
            parse_lsjson(&stdout).map_err(|e| invalid_output("lsjson", e))
        })
    }

    fn stat<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<RawEntry>> {
        Box::pin(async move {
            let stdout = self
                .run(vec![
                    "lsjson".to_string(),
                    "--stat".to_string(),
                    remote_arg(remote, rel_path),
                ])
                .await?;
            serde_json::from_slice(&stdout).map_err(|e| invalid_output("lsjson --stat", e))
        })
    }

    fn mkdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.run(vec!["mkdir".to_string(), remote_arg(remote, rel_path)])
                .await
                .map(|_| ())
        })
    }

    fn delete<'a>(&'a self, remote: &'a str, rel_path: &'a str, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let verb = if is_dir { "purge" } else { "deletefile" };
            self.run(vec![verb.to_string(), remote_arg(remote, rel_path)])
                .await
                .map(|_| ())
        })
    }

    fn rmdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.run(vec!["rmdir".to_string(), remote_arg(remote, rel_path)])
                .await
                .map(|_| ())
        })
    }

    fn copy<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.run(transfer_args("copyto", "copy", src, dst, is_dir))
                .await
                .map(|_| ())
        })
    }

    fn move_item<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            self.run(transfer_args("moveto", "move", src, dst, is_dir))
                .await
                .map(|_| ())
        })
    }

    fn list_remotes(&self) -> BoxFuture<'_, ProviderResult<Vec<RemoteInfo>>> {
        Box::pin(async move {
            let stdout = self.run(vec!["config".to_string(), "dump".to_string()]).await?;
            parse_config_dump(&stdout).map_err(|e| invalid_output("config dump", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_lsjson_listing() {
        let stdout = br#"[
            {"Path":"Photos","Name":"Photos","Size":-1,"MimeType":"inode/directory","ModTime":"2024-01-02T03:04:05Z","IsDir":true},
            {"Path":"notes.md","Name":"notes.md","Size":42,"MimeType":"text/markdown","ModTime":"2024-01-02T03:04:05.123Z","IsDir":false}
        ]"#;
        let entries = parse_lsjson(stdout).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_dir);
        assert_eq!(entries[1].name, "notes.md");
        assert_eq!(entries[1].size, 42);
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_lsjson(b"[]").unwrap().is_empty());
        assert!(parse_lsjson(b"not json").is_err());
    }

    #[test]
    fn test_parse_config_dump() {
        let stdout = br#"{
            "work": {"type": "onedrive", "drive_type": "business"},
            "gdrive": {"type": "drive", "scope": "drive"}
        }"#;
        let remotes = parse_config_dump(stdout).unwrap();
        assert_eq!(
            remotes,
            vec![
                RemoteInfo {
                    name: "gdrive".to_string(),
                    kind: "drive".to_string()
                },
                RemoteInfo {
                    name: "work".to_string(),
                    kind: "onedrive".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_transfer_args_pick_verbs() {
        let src = PathRef::local("/home/me/a.txt");
        let dst = PathRef::cloud("gdrive", "docs/a.txt");
        assert_eq!(
            transfer_args("copyto", "copy", &src, &dst, false),
            vec!["copyto", "/home/me/a.txt", "gdrive:docs/a.txt"]
        );
        let src = PathRef::cloud("gdrive", "docs");
        let dst = PathRef::cloud("box", "docs");
        assert_eq!(
            transfer_args("moveto", "move", &src, &dst, true),
            vec!["move", "gdrive:docs", "box:docs", "--delete-empty-src-dirs"]
        );
    }

    #[test]
    fn test_stderr_is_trimmed_and_capped() {
        assert_eq!(truncate_stderr(b"  boom \n"), "boom");
        let long = vec![b'x'; MAX_STDERR_CHARS + 10];
        assert_eq!(truncate_stderr(&long).len(), MAX_STDERR_CHARS);
    }

    #[tokio::test]
    async fn test_missing_binary_is_an_io_error() {
        let cli = RcloneCli::new("/nonexistent/rclone-binary", Duration::from_secs(5));
        let err = cli.list("gdrive", "").await.unwrap_err();
        assert!(matches!(err, NativeError::Io(_)));
    }
}
