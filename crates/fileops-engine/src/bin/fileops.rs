//! Terminal driver for the file-operation engine.
//!
//! Usage:
//!   fileops [--settings FILE] ls PATH
//!   fileops [--settings FILE] preview DEST SOURCE...
//!   fileops [--settings FILE] copy|move [--policy overwrite|rename|stop] DEST SOURCE...
//!   fileops [--settings FILE] search SCOPE QUERY
//!   fileops [--settings FILE] remotes
//!
//! Paths are local (`/home/me/x`, `~/x`) or cloud (`rclone://remote/path`). Results go to
//! stdout as JSON. Logging follows `RUST_LOG` (default: info).

use fileops_engine::settings::{load_default_settings, load_settings};
use fileops_engine::write_operations::{ConflictPolicy, TransferMode};
use fileops_engine::{EngineError, EngineEvent, FileOpsEngine, PathRef};
use log::{debug, error};
use serde::Serialize;
use std::env;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const USAGE: &str = "usage: fileops [--settings FILE] <ls PATH | preview DEST SOURCE... | \
copy|move [--policy overwrite|rename|stop] DEST SOURCE... | search SCOPE QUERY | remotes>";

#[derive(Debug, PartialEq)]
enum Command {
    Ls(PathRef),
    Preview {
        dest: PathRef,
        sources: Vec<PathRef>,
    },
    Transfer {
        mode: TransferMode,
        policy: Option<ConflictPolicy>,
        dest: PathRef,
        sources: Vec<PathRef>,
    },
    Search {
        scope: PathRef,
        query: String,
    },
    Remotes,
}

#[derive(Debug, PartialEq)]
struct Args {
    settings: Option<PathBuf>,
    command: Command,
}

fn parse_path(raw: &str) -> Result<PathRef, String> {
    raw.parse().map_err(|e| format!("'{raw}': {e}"))
}

fn parse_policy(raw: &str) -> Result<ConflictPolicy, String> {
    match raw {
        "overwrite" => Ok(ConflictPolicy::Overwrite),
        "rename" => Ok(ConflictPolicy::Rename),
        "stop" => Ok(ConflictPolicy::StopOnConflict),
        other => Err(format!("unknown policy '{other}'")),
    }
}

/// Splits `rest` into a destination and at least one source.
fn dest_and_sources(rest: &[String]) -> Result<(PathRef, Vec<PathRef>), String> {
    match rest {
        [dest, sources @ ..] if !sources.is_empty() => Ok((
            parse_path(dest)?,
            sources.iter().map(|s| parse_path(s)).collect::<Result<_, _>>()?,
        )),
        _ => Err("expected DEST and at least one SOURCE".to_string()),
    }
}

fn parse_args(args: &[String]) -> Result<Args, String> {
    let mut settings = None;
    let mut rest = args;
    if let [flag, path, tail @ ..] = rest
        && flag == "--settings"
    {
        settings = Some(PathBuf::from(path));
        rest = tail;
    }

    let Some((name, rest)) = rest.split_first() else {
        return Err("missing command".to_string());
    };
    let command = match name.as_str() {
        "ls" => match rest {
            [path] => Command::Ls(parse_path(path)?),
            _ => return Err("ls takes one PATH".to_string()),
        },
        "preview" => {
            let (dest, sources) = dest_and_sources(rest)?;
            Command::Preview { dest, sources }
        }
        "copy" | "move" => {
            let mode = if name == "copy" { TransferMode::Copy } else { TransferMode::Move };
            let (policy, rest) = match rest {
                [flag, value, tail @ ..] if flag == "--policy" => (Some(parse_policy(value)?), tail),
                _ => (None, rest),
            };
            let (dest, sources) = dest_and_sources(rest)?;
            Command::Transfer {
                mode,
                policy,
                dest,
                sources,
            }
        }
        "search" => match rest {
            [scope, query @ ..] if !query.is_empty() => Command::Search {
                scope: parse_path(scope)?,
                query: query.join(" "),
            },
            _ => return Err("search takes SCOPE and QUERY".to_string()),
        },
        "remotes" if rest.is_empty() => Command::Remotes,
        "remotes" => return Err("remotes takes no arguments".to_string()),
        other => return Err(format!("unknown command '{other}'")),
    };
    Ok(Args { settings, command })
}

fn print_json(value: &impl Serialize) -> io::Result<()> {
    let mut stdout = io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value)?;
    writeln!(stdout)
}

/// Runs one command. `Ok(false)` means it ran but didn't fully succeed.
async fn run(engine: &FileOpsEngine, command: Command) -> Result<bool, EngineError> {
    let token = CancellationToken::new();
    let written = match command {
        Command::Ls(path) => print_json(&engine.list_folder(&path, &token).await?.entries),
        Command::Preview { dest, sources } => print_json(&engine.preview_conflicts(&sources, &dest, &token).await?),
        Command::Transfer {
            mode,
            policy,
            dest,
            sources,
        } => {
            let plan = engine.plan_transfer(&sources, &dest, mode, policy, &token).await?;
            let result = engine.execute_transfer(plan, &token).await?;
            print_json(&result)?;
            return Ok(result.is_complete_success());
        }
        Command::Search { scope, query } => print_json(&engine.search(&query, &scope, &token).await?),
        Command::Remotes => print_json(&engine.list_remotes(&token).await?),
    };
    written?;
    Ok(true)
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let raw: Vec<String> = env::args().skip(1).collect();
    let args = match parse_args(&raw) {
        Ok(args) => args,
        Err(message) => {
            let _ = writeln!(io::stderr(), "fileops: {message}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let settings = match &args.settings {
        Some(path) => load_settings(path),
        None => load_default_settings(),
    };
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<EngineEvent>();
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            debug!("fileops event {}: {:?}", event.name(), event);
        }
    });
    let engine = FileOpsEngine::with_rclone(settings, Arc::new(tx));

    match run(&engine, args.command).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("fileops: {e}");
            let _ = serde_json::to_writer_pretty(io::stderr(), &e);
            let _ = writeln!(io::stderr());
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(line: &str) -> Result<Args, String> {
        let raw: Vec<String> = line.split_whitespace().map(str::to_string).collect();
        parse_args(&raw)
    }

    #[test]
    fn test_transfer_with_policy_and_settings() {
        let parsed = args("--settings /tmp/s.json move --policy stop rclone://gdrive/dest /a /b").unwrap();
        assert_eq!(parsed.settings, Some(PathBuf::from("/tmp/s.json")));
        assert_eq!(
            parsed.command,
            Command::Transfer {
                mode: TransferMode::Move,
                policy: Some(ConflictPolicy::StopOnConflict),
                dest: PathRef::cloud("gdrive", "dest"),
                sources: vec![PathRef::local("/a"), PathRef::local("/b")],
            }
        );
    }

    #[test]
    fn test_search_joins_query_words() {
        let parsed = args("search /docs name:foo OR name:bar").unwrap();
        assert_eq!(
            parsed.command,
            Command::Search {
                scope: PathRef::local("/docs"),
                query: "name:foo OR name:bar".to_string(),
            }
        );
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(args("").is_err());
        assert!(args("copy /dest").is_err());
        assert!(args("copy --policy maybe /dest /a").is_err());
        assert!(args("ls relative/path").is_err());
        assert!(args("remotes extra").is_err());
        assert!(args("frobnicate").is_err());
        assert_eq!(args("remotes").unwrap().command, Command::Remotes);
    }
}
