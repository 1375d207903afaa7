//! Search: a small boolean query language and the folder walk that applies it.
//!
//! Queries look like `report* AND NOT hidden:true` or `(name:foo OR name:bar) readonly:false`.
//! Parsing happens once per search. A query that doesn't parse ends the search before any I/O
//! and reports a [`QueryError`] with the byte span to underline.

mod eval;
mod glob;
mod lexer;
mod parser;


pub use glob::GlobPattern;
pub use parser::{Expr, Field, Predicate, ValueMatcher};

use crate::cloud::CloudGateway;
use crate::entry::{Entry, is_hidden_name};
use crate::errors::{EngineError, ErrorCode};
use crate::events::{EngineEvent, EventSink, SearchCompleteEvent, SearchFailedEvent, SearchProgressEvent};
use crate::local;
use crate::path_ref::PathRef;
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

// ============================================================================
// Query errors
// ============================================================================

/// Byte range into the query string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryErrorKind {
    EmptyQuery,
    UnexpectedToken,
    UnexpectedEnd,
    UnbalancedParen,
    UnterminatedQuote,
    MissingValue,
    UnknownField,
    InvalidBoolean,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub message: String,
    pub span: Span,
}

impl QueryError {
    pub fn new(kind: QueryErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at position {}", self.message, self.span.start)
    }
}

impl std::error::Error for QueryError {}

impl From<QueryError> for EngineError {
    fn from(err: QueryError) -> Self {
        EngineError::new(ErrorCode::Unsupported, format!("Invalid search query: {err}"))
    }
}

// ============================================================================
// Query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    source: String,
    expr: Expr,
}

impl Query {
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        Ok(Self {
            source: input.to_string(),
            expr: parser::parse(input)?,
        })
    }

    pub fn matches(&self, entry: &Entry) -> bool {
        eval::evaluate(&self.expr, entry)
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }
}

// ============================================================================
// Search runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub search_id: String,
    pub matches: Vec<Entry>,
    pub scanned: usize,
    /// The token fired before the walk finished; `matches` holds what was found until then.
    pub cancelled: bool,
}

/// Counts scanned entries and emits a progress event every `every` of them.
struct Progress {
    search_id: String,
    sink: Arc<dyn EventSink>,
    every: usize,
    scanned: usize,
    matches: Vec<Entry>,
}

impl Progress {
    fn record(&mut self, entry: Entry, matched: bool) {
        self.scanned += 1;
        if matched {
            self.matches.push(entry);
        }
        if self.scanned % self.every == 0 {
            self.sink.emit(EngineEvent::SearchProgress(SearchProgressEvent {
                search_id: self.search_id.clone(),
                scanned: self.scanned,
                matched: self.matches.len(),
            }));
        }
    }
}

/// Walks a folder tree, local or cloud, and collects entries matching a query.
pub struct Searcher {
    gateway: Arc<CloudGateway>,
    sink: Arc<dyn EventSink>,
    progress_every: usize,
    include_hidden: bool,
}

impl Searcher {
    pub fn new(gateway: Arc<CloudGateway>, sink: Arc<dyn EventSink>, progress_every: usize, include_hidden: bool) -> Self {
        Self {
            gateway,
            sink,
            progress_every: progress_every.max(1),
            include_hidden,
        }
    }

    /// Runs one search below `scope`. Failures end the run with a `search-failed` event instead
    /// of `search-complete`.
    pub async fn search(
        &self,
        query: &str,
        scope: &PathRef,
        token: &CancellationToken,
    ) -> Result<SearchResult, EngineError> {
        let search_id = uuid::Uuid::new_v4().to_string();
        let query = match Query::parse(query) {
            Ok(query) => query,
            Err(err) => {
                debug!("Search parse [{search_id}]: {err}");
                let error = EngineError::from(err.clone());
                self.fail(&search_id, error.clone(), Some(err));
                return Err(error);
            }
        };

        info!("Search start [{search_id}]: '{}' in {scope}", query.as_str());
        let start = Instant::now();
        let progress = Progress {
            search_id: search_id.clone(),
            sink: Arc::clone(&self.sink),
            every: self.progress_every,
            scanned: 0,
            matches: Vec::new(),
        };
        let walked = match scope {
            PathRef::Local(root) => {
                let (root, query, token, include_hidden) =
                    (root.clone(), query.clone(), token.clone(), self.include_hidden);
                local::run_blocking("Search", move || {
                    walk_local(root, &query, &token, include_hidden, progress)
                })
                .await
            }
            PathRef::Cloud { .. } => self.walk_cloud(scope, &query, token, progress).await,
        };
        let (progress, cancelled) = match walked {
            Ok(walked) => walked,
            Err(error) => {
                warn!("Search failed [{search_id}]: {error}");
                self.fail(&search_id, error.clone(), None);
                return Err(error);
            }
        };

        info!(
            "Search done [{search_id}]: {} of {} matched in {}ms{}",
            progress.matches.len(),
            progress.scanned,
            start.elapsed().as_millis(),
            if cancelled { " (cancelled)" } else { "" }
        );
        self.sink.emit(EngineEvent::SearchComplete(SearchCompleteEvent {
            search_id: search_id.clone(),
            scanned: progress.scanned,
            matched: progress.matches.len(),
            cancelled,
        }));
        Ok(SearchResult {
            search_id,
            matches: progress.matches,
            scanned: progress.scanned,
            cancelled,
        })
    }

    fn fail(&self, search_id: &str, error: EngineError, query_error: Option<QueryError>) {
        self.sink.emit(EngineEvent::SearchFailed(SearchFailedEvent {
            search_id: search_id.to_string(),
            error,
            query_error,
        }));
    }

    /// Breadth-first over cloud folders. Only a failure to list the scope itself fails the
    /// search; unreadable subfolders are logged and skipped.
    async fn walk_cloud(
        &self,
        root: &PathRef,
        query: &Query,
        token: &CancellationToken,
        mut progress: Progress,
    ) -> Result<(Progress, bool), EngineError> {
        let mut queue = VecDeque::from([root.clone()]);
        while let Some(folder) = queue.pop_front() {
            if token.is_cancelled() {
                return Ok((progress, true));
            }
            let rows = match self.gateway.list(&folder, token).await {
                Ok(rows) => rows,
                Err(_) if token.is_cancelled() => return Ok((progress, true)),
                Err(e) if folder == *root => return Err(e),
                Err(e) => {
                    warn!("Search skip [{folder}]: {e}");
                    continue;
                }
            };
            for row in rows {
                let entry = Entry::from_raw(&folder, row);
                if !self.include_hidden && entry.hidden {
                    continue;
                }
                if entry.is_dir() {
                    queue.push_back(entry.path.clone());
                }
                let matched = query.matches(&entry);
                progress.record(entry, matched);
            }
        }
        Ok((progress, false))
    }
}

fn walk_local(
    root: PathBuf,
    query: &Query,
    token: &CancellationToken,
    include_hidden: bool,
    mut progress: Progress,
) -> Result<(Progress, bool), EngineError> {
    // The scope itself may be a link to a folder; entries below it are never followed
    let root_meta = fs::metadata(&root).map_err(|e| EngineError::from_io(&e, root.display()))?;
    if !root_meta.is_dir() {
        return Err(EngineError::unsupported("Search needs a folder to look in").with_path(root.display()));
    }

    let walker = WalkDir::new(&root)
        .min_depth(1)
        .follow_links(false)
        .into_iter()
        .filter_entry(|e| include_hidden || !is_hidden_name(&e.file_name().to_string_lossy()));
    for item in walker {
        if token.is_cancelled() {
            return Ok((progress, true));
        }
        let dir_entry = match item {
            Ok(dir_entry) => dir_entry,
            Err(e) => {
                warn!(
                    "Search skip [{}]: {e}",
                    e.path().map(|p| p.display().to_string()).unwrap_or_default()
                );
                continue;
            }
        };
        let metadata = match dir_entry.metadata() {
            Ok(metadata) => metadata,
            Err(e) => {
                warn!("Search skip [{}]: {e}", dir_entry.path().display());
                continue;
            }
        };
        let entry = Entry::from_local(dir_entry.path(), &metadata);
        let matched = query.matches(&entry);
        progress.record(entry, matched);
    }
    Ok((progress, false))
}
