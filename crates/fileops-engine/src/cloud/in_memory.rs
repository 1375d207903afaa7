//! In-memory cloud provider for tests and offline demos.
//!
//! Holds a tree per remote, counts every call per operation and per path, and can be told to
//! fail specific calls. Uploads and downloads touch the real local filesystem, so transfer
//! lanes that cross the local/cloud boundary can be exercised against a temp dir.

use super::{CloudProvider, ProviderResult, RemoteInfo};
use crate::entry::RawEntry;
use crate::errors::NativeError;
use crate::ignore_poison::IgnorePoison;
use crate::path_ref::PathRef;
use futures_util::future::BoxFuture;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderOp {
    List,
    Stat,
    Mkdir,
    Delete,
    Rmdir,
    Copy,
    Move,
    ListRemotes,
}

/// What an injected failure looks like to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectedFailure {
    Stderr { exit_code: Option<i32>, message: String },
    TimedOut,
}

impl InjectedFailure {
    pub fn stderr(message: impl Into<String>) -> Self {
        Self::Stderr {
            exit_code: Some(1),
            message: message.into(),
        }
    }

    fn to_native(&self) -> NativeError {
        match self {
            Self::Stderr { exit_code, message } => NativeError::provider(*exit_code, message.clone()),
            Self::TimedOut => NativeError::TimedOut,
        }
    }
}

struct FailureRule {
    op: ProviderOp,
    /// Only calls whose path argument contains this fragment fail.
    path_fragment: Option<String>,
    remaining: usize,
    failure: InjectedFailure,
}

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct Remote {
    kind: String,
    /// Keyed by rel path; the root `""` is implicit.
    nodes: BTreeMap<String, Node>,
}

#[derive(Default)]
pub struct InMemoryProvider {
    remotes: Mutex<BTreeMap<String, Remote>>,
    calls: Mutex<HashMap<ProviderOp, usize>>,
    calls_by_path: Mutex<HashMap<(ProviderOp, String), usize>>,
    failures: Mutex<Vec<FailureRule>>,
    latency_ms: AtomicUsize,
    no_folder_transfer: AtomicBool,
    running: AtomicUsize,
    peak_running: AtomicUsize,
}

fn parent_of(rel: &str) -> &str {
    rel.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn name_of(rel: &str) -> &str {
    rel.rsplit('/').next().unwrap_or(rel)
}

fn join_rel(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}/{name}")
    }
}

fn not_found(what: &str) -> NativeError {
    NativeError::provider(Some(3), format!("error reading source root directory: directory not found: {what}"))
}

fn object_not_found(what: &str) -> NativeError {
    NativeError::provider(Some(4), format!("object not found: {what}"))
}

impl Remote {
    fn is_dir(&self, rel: &str) -> bool {
        rel.is_empty() || matches!(self.nodes.get(rel), Some(Node::Dir))
    }

    fn ensure_parents(&mut self, rel: &str) {
        let mut parent = parent_of(rel);
        while !parent.is_empty() {
            self.nodes.entry(parent.to_string()).or_insert(Node::Dir);
            parent = parent_of(parent);
        }
    }

    fn insert(&mut self, rel: &str, node: Node) {
        self.ensure_parents(rel);
        self.nodes.insert(rel.to_string(), node);
    }

    /// `rel` and everything below it.
    fn subtree(&self, rel: &str) -> Vec<(String, Node)> {
        let prefix = format!("{rel}/");
        self.nodes
            .iter()
            .filter(|(k, _)| rel.is_empty() || k.as_str() == rel || k.starts_with(&prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn remove_subtree(&mut self, rel: &str) {
        let prefix = format!("{rel}/");
        self.nodes.retain(|k, _| k.as_str() != rel && !k.starts_with(&prefix));
    }
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an empty remote of the given backend type.
    pub fn with_remote(self, name: &str, kind: &str) -> Self {
        self.remotes.lock_ignore_poison().insert(
            name.to_string(),
            Remote {
                kind: kind.to_string(),
                nodes: BTreeMap::new(),
            },
        );
        self
    }

    pub fn add_file(&self, remote: &str, rel: &str, content: &[u8]) {
        let mut remotes = self.remotes.lock_ignore_poison();
        remotes
            .entry(remote.to_string())
            .or_default()
            .insert(rel, Node::File(content.to_vec()));
    }

    pub fn add_dir(&self, remote: &str, rel: &str) {
        let mut remotes = self.remotes.lock_ignore_poison();
        remotes.entry(remote.to_string()).or_default().insert(rel, Node::Dir);
    }

    pub fn exists(&self, remote: &str, rel: &str) -> bool {
        let remotes = self.remotes.lock_ignore_poison();
        remotes.get(remote).is_some_and(|r| r.nodes.contains_key(rel))
    }

    pub fn read_file(&self, remote: &str, rel: &str) -> Option<Vec<u8>> {
        let remotes = self.remotes.lock_ignore_poison();
        match remotes.get(remote)?.nodes.get(rel)? {
            Node::File(bytes) => Some(bytes.clone()),
            Node::Dir => None,
        }
    }

    /// Total calls of `op` so far.
    pub fn calls(&self, op: ProviderOp) -> usize {
        self.calls.lock_ignore_poison().get(&op).copied().unwrap_or(0)
    }

    /// Calls of `op` whose (first) path argument was exactly `path` (`remote:rel` form).
    pub fn calls_for(&self, op: ProviderOp, path: &str) -> usize {
        self.calls_by_path
            .lock_ignore_poison()
            .get(&(op, path.to_string()))
            .copied()
            .unwrap_or(0)
    }

    /// Makes the next `times` calls of `op` fail.
    pub fn fail_next(&self, op: ProviderOp, times: usize, failure: InjectedFailure) {
        self.failures.lock_ignore_poison().push(FailureRule {
            op,
            path_fragment: None,
            remaining: times,
            failure,
        });
    }

    /// Makes the next `times` calls of `op` touching a path containing `fragment` fail.
    pub fn fail_path(&self, op: ProviderOp, fragment: &str, times: usize, failure: InjectedFailure) {
        self.failures.lock_ignore_poison().push(FailureRule {
            op,
            path_fragment: Some(fragment.to_string()),
            remaining: times,
            failure,
        });
    }

    /// Every call sleeps this long before doing its work.
    pub fn set_latency(&self, latency: Duration) {
        let ms = usize::try_from(latency.as_millis()).unwrap_or(usize::MAX);
        self.latency_ms.store(ms, Ordering::SeqCst);
    }

    pub fn set_folder_transfer(&self, supported: bool) {
        self.no_folder_transfer.store(!supported, Ordering::SeqCst);
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_running.load(Ordering::SeqCst)
    }

    fn record_call(&self, op: ProviderOp, path: &str) -> Option<NativeError> {
        *self.calls.lock_ignore_poison().entry(op).or_insert(0) += 1;
        *self
            .calls_by_path
            .lock_ignore_poison()
            .entry((op, path.to_string()))
            .or_insert(0) += 1;

        let mut failures = self.failures.lock_ignore_poison();
        let rule = failures.iter_mut().find(|rule| {
            rule.op == op
                && rule.remaining > 0
                && rule
                    .path_fragment
                    .as_deref()
                    .is_none_or(|fragment| path.contains(fragment))
        })?;
        rule.remaining -= 1;
        Some(rule.failure.to_native())
    }

    /// Counts the call, tracks concurrency, applies latency and injected failures, then runs `work`.
    async fn call<T>(
        &self,
        op: ProviderOp,
        path: String,
        work: impl FnOnce(&Self) -> ProviderResult<T>,
    ) -> ProviderResult<T> {
        let injected = self.record_call(op, &path);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_running.fetch_max(now, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency as u64)).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        match injected {
            Some(err) => Err(err),
            None => work(self),
        }
    }

    fn do_list(&self, remote: &str, rel: &str) -> ProviderResult<Vec<RawEntry>> {
        let remotes = self.remotes.lock_ignore_poison();
        let r = remotes
            .get(remote)
            .ok_or_else(|| NativeError::provider(Some(1), format!("didn't find section in config file: {remote}")))?;
        if !r.is_dir(rel) {
            return Err(not_found(rel));
        }
        Ok(r.nodes
            .iter()
            .filter(|(k, _)| !k.is_empty() && parent_of(k) == rel)
            .map(|(k, node)| match node {
                Node::Dir => RawEntry::dir(name_of(k)),
                Node::File(bytes) => RawEntry::file(name_of(k), bytes.len() as u64),
            })
            .collect())
    }

    fn do_stat(&self, remote: &str, rel: &str) -> ProviderResult<RawEntry> {
        let remotes = self.remotes.lock_ignore_poison();
        match remotes.get(remote).and_then(|r| r.nodes.get(rel)) {
            Some(Node::Dir) => Ok(RawEntry::dir(name_of(rel))),
            Some(Node::File(bytes)) => Ok(RawEntry::file(name_of(rel), bytes.len() as u64)),
            None => Err(object_not_found(rel)),
        }
    }

    fn do_mkdir(&self, remote: &str, rel: &str) -> ProviderResult<()> {
        let mut remotes = self.remotes.lock_ignore_poison();
        let r = remotes.entry(remote.to_string()).or_default();
        if let Some(Node::File(_)) = r.nodes.get(rel) {
            return Err(NativeError::provider(Some(1), format!("file already exists: {rel}")));
        }
        r.insert(rel, Node::Dir);
        Ok(())
    }

    fn do_delete(&self, remote: &str, rel: &str, is_dir: bool) -> ProviderResult<()> {
        let mut remotes = self.remotes.lock_ignore_poison();
        let r = remotes.get_mut(remote).ok_or_else(|| object_not_found(rel))?;
        match (r.nodes.get(rel), is_dir) {
            (None, _) => Err(object_not_found(rel)),
            (Some(Node::Dir), true) | (Some(Node::File(_)), false) => {
                r.remove_subtree(rel);
                Ok(())
            }
            (Some(_), _) => Err(NativeError::provider(Some(1), format!("is a directory not a file: {rel}"))),
        }
    }

    fn do_rmdir(&self, remote: &str, rel: &str) -> ProviderResult<()> {
        let mut remotes = self.remotes.lock_ignore_poison();
        let r = remotes.get_mut(remote).ok_or_else(|| not_found(rel))?;
        match r.nodes.get(rel) {
            Some(Node::Dir) if r.nodes.keys().any(|k| parent_of(k) == rel && k != rel) => {
                Err(NativeError::provider(Some(1), format!("Failed to rmdir: directory not empty: {rel}")))
            }
            Some(Node::Dir) => {
                r.nodes.remove(rel);
                Ok(())
            }
            Some(Node::File(_)) => Err(NativeError::provider(Some(1), format!("is a file not a directory: {rel}"))),
            None => Err(not_found(rel)),
        }
    }

    /// Reads `src` (local or cloud) into a list of `(relative path, node)` pairs, root first.
    fn read_tree(&self, src: &PathRef) -> ProviderResult<Vec<(String, Node)>> {
        match src {
            PathRef::Cloud { remote, rel_path } => {
                let remotes = self.remotes.lock_ignore_poison();
                let r = remotes.get(remote).ok_or_else(|| object_not_found(rel_path))?;
                if !rel_path.is_empty() && !r.nodes.contains_key(rel_path) {
                    return Err(object_not_found(rel_path));
                }
                Ok(r.subtree(rel_path)
                    .into_iter()
                    .map(|(k, node)| {
                        let rel = k.strip_prefix(rel_path.as_str()).unwrap_or(&k).trim_start_matches('/');
                        (rel.to_string(), node)
                    })
                    .collect())
            }
            PathRef::Local(path) => read_local_tree(path).map_err(NativeError::Io),
        }
    }

    fn write_tree(&self, dst: &PathRef, tree: Vec<(String, Node)>) -> ProviderResult<()> {
        match dst {
            PathRef::Cloud { remote, rel_path } => {
                let mut remotes = self.remotes.lock_ignore_poison();
                let r = remotes.entry(remote.clone()).or_default();
                for (rel, node) in tree {
                    let target = if rel.is_empty() {
                        rel_path.clone()
                    } else {
                        join_rel(rel_path, &rel)
                    };
                    if target.is_empty() {
                        continue;
                    }
                    r.insert(&target, node);
                }
                Ok(())
            }
            PathRef::Local(path) => write_local_tree(path, tree).map_err(NativeError::Io),
        }
    }

    fn remove_source(&self, src: &PathRef, is_dir: bool) -> ProviderResult<()> {
        match src {
            PathRef::Cloud { remote, rel_path } => self.do_delete(remote, rel_path, is_dir),
            PathRef::Local(path) => {
                let result = if is_dir { fs::remove_dir_all(path) } else { fs::remove_file(path) };
                result.map_err(NativeError::Io)
            }
        }
    }
}

fn read_local_tree(root: &Path) -> io::Result<Vec<(String, Node)>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(io::Error::other)?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .map(|p| p.to_string_lossy().replace('\\', "/"))
            .unwrap_or_default();
        if entry.file_type().is_dir() {
            out.push((rel, Node::Dir));
        } else {
            out.push((rel, Node::File(fs::read(entry.path())?)));
        }
    }
    Ok(out)
}

fn write_local_tree(root: &Path, tree: Vec<(String, Node)>) -> io::Result<()> {
    for (rel, node) in tree {
        let target = if rel.is_empty() { root.to_path_buf() } else { root.join(&rel) };
        match node {
            Node::Dir => fs::create_dir_all(&target)?,
            Node::File(bytes) => {
                if let Some(parent) = target.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(&target, bytes)?;
            }
        }
    }
    Ok(())
}

impl CloudProvider for InMemoryProvider {
    fn name(&self) -> &str {
        "in-memory"
    }

    fn list<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<Vec<RawEntry>>> {
        Box::pin(self.call(ProviderOp::List, format!("{remote}:{rel_path}"), move |p| {
            p.do_list(remote, rel_path)
        }))
    }

    fn stat<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<RawEntry>> {
        Box::pin(self.call(ProviderOp::Stat, format!("{remote}:{rel_path}"), move |p| {
            p.do_stat(remote, rel_path)
        }))
    }

    fn mkdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.call(ProviderOp::Mkdir, format!("{remote}:{rel_path}"), move |p| {
            p.do_mkdir(remote, rel_path)
        }))
    }

    fn delete<'a>(&'a self, remote: &'a str, rel_path: &'a str, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.call(ProviderOp::Delete, format!("{remote}:{rel_path}"), move |p| {
            p.do_delete(remote, rel_path, is_dir)
        }))
    }

    fn rmdir<'a>(&'a self, remote: &'a str, rel_path: &'a str) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.call(ProviderOp::Rmdir, format!("{remote}:{rel_path}"), move |p| {
            p.do_rmdir(remote, rel_path)
        }))
    }

    fn copy<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.call(ProviderOp::Copy, src.provider_arg(), move |p| {
            if is_dir && !p.supports_folder_transfer() {
                return Err(NativeError::provider(Some(1), "can't copy directories on this remote"));
            }
            let tree = p.read_tree(src)?;
            p.write_tree(dst, tree)
        }))
    }

    fn move_item<'a>(&'a self, src: &'a PathRef, dst: &'a PathRef, is_dir: bool) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(self.call(ProviderOp::Move, src.provider_arg(), move |p| {
            if is_dir && !p.supports_folder_transfer() {
                return Err(NativeError::provider(Some(1), "can't move directories on this remote"));
            }
            let tree = p.read_tree(src)?;
            p.write_tree(dst, tree)?;
            p.remove_source(src, is_dir)
        }))
    }

    fn list_remotes(&self) -> BoxFuture<'_, ProviderResult<Vec<RemoteInfo>>> {
        Box::pin(self.call(ProviderOp::ListRemotes, String::new(), |p| {
            let remotes = p.remotes.lock_ignore_poison();
            Ok(remotes
                .iter()
                .map(|(name, r)| RemoteInfo {
                    name: name.clone(),
                    kind: r.kind.clone(),
                })
                .collect())
        }))
    }

    fn supports_folder_transfer(&self) -> bool {
        !self.no_folder_transfer.load(Ordering::SeqCst)
    }
}
