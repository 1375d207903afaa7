//! Debounced, cancellable background refresh of folder listings.
//!
//! After a write, the engine asks for the touched folders to be refreshed and returns right
//! away. Requests for the same folder within the debounce window coalesce into one fetch.
//! Navigating away cancels the pending refresh; a refresh that was already fetching finishes
//! its provider call, but the result is discarded.

use super::{Lister, ScopeKey};
use crate::errors::{EngineError, ErrorCode};
use crate::events::{EngineEvent, EventSink, RefreshEvent};
use crate::ignore_poison::IgnorePoison;
use crate::path_ref::PathRef;
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRequest {
    /// A new refresh was scheduled.
    Scheduled,
    /// Folded into a refresh that's still waiting out its debounce.
    Coalesced,
}

struct PendingRefresh {
    generation: u64,
    token: CancellationToken,
    /// Set once the debounce elapsed and the fetch started; later requests schedule a new one.
    fetching: bool,
    requests: usize,
}

struct RefreshInner {
    lister: Arc<Lister>,
    sink: Arc<dyn EventSink>,
    debounce: Duration,
    timeout: Duration,
    pending: Mutex<HashMap<ScopeKey, PendingRefresh>>,
    next_generation: Mutex<u64>,
}

#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<RefreshInner>,
}

impl RefreshCoordinator {
    pub fn new(lister: Arc<Lister>, sink: Arc<dyn EventSink>, debounce: Duration, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(RefreshInner {
                lister,
                sink,
                debounce,
                timeout,
                pending: Mutex::new(HashMap::new()),
                next_generation: Mutex::new(0),
            }),
        }
    }

    /// Asks for `folder` to be refreshed. Never waits for the fetch.
    pub fn request(&self, folder: &PathRef, include_hidden: bool) -> RefreshRequest {
        let key = ScopeKey::for_folder(folder, include_hidden);
        let generation = {
            let mut next = self.inner.next_generation.lock_ignore_poison();
            *next += 1;
            *next
        };
        let token = CancellationToken::new();
        {
            let mut pending = self.inner.pending.lock_ignore_poison();
            if let Some(existing) = pending.get_mut(&key)
                && !existing.fetching
            {
                existing.requests += 1;
                debug!("Refresh [{key}]: coalesced ({} requests)", existing.requests);
                return RefreshRequest::Coalesced;
            }
            pending.insert(
                key.clone(),
                PendingRefresh {
                    generation,
                    token: token.clone(),
                    fetching: false,
                    requests: 1,
                },
            );
        }
        debug!("Refresh [{key}]: scheduled in {}ms", self.inner.debounce.as_millis());
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_refresh(inner, key, generation, token));
        RefreshRequest::Scheduled
    }

    /// Cancels pending and running refreshes of `folder` (both hidden variants).
    pub fn cancel_folder(&self, folder: &PathRef) {
        let mut pending = self.inner.pending.lock_ignore_poison();
        for include_hidden in [false, true] {
            if let Some(refresh) = pending.remove(&ScopeKey::for_folder(folder, include_hidden)) {
                debug!("Refresh [{folder}]: cancelled");
                refresh.token.cancel();
            }
        }
    }

    pub fn cancel_all(&self) {
        let mut pending = self.inner.pending.lock_ignore_poison();
        for (_, refresh) in pending.drain() {
            refresh.token.cancel();
        }
    }

    /// Refreshes that are debouncing or fetching.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock_ignore_poison().len()
    }
}

impl RefreshInner {
    fn emit(&self, make: fn(RefreshEvent) -> EngineEvent, key: &ScopeKey, entry_count: Option<usize>, error: Option<EngineError>) {
        self.sink.emit(make(RefreshEvent {
            folder: key.folder.clone(),
            include_hidden: key.include_hidden,
            entry_count,
            error,
        }));
    }

    fn finish(&self, key: &ScopeKey, generation: u64) {
        let mut pending = self.pending.lock_ignore_poison();
        if pending.get(key).is_some_and(|p| p.generation == generation) {
            pending.remove(key);
        }
    }
}

async fn run_refresh(inner: Arc<RefreshInner>, key: ScopeKey, generation: u64, token: CancellationToken) {
    tokio::select! {
        _ = token.cancelled() => {
            inner.emit(EngineEvent::RefreshCancelled, &key, None, None);
            return;
        }
        _ = tokio::time::sleep(inner.debounce) => {}
    }

    let still_ours = {
        let mut pending = inner.pending.lock_ignore_poison();
        match pending.get_mut(&key) {
            Some(p) if p.generation == generation => {
                p.fetching = true;
                true
            }
            _ => false,
        }
    };
    if !still_ours {
        // Cancelled between the debounce firing and now
        inner.emit(EngineEvent::RefreshCancelled, &key, None, None);
        return;
    }

    // Drop the stale snapshot so the fetch goes to the provider instead of the cache
    inner.lister.cache().invalidate(&key);
    let result = tokio::time::timeout(
        inner.timeout,
        inner.lister.list_folder(&key.folder, key.include_hidden, &token),
    )
    .await;
    inner.finish(&key, generation);

    if token.is_cancelled() {
        inner.emit(EngineEvent::RefreshCancelled, &key, None, None);
        return;
    }
    match result {
        Ok(Ok(snapshot)) => {
            debug!("Refresh [{key}]: complete, {} entries", snapshot.entries.len());
            inner.emit(EngineEvent::RefreshComplete, &key, Some(snapshot.entries.len()), None);
        }
        Ok(Err(e)) => {
            debug!("Refresh [{key}]: failed: {e}");
            inner.emit(EngineEvent::RefreshStale, &key, None, Some(e));
        }
        Err(_) => {
            debug!("Refresh [{key}]: timed out after {}ms", inner.timeout.as_millis());
            let error = EngineError::new(ErrorCode::Timeout, "Refresh timed out").with_path(&key.folder);
            inner.emit(EngineEvent::RefreshStale, &key, None, Some(error));
        }
    }
}
