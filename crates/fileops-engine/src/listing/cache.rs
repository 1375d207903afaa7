//! Folder listing cache with single-flight fetches.
//!
//! Each [`ScopeKey`] maps to either a ready snapshot or one in-flight fetch. Concurrent callers
//! for the same key await the same shared future, so a folder is never fetched twice at once.
//! The fetch runs as its own task under a token owned by the cache, not by any caller: a caller
//! that cancels only stops waiting. Once every waiter has left, the fetch is cancelled and its
//! slot freed. A fetch only writes its result back if it's still the current fetch for its key.

use super::{ListingSnapshot, RemoteDiscovery, ScopeKey};
use crate::cloud::RemoteInfo;
use crate::entry::Entry;
use crate::errors::{EngineError, ErrorCode};
use crate::ignore_poison::IgnorePoison;
use crate::path_ref::PathRef;
use futures_util::FutureExt;
use futures_util::future::{BoxFuture, Shared};
use log::debug;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

type SharedFetch<T> = Shared<BoxFuture<'static, Result<T, EngineError>>>;

/// A fetch and the callers waiting on it.
struct InFlight<T: Clone> {
    generation: u64,
    fetch: SharedFetch<T>,
    waiters: usize,
    /// Handed to the fetch; cancelled when the last waiter leaves.
    cancel: CancellationToken,
}

impl<T: Clone> InFlight<T> {
    fn new(generation: u64, fetch: SharedFetch<T>, cancel: CancellationToken) -> Self {
        Self {
            generation,
            fetch,
            waiters: 0,
            cancel,
        }
    }

    fn join(&mut self) -> SharedFetch<T> {
        self.waiters += 1;
        self.fetch.clone()
    }

    /// Returns true if that was the last waiter, in which case the fetch is cancelled.
    fn leave(&mut self) -> bool {
        self.waiters = self.waiters.saturating_sub(1);
        if self.waiters == 0 {
            self.cancel.cancel();
            return true;
        }
        false
    }
}

enum Slot {
    Ready(Arc<ListingSnapshot>),
    Fetching(InFlight<Arc<ListingSnapshot>>),
}

enum DiscoverySlot {
    Empty,
    Ready(Arc<RemoteDiscovery>),
    Fetching(InFlight<Arc<RemoteDiscovery>>),
}

struct CacheState {
    slots: HashMap<ScopeKey, Slot>,
    discovery: DiscoverySlot,
    next_generation: u64,
}

impl CacheState {
    fn next_generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }

    fn is_current(&self, key: &ScopeKey, generation: u64) -> bool {
        matches!(self.slots.get(key), Some(Slot::Fetching(flight)) if flight.generation == generation)
    }

    fn is_current_discovery(&self, generation: u64) -> bool {
        matches!(&self.discovery, DiscoverySlot::Fetching(flight) if flight.generation == generation)
    }

    /// Drops the oldest ready snapshots until at most `max` remain.
    fn evict_over(&mut self, max: usize) {
        loop {
            let ready: Vec<(&ScopeKey, Instant)> = self
                .slots
                .iter()
                .filter_map(|(k, slot)| match slot {
                    Slot::Ready(s) => Some((k, s.fetched_at)),
                    Slot::Fetching(_) => None,
                })
                .collect();
            if ready.len() <= max {
                return;
            }
            let Some(oldest) = ready.iter().min_by_key(|(_, at)| *at).map(|(k, _)| (*k).clone()) else {
                return;
            };
            debug!("ListingCache evict [{oldest}]");
            self.slots.remove(&oldest);
        }
    }
}

/// Runs `leave` when dropped, unless disarmed.
struct LeaveGuard<F: FnOnce()>(Option<F>);

impl<F: FnOnce()> Drop for LeaveGuard<F> {
    fn drop(&mut self) {
        if let Some(leave) = self.0.take() {
            leave();
        }
    }
}

/// Waits for `fetch` or for `token`, whichever comes first. `leave` runs if the caller stops
/// waiting before the fetch resolves, including when this future is dropped.
async fn wait_for<T: Clone>(
    fetch: SharedFetch<T>,
    token: &CancellationToken,
    leave: impl FnOnce(),
) -> Result<T, EngineError> {
    let mut guard = LeaveGuard(Some(leave));
    let result = tokio::select! {
        biased;
        _ = token.cancelled() => return Err(EngineError::cancelled()),
        result = fetch => result,
    };
    guard.0 = None;
    result
}

/// Runs `fut` as its own task so it makes progress whether or not anyone is polling it.
fn spawn_shared<T>(what: &'static str, fut: BoxFuture<'static, Result<T, EngineError>>) -> SharedFetch<T>
where
    T: Clone + Send + Sync + 'static,
{
    let handle = tokio::spawn(fut);
    async move {
        handle
            .await
            .unwrap_or_else(|e| Err(EngineError::new(ErrorCode::Unknown, format!("{what} task failed: {e}"))))
    }
    .boxed()
    .shared()
}

struct CacheInner {
    state: Mutex<CacheState>,
    listing_ttl: Duration,
    discovery_ttl: Duration,
    max_entries: usize,
}

/// Cheap to clone; clones share the same cache.
#[derive(Clone)]
pub struct ListingCache {
    inner: Arc<CacheInner>,
}

impl ListingCache {
    pub fn new(listing_ttl: Duration, discovery_ttl: Duration, max_entries: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    slots: HashMap::new(),
                    discovery: DiscoverySlot::Empty,
                    next_generation: 0,
                }),
                listing_ttl,
                discovery_ttl,
                max_entries: max_entries.max(1),
            }),
        }
    }

    pub fn listing_ttl(&self) -> Duration {
        self.inner.listing_ttl
    }

    /// Returns the fresh snapshot for `key`, joins an in-flight fetch, or starts `fetch`.
    ///
    /// `fetch` gets the cache's own token for the shared fetch. If `token` is cancelled this
    /// caller gets `Cancelled` right away; other callers waiting on the same fetch still get its
    /// result.
    pub async fn get_or_fetch<F>(
        &self,
        key: ScopeKey,
        token: &CancellationToken,
        fetch: F,
    ) -> Result<Arc<ListingSnapshot>, EngineError>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<Vec<Entry>, EngineError>>,
    {
        if token.is_cancelled() {
            return Err(EngineError::cancelled());
        }
        let (shared, generation) = {
            let mut state = self.inner.state.lock_ignore_poison();
            match state.slots.get_mut(&key) {
                Some(Slot::Ready(snapshot)) if snapshot.is_fresh(Instant::now()) => {
                    debug!("ListingCache hit [{key}]: {} entries", snapshot.entries.len());
                    return Ok(Arc::clone(snapshot));
                }
                Some(Slot::Fetching(flight)) => {
                    debug!("ListingCache join [{key}]");
                    (flight.join(), flight.generation)
                }
                _ => {
                    let generation = state.next_generation();
                    debug!("ListingCache miss [{key}]: fetching (gen {generation})");
                    let cancel = CancellationToken::new();
                    let shared = self.start_fetch(key.clone(), generation, fetch(cancel.clone()));
                    let mut flight = InFlight::new(generation, shared, cancel);
                    let joined = flight.join();
                    state.slots.insert(key.clone(), Slot::Fetching(flight));
                    (joined, generation)
                }
            }
        };
        let inner = Arc::clone(&self.inner);
        wait_for(shared, token, move || {
            let mut state = inner.state.lock_ignore_poison();
            let abandoned = match state.slots.get_mut(&key) {
                Some(Slot::Fetching(flight)) if flight.generation == generation => flight.leave(),
                _ => false,
            };
            if abandoned {
                debug!("ListingCache [{key}]: no callers left, cancelling gen {generation}");
                state.slots.remove(&key);
            }
        })
        .await
    }

    fn start_fetch(
        &self,
        key: ScopeKey,
        generation: u64,
        fetch: BoxFuture<'static, Result<Vec<Entry>, EngineError>>,
    ) -> SharedFetch<Arc<ListingSnapshot>> {
        let inner = Arc::clone(&self.inner);
        spawn_shared(
            "Listing",
            async move {
                let result = fetch.await;
                let mut state = inner.state.lock_ignore_poison();
                let current = state.is_current(&key, generation);
                match result {
                    Ok(entries) => {
                        let snapshot = Arc::new(ListingSnapshot {
                            scope_key: key.clone(),
                            fetched_at: Instant::now(),
                            ttl: inner.listing_ttl,
                            entries,
                        });
                        if current {
                            state.slots.insert(key, Slot::Ready(Arc::clone(&snapshot)));
                            state.evict_over(inner.max_entries);
                        } else {
                            debug!("ListingCache [{key}]: gen {generation} superseded, not storing");
                        }
                        Ok(snapshot)
                    }
                    Err(e) => {
                        if current {
                            state.slots.remove(&key);
                        }
                        Err(e)
                    }
                }
            }
            .boxed(),
        )
    }

    /// Fresh snapshot for `key`, without fetching.
    pub fn peek(&self, key: &ScopeKey) -> Option<Arc<ListingSnapshot>> {
        let state = self.inner.state.lock_ignore_poison();
        match state.slots.get(key) {
            Some(Slot::Ready(snapshot)) if snapshot.is_fresh(Instant::now()) => Some(Arc::clone(snapshot)),
            _ => None,
        }
    }

    pub fn invalidate(&self, key: &ScopeKey) {
        let mut state = self.inner.state.lock_ignore_poison();
        if state.slots.remove(key).is_some() {
            debug!("ListingCache invalidate [{key}]");
        }
    }

    /// Drops both the hidden-inclusive and hidden-exclusive snapshots of `folder`.
    pub fn invalidate_folder(&self, folder: &PathRef) {
        for include_hidden in [false, true] {
            self.invalidate(&ScopeKey::for_folder(folder, include_hidden));
        }
    }

    /// Drops every cloud listing and the remote discovery result.
    pub fn invalidate_all_remotes(&self) {
        let mut state = self.inner.state.lock_ignore_poison();
        state.slots.retain(|key, _| !key.is_cloud());
        state.discovery = DiscoverySlot::Empty;
        debug!("ListingCache: dropped all remote listings and discovery");
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock_ignore_poison().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Like [`Self::get_or_fetch`] for the list of remotes, with its own longer TTL.
    pub async fn get_or_fetch_remotes<F>(
        &self,
        token: &CancellationToken,
        fetch: F,
    ) -> Result<Arc<RemoteDiscovery>, EngineError>
    where
        F: FnOnce(CancellationToken) -> BoxFuture<'static, Result<Vec<RemoteInfo>, EngineError>>,
    {
        if token.is_cancelled() {
            return Err(EngineError::cancelled());
        }
        let (shared, generation) = {
            let mut state = self.inner.state.lock_ignore_poison();
            match &mut state.discovery {
                DiscoverySlot::Ready(d) if d.is_fresh(Instant::now()) => return Ok(Arc::clone(d)),
                DiscoverySlot::Fetching(flight) => (flight.join(), flight.generation),
                _ => {
                    let generation = state.next_generation();
                    let cancel = CancellationToken::new();
                    let shared = self.start_discovery(generation, fetch(cancel.clone()));
                    let mut flight = InFlight::new(generation, shared, cancel);
                    let joined = flight.join();
                    state.discovery = DiscoverySlot::Fetching(flight);
                    (joined, generation)
                }
            }
        };
        let inner = Arc::clone(&self.inner);
        wait_for(shared, token, move || {
            let mut state = inner.state.lock_ignore_poison();
            let abandoned = match &mut state.discovery {
                DiscoverySlot::Fetching(flight) if flight.generation == generation => flight.leave(),
                _ => false,
            };
            if abandoned {
                debug!("ListingCache discovery: no callers left, cancelling gen {generation}");
                state.discovery = DiscoverySlot::Empty;
            }
        })
        .await
    }

    fn start_discovery(
        &self,
        generation: u64,
        fetch: BoxFuture<'static, Result<Vec<RemoteInfo>, EngineError>>,
    ) -> SharedFetch<Arc<RemoteDiscovery>> {
        let inner = Arc::clone(&self.inner);
        spawn_shared(
            "Remote discovery",
            async move {
                let result = fetch.await;
                let mut state = inner.state.lock_ignore_poison();
                let current = state.is_current_discovery(generation);
                match result {
                    Ok(remotes) => {
                        let discovery = Arc::new(RemoteDiscovery {
                            remotes,
                            fetched_at: Instant::now(),
                            ttl: inner.discovery_ttl,
                        });
                        if current {
                            state.discovery = DiscoverySlot::Ready(Arc::clone(&discovery));
                        }
                        Ok(discovery)
                    }
                    Err(e) => {
                        if current {
                            state.discovery = DiscoverySlot::Empty;
                        }
                        Err(e)
                    }
                }
            }
            .boxed(),
        )
    }
}
