//! Folder listings for local and cloud paths, cached and refreshed in the background.

mod cache;
mod refresh;

#[cfg(test)]
mod refresh_test;

pub use cache::ListingCache;
pub use refresh::{RefreshCoordinator, RefreshRequest};

use crate::cloud::{CloudGateway, RemoteInfo};
use crate::entry::{Entry, is_hidden_name};
use crate::errors::EngineError;
use crate::local;
use crate::names::{NameMatcher, local_matcher, matcher_for_kind};
use crate::path_ref::PathRef;
use futures_util::FutureExt;
use log::warn;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Identifies one cached listing: which storage, which folder, and whether hidden entries count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    /// `"local"` or the remote name.
    pub scope: String,
    pub folder: PathRef,
    pub include_hidden: bool,
}

impl ScopeKey {
    pub fn for_folder(folder: &PathRef, include_hidden: bool) -> Self {
        Self {
            scope: folder.scope().to_string(),
            folder: folder.clone(),
            include_hidden,
        }
    }

    pub fn is_cloud(&self) -> bool {
        self.folder.is_cloud()
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.folder, if self.include_hidden { " +hidden" } else { "" })
    }
}

/// An immutable listing as fetched at `fetched_at`.
#[derive(Debug, Clone)]
pub struct ListingSnapshot {
    pub scope_key: ScopeKey,
    pub fetched_at: Instant,
    pub ttl: Duration,
    pub entries: Vec<Entry>,
}

impl ListingSnapshot {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    pub fn find(&self, name: &str, matcher: &dyn NameMatcher) -> Option<&Entry> {
        let key = matcher.key(name);
        self.entries.iter().find(|e| matcher.key(&e.name) == key)
    }
}

#[derive(Debug, Clone)]
pub struct RemoteDiscovery {
    pub remotes: Vec<RemoteInfo>,
    pub fetched_at: Instant,
    pub ttl: Duration,
}

impl RemoteDiscovery {
    pub fn is_fresh(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.fetched_at) < self.ttl
    }

    pub fn kind_of(&self, remote: &str) -> Option<&str> {
        self.remotes
            .iter()
            .find(|r| r.name == remote)
            .map(|r| r.kind.as_str())
    }
}

/// Reads folders through the cache. Local folders are read on the blocking pool, cloud folders
/// through the gateway.
pub struct Lister {
    cache: ListingCache,
    gateway: Arc<CloudGateway>,
}

impl Lister {
    pub fn new(cache: ListingCache, gateway: Arc<CloudGateway>) -> Self {
        Self { cache, gateway }
    }

    pub fn cache(&self) -> &ListingCache {
        &self.cache
    }

    pub fn gateway(&self) -> &Arc<CloudGateway> {
        &self.gateway
    }

    /// Cached listing of `folder`, fetching it if missing or stale.
    pub async fn list_folder(
        &self,
        folder: &PathRef,
        include_hidden: bool,
        token: &CancellationToken,
    ) -> Result<Arc<ListingSnapshot>, EngineError> {
        let key = ScopeKey::for_folder(folder, include_hidden);
        let gateway = Arc::clone(&self.gateway);
        let folder = folder.clone();
        self.cache
            .get_or_fetch(key, token, move |fetch_token| {
                async move { fetch_entries(&gateway, &folder, include_hidden, &fetch_token).await }.boxed()
            })
            .await
    }

    /// Configured remotes, cached with the discovery TTL.
    pub async fn list_remotes(&self, token: &CancellationToken) -> Result<Arc<RemoteDiscovery>, EngineError> {
        let gateway = Arc::clone(&self.gateway);
        self.cache
            .get_or_fetch_remotes(token, move |fetch_token| {
                async move { gateway.list_remotes(&fetch_token).await }.boxed()
            })
            .await
    }

    /// Name-collision rules for entries in `folder`. Unknown remotes and discovery failures fall
    /// back to case-sensitive matching.
    pub async fn matcher_for(&self, folder: &PathRef, token: &CancellationToken) -> &'static dyn NameMatcher {
        let Some(remote) = folder.remote() else {
            return local_matcher();
        };
        match self.list_remotes(token).await {
            Ok(discovery) => matcher_for_kind(discovery.kind_of(remote).unwrap_or("")),
            Err(e) => {
                warn!("Lister matcher [{remote}]: remote discovery failed ({e}), assuming case-sensitive names");
                matcher_for_kind("")
            }
        }
    }
}

/// Fetches a folder without the cache.
pub async fn fetch_entries(
    gateway: &CloudGateway,
    folder: &PathRef,
    include_hidden: bool,
    token: &CancellationToken,
) -> Result<Vec<Entry>, EngineError> {
    match folder {
        PathRef::Local(path) => {
            let path = path.clone();
            local::run_blocking("Listing", move || local::read_folder(&path, include_hidden)).await
        }
        PathRef::Cloud { .. } => {
            let raw = gateway.list(folder, token).await?;
            let mut entries: Vec<Entry> = raw
                .into_iter()
                .filter(|r| include_hidden || !is_hidden_name(&r.name))
                .map(|r| Entry::from_raw(folder, r))
                .collect();
            local::sort_entries(&mut entries);
            Ok(entries)
        }
    }
}
