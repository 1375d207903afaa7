//! The engine facade the UI talks to.
//!
//! [`FileOpsEngine`] wires the cache, gateway, refresh coordinator, undo stack, transfers and
//! search together from one [`EngineSettings`], and adds the single-item operations (rename,
//! new folder, delete). Every method takes typed paths and returns [`EngineError`]s.

use crate::cloud::{CloudGateway, CloudProvider, RcloneCli, RemoteInfo, RetryPolicy};
use crate::errors::EngineError;
use crate::events::EventSink;
use crate::listing::{Lister, ListingCache, ListingSnapshot, RefreshCoordinator};
use crate::local;
use crate::path_ref::PathRef;
use crate::search::{SearchResult, Searcher};
use crate::settings::EngineSettings;
use crate::undo::{InverseAction, OpId, UndoEngine, UndoOutcome, UndoRecord};
use crate::write_operations::{
    ConflictItem, ConflictPolicy, ConflictResolver, DeleteResult, TransferEngine, TransferMode, TransferPlan,
    TransferResult, ensure_single_storage,
};
use log::{debug, info, warn};
use serde::Serialize;
use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Result of a rename or a new folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemResult {
    pub path: PathRef,
    /// Set for local operations, which can be undone.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_id: Option<OpId>,
}

pub struct FileOpsEngine {
    settings: EngineSettings,
    lister: Arc<Lister>,
    refresh: RefreshCoordinator,
    undo: Arc<UndoEngine>,
    resolver: ConflictResolver,
    transfers: TransferEngine,
    searcher: Searcher,
}

/// Checks a single name typed by the user.
pub fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::unsupported("Name can't be empty"));
    }
    if name.contains('/') || name.contains('\0') {
        return Err(EngineError::unsupported(format!("'{name}' contains invalid characters")));
    }
    if name == "." || name == ".." {
        return Err(EngineError::unsupported(format!("'{name}' isn't a valid name")));
    }
    Ok(())
}

fn parent_of(path: &PathRef) -> Result<PathRef, EngineError> {
    path.parent()
        .ok_or_else(|| EngineError::unsupported("Can't change a root folder").with_path(path))
}

impl FileOpsEngine {
    pub fn new(settings: EngineSettings, provider: Arc<dyn CloudProvider>, sink: Arc<dyn EventSink>) -> Self {
        let gateway = Arc::new(CloudGateway::new(
            provider,
            settings.max_concurrent_per_remote,
            RetryPolicy::new(settings.retry_attempts, settings.retry_backoff()),
        ));
        let cache = ListingCache::new(settings.listing_ttl(), settings.discovery_ttl(), settings.cache_max_entries);
        let lister = Arc::new(Lister::new(cache, Arc::clone(&gateway)));
        let refresh = RefreshCoordinator::new(
            Arc::clone(&lister),
            Arc::clone(&sink),
            settings.refresh_debounce(),
            settings.refresh_timeout(),
        );
        let undo = Arc::new(UndoEngine::new(settings.undo_depth, settings.resolved_undo_dir()));
        info!(
            "FileOpsEngine init [{}]: undo dir {}",
            gateway.provider_name(),
            undo.backup_dir().display()
        );
        Self {
            resolver: ConflictResolver::new(Arc::clone(&lister)),
            transfers: TransferEngine::new(
                Arc::clone(&lister),
                refresh.clone(),
                Arc::clone(&undo),
                Arc::clone(&sink),
                settings.show_hidden_files,
            ),
            searcher: Searcher::new(
                gateway,
                sink,
                settings.search_progress_every,
                settings.show_hidden_files,
            ),
            settings,
            lister,
            refresh,
            undo,
        }
    }

    /// An engine whose cloud side is the `rclone` binary named in the settings.
    pub fn with_rclone(settings: EngineSettings, sink: Arc<dyn EventSink>) -> Self {
        let rclone = RcloneCli::new(settings.rclone_binary.clone(), settings.provider_timeout());
        Self::new(settings, Arc::new(rclone), sink)
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    // ========================================================================
    // Listing
    // ========================================================================

    pub async fn list_folder(
        &self,
        folder: &PathRef,
        token: &CancellationToken,
    ) -> Result<Arc<ListingSnapshot>, EngineError> {
        self.lister
            .list_folder(folder, self.settings.show_hidden_files, token)
            .await
    }

    /// The user left `folder`: drop any refresh still pending for it.
    pub fn navigate_away(&self, folder: &PathRef) {
        self.refresh.cancel_folder(folder);
    }

    pub async fn list_remotes(&self, token: &CancellationToken) -> Result<Vec<RemoteInfo>, EngineError> {
        Ok(self.lister.list_remotes(token).await?.remotes.clone())
    }

    /// Forgets remote discovery and every cloud listing, so the next reads hit the provider.
    pub fn refresh_network(&self) {
        info!("FileOpsEngine refresh_network: dropping cloud listings");
        self.lister.cache().invalidate_all_remotes();
    }

    // ========================================================================
    // Transfers
    // ========================================================================

    pub async fn preview_conflicts(
        &self,
        sources: &[PathRef],
        dest_dir: &PathRef,
        token: &CancellationToken,
    ) -> Result<Vec<ConflictItem>, EngineError> {
        self.resolver.preview(sources, dest_dir, token).await
    }

    /// Resolves target names for a copy or move. `policy` defaults to the configured one.
    pub async fn plan_transfer(
        &self,
        sources: &[PathRef],
        dest_dir: &PathRef,
        mode: TransferMode,
        policy: Option<ConflictPolicy>,
        token: &CancellationToken,
    ) -> Result<TransferPlan, EngineError> {
        let policy = policy.unwrap_or(self.settings.default_conflict_policy);
        let items = self.resolver.resolve(sources, dest_dir, policy, token).await?;
        Ok(TransferPlan {
            operation_id: Uuid::new_v4().to_string(),
            mode,
            policy,
            items,
        })
    }

    pub async fn execute_transfer(
        &self,
        plan: TransferPlan,
        token: &CancellationToken,
    ) -> Result<TransferResult, EngineError> {
        self.transfers.execute(plan, token).await
    }

    // ========================================================================
    // Single-item operations
    // ========================================================================

    /// Renames `path` within its folder. Fails with `AlreadyExists` if another item has the
    /// name; a case-only rename of the same item is allowed.
    pub async fn rename(&self, path: &PathRef, new_name: &str) -> Result<ItemResult, EngineError> {
        validate_name(new_name)?;
        let parent = parent_of(path)?;
        let target = parent.join(new_name);
        if target == *path {
            return Ok(ItemResult {
                path: target,
                undo_id: None,
            });
        }

        let undo_id = match (path, &target) {
            (PathRef::Local(src), PathRef::Local(dst)) => {
                let (src, dst) = (src.clone(), dst.clone());
                let inverse = local::run_blocking("Rename", move || {
                    local::rename_in_place(&src, &dst)?;
                    InverseAction::move_back(&dst, &src)
                })
                .await?;
                let description = format!("Rename {path} to {new_name}");
                Some(self.undo.record(&Uuid::new_v4().to_string(), description, inverse))
            }
            _ => {
                let token = CancellationToken::new();
                let listing = self.lister.list_folder(&parent, true, &token).await?;
                let matcher = self.lister.matcher_for(&parent, &token).await;
                let old_name = path.name().unwrap_or_default();
                let source = listing
                    .find(&old_name, matcher)
                    .ok_or_else(|| EngineError::not_found(path))?;
                let is_dir = source.is_dir();
                if let Some(existing) = listing.find(new_name, matcher)
                    && existing.name != old_name
                {
                    return Err(EngineError::already_exists(&target));
                }
                self.lister.gateway().move_item(path, &target, is_dir).await?;
                None
            }
        };

        info!("FileOpsEngine rename [{path}]: now {new_name}");
        self.after_write([parent]);
        Ok(ItemResult { path: target, undo_id })
    }

    /// Creates `name` inside `parent`.
    pub async fn create_folder(&self, parent: &PathRef, name: &str) -> Result<ItemResult, EngineError> {
        validate_name(name)?;
        let path = parent.join(name);

        let undo_id = match &path {
            PathRef::Local(dir) => {
                let dir = dir.clone();
                let inverse = local::run_blocking("New folder", move || {
                    fs::create_dir(&dir).map_err(|e| EngineError::from_io(&e, dir.display()))?;
                    InverseAction::remove_empty_dir(&dir)
                })
                .await?;
                Some(self.undo.record(&Uuid::new_v4().to_string(), format!("New folder {path}"), inverse))
            }
            PathRef::Cloud { .. } => {
                let token = CancellationToken::new();
                let listing = self.lister.list_folder(parent, true, &token).await?;
                let matcher = self.lister.matcher_for(parent, &token).await;
                if listing.find(name, matcher).is_some() {
                    return Err(EngineError::already_exists(&path));
                }
                self.lister.gateway().mkdir(&path).await?;
                None
            }
        };

        info!("FileOpsEngine create_folder [{path}]");
        self.after_write([parent.clone()]);
        Ok(ItemResult { path, undo_id })
    }

    /// Deletes `paths` in order, stopping at the first failure. Local items go to the undo
    /// backup folder so they can be restored; cloud deletes are permanent.
    pub async fn delete(&self, paths: &[PathRef], token: &CancellationToken) -> Result<DeleteResult, EngineError> {
        ensure_single_storage(paths)?;
        let operation_id = Uuid::new_v4().to_string();
        let mut result = DeleteResult {
            operation_id: operation_id.clone(),
            deleted: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            undo_ids: Vec::new(),
        };
        let mut touched = Vec::new();

        for (index, path) in paths.iter().enumerate() {
            if token.is_cancelled() || !result.failed.is_empty() {
                result.skipped.extend(paths[index..].iter().cloned());
                break;
            }
            let outcome = self.delete_one(path, &operation_id, token).await;
            if let Some(parent) = path.parent() {
                touched.push(parent);
            }
            match outcome {
                Ok(undo_id) => {
                    result.undo_ids.extend(undo_id);
                    result.deleted.push(path.clone());
                }
                Err(e) => {
                    warn!("FileOpsEngine delete [{path}]: {e}");
                    result.failed.push((path.clone(), e));
                }
            }
        }

        info!(
            "FileOpsEngine delete [{operation_id}]: {} deleted, {} failed, {} skipped",
            result.deleted.len(),
            result.failed.len(),
            result.skipped.len()
        );
        self.after_write(touched);
        Ok(result)
    }

    async fn delete_one(
        &self,
        path: &PathRef,
        operation_id: &str,
        token: &CancellationToken,
    ) -> Result<Option<OpId>, EngineError> {
        parent_of(path)?;
        match path {
            PathRef::Local(item) => {
                let (item, backup_dir) = (item.clone(), self.undo.backup_dir().to_path_buf());
                let inverse = local::run_blocking("Delete", move || {
                    let backup = local::move_to_backup(&item, &backup_dir)?;
                    Ok(InverseAction::Restore { backup, to: item })
                })
                .await?;
                Ok(Some(self.undo.record(operation_id, format!("Delete {path}"), inverse)))
            }
            PathRef::Cloud { .. } => {
                let is_dir = self.lister.gateway().stat(path, token).await?.is_dir;
                self.lister.gateway().delete(path, is_dir).await?;
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Undo
    // ========================================================================

    pub async fn undo(&self, op_ids: &[OpId]) -> Vec<UndoOutcome> {
        let outcomes = self.undo.undo(op_ids).await;
        self.after_undo(&outcomes);
        outcomes
    }

    pub async fn undo_last(&self) -> Vec<UndoOutcome> {
        let outcomes = self.undo.undo_last().await;
        self.after_undo(&outcomes);
        outcomes
    }

    /// Copy of the undo stack, oldest first.
    pub fn undo_history(&self) -> Vec<UndoRecord> {
        self.undo.history()
    }

    fn after_undo(&self, outcomes: &[UndoOutcome]) {
        let folders: Vec<PathRef> = outcomes
            .iter()
            .flat_map(|o| o.touched.iter())
            .filter_map(|p| p.parent().map(PathBuf::from))
            .map(PathRef::Local)
            .collect();
        self.after_write(folders);
    }

    // ========================================================================
    // Search
    // ========================================================================

    pub async fn search(
        &self,
        query: &str,
        scope: &PathRef,
        token: &CancellationToken,
    ) -> Result<SearchResult, EngineError> {
        self.searcher.search(query, scope, token).await
    }

    /// Drops cached listings of `folders` and schedules background refreshes for them.
    fn after_write(&self, folders: impl IntoIterator<Item = PathRef>) {
        let mut seen = HashSet::new();
        for folder in folders {
            if !seen.insert(folder.clone()) {
                continue;
            }
            self.lister.cache().invalidate_folder(&folder);
            self.refresh.request(&folder, self.settings.show_hidden_files);
            debug!("FileOpsEngine after_write [{folder}]: invalidated");
        }
    }
}
