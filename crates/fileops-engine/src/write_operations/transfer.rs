//! Executes a resolved transfer plan.
//!
//! Items run in plan order and the batch stops at the first failure; the remaining items are
//! reported as skipped. Each item is routed by where its source and target live:
//!
//! - local to local runs on the blocking pool, is recorded for undo, and parks overwritten items
//!   in the undo backup folder
//! - every lane touching the cloud goes through the gateway, as one provider call per item when
//!   the provider can transfer folders, entry by entry otherwise
//!
//! After each attempted item the touched folders are invalidated in the listing cache. Once the
//! batch is done, their refresh is scheduled in the background and never awaited here.

use super::conflict::ensure_single_storage;
use super::types::{
    ConflictItem, ConflictPolicy, FailedItem, Lane, TransferMode, TransferPlan, TransferResult, TransferredItem,
};
use crate::cloud::CloudGateway;
use crate::errors::{EngineError, ErrorCode};
use crate::events::{EngineEvent, EventSink, TransferCompleteEvent, TransferProgressEvent};
use crate::listing::{Lister, RefreshCoordinator};
use crate::local;
use crate::path_ref::PathRef;
use crate::undo::{InverseAction, OpId, UndoEngine};
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use log::{debug, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub struct TransferEngine {
    lister: Arc<Lister>,
    refresh: RefreshCoordinator,
    undo: Arc<UndoEngine>,
    sink: Arc<dyn EventSink>,
    /// Which listing variant post-write refreshes repopulate.
    refresh_hidden: bool,
}

impl TransferEngine {
    pub fn new(
        lister: Arc<Lister>,
        refresh: RefreshCoordinator,
        undo: Arc<UndoEngine>,
        sink: Arc<dyn EventSink>,
        refresh_hidden: bool,
    ) -> Self {
        Self {
            lister,
            refresh,
            undo,
            sink,
            refresh_hidden,
        }
    }

    fn gateway(&self) -> &CloudGateway {
        self.lister.gateway()
    }

    /// Runs `plan`. Fails as a whole only if the plan mixes local and cloud sources; every
    /// other failure is reported per item in the result.
    pub async fn execute(&self, plan: TransferPlan, token: &CancellationToken) -> Result<TransferResult, EngineError> {
        let sources: Vec<PathRef> = plan.items.iter().map(|i| i.source.clone()).collect();
        ensure_single_storage(&sources)?;

        let total = plan.items.len();
        info!(
            "Transfer [{}]: {} {} item(s), policy={:?}",
            plan.operation_id,
            plan.mode.as_str(),
            total,
            plan.policy
        );
        let mut result = TransferResult {
            operation_id: plan.operation_id.clone(),
            mode: plan.mode,
            succeeded: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
        };
        let mut touched: Vec<PathRef> = Vec::new();
        let mut stopped = false;

        for (index, item) in plan.items.into_iter().enumerate() {
            if !stopped && token.is_cancelled() {
                info!("Transfer [{}]: cancelled before item {}", plan.operation_id, index + 1);
                result.cancelled = true;
                stopped = true;
            }
            if stopped {
                result.skipped.push(item.source);
                continue;
            }

            let outcome = self
                .transfer_item(&plan.operation_id, plan.mode, plan.policy, &item, token)
                .await;
            self.invalidate_after(plan.mode, &item, &mut touched);
            match outcome {
                Ok(undo_id) => {
                    debug!("Transfer [{}]: {} -> {}", plan.operation_id, item.source, item.proposed_target);
                    result.succeeded.push(TransferredItem {
                        source: item.source.clone(),
                        target: item.proposed_target.clone(),
                        undo_id,
                    });
                }
                Err(error) => {
                    warn!(
                        "Transfer [{}]: {} failed, skipping the remaining {} item(s): {}",
                        plan.operation_id,
                        item.source,
                        total - index - 1,
                        error
                    );
                    if error.code == ErrorCode::Cancelled && token.is_cancelled() {
                        result.cancelled = true;
                    }
                    result.failed.push(FailedItem {
                        source: item.source.clone(),
                        target: item.proposed_target.clone(),
                        error,
                    });
                    stopped = true;
                }
            }
            self.sink.emit(EngineEvent::TransferProgress(TransferProgressEvent {
                operation_id: plan.operation_id.clone(),
                mode: plan.mode,
                current_item: item.source.name(),
                items_done: index + 1,
                items_total: total,
            }));
        }

        for folder in &touched {
            self.refresh.request(folder, self.refresh_hidden);
        }
        info!(
            "Transfer [{}]: done, {} succeeded, {} failed, {} skipped",
            result.operation_id,
            result.succeeded.len(),
            result.failed.len(),
            result.skipped.len()
        );
        self.sink.emit(EngineEvent::TransferComplete(TransferCompleteEvent {
            operation_id: result.operation_id.clone(),
            mode: result.mode,
            succeeded: result.succeeded.len(),
            failed: result.failed.len(),
            skipped: result.skipped.len(),
            cancelled: result.cancelled,
        }));
        Ok(result)
    }

    async fn transfer_item(
        &self,
        batch_id: &str,
        mode: TransferMode,
        policy: ConflictPolicy,
        item: &ConflictItem,
        token: &CancellationToken,
    ) -> Result<Option<OpId>, EngineError> {
        if item.collides() && policy != ConflictPolicy::Overwrite {
            return Err(EngineError::already_exists(&item.proposed_target));
        }
        let overwrite = item.collides();
        match Lane::of(&item.source, &item.proposed_target) {
            Lane::LocalToLocal => {
                let (Some(src), Some(dst)) = (item.source.as_local(), item.proposed_target.as_local()) else {
                    return Err(EngineError::unsupported("Not a local path").with_path(&item.source));
                };
                let (src, dst) = (src.to_path_buf(), dst.to_path_buf());
                let backup_dir = self.undo.backup_dir().to_path_buf();
                let inverse =
                    local::run_blocking("Transfer", move || transfer_local(&src, &dst, mode, overwrite, &backup_dir))
                        .await?;
                let description = format!("{} {} to {}", mode.as_str(), item.source, item.proposed_target);
                Ok(Some(self.undo.record(batch_id, description, inverse)))
            }
            _ => {
                if item.is_dir && !self.gateway().supports_folder_transfer() {
                    self.transfer_tree(mode, &item.source, &item.proposed_target, token).await?;
                } else {
                    self.transfer_one(mode, &item.source, &item.proposed_target, item.is_dir)
                        .await?;
                }
                Ok(None)
            }
        }
    }

    async fn transfer_one(&self, mode: TransferMode, src: &PathRef, dst: &PathRef, is_dir: bool) -> Result<(), EngineError> {
        match mode {
            TransferMode::Copy => self.gateway().copy(src, dst, is_dir).await,
            TransferMode::Move => self.gateway().move_item(src, dst, is_dir).await,
        }
    }

    /// Transfers a folder entry by entry, for providers that can't take a folder in one call.
    fn transfer_tree<'a>(
        &'a self,
        mode: TransferMode,
        src: &'a PathRef,
        dst: &'a PathRef,
        token: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<(), EngineError>> {
        async move {
            self.make_folder(dst).await?;
            for (name, is_dir) in self.children(src, token).await? {
                if token.is_cancelled() {
                    return Err(EngineError::cancelled());
                }
                let (child_src, child_dst) = (src.join(&name), dst.join(&name));
                if is_dir {
                    self.transfer_tree(mode, &child_src, &child_dst, token).await?;
                } else {
                    self.transfer_one(mode, &child_src, &child_dst, false).await?;
                }
            }
            if mode == TransferMode::Move {
                self.remove_empty_folder(src).await?;
            }
            Ok(())
        }
        .boxed()
    }

    async fn make_folder(&self, folder: &PathRef) -> Result<(), EngineError> {
        match folder {
            PathRef::Local(path) => tokio::fs::create_dir_all(path)
                .await
                .map_err(|e| EngineError::from_io(&e, path.display())),
            PathRef::Cloud { .. } => self.gateway().mkdir(folder).await,
        }
    }

    /// `(name, is_dir)` of every entry in `folder`, fetched fresh.
    async fn children(&self, folder: &PathRef, token: &CancellationToken) -> Result<Vec<(String, bool)>, EngineError> {
        match folder {
            PathRef::Local(path) => {
                let path = path.clone();
                let entries = local::run_blocking("Listing", move || local::read_folder(&path, true)).await?;
                Ok(entries
                    .into_iter()
                    .map(|e| {
                        let is_dir = e.is_dir();
                        (e.name, is_dir)
                    })
                    .collect())
            }
            PathRef::Cloud { .. } => Ok(self
                .gateway()
                .list(folder, token)
                .await?
                .into_iter()
                .map(|raw| (raw.name, raw.is_dir))
                .collect()),
        }
    }

    async fn remove_empty_folder(&self, folder: &PathRef) -> Result<(), EngineError> {
        match folder {
            PathRef::Local(path) => tokio::fs::remove_dir(path)
                .await
                .map_err(|e| EngineError::from_io(&e, path.display())),
            PathRef::Cloud { .. } => self.gateway().rmdir(folder).await,
        }
    }

    /// Drops cached listings the item may have changed and remembers the folders to refresh.
    fn invalidate_after(&self, mode: TransferMode, item: &ConflictItem, touched: &mut Vec<PathRef>) {
        let cache = self.lister.cache();
        let mut folders = vec![item.proposed_target.parent()];
        if mode == TransferMode::Move {
            folders.push(item.source.parent());
            cache.invalidate_folder(&item.source);
        }
        if item.is_dir {
            cache.invalidate_folder(&item.proposed_target);
        }
        for folder in folders.into_iter().flatten() {
            cache.invalidate_folder(&folder);
            if !touched.contains(&folder) {
                touched.push(folder);
            }
        }
    }
}

// ============================================================================
// Local to local
// ============================================================================

/// Copies or moves `src` to `dst` and returns the action that undoes it. When `overwrite` is
/// set, an existing `dst` is merged into (folder onto folder) or moved to the backup folder
/// first. If the item fails halfway, whatever it already did is rolled back.
pub(crate) fn transfer_local(
    src: &Path,
    dst: &Path,
    mode: TransferMode,
    overwrite: bool,
    backup_dir: &Path,
) -> Result<InverseAction, EngineError> {
    let mut inverses = Vec::new();
    let result = transfer_local_steps(src, dst, mode, overwrite, backup_dir, &mut inverses);
    match result {
        Ok(()) => Ok(InverseAction::undoing(inverses)),
        Err(e) => {
            if !inverses.is_empty()
                && let Err(rollback) = InverseAction::undoing(inverses).apply()
            {
                warn!("transfer_local: rollback of {} failed: {}", src.display(), rollback);
            }
            Err(e)
        }
    }
}

fn transfer_local_steps(
    src: &Path,
    dst: &Path,
    mode: TransferMode,
    overwrite: bool,
    backup_dir: &Path,
    inverses: &mut Vec<InverseAction>,
) -> Result<(), EngineError> {
    if overwrite && let Ok(existing) = fs::symlink_metadata(dst) {
        let source = fs::symlink_metadata(src).map_err(|e| EngineError::from_io(&e, src.display()))?;
        if source.is_dir() && existing.is_dir() {
            return merge_dir(src, dst, mode, backup_dir, inverses);
        }
        let backup = local::move_to_backup(dst, backup_dir)?;
        inverses.push(InverseAction::Restore {
            backup,
            to: dst.to_path_buf(),
        });
    }
    place(src, dst, mode, inverses)
}

fn place(src: &Path, dst: &Path, mode: TransferMode, inverses: &mut Vec<InverseAction>) -> Result<(), EngineError> {
    match mode {
        TransferMode::Copy => {
            local::copy_recursive(src, dst)?;
            inverses.push(InverseAction::remove(dst)?);
        }
        TransferMode::Move => {
            local::move_path(src, dst)?;
            inverses.push(InverseAction::move_back(dst, src)?);
        }
    }
    Ok(())
}

/// Merges folder `src` into existing folder `dst`, overwriting clashing entries (with backups)
/// and merging clashing subfolders. A merging move removes the emptied `src` at the end.
fn merge_dir(
    src: &Path,
    dst: &Path,
    mode: TransferMode,
    backup_dir: &Path,
    inverses: &mut Vec<InverseAction>,
) -> Result<(), EngineError> {
    let mut children: Vec<PathBuf> = fs::read_dir(src)
        .map_err(|e| EngineError::from_io(&e, src.display()))?
        .map(|entry| entry.map(|e| e.path()))
        .collect::<Result<_, _>>()
        .map_err(|e| EngineError::from_io(&e, src.display()))?;
    children.sort();

    for child in children {
        let Some(name) = child.file_name() else { continue };
        let target = dst.join(name);
        let child_is_dir = fs::symlink_metadata(&child)
            .map_err(|e| EngineError::from_io(&e, child.display()))?
            .is_dir();
        match fs::symlink_metadata(&target) {
            Ok(existing) if existing.is_dir() && child_is_dir => {
                merge_dir(&child, &target, mode, backup_dir, inverses)?;
            }
            Ok(_) => {
                let backup = local::move_to_backup(&target, backup_dir)?;
                inverses.push(InverseAction::Restore {
                    backup,
                    to: target.clone(),
                });
                place(&child, &target, mode, inverses)?;
            }
            Err(_) => place(&child, &target, mode, inverses)?,
        }
    }

    if mode == TransferMode::Move {
        fs::remove_dir(src).map_err(|e| EngineError::from_io(&e, src.display()))?;
        inverses.push(InverseAction::Recreate { path: src.to_path_buf() });
    }
    Ok(())
}
