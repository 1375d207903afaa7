//! Undo for local file operations.
//!
//! A successful local write records one [`UndoRecord`] per item, all sharing the batch id of the
//! gesture that produced them. Replaying applies the inverses newest first and keeps going past
//! failures, so every record reports its own outcome. Cloud operations are never recorded.
//!
//! The stack is bounded. Evicting a record also deletes the backups only it could restore.

mod actions;


pub use actions::InverseAction;

use crate::errors::{EngineError, ErrorCode};
use crate::ignore_poison::IgnorePoison;
use crate::local;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

pub type OpId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "code", rename_all = "snake_case")]
pub enum UndoStatus {
    Pending,
    Applied,
    Failed(ErrorCode),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoRecord {
    pub op_id: OpId,
    /// Shared by all records of one user gesture (a paste, a multi-delete).
    pub batch_id: String,
    pub description: String,
    pub inverse: InverseAction,
    /// Unix milliseconds.
    pub created_at: i64,
    pub status: UndoStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoOutcome {
    pub op_id: OpId,
    pub status: UndoStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<EngineError>,
    /// Paths the replay changed, so callers can refresh their folders.
    pub touched: Vec<PathBuf>,
}

pub struct UndoEngine {
    stack: Mutex<VecDeque<UndoRecord>>,
    depth: usize,
    backup_dir: PathBuf,
    /// Serializes replays. Recording doesn't wait on it.
    replay: tokio::sync::Mutex<()>,
}

impl UndoEngine {
    pub fn new(depth: usize, backup_dir: PathBuf) -> Self {
        Self {
            stack: Mutex::new(VecDeque::new()),
            depth: depth.max(1),
            backup_dir,
            replay: tokio::sync::Mutex::new(()),
        }
    }

    /// Where overwritten and deleted items are parked so they can be restored.
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    pub fn record(&self, batch_id: &str, description: impl Into<String>, inverse: InverseAction) -> OpId {
        let op_id = Uuid::new_v4().to_string();
        let record = UndoRecord {
            op_id: op_id.clone(),
            batch_id: batch_id.to_string(),
            description: description.into(),
            inverse,
            created_at: Utc::now().timestamp_millis(),
            status: UndoStatus::Pending,
        };
        let evicted: Vec<UndoRecord> = {
            let mut stack = self.stack.lock_ignore_poison();
            stack.push_back(record);
            let excess = stack.len().saturating_sub(self.depth);
            stack.drain(..excess).collect()
        };
        if !evicted.is_empty() {
            info!("Undo: evicted {} oldest record(s)", evicted.len());
            discard_backups_in_background(&evicted);
        }
        op_id
    }

    /// Snapshot of the stack, oldest first.
    pub fn history(&self) -> Vec<UndoRecord> {
        self.stack.lock_ignore_poison().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.stack.lock_ignore_poison().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Op ids of the most recent batch.
    pub fn last_batch_ids(&self) -> Vec<OpId> {
        let stack = self.stack.lock_ignore_poison();
        let Some(batch_id) = stack.back().map(|r| r.batch_id.clone()) else {
            return Vec::new();
        };
        stack
            .iter()
            .filter(|r| r.batch_id == batch_id)
            .map(|r| r.op_id.clone())
            .collect()
    }

    /// Forgets every record and deletes their backups.
    pub fn clear(&self) {
        let dropped: Vec<UndoRecord> = self.stack.lock_ignore_poison().drain(..).collect();
        discard_backups_in_background(&dropped);
    }

    /// Replays the inverses of `op_ids`, newest first. Replayed records leave the stack whether
    /// they applied or not. Ids that aren't on the stack come back as `Failed(NotFound)`.
    pub async fn undo(&self, op_ids: &[OpId]) -> Vec<UndoOutcome> {
        let _replay = self.replay.lock().await;
        let wanted: HashSet<&OpId> = op_ids.iter().collect();
        let taken = {
            let mut stack = self.stack.lock_ignore_poison();
            let mut taken = Vec::new();
            let mut kept = VecDeque::with_capacity(stack.len());
            while let Some(record) = stack.pop_back() {
                if wanted.contains(&record.op_id) {
                    taken.push(record);
                } else {
                    kept.push_front(record);
                }
            }
            *stack = kept;
            taken
        };

        let mut outcomes: Vec<UndoOutcome> = op_ids
            .iter()
            .filter(|id| !taken.iter().any(|r| &r.op_id == *id))
            .map(|id| UndoOutcome {
                op_id: id.clone(),
                status: UndoStatus::Failed(ErrorCode::NotFound),
                error: Some(EngineError::new(ErrorCode::NotFound, "Nothing to undo for this operation")),
                touched: Vec::new(),
            })
            .collect();
        if taken.is_empty() {
            return outcomes;
        }

        let pending: Vec<(OpId, Vec<PathBuf>)> = taken
            .iter()
            .map(|r| (r.op_id.clone(), r.inverse.touched_paths()))
            .collect();
        let replayed = tokio::task::spawn_blocking(move || taken.into_iter().map(replay_one).collect::<Vec<_>>())
            .await
            .unwrap_or_else(|e| {
                warn!("Undo: replay task failed: {e}");
                replay_lost(pending)
            });
        let applied = replayed.iter().filter(|o| o.status == UndoStatus::Applied).count();
        info!("Undo: {} of {} record(s) applied", applied, replayed.len());
        outcomes.splice(0..0, replayed);
        outcomes
    }

    /// Undoes the most recent batch.
    pub async fn undo_last(&self) -> Vec<UndoOutcome> {
        let ids = self.last_batch_ids();
        if ids.is_empty() {
            return Vec::new();
        }
        self.undo(&ids).await
    }
}

fn replay_one(record: UndoRecord) -> UndoOutcome {
    let touched = record.inverse.touched_paths();
    match record.inverse.apply() {
        Ok(()) => UndoOutcome {
            op_id: record.op_id,
            status: UndoStatus::Applied,
            error: None,
            touched,
        },
        Err(e) => {
            warn!("Undo [{}] {}: {}", record.op_id, record.description, e);
            let backups = record.inverse.backups();
            if !backups.is_empty() {
                warn!("Undo [{}]: backups kept at {:?}", record.op_id, backups);
            }
            UndoOutcome {
                op_id: record.op_id,
                status: UndoStatus::Failed(e.code),
                error: Some(e),
                touched,
            }
        }
    }
}

/// Outcomes for records whose replay died midway. Any of them may be partly applied.
fn replay_lost(pending: Vec<(OpId, Vec<PathBuf>)>) -> Vec<UndoOutcome> {
    pending
        .into_iter()
        .map(|(op_id, touched)| UndoOutcome {
            op_id,
            status: UndoStatus::Failed(ErrorCode::Unknown),
            error: Some(EngineError::new(ErrorCode::Unknown, "Undo stopped unexpectedly")),
            touched,
        })
        .collect()
}

/// Deletes the backups of `records` on a separate thread.
fn discard_backups_in_background(records: &[UndoRecord]) {
    let backups: Vec<PathBuf> = records.iter().flat_map(|r| r.inverse.backups()).collect();
    if backups.is_empty() {
        return;
    }
    std::thread::spawn(move || {
        for backup in backups {
            local::discard_backup(&backup);
        }
    });
}
