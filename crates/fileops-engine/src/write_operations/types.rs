//! Type definitions for transfers: policies, plans and results.

use crate::errors::EngineError;
use crate::path_ref::PathRef;
use crate::undo::OpId;
use serde::{Deserialize, Serialize};

// ============================================================================
// Operation types
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    Copy,
    Move,
}

impl TransferMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Copy => "copy",
            Self::Move => "move",
        }
    }
}

/// Which storage the source and destination of one item live on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    LocalToLocal,
    LocalToCloud,
    CloudToLocal,
    CloudToCloud,
}

impl Lane {
    pub fn of(source: &PathRef, target: &PathRef) -> Self {
        match (source.is_local(), target.is_local()) {
            (true, true) => Self::LocalToLocal,
            (true, false) => Self::LocalToCloud,
            (false, true) => Self::CloudToLocal,
            (false, false) => Self::CloudToCloud,
        }
    }
}

// ============================================================================
// Conflict resolution
// ============================================================================

/// How to handle a name that already exists in the destination.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Replace the existing item. Folders onto folders merge.
    Overwrite,
    /// Pick a free `name-N.ext`.
    #[default]
    Rename,
    /// Fail the item with `AlreadyExists`.
    StopOnConflict,
}

/// One planned item: where a source will land and whether that name is taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictItem {
    pub source: PathRef,
    pub proposed_target: PathRef,
    /// The plain target name was taken (by an existing entry, the source itself, or an earlier
    /// item of the same batch).
    pub exists: bool,
    /// Whether the source is a folder.
    pub is_dir: bool,
    /// Whether the existing entry at the plain target is a folder.
    #[serde(default)]
    pub existing_is_dir: bool,
}

impl ConflictItem {
    /// True if the item keeps its own name and that name is already taken at the destination.
    pub fn collides(&self) -> bool {
        self.exists && self.proposed_target.name() == self.source.name()
    }
}

/// An ordered, fully-resolved transfer. Consumed once by the transfer engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferPlan {
    pub operation_id: String,
    pub mode: TransferMode,
    pub policy: ConflictPolicy,
    pub items: Vec<ConflictItem>,
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferredItem {
    pub source: PathRef,
    pub target: PathRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_id: Option<OpId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedItem {
    pub source: PathRef,
    pub target: PathRef,
    pub error: EngineError,
}

/// Per-item outcome of a transfer. Items after the first failure are `skipped`, not attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferResult {
    pub operation_id: String,
    pub mode: TransferMode,
    pub succeeded: Vec<TransferredItem>,
    pub failed: Vec<FailedItem>,
    pub skipped: Vec<PathRef>,
    pub cancelled: bool,
}

impl TransferResult {
    pub fn undo_ids(&self) -> Vec<OpId> {
        self.succeeded.iter().filter_map(|item| item.undo_id.clone()).collect()
    }

    pub fn is_complete_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }
}

/// Outcome of deleting a selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub operation_id: String,
    pub deleted: Vec<PathRef>,
    pub failed: Vec<(PathRef, EngineError)>,
    pub skipped: Vec<PathRef>,
    pub undo_ids: Vec<OpId>,
}
