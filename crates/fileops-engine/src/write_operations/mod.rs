//! Copy and move across local and cloud storage.
//!
//! A paste or move goes through two steps. [`ConflictResolver`] lists the destination once and
//! decides where every source lands, and [`TransferEngine`] executes that plan item by item.
//! Local-to-local items are undoable; anything touching the cloud isn't.

mod conflict;
mod transfer;
mod types;


pub use conflict::{ConflictResolver, MAX_RENAME_SUFFIX, ensure_single_storage, split_for_suffix, unique_name};
pub use transfer::TransferEngine;
pub use types::{
    ConflictItem, ConflictPolicy, DeleteResult, FailedItem, Lane, TransferMode, TransferPlan, TransferResult,
    TransferredItem,
};
