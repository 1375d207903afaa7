//! Inverse actions and how they're applied.
//!
//! Every step resolves its paths without following symlinks. Steps that act on something the
//! forward operation created first check its [`Fingerprint`], so an undo never lands on an item
//! that was swapped in afterwards.

use crate::errors::{EngineError, ErrorCode};
use crate::local::{self, Fingerprint};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InverseAction {
    /// Undoes a copy or a folder creation.
    Remove { path: PathBuf, fingerprint: Fingerprint },
    /// Undoes a new folder. Refuses once the folder has contents.
    RemoveEmptyDir { path: PathBuf, fingerprint: Fingerprint },
    /// Undoes a move or a rename.
    MoveBack {
        from: PathBuf,
        to: PathBuf,
        fingerprint: Fingerprint,
    },
    /// Undoes an overwrite or a delete by putting the backup back.
    Restore { backup: PathBuf, to: PathBuf },
    /// Recreates a folder that a merging move emptied and removed.
    Recreate { path: PathBuf },
    /// Applied in order, stopping at the first failing step.
    Sequence { steps: Vec<InverseAction> },
}

impl InverseAction {
    /// Captures what `path` is right now, for a later [`InverseAction::Remove`].
    pub fn remove(path: &Path) -> Result<Self, EngineError> {
        Ok(Self::Remove {
            path: path.to_path_buf(),
            fingerprint: Fingerprint::capture(path)?,
        })
    }

    pub fn remove_empty_dir(path: &Path) -> Result<Self, EngineError> {
        Ok(Self::RemoveEmptyDir {
            path: path.to_path_buf(),
            fingerprint: Fingerprint::capture(path)?,
        })
    }

    /// `from` is where the item is now, `to` where it came from.
    pub fn move_back(from: &Path, to: &Path) -> Result<Self, EngineError> {
        Ok(Self::MoveBack {
            from: from.to_path_buf(),
            to: to.to_path_buf(),
            fingerprint: Fingerprint::capture(from)?,
        })
    }

    /// Turns the inverses of forward steps (in the order the steps ran) into one action that
    /// undoes them last-first.
    pub fn undoing(mut inverses: Vec<InverseAction>) -> Self {
        if inverses.len() == 1
            && let Some(only) = inverses.pop()
        {
            return only;
        }
        inverses.reverse();
        Self::Sequence { steps: inverses }
    }

    pub fn apply(&self) -> Result<(), EngineError> {
        match self {
            Self::Remove { path, fingerprint } => {
                fingerprint.verify(path)?;
                local::remove_no_follow(path)?;
                debug!("undo remove: {}", path.display());
                Ok(())
            }
            Self::RemoveEmptyDir { path, fingerprint } => {
                fingerprint.verify(path)?;
                fs::remove_dir(path).map_err(|e| EngineError::from_io(&e, path.display()))?;
                debug!("undo remove dir: {}", path.display());
                Ok(())
            }
            Self::MoveBack { from, to, fingerprint } => {
                fingerprint.verify(from)?;
                local::ensure_absent(to)?;
                create_parent(to)?;
                local::move_path(from, to)?;
                debug!("undo move: {} -> {}", from.display(), to.display());
                Ok(())
            }
            Self::Restore { backup, to } => {
                if !local::exists_no_follow(backup) {
                    return Err(EngineError::new(ErrorCode::NotFound, "The backup of this item is gone")
                        .with_path(backup.display()));
                }
                local::ensure_absent(to)?;
                create_parent(to)?;
                local::move_path(backup, to)?;
                if let Some(slot) = backup.parent() {
                    let _ = fs::remove_dir(slot);
                }
                debug!("undo restore: {} -> {}", backup.display(), to.display());
                Ok(())
            }
            Self::Recreate { path } => match fs::symlink_metadata(path) {
                Ok(metadata) if metadata.is_dir() => Ok(()),
                Ok(_) => Err(EngineError::already_exists(path.display())),
                Err(_) => fs::create_dir_all(path).map_err(|e| EngineError::from_io(&e, path.display())),
            },
            Self::Sequence { steps } => steps.iter().try_for_each(Self::apply),
        }
    }

    /// Every path this action changes when applied.
    pub fn touched_paths(&self) -> Vec<PathBuf> {
        match self {
            Self::Remove { path, .. } | Self::RemoveEmptyDir { path, .. } | Self::Recreate { path } => {
                vec![path.clone()]
            }
            Self::MoveBack { from, to, .. } => vec![from.clone(), to.clone()],
            Self::Restore { to, .. } => vec![to.clone()],
            Self::Sequence { steps } => steps.iter().flat_map(Self::touched_paths).collect(),
        }
    }

    /// Backups this action would restore. They're deleted when the record is evicted.
    pub fn backups(&self) -> Vec<PathBuf> {
        match self {
            Self::Restore { backup, .. } => vec![backup.clone()],
            Self::Sequence { steps } => steps.iter().flat_map(Self::backups).collect(),
            _ => Vec::new(),
        }
    }
}

fn create_parent(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        Some(parent) => fs::create_dir_all(parent).map_err(|e| EngineError::from_io(&e, parent.display())),
        None => Ok(()),
    }
}
