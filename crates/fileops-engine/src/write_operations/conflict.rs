//! Conflict detection and rename-on-conflict naming for a batch of sources.
//!
//! The destination folder is listed once, through the listing cache, and every source is
//! checked against that listing. Names are compared with the destination's [`NameMatcher`], so a
//! case-insensitive remote sees `Report.txt` and `report.txt` as the same item. Names handed out
//! during the batch go into a reservation set, so two sources with the same name never get the
//! same target.

use super::types::{ConflictItem, ConflictPolicy};
use crate::errors::{EngineError, ErrorCode};
use crate::listing::Lister;
use crate::local;
use crate::names::NameMatcher;
use crate::path_ref::PathRef;
use log::debug;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Highest `-N` suffix tried before giving up on a name.
pub const MAX_RENAME_SUFFIX: u32 = 999;

pub struct ConflictResolver {
    lister: Arc<Lister>,
}

impl ConflictResolver {
    pub fn new(lister: Arc<Lister>) -> Self {
        Self { lister }
    }

    /// Which targets are taken, without picking new names for them.
    pub async fn preview(
        &self,
        sources: &[PathRef],
        dest_dir: &PathRef,
        token: &CancellationToken,
    ) -> Result<Vec<ConflictItem>, EngineError> {
        self.resolve(sources, dest_dir, ConflictPolicy::Overwrite, token).await
    }

    /// Plans where each source lands under `policy`.
    ///
    /// Self-pastes and same-named sources within the batch are always renamed. Other taken
    /// names are renamed only under [`ConflictPolicy::Rename`]; otherwise the item keeps its
    /// plain target with `exists` set. Fails as a whole if the destination can't be listed.
    pub async fn resolve(
        &self,
        sources: &[PathRef],
        dest_dir: &PathRef,
        policy: ConflictPolicy,
        token: &CancellationToken,
    ) -> Result<Vec<ConflictItem>, EngineError> {
        if sources.is_empty() {
            return Ok(Vec::new());
        }
        ensure_single_storage(sources)?;

        let listing = self.lister.list_folder(dest_dir, true, token).await?;
        let matcher = self.lister.matcher_for(dest_dir, token).await;
        let existing: HashMap<String, bool> = listing
            .entries
            .iter()
            .map(|e| (matcher.key(&e.name), e.is_dir()))
            .collect();
        let mut reserved: HashSet<String> = HashSet::new();

        let mut items = Vec::with_capacity(sources.len());
        for source in sources {
            if token.is_cancelled() {
                return Err(EngineError::cancelled());
            }
            let name = source
                .name()
                .ok_or_else(|| EngineError::unsupported("Can't transfer a root folder").with_path(source))?;
            let is_dir = self.source_is_dir(source, token).await?;
            if is_dir && dest_dir.is_within(source) {
                return Err(EngineError::unsupported("Can't put a folder inside itself").with_path(dest_dir));
            }

            let key = matcher.key(&name);
            let existing_is_dir = existing.get(&key).copied();
            let self_paste = source.parent().as_ref() == Some(dest_dir);
            let in_batch = reserved.contains(&key);
            let exists = existing_is_dir.is_some() || self_paste || in_batch;
            let must_rename = self_paste || in_batch || (exists && policy == ConflictPolicy::Rename);

            let target_name = if must_rename {
                unique_name(&name, is_dir, matcher, |k| existing.contains_key(k) || reserved.contains(k))
                    .ok_or_else(|| {
                        EngineError::new(ErrorCode::Unsupported, "No free name left for this item")
                            .with_path(dest_dir.join(&name))
                    })?
            } else {
                name.clone()
            };
            let proposed_target = dest_dir.join(&target_name);
            if exists && !must_rename && source.is_within(&proposed_target) {
                return Err(EngineError::unsupported("Can't overwrite a folder that contains the source")
                    .with_path(&proposed_target));
            }
            reserved.insert(matcher.key(&target_name));
            debug!(
                "ConflictResolver [{}]: {} -> {} (exists={}, renamed={})",
                dest_dir, source, target_name, exists, must_rename
            );
            items.push(ConflictItem {
                source: source.clone(),
                proposed_target,
                exists,
                is_dir,
                existing_is_dir: existing_is_dir.unwrap_or(false),
            });
        }
        Ok(items)
    }

    async fn source_is_dir(&self, source: &PathRef, token: &CancellationToken) -> Result<bool, EngineError> {
        match source {
            PathRef::Local(path) => {
                let path = path.clone();
                let entry = local::run_blocking("Stat", move || local::stat(&path)).await?;
                Ok(entry.is_dir())
            }
            PathRef::Cloud { .. } => {
                // The parent listing is cached, so a batch from one folder costs one call
                let (Some(parent), Some(name)) = (source.parent(), source.name()) else {
                    return Err(EngineError::unsupported("Can't transfer a root folder").with_path(source));
                };
                let listing = self.lister.list_folder(&parent, true, token).await?;
                let matcher = self.lister.matcher_for(&parent, token).await;
                listing
                    .find(&name, matcher)
                    .map(|e| e.is_dir())
                    .ok_or_else(|| EngineError::not_found(source))
            }
        }
    }
}

/// Fails with `Unsupported` if `sources` mixes local and cloud paths.
pub fn ensure_single_storage(sources: &[PathRef]) -> Result<(), EngineError> {
    let local = sources.iter().filter(|s| s.is_local()).count();
    if local != 0 && local != sources.len() {
        return Err(EngineError::unsupported(
            "A selection can't mix local and cloud items. Transfer them separately.",
        ));
    }
    Ok(())
}

/// Splits `name` into the part that gets the suffix and the part after it. Folders and
/// dotfiles without a further extension keep their whole name as the stem.
pub fn split_for_suffix(name: &str, is_dir: bool) -> (&str, &str) {
    if is_dir {
        return (name, "");
    }
    match name.rfind('.') {
        Some(i) if i > 0 => name.split_at(i),
        _ => (name, ""),
    }
}

/// First `stem-N.ext` for which `taken` is false, or `None` past [`MAX_RENAME_SUFFIX`].
pub fn unique_name(
    name: &str,
    is_dir: bool,
    matcher: &dyn NameMatcher,
    taken: impl Fn(&str) -> bool,
) -> Option<String> {
    let (stem, extension) = split_for_suffix(name, is_dir);
    (1..=MAX_RENAME_SUFFIX)
        .map(|n| format!("{stem}-{n}{extension}"))
        .find(|candidate| !taken(&matcher.key(candidate)))
}
