//! Moving a whole root to a new location.
//!
//! Records and shim links are relative, so a plain move needs no rewriting.
//! The only shims touched are those whose relative link no longer lands on
//! the target, which happens when the depth between `shims/` and `apps/` has
//! changed.

use std::path::{Path, PathBuf};
use serde::Serialize;
use crate::error::{Error, IoResultExt, Result};
use crate::health::{self, CheckOptions, Report};
use crate::metadata::Store;
use crate::shims;
use crate::util::{absolutize, copy_dir_all, entry_exists, is_dir_empty, remove_any};

/// Outcome of a migration.
#[derive(Serialize, Debug, Clone)]
pub struct Migrated {
    pub from: PathBuf,
    pub to: PathBuf,
    /// `false` when source and destination were the same directory.
    pub moved: bool,
    /// The tree was copied and the old root deleted instead of renamed.
    pub copied: bool,
    /// Apps whose absolute install path was rewritten as a relative one.
    pub relativized: Vec<String>,
    pub recreated_shims: Vec<String>,
    pub report: Report,
}

/// Moves the root of `store` to `new_root` and rebases the store onto it.
///
/// The destination must not exist, or be an empty directory, and must not lie
/// inside the current root. The metadata is saved at the new location; the
/// caller is responsible for repointing the user config.
pub fn migrate(store: &mut Store, new_root: &Path) -> Result<Migrated> {
    let from = store.layout().root().to_path_buf();
    let to = absolutize(new_root)?;

    if to == from {
        tracing::info!("{} is already the active root", to.display());
        let report = health::check(store, CheckOptions::report_only())?;
        return Ok(Migrated {
            from,
            to,
            moved: false,
            copied: false,
            relativized: Vec::new(),
            recreated_shims: Vec::new(),
            report,
        });
    }
    if to.starts_with(&from) {
        return Err(Error::path_conflict(&to, "destination is inside the current root"));
    }
    if entry_exists(&to) {
        if !to.is_dir() {
            return Err(Error::path_conflict(&to, "destination is not a directory"));
        }
        if !is_dir_empty(&to)? {
            return Err(Error::path_conflict(&to, "destination is not empty"));
        }
        std::fs::remove_dir(&to).at(&to)?;
    }
    if let Some(parent) = to.parent() {
        std::fs::create_dir_all(parent).at(parent)?;
    }

    let copied = move_tree(&from, &to)?;
    let original = store.clone();
    let (relativized, recreated_shims) = match settle(store, &to) {
        Ok(settled) => settled,
        Err(e) => {
            tracing::error!("migration to {} failed, moving the root back: {}", to.display(), e);
            match move_tree(&to, &from) {
                Ok(_) => *store = original,
                Err(back) => tracing::error!("could not move {} back to {}: {}", to.display(), from.display(), back),
            }
            return Err(e);
        }
    };
    tracing::info!("migrated root {} -> {}", from.display(), to.display());

    let report = health::check(store, CheckOptions::report_only())?;
    Ok(Migrated { from, to, moved: true, copied, relativized, recreated_shims, report })
}

/// Rebases the store onto the moved tree, repairs shims and saves there.
fn settle(store: &mut Store, to: &Path) -> Result<(Vec<String>, Vec<String>)> {
    store.rebase(to)?;
    let relativized = store.relativize_paths();
    let recreated_shims = repair_shims(store)?;
    store.save()?;
    Ok((relativized, recreated_shims))
}

/// Renames `from` to `to`, falling back to copy + delete when a rename is not
/// possible (typically across filesystems). Returns `true` on fallback.
fn move_tree(from: &Path, to: &Path) -> Result<bool> {
    match std::fs::rename(from, to) {
        Ok(()) => return Ok(false),
        Err(e) => tracing::debug!("rename failed ({e}), copying instead"),
    }
    if let Err(e) = copy_dir_all(from, to) {
        if entry_exists(to) {
            let _ = remove_any(to);
        }
        return Err(e);
    }
    if let Err(e) = std::fs::remove_dir_all(from) {
        tracing::warn!("copied root but could not delete {}: {e}", from.display());
    }
    Ok(true)
}

/// Recreates shims whose target still exists under the root but whose
/// relative link or proxy no longer reaches it. Returns the recreated names.
/// The store is not saved.
pub(crate) fn repair_shims(store: &mut Store) -> Result<Vec<String>> {
    let stale: Vec<String> = store
        .shims()
        .filter(|s| store.shim_target_in_root(s).is_file())
        .filter(|s| !store.shim_target(s).is_file() || !health::artifact_resolves(store, s))
        .map(|s| s.name.clone())
        .collect();
    for name in &stale {
        shims::recreate(store, name)?;
    }
    Ok(stale)
}
