//! Shim manager: command proxies in `shims/` that forward to executables
//! under `apps/`.
//!
//! A proxy stores its target relative to its own directory, so the whole root
//! can move without touching the artifacts. Symbolic links are preferred; when
//! the platform refuses one, a tiny stub script is written instead. Both
//! forward arguments and the exit code unchanged.

use std::path::{Path, PathBuf};
use chrono::Utc;
use serde::Serialize;
use crate::error::{EntryKind, Error, IoResultExt, Result};
use crate::metadata::{ShimKind, ShimRecord, Store};
use crate::util::{entry_exists, make_executable, relative_path, remove_any, to_slash, validate_name};

/// Which kind of proxy artifact to create.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShimStrategy {
    /// Symlink when the OS allows it, stub otherwise.
    #[default]
    Auto,
    /// Always write a stub script.
    Stub,
}

/// A shim together with whether it currently resolves.
#[derive(Debug, Clone, Serialize)]
pub struct ShimStatus {
    pub name: String,
    pub target: PathBuf,
    pub app: String,
    pub kind: ShimKind,
    pub resolves: bool,
}

/// Creates a proxy artifact in `shims_dir` forwarding to `target_rel`
/// (relative to `shims_dir`). Returns the kind written and the artifact's file
/// name.
///
/// On Unix the artifact is a symlink named `name`; on Windows it is a symlink
/// carrying the target's extension, so `PATHEXT` lookup finds it. If the
/// symlink cannot be created (missing privilege, unsupported filesystem) a
/// stub script is written.
///
/// # Errors
///
/// Returns an error if the artifact already exists or neither strategy can be
/// written.
pub fn create_proxy(
    shims_dir: &Path,
    name: &str,
    target_rel: &Path,
    strategy: ShimStrategy,
) -> Result<(ShimKind, String)> {
    std::fs::create_dir_all(shims_dir).at(shims_dir)?;
    if strategy == ShimStrategy::Auto {
        let artifact = symlink_artifact_name(name, target_rel);
        let link = shims_dir.join(&artifact);
        if entry_exists(&link) {
            return Err(Error::NameConflict { kind: EntryKind::Shim, name: name.to_string() });
        }
        match create_symlink(target_rel, &link) {
            Ok(()) => {
                tracing::debug!("symlinked {} -> {}", link.display(), target_rel.display());
                return Ok((ShimKind::Symlink, artifact));
            }
            Err(e) => {
                tracing::warn!(
                    "could not create symlink {} ({}), falling back to a stub script",
                    link.display(),
                    e
                );
            }
        }
    }
    let artifact = stub_artifact_name(name);
    let stub = shims_dir.join(&artifact);
    if entry_exists(&stub) {
        return Err(Error::NameConflict { kind: EntryKind::Shim, name: name.to_string() });
    }
    std::fs::write(&stub, stub_script(target_rel)).at(&stub)?;
    make_executable(&stub)?;
    tracing::debug!("wrote stub {} -> {}", stub.display(), target_rel.display());
    Ok((ShimKind::Stub, artifact))
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(windows)]
fn create_symlink(target: &Path, link: &Path) -> std::io::Result<()> {
    std::os::windows::fs::symlink_file(target, link)
}

#[cfg(unix)]
fn symlink_artifact_name(name: &str, _target: &Path) -> String {
    name.to_string()
}

#[cfg(windows)]
fn symlink_artifact_name(name: &str, target: &Path) -> String {
    match target.extension().and_then(|e| e.to_str()) {
        Some(ext) if !name.to_ascii_lowercase().ends_with(&format!(".{}", ext.to_ascii_lowercase())) => {
            format!("{name}.{ext}")
        }
        _ => name.to_string(),
    }
}

#[cfg(unix)]
fn stub_artifact_name(name: &str) -> String {
    name.to_string()
}

#[cfg(windows)]
fn stub_artifact_name(name: &str) -> String {
    format!("{name}.cmd")
}

#[cfg(unix)]
fn stub_script(target_rel: &Path) -> String {
    format!(
        "#!/bin/sh\nexec \"$(dirname \"$0\")/{}\" \"$@\"\n",
        to_slash(target_rel)
    )
}

#[cfg(windows)]
fn stub_script(target_rel: &Path) -> String {
    format!(
        "@echo off\r\n\"%~dp0{}\" %*\r\nexit /b %ERRORLEVEL%\r\n",
        to_slash(target_rel).replace('/', "\\")
    )
}

/// Exposes `executable` as a command in `shims/`.
///
/// The executable must exist and live under `apps/`. The shim name defaults to
/// the executable's file name. The store is saved before returning; if that
/// fails the artifact is removed again.
pub fn add(
    store: &mut Store,
    executable: &Path,
    name: Option<&str>,
    strategy: ShimStrategy,
) -> Result<ShimRecord> {
    if !executable.exists() {
        return Err(Error::TargetNotFound { path: executable.to_path_buf() });
    }
    let target = dunce::canonicalize(executable).at(executable)?;
    if !target.is_file() {
        return Err(Error::UnsupportedFormat { path: target });
    }
    let layout = store.layout().clone();
    let in_apps = target
        .strip_prefix(layout.apps_dir())
        .map_err(|_| Error::OutsideApps { path: target.clone() })?;
    let app = in_apps
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .ok_or_else(|| Error::OutsideApps { path: target.clone() })?;

    let shim_name = match name {
        Some(name) => name.to_string(),
        None => target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::TargetNotFound { path: target.clone() })?,
    };
    validate_name(&shim_name)?;
    if store.contains_shim(&shim_name) {
        return Err(Error::NameConflict { kind: EntryKind::Shim, name: shim_name });
    }
    if !store.contains_app(&app) {
        tracing::warn!("'{}' is not a registered app; run `oppm update` to adopt it", app);
    }

    let shims_dir = layout.shims_dir();
    let target_rel = relative_path(&shims_dir, &target)
        .ok_or_else(|| Error::OutsideApps { path: target.clone() })?;
    let target_in_root = relative_path(layout.root(), &target)
        .ok_or_else(|| Error::OutsideApps { path: target.clone() })?;

    let (kind, artifact) = create_proxy(&shims_dir, &shim_name, &target_rel, strategy)?;
    let record = ShimRecord {
        name: shim_name.clone(),
        target_relative_path: to_slash(&target_rel),
        target_path: to_slash(&target_in_root),
        app,
        kind,
        artifact,
        created_at: Utc::now(),
    };
    store.upsert_shim(record.clone());
    if let Err(e) = store.save() {
        let _ = store.remove_shim(&shim_name);
        let _ = remove_any(&shims_dir.join(&record.artifact));
        return Err(e);
    }
    tracing::info!("created shim {} -> {}", record.name, record.target_path);
    Ok(record)
}

/// Removes a shim's artifact and record, then saves.
pub fn delete(store: &mut Store, name: &str) -> Result<ShimRecord> {
    let record = store
        .shim(name)
        .cloned()
        .ok_or_else(|| Error::NotFound { kind: EntryKind::Shim, name: name.to_string() })?;
    remove_artifact(store, &record)?;
    store.remove_shim(name)?;
    store.save()?;
    tracing::info!("deleted shim {}", name);
    Ok(record)
}

/// All shims ordered by name, with their resolved target.
pub fn list(store: &Store) -> Vec<ShimStatus> {
    store
        .shims()
        .map(|shim| {
            let target = store.shim_target(shim);
            ShimStatus {
                name: shim.name.clone(),
                resolves: target.is_file() && entry_exists(&store.shim_artifact(shim)),
                target,
                app: shim.app.clone(),
                kind: shim.kind,
            }
        })
        .collect()
}

/// Deletes the artifact of `record` if present. The record itself is left to
/// the caller.
pub fn remove_artifact(store: &Store, record: &ShimRecord) -> Result<()> {
    let artifact = store.shim_artifact(record);
    if entry_exists(&artifact) {
        remove_any(&artifact)?;
        tracing::debug!("removed shim artifact {}", artifact.display());
    }
    Ok(())
}

/// Rebuilds a shim's artifact from its root-relative target, recomputing the
/// relative link. Used when the artifact is missing or no longer resolves.
///
/// The record is updated in memory only.
pub fn recreate(store: &mut Store, name: &str) -> Result<ShimRecord> {
    let mut record = store
        .shim(name)
        .cloned()
        .ok_or_else(|| Error::NotFound { kind: EntryKind::Shim, name: name.to_string() })?;
    let target = store.shim_target_in_root(&record);
    if !target.is_file() {
        return Err(Error::TargetNotFound { path: target });
    }
    let shims_dir = store.layout().shims_dir();
    let target_rel = relative_path(&shims_dir, &target)
        .ok_or_else(|| Error::OutsideApps { path: target.clone() })?;
    remove_artifact(store, &record)?;
    let strategy = match record.kind {
        ShimKind::Symlink => ShimStrategy::Auto,
        ShimKind::Stub => ShimStrategy::Stub,
    };
    let (kind, artifact) = create_proxy(&shims_dir, &record.name, &target_rel, strategy)?;
    record.target_relative_path = to_slash(&target_rel);
    record.kind = kind;
    record.artifact = artifact;
    store.upsert_shim(record.clone());
    tracing::info!("recreated shim {}", record.name);
    Ok(record)
}

/// Removes every shim pointing into `app_dir`: recorded shims belonging to
/// `app`, and unrecorded symlinks whose target lies under the directory.
/// Returns the removed shim names. The store is not saved.
pub fn remove_for_app(store: &mut Store, app: &str, app_dir: &Path) -> Result<Vec<String>> {
    let mut removed = Vec::new();
    let names = match store.app(app).cloned() {
        Some(record) => store.shims_for_app(&record),
        None => store.shims().filter(|s| s.app == app).map(|s| s.name.clone()).collect(),
    };
    for name in names {
        if let Some(record) = store.shim(&name).cloned() {
            remove_artifact(store, &record)?;
            store.remove_shim(&name)?;
            removed.push(name);
        }
    }

    let shims_dir = store.layout().shims_dir();
    let app_dir = dunce::canonicalize(app_dir).unwrap_or_else(|_| app_dir.to_path_buf());
    if shims_dir.is_dir() {
        for entry in std::fs::read_dir(&shims_dir).at(&shims_dir)? {
            let entry = entry.at(&shims_dir)?;
            let path = entry.path();
            let Ok(link) = std::fs::read_link(&path) else {
                continue;
            };
            let resolved = crate::util::normalize_lexically(&shims_dir.join(link));
            if resolved.starts_with(&app_dir) {
                remove_any(&path)?;
                removed.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
    }
    Ok(removed)
}
