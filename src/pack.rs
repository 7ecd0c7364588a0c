//! Whole-root backups: `pack` writes the root as one `.tar.gz`, `rebuild`
//! restores such an archive as a working root somewhere else.

use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use chrono::Local;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use crate::archive::{self, ArchiveFormat};
use crate::error::{Error, IoResultExt, Result};
use crate::health::{self, CheckOptions, Report};
use crate::metadata::Store;
use crate::migrate;
use crate::util::{absolutize, entry_exists, is_dir_empty, remove_any};

/// Directory, relative to the working directory, used when no output is given.
pub const BACKUP_DIR: &str = "oppm_backups";
pub const PACK_SUFFIX: &str = ".tar.gz";
pub const CHECKSUM_SUFFIX: &str = ".sha256";

#[derive(Serialize, Debug, Clone)]
pub struct Packed {
    pub archive: PathBuf,
    pub checksum_file: PathBuf,
    /// Hex-encoded SHA-256 of the archive.
    pub sha256: String,
    pub apps: usize,
    pub shims: usize,
}

#[derive(Debug)]
pub struct Rebuilt {
    pub store: Store,
    /// Whether a checksum sidecar was found and matched.
    pub verified: bool,
    pub relativized: Vec<String>,
    pub recreated_shims: Vec<String>,
    pub report: Report,
}

/// `oppm_backups/oppm_backup_<YYYYmmdd_HHMMSS>.tar.gz`
pub fn default_output() -> PathBuf {
    let stamp = Local::now().format("%Y%m%d_%H%M%S");
    PathBuf::from(BACKUP_DIR).join(format!("oppm_backup_{stamp}{PACK_SUFFIX}"))
}

/// Appends `.tar.gz` unless the name already ends with it.
pub fn with_pack_suffix(path: &Path) -> PathBuf {
    let name = path.file_name().map(|n| n.to_string_lossy().to_ascii_lowercase());
    match name {
        Some(name) if name.ends_with(PACK_SUFFIX) => path.to_path_buf(),
        _ => {
            let mut raw = path.as_os_str().to_os_string();
            raw.push(PACK_SUFFIX);
            PathBuf::from(raw)
        }
    }
}

fn checksum_path(archive: &Path) -> PathBuf {
    let mut raw = archive.as_os_str().to_os_string();
    raw.push(CHECKSUM_SUFFIX);
    PathBuf::from(raw)
}

fn sha256_file(path: &Path) -> Result<String> {
    let mut reader = BufReader::new(File::open(path).at(path)?);
    let mut hasher = Sha256::new();
    std::io::copy(&mut reader, &mut hasher).at(path)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Packs the whole root of `store` into one `.tar.gz` plus a checksum sidecar.
///
/// # Errors
///
/// `PathConflict` if the output already exists (without `overwrite`) or lies
/// inside the root being packed.
pub fn pack(store: &Store, output: Option<&Path>, overwrite: bool) -> Result<Packed> {
    let layout = store.layout();
    layout.require_root()?;
    let root = layout.root();

    let output = match output {
        Some(path) => with_pack_suffix(path),
        None => default_output(),
    };
    let output = absolutize(&output)?;
    if output.starts_with(root) {
        return Err(Error::path_conflict(&output, "output would be inside the root being packed"));
    }
    if entry_exists(&output) && !overwrite {
        return Err(Error::path_conflict(&output, "output already exists"));
    }
    let parent = output
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::path_conflict(&output, "output has no parent directory"))?;
    std::fs::create_dir_all(&parent).at(&parent)?;

    let top_name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "oppm".to_string());

    tracing::debug!("packing {} as {}/", root.display(), top_name);
    let tmp = NamedTempFile::new_in(&parent).at(&parent)?;
    let writer = archive::compress_dir(root, &top_name, BufWriter::new(tmp))?;
    let tmp = writer.into_inner().map_err(|e| Error::io(&output, e.into_error()))?;
    tmp.as_file().sync_all().at(tmp.path())?;
    let sha256 = sha256_file(tmp.path())?;
    tmp.persist(&output).map_err(|e| Error::io(&output, e.error))?;

    let checksum_file = checksum_path(&output);
    let file_name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let mut sidecar = NamedTempFile::new_in(&parent).at(&parent)?;
    writeln!(sidecar, "{sha256}  {file_name}").at(sidecar.path())?;
    sidecar.persist(&checksum_file).map_err(|e| Error::io(&checksum_file, e.error))?;

    tracing::info!("packed {} into {}", root.display(), output.display());
    Ok(Packed {
        archive: output,
        checksum_file,
        sha256,
        apps: store.apps().count(),
        shims: store.shims().count(),
    })
}

/// Restores a pack archive as the root at `target_root`.
///
/// The archive is extracted into a staging directory beside the target and
/// renamed into place only once it holds loadable metadata, so a failed
/// rebuild leaves the target untouched. Returns the new store together with
/// a report-only health check.
pub fn rebuild(archive_path: &Path, target_root: &Path, force: bool) -> Result<Rebuilt> {
    if !archive_path.is_file() {
        return Err(Error::io(
            archive_path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "archive does not exist"),
        ));
    }
    let is_pack = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(PACK_SUFFIX))
        .unwrap_or(false);
    if !is_pack {
        return Err(Error::UnsupportedFormat { path: archive_path.to_path_buf() });
    }
    let verified = verify_checksum(archive_path)?;

    let target = absolutize(target_root)?;
    if entry_exists(&target) {
        if !target.is_dir() {
            return Err(Error::path_conflict(&target, "target is not a directory"));
        }
        if !force && !is_dir_empty(&target)? {
            return Err(Error::path_conflict(&target, "target is not empty"));
        }
    }
    let parent = target
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::path_conflict(&target, "target has no parent directory"))?;
    std::fs::create_dir_all(&parent).at(&parent)?;

    let staging = tempfile::Builder::new()
        .prefix(".oppm-rebuild-")
        .tempdir_in(&parent)
        .at(&parent)?;
    archive::extract(archive_path, ArchiveFormat::TarGz, staging.path())
        .map_err(|e| Error::corrupt(archive_path, format!("cannot extract archive: {e}")))?;
    let top = single_top_dir(archive_path, staging.path())?;
    // fail before touching the target if the metadata is unusable
    Store::load(&top)?;

    if entry_exists(&target) {
        remove_any(&target)?;
    }
    std::fs::rename(&top, &target).at(&target)?;
    drop(staging);

    let mut store = Store::load(&target)?;
    let relativized = store.relativize_paths();
    let recreated_shims = migrate::repair_shims(&mut store)?;
    store.save()?;
    tracing::info!("rebuilt {} into {}", archive_path.display(), target.display());

    let report = health::check(&mut store, CheckOptions::report_only())?;
    Ok(Rebuilt { store, verified, relativized, recreated_shims, report })
}

/// Checks the archive against its `.sha256` sidecar. Returns `false` when
/// there is no sidecar.
fn verify_checksum(archive_path: &Path) -> Result<bool> {
    let sidecar = checksum_path(archive_path);
    if !sidecar.is_file() {
        tracing::debug!("no checksum file for {}", archive_path.display());
        return Ok(false);
    }
    let content = std::fs::read_to_string(&sidecar).at(&sidecar)?;
    let expected = content
        .split_whitespace()
        .next()
        .ok_or_else(|| Error::corrupt(&sidecar, "checksum file is empty"))?
        .to_ascii_lowercase();
    let actual = sha256_file(archive_path)?;
    if expected != actual {
        return Err(Error::corrupt(
            archive_path,
            format!("checksum mismatch: expected {expected}, got {actual}"),
        ));
    }
    Ok(true)
}

fn single_top_dir(archive_path: &Path, staging: &Path) -> Result<PathBuf> {
    let entries = std::fs::read_dir(staging)
        .at(staging)?
        .collect::<std::io::Result<Vec<_>>>()
        .at(staging)?;
    match entries.as_slice() {
        [entry] if entry.path().is_dir() => Ok(entry.path()),
        _ => Err(Error::corrupt(archive_path, "expected a single top-level directory")),
    }
}
