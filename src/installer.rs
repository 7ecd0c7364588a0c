use std::path::{Path, PathBuf};
use chrono::Utc;
use serde::Serialize;
use crate::archive::{self, ArchiveFormat};
use crate::error::{EntryKind, Error, IoResultExt, Result};
use crate::metadata::{AppRecord, SourceKind, Store};
use crate::shims;
use crate::util::{copy_dir_all, entry_exists, is_executable, remove_any, to_slash, validate_name};

/// An install source, classified once by inspecting the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallSource {
    SingleExecutable(PathBuf),
    Archive(PathBuf, ArchiveFormat),
    Directory(PathBuf),
}

impl InstallSource {
    /// Classifies `path` as a directory, a supported archive or an executable.
    ///
    /// # Errors
    ///
    /// `Io` if the path does not exist, `UnsupportedFormat` for any other file.
    pub fn classify(path: &Path) -> Result<InstallSource> {
        let meta = std::fs::metadata(path).at(path)?;
        if meta.is_dir() {
            return Ok(InstallSource::Directory(path.to_path_buf()));
        }
        if !meta.is_file() {
            return Err(Error::UnsupportedFormat { path: path.to_path_buf() });
        }
        if let Some(format) = ArchiveFormat::detect(path) {
            return Ok(InstallSource::Archive(path.to_path_buf(), format));
        }
        if is_executable(path) {
            return Ok(InstallSource::SingleExecutable(path.to_path_buf()));
        }
        Err(Error::UnsupportedFormat { path: path.to_path_buf() })
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            InstallSource::SingleExecutable(_) => SourceKind::SingleExecutable,
            InstallSource::Archive(..) => SourceKind::Archive,
            InstallSource::Directory(_) => SourceKind::Directory,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            InstallSource::SingleExecutable(path)
            | InstallSource::Archive(path, _)
            | InstallSource::Directory(path) => path,
        }
    }

    /// App name derived from the source: the directory name, the executable's
    /// stem, or the archive name without its (possibly double) suffix.
    pub fn derived_name(&self) -> Result<String> {
        let file_name = self
            .path()
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::UnsupportedFormat { path: self.path().to_path_buf() })?;
        let name = match self {
            InstallSource::Directory(_) => file_name,
            InstallSource::Archive(..) => ArchiveFormat::strip_suffix(file_name).unwrap_or(file_name),
            InstallSource::SingleExecutable(path) => {
                path.file_stem().and_then(|s| s.to_str()).unwrap_or(file_name)
            }
        };
        Ok(name.to_string())
    }
}

/// Installs `source` under `apps/<name>` and registers it.
///
/// The name is `name` if given, otherwise derived from the source. Installing
/// never overwrites: an existing record or app directory with that name is a
/// `NameConflict`. If materialization or the metadata save fails, the new app
/// directory is removed and no record is left behind.
pub fn install(store: &mut Store, source: &Path, name: Option<&str>) -> Result<AppRecord> {
    let source = InstallSource::classify(source)?;
    let name = match name {
        Some(name) => name.to_string(),
        None => source.derived_name()?,
    };
    validate_name(&name)?;

    let layout = store.layout().clone();
    let app_dir = layout.app_dir(&name);
    if store.contains_app(&name) || entry_exists(&app_dir) {
        return Err(Error::NameConflict { kind: EntryKind::App, name });
    }
    if let InstallSource::Directory(dir) = &source {
        let dir = dunce::canonicalize(dir).at(dir)?;
        if layout.apps_dir().starts_with(&dir) {
            return Err(Error::path_conflict(dir, "cannot install a directory that contains the apps directory"));
        }
    }

    tracing::info!("installing {} ({}) as '{}'", source.path().display(), source.kind(), name);
    if let Err(e) = materialize(&source, &app_dir) {
        rollback(&app_dir);
        return Err(e);
    }

    let install_path = layout.apps_rel().join(&name);
    let record = AppRecord {
        name: name.clone(),
        source_kind: source.kind(),
        install_path: to_slash(&install_path),
        created_at: Utc::now(),
    };
    store.upsert_app(record.clone());
    if let Err(e) = store.save() {
        let _ = store.remove_app(&name);
        rollback(&app_dir);
        return Err(e);
    }
    Ok(record)
}

fn materialize(source: &InstallSource, app_dir: &Path) -> Result<()> {
    match source {
        InstallSource::SingleExecutable(path) => {
            std::fs::create_dir_all(app_dir).at(app_dir)?;
            let file_name = path
                .file_name()
                .ok_or_else(|| Error::UnsupportedFormat { path: path.clone() })?;
            let dest = app_dir.join(file_name);
            std::fs::copy(path, &dest).at(&dest)?;
        }
        InstallSource::Archive(path, format) => {
            let files = archive::extract(path, *format, app_dir)?;
            tracing::debug!("extracted {} files", files.len());
        }
        InstallSource::Directory(path) => copy_dir_all(path, app_dir)?,
    }
    Ok(())
}

fn rollback(app_dir: &Path) {
    if entry_exists(app_dir) {
        match remove_any(app_dir) {
            Ok(()) => tracing::warn!("rolled back partial install at {}", app_dir.display()),
            Err(e) => tracing::error!("could not roll back {}: {}", app_dir.display(), e),
        }
    }
}

/// What [`remove`] deleted.
#[derive(Debug, Clone, Serialize)]
pub struct Removed {
    pub app: AppRecord,
    pub shims: Vec<String>,
    /// `false` when the app directory was already gone.
    pub dir_deleted: bool,
}

/// Uninstalls an app: its shims first, then its directory, then its record.
pub fn remove(store: &mut Store, name: &str) -> Result<Removed> {
    let app = store
        .app(name)
        .cloned()
        .ok_or_else(|| Error::NotFound { kind: EntryKind::App, name: name.to_string() })?;
    let app_dir = store.app_path(&app);

    let shims = shims::remove_for_app(store, name, &app_dir)?;
    // shim records must not outlive their artifacts if the directory delete fails
    store.save()?;
    let dir_deleted = if entry_exists(&app_dir) {
        remove_any(&app_dir)?;
        true
    } else {
        tracing::warn!("app directory {} was already gone", app_dir.display());
        false
    };
    store.remove_app(name)?;
    store.save()?;
    tracing::info!("removed '{}' and {} shims", name, shims.len());
    Ok(Removed { app, shims, dir_deleted })
}

/// Result of [`update`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Synced {
    /// Unrecorded app directories that were registered.
    pub added: Vec<String>,
    /// Records whose directory was gone.
    pub removed: Vec<String>,
    /// Shims dropped together with removed records.
    pub removed_shims: Vec<String>,
}

impl Synced {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Synchronizes metadata with the contents of `apps/`: adopts unrecorded
/// directories and forgets records whose directory no longer exists.
pub fn update(store: &mut Store) -> Result<Synced> {
    let apps_dir = store.layout().apps_dir();
    let mut synced = Synced::default();

    let missing: Vec<AppRecord> = store
        .apps()
        .filter(|app| !store.app_path(app).exists())
        .cloned()
        .collect();
    for app in missing {
        let app_dir = store.app_path(&app);
        synced.removed_shims.extend(shims::remove_for_app(store, &app.name, &app_dir)?);
        store.remove_app(&app.name)?;
        synced.removed.push(app.name);
    }

    let mut on_disk = Vec::new();
    for entry in std::fs::read_dir(&apps_dir).at(&apps_dir)? {
        let entry = entry.at(&apps_dir)?;
        if entry.file_type().at(&entry.path())?.is_dir() {
            on_disk.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    on_disk.sort();
    for name in on_disk {
        if store.contains_app(&name) {
            continue;
        }
        if validate_name(&name).is_err() {
            tracing::warn!("skipping app directory with unusable name '{}'", name);
            continue;
        }
        let install_path = store.layout().apps_rel().join(&name);
        store.upsert_app(AppRecord {
            name: name.clone(),
            source_kind: SourceKind::Directory,
            install_path: to_slash(&install_path),
            created_at: Utc::now(),
        });
        synced.added.push(name);
    }

    if !synced.is_empty() {
        store.save()?;
    }
    Ok(synced)
}

/// Result of [`clean`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct Cleaned {
    pub apps: usize,
    pub shims: usize,
}

/// Deletes every app directory and shim artifact and empties the metadata.
/// The root, `apps/` and `shims/` themselves are kept.
///
/// Shims go first and their records are saved away before any app directory
/// is touched. If deleting an app fails, the records of apps already deleted
/// are dropped and saved before the error is returned.
pub fn clean(store: &mut Store) -> Result<Cleaned> {
    let layout = store.layout().clone();
    let mut cleaned = Cleaned::default();

    cleaned.shims = clear_dir(&layout.shims_dir())?;
    let shim_names: Vec<String> = store.shims().map(|s| s.name.clone()).collect();
    for name in shim_names {
        store.remove_shim(&name)?;
    }
    store.save()?;

    match clear_dir(&layout.apps_dir()) {
        Ok(count) => {
            cleaned.apps = count;
            store.clear();
            store.save()?;
            Ok(cleaned)
        }
        Err(e) => {
            let gone: Vec<String> = store
                .apps()
                .filter(|app| !entry_exists(&store.app_path(app)))
                .map(|app| app.name.clone())
                .collect();
            for name in gone {
                store.remove_app(&name)?;
            }
            store.save()?;
            Err(e)
        }
    }
}

/// Removes every entry of `dir` and returns how many there were.
fn clear_dir(dir: &Path) -> Result<usize> {
    if !dir.is_dir() {
        return Ok(0);
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        tracing::debug!("removing {}", path.display());
        remove_any(&path)?;
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::make_executable;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        std::fs::write(path, "x").unwrap();
    }

    #[test]
    fn test_classify() {
        let dir = tempdir().unwrap();
        let exe = dir.path().join("app.exe");
        let zip = dir.path().join("pkg.zip");
        let iso = dir.path().join("disk.iso");
        touch(&exe);
        touch(&zip);
        touch(&iso);

        assert!(matches!(InstallSource::classify(dir.path()).unwrap(), InstallSource::Directory(_)));
        assert!(matches!(InstallSource::classify(&exe).unwrap(), InstallSource::SingleExecutable(_)));
        assert!(matches!(
            InstallSource::classify(&zip).unwrap(),
            InstallSource::Archive(_, ArchiveFormat::Zip)
        ));
        assert!(matches!(InstallSource::classify(&iso), Err(Error::UnsupportedFormat { .. })));
        assert!(matches!(
            InstallSource::classify(&dir.path().join("missing")),
            Err(Error::Io { .. })
        ));
    }

    #[test]
    fn test_derived_names() {
        let dir = tempdir().unwrap();
        for (file, expected) in [
            ("abc.exe", "abc"),
            ("abc.cmd", "abc"),
            ("abc.zip", "abc"),
            ("abc.tgz", "abc"),
            ("abc.tar", "abc"),
            ("abc.tar.gz", "abc"),
            ("abc.tar.bz2", "abc"),
            ("abc.tar.xz", "abc"),
        ] {
            let path = dir.path().join(file);
            touch(&path);
            let source = InstallSource::classify(&path).unwrap();
            assert_eq!(source.derived_name().unwrap(), expected, "{file}");
        }
        let sub = dir.path().join("my-dir");
        std::fs::create_dir(&sub).unwrap();
        assert_eq!(InstallSource::classify(&sub).unwrap().derived_name().unwrap(), "my-dir");
    }

    #[test]
    fn test_unsupported_types() {
        let dir = tempdir().unwrap();
        for ext in ["a", "c", "dll", "iso"] {
            let path = dir.path().join(format!("abc.{ext}"));
            touch(&path);
            assert!(matches!(InstallSource::classify(&path), Err(Error::UnsupportedFormat { .. })));
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_executable_without_extension() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rg");
        touch(&path);
        assert!(matches!(InstallSource::classify(&path), Err(Error::UnsupportedFormat { .. })));
        make_executable(&path).unwrap();
        let source = InstallSource::classify(&path).unwrap();
        assert_eq!(source.kind(), SourceKind::SingleExecutable);
        assert_eq!(source.derived_name().unwrap(), "rg");
    }

    #[test]
    fn test_install_single_executable() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);

        let record = install(&mut store, &exe, Some("tool")).unwrap();
        assert_eq!(record.name, "tool");
        assert_eq!(record.source_kind, SourceKind::SingleExecutable);
        assert_eq!(record.install_path, "apps/tool");
        assert!(store.layout().app_dir("tool").join("app.exe").is_file());
        assert!(Store::load(store.layout().root()).unwrap().contains_app("tool"));
    }

    #[test]
    fn test_install_directory_copies_tree() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let src = dir.path().join("portable");
        std::fs::create_dir_all(src.join("bin")).unwrap();
        touch(&src.join("bin/run.exe"));

        let record = install(&mut store, &src, None).unwrap();
        assert_eq!(record.name, "portable");
        assert!(store.layout().app_dir("portable").join("bin/run.exe").is_file());
    }

    #[test]
    fn test_install_name_conflict_leaves_first_intact() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let a = dir.path().join("a.exe");
        let b = dir.path().join("b.exe");
        touch(&a);
        touch(&b);

        install(&mut store, &a, Some("tool")).unwrap();
        let err = install(&mut store, &b, Some("tool")).unwrap_err();
        assert!(matches!(err, Error::NameConflict { kind: EntryKind::App, .. }));
        assert!(store.layout().app_dir("tool").join("a.exe").is_file());
        assert!(!store.layout().app_dir("tool").join("b.exe").exists());
    }

    #[test]
    fn test_install_conflicts_with_orphaned_directory() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        std::fs::create_dir_all(store.layout().app_dir("app")).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);
        assert!(matches!(install(&mut store, &exe, None), Err(Error::NameConflict { .. })));
    }

    #[test]
    fn test_failed_extraction_rolls_back() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let bad = dir.path().join("broken.tar.gz");
        std::fs::write(&bad, "not an archive").unwrap();

        assert!(matches!(install(&mut store, &bad, None), Err(Error::Io { .. })));
        assert!(!store.layout().app_dir("broken").exists());
        assert!(!store.contains_app("broken"));
        assert!(!Store::load(store.layout().root()).unwrap().contains_app("broken"));
    }

    /// An uncompressed tar holding an executable `bin/tool` script.
    fn tar_bytes() -> Vec<u8> {
        let data = b"#!/bin/sh\necho tool\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        let mut builder = tar::Builder::new(Vec::new());
        builder.append_data(&mut header, "bin/tool", &data[..]).unwrap();
        builder.into_inner().unwrap()
    }

    fn assert_extracted(store: &Store, name: &str) {
        let tool = store.layout().app_dir(name).join("bin").join("tool");
        assert_eq!(std::fs::read_to_string(&tool).unwrap(), "#!/bin/sh\necho tool\n");
        assert_eq!(store.app(name).unwrap().source_kind, SourceKind::Archive);
        assert!(Store::load(store.layout().root()).unwrap().contains_app(name));
    }

    #[test]
    fn test_install_plain_tar() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let archive = dir.path().join("plain.tar");
        std::fs::write(&archive, tar_bytes()).unwrap();

        let record = install(&mut store, &archive, None).unwrap();
        assert_eq!(record.name, "plain");
        assert_extracted(&store, "plain");
        #[cfg(unix)]
        assert!(is_executable(&store.layout().app_dir("plain").join("bin/tool")));
    }

    #[test]
    fn test_install_tar_bz2() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let archive = dir.path().join("squeezed.tar.bz2");
        let file = std::fs::File::create(&archive).unwrap();
        let mut encoder = bzip2::write::BzEncoder::new(file, bzip2::Compression::default());
        encoder.write_all(&tar_bytes()).unwrap();
        encoder.finish().unwrap();

        let record = install(&mut store, &archive, None).unwrap();
        assert_eq!(record.name, "squeezed");
        assert_extracted(&store, "squeezed");
    }

    #[test]
    fn test_install_tar_xz() {
        use std::io::Write;

        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let archive = dir.path().join("packed.tar.xz");
        let file = std::fs::File::create(&archive).unwrap();
        let mut encoder = xz2::write::XzEncoder::new(file, 6);
        encoder.write_all(&tar_bytes()).unwrap();
        encoder.finish().unwrap();

        let record = install(&mut store, &archive, Some("xz-tool")).unwrap();
        assert_eq!(record.name, "xz-tool");
        assert_extracted(&store, "xz-tool");
    }

    #[test]
    fn test_install_rejects_invalid_name() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);
        assert!(matches!(install(&mut store, &exe, Some("../evil")), Err(Error::InvalidName { .. })));
    }

    #[test]
    fn test_remove_deletes_dir_shims_and_record() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);
        install(&mut store, &exe, Some("tool")).unwrap();
        let target = store.layout().app_dir("tool").join("app.exe");
        shims::add(&mut store, &target, Some("tool"), shims::ShimStrategy::Auto).unwrap();

        let removed = remove(&mut store, "tool").unwrap();
        assert_eq!(removed.shims, vec!["tool".to_string()]);
        assert!(removed.dir_deleted);
        assert!(!store.layout().app_dir("tool").exists());
        let reloaded = Store::load(store.layout().root()).unwrap();
        assert!(!reloaded.contains_app("tool"));
        assert!(!reloaded.contains_shim("tool"));
        assert!(std::fs::read_dir(store.layout().shims_dir()).unwrap().next().is_none());
    }

    #[test]
    fn test_remove_unknown() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        assert!(matches!(remove(&mut store, "nope"), Err(Error::NotFound { .. })));
    }

    #[test]
    fn test_update_syncs_both_ways() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let exe = dir.path().join("gone.exe");
        touch(&exe);
        install(&mut store, &exe, None).unwrap();
        std::fs::remove_dir_all(store.layout().app_dir("gone")).unwrap();
        std::fs::create_dir_all(store.layout().app_dir("adopted")).unwrap();

        let synced = update(&mut store).unwrap();
        assert_eq!(synced.added, vec!["adopted".to_string()]);
        assert_eq!(synced.removed, vec!["gone".to_string()]);
        let reloaded = Store::load(store.layout().root()).unwrap();
        assert!(reloaded.contains_app("adopted"));
        assert!(!reloaded.contains_app("gone"));

        assert!(update(&mut store).unwrap().is_empty());
    }

    #[test]
    fn test_clean_empties_everything() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);
        install(&mut store, &exe, None).unwrap();
        let target = store.layout().app_dir("app").join("app.exe");
        shims::add(&mut store, &target, Some("app"), shims::ShimStrategy::Auto).unwrap();

        let cleaned = clean(&mut store).unwrap();
        assert_eq!(cleaned.apps, 1);
        assert_eq!(cleaned.shims, 1);
        assert!(store.layout().apps_dir().is_dir());
        let reloaded = Store::load(store.layout().root()).unwrap();
        assert_eq!(reloaded.apps().count(), 0);
        assert_eq!(reloaded.shims().count(), 0);
    }

    /// Makes `dir` read-only so its entries cannot be deleted. Returns `false`
    /// when the current user can write there anyway (for example root).
    #[cfg(unix)]
    fn lock_dir(dir: &Path) -> bool {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o555)).unwrap();
        let check = dir.join(".write-check");
        if std::fs::write(&check, "x").is_ok() {
            std::fs::remove_file(&check).unwrap();
            unlock_dir(dir);
            return false;
        }
        true
    }

    #[cfg(unix)]
    fn unlock_dir(dir: &Path) {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_remove_failing_delete_keeps_no_stale_shims() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let src = dir.path().join("tool");
        std::fs::create_dir_all(src.join("data")).unwrap();
        touch(&src.join("app.exe"));
        touch(&src.join("data/file"));
        install(&mut store, &src, None).unwrap();
        let target = store.layout().app_dir("tool").join("app.exe");
        shims::add(&mut store, &target, Some("tool"), shims::ShimStrategy::Auto).unwrap();

        let locked = store.layout().app_dir("tool").join("data");
        if !lock_dir(&locked) {
            return;
        }
        let result = remove(&mut store, "tool");
        unlock_dir(&locked);

        assert!(matches!(result, Err(Error::Io { .. })));
        let reloaded = Store::load(store.layout().root()).unwrap();
        assert!(reloaded.contains_app("tool"));
        assert_eq!(reloaded.shims().count(), 0);
        assert!(std::fs::read_dir(store.layout().shims_dir()).unwrap().next().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_clean_failing_delete_keeps_no_stale_records() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path().join("root")).unwrap();
        let src = dir.path().join("stuck");
        std::fs::create_dir_all(src.join("data")).unwrap();
        touch(&src.join("data/file"));
        install(&mut store, &src, None).unwrap();
        let exe = dir.path().join("app.exe");
        touch(&exe);
        install(&mut store, &exe, None).unwrap();
        let target = store.layout().app_dir("app").join("app.exe");
        shims::add(&mut store, &target, Some("app"), shims::ShimStrategy::Auto).unwrap();

        let locked = store.layout().app_dir("stuck").join("data");
        if !lock_dir(&locked) {
            return;
        }
        let result = clean(&mut store);
        unlock_dir(&locked);

        assert!(matches!(result, Err(Error::Io { .. })));
        let reloaded = Store::load(store.layout().root()).unwrap();
        assert_eq!(reloaded.shims().count(), 0);
        assert!(reloaded.contains_app("stuck"));
        for app in reloaded.apps() {
            assert!(reloaded.app_path(app).exists(), "{} has no directory", app.name);
        }
    }
}
