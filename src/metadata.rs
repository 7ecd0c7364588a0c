//! The metadata store: the single source of truth for what is installed.
//!
//! The whole file is loaded into a [`Store`] at the start of a command, mutated
//! in memory through the store's API and flushed with [`Store::save`], which
//! replaces the file atomically (temp file in the same directory + rename).

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use crate::error::{EntryKind, Error, IoResultExt, Result};
use crate::layout::{Layout, DEFAULT_APPS_DIR, DEFAULT_SHIMS_DIR, META_FILE_NAME};
use crate::util::{normalize_lexically, to_slash};

/// Current metadata schema version. Files without a `schema` key are version 1.
pub const SCHEMA_VERSION: u32 = 1;

/// How an application reached the root.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    SingleExecutable,
    Archive,
    Directory,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::SingleExecutable => f.write_str("executable"),
            SourceKind::Archive => f.write_str("archive"),
            SourceKind::Directory => f.write_str("directory"),
        }
    }
}

/// One installed application.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct AppRecord {
    /// Unique name, also the name of the app directory.
    pub name: String,
    pub source_kind: SourceKind,
    /// Root-relative, `/`-separated path of the app directory.
    pub install_path: String,
    pub created_at: DateTime<Utc>,
}

/// How a shim's proxy artifact forwards to its target.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ShimKind {
    /// A relative symbolic link.
    Symlink,
    /// A small script that execs the target.
    Stub,
}

impl std::fmt::Display for ShimKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShimKind::Symlink => f.write_str("symlink"),
            ShimKind::Stub => f.write_str("stub"),
        }
    }
}

/// One exposed command.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ShimRecord {
    /// Command name exposed on `PATH`.
    pub name: String,
    /// Path of the real executable relative to the shims directory.
    pub target_relative_path: String,
    /// Path of the real executable relative to the root.
    pub target_path: String,
    /// App the target belongs to.
    pub app: String,
    pub kind: ShimKind,
    /// File name of the proxy artifact inside the shims directory.
    pub artifact: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug)]
struct MetaFile {
    #[serde(default = "default_schema")]
    schema: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root_dir: Option<String>,
    #[serde(default = "default_apps_dir")]
    apps_dir: String,
    #[serde(default = "default_shims_dir")]
    shims_dir: String,
    #[serde(default)]
    apps: Vec<AppRecord>,
    #[serde(default)]
    shims: Vec<ShimRecord>,
}

#[derive(Deserialize)]
struct SchemaProbe {
    #[serde(default)]
    schema: Option<i64>,
}

fn default_schema() -> u32 {
    SCHEMA_VERSION
}

fn default_apps_dir() -> String {
    DEFAULT_APPS_DIR.to_string()
}

fn default_shims_dir() -> String {
    DEFAULT_SHIMS_DIR.to_string()
}

/// In-memory view of the metadata file for one root.
#[derive(Debug, Clone)]
pub struct Store {
    layout: Layout,
    recorded_root: Option<PathBuf>,
    apps: BTreeMap<String, AppRecord>,
    shims: BTreeMap<String, ShimRecord>,
}

impl Store {
    /// Creates the root layout and an empty metadata file, or loads the
    /// existing one if the root was initialized before.
    pub fn init<P: AsRef<Path>>(root: P) -> Result<Store> {
        let layout = Layout::new(root.as_ref());
        if layout.meta_file().exists() {
            let store = Store::load(root)?;
            store.layout.ensure_dirs()?;
            return Ok(store);
        }
        layout.ensure_dirs()?;
        let store = Store {
            layout: layout.canonicalized()?,
            recorded_root: None,
            apps: BTreeMap::new(),
            shims: BTreeMap::new(),
        };
        store.save()?;
        tracing::info!("initialized metadata at {}", store.layout.meta_file().display());
        Ok(store)
    }

    /// Loads the metadata file under `root`.
    ///
    /// A missing or unparsable file is `Corrupt`, never an empty store.
    pub fn load<P: AsRef<Path>>(root: P) -> Result<Store> {
        let meta_path = root.as_ref().join(META_FILE_NAME);
        if !meta_path.is_file() {
            return Err(Error::corrupt(&meta_path, "metadata file does not exist"));
        }
        let content = std::fs::read_to_string(&meta_path).at(&meta_path)?;
        let store = Self::parse(root.as_ref(), &meta_path, &content)?;
        tracing::debug!(
            "loaded {} apps and {} shims from {}",
            store.apps.len(),
            store.shims.len(),
            meta_path.display()
        );
        Ok(store)
    }

    fn parse(root: &Path, meta_path: &Path, content: &str) -> Result<Store> {
        let probe: SchemaProbe = toml::from_str(content)
            .map_err(|e| Error::corrupt(meta_path, e.to_string()))?;
        match probe.schema {
            Some(found) if found < 1 => {
                return Err(Error::corrupt(meta_path, format!("invalid schema version {found}")));
            }
            Some(found) if found > SCHEMA_VERSION as i64 => {
                return Err(Error::UnsupportedSchema {
                    found: u32::try_from(found).unwrap_or(u32::MAX),
                    supported: SCHEMA_VERSION,
                });
            }
            _ => {}
        }
        let file: MetaFile = toml::from_str(content)
            .map_err(|e| Error::corrupt(meta_path, e.to_string()))?;

        let mut apps = BTreeMap::new();
        for app in file.apps {
            if let Some(dup) = apps.insert(app.name.clone(), app) {
                return Err(Error::corrupt(meta_path, format!("duplicate app '{}'", dup.name)));
            }
        }
        let mut shims = BTreeMap::new();
        for shim in file.shims {
            if let Some(dup) = shims.insert(shim.name.clone(), shim) {
                return Err(Error::corrupt(meta_path, format!("duplicate shim '{}'", dup.name)));
            }
        }

        let layout = Layout::with_dirs(root, &file.apps_dir, &file.shims_dir).canonicalized()?;
        Ok(Store {
            layout,
            recorded_root: file.root_dir.map(PathBuf::from),
            apps,
            shims,
        })
    }

    /// Writes the whole store atomically. The recorded `root_dir` pointer is
    /// always the root this store was loaded from.
    pub fn save(&self) -> Result<()> {
        let file = MetaFile {
            schema: SCHEMA_VERSION,
            root_dir: Some(self.layout.root().to_string_lossy().into_owned()),
            apps_dir: to_slash(self.layout.apps_rel()),
            shims_dir: to_slash(self.layout.shims_rel()),
            apps: self.apps.values().cloned().collect(),
            shims: self.shims.values().cloned().collect(),
        };
        let encoded = toml::to_string_pretty(&file)
            .map_err(|e| Error::io(self.layout.meta_file(), std::io::Error::other(e)))?;

        let meta_path = self.layout.meta_file();
        let mut tmp = NamedTempFile::new_in(self.layout.root()).at(self.layout.root())?;
        tmp.write_all(encoded.as_bytes()).at(tmp.path())?;
        tmp.as_file().sync_all().at(tmp.path())?;
        tmp.persist(&meta_path).map_err(|e| Error::io(&meta_path, e.error))?;
        tracing::debug!("saved metadata to {}", meta_path.display());
        Ok(())
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The `root_dir` pointer found in the file when it was loaded.
    pub fn recorded_root(&self) -> Option<&Path> {
        self.recorded_root.as_deref()
    }

    /// All apps, ordered by name.
    pub fn apps(&self) -> impl Iterator<Item = &AppRecord> {
        self.apps.values()
    }

    pub fn app(&self, name: &str) -> Option<&AppRecord> {
        self.apps.get(name)
    }

    pub fn contains_app(&self, name: &str) -> bool {
        self.apps.contains_key(name)
    }

    /// Inserts or replaces an app record, returning the previous one.
    pub fn upsert_app(&mut self, record: AppRecord) -> Option<AppRecord> {
        self.apps.insert(record.name.clone(), record)
    }

    pub fn remove_app(&mut self, name: &str) -> Result<AppRecord> {
        self.apps.remove(name).ok_or_else(|| Error::NotFound {
            kind: EntryKind::App,
            name: name.to_string(),
        })
    }

    /// All shims, ordered by name.
    pub fn shims(&self) -> impl Iterator<Item = &ShimRecord> {
        self.shims.values()
    }

    pub fn shim(&self, name: &str) -> Option<&ShimRecord> {
        self.shims.get(name)
    }

    pub fn contains_shim(&self, name: &str) -> bool {
        self.shims.contains_key(name)
    }

    pub fn upsert_shim(&mut self, record: ShimRecord) -> Option<ShimRecord> {
        self.shims.insert(record.name.clone(), record)
    }

    pub fn remove_shim(&mut self, name: &str) -> Result<ShimRecord> {
        self.shims.remove(name).ok_or_else(|| Error::NotFound {
            kind: EntryKind::Shim,
            name: name.to_string(),
        })
    }

    /// Drops every record.
    pub fn clear(&mut self) {
        self.apps.clear();
        self.shims.clear();
    }

    /// Absolute location of an app's install path.
    pub fn app_path(&self, app: &AppRecord) -> PathBuf {
        self.layout.resolve(&app.install_path)
    }

    /// Absolute path of a shim's proxy artifact.
    pub fn shim_artifact(&self, shim: &ShimRecord) -> PathBuf {
        self.layout.shims_dir().join(&shim.artifact)
    }

    /// Absolute path a shim's relative target resolves to from the shims
    /// directory.
    pub fn shim_target(&self, shim: &ShimRecord) -> PathBuf {
        normalize_lexically(&self.layout.shims_dir().join(&shim.target_relative_path))
    }

    /// Root-relative location of a shim's target, independent of where the
    /// shims directory sits.
    pub fn shim_target_in_root(&self, shim: &ShimRecord) -> PathBuf {
        normalize_lexically(&self.layout.resolve(&shim.target_path))
    }

    /// Names of shims whose target lies inside `app`'s install path.
    pub fn shims_for_app(&self, app: &AppRecord) -> Vec<String> {
        let app_path = normalize_lexically(&self.app_path(app));
        self.shims
            .values()
            .filter(|s| {
                s.app == app.name
                    || self.shim_target(s).starts_with(&app_path)
                    || self.shim_target_in_root(s).starts_with(&app_path)
            })
            .map(|s| s.name.clone())
            .collect()
    }

    /// Switches the store to a new root (after the tree was moved or
    /// restored there). Takes effect on disk at the next [`Store::save`].
    pub fn rebase<P: AsRef<Path>>(&mut self, new_root: P) -> Result<()> {
        self.layout = self.layout.relocated(new_root).canonicalized()?;
        Ok(())
    }

    /// Rewrites absolute install paths that leaked into the file as
    /// root-relative ones. Returns the names of the rewritten records.
    ///
    /// A path under the previously recorded root is stripped of that prefix;
    /// any other absolute path falls back to `<apps_dir>/<name>`.
    pub fn relativize_paths(&mut self) -> Vec<String> {
        let mut rewritten = Vec::new();
        for app in self.apps.values_mut() {
            let path = Path::new(&app.install_path);
            if !path.is_absolute() {
                continue;
            }
            let relative = self
                .recorded_root
                .as_deref()
                .and_then(|old| path.strip_prefix(old).ok())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.layout.apps_rel().join(&app.name));
            tracing::debug!("relativized {} -> {}", app.install_path, relative.display());
            app.install_path = to_slash(&relative);
            rewritten.push(app.name.clone());
        }
        rewritten
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn app(name: &str) -> AppRecord {
        AppRecord {
            name: name.to_string(),
            source_kind: SourceKind::Directory,
            install_path: format!("apps/{name}"),
            created_at: Utc::now(),
        }
    }

    fn shim(name: &str, app: &str, target: &str) -> ShimRecord {
        ShimRecord {
            name: name.to_string(),
            target_relative_path: target.to_string(),
            target_path: target.trim_start_matches("../").to_string(),
            app: app.to_string(),
            kind: ShimKind::Symlink,
            artifact: name.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_init_creates_file_and_dirs() {
        let dir = tempdir().unwrap();
        let root = dir.path().join(".oppm");
        let store = Store::init(&root).unwrap();
        assert!(root.join(META_FILE_NAME).is_file());
        assert!(store.layout().apps_dir().is_dir());
        assert!(store.layout().shims_dir().is_dir());
        assert_eq!(store.apps().count(), 0);
    }

    #[test]
    fn test_init_keeps_existing_records() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        store.upsert_app(app("tool"));
        store.save().unwrap();

        let again = Store::init(dir.path()).unwrap();
        assert!(again.contains_app("tool"));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        store.upsert_app(app("tool"));
        store.upsert_shim(shim("tool", "tool", "../apps/tool/tool.exe"));
        store.save().unwrap();

        let loaded = Store::load(dir.path()).unwrap();
        assert_eq!(loaded.app("tool"), store.app("tool"));
        assert_eq!(loaded.shim("tool"), store.shim("tool"));
        assert_eq!(loaded.recorded_root(), Some(store.layout().root()));
    }

    #[test]
    fn test_save_leaves_no_temp_files() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        store.save().unwrap();
        let mut names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["apps", "meta.toml", "shims"]);
    }

    #[test]
    fn test_load_missing_file_is_corrupt() {
        let dir = tempdir().unwrap();
        assert!(matches!(Store::load(dir.path()), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_load_malformed_file_is_corrupt() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(META_FILE_NAME), "apps = [[[").unwrap();
        assert!(matches!(Store::load(dir.path()), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_load_newer_schema_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(META_FILE_NAME), "schema = 7\n").unwrap();
        assert!(matches!(
            Store::load(dir.path()),
            Err(Error::UnsupportedSchema { found: 7, supported: SCHEMA_VERSION })
        ));
    }

    #[test]
    fn test_load_without_schema_key() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("apps")).unwrap();
        std::fs::write(dir.path().join(META_FILE_NAME), "apps = []\n").unwrap();
        let store = Store::load(dir.path()).unwrap();
        assert_eq!(store.apps().count(), 0);
    }

    #[test]
    fn test_load_duplicate_names_is_corrupt() {
        let dir = tempdir().unwrap();
        let content = r#"
[[apps]]
name = "a"
source_kind = "directory"
install_path = "apps/a"
created_at = "2024-01-01T00:00:00Z"

[[apps]]
name = "a"
source_kind = "archive"
install_path = "apps/a"
created_at = "2024-01-01T00:00:00Z"
"#;
        std::fs::write(dir.path().join(META_FILE_NAME), content).unwrap();
        assert!(matches!(Store::load(dir.path()), Err(Error::Corrupt { .. })));
    }

    #[test]
    fn test_remove_missing_is_not_found() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        assert!(matches!(
            store.remove_app("ghost"),
            Err(Error::NotFound { kind: EntryKind::App, .. })
        ));
        assert!(matches!(
            store.remove_shim("ghost"),
            Err(Error::NotFound { kind: EntryKind::Shim, .. })
        ));
    }

    #[test]
    fn test_mutations_stay_in_memory_until_save() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        store.upsert_app(app("tool"));
        assert!(!Store::load(dir.path()).unwrap().contains_app("tool"));
        store.save().unwrap();
        assert!(Store::load(dir.path()).unwrap().contains_app("tool"));
    }

    #[test]
    fn test_shim_target_resolves_from_shims_dir() {
        let dir = tempdir().unwrap();
        let store = Store::init(dir.path()).unwrap();
        let record = shim("t", "tool", "../apps/tool/bin/t");
        assert_eq!(
            store.shim_target(&record),
            store.layout().apps_dir().join("tool").join("bin").join("t")
        );
    }

    #[test]
    fn test_shims_for_app() {
        let dir = tempdir().unwrap();
        let mut store = Store::init(dir.path()).unwrap();
        store.upsert_app(app("tool"));
        store.upsert_app(app("other"));
        store.upsert_shim(shim("a", "tool", "../apps/tool/a"));
        store.upsert_shim(shim("b", "other", "../apps/other/b"));
        let tool = store.app("tool").unwrap().clone();
        assert_eq!(store.shims_for_app(&tool), vec!["a".to_string()]);
    }

    #[test]
    fn test_relativize_paths() {
        let dir = tempdir().unwrap();
        let old_root = if cfg!(windows) { "C:\\old\\root" } else { "/old/root" };
        let abs = Path::new(old_root).join("apps").join("tool");
        let content = format!(
            "root_dir = {:?}\n\n[[apps]]\nname = \"tool\"\nsource_kind = \"directory\"\ninstall_path = {:?}\ncreated_at = \"2024-01-01T00:00:00Z\"\n",
            old_root,
            abs.to_string_lossy()
        );
        std::fs::write(dir.path().join(META_FILE_NAME), content).unwrap();
        let mut store = Store::load(dir.path()).unwrap();
        assert_eq!(store.relativize_paths(), vec!["tool".to_string()]);
        assert_eq!(store.app("tool").unwrap().install_path, "apps/tool");
    }
}
