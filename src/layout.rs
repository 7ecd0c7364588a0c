use std::path::{Path, PathBuf};
use crate::error::{Error, IoResultExt, Result};

/// File name of the metadata store under the root.
pub const META_FILE_NAME: &str = "meta.toml";
/// Default directory (relative to root) holding app directories.
pub const DEFAULT_APPS_DIR: &str = "apps";
/// Default directory (relative to root) holding shim artifacts.
pub const DEFAULT_SHIMS_DIR: &str = "shims";

/// Absolute locations of everything owned by one root.
///
/// A `Layout` is derived from the active root plus the relative directory names
/// recorded in the metadata file; nothing in it is persisted as-is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    root: PathBuf,
    apps_rel: PathBuf,
    shims_rel: PathBuf,
}

impl Layout {
    /// Layout with the default `apps/` and `shims/` directories.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self::with_dirs(root, DEFAULT_APPS_DIR, DEFAULT_SHIMS_DIR)
    }

    pub fn with_dirs<P: AsRef<Path>>(root: P, apps_rel: &str, shims_rel: &str) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            apps_rel: PathBuf::from(apps_rel),
            shims_rel: PathBuf::from(shims_rel),
        }
    }

    /// Canonicalizes the root so that relative paths computed against it are
    /// stable. The root must exist.
    pub fn canonicalized(self) -> Result<Self> {
        let root = dunce::canonicalize(&self.root).at(&self.root)?;
        Ok(Self { root, ..self })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn apps_dir(&self) -> PathBuf {
        self.root.join(&self.apps_rel)
    }

    pub fn shims_dir(&self) -> PathBuf {
        self.root.join(&self.shims_rel)
    }

    pub fn meta_file(&self) -> PathBuf {
        self.root.join(META_FILE_NAME)
    }

    pub fn apps_rel(&self) -> &Path {
        &self.apps_rel
    }

    pub fn shims_rel(&self) -> &Path {
        &self.shims_rel
    }

    /// Directory an app named `name` is materialized into.
    pub fn app_dir(&self, name: &str) -> PathBuf {
        self.apps_dir().join(name)
    }

    /// Resolves a root-relative path.
    pub fn resolve<P: AsRef<Path>>(&self, rel: P) -> PathBuf {
        self.root.join(rel)
    }

    /// Creates the root, `apps/` and `shims/` if they don't already exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.root.clone(), self.apps_dir(), self.shims_dir()] {
            std::fs::create_dir_all(&dir).at(&dir)?;
        }
        Ok(())
    }

    /// Same layout rooted somewhere else.
    pub fn relocated<P: AsRef<Path>>(&self, new_root: P) -> Self {
        Self {
            root: new_root.as_ref().to_path_buf(),
            apps_rel: self.apps_rel.clone(),
            shims_rel: self.shims_rel.clone(),
        }
    }

    /// Checks the root exists and is a directory.
    pub fn require_root(&self) -> Result<()> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(Error::io(
                &self.root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "root directory does not exist"),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_ensure_dirs_creates_directories() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path().join(".oppm"));
        layout.ensure_dirs().unwrap();

        assert!(layout.root().is_dir());
        assert!(layout.apps_dir().is_dir());
        assert!(layout.shims_dir().is_dir());
        assert_eq!(layout.meta_file(), dir.path().join(".oppm").join(META_FILE_NAME));
    }

    #[test]
    fn test_relocated_keeps_relative_dirs() {
        let layout = Layout::with_dirs("/a", "programs", "bin");
        let moved = layout.relocated("/b");
        assert_eq!(moved.apps_dir(), PathBuf::from("/b/programs"));
        assert_eq!(moved.shims_dir(), PathBuf::from("/b/bin"));
    }

    #[test]
    fn test_require_root_missing() {
        let dir = tempdir().unwrap();
        let layout = Layout::new(dir.path().join("nope"));
        assert!(matches!(layout.require_root(), Err(Error::Io { .. })));
    }
}
