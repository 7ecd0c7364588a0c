use std::io::Write;
use std::path::{Path, PathBuf};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use crate::error::{Error, IoResultExt, Result};

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "OPPM_CONFIG_FILE";
pub const CONFIG_FILE_NAME: &str = "config.toml";
/// Directory name of the default root inside the home directory.
pub const DEFAULT_ROOT_NAME: &str = ".oppm";

/// The user-level config: which root is active.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub root_dir: PathBuf,
}

/// Location of the config file: `$OPPM_CONFIG_FILE`, or `config.toml` in the
/// platform config directory.
pub fn config_file_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    let proj_dirs = ProjectDirs::from("org", "oppm", "oppm").ok_or_else(|| {
        Error::io(CONFIG_FILE_NAME, std::io::Error::other("could not determine the config directory"))
    })?;
    Ok(proj_dirs.config_dir().join(CONFIG_FILE_NAME))
}

/// `~/.oppm`.
pub fn default_root() -> Result<PathBuf> {
    let base = BaseDirs::new().ok_or_else(|| {
        Error::io(DEFAULT_ROOT_NAME, std::io::Error::other("could not determine the home directory"))
    })?;
    Ok(base.home_dir().join(DEFAULT_ROOT_NAME))
}

impl Config {
    pub fn new<P: AsRef<Path>>(root_dir: P) -> Self {
        Self { root_dir: root_dir.as_ref().to_path_buf() }
    }

    /// Loads the config from its default location.
    pub fn load() -> Result<Config> {
        Self::load_from(config_file_path()?)
    }

    /// # Errors
    ///
    /// `NotInitialized` if the file is missing, `Corrupt` if it cannot be parsed.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Config> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(Error::NotInitialized { path: path.to_path_buf() });
        }
        let content = std::fs::read_to_string(path).at(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::corrupt(path, e.to_string()))?;
        tracing::debug!("active root from {}: {}", path.display(), config.root_dir.display());
        Ok(config)
    }

    /// Saves to the default location.
    pub fn save(&self) -> Result<PathBuf> {
        let path = config_file_path()?;
        self.save_to(&path)?;
        Ok(path)
    }

    /// Writes the config atomically, creating parent directories.
    pub fn save_to<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).at(&parent)?;
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::io(path, std::io::Error::other(e)))?;
        let mut tmp = NamedTempFile::new_in(&parent).at(&parent)?;
        tmp.write_all(content.as_bytes()).at(tmp.path())?;
        tmp.persist(path).map_err(|e| Error::io(path, e.error))?;
        tracing::debug!("wrote config {}", path.display());
        Ok(())
    }
}
