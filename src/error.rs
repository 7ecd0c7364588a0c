use std::path::{Path, PathBuf};

/// Result type used across the `oppm` core.
pub type Result<T> = std::result::Result<T, Error>;

/// What kind of registry entry an error talks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    App,
    Shim,
}

impl std::fmt::Display for EntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntryKind::App => f.write_str("application"),
            EntryKind::Shim => f.write_str("shim"),
        }
    }
}

/// Every failure the core can surface.
///
/// Each variant maps to its own process exit code (see [`Error::exit_code`]) so
/// that scripts can branch on the failure kind instead of parsing messages.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: EntryKind, name: String },

    #[error("{kind} '{name}' already exists")]
    NameConflict { kind: EntryKind, name: String },

    #[error("unsupported source format: {}", path.display())]
    UnsupportedFormat { path: PathBuf },

    #[error("shim target does not exist: {}", path.display())]
    TargetNotFound { path: PathBuf },

    #[error("metadata file {} is corrupt: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },

    #[error("metadata schema version {found} is newer than the supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("path conflict at {}: {reason}", path.display())]
    PathConflict { path: PathBuf, reason: String },

    #[error("executable must live inside the apps directory: {}", path.display())]
    OutsideApps { path: PathBuf },

    #[error("invalid name '{name}': use letters, digits, '.', '_', '+' or '-', starting with a letter or digit")]
    InvalidName { name: String },

    #[error("oppm is not initialized (config file {} missing or unreadable). Run `oppm init` first.", path.display())]
    NotInitialized { path: PathBuf },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn path_conflict(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathConflict {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this failure kind. `0` and `1` are reserved for
    /// success and for failures outside the core, `2` for command-line usage
    /// errors.
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::NotFound { .. } => 3,
            Error::NameConflict { .. } => 4,
            Error::UnsupportedFormat { .. } => 5,
            Error::TargetNotFound { .. } => 6,
            Error::Corrupt { .. } => 7,
            Error::UnsupportedSchema { .. } => 8,
            Error::Io { .. } => 9,
            Error::PathConflict { .. } => 10,
            Error::OutsideApps { .. } => 11,
            Error::InvalidName { .. } => 12,
            Error::NotInitialized { .. } => 13,
        }
    }
}

/// Attaches the offending path to raw I/O results.
pub trait IoResultExt<T> {
    fn at(self, path: &Path) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: &Path) -> Result<T> {
        self.map_err(|e| Error::io(path, e))
    }
}
