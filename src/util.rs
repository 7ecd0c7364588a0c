use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use regex::Regex;
use walkdir::WalkDir;
use crate::error::{Error, IoResultExt, Result};

static NAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._+-]*$").expect("static name pattern")
});

/// Checks an app or shim name against the allowed pattern.
///
/// Names become directory and file names under the root, so path separators,
/// leading dots and whitespace are rejected.
pub fn validate_name(name: &str) -> Result<()> {
    if NAME_PATTERN.is_match(name) {
        Ok(())
    } else {
        Err(Error::InvalidName { name: name.to_string() })
    }
}

/// Resolves `.` and `..` components without touching the filesystem.
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(out.components().next_back(), Some(Component::Normal(_))) {
                    out.pop();
                } else if !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Computes the path of `to` relative to the directory `from_dir`, walking up
/// with `..` where needed.
///
/// Both paths are normalized first. Returns `None` when the two paths do not
/// share a prefix (different drives on Windows, or a relative/absolute mix).
pub fn relative_path(from_dir: &Path, to: &Path) -> Option<PathBuf> {
    let from = normalize_lexically(from_dir);
    let to = normalize_lexically(to);
    if from.is_absolute() != to.is_absolute() {
        return None;
    }
    let from_parts: Vec<Component> = from.components().collect();
    let to_parts: Vec<Component> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(to_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();
    if from.is_absolute() && common == 0 {
        return None;
    }
    // only plain names can be walked back up with `..`
    if from_parts[common..].iter().any(|c| !matches!(c, Component::Normal(_))) {
        return None;
    }

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part.as_os_str());
    }
    Some(rel)
}

/// Converts a relative path to the `/`-separated form stored in metadata.
pub fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Makes `path` absolute and normalized, canonicalizing its longest existing
/// ancestor so it compares equal to canonical roots. The path itself need
/// not exist.
pub fn absolutize(path: &Path) -> Result<PathBuf> {
    let absolute = normalize_lexically(&std::path::absolute(path).at(path)?);
    let mut existing = absolute.as_path();
    let mut rest = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name.to_os_string());
                existing = parent;
            }
            _ => return Ok(absolute),
        }
    }
    let mut out = dunce::canonicalize(existing).at(existing)?;
    out.extend(rest.iter().rev());
    Ok(out)
}

/// Recursively copies `src` into `dst`. Symbolic links are recreated as links
/// on Unix rather than followed.
pub fn copy_dir_all(src: &Path, dst: &Path) -> Result<()> {
    std::fs::create_dir_all(dst).at(dst)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry.map_err(|e| Error::io(src, e.into()))?;
        let rel = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| Error::io(entry.path(), std::io::Error::other(e)))?;
        let out = dst.join(rel);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            std::fs::create_dir_all(&out).at(&out)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &out)?;
        } else {
            std::fs::copy(entry.path(), &out).at(&out)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(link: &Path, out: &Path) -> Result<()> {
    let target = std::fs::read_link(link).at(link)?;
    std::os::unix::fs::symlink(target, out).at(out)
}

#[cfg(not(unix))]
fn copy_symlink(link: &Path, out: &Path) -> Result<()> {
    std::fs::copy(link, out).at(out).map(|_| ())
}

/// Returns `true` if the directory exists and has no entries.
pub fn is_dir_empty(path: &Path) -> Result<bool> {
    let mut entries = std::fs::read_dir(path).at(path)?;
    Ok(entries.next().is_none())
}

/// Returns `true` if the path exists without following a final symlink.
pub fn entry_exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

/// Removes a file, symlink or directory tree, whichever is present.
pub fn remove_any(path: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).at(path)?;
    if meta.is_dir() {
        std::fs::remove_dir_all(path).at(path)
    } else {
        std::fs::remove_file(path).at(path)
    }
}

/// Checks if a given path is an executable file on Unix.
#[cfg(unix)]
pub fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    has_exe_extension(path)
        || std::fs::metadata(path)
            .map(|meta| meta.is_file() && meta.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
}

/// Checks if a given path has a Windows executable extension (.exe, .bat, .cmd).
#[cfg(windows)]
pub fn is_executable(path: &Path) -> bool {
    has_exe_extension(path)
}

/// Extensions treated as executables regardless of platform.
pub const EXE_EXTENSIONS: [&str; 3] = ["exe", "bat", "cmd"];

pub fn has_exe_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| EXE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Marks a file as executable for everyone (`0o755`). No-op off Unix.
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(path).at(path)?.permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(path, perms).at(path)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}
