use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::Archive;
use walkdir::WalkDir;
use crate::error::{Error, IoResultExt, Result};

/// Archive formats accepted as install sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

// Longest suffixes first so `.tar.gz` wins over `.gz`-less `.tar` checks.
const SUFFIXES: [(&str, ArchiveFormat); 8] = [
    (".tar.gz", ArchiveFormat::TarGz),
    (".tar.bz2", ArchiveFormat::TarBz2),
    (".tar.xz", ArchiveFormat::TarXz),
    (".tgz", ArchiveFormat::TarGz),
    (".tbz2", ArchiveFormat::TarBz2),
    (".txz", ArchiveFormat::TarXz),
    (".tar", ArchiveFormat::Tar),
    (".zip", ArchiveFormat::Zip),
];

impl ArchiveFormat {
    /// Detects the format from the file name. Matching is case-insensitive.
    pub fn detect(path: &Path) -> Option<ArchiveFormat> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| name.len() > suffix.len() && name.ends_with(suffix))
            .map(|(_, format)| *format)
    }

    /// The file name with its archive suffix removed, e.g. `tool` for
    /// `tool.tar.gz`.
    pub fn strip_suffix(file_name: &str) -> Option<&str> {
        let lower = file_name.to_ascii_lowercase();
        SUFFIXES
            .iter()
            .find(|(suffix, _)| lower.len() > suffix.len() && lower.ends_with(suffix))
            .map(|(suffix, _)| &file_name[..file_name.len() - suffix.len()])
    }
}

/// Extracts `archive` into `dest` and returns every file now under `dest`.
///
/// `dest` is created if missing. Entries that would escape `dest` are rejected
/// by the underlying codecs.
pub fn extract(archive: &Path, format: ArchiveFormat, dest: &Path) -> Result<Vec<PathBuf>> {
    tracing::debug!("extracting {} ({:?}) into {}", archive.display(), format, dest.display());
    std::fs::create_dir_all(dest).at(dest)?;
    let file = File::open(archive).at(archive)?;
    match format {
        ArchiveFormat::Zip => {
            let mut zip = zip::ZipArchive::new(file)
                .map_err(|e| Error::io(archive, std::io::Error::other(e)))?;
            zip.extract(dest)
                .map_err(|e| Error::io(archive, std::io::Error::other(e)))?;
        }
        ArchiveFormat::Tar => unpack_tar(Archive::new(file), archive, dest)?,
        ArchiveFormat::TarGz => unpack_tar(Archive::new(GzDecoder::new(file)), archive, dest)?,
        ArchiveFormat::TarBz2 => {
            unpack_tar(Archive::new(bzip2::read::BzDecoder::new(file)), archive, dest)?
        }
        ArchiveFormat::TarXz => {
            unpack_tar(Archive::new(xz2::read::XzDecoder::new(file)), archive, dest)?
        }
    }
    list_files(dest)
}

fn unpack_tar<R: std::io::Read>(mut tar: Archive<R>, archive: &Path, dest: &Path) -> Result<()> {
    tar.set_preserve_permissions(true);
    tar.unpack(dest).at(archive)
}

/// Every regular file or symlink under `dir`, sorted.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry.map_err(|e| Error::io(dir, e.into()))?;
        if !entry.file_type().is_dir() {
            files.push(entry.into_path());
        }
    }
    files.sort();
    Ok(files)
}

/// Writes `src_dir` as a gzip-compressed tarball whose single top-level
/// directory is `top_name`. Symlinks are stored as links.
pub fn compress_dir<W: Write>(src_dir: &Path, top_name: &str, out: W) -> Result<W> {
    let encoder = GzEncoder::new(out, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(top_name, src_dir).at(src_dir)?;
    let encoder = builder.into_inner().at(src_dir)?;
    encoder.finish().at(src_dir)
}
