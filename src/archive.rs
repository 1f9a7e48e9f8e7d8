//! Archive normalization.
//!
//! Hosts deliver source archives in their own layout: a zip or a gzipped
//! tarball, usually wrapped in a folder named after the commit. Clients
//! expect a zip whose only root entry is the project folder. The
//! normalizer unpacks into temp directories below `<root>/temp`, fixes the
//! root folder and zips the tree again. Temp directories live as long as
//! the normalizer.

use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;

use crate::host::ArchiveFormat;

/// Marker file some tar tools leave at the archive root.
pub const PAX_GLOBAL_HEADER: &str = "pax_global_header";

/// Errors raised while converting archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("entry escapes the extraction root: {0}")]
    UnsafePath(String),

    #[error("invalid folder name: {0:?}")]
    InvalidFolderName(String),
}

/// Converts downloaded archives into the delivered zip layout.
pub struct ArchiveNormalizer {
    temp_root: PathBuf,
    temp_dirs: Vec<TempDir>,
}

impl ArchiveNormalizer {
    /// Creates a normalizer that places temp directories under `temp_root`.
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            temp_dirs: Vec::new(),
        }
    }

    /// Number of temp directories currently held.
    #[must_use]
    pub fn temp_dir_count(&self) -> usize {
        self.temp_dirs.len()
    }

    /// Unpacks an archive and repacks it as a zip whose single root entry
    /// is `folder_name`.
    ///
    /// A lone root directory is renamed. Otherwise every root entry is moved
    /// into a new `folder_name` directory.
    pub fn normalize(
        &mut self,
        bytes: &[u8],
        format: ArchiveFormat,
        folder_name: &str,
    ) -> Result<Vec<u8>, ArchiveError> {
        validate_folder_name(folder_name)?;

        let remote = self.temp_dir()?;
        extract(bytes, format, &remote)?;

        let staged = self.temp_dir()?;
        let target = staged.join(folder_name);

        let entries = root_entries(&remote)?;
        match entries.as_slice() {
            [only] if fs::symlink_metadata(only).is_ok_and(|m| m.is_dir()) => {
                debug!("[ARCHIVE] Renaming root folder to {}", folder_name);
                fs::rename(only, &target)?;
            }
            _ => {
                debug!(
                    "[ARCHIVE] Wrapping {} root entries into {}",
                    entries.len(),
                    folder_name
                );
                fs::create_dir(&target)?;
                for entry in &entries {
                    if let Some(name) = entry.file_name() {
                        fs::rename(entry, target.join(name))?;
                    }
                }
            }
        }

        let zipped = compress_dir(&staged)?;
        info!("[ARCHIVE] Normalized archive into {} bytes", zipped.len());
        Ok(zipped)
    }

    /// Repacks a tarball as a zip without touching its layout. Zips are
    /// returned unchanged.
    pub fn convert_to_zip(
        &mut self,
        bytes: &[u8],
        format: ArchiveFormat,
    ) -> Result<Vec<u8>, ArchiveError> {
        if format == ArchiveFormat::Zip {
            return Ok(bytes.to_vec());
        }

        let dir = self.temp_dir()?;
        extract(bytes, format, &dir)?;

        let marker = dir.join(PAX_GLOBAL_HEADER);
        if marker.is_file() {
            fs::remove_file(marker)?;
        }

        let zipped = compress_dir(&dir)?;
        info!("[ARCHIVE] Converted tarball into {} byte zip", zipped.len());
        Ok(zipped)
    }

    fn temp_dir(&mut self) -> Result<PathBuf, ArchiveError> {
        fs::create_dir_all(&self.temp_root)?;
        let dir = tempfile::Builder::new()
            .prefix("t")
            .tempdir_in(&self.temp_root)?;
        let path = dir.path().to_path_buf();
        self.temp_dirs.push(dir);
        Ok(path)
    }
}

impl Drop for ArchiveNormalizer {
    fn drop(&mut self) {
        if !self.temp_dirs.is_empty() {
            debug!(
                "[ARCHIVE] Removing {} temp directories",
                self.temp_dirs.len()
            );
        }
    }
}

fn validate_folder_name(name: &str) -> Result<(), ArchiveError> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(()),
        _ => Err(ArchiveError::InvalidFolderName(name.to_string())),
    }
}

/// Root entries of an extraction, without the pax marker, sorted.
fn root_entries(dir: &Path) -> Result<Vec<PathBuf>, ArchiveError> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name() == PAX_GLOBAL_HEADER {
            continue;
        }
        entries.push(entry.path());
    }
    entries.sort();
    Ok(entries)
}

/// Unpacks an archive into `dest`.
pub fn extract(bytes: &[u8], format: ArchiveFormat, dest: &Path) -> Result<(), ArchiveError> {
    match format {
        ArchiveFormat::Zip => extract_zip(bytes, dest),
        ArchiveFormat::TarGz => extract_tar_gz(bytes, dest),
    }
}

fn extract_zip(bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let relative = file
            .enclosed_name()
            .ok_or_else(|| ArchiveError::UnsafePath(file.name().to_string()))?;
        let outpath = dest.join(&relative);
        let mode = file.unix_mode();

        if file.is_dir() {
            fs::create_dir_all(&outpath)?;
            continue;
        }
        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }

        if mode.is_some_and(|m| m & S_IFMT == S_IFLNK) {
            let mut target = String::new();
            io::Read::read_to_string(&mut file, &mut target)?;
            if !link_is_enclosed(&relative, Path::new(&target)) {
                return Err(ArchiveError::UnsafePath(file.name().to_string()));
            }
            write_symlink(&target, &outpath)?;
            continue;
        }

        let mut outfile = File::create(&outpath)?;
        io::copy(&mut file, &mut outfile)?;
        if let Some(mode) = mode {
            set_mode(&outpath, mode)?;
        }
    }

    Ok(())
}

const S_IFMT: u32 = 0o170_000;
const S_IFLNK: u32 = 0o120_000;

/// True if a link at `link` (relative to the root) pointing at `target`
/// resolves inside the root.
fn link_is_enclosed(link: &Path, target: &Path) -> bool {
    let mut depth: usize = link.parent().map_or(0, |p| p.components().count());
    for component in target.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir => match depth.checked_sub(1) {
                Some(d) => depth = d,
                None => return false,
            },
            Component::RootDir | Component::Prefix(_) => return false,
        }
    }
    true
}

#[cfg(unix)]
fn write_symlink(target: &str, path: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, path)
}

#[cfg(not(unix))]
fn write_symlink(target: &str, path: &Path) -> io::Result<()> {
    fs::write(path, target)
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o777))
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> io::Result<()> {
    Ok(())
}

#[cfg(unix)]
fn mode_of(metadata: &fs::Metadata) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    Some(metadata.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn mode_of(_metadata: &fs::Metadata) -> Option<u32> {
    None
}

fn extract_tar_gz(bytes: &[u8], dest: &Path) -> Result<(), ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(Cursor::new(bytes)));

    for entry in archive.entries()? {
        let mut entry = entry?;

        if entry.header().entry_type() == tar::EntryType::XGlobalHeader {
            let mut marker = File::create(dest.join(PAX_GLOBAL_HEADER))?;
            io::copy(&mut entry, &mut marker)?;
            continue;
        }

        if !entry.unpack_in(dest)? {
            let path = entry.path()?.display().to_string();
            return Err(ArchiveError::UnsafePath(path));
        }
    }

    Ok(())
}

/// Zips the contents of `root`. Entry names are relative and use `/`.
///
/// Symlinks are stored as links and unix modes are kept.
pub fn compress_dir(root: &Path) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    add_dir_entries(&mut writer, root, "", options)?;

    Ok(writer.finish()?.into_inner())
}

fn add_dir_entries(
    writer: &mut zip::ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> Result<(), ArchiveError> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = format!("{}{}", prefix, entry.file_name().to_string_lossy());
        let file_type = entry.file_type()?;

        if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            writer.add_symlink(name, target.to_string_lossy(), options)?;
            continue;
        }

        let entry_options = match mode_of(&entry.metadata()?) {
            Some(mode) => options.unix_permissions(mode),
            None => options,
        };
        if file_type.is_dir() {
            writer.add_directory(format!("{}/", name), entry_options)?;
            add_dir_entries(writer, &entry.path(), &format!("{}/", name), options)?;
        } else if file_type.is_file() {
            writer.start_file(name, entry_options)?;
            let mut file = File::open(entry.path())?;
            io::copy(&mut file, writer)?;
        } else {
            debug!("[ARCHIVE] Skipping special entry {}", name);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_folder_name() {
        assert!(validate_folder_name("my-plugin").is_ok());
        for bad in ["", ".", "..", "a/b", "/abs", "a\\b"] {
            assert!(validate_folder_name(bad).is_err(), "{:?} should fail", bad);
        }
    }

    #[test]
    fn test_link_is_enclosed() {
        assert!(link_is_enclosed(Path::new("foo/lib/link"), Path::new("../readme.md")));
        assert!(link_is_enclosed(Path::new("foo/link"), Path::new("./lib/x.php")));
        assert!(!link_is_enclosed(Path::new("foo/link"), Path::new("../../etc/passwd")));
        assert!(!link_is_enclosed(Path::new("link"), Path::new("/etc/passwd")));
    }

    #[cfg(unix)]
    #[test]
    fn test_compress_dir_keeps_modes_and_links() {
        use std::io::Read;
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("run.sh");
        fs::write(&script, "#!/bin/sh").unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        std::os::unix::fs::symlink("run.sh", dir.path().join("start")).unwrap();

        let bytes = compress_dir(dir.path()).unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();

        let run = archive.by_name("run.sh").unwrap();
        assert_eq!(run.unix_mode().unwrap() & 0o777, 0o755);
        drop(run);

        let mut link = archive.by_name("start").unwrap();
        assert_eq!(link.unix_mode().unwrap() & S_IFMT, S_IFLNK);
        let mut target = String::new();
        link.read_to_string(&mut target).unwrap();
        assert_eq!(target, "run.sh");
    }

    #[test]
    fn test_compress_dir_is_sorted_and_relative() {
        let dir = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("b/inner")).unwrap();
        fs::write(dir.path().join("b/inner/x.txt"), "x").unwrap();
        fs::write(dir.path().join("a.txt"), "a").unwrap();

        let bytes = compress_dir(dir.path()).unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<_> = archive.file_names().map(str::to_string).collect();
        let mut sorted = names.clone();
        sorted.sort();

        assert_eq!(sorted, vec!["a.txt", "b/", "b/inner/", "b/inner/x.txt"]);
    }

    #[test]
    fn test_zip_passthrough_on_convert() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut normalizer = ArchiveNormalizer::new(dir.path());
        let out = normalizer
            .convert_to_zip(b"opaque", ArchiveFormat::Zip)
            .unwrap();
        assert_eq!(out, b"opaque");
        assert_eq!(normalizer.temp_dir_count(), 0);
    }

    #[test]
    fn test_temp_dirs_removed_on_drop() {
        let dir = tempfile::TempDir::new().unwrap();
        let temp_root = dir.path().join("temp");
        {
            let mut normalizer = ArchiveNormalizer::new(&temp_root);
            let err = normalizer.normalize(b"not a zip", ArchiveFormat::Zip, "x");
            assert!(err.is_err());
            assert_eq!(normalizer.temp_dir_count(), 1);
        }
        assert_eq!(fs::read_dir(&temp_root).unwrap().count(), 0);
    }
}
