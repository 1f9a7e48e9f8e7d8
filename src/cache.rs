//! Commit-keyed file cache.
//!
//! Fetched files of one project branch live in
//! `<root>/cache/<slug>/<branch>/<kind>.tmp`. The directory is one cache
//! generation: it is valid only while the remote branch still points at the
//! commit recorded in the database, and it is deleted as a whole as soon as
//! the commit moves.

use std::collections::BTreeSet;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::archive::ArchiveNormalizer;
use crate::config::Paths;
use crate::error::AppError;
use crate::host::{ArchiveFormat, FileKind, HostClient};
use crate::project::ProjectRef;
use crate::store::KvStore;

/// What the cache may do for the rest of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheDecision {
    /// Caching is off or the remote commit is unknown. Nothing is read or
    /// written.
    Bypass,
    /// The cached generation matches the remote commit. Files are read from
    /// disk; kinds that missed are written once fetched.
    UseCache { pending: BTreeSet<FileKind> },
    /// The remote commit moved. Every fetched file starts the new generation.
    WriteAll,
}

impl CacheDecision {
    fn should_write(&self, kind: FileKind) -> bool {
        match self {
            Self::Bypass => false,
            Self::UseCache { pending } => pending.contains(&kind),
            Self::WriteAll => true,
        }
    }
}

/// How fetched archives are turned into the delivered zip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    /// Native format of the host.
    pub format: ArchiveFormat,
    /// Root folder to enforce, when folder renaming is enabled.
    pub rename_to: Option<String>,
}

/// Keeps only `[a-z0-9_-]` of a lowercased path segment.
fn path_segment(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

/// Cache directory of a project branch.
///
/// `None` when the slug or the branch has no usable character left, since
/// the directory would then collapse onto its parent.
#[must_use]
pub fn cache_dir_for(paths: &Paths, slug: &str, branch: &str) -> Option<PathBuf> {
    let slug = path_segment(slug);
    let branch = path_segment(branch);
    if slug.is_empty() || branch.is_empty() {
        return None;
    }
    Some(paths.cache_dir().join(slug).join(branch))
}

/// Removes every cache generation and every temp directory.
pub fn clean_all(paths: &Paths) -> io::Result<()> {
    for dir in [paths.cache_dir(), paths.temp_dir()] {
        match fs::remove_dir_all(&dir) {
            Ok(()) => info!("[CACHE] Removed {}", dir.display()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

/// Cache of one project branch for one request.
#[derive(Debug)]
pub struct CacheStore {
    dir: Option<PathBuf>,
    store: KvStore,
    slug: String,
    branch: String,
    decision: CacheDecision,
}

impl CacheStore {
    /// Opens the cache of a project branch.
    ///
    /// With caching enabled the remote commit is checked right away, and a
    /// stale generation is deleted before anything can be served from it.
    /// A project branch without a cache directory is always bypassed.
    pub fn open(
        paths: &Paths,
        store: KvStore,
        project: &ProjectRef,
        enabled: bool,
        host: &mut HostClient,
    ) -> Result<Self, AppError> {
        let dir = cache_dir_for(paths, &project.slug, &project.branch);
        if enabled && dir.is_none() {
            warn!(
                "[CACHE] No cache directory for {}/{}, bypassing",
                project.slug, project.branch
            );
        }

        let mut cache = Self {
            dir,
            store,
            slug: project.record_slug(),
            branch: project.record_branch(),
            decision: CacheDecision::Bypass,
        };

        if enabled && cache.dir.is_some() && !cache.is_fresh(host)? {
            cache.invalidate()?;
        }

        Ok(cache)
    }

    /// Compares the remote commit with the recorded one.
    ///
    /// An unreachable host bypasses the cache for this request. A new
    /// commit is recorded and switches the cache to write-all.
    pub fn is_fresh(&mut self, host: &mut HostClient) -> Result<bool, AppError> {
        let remote = match host.current_commit_id() {
            Ok(sha) => sha,
            Err(e) if e.is_connection() => {
                warn!("[CACHE] Cannot verify {}/{}: {}", self.slug, self.branch, e);
                self.decision = CacheDecision::Bypass;
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let local = self.store.last_commit(&self.slug, &self.branch)?;
        if local.as_deref() == Some(remote.as_str()) {
            debug!("[CACHE] {}/{} is fresh at {}", self.slug, self.branch, remote);
            self.decision = CacheDecision::UseCache {
                pending: BTreeSet::new(),
            };
            return Ok(true);
        }

        info!(
            "[CACHE] {}/{} moved from {:?} to {}",
            self.slug, self.branch, local, remote
        );
        self.store
            .set_last_commit(&self.slug, &self.branch, &remote)?;
        self.decision = CacheDecision::WriteAll;
        Ok(false)
    }

    /// Current decision.
    #[must_use]
    pub fn decision(&self) -> &CacheDecision {
        &self.decision
    }

    /// Directory of this generation.
    #[must_use]
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Path of a cached file.
    #[must_use]
    pub fn file_path(&self, kind: FileKind) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(format!("{}.tmp", kind.as_str())))
    }

    /// Reads a cached file. A miss marks the kind for writing.
    pub fn get_cached_file(&mut self, kind: FileKind) -> Option<Vec<u8>> {
        let path = self.file_path(kind)?;
        let CacheDecision::UseCache { pending } = &mut self.decision else {
            return None;
        };

        match fs::read(&path) {
            Ok(bytes) => {
                debug!("[CACHE] Hit {}", path.display());
                Some(bytes)
            }
            Err(_) => {
                debug!("[CACHE] Miss {}", path.display());
                pending.insert(kind);
                None
            }
        }
    }

    /// Writes a fetched file if the decision allows it.
    ///
    /// Empty files are never stored. Write failures are logged and do not
    /// fail the request.
    pub fn cache_file(&mut self, kind: FileKind, bytes: &[u8]) {
        if !self.decision.should_write(kind) {
            return;
        }
        if bytes.is_empty() {
            warn!("[CACHE] Refusing to store an empty {}", kind);
            return;
        }

        match self.write_file(kind, bytes) {
            Ok(()) => debug!("[CACHE] Stored {} ({} bytes)", kind, bytes.len()),
            Err(e) => warn!("[CACHE] Failed to store {}: {}", kind, e),
        }

        if let CacheDecision::UseCache { pending } = &mut self.decision {
            pending.remove(&kind);
        }
    }

    /// Normalizes a fetched archive, caches it and returns the bytes to serve.
    pub fn cache_archive(
        &mut self,
        bytes: Vec<u8>,
        layout: &ArchiveLayout,
        normalizer: &mut ArchiveNormalizer,
    ) -> Result<Vec<u8>, AppError> {
        let bytes = match &layout.rename_to {
            Some(folder) => normalizer.normalize(&bytes, layout.format, folder)?,
            None if layout.format == ArchiveFormat::TarGz => {
                normalizer.convert_to_zip(&bytes, layout.format)?
            }
            None => bytes,
        };

        self.cache_file(FileKind::Archive, &bytes);
        Ok(bytes)
    }

    /// Deletes this generation.
    pub fn invalidate(&self) -> io::Result<()> {
        let Some(dir) = &self.dir else {
            return Ok(());
        };
        match fs::remove_dir_all(dir) {
            Ok(()) => {
                info!("[CACHE] Dropped {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_file(&self, kind: FileKind, bytes: &[u8]) -> io::Result<()> {
        let (Some(dir), Some(path)) = (&self.dir, self.file_path(kind)) else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "no cache directory for this branch",
            ));
        };
        fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.persist(path).map_err(|e| e.error)?;
        Ok(())
    }
}
