//! Persisted key-value database (`db.json`).
//!
//! Holds the download counters, the last known commit per project branch
//! and the last successful interactive login per host. The file is shared
//! by concurrent requests, so every read-modify-write happens under an
//! exclusive advisory lock on a `.lk` sibling and is persisted by atomic
//! rename.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

/// Errors from the key-value database.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to replace {0}")]
    Persist(#[from] tempfile::PersistError),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Contents of `db.json`. Unknown top-level keys are kept as they are.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    downloads: BTreeMap<String, Value>,

    #[serde(default, rename = "lastCommitSha")]
    last_commit_sha: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default, rename = "lastGitlabConnections")]
    last_logins: BTreeMap<String, Value>,

    #[serde(flatten)]
    extra: serde_json::Map<String, Value>,
}

/// Reads an integer that older databases may have stored as a string.
fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl Database {
    /// Download count of a project. Keys are lowercase.
    #[must_use]
    pub fn downloads(&self, slug: &str) -> u64 {
        self.downloads
            .get(&slug.to_lowercase())
            .and_then(as_int)
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0)
    }

    /// Adds one download and returns the new count.
    pub fn increment_downloads(&mut self, slug: &str) -> u64 {
        let count = self.downloads(slug) + 1;
        self.downloads.insert(slug.to_lowercase(), Value::from(count));
        count
    }

    /// Last commit id seen for a project branch.
    #[must_use]
    pub fn last_commit(&self, slug: &str, branch: &str) -> Option<&str> {
        self.last_commit_sha
            .get(slug)
            .and_then(|branches| branches.get(branch))
            .map(String::as_str)
    }

    /// Records the commit id seen for a project branch.
    pub fn set_last_commit(&mut self, slug: &str, branch: &str, sha: &str) {
        self.last_commit_sha
            .entry(slug.to_string())
            .or_default()
            .insert(branch.to_string(), sha.to_string());
    }

    /// Unix time of the last successful login to a host, if any.
    #[must_use]
    pub fn last_login(&self, host_id: &str) -> Option<i64> {
        self.last_logins.get(host_id).and_then(as_int)
    }

    /// Records the last successful login to a host. `0` forces a new login.
    pub fn set_last_login(&mut self, host_id: &str, timestamp: i64) {
        self.last_logins
            .insert(host_id.to_string(), Value::from(timestamp));
    }
}

/// Handle to the database file.
#[derive(Debug, Clone)]
pub struct KvStore {
    path: PathBuf,
}

impl KvStore {
    /// Creates a handle. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the current contents.
    pub fn load(&self) -> Result<Database, StoreError> {
        let _guard = self.lock(false)?;
        self.read()
    }

    /// Loads, mutates and saves the database under one exclusive lock.
    pub fn update<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Database) -> T,
    {
        let _guard = self.lock(true)?;
        let mut db = self.read()?;
        let result = f(&mut db);
        self.write(&db)?;
        Ok(result)
    }

    /// Download count of a project.
    pub fn downloads(&self, slug: &str) -> Result<u64, StoreError> {
        Ok(self.load()?.downloads(slug))
    }

    /// Adds one download to a project.
    pub fn increment_downloads(&self, slug: &str) -> Result<u64, StoreError> {
        self.update(|db| db.increment_downloads(slug))
    }

    /// Last commit id seen for a project branch.
    pub fn last_commit(&self, slug: &str, branch: &str) -> Result<Option<String>, StoreError> {
        Ok(self.load()?.last_commit(slug, branch).map(str::to_string))
    }

    /// Records the commit id seen for a project branch.
    pub fn set_last_commit(&self, slug: &str, branch: &str, sha: &str) -> Result<(), StoreError> {
        self.update(|db| db.set_last_commit(slug, branch, sha))
    }

    /// Unix time of the last successful login to a host.
    pub fn last_login(&self, host_id: &str) -> Result<Option<i64>, StoreError> {
        Ok(self.load()?.last_login(host_id))
    }

    /// Records the last successful login to a host.
    pub fn set_last_login(&self, host_id: &str, timestamp: i64) -> Result<(), StoreError> {
        self.update(|db| db.set_last_login(host_id, timestamp))
    }

    fn read(&self) -> Result<Database, StoreError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Database::default()),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str(&raw) {
            Ok(db) => Ok(db),
            Err(e) => {
                warn!("[STORE] Unreadable database {}: {}", self.path.display(), e);
                Ok(Database::default())
            }
        }
    }

    fn write(&self, db: &Database) -> Result<(), StoreError> {
        let parent = self.path.parent().unwrap_or(Path::new("."));
        fs::create_dir_all(parent)?;

        let body = serde_json::to_string_pretty(db)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(body.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path)?;

        debug!("[STORE] Saved {}", self.path.display());
        Ok(())
    }

    /// Locks the `.lk` sibling. Readers skip locking when no writer ever ran.
    fn lock(&self, exclusive: bool) -> Result<Option<File>, StoreError> {
        let lock_path = self.path.with_extension("lk");
        let lock_err = |source| StoreError::Lock {
            path: lock_path.clone(),
            source,
        };

        if !exclusive {
            return match File::open(&lock_path) {
                Ok(file) => {
                    file.lock_shared().map_err(lock_err)?;
                    Ok(Some(file))
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(lock_err(e)),
            };
        }

        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&lock_path)
            .map_err(lock_err)?;
        file.lock_exclusive().map_err(lock_err)?;
        Ok(Some(file))
    }
}
