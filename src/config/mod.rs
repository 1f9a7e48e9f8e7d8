//! Configuration module for projupdate.
//!
//! Handles the data root layout and loading of the JSON settings files:
//! `globalSettings.json` at the root and one `projectSettings/<slug>.json`
//! per project. Both formats accept whole-line comments.

mod global;
mod project;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

pub use global::{GlobalSettings, HostUrls, UrlName, UserSecret};
pub use project::{AccessRule, Allowed, OneOrMany, ProjectSettings};

/// Global settings file name.
pub const GLOBAL_SETTINGS_FILE: &str = "globalSettings.json";

/// Directory holding per-project settings.
pub const PROJECT_SETTINGS_DIR: &str = "projectSettings";

/// Key-value database file name.
pub const DATABASE_FILE: &str = "db.json";

/// Prefixes that mark a settings line as a comment.
const COMMENT_PREFIXES: [&str; 4] = ["//", "/*", "* ", "*/"];

/// Errors raised while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The project settings file does not exist.
    #[error("Project settings file not existing")]
    ProjectMissing(PathBuf),

    /// The project settings file is not a JSON object.
    #[error("error in config file.")]
    ProjectInvalid(String),

    /// A required project setting is absent.
    #[error("missing \"{0}\" in config.")]
    MissingKey(&'static str),

    /// The global settings file is not a JSON object.
    #[error("error in globalSettings.json file.")]
    GlobalInvalid(String),

    /// The global settings file does not exist.
    #[error("globalSettings.json not existing")]
    GlobalMissing(PathBuf),

    /// No URL template is configured for a host key.
    #[error("missing url \"{host_key}.{name}\" in globalSettings.json.")]
    MissingUrl { host_key: String, name: UrlName },

    /// A URL template could not be parsed.
    #[error("invalid url \"{0}\" in globalSettings.json.")]
    InvalidUrl(String),
}

impl ConfigError {
    /// Stable numeric code of the response envelope.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::ProjectMissing(_) => 5,
            Self::ProjectInvalid(_) => 6,
            Self::MissingKey(_) => 7,
            Self::GlobalInvalid(_) | Self::MissingUrl { .. } | Self::InvalidUrl(_) => 10,
            Self::GlobalMissing(_) => 11,
        }
    }
}

/// Layout of the data root.
///
/// Everything the server reads or writes lives below one directory:
///
/// ```text
/// <root>/globalSettings.json
/// <root>/projectSettings/<slug>.json
/// <root>/db.json
/// <root>/cache/<slug>/<branch>/
/// <root>/temp/
/// <root>/cookies/
/// <root>/logs/
/// <root>/res/templates/
/// ```
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    /// Creates the layout for a data root.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the data root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the global settings file.
    #[must_use]
    pub fn global_settings(&self) -> PathBuf {
        self.root.join(GLOBAL_SETTINGS_FILE)
    }

    /// Path of the settings file for a project slug.
    #[must_use]
    pub fn project_settings(&self, slug: &str) -> PathBuf {
        self.root
            .join(PROJECT_SETTINGS_DIR)
            .join(format!("{}.json", slug.to_lowercase()))
    }

    /// Path of the key-value database.
    #[must_use]
    pub fn database(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    /// Base directory of all cache generations.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("cache")
    }

    /// Parent directory of per-request temp directories.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.root.join("temp")
    }

    /// Directory of persisted login cookies.
    #[must_use]
    pub fn cookies_dir(&self) -> PathBuf {
        self.root.join("cookies")
    }

    /// Directory of log files.
    #[must_use]
    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Directory of the details page templates.
    #[must_use]
    pub fn templates_dir(&self) -> PathBuf {
        self.root.join("res").join("templates")
    }
}

/// Removes comment lines from a settings file.
///
/// A line is a comment when its trimmed form starts with `//`, `/*`, `* `
/// or `*/`. Remaining lines are trimmed.
#[must_use]
pub fn strip_comment_lines(raw: &str) -> String {
    raw.lines()
        .map(str::trim)
        .filter(|line| !COMMENT_PREFIXES.iter().any(|p| line.starts_with(p)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Reads a commented JSON file. `Ok(None)` if the file does not exist.
fn read_commented_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, String> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.to_string()),
    };

    serde_json::from_str(&strip_comment_lines(&raw))
        .map(Some)
        .map_err(|e| e.to_string())
}
