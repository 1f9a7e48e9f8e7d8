//! Global settings (`globalSettings.json`).

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;

use super::{ConfigError, Paths, read_commented_json};

/// Names of the per-host URL templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UrlName {
    Commits,
    Archive,
    Files,
}

impl UrlName {
    /// Key of the template in the settings file.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Commits => "commits",
            Self::Archive => "archive",
            Self::Files => "files",
        }
    }
}

impl fmt::Display for UrlName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// URL templates of one host key.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HostUrls {
    #[serde(default)]
    pub commits: Option<String>,
    #[serde(default)]
    pub archive: Option<String>,
    #[serde(default)]
    pub files: Option<String>,
}

impl HostUrls {
    /// Returns the template for a URL name.
    #[must_use]
    pub fn get(&self, name: UrlName) -> Option<&str> {
        match name {
            UrlName::Commits => self.commits.as_deref(),
            UrlName::Archive => self.archive.as_deref(),
            UrlName::Files => self.files.as_deref(),
        }
    }
}

/// Entry of the per-host user table.
///
/// Either a plain password, or a password paired with a session token.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum UserSecret {
    Password(String),
    WithToken {
        pass: String,
        #[serde(default)]
        token: Option<String>,
    },
}

/// Process-independent settings, read once per request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalSettings {
    /// Public URL of this server, used in package and details links.
    #[serde(default)]
    pub base_url: String,

    /// Enables the on-disk cache.
    #[serde(default)]
    pub use_cache: bool,

    /// Renames the archive root folder to the project folder name.
    #[serde(default)]
    pub rename_folders: bool,

    /// URL templates keyed by host key.
    #[serde(default)]
    pub urls: HashMap<String, HostUrls>,

    /// Credentials keyed by host key, then user name.
    #[serde(default)]
    pub users: HashMap<String, HashMap<String, UserSecret>>,
}

impl GlobalSettings {
    /// Loads `globalSettings.json` from the data root.
    pub fn load(paths: &Paths) -> Result<Self, ConfigError> {
        let path = paths.global_settings();
        match read_commented_json::<Self>(&path) {
            Ok(Some(settings)) => Ok(settings),
            Ok(None) => Err(ConfigError::GlobalMissing(path)),
            Err(e) => {
                tracing::warn!("[CONFIG] Invalid global settings: {}", e);
                Err(ConfigError::GlobalInvalid(e))
            }
        }
    }

    /// Looks up a URL template for a host key.
    pub fn url(&self, host_key: &str, name: UrlName) -> Result<&str, ConfigError> {
        self.urls
            .get(host_key)
            .and_then(|urls| urls.get(name))
            .ok_or_else(|| ConfigError::MissingUrl {
                host_key: host_key.to_string(),
                name,
            })
    }

    /// Looks up the stored secret of a host user.
    #[must_use]
    pub fn user_secret(&self, host_key: &str, user: &str) -> Option<&UserSecret> {
        self.users.get(host_key).and_then(|users| users.get(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        // Settings for the update server
        {
            "baseUrl": "https://updates.example.org/",
            "useCache": true,
            "urls": {
                "bitbucket": {
                    "commits": "https://api.example.org/:projectOwner/:slug/commits/:branch",
                    "files": "https://api.example.org/:projectOwner/:slug/raw/:branch/:filepath"
                }
            },
            "users": {
                "bitbucket": {
                    "alice": "secret",
                    "bob": { "pass": "hunter2", "token": "tok" }
                }
            }
        }
    "#;

    fn sample() -> GlobalSettings {
        serde_json::from_str(&super::super::strip_comment_lines(SAMPLE)).unwrap()
    }

    #[test]
    fn test_parse_global_settings() {
        let settings = sample();
        assert_eq!(settings.base_url, "https://updates.example.org/");
        assert!(settings.use_cache);
        assert!(!settings.rename_folders);
    }

    #[test]
    fn test_url_lookup() {
        let settings = sample();
        assert!(
            settings
                .url("bitbucket", UrlName::Commits)
                .unwrap()
                .ends_with("/commits/:branch")
        );
        let err = settings.url("bitbucket", UrlName::Archive).unwrap_err();
        assert_eq!(err.code(), 10);
        assert!(settings.url("gitlab", UrlName::Files).is_err());
    }

    #[test]
    fn test_user_secret_forms() {
        let settings = sample();
        assert!(matches!(
            settings.user_secret("bitbucket", "alice"),
            Some(UserSecret::Password(p)) if p == "secret"
        ));
        assert!(matches!(
            settings.user_secret("bitbucket", "bob"),
            Some(UserSecret::WithToken { pass, token: Some(t) }) if pass == "hunter2" && t == "tok"
        ));
        assert!(settings.user_secret("bitbucket", "carol").is_none());
    }
}
