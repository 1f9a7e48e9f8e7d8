//! Per-project settings (`projectSettings/<slug>.json`).

use serde::Deserialize;

use super::{ConfigError, Paths, read_commented_json};

/// Host value that selects the interactive-session client.
const SESSION_HOST: &str = "gitlab";

/// Owner used for session hosts that configure none.
const DEFAULT_SESSION_OWNER: &str = "MrX";

/// A rule value that is either a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    /// Returns true if `value` matches the rule.
    #[must_use]
    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::One(v) => v == value,
            Self::Many(values) => values.iter().any(|v| v == value),
        }
    }
}

/// One entry of the `allowed` list. Absent fields match anything.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccessRule {
    #[serde(default)]
    pub ip: Option<OneOrMany>,
    #[serde(default)]
    pub apikey: Option<OneOrMany>,
    #[serde(default)]
    pub branch: Option<OneOrMany>,
}

impl AccessRule {
    /// Returns true if every configured field matches.
    ///
    /// A rule with no fields at all grants nothing.
    #[must_use]
    pub fn permits(&self, ip: &str, apikey: &str, branch: &str) -> bool {
        let checks = [
            self.ip.as_ref().map(|r| r.matches(ip)),
            self.apikey.as_ref().map(|r| r.matches(apikey)),
            self.branch.as_ref().map(|r| r.matches(branch)),
        ];

        let mut any = false;
        for check in checks.into_iter().flatten() {
            if !check {
                return false;
            }
            any = true;
        }
        any
    }
}

/// The `allowed` setting.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Allowed {
    /// A bare string; only `"*"` grants access.
    Everyone(String),
    /// A list of rules; the first permitting rule grants access.
    Rules(Vec<AccessRule>),
    /// Anything else grants nothing.
    Other(serde_json::Value),
}

impl Allowed {
    /// Evaluates the access rules for a request.
    #[must_use]
    pub fn permits(&self, ip: &str, apikey: &str, branch: &str) -> bool {
        match self {
            Self::Everyone(s) => s == "*",
            Self::Rules(rules) => rules.iter().any(|r| r.permits(ip, apikey, branch)),
            Self::Other(_) => false,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProjectSettings {
    host: Option<String>,
    project_owner: Option<String>,
    #[serde(rename = "globalkey")]
    global_key: Option<String>,
    allowed: Option<Allowed>,
    user: Option<String>,
    password: Option<String>,
    token: Option<String>,
    remote_slug: Option<String>,
    folder_name: Option<String>,
    info: Option<String>,
    readme: Option<String>,
}

/// Validated project settings.
#[derive(Debug, Clone)]
pub struct ProjectSettings {
    pub host: String,
    pub project_owner: String,
    pub global_key: Option<String>,
    pub allowed: Option<Allowed>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub token: Option<String>,
    pub remote_slug: Option<String>,
    pub folder_name: Option<String>,
    pub info: Option<String>,
    pub readme: Option<String>,
}

impl ProjectSettings {
    /// Loads and validates the settings of a project.
    pub fn load(paths: &Paths, slug: &str) -> Result<Self, ConfigError> {
        let path = paths.project_settings(slug);
        match read_commented_json::<RawProjectSettings>(&path) {
            Ok(Some(raw)) => Self::from_raw(raw),
            Ok(None) => Err(ConfigError::ProjectMissing(path)),
            Err(e) => {
                tracing::warn!("[CONFIG] Invalid settings for {}: {}", slug, e);
                Err(ConfigError::ProjectInvalid(e))
            }
        }
    }

    /// Parses settings from a JSON string with comment lines.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let raw: RawProjectSettings = serde_json::from_str(&super::strip_comment_lines(raw))
            .map_err(|e| ConfigError::ProjectInvalid(e.to_string()))?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawProjectSettings) -> Result<Self, ConfigError> {
        let is_session_host = raw.host.as_deref() == Some(SESSION_HOST);

        let project_owner = if is_session_host {
            if raw.global_key.is_none() {
                return Err(ConfigError::MissingKey("globalkey"));
            }
            raw.project_owner
                .unwrap_or_else(|| DEFAULT_SESSION_OWNER.to_string())
        } else {
            raw.project_owner
                .ok_or(ConfigError::MissingKey("projectOwner"))?
        };

        let host = raw.host.ok_or(ConfigError::MissingKey("host"))?;

        Ok(Self {
            host,
            project_owner,
            global_key: raw.global_key,
            allowed: raw.allowed,
            user: raw.user,
            password: raw.password,
            token: raw.token,
            remote_slug: raw.remote_slug,
            folder_name: raw.folder_name,
            info: raw.info,
            readme: raw.readme,
        })
    }

    /// Key used to look up URL templates and credentials.
    #[must_use]
    pub fn host_key(&self) -> &str {
        self.global_key.as_deref().unwrap_or(&self.host)
    }

    /// Returns true if the request passes the `allowed` rules.
    #[must_use]
    pub fn permits(&self, ip: &str, apikey: &str, branch: &str) -> bool {
        self.allowed
            .as_ref()
            .is_some_and(|a| a.permits(ip, apikey, branch))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_project() {
        let settings = ProjectSettings::parse(
            r#"{
                "host": "bitbucket",
                "projectOwner": "acme",
                "allowed": "*",
                "user": "alice",
                "folderName": "my-plugin"
            }"#,
        )
        .unwrap();

        assert_eq!(settings.host_key(), "bitbucket");
        assert_eq!(settings.folder_name.as_deref(), Some("my-plugin"));
        assert!(settings.permits("1.2.3.4", "any", "dev"));
    }

    #[test]
    fn test_missing_owner() {
        let err = ProjectSettings::parse(r#"{"host": "bitbucket"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("projectOwner")));
        assert_eq!(err.code(), 7);
    }

    #[test]
    fn test_session_host_requires_global_key() {
        let err = ProjectSettings::parse(r#"{"host": "gitlab"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKey("globalkey")));

        let settings =
            ProjectSettings::parse(r#"{"host": "gitlab", "globalkey": "Corp-Git"}"#).unwrap();
        assert_eq!(settings.project_owner, "MrX");
        assert_eq!(settings.host_key(), "Corp-Git");
    }

    #[test]
    fn test_non_object_is_invalid() {
        let err = ProjectSettings::parse("[1, 2]").unwrap_err();
        assert_eq!(err.code(), 6);
    }

    #[test]
    fn test_rules_skip_mismatching_entries() {
        let settings = ProjectSettings::parse(
            r#"{
                "host": "github",
                "projectOwner": "acme",
                "allowed": [
                    { "ip": "10.0.0.1", "apikey": "one" },
                    { "apikey": ["two", "three"], "branch": "master" }
                ]
            }"#,
        )
        .unwrap();

        assert!(settings.permits("10.0.0.1", "one", "dev"));
        assert!(!settings.permits("10.0.0.2", "one", "dev"));
        assert!(settings.permits("10.0.0.2", "three", "master"));
        assert!(!settings.permits("10.0.0.2", "three", "dev"));
    }

    #[test]
    fn test_missing_or_odd_allowed_denies() {
        let none = ProjectSettings::parse(r#"{"host": "github", "projectOwner": "a"}"#).unwrap();
        assert!(!none.permits("1.1.1.1", "k", "master"));

        let odd = ProjectSettings::parse(
            r#"{"host": "github", "projectOwner": "a", "allowed": {"ip": "1.1.1.1"}}"#,
        )
        .unwrap();
        assert!(!odd.permits("1.1.1.1", "k", "master"));

        let empty_rule =
            ProjectSettings::parse(r#"{"host": "github", "projectOwner": "a", "allowed": [{}]}"#)
                .unwrap();
        assert!(!empty_rule.permits("1.1.1.1", "k", "master"));
    }
}
