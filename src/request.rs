//! Request parameters and access validation.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::config::ProjectSettings;
use crate::error::AppError;
use crate::project::ProjectType;

/// Branch used when the request names none.
pub const DEFAULT_BRANCH: &str = "master";

/// Supported actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    BasicCheck,
    PluginInformation,
    DownloadLatest,
    ProjectDetails,
    CleanCacheAndTemp,
}

impl Action {
    /// Wire name of the action.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BasicCheck => "basic_check",
            Self::PluginInformation => "plugin_information",
            Self::DownloadLatest => "download_latest",
            Self::ProjectDetails => "project_details",
            Self::CleanCacheAndTemp => "clean_cacheandtemp",
        }
    }

    /// True when the action talks to the remote host.
    #[must_use]
    pub fn needs_host(self) -> bool {
        !matches!(self, Self::CleanCacheAndTemp)
    }
}

impl FromStr for Action {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "basic_check" => Ok(Self::BasicCheck),
            "plugin_information" => Ok(Self::PluginInformation),
            "download_latest" => Ok(Self::DownloadLatest),
            "project_details" => Ok(Self::ProjectDetails),
            "clean_cacheandtemp" => Ok(Self::CleanCacheAndTemp),
            other => Err(AppError::InvalidAction(other.to_string())),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keeps only `[A-Za-z0-9-_.!]`.
#[must_use]
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '!'))
        .collect()
}

/// A parsed update request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateRequest {
    pub action: Action,
    pub slug: String,
    /// Kept verbatim.
    pub apikey: String,
    /// Installed version, `basic_check` only.
    pub version: Option<String>,
    pub branch: String,
    pub project_type: ProjectType,
}

impl UpdateRequest {
    /// Parses request parameters.
    ///
    /// Required keys are checked in order: `action`, `apikey` (or
    /// `api-key`), `slug`, and `version` for `basic_check`.
    pub fn from_params(params: &HashMap<String, String>) -> Result<Self, AppError> {
        let action_raw = params
            .get("action")
            .map(|a| sanitize(a))
            .ok_or(AppError::MissingInput("action"))?;

        let apikey = params
            .get("apikey")
            .or_else(|| params.get("api-key"))
            .cloned()
            .ok_or(AppError::MissingInput("apikey"))?;

        let slug = params
            .get("slug")
            .map(|s| sanitize(s))
            .ok_or(AppError::MissingInput("slug"))?;

        let version = if action_raw == Action::BasicCheck.as_str() {
            Some(
                params
                    .get("version")
                    .map(|v| sanitize(v))
                    .ok_or(AppError::MissingInput("version"))?,
            )
        } else {
            None
        };

        let action = action_raw.parse()?;

        let branch = params
            .get("branch")
            .map(|b| sanitize(b))
            .unwrap_or_else(|| DEFAULT_BRANCH.to_string());

        let project_type = ProjectType::from_param(params.get("type").map(String::as_str));

        Ok(Self {
            action,
            slug,
            apikey,
            version,
            branch,
            project_type,
        })
    }

    /// Checks the request against the project's access rules.
    pub fn validate(&self, settings: &ProjectSettings, remote_ip: &str) -> Result<(), AppError> {
        if settings.permits(remote_ip, &self.apikey, &self.branch) {
            return Ok(());
        }

        tracing::info!(
            "[REQUEST] Access denied for {} from {} on branch {}",
            self.slug,
            remote_ip,
            self.branch
        );
        Err(AppError::BadAccess {
            ip: remote_ip.to_string(),
            apikey: self.apikey.clone(),
            branch: self.branch.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_parse_basic_check() {
        let req = UpdateRequest::from_params(&params(&[
            ("action", "basic_check"),
            ("slug", "my plugin<>"),
            ("api-key", "k e/y"),
            ("version", "1.0"),
        ]))
        .unwrap();

        assert_eq!(req.action, Action::BasicCheck);
        assert_eq!(req.slug, "myplugin");
        assert_eq!(req.apikey, "k e/y");
        assert_eq!(req.version.as_deref(), Some("1.0"));
        assert_eq!(req.branch, "master");
        assert_eq!(req.project_type, ProjectType::Plugin);
    }

    #[test]
    fn test_missing_inputs_in_order() {
        let err = UpdateRequest::from_params(&params(&[("slug", "x")])).unwrap_err();
        assert!(matches!(err, AppError::MissingInput("action")));

        let err = UpdateRequest::from_params(&params(&[("action", "basic_check"), ("slug", "x")]))
            .unwrap_err();
        assert!(matches!(err, AppError::MissingInput("apikey")));

        let err = UpdateRequest::from_params(&params(&[
            ("action", "basic_check"),
            ("slug", "x"),
            ("apikey", "k"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::MissingInput("version")));
        assert_eq!(err.code(), 8);
    }

    #[test]
    fn test_version_only_required_for_basic_check() {
        let req = UpdateRequest::from_params(&params(&[
            ("action", "download_latest"),
            ("slug", "x"),
            ("apikey", "k"),
            ("branch", "feature/one"),
            ("type", "theme"),
        ]))
        .unwrap();
        assert_eq!(req.version, None);
        assert_eq!(req.branch, "featureone");
        assert_eq!(req.project_type, ProjectType::Theme);
    }

    #[test]
    fn test_unknown_action() {
        let err = UpdateRequest::from_params(&params(&[
            ("action", "drop_tables"),
            ("slug", "x"),
            ("apikey", "k"),
        ]))
        .unwrap_err();
        assert!(matches!(err, AppError::InvalidAction(ref a) if a == "drop_tables"));
        assert_eq!(err.code(), 9);
    }

    #[test]
    fn test_validate() {
        let settings = ProjectSettings::parse(
            r#"{"host": "github", "projectOwner": "a", "allowed": [{"apikey": "good"}]}"#,
        )
        .unwrap();
        let mut req = UpdateRequest::from_params(&params(&[
            ("action", "plugin_information"),
            ("slug", "x"),
            ("apikey", "good"),
        ]))
        .unwrap();

        assert!(req.validate(&settings, "127.0.0.1").is_ok());

        req.apikey = "bad".to_string();
        let err = req.validate(&settings, "127.0.0.1").unwrap_err();
        assert_eq!(err.status(), "bad access");
    }

    proptest! {
        #[test]
        fn prop_sanitize_keeps_only_safe_chars(input in ".*") {
            let out = sanitize(&input);
            prop_assert!(out
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || "-_.!".contains(c)));
        }

        #[test]
        fn prop_sanitize_is_idempotent(input in ".*") {
            let once = sanitize(&input);
            prop_assert_eq!(sanitize(&once), once);
        }
    }
}
