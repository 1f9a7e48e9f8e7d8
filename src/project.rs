//! Request-scoped project identity and host credentials.

use std::fmt;
use std::path::Path;

use crate::config::{GlobalSettings, ProjectSettings, UserSecret};
use crate::error::AppError;
use crate::host::{FileKind, HostKind};
use crate::request::UpdateRequest;

/// Kind of project being updated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProjectType {
    #[default]
    Plugin,
    Theme,
}

impl ProjectType {
    /// Parses the `type` request parameter. Anything but `theme` is a plugin.
    #[must_use]
    pub fn from_param(value: Option<&str>) -> Self {
        match value {
            Some("theme") => Self::Theme,
            _ => Self::Plugin,
        }
    }
}

/// Identifies a remote project for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRef {
    /// Sanitized slug as requested.
    pub slug: String,
    pub branch: String,
    pub host_kind: HostKind,
    /// Key of the URL template and user tables.
    pub host_key: String,
    pub owner: String,
    pub remote_slug: Option<String>,
    pub folder_name: Option<String>,
    pub project_type: ProjectType,
    pub info_path: Option<String>,
    pub readme_path: Option<String>,
}

impl ProjectRef {
    /// Builds the reference from a validated request and its settings.
    #[must_use]
    pub fn new(request: &UpdateRequest, settings: &ProjectSettings) -> Self {
        Self {
            slug: request.slug.clone(),
            branch: request.branch.clone(),
            host_kind: HostKind::from_host(&settings.host),
            host_key: settings.host_key().to_string(),
            owner: settings.project_owner.clone(),
            remote_slug: settings.remote_slug.clone(),
            folder_name: settings.folder_name.clone(),
            project_type: request.project_type,
            info_path: settings.info.clone(),
            readme_path: settings.readme.clone(),
        }
    }

    /// Slug used in remote URLs.
    #[must_use]
    pub fn url_slug(&self) -> &str {
        self.remote_slug.as_deref().unwrap_or(&self.slug)
    }

    /// Name of the root folder in delivered archives.
    #[must_use]
    pub fn folder_name(&self) -> &str {
        self.folder_name.as_deref().unwrap_or(&self.slug)
    }

    /// Lowercase slug used for persisted records.
    #[must_use]
    pub fn record_slug(&self) -> String {
        self.slug.to_lowercase()
    }

    /// Lowercase branch used for persisted records.
    #[must_use]
    pub fn record_branch(&self) -> String {
        self.branch.to_lowercase()
    }

    /// Remote path of an info or readme file. Archives have none.
    #[must_use]
    pub fn remote_file_path(&self, kind: FileKind) -> Option<String> {
        match kind {
            FileKind::Info => Some(self.info_path.clone().unwrap_or_else(|| {
                match self.project_type {
                    ProjectType::Theme => "style.css".to_string(),
                    ProjectType::Plugin => format!("{}.php", self.slug),
                }
            })),
            FileKind::Readme => Some(
                self.readme_path
                    .clone()
                    .unwrap_or_else(|| "readme.md".to_string()),
            ),
            FileKind::Archive => None,
        }
    }

    /// True when update responses use the theme shape.
    #[must_use]
    pub fn is_theme(&self) -> bool {
        self.project_type == ProjectType::Theme
            || self
                .info_path
                .as_deref()
                .is_some_and(|p| has_extension(p, "css"))
    }

    /// True when the readme is rendered as markdown.
    #[must_use]
    pub fn readme_is_markdown(&self) -> bool {
        self.readme_path
            .as_deref()
            .is_none_or(|p| has_extension(p, "md"))
    }
}

fn has_extension(path: &str, ext: &str) -> bool {
    Path::new(path).extension().is_some_and(|e| e == ext)
}

/// Credentials of the host user.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub secret: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("secret", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .finish()
    }
}

impl Credentials {
    /// Resolves credentials from project settings, then the global user table.
    ///
    /// A project-level `token` overrides one from the user table.
    pub fn resolve(settings: &ProjectSettings, global: &GlobalSettings) -> Result<Self, AppError> {
        let user = settings.user.clone().unwrap_or_default();

        let (secret, table_token) = match &settings.password {
            Some(password) => (Some(password.clone()), None),
            None => match global.user_secret(settings.host_key(), &user) {
                Some(UserSecret::Password(pass)) => (Some(pass.clone()), None),
                Some(UserSecret::WithToken { pass, token }) => (Some(pass.clone()), token.clone()),
                None => (None, None),
            },
        };

        let secret = secret.ok_or(AppError::MissingCredential)?;
        let session_token = settings.token.clone().or(table_token);

        Ok(Self {
            user,
            secret,
            session_token,
        })
    }
}
