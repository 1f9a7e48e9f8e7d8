//! Remote host clients.
//!
//! One [`HostClient`] per request, selected by the project's `host`
//! setting. Every variant can report the latest commit of the requested
//! branch and fetch the info file, the readme and the source archive; they
//! differ in how requests are authenticated and in the archive format.

mod default;
mod interactive;
mod session;
mod token;
mod transport;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConfigError, GlobalSettings, UrlName};
use crate::error::AppError;
use crate::project::{Credentials, ProjectRef};
use crate::store::KvStore;

pub use default::DefaultClient;
pub use interactive::SessionClient;
pub use session::{
    CookieJar, MAX_LOGIN_ATTEMPTS, SESSION_LIFETIME_SECS, SessionManager, SessionState,
    SessionTiming, extract_authenticity_token, host_id,
};
pub use token::TokenClient;
pub use transport::{
    HttpRequest, HttpResponse, HttpTransport, Method, REQUEST_TIMEOUT, ReqwestTransport,
    SetCookie, TransportError, parse_set_cookie,
};

/// Provider family of a project host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostKind {
    /// GitHub-style host with unauthenticated requests.
    Default,
    /// Bitbucket-style host with HTTP Basic auth on every request.
    TokenAuth,
    /// Gitlab-style host reached through a scraped web login.
    InteractiveSession,
}

impl HostKind {
    /// Maps the `host` setting to a client family. Unknown hosts use the default.
    #[must_use]
    pub fn from_host(host: &str) -> Self {
        match host.to_lowercase().replace('-', "").as_str() {
            "bitbucket" => Self::TokenAuth,
            "gitlab" => Self::InteractiveSession,
            _ => Self::Default,
        }
    }

    /// Native archive format of the host.
    #[must_use]
    pub fn archive_format(self) -> ArchiveFormat {
        match self {
            Self::InteractiveSession => ArchiveFormat::TarGz,
            Self::Default | Self::TokenAuth => ArchiveFormat::Zip,
        }
    }
}

impl fmt::Display for HostKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "host",
            Self::TokenAuth => "bitbucket",
            Self::InteractiveSession => "gitlab",
        })
    }
}

/// Host operation, for error reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Commits,
    File,
    Archive,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Commits => "commits",
            Self::File => "file",
            Self::Archive => "archive",
        })
    }
}

/// Files fetched from a host and kept in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FileKind {
    Info,
    Readme,
    Archive,
}

impl FileKind {
    /// Name used for cache file names.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Readme => "readme",
            Self::Archive => "archive",
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// URL templates of one project, with `:slug`, `:projectOwner` and
/// `:branch` already substituted.
#[derive(Debug, Clone)]
pub struct Endpoints {
    host_key: String,
    commits: Option<String>,
    archive: Option<String>,
    files: Option<String>,
    info_path: String,
    readme_path: String,
}

impl Endpoints {
    /// Renders the templates configured for the project's host key.
    #[must_use]
    pub fn new(global: &GlobalSettings, project: &ProjectRef) -> Self {
        let render = |name| {
            global
                .url(&project.host_key, name)
                .ok()
                .map(|template| render_template(template, project))
        };

        Self {
            host_key: project.host_key.clone(),
            commits: render(UrlName::Commits),
            archive: render(UrlName::Archive),
            files: render(UrlName::Files),
            info_path: project
                .remote_file_path(FileKind::Info)
                .unwrap_or_default(),
            readme_path: project
                .remote_file_path(FileKind::Readme)
                .unwrap_or_default(),
        }
    }

    /// Rendered template by name.
    pub fn url(&self, name: UrlName) -> Result<&str, ConfigError> {
        let url = match name {
            UrlName::Commits => &self.commits,
            UrlName::Archive => &self.archive,
            UrlName::Files => &self.files,
        };
        url.as_deref().ok_or_else(|| ConfigError::MissingUrl {
            host_key: self.host_key.clone(),
            name,
        })
    }

    /// URL of a file. Info and readme files go through the `files` template.
    pub fn file_url(&self, kind: FileKind) -> Result<String, ConfigError> {
        let path = match kind {
            FileKind::Info => &self.info_path,
            FileKind::Readme => &self.readme_path,
            FileKind::Archive => return self.url(UrlName::Archive).map(str::to_string),
        };
        Ok(self.url(UrlName::Files)?.replace(":filepath", path))
    }
}

/// Substitutes project placeholders into a URL template.
#[must_use]
pub fn render_template(template: &str, project: &ProjectRef) -> String {
    template
        .replace(":slug", project.url_slug())
        .replace(":projectOwner", &project.owner)
        .replace(":branch", &project.branch)
}

/// Maps a raw response to its body, treating anything but 200 as a
/// connection failure.
pub(crate) fn expect_ok(
    host: HostKind,
    operation: Operation,
    result: Result<HttpResponse, TransportError>,
) -> Result<HttpResponse, AppError> {
    match result {
        Ok(response) if response.status == 200 => Ok(response),
        Ok(response) => Err(AppError::connection(
            host,
            operation,
            format!("HTTP {}", response.status),
        )),
        Err(e) => Err(AppError::connection(host, operation, e.to_string())),
    }
}

/// Reads the `sha` of the first entry of a JSON commit list.
pub(crate) fn first_commit_sha(host: HostKind, body: &[u8]) -> Result<String, AppError> {
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| AppError::connection(host, Operation::Commits, e.to_string()))?;

    parsed
        .as_array()
        .and_then(|commits| commits.first())
        .and_then(|commit| commit.get("sha"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| AppError::connection(host, Operation::Commits, "empty commit list"))
}

/// Shared dependencies of host clients.
#[derive(Clone)]
pub struct HostContext {
    pub transport: Arc<dyn HttpTransport>,
    /// Database holding the login timestamps.
    pub store: KvStore,
    /// Directory of persisted session cookies.
    pub cookies_dir: PathBuf,
    pub timing: SessionTiming,
    /// Current Unix time.
    pub clock: fn() -> i64,
}

impl HostContext {
    /// Creates a context with real pauses and the system clock.
    pub fn new(transport: Arc<dyn HttpTransport>, store: KvStore, cookies_dir: PathBuf) -> Self {
        Self {
            transport,
            store,
            cookies_dir,
            timing: SessionTiming::default(),
            clock: unix_now,
        }
    }
}

/// Current Unix time in seconds.
#[must_use]
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Client for one project's host.
pub enum HostClient {
    Default(DefaultClient),
    TokenAuth(TokenClient),
    InteractiveSession(SessionClient),
}

impl HostClient {
    /// Builds the client matching the project's host kind.
    ///
    /// Credentials are required for every kind except the default one.
    pub fn new(
        project: &ProjectRef,
        global: &GlobalSettings,
        credentials: Option<Credentials>,
        ctx: &HostContext,
    ) -> Result<Self, AppError> {
        let endpoints = Endpoints::new(global, project);
        let transport = Arc::clone(&ctx.transport);

        let client = match project.host_kind {
            HostKind::Default => Self::Default(DefaultClient::new(transport, endpoints)),
            HostKind::TokenAuth => {
                let credentials = credentials.ok_or(AppError::MissingCredential)?;
                Self::TokenAuth(TokenClient::new(transport, endpoints, credentials))
            }
            HostKind::InteractiveSession => {
                let credentials = credentials.ok_or(AppError::MissingCredential)?;
                let files_url = endpoints.url(UrlName::Files)?;
                let session = SessionManager::new(&project.host_key, files_url, ctx)?;
                Self::InteractiveSession(SessionClient::new(
                    transport,
                    endpoints,
                    credentials,
                    session,
                    project.branch.clone(),
                ))
            }
        };

        Ok(client)
    }

    /// Host kind of this client.
    #[must_use]
    pub fn kind(&self) -> HostKind {
        match self {
            Self::Default(_) => HostKind::Default,
            Self::TokenAuth(_) => HostKind::TokenAuth,
            Self::InteractiveSession(_) => HostKind::InteractiveSession,
        }
    }

    /// Latest commit id of the requested branch.
    pub fn current_commit_id(&mut self) -> Result<String, AppError> {
        match self {
            Self::Default(c) => c.current_commit_id(),
            Self::TokenAuth(c) => c.current_commit_id(),
            Self::InteractiveSession(c) => c.current_commit_id(),
        }
    }

    /// Fetches a file. `FileKind::Archive` fetches the source archive.
    pub fn get_file(&mut self, kind: FileKind) -> Result<Vec<u8>, AppError> {
        if kind == FileKind::Archive {
            return self.get_archive();
        }
        match self {
            Self::Default(c) => c.get_file(kind),
            Self::TokenAuth(c) => c.get_file(kind),
            Self::InteractiveSession(c) => c.get_file(kind),
        }
    }

    /// Fetches the source archive in the host's native format.
    pub fn get_archive(&mut self) -> Result<Vec<u8>, AppError> {
        match self {
            Self::Default(c) => c.get_archive(),
            Self::TokenAuth(c) => c.get_archive(),
            Self::InteractiveSession(c) => c.get_archive(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectSettings;
    use crate::project::ProjectType;
    use crate::request::{Action, UpdateRequest};

    fn project(settings: &str, slug: &str) -> ProjectRef {
        let request = UpdateRequest {
            action: Action::PluginInformation,
            slug: slug.to_string(),
            apikey: "k".to_string(),
            version: None,
            branch: "dev".to_string(),
            project_type: ProjectType::Plugin,
        };
        ProjectRef::new(&request, &ProjectSettings::parse(settings).unwrap())
    }

    #[test]
    fn test_host_kind_from_host() {
        assert_eq!(HostKind::from_host("bitbucket"), HostKind::TokenAuth);
        assert_eq!(HostKind::from_host("Bit-Bucket"), HostKind::TokenAuth);
        assert_eq!(HostKind::from_host("gitlab"), HostKind::InteractiveSession);
        assert_eq!(HostKind::from_host("github"), HostKind::Default);
        assert_eq!(HostKind::InteractiveSession.archive_format(), ArchiveFormat::TarGz);
        assert_eq!(HostKind::Default.archive_format(), ArchiveFormat::Zip);
    }

    #[test]
    fn test_render_template() {
        let p = project(
            r#"{"host": "github", "projectOwner": "acme", "remoteSlug": "repo"}"#,
            "foo",
        );
        assert_eq!(
            render_template("https://h/repos/:projectOwner/:slug/commits?sha=:branch", &p),
            "https://h/repos/acme/repo/commits?sha=dev"
        );
    }

    #[test]
    fn test_endpoints_file_url() {
        let p = project(r#"{"host": "github", "projectOwner": "acme"}"#, "foo");
        let global: GlobalSettings = serde_json::from_str(
            r#"{"urls": {"github": {"files": "https://raw.h/:projectOwner/:slug/:branch/:filepath"}}}"#,
        )
        .unwrap();

        let endpoints = Endpoints::new(&global, &p);
        assert_eq!(
            endpoints.file_url(FileKind::Info).unwrap(),
            "https://raw.h/acme/foo/dev/foo.php"
        );
        assert_eq!(
            endpoints.file_url(FileKind::Readme).unwrap(),
            "https://raw.h/acme/foo/dev/readme.md"
        );
        let err = endpoints.url(UrlName::Commits).unwrap_err();
        assert_eq!(err.code(), 10);
    }

    #[test]
    fn test_first_commit_sha() {
        let sha = first_commit_sha(HostKind::Default, br#"[{"sha": "abc"}, {"sha": "def"}]"#);
        assert_eq!(sha.unwrap(), "abc");

        for body in [&b"[]"[..], b"{}", b"not json", br#"[{"id": 1}]"#] {
            let err = first_commit_sha(HostKind::TokenAuth, body).unwrap_err();
            assert_eq!(err.code(), 28);
        }
    }

    #[test]
    fn test_expect_ok() {
        let ok = expect_ok(
            HostKind::Default,
            Operation::File,
            Ok(HttpResponse::new(200, "x")),
        );
        assert_eq!(ok.unwrap().body, b"x");

        let err = expect_ok(
            HostKind::Default,
            Operation::File,
            Ok(HttpResponse::new(404, "")),
        )
        .unwrap_err();
        assert_eq!(err.code(), 30);
    }
}
