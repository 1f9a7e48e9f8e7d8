//! Request coordinator.
//!
//! [`Engine`] is shared by every request and holds only process-wide,
//! read-only dependencies. Each call to [`Engine::handle`] builds a fresh
//! request context: settings are loaded, the request is validated, the
//! host client and cache are opened and the action runs. The context and
//! everything it owns, temp directories included, is dropped when the
//! request ends.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::ArchiveNormalizer;
use crate::cache::{self, ArchiveLayout, CacheStore};
use crate::config::{GlobalSettings, Paths, ProjectSettings};
use crate::details;
use crate::error::AppError;
use crate::host::{
    FileKind, HostClient, HostContext, HostKind, HttpTransport, SessionTiming, unix_now,
};
use crate::info::InfoHeader;
use crate::php::PhpValue;
use crate::project::{Credentials, ProjectRef, ProjectType};
use crate::request::{Action, UpdateRequest, sanitize};
use crate::response::Response;
use crate::store::KvStore;
use crate::version;

/// Message of a `basic_check` without a newer version.
pub const UP_TO_DATE_MSG: &str = "version up to date.";

/// Message of a successful `clean_cacheandtemp`.
pub const CLEANED_MSG: &str = "cache and temp cleaned.";

/// Info header keys copied into `plugin_information`, with the response
/// key they are stored under. Missing values become empty strings.
const INFO_FIELDS: [(&str, &str); 8] = [
    ("version", "version"),
    ("date", "last_updated"),
    ("author", "author"),
    ("requires", "requires"),
    ("tested", "tested"),
    ("authoruri", "authoruri"),
    ("external", "external"),
    ("pluginuri", "homepage"),
];

/// Shared entry point for update requests.
pub struct Engine {
    paths: Paths,
    transport: Arc<dyn HttpTransport>,
    timing: SessionTiming,
    clock: fn() -> i64,
}

impl Engine {
    /// Creates an engine serving the data below `root`.
    pub fn new(root: impl Into<PathBuf>, transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            paths: Paths::new(root),
            transport,
            timing: SessionTiming::default(),
            clock: unix_now,
        }
    }

    /// Replaces the login pauses.
    #[must_use]
    pub fn with_timing(mut self, timing: SessionTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Replaces the clock used for session expiry.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> i64) -> Self {
        self.clock = clock;
        self
    }

    /// Data directory layout.
    #[must_use]
    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    /// Handles a request and always produces a response. Errors become
    /// the status envelope.
    pub fn handle(&self, params: &HashMap<String, String>, remote_ip: &str) -> Response {
        match self.process(params, remote_ip) {
            Ok(response) => response,
            Err(e) => {
                let slug = params.get("slug").map(|s| sanitize(s));
                if let AppError::MissingInput(key) = &e {
                    debug!("[ENGINE] Missing request parameter \"{}\"", key);
                }
                warn!(
                    "[ENGINE] Request for {} failed with code {}: {}",
                    slug.as_deref().unwrap_or("?"),
                    e.code(),
                    e
                );
                Response::from_error(&e, slug.as_deref())
            }
        }
    }

    /// Runs a request.
    pub fn process(
        &self,
        params: &HashMap<String, String>,
        remote_ip: &str,
    ) -> Result<Response, AppError> {
        let request = UpdateRequest::from_params(params)?;
        debug!(
            "[ENGINE] {} for {} on {} from {}",
            request.action, request.slug, request.branch, remote_ip
        );

        let global = GlobalSettings::load(&self.paths)?;
        let settings = ProjectSettings::load(&self.paths, &request.slug)?;
        request.validate(&settings, remote_ip)?;

        if !request.action.needs_host() {
            cache::clean_all(&self.paths)?;
            info!("[ENGINE] Cache and temp cleaned on behalf of {}", request.slug);
            return Ok(Response::ok(CLEANED_MSG, Some(&request.slug)));
        }

        let mut ctx = RequestContext::open(self, request, &settings, global)?;
        ctx.run()
    }

    fn host_context(&self, store: KvStore) -> HostContext {
        HostContext {
            transport: Arc::clone(&self.transport),
            store,
            cookies_dir: self.paths.cookies_dir(),
            timing: self.timing,
            clock: self.clock,
        }
    }
}

/// State of one request.
struct RequestContext<'a> {
    engine: &'a Engine,
    request: UpdateRequest,
    global: GlobalSettings,
    project: ProjectRef,
    store: KvStore,
    host: HostClient,
    cache: CacheStore,
    normalizer: ArchiveNormalizer,
    files: HashMap<FileKind, Vec<u8>>,
    info: Option<InfoHeader>,
}

impl<'a> RequestContext<'a> {
    fn open(
        engine: &'a Engine,
        request: UpdateRequest,
        settings: &ProjectSettings,
        global: GlobalSettings,
    ) -> Result<Self, AppError> {
        let project = ProjectRef::new(&request, settings);

        let credentials = match project.host_kind {
            HostKind::Default => None,
            HostKind::TokenAuth | HostKind::InteractiveSession => {
                Some(Credentials::resolve(settings, &global)?)
            }
        };

        let store = KvStore::new(engine.paths.database());
        let host_ctx = engine.host_context(store.clone());
        let mut host = HostClient::new(&project, &global, credentials, &host_ctx)?;

        let cache = CacheStore::open(
            &engine.paths,
            store.clone(),
            &project,
            global.use_cache,
            &mut host,
        )?;

        Ok(Self {
            engine,
            request,
            global,
            project,
            store,
            host,
            cache,
            normalizer: ArchiveNormalizer::new(engine.paths.temp_dir()),
            files: HashMap::new(),
            info: None,
        })
    }

    fn run(&mut self) -> Result<Response, AppError> {
        match self.request.action {
            Action::BasicCheck => self.basic_check(),
            Action::PluginInformation => self.plugin_information(),
            Action::DownloadLatest => self.download_latest(),
            Action::ProjectDetails => self.project_details(),
            // Handled by `Engine::process` before any host is opened.
            Action::CleanCacheAndTemp => {
                unreachable!("clean_cacheandtemp needs no request context")
            }
        }
    }

    /// Info or readme bytes: memo, then cache, then host.
    fn file(&mut self, kind: FileKind) -> Result<&[u8], AppError> {
        if !self.files.contains_key(&kind) {
            let bytes = match self.cache.get_cached_file(kind) {
                Some(bytes) => bytes,
                None => {
                    let bytes = self.host.get_file(kind)?;
                    self.cache.cache_file(kind, &bytes);
                    bytes
                }
            };
            self.files.insert(kind, bytes);
        }
        Ok(self.files.get(&kind).map_or(&[][..], Vec::as_slice))
    }

    fn file_text(&mut self, kind: FileKind) -> Result<String, AppError> {
        Ok(String::from_utf8_lossy(self.file(kind)?).into_owned())
    }

    fn info(&mut self) -> Result<&InfoHeader, AppError> {
        if self.info.is_none() {
            let text = self.file_text(FileKind::Info)?;
            self.info = Some(InfoHeader::parse(&text));
        }
        Ok(self.info.get_or_insert_with(InfoHeader::default))
    }

    fn info_value(&mut self, key: &str) -> Result<Option<String>, AppError> {
        Ok(self.info()?.get(key).map(str::to_string))
    }

    fn request_url(&self, action: Action) -> String {
        format!(
            "{}?action={}&slug={}&apikey={}&branch={}",
            self.global.base_url,
            action,
            self.request.slug,
            self.request.apikey,
            self.request.branch
        )
    }

    fn package_url(&self) -> String {
        self.request_url(Action::DownloadLatest)
    }

    fn details_url(&self) -> String {
        let mut url = self.request_url(Action::ProjectDetails);
        if self.project.project_type == ProjectType::Theme {
            url.push_str("&type=theme");
        }
        url
    }

    fn basic_check(&mut self) -> Result<Response, AppError> {
        let installed = self.request.version.clone().unwrap_or_default();
        let remote = self.info_value("version")?;

        let Some(remote) = remote.filter(|r| version::is_newer(&installed, r)) else {
            debug!("[ENGINE] {} is up to date at {}", self.request.slug, installed);
            return Ok(Response::ok(UP_TO_DATE_MSG, Some(&self.request.slug)));
        };

        info!(
            "[ENGINE] {} can update from {} to {}",
            self.request.slug, installed, remote
        );

        let record = if self.project.is_theme() {
            PhpValue::array()
                .with("new_version", remote)
                .with("url", self.details_url())
                .with("package", self.package_url())
        } else {
            let plugin_uri = self.info_value("pluginuri")?;
            PhpValue::object()
                .with("slug", self.request.slug.as_str())
                .with("new_version", remote)
                .with("url", plugin_uri)
                .with("package", self.package_url())
        };

        Ok(Response::Serialized(record))
    }

    fn plugin_information(&mut self) -> Result<Response, AppError> {
        let downloaded = self.store.downloads(&self.project.record_slug())?;

        let mut record = PhpValue::object()
            .with("slug", self.request.slug.as_str())
            .with("downloaded", downloaded)
            .with("download_link", self.package_url());

        let info = self.info()?.clone();
        if let Some(name) = info.name() {
            record.set("name", name);
        }
        for (key, field) in INFO_FIELDS {
            record.set(field, info.get(key).unwrap_or_default());
        }

        let author = details::linked_author(
            info.get("author").unwrap_or_default(),
            info.get("authoruri").unwrap_or_default(),
        );
        record.set("author", author);

        let readme = self.file_text(FileKind::Readme)?;
        let sections = details::readme_sections(
            &readme,
            info.get("pluginname"),
            self.project.readme_is_markdown(),
        );
        record.set("sections", sections);

        Ok(Response::Serialized(record))
    }

    fn download_latest(&mut self) -> Result<Response, AppError> {
        let bytes = match self.cache.get_cached_file(FileKind::Archive) {
            Some(bytes) => bytes,
            None => {
                let raw = self.host.get_archive()?;
                if raw.is_empty() {
                    warn!(
                        "[ENGINE] Empty archive for {}/{}",
                        self.request.slug, self.request.branch
                    );
                    return Err(AppError::DownloadFailed);
                }
                let layout = ArchiveLayout {
                    format: self.project.host_kind.archive_format(),
                    rename_to: self
                        .global
                        .rename_folders
                        .then(|| self.project.folder_name().to_string()),
                };
                self.cache
                    .cache_archive(raw, &layout, &mut self.normalizer)?
            }
        };

        if bytes.is_empty() {
            return Err(AppError::DownloadFailed);
        }

        let count = self.store.increment_downloads(&self.project.record_slug())?;
        info!(
            "[ENGINE] Delivering {} bytes of {}/{} (download #{})",
            bytes.len(),
            self.request.slug,
            self.request.branch,
            count
        );

        Ok(Response::Download {
            filename: format!("{}.zip", self.request.branch),
            bytes,
        })
    }

    fn project_details(&mut self) -> Result<Response, AppError> {
        let readme = self.file_text(FileKind::Readme)?;
        let html = details::render_readme(&readme, self.project.readme_is_markdown());
        let version = self.info_value("version")?.unwrap_or_default();

        Ok(Response::Html(details::details_page(
            &self.engine.paths.templates_dir(),
            &version,
            &html,
        )))
    }
}
