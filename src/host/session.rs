//! Web-frontend login sessions for interactive-session hosts.
//!
//! The host offers no token-authenticated download API, so the server logs
//! into the regular sign-in form and keeps the resulting cookies. A login is
//! reused for 24 hours. Any redirect where a page was expected means the
//! session died: the cookies are dropped and the next request logs in again.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, info, warn};

use super::{HostContext, HostKind, HttpRequest, HttpResponse, HttpTransport};
use crate::config::ConfigError;
use crate::error::AppError;
use crate::project::Credentials;
use crate::store::KvStore;

/// Lifetime of a successful login, in seconds.
pub const SESSION_LIFETIME_SECS: i64 = 24 * 60 * 60;

/// Login attempts before giving up.
pub const MAX_LOGIN_ATTEMPTS: u32 = 3;

const SIGN_IN_PATH: &str = "users/sign_in";

const AUTH_TOKEN_PATTERN: &str = r#"<input name="authenticity_token" type="hidden" value="([^"]*)""#;

static AUTH_TOKEN: OnceLock<Option<Regex>> = OnceLock::new();

/// Pauses of the login sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    /// Pause after the sign-in page and after the credential POST.
    pub pause: Duration,
    /// Failed attempt `i` waits `i` times this before retrying.
    pub backoff_unit: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            pause: Duration::from_secs(1),
            backoff_unit: Duration::from_secs(1),
        }
    }
}

impl SessionTiming {
    /// No pauses at all.
    #[must_use]
    pub fn instant() -> Self {
        Self {
            pause: Duration::ZERO,
            backoff_unit: Duration::ZERO,
        }
    }
}

/// Where a host session stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    LoggingIn,
    Active,
    Expired,
    Invalidated,
}

/// Cookies of one host, persisted as a JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CookieJar {
    cookies: BTreeMap<String, String>,
}

impl CookieJar {
    /// Loads a jar. A missing or unreadable file gives an empty jar.
    #[must_use]
    pub fn load(path: &std::path::Path) -> Self {
        let cookies = fs::read_to_string(path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default();
        Self { cookies }
    }

    /// Writes the jar.
    pub fn save(&self, path: &std::path::Path) -> io::Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let body = serde_json::to_string_pretty(&self.cookies).map_err(io::Error::other)?;
        fs::write(path, body)
    }

    /// Takes over the cookies set or expired by a response. Returns true if
    /// the response touched any cookie.
    pub fn absorb(&mut self, response: &HttpResponse) -> bool {
        for (name, value) in &response.set_cookies {
            self.cookies.insert(name.clone(), value.clone());
        }
        for name in &response.removed_cookies {
            self.cookies.remove(name);
        }
        !response.set_cookies.is_empty() || !response.removed_cookies.is_empty()
    }

    /// Cookies as `(name, value)` pairs.
    #[must_use]
    pub fn pairs(&self) -> Vec<(String, String)> {
        self.cookies
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    pub fn clear(&mut self) {
        self.cookies.clear();
    }
}

/// Identifier of a host in file names and login records.
#[must_use]
pub fn host_id(host_key: &str) -> String {
    host_key
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

/// Site root (`scheme://host[:port]/`) of a files URL.
fn site_root(files_url: &str) -> Result<String, ConfigError> {
    let url = reqwest::Url::parse(files_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("{}: {}", files_url, e)))?;
    let host = url
        .host_str()
        .ok_or_else(|| ConfigError::InvalidUrl(files_url.to_string()))?;

    Ok(match url.port() {
        Some(port) => format!("{}://{}:{}/", url.scheme(), host, port),
        None => format!("{}://{}/", url.scheme(), host),
    })
}

/// Login state of one interactive-session host.
pub struct SessionManager {
    host_id: String,
    site_root: String,
    cookie_path: PathBuf,
    store: KvStore,
    transport: Arc<dyn HttpTransport>,
    timing: SessionTiming,
    clock: fn() -> i64,
    state: SessionState,
    jar: CookieJar,
}

impl SessionManager {
    /// Creates the manager for a host key. The site root comes from the
    /// host's `files` URL.
    pub fn new(host_key: &str, files_url: &str, ctx: &HostContext) -> Result<Self, ConfigError> {
        let host_id = host_id(host_key);
        let cookie_path = ctx.cookies_dir.join(format!("{}.cookie", host_id));

        Ok(Self {
            site_root: site_root(files_url)?,
            jar: CookieJar::load(&cookie_path),
            host_id,
            cookie_path,
            store: ctx.store.clone(),
            transport: Arc::clone(&ctx.transport),
            timing: ctx.timing,
            clock: ctx.clock,
            state: SessionState::NoSession,
        })
    }

    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    #[must_use]
    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Cookies to attach to host requests.
    #[must_use]
    pub fn cookies(&self) -> Vec<(String, String)> {
        self.jar.pairs()
    }

    /// Makes sure a live session exists, logging in if needed.
    pub fn ensure_session(&mut self, credentials: &Credentials) -> Result<(), AppError> {
        if self.state == SessionState::Active {
            return Ok(());
        }

        let now = (self.clock)();
        let last_login = self.store.last_login(&self.host_id)?;

        match last_login {
            Some(at) if at >= now - SESSION_LIFETIME_SECS && self.cookie_path.exists() => {
                debug!("[SESSION] Reusing login to {} from {}", self.host_id, at);
                self.state = SessionState::Active;
                return Ok(());
            }
            Some(at) if at > 0 => self.state = SessionState::Expired,
            _ => {}
        }

        self.login(credentials)
    }

    /// Drops the session after the host redirected a request to its login.
    pub fn invalidate(&mut self) -> Result<(), AppError> {
        warn!("[SESSION] Session for {} was rejected, dropping it", self.host_id);
        self.remove_cookie_file()?;
        self.jar.clear();
        self.store.set_last_login(&self.host_id, 0)?;
        self.state = SessionState::Invalidated;
        Ok(())
    }

    /// Keeps cookies refreshed by a host response.
    pub fn absorb(&mut self, response: &HttpResponse) {
        if self.jar.absorb(response) {
            if let Err(e) = self.jar.save(&self.cookie_path) {
                warn!("[SESSION] Failed to store cookies: {}", e);
            }
        }
    }

    fn login(&mut self, credentials: &Credentials) -> Result<(), AppError> {
        for attempt in 1..=MAX_LOGIN_ATTEMPTS {
            self.state = SessionState::LoggingIn;
            self.remove_cookie_file()?;
            self.jar.clear();

            info!(
                "[SESSION] Logging into {} (attempt {}/{})",
                self.site_root, attempt, MAX_LOGIN_ATTEMPTS
            );

            match self.try_login(credentials) {
                Ok(()) => {
                    self.jar.save(&self.cookie_path)?;
                    self.store.set_last_login(&self.host_id, (self.clock)())?;
                    self.state = SessionState::Active;
                    info!("[SESSION] Logged into {}", self.host_id);
                    return Ok(());
                }
                Err(reason) => {
                    warn!("[SESSION] Login attempt {} failed: {}", attempt, reason);
                    if attempt < MAX_LOGIN_ATTEMPTS {
                        sleep(self.timing.backoff_unit * attempt);
                    }
                }
            }
        }

        self.state = SessionState::NoSession;
        Err(AppError::LoginFailed {
            host: HostKind::InteractiveSession,
        })
    }

    /// One pass of the sign-in sequence.
    fn try_login(&mut self, credentials: &Credentials) -> Result<(), String> {
        let sign_in = format!("{}{}", self.site_root, SIGN_IN_PATH);

        let page = self.send(HttpRequest::get(&sign_in))?;
        if page.status != 200 {
            return Err(format!("sign-in page returned HTTP {}", page.status));
        }
        let token = extract_authenticity_token(&page.text()).unwrap_or_default();
        if token.is_empty() {
            debug!("[SESSION] No authenticity token on sign-in page");
        }
        sleep(self.timing.pause);

        let fields = vec![
            ("user[email]".to_string(), credentials.user.clone()),
            ("user[password]".to_string(), credentials.secret.clone()),
            ("user[remember_me]".to_string(), "0".to_string()),
            ("commit".to_string(), "Sign in".to_string()),
            ("authenticity_token".to_string(), token),
            ("utf8".to_string(), "\u{2713}".to_string()),
        ];
        let posted = self.send(HttpRequest::post_form(&sign_in, fields))?;
        if posted.status != 302 {
            return Err(format!("sign-in POST returned HTTP {}", posted.status));
        }
        sleep(self.timing.pause);

        let root = self.send(HttpRequest::get(&self.site_root))?;
        if root.status != 200 {
            return Err(format!("site root returned HTTP {}", root.status));
        }

        Ok(())
    }

    fn send(&mut self, request: HttpRequest) -> Result<HttpResponse, String> {
        let request = request.with_cookies(self.jar.pairs());
        let response = self.transport.send(&request).map_err(|e| e.to_string())?;
        self.jar.absorb(&response);
        Ok(response)
    }

    fn remove_cookie_file(&self) -> io::Result<()> {
        match fs::remove_file(&self.cookie_path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

/// Value of the hidden `authenticity_token` input of the sign-in form.
#[must_use]
pub fn extract_authenticity_token(html: &str) -> Option<String> {
    let re = AUTH_TOKEN
        .get_or_init(|| Regex::new(AUTH_TOKEN_PATTERN).ok())
        .as_ref()?;
    re.captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

fn sleep(duration: Duration) {
    if !duration.is_zero() {
        thread::sleep(duration);
    }
}
