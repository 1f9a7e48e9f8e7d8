//! Outbound HTTP seam.
//!
//! Host clients talk to the network only through [`HttpTransport`], so the
//! engine can be driven by a scripted transport in tests.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use thiserror::Error;
use tracing::debug;

/// Timeout applied to every outbound request.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Errors raised below the HTTP status level.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    Build(String),

    /// The request failed before a status was received.
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

/// One outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    /// HTTP Basic credentials.
    pub basic_auth: Option<(String, String)>,
    /// Cookies sent in one `Cookie` header.
    pub cookies: Vec<(String, String)>,
    /// Url-encoded form body.
    pub form: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    /// Creates a plain GET request.
    #[must_use]
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            basic_auth: None,
            cookies: Vec::new(),
            form: None,
        }
    }

    /// Creates a POST request with a url-encoded form body.
    #[must_use]
    pub fn post_form(url: impl Into<String>, fields: Vec<(String, String)>) -> Self {
        Self {
            method: Method::Post,
            form: Some(fields),
            ..Self::get(url)
        }
    }

    /// Adds HTTP Basic credentials.
    #[must_use]
    pub fn with_basic_auth(mut self, user: &str, secret: &str) -> Self {
        self.basic_auth = Some((user.to_string(), secret.to_string()));
        self
    }

    /// Adds cookies.
    #[must_use]
    pub fn with_cookies<I>(mut self, cookies: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.cookies.extend(cookies);
        self
    }

    /// Encodes the form body, if any.
    #[must_use]
    pub fn encoded_form(&self) -> Option<String> {
        self.form.as_ref().map(|fields| {
            fields
                .iter()
                .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&")
        })
    }

    /// Value of the `Cookie` header, if any cookies are set.
    #[must_use]
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }
        Some(
            self.cookies
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// Response of an outbound request. Redirects are returned as-is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
    /// Cookies set by the response, as `(name, value)`.
    pub set_cookies: Vec<(String, String)>,
    /// Cookies the response expired.
    pub removed_cookies: Vec<String>,
}

impl HttpResponse {
    /// Creates a response with a status and body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
            set_cookies: Vec::new(),
            removed_cookies: Vec::new(),
        }
    }

    /// Adds a cookie set by the response.
    #[must_use]
    pub fn with_cookie(mut self, name: &str, value: &str) -> Self {
        self.set_cookies.push((name.to_string(), value.to_string()));
        self
    }

    /// Adds a cookie expired by the response.
    #[must_use]
    pub fn with_removed_cookie(mut self, name: &str) -> Self {
        self.removed_cookies.push(name.to_string());
        self
    }

    /// Records one `Set-Cookie` header.
    pub fn push_set_cookie(&mut self, cookie: SetCookie) {
        match cookie {
            SetCookie::Set(name, value) => self.set_cookies.push((name, value)),
            SetCookie::Remove(name) => self.removed_cookies.push(name),
        }
    }

    /// Body decoded as UTF-8, lossy.
    #[must_use]
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends HTTP requests.
pub trait HttpTransport: Send + Sync {
    /// Sends a request and returns the response, whatever its status.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError>;
}

/// What a `Set-Cookie` header asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetCookie {
    Set(String, String),
    /// `Max-Age` of zero or less, or an `Expires` date already past.
    Remove(String),
}

/// Parses a `Set-Cookie` header as seen at `now`.
///
/// `Max-Age` wins over `Expires`. Unparsable dates are ignored.
#[must_use]
pub fn parse_set_cookie(header: &str, now: DateTime<Utc>) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.trim().split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut max_age = None;
    let mut expires = None;
    for attr in parts {
        let Some((key, val)) = attr.split_once('=') else {
            continue;
        };
        let val = val.trim();
        if key.trim().eq_ignore_ascii_case("max-age") {
            max_age = val.parse::<i64>().ok();
        } else if key.trim().eq_ignore_ascii_case("expires") {
            expires = parse_cookie_date(val);
        }
    }

    let expired = match (max_age, expires) {
        (Some(secs), _) => secs <= 0,
        (None, Some(at)) => at <= now,
        (None, None) => false,
    };
    if expired {
        return Some(SetCookie::Remove(name.to_string()));
    }
    Some(SetCookie::Set(name.to_string(), value.trim().to_string()))
}

/// Parses `Thu, 01 Jan 1970 00:00:00 GMT` and its dashed variant.
fn parse_cookie_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc2822(value) {
        return Some(at.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%a, %d-%b-%Y %H:%M:%S GMT")
        .ok()
        .map(|at| at.and_utc())
}

/// Blocking `reqwest` transport.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl ReqwestTransport {
    /// Creates the transport.
    ///
    /// Redirects are not followed. Certificate verification is off on
    /// Windows only.
    pub fn new() -> Result<Self, TransportError> {
        let client = reqwest::blocking::Client::builder()
            .user_agent(concat!("projupdate/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .redirect(reqwest::redirect::Policy::none())
            .danger_accept_invalid_certs(cfg!(windows))
            .build()
            .map_err(|e| TransportError::Build(e.to_string()))?;

        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        let request_err = |e: reqwest::Error| TransportError::Request {
            url: request.url.clone(),
            message: e.to_string(),
        };

        let mut builder = match request.method {
            Method::Get => self.client.get(&request.url),
            Method::Post => self.client.post(&request.url),
        };

        if let Some((user, secret)) = &request.basic_auth {
            builder = builder.basic_auth(user, Some(secret));
        }
        if let Some(cookies) = request.cookie_header() {
            builder = builder.header(COOKIE, cookies);
        }
        if let Some(body) = request.encoded_form() {
            builder = builder
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(body);
        }

        let response = builder.send().map_err(request_err)?;
        let status = response.status().as_u16();
        let now = Utc::now();
        let cookies: Vec<SetCookie> = response
            .headers()
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| parse_set_cookie(v, now))
            .collect();
        let body = response.bytes().map_err(request_err)?.to_vec();

        debug!(
            "[HOST] {:?} {} -> {} ({} bytes)",
            request.method,
            redact(&request.url),
            status,
            body.len()
        );

        let mut out = HttpResponse::new(status, body);
        for cookie in cookies {
            out.push_set_cookie(cookie);
        }
        Ok(out)
    }
}

/// Strips the query string, which may carry tokens, for logging.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_form_encoding() {
        let req = HttpRequest::post_form(
            "https://git.example.org/users/sign_in",
            vec![
                ("user[email]".to_string(), "a@b.c".to_string()),
                ("commit".to_string(), "Sign in".to_string()),
                ("utf8".to_string(), "✓".to_string()),
            ],
        );
        assert_eq!(
            req.encoded_form().unwrap(),
            "user%5Bemail%5D=a%40b.c&commit=Sign%20in&utf8=%E2%9C%93"
        );
    }

    #[test]
    fn test_cookie_header() {
        let req = HttpRequest::get("http://x/").with_cookies(vec![
            ("_session".to_string(), "abc".to_string()),
            ("remember".to_string(), "1".to_string()),
        ]);
        assert_eq!(req.cookie_header().unwrap(), "_session=abc; remember=1");
        assert_eq!(HttpRequest::get("http://x/").cookie_header(), None);
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2024-06-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_parse_set_cookie() {
        assert_eq!(
            parse_set_cookie("_gitlab_session=xyz; path=/; HttpOnly", now()),
            Some(SetCookie::Set("_gitlab_session".to_string(), "xyz".to_string()))
        );
        assert_eq!(parse_set_cookie("garbage", now()), None);
        assert_eq!(parse_set_cookie("=value", now()), None);
    }

    #[test]
    fn test_parse_set_cookie_expiry() {
        let removed = Some(SetCookie::Remove("_session".to_string()));
        assert_eq!(parse_set_cookie("_session=; Max-Age=0; path=/", now()), removed);
        assert_eq!(parse_set_cookie("_session=x; max-age=-1", now()), removed);
        assert_eq!(
            parse_set_cookie("_session=; expires=Thu, 01 Jan 1970 00:00:00 GMT", now()),
            removed
        );
        assert_eq!(
            parse_set_cookie("_session=; Expires=Thu, 01-Jan-1970 00:00:00 GMT", now()),
            removed
        );

        let kept = Some(SetCookie::Set("_session".to_string(), "x".to_string()));
        assert_eq!(
            parse_set_cookie("_session=x; Expires=Fri, 01 Jan 2100 00:00:00 GMT", now()),
            kept
        );
        assert_eq!(
            parse_set_cookie("_session=x; Max-Age=3600; Expires=Thu, 01 Jan 1970 00:00:00 GMT", now()),
            kept
        );
        assert_eq!(parse_set_cookie("_session=x; Expires=soon", now()), kept);
    }

    #[test]
    fn test_redact_drops_query() {
        assert_eq!(
            redact("https://h/api/branches?private_token=secret"),
            "https://h/api/branches"
        );
    }
}
