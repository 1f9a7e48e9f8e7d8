//! Bitbucket-style host: HTTP Basic credentials on every request.

use std::sync::Arc;

use tracing::debug;

use super::{
    Endpoints, FileKind, HostKind, HttpRequest, HttpTransport, Operation, expect_ok,
    first_commit_sha,
};
use crate::config::UrlName;
use crate::error::AppError;
use crate::project::Credentials;

/// Client for hosts authenticated with `user:secret`.
pub struct TokenClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
    credentials: Credentials,
}

impl TokenClient {
    /// Creates the client.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoints: Endpoints,
        credentials: Credentials,
    ) -> Self {
        Self {
            transport,
            endpoints,
            credentials,
        }
    }

    /// First `sha` of the commit list.
    pub fn current_commit_id(&self) -> Result<String, AppError> {
        let url = self.endpoints.url(UrlName::Commits)?;
        let body = self.get(url, Operation::Commits)?;
        let sha = first_commit_sha(HostKind::TokenAuth, &body)?;
        debug!("[HOST] Current commit {} as {}", sha, self.credentials.user);
        Ok(sha)
    }

    /// Raw bytes of an info or readme file.
    pub fn get_file(&self, kind: FileKind) -> Result<Vec<u8>, AppError> {
        let url = self.endpoints.file_url(kind)?;
        self.get(&url, Operation::File)
    }

    /// Raw bytes of the zip archive.
    pub fn get_archive(&self) -> Result<Vec<u8>, AppError> {
        let url = self.endpoints.url(UrlName::Archive)?;
        self.get(url, Operation::Archive)
    }

    fn get(&self, url: &str, operation: Operation) -> Result<Vec<u8>, AppError> {
        let request =
            HttpRequest::get(url).with_basic_auth(&self.credentials.user, &self.credentials.secret);
        let result = self.transport.send(&request);
        Ok(expect_ok(HostKind::TokenAuth, operation, result)?.body)
    }
}
