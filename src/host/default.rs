//! GitHub-style host: plain unauthenticated requests.

use std::sync::Arc;

use tracing::debug;

use super::{
    Endpoints, FileKind, HostKind, HttpRequest, HttpTransport, Operation, expect_ok,
    first_commit_sha,
};
use crate::config::UrlName;
use crate::error::AppError;

/// Client for hosts that need no authentication.
pub struct DefaultClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
}

impl DefaultClient {
    /// Creates the client.
    pub fn new(transport: Arc<dyn HttpTransport>, endpoints: Endpoints) -> Self {
        Self {
            transport,
            endpoints,
        }
    }

    /// First `sha` of the commit list.
    pub fn current_commit_id(&self) -> Result<String, AppError> {
        let url = self.endpoints.url(UrlName::Commits)?;
        let response = self.get(url, Operation::Commits)?;
        let sha = first_commit_sha(HostKind::Default, &response)?;
        debug!("[HOST] Current commit {}", sha);
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
        let result = self.transport.send(&HttpRequest::get(url));
        Ok(expect_ok(HostKind::Default, operation, result)?.body)
    }
}
