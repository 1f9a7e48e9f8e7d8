//! Gitlab-style host: cookie-authenticated requests after a web login.

use std::sync::Arc;

use serde::Deserialize;
use tracing::debug;

use super::{
    Endpoints, FileKind, HostKind, HttpRequest, HttpResponse, HttpTransport, Operation,
    SessionManager, expect_ok,
};
use crate::config::UrlName;
use crate::error::AppError;
use crate::project::Credentials;

const HOST: HostKind = HostKind::InteractiveSession;

#[derive(Debug, Deserialize)]
struct BranchCommit {
    id: String,
}

#[derive(Debug, Deserialize)]
struct BranchEntry {
    name: String,
    commit: BranchCommit,
}

/// Client for hosts reached through a logged-in web session.
pub struct SessionClient {
    transport: Arc<dyn HttpTransport>,
    endpoints: Endpoints,
    credentials: Credentials,
    session: SessionManager,
    branch: String,
}

impl SessionClient {
    /// Creates the client.
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        endpoints: Endpoints,
        credentials: Credentials,
        session: SessionManager,
        branch: String,
    ) -> Self {
        Self {
            transport,
            endpoints,
            credentials,
            session,
            branch,
        }
    }

    /// Session state, for inspection.
    #[must_use]
    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    /// Commit id of the requested branch, from the branch list.
    ///
    /// The branch list URL carries the user's session token.
    pub fn current_commit_id(&mut self) -> Result<String, AppError> {
        let token = self
            .credentials
            .session_token
            .clone()
            .ok_or(AppError::MissingToken { host: HOST })?;
        let url = self
            .endpoints
            .url(UrlName::Commits)?
            .replace(":token", &token);

        let response = self.get(&url, Operation::Commits)?;

        let branches: Vec<BranchEntry> = serde_json::from_slice(&response.body)
            .map_err(|e| AppError::connection(HOST, Operation::Commits, e.to_string()))?;

        let sha = branches
            .into_iter()
            .filter(|b| b.name == self.branch)
            .map(|b| b.commit.id)
            .last()
            .ok_or_else(|| AppError::BranchNotFound {
                branch: self.branch.clone(),
            })?;

        debug!("[HOST] Branch {} is at {}", self.branch, sha);
        Ok(sha)
    }

    /// Raw bytes of an info or readme file.
    pub fn get_file(&mut self, kind: FileKind) -> Result<Vec<u8>, AppError> {
        let url = self.endpoints.file_url(kind)?;
        Ok(self.get(&url, Operation::File)?.body)
    }

    /// Raw bytes of the `.tar.gz` archive.
    pub fn get_archive(&mut self) -> Result<Vec<u8>, AppError> {
        let url = self.endpoints.url(UrlName::Archive)?.to_string();
        Ok(self.get(&url, Operation::Archive)?.body)
    }

    fn get(&mut self, url: &str, operation: Operation) -> Result<HttpResponse, AppError> {
        self.session.ensure_session(&self.credentials)?;

        let request = HttpRequest::get(url).with_cookies(self.session.cookies());
        let result = self.transport.send(&request);

        if let Ok(response) = &result {
            if response.status == 302 {
                self.session.invalidate()?;
            } else {
                self.session.absorb(response);
            }
        }

        expect_ok(HOST, operation, result)
    }
}
