//! Request-level error type.
//!
//! Every error is terminal for the request that raised it. The top-level
//! handler turns it into the serialized `status`/`msg`/`errorCode` envelope,
//! so each variant carries a stable status string and numeric code.

use std::io;

use thiserror::Error;

use crate::archive::ArchiveError;
use crate::config::ConfigError;
use crate::host::{HostKind, Operation};
use crate::store::StoreError;

/// Errors that end a request.
#[derive(Debug, Error)]
pub enum AppError {
    /// A required request parameter is absent.
    #[error("missing input")]
    MissingInput(&'static str),

    /// The `action` parameter names no known action.
    #[error("invalid action")]
    InvalidAction(String),

    /// Settings files are missing or malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No password or token could be resolved for the host user.
    #[error("no pw found")]
    MissingCredential,

    /// The request is not covered by the project's access rules.
    #[error(
        "No access. This can be because: 1. Your ip address ({ip}) is not registered. \
         Or 2. your api key ({apikey}) is invalid. \
         Or 3. you do not have access to the requested branch ({branch})."
    )]
    BadAccess {
        ip: String,
        apikey: String,
        branch: String,
    },

    /// The interactive login did not succeed within the allowed attempts.
    #[error("Could not login to {host}.")]
    LoginFailed { host: HostKind },

    /// The archive could not be produced for download.
    #[error("unable to download file.")]
    DownloadFailed,

    /// The host needs a session token that is not configured.
    #[error("missing token for {host} user.")]
    MissingToken { host: HostKind },

    /// The commit list does not contain the requested branch.
    #[error("Project or Branch not found.")]
    BranchNotFound { branch: String },

    /// Archive extraction or re-compression failed.
    #[error("archive could not be converted: {0}")]
    Archive(#[from] ArchiveError),

    /// Talking to the remote host failed.
    #[error("Unable to connect to {host} - login error or project or branch not found.")]
    Connection {
        host: HostKind,
        operation: Operation,
        detail: String,
    },

    /// The key-value database could not be read or written.
    #[error("database error: {0}")]
    Store(#[from] StoreError),

    /// Local I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl AppError {
    /// Builds a connection error for a host operation.
    pub fn connection(host: HostKind, operation: Operation, detail: impl Into<String>) -> Self {
        Self::Connection {
            host,
            operation,
            detail: detail.into(),
        }
    }

    /// Short status string of the response envelope.
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            Self::MissingInput(_)
            | Self::InvalidAction(_)
            | Self::Config(_)
            | Self::MissingCredential
            | Self::MissingToken { .. } => "undefined",
            Self::BadAccess { .. } => "bad access",
            _ => "error",
        }
    }

    /// Stable numeric error code of the response envelope.
    #[must_use]
    pub fn code(&self) -> i64 {
        match self {
            Self::MissingInput(_) => 8,
            Self::InvalidAction(_) => 9,
            Self::Config(e) => e.code(),
            Self::MissingCredential => 14,
            Self::BadAccess { .. } => 17,
            Self::LoginFailed { .. } => 19,
            Self::DownloadFailed => 21,
            Self::MissingToken { .. } => 24,
            Self::BranchNotFound { .. } => 25,
            Self::Archive(_) => 26,
            Self::Connection {
                host, operation, ..
            } => connection_code(*host, *operation),
            Self::Store(_) | Self::Io(_) => 35,
        }
    }

    /// Returns true for remote connection failures.
    #[must_use]
    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

/// Error code for a failed host operation.
fn connection_code(host: HostKind, operation: Operation) -> i64 {
    match (operation, host) {
        (Operation::Commits, HostKind::Default) => 27,
        (Operation::Commits, HostKind::TokenAuth) => 28,
        (Operation::Commits, HostKind::InteractiveSession) => 29,
        (Operation::File, HostKind::Default) => 30,
        (Operation::File, HostKind::TokenAuth) => 32,
        (Operation::File, HostKind::InteractiveSession) => 33,
        (Operation::Archive, HostKind::Default) => 31,
        (Operation::Archive, HostKind::TokenAuth) => 34,
        (Operation::Archive, HostKind::InteractiveSession) => 20,
    }
}
