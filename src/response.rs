//! Responses produced by the engine.

use crate::error::AppError;
use crate::php::PhpValue;

/// Status of the envelope when nothing answered the request.
pub const DEFAULT_STATUS: &str = "error";

/// Message of the envelope when nothing answered the request.
pub const DEFAULT_MSG: &str = "nothing happened.";

/// Error code of the envelope when nothing answered the request.
pub const DEFAULT_ERROR_CODE: i64 = -1;

/// Result of one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// A PHP-serialized record.
    Serialized(PhpValue),
    /// A zip archive sent as an attachment.
    Download { filename: String, bytes: Vec<u8> },
    /// An HTML page.
    Html(String),
}

impl Response {
    /// Status envelope with the given fields.
    #[must_use]
    pub fn envelope(status: &str, msg: &str, error_code: i64, slug: Option<&str>) -> Self {
        let mut value = PhpValue::array()
            .with("status", status)
            .with("msg", msg)
            .with("errorCode", error_code);
        if let Some(slug) = slug {
            value.set("slug", slug);
        }
        Self::Serialized(value)
    }

    /// Successful status envelope.
    #[must_use]
    pub fn ok(msg: &str, slug: Option<&str>) -> Self {
        Self::envelope("ok", msg, 0, slug)
    }

    /// Envelope sent when no action produced a response.
    #[must_use]
    pub fn nothing_happened(slug: Option<&str>) -> Self {
        Self::envelope(DEFAULT_STATUS, DEFAULT_MSG, DEFAULT_ERROR_CODE, slug)
    }

    /// Envelope describing an error. It carries only the four envelope
    /// keys; details such as the name of a missing input stay in the logs.
    #[must_use]
    pub fn from_error(error: &AppError, slug: Option<&str>) -> Self {
        Self::envelope(error.status(), &error.to_string(), error.code(), slug)
    }

    /// Body bytes as sent on the wire.
    #[must_use]
    pub fn body(&self) -> Vec<u8> {
        match self {
            Self::Serialized(value) => value.serialize().into_bytes(),
            Self::Download { bytes, .. } => bytes.clone(),
            Self::Html(html) => html.clone().into_bytes(),
        }
    }
}
