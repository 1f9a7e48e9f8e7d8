//! projupdate
//!
//! An update server for WordPress-style plugins and themes whose sources
//! live on GitHub-style, Bitbucket or Gitlab hosts.
//!
//! # Architecture
//!
//! - **Host Module**: per-host clients behind one `HttpTransport` seam,
//!   including the Gitlab web-login session
//! - **Cache Module**: commit-keyed file cache with one generation per
//!   project branch
//! - **Archive Module**: tar-to-zip conversion and root folder renaming
//! - **Engine Module**: per-request coordination of the above
//! - **Server Module**: axum front end speaking the PHP-serialized protocol
//!
//! # Usage
//!
//! ```no_run
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! use projupdate::engine::Engine;
//! use projupdate::host::ReqwestTransport;
//!
//! let transport = ReqwestTransport::new().expect("Failed to build client");
//! let engine = Engine::new("/srv/projupdate", Arc::new(transport));
//! let params: HashMap<String, String> = HashMap::new();
//! let response = engine.handle(&params, "127.0.0.1");
//! ```

// Clippy configuration - allow common patterns
#![allow(clippy::unnested_or_patterns)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::similar_names)]

pub mod archive;
pub mod cache;
pub mod config;
pub mod details;
pub mod engine;
pub mod error;
pub mod host;
pub mod info;
pub mod logging;
pub mod php;
pub mod project;
pub mod request;
pub mod response;
pub mod server;
pub mod store;
#[doc(hidden)]
pub mod test_utils;
pub mod version;

// Re-export main types
pub use engine::Engine;
pub use error::AppError;
pub use response::Response;
pub use server::UpdateServer;
