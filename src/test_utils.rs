//! Helpers for driving the engine without a network.
//!
//! Used by unit tests and by the integration tests under `tests/`.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::Path;
use std::sync::Mutex;

use flate2::Compression;
use flate2::write::GzEncoder;
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

use crate::archive::PAX_GLOBAL_HEADER;
use crate::config::{GLOBAL_SETTINGS_FILE, PROJECT_SETTINGS_DIR, Paths};
use crate::host::{HttpRequest, HttpResponse, HttpTransport, Method, TransportError};

/// Fixed Unix time for session tests.
pub const FIXED_NOW: i64 = 1_700_000_000;

/// Clock returning [`FIXED_NOW`].
#[must_use]
pub fn fixed_clock() -> i64 {
    FIXED_NOW
}

/// Transport answering from a script and recording every request.
///
/// Each `(method, url)` has a queue of responses. Responses are consumed in
/// order; the last one is repeated. Unscripted requests fail like a
/// network error.
#[derive(Default)]
pub struct ScriptedTransport {
    routes: Mutex<HashMap<(Method, String), VecDeque<HttpResponse>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response.
    pub fn on(&self, method: Method, url: &str, response: HttpResponse) -> &Self {
        if let Ok(mut routes) = self.routes.lock() {
            routes
                .entry((method, url.to_string()))
                .or_default()
                .push_back(response);
        }
        self
    }

    /// Queues a response to a GET.
    pub fn on_get(&self, url: &str, response: HttpResponse) -> &Self {
        self.on(Method::Get, url, response)
    }

    /// Queues a response to a POST.
    pub fn on_post(&self, url: &str, response: HttpResponse) -> &Self {
        self.on(Method::Post, url, response)
    }

    /// Every request sent so far.
    #[must_use]
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Number of requests sent to a URL.
    #[must_use]
    pub fn count(&self, method: Method, url: &str) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == method && r.url == url)
            .count()
    }
}

impl HttpTransport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        let unscripted = || TransportError::Request {
            url: request.url.clone(),
            message: "no scripted response".to_string(),
        };

        let mut routes = self.routes.lock().map_err(|_| unscripted())?;
        let queue = routes
            .get_mut(&(request.method, request.url.clone()))
            .ok_or_else(unscripted)?;

        if queue.len() > 1 {
            queue.pop_front().ok_or_else(unscripted)
        } else {
            queue.front().cloned().ok_or_else(unscripted)
        }
    }
}

/// Builds a zip. Names ending in `/` become directories.
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> zip::result::ZipResult<Vec<u8>> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default();

    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options)?;
        } else {
            writer.start_file(*name, options)?;
            writer.write_all(data)?;
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// Builds a gzipped tarball. Names ending in `/` become directories.
/// With `pax_comment`, a pax global header carrying it comes first, as
/// `git archive` writes it.
pub fn tar_gz_bytes(entries: &[(&str, &[u8])], pax_comment: Option<&str>) -> io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    if let Some(comment) = pax_comment {
        let record = pax_record("comment", comment);
        let mut header = tar::Header::new_ustar();
        header.set_entry_type(tar::EntryType::XGlobalHeader);
        header.set_size(record.len() as u64);
        header.set_mode(0o644);
        builder.append_data(&mut header, PAX_GLOBAL_HEADER, record.as_bytes())?;
    }

    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        if name.ends_with('/') {
            header.set_entry_type(tar::EntryType::Directory);
            header.set_size(0);
            header.set_mode(0o755);
            builder.append_data(&mut header, name, io::empty())?;
        } else {
            header.set_entry_type(tar::EntryType::Regular);
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            builder.append_data(&mut header, name, *data)?;
        }
    }

    builder.into_inner()?.finish()
}

/// One `length key=value\n` pax record. The length counts itself.
fn pax_record(key: &str, value: &str) -> String {
    let body_len = key.len() + value.len() + 3;
    let mut len = body_len + body_len.to_string().len();
    if len.to_string().len() != body_len.to_string().len() {
        len += 1;
    }
    format!("{} {}={}\n", len, key, value)
}

/// Names of the entries of a zip, sorted.
pub fn zip_entry_names(bytes: &[u8]) -> zip::result::ZipResult<Vec<String>> {
    let archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
    names.sort();
    Ok(names)
}

/// A temporary data root.
pub struct Fixture {
    dir: TempDir,
    pub paths: Paths,
}

impl Fixture {
    /// Creates an empty data root.
    pub fn new() -> io::Result<Self> {
        let dir = TempDir::new()?;
        let paths = Paths::new(dir.path());
        Ok(Self { dir, paths })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes `globalSettings.json`.
    pub fn write_global(&self, json: &str) -> io::Result<()> {
        fs::write(self.root().join(GLOBAL_SETTINGS_FILE), json)
    }

    /// Writes `projectSettings/<slug>.json`.
    pub fn write_project(&self, slug: &str, json: &str) -> io::Result<()> {
        let dir = self.root().join(PROJECT_SETTINGS_DIR);
        fs::create_dir_all(&dir)?;
        fs::write(dir.join(format!("{}.json", slug.to_lowercase())), json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scripted_transport_repeats_last_response() {
        let transport = ScriptedTransport::new();
        transport
            .on_get("http://h/a", HttpResponse::new(500, ""))
            .on_get("http://h/a", HttpResponse::new(200, "ok"));

        let request = HttpRequest::get("http://h/a");
        assert_eq!(transport.send(&request).unwrap().status, 500);
        assert_eq!(transport.send(&request).unwrap().status, 200);
        assert_eq!(transport.send(&request).unwrap().status, 200);
        assert_eq!(transport.count(Method::Get, "http://h/a"), 3);

        assert!(transport.send(&HttpRequest::get("http://h/b")).is_err());
    }

    #[test]
    fn test_pax_record_length() {
        let record = pax_record("comment", "abc");
        assert_eq!(record.len().to_string(), record.split(' ').next().unwrap());
    }
}
