//! Request handler and response mapping.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response as HttpResponse};
use tracing::error;

use crate::engine::Engine;
use crate::response::Response;

const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// Decodes `a=b&c=d`. `+` is a space, later keys win, undecodable pairs
/// are skipped.
#[must_use]
pub fn parse_form(input: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in input.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let decode = |s: &str| urlencoding::decode(&s.replace('+', " ")).map(|c| c.into_owned());
        if let (Ok(key), Ok(value)) = (decode(key), decode(value)) {
            params.insert(key, value);
        }
    }
    params
}

/// Merges query parameters with a url-encoded body. Body values win.
#[must_use]
pub fn request_params(uri: &Uri, headers: &HeaderMap, body: &[u8]) -> HashMap<String, String> {
    let mut params = uri.query().map(parse_form).unwrap_or_default();

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with(FORM_CONTENT_TYPE));

    if is_form && !body.is_empty() {
        params.extend(parse_form(&String::from_utf8_lossy(body)));
    }

    params
}

/// `GET /` and `POST /`.
pub async fn handle(
    State(engine): State<Arc<Engine>>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> HttpResponse {
    let params = request_params(&uri, &headers, &body);
    let remote_ip = remote.ip().to_string();

    let result = tokio::task::spawn_blocking(move || engine.handle(&params, &remote_ip)).await;

    match result {
        Ok(response) => into_http_response(response),
        Err(e) => {
            error!("[SERVER] Request task failed: {}", e);
            let mut response = into_http_response(Response::nothing_happened(None));
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
        }
    }
}

/// Maps an engine response to HTTP.
#[must_use]
pub fn into_http_response(response: Response) -> HttpResponse {
    match response {
        Response::Serialized(value) => (
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            value.serialize(),
        )
            .into_response(),
        Response::Html(html) => (
            [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
            html,
        )
            .into_response(),
        Response::Download { filename, bytes } => download_response(&filename, bytes),
    }
}

fn download_response(filename: &str, bytes: Vec<u8>) -> HttpResponse {
    let mut headers = HeaderMap::new();
    headers.insert(header::PRAGMA, HeaderValue::from_static("public"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("must-revalidate, post-check=0, pre-check=0"),
    );
    headers.append(header::CACHE_CONTROL, HeaderValue::from_static("private"));
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/zip"));
    if let Ok(value) =
        HeaderValue::from_str(&format!("attachment; filename=\"{}\";", filename))
    {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    headers.insert(
        "content-transfer-encoding",
        HeaderValue::from_static("binary"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));

    (headers, Body::from(bytes)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::php::PhpValue;

    #[test]
    fn test_parse_form() {
        let params = parse_form("action=basic_check&slug=my+plugin&x=%2Fa&flag");
        assert_eq!(params["action"], "basic_check");
        assert_eq!(params["slug"], "my plugin");
        assert_eq!(params["x"], "/a");
        assert_eq!(params["flag"], "");
    }

    #[test]
    fn test_body_wins_over_query() {
        let uri: Uri = "/?slug=a&branch=dev".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        );

        let params = request_params(&uri, &headers, b"slug=b");
        assert_eq!(params["slug"], "b");
        assert_eq!(params["branch"], "dev");
    }

    #[test]
    fn test_body_ignored_without_form_type() {
        let uri: Uri = "/?slug=a".parse().unwrap();
        let params = request_params(&uri, &HeaderMap::new(), b"slug=b");
        assert_eq!(params["slug"], "a");
    }

    #[test]
    fn test_download_headers() {
        let response = into_http_response(Response::Download {
            filename: "master.zip".to_string(),
            bytes: vec![1, 2, 3],
        });
        let headers = response.headers();

        assert_eq!(headers[header::PRAGMA], "public");
        assert_eq!(headers[header::EXPIRES], "0");
        let cache_control: Vec<_> = headers.get_all(header::CACHE_CONTROL).iter().collect();
        assert_eq!(cache_control.len(), 2);
        assert_eq!(cache_control[1], "private");
        assert_eq!(headers[header::CONTENT_TYPE], "application/zip");
        assert_eq!(
            headers[header::CONTENT_DISPOSITION],
            "attachment; filename=\"master.zip\";"
        );
        assert_eq!(headers["content-transfer-encoding"], "binary");
        assert_eq!(headers[header::CONTENT_LENGTH], "3");
    }

    #[test]
    fn test_serialized_is_plain_text() {
        let response = into_http_response(Response::Serialized(PhpValue::Null));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "text/plain; charset=utf-8"
        );
    }
}
