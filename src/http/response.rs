//! HTTP response building module
//!
//! Builders for the two body encodings the server emits.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Build a plain text response; the body is sent as-is
pub fn build_text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    build_response(status, TEXT_CONTENT_TYPE, Bytes::from(body))
}

/// Build a compact, newline-terminated JSON response
pub fn build_json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    match serde_json::to_vec(body) {
        Ok(mut json) => {
            json.push(b'\n');
            build_response(status, JSON_CONTENT_TYPE, Bytes::from(json))
        }
        Err(e) => {
            crate::logger::log_error(&format!("Failed to serialize response: {e}"));
            build_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                JSON_CONTENT_TYPE,
                Bytes::from_static(b"{\"ok\":false}\n"),
            )
        }
    }
}

fn build_response(status: StatusCode, content_type: &str, body: Bytes) -> Response<Full<Bytes>> {
    let content_length = body.len();
    Response::builder()
        .status(status)
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .body(Full::new(body.clone()))
        .unwrap_or_else(|e| {
            log_build_error(status, &e);
            let mut resp = Response::new(Full::new(body));
            *resp.status_mut() = status;
            resp
        })
}

fn log_build_error(status: StatusCode, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}
