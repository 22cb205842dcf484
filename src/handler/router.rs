//! Request routing module
//!
//! Single catch-all route: the path names the parameter, `.json` picks the encoding.

use crate::config::AppState;
use crate::handler::envelope::Envelope;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::sync::Arc;

const JSON_SUFFIX: &str = ".json";

/// Parameter name and output encoding derived from a request path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamPath<'a> {
    pub name: &'a str,
    pub encode_as_json: bool,
}

impl<'a> ParamPath<'a> {
    /// Strip one leading `/`, then an optional trailing `.json`
    pub fn parse(path: &'a str) -> Self {
        let name = path.strip_prefix('/').unwrap_or(path);
        match name.strip_suffix(JSON_SUFFIX) {
            Some(stripped) => Self {
                name: stripped,
                encode_as_json: true,
            },
            None => Self {
                name,
                encode_as_json: false,
            },
        }
    }
}

/// Percent-decode a request path
///
/// Bytes that do not decode to UTF-8 become U+FFFD, so such a name never
/// matches a registered parameter.
fn decode_path(raw: &str) -> String {
    String::from_utf8_lossy(&urlencoding::decode_binary(raw.as_bytes())).into_owned()
}

/// Main entry point for HTTP request handling
///
/// Any method is accepted and the body is never read.
pub async fn handle_request<B>(
    req: Request<B>,
    state: Arc<AppState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let decoded = decode_path(req.uri().path());
    let path = ParamPath::parse(&decoded);

    let envelope = match state.params.resolve(path.name).await {
        Ok(param) => Envelope::success(param),
        Err(e) => Envelope::failure(&e),
    };

    Ok(envelope.into_response(path.encode_as_json))
}
