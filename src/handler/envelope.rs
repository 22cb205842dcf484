//! Response envelope module
//!
//! The success/failure wrapper and its two renderings.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use serde::Serialize;

use crate::http;
use crate::params::{Parameter, ResolveError};

/// `{"ok": bool, "error"?: string, "param"?: {...}}`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub param: Option<Parameter>,
}

impl Envelope {
    pub const fn success(param: Parameter) -> Self {
        Self {
            ok: true,
            error: None,
            param: Some(param),
        }
    }

    pub fn failure(error: &ResolveError) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
            param: None,
        }
    }

    /// 200 when resolved, 404 otherwise
    pub const fn status(&self) -> StatusCode {
        if self.ok {
            StatusCode::OK
        } else {
            StatusCode::NOT_FOUND
        }
    }

    /// Plain text body: the error, else the value, else nothing
    pub fn to_text(&self) -> String {
        if let Some(error) = &self.error {
            return format!("{error}\n");
        }
        if let Some(param) = &self.param {
            return format!("{}\n", param.value);
        }
        String::new()
    }

    pub fn into_response(self, encode_as_json: bool) -> Response<Full<Bytes>> {
        let status = self.status();
        if encode_as_json {
            http::build_json_response(status, &self)
        } else {
            http::build_text_response(status, self.to_text())
        }
    }
}
