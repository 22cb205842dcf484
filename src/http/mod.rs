//! HTTP protocol layer module
//!
//! Response construction shared by the request handler, kept free of
//! parameter logic.

pub mod response;

pub use response::{build_json_response, build_text_response};
