//! Request handler module
//!
//! Turns a request path into a resolved parameter and renders the result.

pub mod envelope;
pub mod router;

// Re-export main entry point
pub use router::handle_request;
