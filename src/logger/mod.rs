//! Logger module
//!
//! Provides logging utilities for the server including:
//! - Server lifecycle logging
//! - Access logging with multiple formats
//! - Error and warning logging
//! - File-based logging support

mod format;
pub mod writer;

pub use format::AccessLogEntry;

use crate::config::Config;
use std::net::SocketAddr;

/// Initialize the logger with configuration
///
/// Should be called once at application startup.
pub fn init(config: &Config) -> std::io::Result<()> {
    writer::init(
        config.logging.access_log_file.as_deref(),
        config.logging.error_log_file.as_deref(),
    )
}

/// Write to info/access log
fn write_info(message: &str) {
    match writer::get() {
        Some(w) => w.write_access(message),
        None => println!("{message}"),
    }
}

fn write_error(message: &str) {
    match writer::get() {
        Some(w) => w.write_error(message),
        None => eprintln!("{message}"),
    }
}

pub fn log_server_start(addr: &SocketAddr, config: &Config) {
    write_info("======================================");
    write_info(&format!("sysinfo server {} started", crate::params::VERSION));
    write_info(&format!("Listening on: http://{addr}"));
    if let Some(workers) = config.server.workers {
        write_info(&format!("Worker threads: {workers}"));
    }
    if let Some(max) = config.performance.max_connections {
        write_info(&format!("Max connections: {max}"));
    }
    if let Some(ref path) = config.logging.access_log_file {
        write_info(&format!("Access log: {path}"));
    }
    if let Some(ref path) = config.logging.error_log_file {
        write_info(&format!("Error log: {path}"));
    }
    write_info("======================================");
}

pub fn log_info(message: &str) {
    write_info(&format!("[INFO] {message}"));
}

/// Covers failures reading the request and writing the response
pub fn log_connection_error(peer_addr: &SocketAddr, err: &impl std::fmt::Display) {
    write_error(&format!("[ERROR] Failed to serve connection from {peer_addr}: {err}"));
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_info(&entry.format(format));
}

pub fn log_shutdown_requested(reason: &str) {
    write_info(&format!("[SHUTDOWN] {reason}: no longer accepting connections"));
}

pub fn log_shutdown_complete(remaining: usize) {
    if remaining == 0 {
        write_info("[SHUTDOWN] All connections closed");
    } else {
        write_error(&format!(
            "[WARN] Shutdown timed out with {remaining} connection(s) still open"
        ));
    }
}
