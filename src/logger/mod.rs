//! Logger module
//!
//! Logging utilities for the production server:
//! - startup and lifecycle logging
//! - access logging with multiple formats
//! - error and warning logging

mod format;

pub use format::AccessLogEntry;

fn write_info(message: &str) {
    println!("{message}");
}

fn write_error(message: &str) {
    eprintln!("{message}");
}

/// Log the bound server URLs once the listener is confirmed listening
pub fn log_server_urls(urls: &[String]) {
    write_info("======================================");
    write_info("Production server started");
    for url in urls {
        write_info(&format!("  ➜  {url}"));
    }
    write_info("======================================");
}

pub fn log_error(message: &str) {
    write_error(&format!("[ERROR] {message}"));
}

pub fn log_warning(message: &str) {
    write_error(&format!("[WARN] {message}"));
}

pub fn log_connection_error(err: &impl std::fmt::Debug) {
    write_error(&format!("[ERROR] Failed to serve connection: {err:?}"));
}

pub fn log_upstream_error(target: &str, err: &impl std::fmt::Display) {
    write_error(&format!("[PROXY ERROR] upstream {target}: {err}"));
}

pub fn log_upgrade(path: &str, target: &str) {
    write_info(&format!("[PROXY] upgrade {path} -> {target}"));
}

pub fn log_shutdown() {
    write_info("[Shutdown] Listener closed, no longer accepting connections");
}

/// Log formatted access log entry
pub fn log_access(entry: &AccessLogEntry, format: &str) {
    write_info(&entry.format(format));
}
