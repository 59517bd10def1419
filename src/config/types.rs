// Configuration types module
// Defines the file-level configuration and its validated runtime form

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main configuration structure, as read from the config file
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// When true, a taken port is a fatal error; when false, the next free
    /// port is selected silently.
    pub strict_port: bool,
    pub compress: bool,
    pub print_urls: bool,
    pub workers: Option<usize>,
    /// Fixed response headers attached to every request
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Proxy rules, matched in order by path prefix
    #[serde(default)]
    pub proxy: Vec<ProxyRule>,
    /// SPA history fallback; absent means disabled
    #[serde(default)]
    pub history_fallback: Option<FallbackOptions>,
    /// TLS material; absent means plain HTTP
    #[serde(default)]
    pub https: Option<TlsOptions>,
}

/// Built asset output configuration
#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    /// Directory of built static assets
    pub root: PathBuf,
    /// URL prefix stripped before resolving against `root`
    #[serde(default)]
    pub asset_prefix: Option<String>,
    /// Documents tried when a directory is requested
    #[serde(default = "default_index_files")]
    pub index_files: Vec<String>,
    /// Single-document mode: unresolved paths fall back to the first index
    /// file instead of failing
    #[serde(default)]
    pub html_fallback_single: bool,
    /// Paths the static server never resolves, deferring to the favicon
    /// terminal stage
    #[serde(default = "default_ignores")]
    pub ignores: Vec<String>,
}

fn default_index_files() -> Vec<String> {
    vec!["index.html".to_string()]
}

fn default_ignores() -> Vec<String> {
    vec!["/favicon.ico".to_string()]
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    pub access_log: bool,
    /// Access log format (combined, common, json, or custom pattern)
    #[serde(default = "default_access_log_format")]
    pub access_log_format: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_access_log_format() -> String {
    "combined".to_string()
}

/// Proxy rule: maps a path prefix to an upstream target, covering both
/// plain and upgrade traffic
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ProxyRule {
    /// Path prefix to match (e.g. "/api")
    pub context: String,
    /// Upstream origin (e.g. "http://127.0.0.1:3000")
    pub target: String,
    /// Forward WebSocket upgrade requests for this context
    #[serde(default)]
    pub ws: bool,
    /// Optional path rewrite applied before forwarding
    #[serde(default)]
    pub path_rewrite: Option<PathRewrite>,
}

/// Prefix substitution applied to the forwarded path
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct PathRewrite {
    pub from: String,
    pub to: String,
}

/// History fallback options (SPA routing support)
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FallbackOptions {
    /// Document served for unmatched navigational paths
    #[serde(default = "default_fallback_index")]
    pub index: String,
    /// Explicit rewrites, evaluated before the default index rewrite
    #[serde(default)]
    pub rewrites: Vec<RewriteRule>,
    /// Allow fallback for paths whose final segment contains a dot
    #[serde(default)]
    pub disable_dot_rule: bool,
}

fn default_fallback_index() -> String {
    "/index.html".to_string()
}

impl Default for FallbackOptions {
    fn default() -> Self {
        Self {
            index: default_fallback_index(),
            rewrites: Vec::new(),
            disable_dot_rule: false,
        }
    }
}

/// One fallback rewrite: paths matching `from` are rewritten to `to`
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct RewriteRule {
    /// Regular expression matched against the request path
    pub from: String,
    /// Replacement target path
    pub to: String,
}

/// TLS material for HTTPS serving
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct TlsOptions {
    /// PEM certificate chain file
    pub cert: PathBuf,
    /// PEM private key file
    pub key: PathBuf,
}
