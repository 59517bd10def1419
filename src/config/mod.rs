// Configuration module entry point
// Loads the config file, applies defaults, and produces the immutable
// runtime options consumed by the server bootstrap

mod types;

use std::net::SocketAddr;

pub use types::{
    Config, FallbackOptions, LoggingConfig, OutputConfig, PathRewrite, ProxyRule, RewriteRule,
    ServerConfig, TlsOptions,
};

use crate::error::ServerError;

impl Config {
    /// Load configuration from specified file path (without extension)
    /// Default config file is "prodserve.toml" when no path specified
    pub fn load_from(config_path: &str) -> Result<Self, config::ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path).required(false))
            .add_source(config::Environment::with_prefix("PRODSERVE").separator("__"))
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 4173)?
            .set_default("server.strict_port", false)?
            .set_default("server.compress", true)?
            .set_default("server.print_urls", true)?
            .set_default("output.root", "dist")?
            .set_default("logging.access_log", false)?
            .build()?;

        settings.try_deserialize()
    }

    pub fn load() -> Result<Self, config::ConfigError> {
        Self::load_from("prodserve")
    }

    /// Convert into the validated, immutable runtime form
    pub fn into_options(self) -> Result<ServerOptions, ServerError> {
        let asset_prefix = match self.output.asset_prefix {
            Some(prefix) => normalize_asset_prefix(&prefix)?,
            None => None,
        };

        Ok(ServerOptions {
            root: self.output.root,
            asset_prefix,
            index_files: self.output.index_files,
            html_fallback_single: self.output.html_fallback_single,
            ignores: self.output.ignores,
            headers: self.server.headers,
            proxy: self.server.proxy,
            history_fallback: self.server.history_fallback,
            compress: self.server.compress,
            host: self.server.host,
            port: self.server.port,
            strict_port: self.server.strict_port,
            https: self.server.https,
            print_urls: self.server.print_urls,
            workers: self.server.workers,
            access_log: self.logging.access_log,
            access_log_format: self.logging.access_log_format,
        })
    }
}

/// Immutable runtime configuration; created once at startup and read-only
/// for the lifetime of the server
#[derive(Debug, Clone)]
pub struct ServerOptions {
    pub root: std::path::PathBuf,
    pub asset_prefix: Option<String>,
    pub index_files: Vec<String>,
    pub html_fallback_single: bool,
    pub ignores: Vec<String>,
    pub headers: std::collections::HashMap<String, String>,
    pub proxy: Vec<ProxyRule>,
    pub history_fallback: Option<FallbackOptions>,
    pub compress: bool,
    pub host: String,
    pub port: u16,
    pub strict_port: bool,
    pub https: Option<TlsOptions>,
    pub print_urls: bool,
    pub workers: Option<usize>,
    pub access_log: bool,
    pub access_log_format: String,
}

impl ServerOptions {
    pub fn socket_addr(&self) -> Result<SocketAddr, ServerError> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|e| ServerError::Config(format!("invalid listen address: {e}")))
    }

    pub const fn scheme(&self) -> &'static str {
        if self.https.is_some() {
            "https"
        } else {
            "http"
        }
    }
}

/// Normalize the configured asset prefix: must start with '/', trailing
/// slash is dropped, and a bare "/" (or empty) prefix disables rewriting
fn normalize_asset_prefix(prefix: &str) -> Result<Option<String>, ServerError> {
    let trimmed = prefix.trim_end_matches('/');
    if trimmed.is_empty() {
        return Ok(None);
    }
    if !trimmed.starts_with('/') {
        return Err(ServerError::Config(format!(
            "asset_prefix must start with '/': {prefix}"
        )));
    }
    Ok(Some(trimmed.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_asset_prefix() {
        assert_eq!(
            normalize_asset_prefix("/assets/").unwrap(),
            Some("/assets".to_string())
        );
        assert_eq!(normalize_asset_prefix("/").unwrap(), None);
        assert!(normalize_asset_prefix("assets").is_err());
    }

    #[test]
    fn test_defaults_load() {
        let cfg = Config::load_from("nonexistent-config").expect("defaults should load");
        assert_eq!(cfg.server.port, 4173);
        assert!(!cfg.server.strict_port);
        assert!(cfg.server.compress);
        assert_eq!(cfg.output.root, std::path::PathBuf::from("dist"));
        assert_eq!(cfg.output.index_files, vec!["index.html".to_string()]);
        assert_eq!(cfg.output.ignores, vec!["/favicon.ico".to_string()]);
        assert!(cfg.server.proxy.is_empty());
        assert!(cfg.server.history_fallback.is_none());
    }

    #[test]
    fn test_into_options() {
        let cfg = Config::load_from("nonexistent-config").expect("defaults should load");
        let options = cfg.into_options().expect("valid options");
        assert_eq!(options.port, 4173);
        assert_eq!(options.scheme(), "http");
        assert!(options.asset_prefix.is_none());
    }
}
