//! Startup error taxonomy
//!
//! Configuration, binding, and TLS problems are fail-fast: they abort
//! startup instead of surfacing per request. Per-request faults are handled
//! inside the pipeline and never use these types.

use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },

    #[error("TLS setup failed: {0}")]
    Tls(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
