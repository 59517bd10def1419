//! prodserve — a production static-asset server.
//!
//! Serves a built asset directory over HTTP/1.1 with ETag revalidation,
//! gzip compression, SPA history fallback, header injection, and prefix
//! proxying (including WebSocket upgrade relay). Configuration comes from
//! `prodserve.toml` plus `PRODSERVE__`-prefixed environment variables; the
//! whole pipeline is validated once at [`server::start_server`] and is
//! immutable afterwards.

pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod pipeline;
pub mod proxy;
pub mod server;
pub mod static_assets;

pub use config::{Config, ServerOptions};
pub use error::ServerError;
pub use server::{start_server, BoundServerHandle};
