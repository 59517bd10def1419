//! HTTP helper modules
//!
//! Response builders, caching validators, and MIME detection shared by the
//! pipeline stages.

pub mod cache;
pub mod mime;
pub mod response;

pub use response::{
    build_304_response, build_404_response, build_500_response, build_502_response,
    build_asset_response, build_favicon_fallback_response,
};
