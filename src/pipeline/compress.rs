//! Compression stage
//!
//! Wraps resolved responses with gzip content negotiation. Brotli is
//! carried as an explicit, permanently-disabled configuration field rather
//! than inferred from client capability: only gzip is ever negotiated.

use crate::http::mime;
use crate::logger;
use flate2::write::GzEncoder;
use flate2::Compression;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::{HeaderValue, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use hyper::Response;
use std::io::Write;

/// Bodies below this size are not worth the encoder round trip
const MIN_COMPRESS_SIZE: usize = 1024;

/// Algorithm selection. `brotli` exists so the simplification is explicit
/// and testable; no brotli encoder is wired in.
#[derive(Debug, Clone, Copy)]
pub struct CompressionConfig {
    pub gzip: bool,
    pub brotli: bool,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            gzip: true,
            brotli: false,
        }
    }
}

/// Compression engine, constructed once at pipeline build
#[derive(Debug, Clone, Copy, Default)]
pub struct CompressionStage {
    config: CompressionConfig,
}

impl CompressionStage {
    pub const fn new(config: CompressionConfig) -> Self {
        Self { config }
    }

    /// Negotiate an encoding for the client's `Accept-Encoding` value.
    /// Only gzip can win; brotli is never selected regardless of client
    /// preference.
    fn negotiate(&self, accept_encoding: Option<&str>) -> Option<&'static str> {
        let accepted = accept_encoding?;
        if self.config.gzip && accepts(accepted, "gzip") {
            return Some("gzip");
        }
        None
    }

    /// Re-encode the response body when negotiation selects gzip.
    ///
    /// Skips responses that already carry a `Content-Encoding`, bodyless
    /// statuses, incompressible content types, and tiny bodies.
    pub fn encode(
        &self,
        response: Response<Full<Bytes>>,
        accept_encoding: Option<&str>,
        body: &Bytes,
    ) -> Response<Full<Bytes>> {
        let Some(encoding) = self.negotiate(accept_encoding) else {
            return response;
        };
        if response.headers().contains_key(CONTENT_ENCODING) {
            return response;
        }
        let status = response.status();
        if status == hyper::StatusCode::NO_CONTENT || status == hyper::StatusCode::NOT_MODIFIED {
            return response;
        }
        if body.len() < MIN_COMPRESS_SIZE {
            return response;
        }
        let compressible = response
            .headers()
            .get(hyper::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(mime::is_compressible);
        if !compressible {
            return response;
        }

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        let encoded = encoder
            .write_all(body)
            .and_then(|()| encoder.finish());
        let encoded = match encoded {
            Ok(bytes) => bytes,
            Err(e) => {
                logger::log_error(&format!("gzip encoding failed: {e}"));
                return response;
            }
        };

        let (mut parts, _) = response.into_parts();
        parts
            .headers
            .insert(CONTENT_ENCODING, HeaderValue::from_static(encoding));
        if let Ok(len) = HeaderValue::from_str(&encoded.len().to_string()) {
            parts.headers.insert(CONTENT_LENGTH, len);
        }
        parts
            .headers
            .append(VARY, HeaderValue::from_static("Accept-Encoding"));

        Response::from_parts(parts, Full::new(Bytes::from(encoded)))
    }
}

/// Whether an `Accept-Encoding` value lists the given coding with a
/// non-zero quality
fn accepts(accept_encoding: &str, coding: &str) -> bool {
    accept_encoding.split(',').any(|entry| {
        let mut parts = entry.trim().split(';');
        let name = parts.next().unwrap_or("").trim();
        if !name.eq_ignore_ascii_case(coding) && name != "*" {
            return false;
        }
        // Reject explicit q=0
        !parts.any(|p| p.trim().eq_ignore_ascii_case("q=0"))
    })
}
