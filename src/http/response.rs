//! HTTP response building module
//!
//! Builders for the status responses the pipeline produces, decoupled from
//! stage logic.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::Response;

/// Build 304 Not Modified response
pub fn build_304_response(etag: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(304)
        .header("ETag", etag)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("304", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build 404 Not Found response
pub fn build_404_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(404)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("404 Not Found")))
        .unwrap_or_else(|e| {
            log_build_error("404", &e);
            Response::new(Full::new(Bytes::from("404 Not Found")))
        })
}

/// Build 500 Internal Server Error response (per-request fault, e.g. a
/// filesystem error distinct from "not found")
pub fn build_500_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(500)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from("500 Internal Server Error")))
        .unwrap_or_else(|e| {
            log_build_error("500", &e);
            Response::new(Full::new(Bytes::from("500 Internal Server Error")))
        })
}

/// Build 502 Bad Gateway response for upstream proxy failures
pub fn build_502_response(message: &str) -> Response<Full<Bytes>> {
    Response::builder()
        .status(502)
        .header("Content-Type", "text/plain")
        .body(Full::new(Bytes::from(format!("502 Bad Gateway: {message}"))))
        .unwrap_or_else(|e| {
            log_build_error("502", &e);
            Response::new(Full::new(Bytes::from("502 Bad Gateway")))
        })
}

/// Build the terminal favicon response: an empty success instead of a 404,
/// so unconfigured favicon requests do not spam browser consoles
pub fn build_favicon_fallback_response() -> Response<Full<Bytes>> {
    Response::builder()
        .status(204)
        .body(Full::new(Bytes::new()))
        .unwrap_or_else(|e| {
            log_build_error("204", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Build success response for a served asset: strong validator, no
/// long-lived cache-control (files are rebuilt per deploy)
pub fn build_asset_response(
    data: Bytes,
    content_type: &str,
    etag: &str,
    is_head: bool,
) -> Response<Full<Bytes>> {
    let content_length = data.len();
    let body = if is_head { Bytes::new() } else { data };

    Response::builder()
        .status(200)
        .header("Content-Type", content_type)
        .header("Content-Length", content_length)
        .header("ETag", etag)
        .body(Full::new(body))
        .unwrap_or_else(|e| {
            log_build_error("200", &e);
            Response::new(Full::new(Bytes::new()))
        })
}

/// Log response build error
fn log_build_error(status: &str, error: &hyper::http::Error) {
    crate::logger::log_error(&format!("Failed to build {status} response: {error}"));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_response_revalidates() {
        let resp = build_asset_response(Bytes::from("body"), "text/css", "\"abc\"", false);
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.headers().get("ETag").unwrap(), "\"abc\"");
        // Rebuilt-per-deploy assets must revalidate, not live in caches
        assert!(resp.headers().get("Cache-Control").is_none());
    }

    #[test]
    fn test_head_strips_body() {
        let resp = build_asset_response(Bytes::from("body"), "text/css", "\"abc\"", true);
        assert_eq!(resp.headers().get("Content-Length").unwrap(), "4");
    }

    #[test]
    fn test_favicon_fallback_is_success() {
        let resp = build_favicon_fallback_response();
        assert_eq!(resp.status(), 204);
    }
}
