//! Static asset serving module
//!
//! Resolves request paths against the built output directory. Supports
//! asset-prefix rewriting (transactional: the original request target is
//! restored on every exit path), directory index documents, a
//! single-document mode for SPA builds, and per-file `ETag` validation.

use crate::config::ServerOptions;
use crate::http::{self, cache, mime};
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Method, Request, Response, Uri};
use percent_encoding::percent_decode_str;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// Filesystem-backed asset resolver, constructed once at pipeline build
#[derive(Debug)]
pub struct StaticAssetServer {
    root: PathBuf,
    asset_prefix: Option<String>,
    index_files: Vec<String>,
    /// Single-document mode: unresolved paths fall back to this document
    single_index: Option<String>,
    /// Paths never resolved here, deferred to the favicon terminal stage
    ignores: Vec<String>,
}

impl StaticAssetServer {
    pub fn from_options(options: &ServerOptions) -> Self {
        let single_index = options
            .html_fallback_single
            .then(|| options.index_files.first().cloned())
            .flatten();

        Self {
            root: options.root.clone(),
            asset_prefix: options.asset_prefix.clone(),
            index_files: options.index_files.clone(),
            single_index,
            ignores: options.ignores.clone(),
        }
    }

    /// Serve the request if it resolves to a file under the root.
    ///
    /// Returns `Ok(Some(response))` when resolved, `Ok(None)` when the next
    /// stage should run (missing file is not an error), and `Err` only for
    /// filesystem faults distinct from "not found".
    pub async fn serve<B>(
        &self,
        req: &mut Request<B>,
    ) -> io::Result<Option<Response<Full<Bytes>>>> {
        if req.method() != Method::GET && req.method() != Method::HEAD {
            return Ok(None);
        }
        if self.ignores.iter().any(|p| p == req.uri().path()) {
            return Ok(None);
        }

        if let Some(prefix) = &self.asset_prefix {
            if let Some(stripped) = strip_prefix_uri(req.uri(), prefix) {
                // Scoped rewrite: the guard restores the original target when
                // it drops, whether resolution succeeded, failed, or errored.
                let guard = PathRestore::new(req, stripped);
                return self.resolve_request(guard.request()).await;
            }
        }

        self.resolve_request(req).await
    }

    async fn resolve_request<B>(
        &self,
        req: &Request<B>,
    ) -> io::Result<Option<Response<Full<Bytes>>>> {
        let Some((content, content_type)) = self.load_asset(req.uri().path()).await? else {
            return Ok(None);
        };

        let is_head = req.method() == Method::HEAD;
        let if_none_match = req
            .headers()
            .get("if-none-match")
            .and_then(|v| v.to_str().ok());

        let etag = cache::generate_etag(&content);
        if cache::check_etag_match(if_none_match, &etag) {
            return Ok(Some(http::build_304_response(&etag)));
        }

        Ok(Some(http::build_asset_response(
            Bytes::from(content),
            content_type,
            &etag,
            is_head,
        )))
    }

    /// Load a file for the given URL path, trying index documents for
    /// directories and the single-document fallback for misses
    async fn load_asset(&self, path: &str) -> io::Result<Option<(Vec<u8>, &'static str)>> {
        // Root must exist and canonicalize for the containment check
        let root_canonical = match self.root.canonicalize() {
            Ok(p) => p,
            Err(e) => {
                logger::log_warning(&format!(
                    "Asset root not found or inaccessible '{}': {e}",
                    self.root.display()
                ));
                return Ok(None);
            }
        };

        if let Some(found) = self
            .try_path(&root_canonical, path, path.ends_with('/'))
            .await?
        {
            return Ok(Some(found));
        }

        // Single-document mode: any unresolved path serves the index
        if let Some(single) = &self.single_index {
            return self.try_path(&root_canonical, single, false).await;
        }

        Ok(None)
    }

    async fn try_path(
        &self,
        root_canonical: &Path,
        path: &str,
        is_dir_request: bool,
    ) -> io::Result<Option<(Vec<u8>, &'static str)>> {
        // Decode the URL path, then reject any traversal segment outright.
        // Dots inside a name ("app..js") stay intact.
        let Ok(decoded) = percent_decode_str(path).decode_utf8() else {
            return Ok(None);
        };
        if decoded.split('/').any(|segment| segment == "..") {
            logger::log_warning(&format!("Path traversal attempt blocked: {path}"));
            return Ok(None);
        }
        let clean = decoded.trim_start_matches('/');
        let mut file_path = self.root.join(clean);

        if file_path.is_dir() || clean.is_empty() || is_dir_request {
            for index_file in &self.index_files {
                let index_path = file_path.join(index_file);
                if index_path.is_file() {
                    file_path = index_path;
                    break;
                }
            }
        }

        // Misses are common, not errors
        let Ok(canonical) = file_path.canonicalize() else {
            return Ok(None);
        };
        if !canonical.starts_with(root_canonical) {
            logger::log_warning(&format!(
                "Path traversal attempt blocked: {path} -> {}",
                canonical.display()
            ));
            return Ok(None);
        }
        if !canonical.is_file() {
            return Ok(None);
        }

        match fs::read(&canonical).await {
            Ok(content) => {
                let content_type =
                    mime::get_content_type(canonical.extension().and_then(|e| e.to_str()));
                Ok(Some((content, content_type)))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            // Permission and other I/O faults surface to the dispatcher
            Err(e) => Err(e),
        }
    }
}

/// Strip the asset prefix from the request target, preserving the query.
/// Returns `None` when the path does not start with the prefix.
fn strip_prefix_uri(uri: &Uri, prefix: &str) -> Option<Uri> {
    let path = uri.path();
    let rest = path.strip_prefix(prefix)?;
    let rest = if rest.is_empty() { "/" } else { rest };
    if !rest.starts_with('/') {
        // Prefix matched mid-segment ("/assetsfoo"), not a real prefix hit
        return None;
    }

    let rewritten = match uri.query() {
        Some(q) => format!("{rest}?{q}"),
        None => rest.to_string(),
    };
    rewritten.parse().ok()
}

/// Drop guard that rewrites the request target and restores the original
/// value when it goes out of scope, on every exit path of the inner dispatch
struct PathRestore<'a, B> {
    req: &'a mut Request<B>,
    original: Option<Uri>,
}

impl<'a, B> PathRestore<'a, B> {
    fn new(req: &'a mut Request<B>, rewritten: Uri) -> Self {
        let original = std::mem::replace(req.uri_mut(), rewritten);
        Self {
            req,
            original: Some(original),
        }
    }

    fn request(&self) -> &Request<B> {
        self.req
    }
}

impl<B> Drop for PathRestore<'_, B> {
    fn drop(&mut self) {
        if let Some(original) = self.original.take() {
            *self.req.uri_mut() = original;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn test_options(root: &Path) -> ServerOptions {
        ServerOptions {
            root: root.to_path_buf(),
            asset_prefix: None,
            index_files: vec!["index.html".to_string()],
            html_fallback_single: false,
            ignores: vec!["/favicon.ico".to_string()],
            headers: HashMap::new(),
            proxy: Vec::new(),
            history_fallback: None,
            compress: false,
            host: "127.0.0.1".to_string(),
            port: 0,
            strict_port: false,
            https: None,
            print_urls: false,
            workers: None,
            access_log: false,
            access_log_format: "combined".to_string(),
        }
    }

    fn make_dist() -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        std::fs::write(dir.path().join("index.html"), "<html>home</html>").unwrap();
        std::fs::write(dir.path().join("app.js"), "console.log(1)").unwrap();
        dir
    }

    fn request(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path)
            .body(Full::new(Bytes::new()))
            .expect("request")
    }

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_serves_file_with_etag() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/app.js");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(resp.status(), 200);
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/javascript"
        );
        assert!(resp.headers().contains_key("ETag"));
        assert_eq!(body_string(resp).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_etag_revalidation() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/app.js");
        let resp = server.serve(&mut req).await.unwrap().unwrap();
        let etag = resp.headers().get("ETag").unwrap().clone();

        let mut conditional = Request::builder()
            .uri("/app.js")
            .header("if-none-match", etag)
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = server.serve(&mut conditional).await.unwrap().unwrap();
        assert_eq!(resp.status(), 304);
    }

    #[tokio::test]
    async fn test_directory_resolves_index() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(body_string(resp).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn test_missing_file_forwards() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/nope.js");
        assert!(server.serve(&mut req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ignored_path_forwards() {
        let dir = make_dist();
        std::fs::write(dir.path().join("favicon.ico"), "icon").unwrap();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        // Present on disk, but excluded from resolution
        let mut req = request("/favicon.ico");
        assert!(server.serve(&mut req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_non_get_forwards() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/app.js")
            .body(Full::new(Bytes::new()))
            .unwrap();
        assert!(server.serve(&mut req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_stripped_and_restored_on_hit() {
        let dir = make_dist();
        let mut options = test_options(dir.path());
        options.asset_prefix = Some("/assets".to_string());
        let server = StaticAssetServer::from_options(&options);

        let mut req = request("/assets/app.js?v=1");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(resp.status(), 200);
        // Original target restored after dispatch
        assert_eq!(req.uri().path(), "/assets/app.js");
        assert_eq!(req.uri().query(), Some("v=1"));
    }

    #[tokio::test]
    async fn test_prefix_restored_on_miss() {
        let dir = make_dist();
        let mut options = test_options(dir.path());
        options.asset_prefix = Some("/assets".to_string());
        let server = StaticAssetServer::from_options(&options);

        let mut req = request("/assets/missing.js");
        assert!(server.serve(&mut req).await.unwrap().is_none());
        assert_eq!(req.uri().path(), "/assets/missing.js");
    }

    #[tokio::test]
    async fn test_unprefixed_path_not_stripped() {
        let dir = make_dist();
        let mut options = test_options(dir.path());
        options.asset_prefix = Some("/assets".to_string());
        let server = StaticAssetServer::from_options(&options);

        // No prefix: resolved as-is against the root
        let mut req = request("/app.js");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_single_document_mode() {
        let dir = make_dist();
        let mut options = test_options(dir.path());
        options.html_fallback_single = true;
        let server = StaticAssetServer::from_options(&options);

        let mut req = request("/some/client/route");
        let resp = server.serve(&mut req).await.unwrap().expect("fallback");
        assert_eq!(body_string(resp).await, "<html>home</html>");
    }

    #[tokio::test]
    async fn test_traversal_blocked() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        // Encoded and plain traversal both rejected before resolution
        let mut req = request("/..%2f..%2fetc%2fpasswd");
        assert!(server.serve(&mut req).await.unwrap().is_none());

        let mut req = request("/%2e%2e/%2e%2e/etc/passwd");
        assert!(server.serve(&mut req).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_percent_encoded_name_resolves() {
        let dir = make_dist();
        std::fs::write(dir.path().join("my file.png"), "png-bytes").unwrap();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/my%20file.png");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(resp.headers().get("Content-Type").unwrap(), "image/png");
        assert_eq!(body_string(resp).await, "png-bytes");
    }

    #[tokio::test]
    async fn test_dots_inside_name_kept() {
        let dir = make_dist();
        std::fs::write(dir.path().join("app..js"), "double-dot name").unwrap();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = request("/app..js");
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(body_string(resp).await, "double-dot name");
    }

    #[tokio::test]
    async fn test_head_has_empty_body() {
        let dir = make_dist();
        let server = StaticAssetServer::from_options(&test_options(dir.path()));

        let mut req = Request::builder()
            .method(Method::HEAD)
            .uri("/app.js")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = server.serve(&mut req).await.unwrap().expect("resolved");
        assert_eq!(resp.headers().get("Content-Length").unwrap(), "14");
        assert!(body_string(resp).await.is_empty());
    }
}
