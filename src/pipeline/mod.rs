//! Middleware pipeline module
//!
//! Assembles the fixed, ordered stage chain from the server options and
//! exposes a single dispatch entry point. Stages do not call a continuation;
//! each returns `Handled` or `Forward` and the driver decides whether to
//! advance, which makes double resolution structurally unrepresentable.

pub mod compress;
pub mod fallback;

use crate::config::ServerOptions;
use crate::error::ServerError;
use crate::http;
use crate::logger::{self, AccessLogEntry};
use crate::proxy::ProxyLayer;
use crate::static_assets::StaticAssetServer;
use compress::{CompressionConfig, CompressionStage};
use fallback::{FaviconFallbackStage, HistoryFallbackStage};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderName, HeaderValue, ACCEPT_ENCODING, USER_AGENT};
use hyper::{Request, Response, Version};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

/// Result of one stage invocation: either the stage fully resolved the
/// response, or it hands the request back for the next stage
pub enum StageOutcome<B> {
    Handled(Response<Full<Bytes>>),
    Forward(Request<B>),
}

/// One unit of the request pipeline
pub enum Stage {
    Proxy(Arc<ProxyLayer>),
    Static(Arc<StaticAssetServer>),
    HistoryFallback(Arc<HistoryFallbackStage>),
    FaviconFallback(FaviconFallbackStage),
}

impl Stage {
    async fn handle<B>(&self, mut req: Request<B>) -> io::Result<StageOutcome<B>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        match self {
            Self::Proxy(proxy) => match proxy.match_rule(req.uri().path()) {
                Some(idx) => Ok(StageOutcome::Handled(proxy.forward(idx, req).await)),
                None => Ok(StageOutcome::Forward(req)),
            },
            Self::Static(server) => Ok(match server.serve(&mut req).await? {
                Some(resp) => StageOutcome::Handled(resp),
                None => StageOutcome::Forward(req),
            }),
            Self::HistoryFallback(stage) => {
                // Rewrite in place; the re-registered static pass after this
                // stage resolves the new target (bounded to one retry)
                stage.apply(&mut req);
                Ok(StageOutcome::Forward(req))
            }
            Self::FaviconFallback(stage) => Ok(match stage.handle(&req) {
                Some(resp) => StageOutcome::Handled(resp),
                None => StageOutcome::Forward(req),
            }),
        }
    }
}

/// Ordered stage chain plus cross-cutting concerns, built once from
/// `ServerOptions` and never mutated afterwards
pub struct PipelineState {
    stages: Vec<Stage>,
    compression: Option<CompressionStage>,
    injected_headers: Vec<(HeaderName, HeaderValue)>,
    proxy: Option<Arc<ProxyLayer>>,
    access_log: bool,
    access_log_format: String,
}

/// Build the pipeline. Stage order, front to back, is fixed by design:
/// proxy (bypasses local serving) → static → history fallback → static
/// (second pass) → favicon terminal. Compression and header injection wrap
/// every resolved response; request logging observes only.
pub fn build(options: &ServerOptions) -> Result<PipelineState, ServerError> {
    let injected_headers = parse_headers(&options.headers)?;

    let proxy = if options.proxy.is_empty() {
        None
    } else {
        Some(Arc::new(ProxyLayer::new(&options.proxy)?))
    };

    let statics = Arc::new(StaticAssetServer::from_options(options));

    let mut stages = Vec::new();
    if let Some(proxy) = &proxy {
        stages.push(Stage::Proxy(Arc::clone(proxy)));
    }
    stages.push(Stage::Static(Arc::clone(&statics)));
    if let Some(fallback) = &options.history_fallback {
        stages.push(Stage::HistoryFallback(Arc::new(HistoryFallbackStage::new(
            fallback,
        )?)));
        // Fallback rewrites must be resolved by the same static server
        // logic, so a second pass is registered rather than looping
        stages.push(Stage::Static(statics));
    }
    stages.push(Stage::FaviconFallback(FaviconFallbackStage::new(
        options.ignores.clone(),
    )));

    let compression = options
        .compress
        .then(|| CompressionStage::new(CompressionConfig::default()));

    Ok(PipelineState {
        stages,
        compression,
        injected_headers,
        proxy,
        access_log: options.access_log,
        access_log_format: options.access_log_format.clone(),
    })
}

impl PipelineState {
    /// The proxy engine shared with the listener's upgrade entry point
    pub const fn proxy(&self) -> Option<&Arc<ProxyLayer>> {
        self.proxy.as_ref()
    }

    /// Dispatch one request through the stage chain.
    ///
    /// Exactly one stage resolves the request; exhaustion of the chain
    /// produces the default not-found response. Stage I/O faults degrade to
    /// a 500 for this request only.
    pub async fn dispatch<B>(&self, req: Request<B>, remote_addr: SocketAddr) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let started = Instant::now();
        let mut entry = self.access_log.then(|| access_entry(&req, remote_addr));
        let accept_encoding = req
            .headers()
            .get(ACCEPT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .map(ToString::to_string);

        let mut current = req;
        let mut resolved = None;
        for stage in &self.stages {
            match stage.handle(current).await {
                Ok(StageOutcome::Handled(resp)) => {
                    resolved = Some(resp);
                    break;
                }
                Ok(StageOutcome::Forward(req)) => current = req,
                Err(e) => {
                    logger::log_error(&format!("stage failed: {e}"));
                    resolved = Some(http::build_500_response());
                    break;
                }
            }
        }
        let mut response = resolved.unwrap_or_else(http::build_404_response);

        // Injected headers never clobber what a stage set
        for (name, value) in &self.injected_headers {
            response
                .headers_mut()
                .entry(name.clone())
                .or_insert_with(|| value.clone());
        }

        let (parts, body) = response.into_parts();
        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => match e {},
        };
        let mut response = Response::from_parts(parts, Full::new(body_bytes.clone()));

        if let Some(compression) = &self.compression {
            response = compression.encode(response, accept_encoding.as_deref(), &body_bytes);
        }

        if let Some(entry) = entry.as_mut() {
            entry.status = response.status().as_u16();
            entry.body_bytes = body_bytes.len();
            entry.request_time_us =
                u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
            logger::log_access(entry, &self.access_log_format);
        }

        response
    }
}

fn access_entry<B>(req: &Request<B>, remote_addr: SocketAddr) -> AccessLogEntry {
    let mut entry = AccessLogEntry::new(
        remote_addr.ip().to_string(),
        req.method().to_string(),
        req.uri().path().to_string(),
    );
    entry.query = req.uri().query().map(ToString::to_string);
    entry.http_version = match req.version() {
        Version::HTTP_10 => "1.0".to_string(),
        Version::HTTP_2 => "2".to_string(),
        _ => "1.1".to_string(),
    };
    entry.user_agent = req
        .headers()
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);
    entry
}

/// Parse the configured header map, failing fast on invalid names/values
fn parse_headers(
    headers: &std::collections::HashMap<String, String>,
) -> Result<Vec<(HeaderName, HeaderValue)>, ServerError> {
    headers
        .iter()
        .map(|(name, value)| {
            let name = name
                .parse::<HeaderName>()
                .map_err(|e| ServerError::Config(format!("invalid header name '{name}': {e}")))?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                ServerError::Config(format!("invalid value for header '{name}': {e}"))
            })?;
            Ok((name, value))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FallbackOptions, ProxyRule};
    use std::collections::HashMap;
    use std::path::Path;
    use tempfile::TempDir;

    fn options(root: &Path) -> ServerOptions {
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

    fn remote() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn get(path: &str) -> Request<Full<Bytes>> {
        Request::builder()
            .uri(path)
            .header("accept", "text/html")
            .body(Full::new(Bytes::new()))
            .unwrap()
    }

    async fn body_string(resp: Response<Full<Bytes>>) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[test]
    fn test_stage_order() {
        let dir = make_dist();
        let mut opts = options(dir.path());
        opts.proxy = vec![ProxyRule {
            context: "/api".to_string(),
            target: "http://127.0.0.1:9".to_string(),
            ws: false,
            path_rewrite: None,
        }];
        opts.history_fallback = Some(FallbackOptions::default());

        let state = build(&opts).unwrap();
        let kinds: Vec<&str> = state
            .stages
            .iter()
            .map(|s| match s {
                Stage::Proxy(_) => "proxy",
                Stage::Static(_) => "static",
                Stage::HistoryFallback(_) => "fallback",
                Stage::FaviconFallback(_) => "favicon",
            })
            .collect();
        assert_eq!(
            kinds,
            vec!["proxy", "static", "fallback", "static", "favicon"]
        );
    }

    #[test]
    fn test_minimal_pipeline() {
        let dir = make_dist();
        let state = build(&options(dir.path())).unwrap();
        assert_eq!(state.stages.len(), 2); // static + favicon terminal
        assert!(state.proxy().is_none());
    }

    #[tokio::test]
    async fn test_dispatch_serves_asset() {
        let dir = make_dist();
        let state = build(&options(dir.path())).unwrap();
        let resp = state.dispatch(get("/app.js"), remote()).await;
        assert_eq!(resp.status(), 200);
        assert_eq!(body_string(resp).await, "console.log(1)");
    }

    #[tokio::test]
    async fn test_dispatch_unmatched_is_404() {
        let dir = make_dist();
        let state = build(&options(dir.path())).unwrap();
        let resp = state.dispatch(get("/missing.css"), remote()).await;
        assert_eq!(resp.status(), 404);
    }

    #[tokio::test]
    async fn test_proxied_path_never_reaches_static() {
        let dir = make_dist();
        // An asset exists at /api/app.js on disk, but the proxy rule owns
        // the /api prefix; with the upstream down the answer must be 502,
        // never the file
        std::fs::create_dir(dir.path().join("api")).unwrap();
        std::fs::write(dir.path().join("api/app.js"), "nope").unwrap();

        let mut opts = options(dir.path());
        opts.proxy = vec![ProxyRule {
            context: "/api".to_string(),
            target: "http://127.0.0.1:9".to_string(),
            ws: false,
            path_rewrite: None,
        }];
        let state = build(&opts).unwrap();

        let resp = state.dispatch(get("/api/app.js"), remote()).await;
        assert_eq!(resp.status(), 502);
    }

    #[tokio::test]
    async fn test_history_fallback_equals_direct_index() {
        let dir = make_dist();
        let mut opts = options(dir.path());
        opts.history_fallback = Some(FallbackOptions::default());
        let state = build(&opts).unwrap();

        let fallback = state.dispatch(get("/client/route"), remote()).await;
        let direct = state.dispatch(get("/index.html"), remote()).await;

        assert_eq!(fallback.status(), direct.status());
        assert_eq!(
            fallback.headers().get("ETag"),
            direct.headers().get("ETag")
        );
        assert_eq!(body_string(fallback).await, body_string(direct).await);
    }

    #[tokio::test]
    async fn test_favicon_terminal_success() {
        let dir = make_dist();
        let state = build(&options(dir.path())).unwrap();
        let resp = state.dispatch(get("/favicon.ico"), remote()).await;
        assert_eq!(resp.status(), 204);
    }

    #[tokio::test]
    async fn test_injected_headers_do_not_clobber() {
        let dir = make_dist();
        let mut opts = options(dir.path());
        opts.headers.insert(
            "X-Served-By".to_string(),
            "prodserve".to_string(),
        );
        opts.headers
            .insert("Content-Type".to_string(), "text/bogus".to_string());
        let state = build(&opts).unwrap();

        let resp = state.dispatch(get("/app.js"), remote()).await;
        assert_eq!(resp.headers().get("X-Served-By").unwrap(), "prodserve");
        // The static stage's Content-Type wins
        assert_eq!(
            resp.headers().get("Content-Type").unwrap(),
            "application/javascript"
        );

        let resp = state.dispatch(get("/missing"), remote()).await;
        assert_eq!(resp.headers().get("X-Served-By").unwrap(), "prodserve");
    }

    #[tokio::test]
    async fn test_compression_end_to_end() {
        let dir = make_dist();
        std::fs::write(
            dir.path().join("big.html"),
            "<p>hello</p>".repeat(500),
        )
        .unwrap();
        let mut opts = options(dir.path());
        opts.compress = true;
        let state = build(&opts).unwrap();

        let capable = Request::builder()
            .uri("/big.html")
            .header("accept-encoding", "gzip, br")
            .body(Full::new(Bytes::new()))
            .unwrap();
        let resp = state.dispatch(capable, remote()).await;
        assert_eq!(resp.headers().get("Content-Encoding").unwrap(), "gzip");

        let plain = state.dispatch(get("/big.html"), remote()).await;
        assert!(!plain.headers().contains_key("Content-Encoding"));
    }

    #[test]
    fn test_invalid_header_config_fails_fast() {
        let dir = make_dist();
        let mut opts = options(dir.path());
        opts.headers
            .insert("bad header name".to_string(), "x".to_string());
        assert!(build(&opts).is_err());
    }

    #[test]
    fn test_malformed_proxy_fails_fast() {
        let dir = make_dist();
        let mut opts = options(dir.path());
        opts.proxy = vec![ProxyRule {
            context: "/api".to_string(),
            target: "not a url".to_string(),
            ws: false,
            path_rewrite: None,
        }];
        assert!(build(&opts).is_err());
    }
}
