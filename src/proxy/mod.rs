//! Proxy layer module
//!
//! Matches requests against configured proxy rules and forwards them to
//! upstream targets. Plain requests go through a pooled
//! `hyper_util::client::legacy::Client`; upgrade (WebSocket) requests are
//! relayed with a dedicated per-connection handshake and a bidirectional
//! byte copy. Upgrade handling never enters the ordered request pipeline.

use crate::config::ProxyRule;
use crate::error::ServerError;
use crate::http;
use crate::logger;
use http_body_util::{BodyExt, Empty, Full};
use hyper::body::{Body, Bytes};
use hyper::header::{HeaderValue, CONNECTION, HOST, UPGRADE};
use hyper::http::uri::Authority;
use hyper::{Request, Response, StatusCode, Uri};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::net::TcpStream;

/// One validated proxy rule
#[derive(Debug, Clone)]
struct CompiledRule {
    context: String,
    authority: Authority,
    ws: bool,
    path_rewrite: Option<(String, String)>,
    /// Original target string, for log messages
    target: String,
}

/// Proxy engine: rule set plus a pooled upstream client, constructed once
/// at pipeline build
pub struct ProxyLayer {
    rules: Vec<CompiledRule>,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl ProxyLayer {
    /// Compile the configured rules, failing fast on malformed targets
    pub fn new(rules: &[ProxyRule]) -> Result<Self, ServerError> {
        let compiled = rules.iter().map(compile_rule).collect::<Result<_, _>>()?;

        Ok(Self {
            rules: compiled,
            client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
        })
    }

    /// First rule whose context prefixes the request path
    pub fn match_rule(&self, path: &str) -> Option<usize> {
        self.rules.iter().position(|r| path.starts_with(&r.context))
    }

    /// First `ws: true` rule whose context prefixes the upgrade request path
    pub fn match_upgrade(&self, path: &str) -> Option<usize> {
        self.rules
            .iter()
            .position(|r| r.ws && path.starts_with(&r.context))
    }

    /// Forward a plain request to the matched rule's upstream.
    ///
    /// Upstream failures produce a 502 response for this request only; the
    /// listener and other in-flight requests are unaffected.
    pub async fn forward<B>(&self, rule_index: usize, req: Request<B>) -> Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send + 'static,
        B::Error: std::error::Error + Send + Sync + 'static,
    {
        let rule = &self.rules[rule_index];
        let (parts, body) = req.into_parts();

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                logger::log_warning(&format!("failed to read request body: {e}"));
                Bytes::new()
            }
        };

        let uri = match upstream_uri(&parts.uri, rule) {
            Ok(uri) => uri,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("invalid upstream target");
            }
        };

        let mut builder = Request::builder().method(parts.method).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in &parts.headers {
                if name != HOST && !is_hop_by_hop(name) {
                    headers.insert(name.clone(), value.clone());
                }
            }
            if let Ok(host) = HeaderValue::from_str(rule.authority.as_str()) {
                headers.insert(HOST, host);
            }
        }

        let upstream_req = match builder.body(Full::new(body_bytes)) {
            Ok(r) => r,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("failed to build upstream request");
            }
        };

        match self.client.request(upstream_req).await {
            Ok(resp) => buffer_response(resp, &rule.target).await,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                http::build_502_response("upstream request failed")
            }
        }
    }

    /// Relay a protocol-upgrade request to the matched rule's upstream.
    ///
    /// Performs its own HTTP/1.1 handshake against the upstream, mirrors the
    /// 101 handshake back to the client, and then copies bytes in both
    /// directions until either side closes. A non-101 upstream answer is
    /// passed through unchanged.
    pub async fn handle_upgrade<B>(
        &self,
        rule_index: usize,
        mut req: Request<B>,
    ) -> Response<Full<Bytes>>
    where
        B: Body + Send + 'static,
    {
        let rule = self.rules[rule_index].clone();
        let addr = authority_addr(&rule.authority);

        let stream = match TcpStream::connect(&addr).await {
            Ok(s) => s,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("upstream connection failed");
            }
        };

        let (mut sender, conn) = match hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
        {
            Ok(pair) => pair,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("upstream handshake failed");
            }
        };
        let conn_target = rule.target.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                logger::log_upstream_error(&conn_target, &e);
            }
        });

        let uri = match rewritten_path_and_query(&req, &rule) {
            Ok(pq) => pq,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("invalid upstream target");
            }
        };

        let mut builder = Request::builder().method(req.method().clone()).uri(uri);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in req.headers() {
                if name != HOST {
                    headers.insert(name.clone(), value.clone());
                }
            }
            if let Ok(host) = HeaderValue::from_str(rule.authority.as_str()) {
                headers.insert(HOST, host);
            }
        }
        let upstream_req = match builder.body(Empty::<Bytes>::new()) {
            Ok(r) => r,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("failed to build upgrade request");
            }
        };

        let mut upstream_res = match sender.send_request(upstream_req).await {
            Ok(r) => r,
            Err(e) => {
                logger::log_upstream_error(&rule.target, &e);
                return http::build_502_response("upstream upgrade request failed");
            }
        };

        if upstream_res.status() != StatusCode::SWITCHING_PROTOCOLS {
            // Upstream declined the upgrade: answer with its response
            return buffer_response(upstream_res, &rule.target).await;
        }

        logger::log_upgrade(req.uri().path(), &rule.target);

        // Take both upgrade futures before answering the client, then relay
        let upstream_upgrade = hyper::upgrade::on(&mut upstream_res);
        let client_upgrade = hyper::upgrade::on(&mut req);
        let relay_target = rule.target.clone();
        tokio::spawn(async move {
            match tokio::try_join!(client_upgrade, upstream_upgrade) {
                Ok((client_io, upstream_io)) => {
                    let mut client_io = TokioIo::new(client_io);
                    let mut upstream_io = TokioIo::new(upstream_io);
                    if let Err(e) =
                        tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await
                    {
                        logger::log_warning(&format!("upgrade relay closed: {e}"));
                    }
                }
                Err(e) => logger::log_upstream_error(&relay_target, &e),
            }
        });

        let mut builder = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
        if let Some(headers) = builder.headers_mut() {
            for (name, value) in upstream_res.headers() {
                headers.insert(name.clone(), value.clone());
            }
        }
        builder
            .body(Full::new(Bytes::new()))
            .unwrap_or_else(|_| http::build_502_response("failed to build upgrade response"))
    }
}

/// Whether a request negotiates a protocol upgrade: both a `Connection`
/// header carrying the `upgrade` token and an `Upgrade` header are required
pub fn is_upgrade_request<B>(req: &Request<B>) -> bool {
    let connection_upgrade = req
        .headers()
        .get(CONNECTION)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| {
            v.split(',')
                .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
        });
    connection_upgrade && req.headers().contains_key(UPGRADE)
}

/// Hop-by-hop headers are scoped to the client connection and must not be
/// copied onto the upstream one (RFC 9110 §7.6.1)
fn is_hop_by_hop(name: &hyper::header::HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn compile_rule(rule: &ProxyRule) -> Result<CompiledRule, ServerError> {
    if !rule.context.starts_with('/') {
        return Err(ServerError::Config(format!(
            "proxy context must start with '/': {}",
            rule.context
        )));
    }

    let uri: Uri = rule
        .target
        .parse()
        .map_err(|e| ServerError::Config(format!("invalid proxy target '{}': {e}", rule.target)))?;

    match uri.scheme_str() {
        Some("http") => {}
        Some(other) => {
            return Err(ServerError::Config(format!(
                "unsupported proxy target scheme '{other}' for '{}' (only http upstreams)",
                rule.target
            )))
        }
        None => {
            return Err(ServerError::Config(format!(
                "proxy target must include a scheme: {}",
                rule.target
            )))
        }
    }

    let authority = uri.authority().cloned().ok_or_else(|| {
        ServerError::Config(format!("proxy target must include a host: {}", rule.target))
    })?;

    if !uri.path().is_empty() && uri.path() != "/" {
        return Err(ServerError::Config(format!(
            "proxy target must be an origin without a path: {}",
            rule.target
        )));
    }

    Ok(CompiledRule {
        context: rule.context.clone(),
        authority,
        ws: rule.ws,
        path_rewrite: rule
            .path_rewrite
            .as_ref()
            .map(|r| (r.from.clone(), r.to.clone())),
        target: rule.target.clone(),
    })
}

/// Path and query to send upstream, with the rule's prefix rewrite applied
fn rewritten_path_and_query<B>(req: &Request<B>, rule: &CompiledRule) -> Result<Uri, hyper::http::Error> {
    let pq = req
        .uri()
        .path_and_query()
        .map_or_else(|| "/".to_string(), ToString::to_string);

    let pq = match &rule.path_rewrite {
        Some((from, to)) if pq.starts_with(from.as_str()) => pq.replacen(from.as_str(), to, 1),
        _ => pq,
    };

    Uri::builder().path_and_query(pq).build()
}

/// Absolute upstream URI for the pooled client
fn upstream_uri(original: &Uri, rule: &CompiledRule) -> Result<Uri, hyper::http::Error> {
    let pq = {
        let raw = original
            .path_and_query()
            .map_or_else(|| "/".to_string(), ToString::to_string);
        match &rule.path_rewrite {
            Some((from, to)) if raw.starts_with(from.as_str()) => raw.replacen(from.as_str(), to, 1),
            _ => raw,
        }
    };

    Uri::builder()
        .scheme("http")
        .authority(rule.authority.clone())
        .path_and_query(pq)
        .build()
}

fn authority_addr(authority: &Authority) -> String {
    match authority.port_u16() {
        Some(port) => format!("{}:{port}", authority.host()),
        None => format!("{}:80", authority.host()),
    }
}

/// Buffer an upstream response into the pipeline's fixed body type
async fn buffer_response<B>(resp: Response<B>, target: &str) -> Response<Full<Bytes>>
where
    B: Body + Send + 'static,
    B::Error: std::fmt::Display,
{
    let (parts, body) = resp.into_parts();
    match body.collect().await {
        Ok(collected) => Response::from_parts(parts, Full::new(collected.to_bytes())),
        Err(e) => {
            logger::log_upstream_error(target, &e);
            http::build_502_response("upstream body read failed")
        }
    }
}
