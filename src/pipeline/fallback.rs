//! Fallback stages
//!
//! `HistoryFallbackStage` rewrites unmatched navigational requests to the
//! configured SPA document and forwards into a second static-serving pass.
//! `FaviconFallbackStage` terminates unmatched favicon requests with an
//! empty success instead of letting them fall through to a 404.

use crate::config::FallbackOptions;
use crate::error::ServerError;
use crate::http;
use crate::logger;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::header::ACCEPT;
use hyper::{Method, Request, Response};
use regex::Regex;

/// SPA history fallback: rewrite engine built once from validated options
#[derive(Debug)]
pub struct HistoryFallbackStage {
    index: String,
    rewrites: Vec<(Regex, String)>,
    disable_dot_rule: bool,
}

impl HistoryFallbackStage {
    /// Compile the fallback configuration, failing fast on an empty index
    /// or an invalid rewrite pattern
    pub fn new(options: &FallbackOptions) -> Result<Self, ServerError> {
        if !options.index.starts_with('/') {
            return Err(ServerError::Config(format!(
                "history fallback index must start with '/': {}",
                options.index
            )));
        }

        let rewrites = options
            .rewrites
            .iter()
            .map(|rule| {
                let re = Regex::new(&rule.from).map_err(|e| {
                    ServerError::Config(format!(
                        "invalid history fallback rewrite '{}': {e}",
                        rule.from
                    ))
                })?;
                Ok((re, rule.to.clone()))
            })
            .collect::<Result<Vec<_>, ServerError>>()?;

        Ok(Self {
            index: options.index.clone(),
            rewrites,
            disable_dot_rule: options.disable_dot_rule,
        })
    }

    /// The rewritten target for a navigational request, or `None` when the
    /// request should pass through untouched
    pub fn rewrite_target<B>(&self, req: &Request<B>) -> Option<String> {
        if req.method() != Method::GET {
            return None;
        }
        let accept = req.headers().get(ACCEPT)?.to_str().ok()?;
        if !prefers_html(accept) {
            return None;
        }

        let path = req.uri().path();

        // Explicit rewrites are evaluated before the dot rule and the
        // default index rewrite
        for (re, to) in &self.rewrites {
            if re.is_match(path) {
                return Some(to.clone());
            }
        }

        if !self.disable_dot_rule && last_segment_has_dot(path) {
            return None;
        }

        Some(self.index.clone())
    }

    /// Rewrite the request target in place. Returns whether a rewrite
    /// happened (and the second static pass should resolve it).
    pub fn apply<B>(&self, req: &mut Request<B>) -> bool {
        let Some(target) = self.rewrite_target(req) else {
            return false;
        };
        match target.parse() {
            Ok(uri) => {
                *req.uri_mut() = uri;
                true
            }
            Err(e) => {
                logger::log_warning(&format!("unusable fallback target '{target}': {e}"));
                false
            }
        }
    }
}

/// Terminal favicon stage: resolves ignored favicon paths that nothing else
/// handled; everything else forwards to the host's default not-found path
#[derive(Debug)]
pub struct FaviconFallbackStage {
    paths: Vec<String>,
}

impl FaviconFallbackStage {
    pub const fn new(paths: Vec<String>) -> Self {
        Self { paths }
    }

    pub fn handle<B>(&self, req: &Request<B>) -> Option<Response<Full<Bytes>>> {
        self.paths
            .iter()
            .any(|p| p == req.uri().path())
            .then(http::build_favicon_fallback_response)
    }
}

/// Navigational heuristic: the client must prefer HTML. An explicit JSON
/// preference is never navigational.
fn prefers_html(accept: &str) -> bool {
    if accept.starts_with("application/json") {
        return false;
    }
    accept.contains("text/html")
        || accept.contains("application/xhtml+xml")
        || accept.contains("*/*")
}

/// Dot rule: a final path segment containing a dot looks like a file
/// request and should 404 rather than serve the SPA document
fn last_segment_has_dot(path: &str) -> bool {
    path.rsplit('/').next().is_some_and(|seg| seg.contains('.'))
}
