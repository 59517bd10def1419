//! Server bootstrap
//!
//! Binds the listener, builds the pipeline once, and runs the accept loop.
//! Protocol upgrades never enter the stage chain: they are detected at the
//! connection service and relayed through the proxy's upgrade path.

mod listener;
mod tls;

pub use listener::create_reusable_listener;

use crate::config::ServerOptions;
use crate::error::ServerError;
use crate::logger;
use crate::pipeline::{self, PipelineState};
use crate::proxy;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_rustls::TlsAcceptor;

/// A running server: the bound port (after any fallback), the printable
/// URLs, and a handle that stops the listener when closed
pub struct BoundServerHandle {
    port: u16,
    urls: Vec<String>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl BoundServerHandle {
    pub const fn port(&self) -> u16 {
        self.port
    }

    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    /// Stop accepting connections and wait for the accept loop to exit.
    /// In-flight requests on already-accepted connections run to completion.
    pub async fn close(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            logger::log_error(&format!("accept loop did not exit cleanly: {e}"));
        }
    }
}

/// Bring the server up: validate options into a pipeline, bind the socket
/// (with port fallback unless strict), and start accepting.
///
/// Returns only after the socket is bound, so the reported port is the one
/// actually listening.
pub async fn start_server(options: ServerOptions) -> Result<BoundServerHandle, ServerError> {
    let pipeline = Arc::new(pipeline::build(&options)?);

    let acceptor = match &options.https {
        Some(tls_options) => Some(tls::build_acceptor(tls_options)?),
        None => None,
    };

    let addr = options.socket_addr()?;
    let tcp_listener = listener::bind_with_fallback(addr, options.strict_port)?;
    let local_addr = tcp_listener.local_addr()?;

    let urls = listen_urls(&options.host, local_addr.port(), options.scheme());
    if options.print_urls {
        logger::log_server_urls(&urls);
    }

    let shutdown = Arc::new(Notify::new());
    let task = tokio::spawn(accept_loop(
        tcp_listener,
        pipeline,
        acceptor,
        Arc::clone(&shutdown),
    ));

    Ok(BoundServerHandle {
        port: local_addr.port(),
        urls,
        shutdown,
        task,
    })
}

async fn accept_loop(
    listener: TcpListener,
    pipeline: Arc<PipelineState>,
    acceptor: Option<TlsAcceptor>,
    shutdown: Arc<Notify>,
) {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer_addr)) => {
                        let pipeline = Arc::clone(&pipeline);
                        let acceptor = acceptor.clone();
                        tokio::spawn(async move {
                            match acceptor {
                                Some(acceptor) => match acceptor.accept(stream).await {
                                    Ok(tls_stream) => {
                                        serve_connection(tls_stream, peer_addr, pipeline).await;
                                    }
                                    Err(e) => logger::log_connection_error(&e),
                                },
                                None => serve_connection(stream, peer_addr, pipeline).await,
                            }
                        });
                    }
                    Err(e) => logger::log_connection_error(&e),
                }
            }
            () = shutdown.notified() => {
                logger::log_shutdown();
                break;
            }
        }
    }
}

async fn serve_connection<I>(stream: I, peer_addr: SocketAddr, pipeline: Arc<PipelineState>)
where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let service = service_fn(move |req: Request<Incoming>| {
        let pipeline = Arc::clone(&pipeline);
        async move { Ok::<_, Infallible>(handle_request(req, peer_addr, &pipeline).await) }
    });

    // with_upgrades keeps the connection alive past a 101 so the relayed
    // byte streams can run on it
    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        logger::log_connection_error(&e);
    }
}

async fn handle_request(
    req: Request<Incoming>,
    peer_addr: SocketAddr,
    pipeline: &PipelineState,
) -> Response<Full<Bytes>> {
    if let Some(proxy) = pipeline.proxy() {
        if proxy::is_upgrade_request(&req) {
            if let Some(rule) = proxy.match_upgrade(req.uri().path()) {
                return proxy.handle_upgrade(rule, req).await;
            }
        }
    }
    pipeline.dispatch(req, peer_addr).await
}

/// Printable URLs for the bound listener. A wildcard bind is reported as
/// localhost since the wildcard itself is not a usable browser target.
fn listen_urls(host: &str, port: u16, scheme: &str) -> Vec<String> {
    if host == "0.0.0.0" || host == "::" {
        vec![
            format!("{scheme}://localhost:{port}/"),
            format!("{scheme}://127.0.0.1:{port}/"),
        ]
    } else {
        vec![format!("{scheme}://{host}:{port}/")]
    }
}
