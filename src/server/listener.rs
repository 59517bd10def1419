//! Listener setup

use crate::error::ServerError;
use crate::logger;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use tokio::net::TcpListener;

/// How many successive ports to probe when the preferred one is taken
const PORT_PROBE_LIMIT: u16 = 100;

/// Bind the serving socket.
///
/// With `strict_port` the preferred port is the only acceptable one and a
/// conflict is a startup error. Otherwise the next free port is probed,
/// vite-style, and the caller reads the actual port back from the listener.
pub fn bind_with_fallback(
    addr: SocketAddr,
    strict_port: bool,
) -> Result<TcpListener, ServerError> {
    match create_reusable_listener(addr) {
        Ok(listener) => return Ok(listener),
        Err(e) if e.kind() == std::io::ErrorKind::AddrInUse && !strict_port && addr.port() != 0 => {
            logger::log_warning(&format!("port {} is in use, trying another one", addr.port()));
        }
        Err(source) => return Err(ServerError::Bind { addr, source }),
    }

    let mut candidate = addr;
    for offset in 1..=PORT_PROBE_LIMIT {
        let Some(port) = addr.port().checked_add(offset) else {
            break;
        };
        candidate.set_port(port);
        match create_reusable_listener(candidate) {
            Ok(listener) => return Ok(listener),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {}
            Err(source) => return Err(ServerError::Bind { addr: candidate, source }),
        }
    }

    Err(ServerError::Bind {
        addr,
        source: std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!("no free port within {PORT_PROBE_LIMIT} of {}", addr.port()),
        ),
    })
}

/// Create a TCP listener with SO_REUSEPORT and SO_REUSEADDR so a replacement
/// process can bind while the old one drains
pub fn create_reusable_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_port(true)?;
    socket.set_reuse_address(true)?;

    // Non-blocking mode is required before handing the fd to tokio
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}
