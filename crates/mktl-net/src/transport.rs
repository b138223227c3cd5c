//! Transport port: binding, connecting, and moving framed messages over a
//! byte stream.
//!
//! The historical implementation binds a ZeroMQ ROUTER socket for
//! request/response traffic and a PUB socket for broadcast traffic, scanning
//! a fixed port range (10079-13679) when no specific port is requested. The
//! concrete socket library is out of scope here -- this module reproduces
//! the same port-scanning contract and connection-queue discipline over
//! plain `tokio::net::TcpListener`/`TcpStream`.

use std::collections::HashSet;
use std::net::SocketAddr;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use crate::framing::FrameCodec;

/// Port range scanned by [`bind_any`] when no specific port is requested.
/// Matches the historical ROUTER socket's `minimum_port`/`maximum_port`.
pub const MINIMUM_PORT: u16 = 10079;
pub const MAXIMUM_PORT: u16 = 13679;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no ports available in range {min}:{max}")]
    PortExhausted { min: u16, max: u16 },

    #[error("port already in use: {0}")]
    PortInUse(u16),

    #[error("connection to {0} failed: {1}")]
    Connection(SocketAddr, std::io::Error),

    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Bind a listener to `address` on a specific port, or scan
/// `MINIMUM_PORT..=MAXIMUM_PORT` (skipping anything in `avoid`) when `port`
/// is `None`. Returns the bound listener and the port it landed on.
pub async fn bind_any(address: &str, port: Option<u16>, avoid: &HashSet<u16>) -> Result<(TcpListener, u16)> {
    if let Some(p) = port {
        let listener = TcpListener::bind((address, p))
            .await
            .map_err(|_| TransportError::PortInUse(p))?;
        return Ok((listener, p));
    }

    for candidate in MINIMUM_PORT..=MAXIMUM_PORT {
        if avoid.contains(&candidate) {
            continue;
        }
        if let Ok(listener) = TcpListener::bind((address, candidate)).await {
            return Ok((listener, candidate));
        }
    }

    // Every unavoided port was taken. Retry the avoided ones -- they may
    // since have been released by whatever previously held them.
    for candidate in avoid {
        if let Ok(listener) = TcpListener::bind((address, *candidate)).await {
            return Ok((listener, *candidate));
        }
    }

    Err(TransportError::PortExhausted {
        min: MINIMUM_PORT,
        max: MAXIMUM_PORT,
    })
}

/// Connect to a peer and wrap the stream in the shared frame codec.
pub async fn connect(address: &str, port: u16) -> Result<Framed<TcpStream, FrameCodec>> {
    let addr: SocketAddr = format!("{address}:{port}")
        .parse()
        .map_err(|_| TransportError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, "bad address")))?;
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::Connection(addr, e))?;
    Ok(Framed::new(stream, FrameCodec))
}

/// A snapshot of the local ports a daemon has bound, persisted so a restart
/// can try to reclaim the same addresses (see `mktl-config::port`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundPorts {
    pub rep: u16,
    pub pub_: u16,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_any_picks_a_port_in_range() {
        let (listener, port) = bind_any("127.0.0.1", None, &HashSet::new()).await.unwrap();
        assert!((MINIMUM_PORT..=MAXIMUM_PORT).contains(&port));
        drop(listener);
    }

    #[tokio::test]
    async fn bind_any_honors_avoid_set() {
        let (first, port) = bind_any("127.0.0.1", None, &HashSet::new()).await.unwrap();
        let mut avoid = HashSet::new();
        avoid.insert(port);
        let (second, other_port) = bind_any("127.0.0.1", None, &avoid).await.unwrap();
        assert_ne!(port, other_port);
        drop(first);
        drop(second);
    }

    #[tokio::test]
    async fn bind_any_specific_port_conflict_reports_in_use() {
        let (_listener, port) = bind_any("127.0.0.1", None, &HashSet::new()).await.unwrap();
        let err = bind_any("127.0.0.1", Some(port), &HashSet::new()).await.unwrap_err();
        matches!(err, TransportError::PortInUse(_));
    }
}
