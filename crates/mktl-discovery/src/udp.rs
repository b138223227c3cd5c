//! Peer-to-peer discovery over UDP broadcast.
//!
//! A server listens for a literal `"I heard it"` datagram and answers with
//! `"on the X:<rep_port>"`; the requesting host is taken from the UDP
//! envelope itself, never from the payload. Repeat callers from the same
//! address within a second are ignored so a retrying client doesn't get a
//! flood of duplicate answers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Notify;
use tracing::warn;

pub const CALL: &[u8] = b"I heard it";
pub const RESPONSE_PREFIX: &[u8] = b"on the X:";

/// Well-known UDP port discovery calls are broadcast to and servers listen
/// on, distinct from the per-daemon REP/PUB port range.
pub const DEFAULT_DISCOVERY_PORT: u16 = 10080;

const DEBOUNCE: Duration = Duration::from_secs(1);
const SEARCH_WINDOW: Duration = Duration::from_secs(1);

fn trim_ascii_whitespace(data: &[u8]) -> &[u8] {
    let start = data.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(data.len());
    let end = data.iter().rposition(|b| !b.is_ascii_whitespace()).map(|i| i + 1).unwrap_or(0);
    if start >= end {
        &[]
    } else {
        &data[start..end]
    }
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DiscoveryError>;

/// Answers discovery calls on behalf of a daemon's request port.
pub struct P2pServer {
    pub rep_port: u16,
    shutdown: Arc<Notify>,
    task: tokio::task::JoinHandle<()>,
}

impl P2pServer {
    pub async fn start(rep_port: u16, listen_port: u16) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", listen_port)).await?;
        socket.set_broadcast(true)?;

        let shutdown = Arc::new(Notify::new());
        let task = {
            let shutdown = shutdown.clone();
            tokio::spawn(Self::run(socket, rep_port, shutdown))
        };

        Ok(Self { rep_port, shutdown, task })
    }

    async fn run(socket: UdpSocket, rep_port: u16, shutdown: Arc<Notify>) {
        let response = [RESPONSE_PREFIX, rep_port.to_string().as_bytes()].concat();
        let mut seen: HashMap<SocketAddr, Instant> = HashMap::new();
        let mut buf = [0u8; 4096];

        loop {
            tokio::select! {
                _ = shutdown.notified() => break,
                received = socket.recv_from(&mut buf) => {
                    let (len, addr) = match received {
                        Ok(v) => v,
                        Err(e) => { warn!(error = %e, "discovery recv failed"); break; }
                    };

                    let now = Instant::now();
                    if let Some(last) = seen.get(&addr) {
                        if now.duration_since(*last) < DEBOUNCE {
                            continue;
                        }
                    }

                    let trimmed = trim_ascii_whitespace(&buf[..len]);
                    if trimmed == CALL {
                        if socket.send_to(&response, addr).await.is_ok() {
                            seen.insert(addr, now);
                        }
                    }
                }
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for P2pServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.task.abort();
    }
}

/// Broadcasts a discovery call and collects `(host, rep_port)` answers for
/// one second.
pub async fn search(port: u16, wait: bool) -> Result<Vec<(String, u16)>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.set_broadcast(true)?;
    socket.send_to(CALL, (std::net::Ipv4Addr::new(255, 255, 255, 255), port)).await?;

    collect_responses(&socket, wait).await
}

/// Send the same discovery call directly to a single known host, rather
/// than broadcasting. Used by registry-mode discovery for cached peers.
pub async fn probe(host: &str, port: u16, wait: bool) -> Result<Vec<(String, u16)>> {
    let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
    socket.send_to(CALL, (host, port)).await?;
    collect_responses(&socket, wait).await
}

async fn collect_responses(socket: &UdpSocket, wait: bool) -> Result<Vec<(String, u16)>> {
    let mut found = Vec::new();
    let deadline = Instant::now() + SEARCH_WINDOW;
    let mut buf = [0u8; 4096];

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }

        match tokio::time::timeout(remaining, socket.recv_from(&mut buf)).await {
            Ok(Ok((len, addr))) => {
                if let Some(rest) = buf[..len].strip_prefix(RESPONSE_PREFIX) {
                    if let Ok(port) = std::str::from_utf8(rest).unwrap_or_default().parse::<u16>() {
                        found.push((addr.ip().to_string(), port));
                        if !wait {
                            break;
                        }
                    }
                }
            }
            _ => break,
        }
    }

    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn server_response_framing_matches_protocol_literal() {
        let server = P2pServer::start(10080, 0).await.unwrap();
        assert!(!server.task.is_finished());

        let response = [RESPONSE_PREFIX, 10080_u16.to_string().as_bytes()].concat();
        assert_eq!(response, b"on the X:10080");
        server.stop();
    }

    #[tokio::test]
    async fn search_with_no_peers_times_out_empty() {
        let found = search(58123, true).await.unwrap();
        assert!(found.is_empty());
    }
}
