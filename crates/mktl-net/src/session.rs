//! Session layer: request/response correlation and publish/subscribe fan-out
//! built on top of [`crate::framing`] and [`crate::transport`].
//!
//! `RequestSession` is the client side of request/response traffic: it sends
//! a request, waits a short window for an ACK (raising
//! [`TransportError::Timeout`] if none arrives), then lets the caller wait
//! separately -- and much longer -- for the REP. `RequestServer` is the
//! server side: it ACKs every inbound request immediately, then dispatches
//! it to a bounded worker pool so one slow handler can't stall the others.
//! `PublishSession`/`SubscribeSession` do the equivalent for broadcast
//! traffic.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mktl_core::Message;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot, Notify, Semaphore};
use tracing::{debug, warn};

use crate::framing::{from_publish_frame, from_request_frame, to_publish_frame, to_request_frame};
use crate::transport::{self, TransportError};

/// How long a client waits for the ACK that confirms a request was received.
pub const ACK_TIMEOUT: Duration = Duration::from_millis(100);
/// How long a client waits for the REP that answers a request, once ACKed.
pub const REP_TIMEOUT: Duration = Duration::from_secs(60);
/// Bounded concurrency for request handler dispatch on the server side.
pub const DEFAULT_WORKERS: usize = 8;

struct PendingEntry {
    ack_notify: Arc<Notify>,
    rep_tx: Mutex<Option<oneshot::Sender<Message>>>,
}

/// A request in flight: the ACK may already have landed, the REP has not.
pub struct PendingRequest {
    pub transid: String,
    rep_rx: oneshot::Receiver<Message>,
}

impl PendingRequest {
    /// Wait for the REP, up to `timeout`. Mirrors the historical default of
    /// a 60 second wait once the ACK has confirmed the peer is alive.
    pub async fn wait(self, timeout: Duration) -> transport::Result<Message> {
        tokio::time::timeout(timeout, self.rep_rx)
            .await
            .map_err(|_| TransportError::Timeout("REP"))?
            .map_err(|_| TransportError::Timeout("REP"))
    }
}

/// Client side of request/response traffic, one per (address, port) peer.
pub struct RequestSession {
    address: String,
    port: u16,
    outbox: mpsc::UnboundedSender<Message>,
    pending: Arc<Mutex<HashMap<String, PendingEntry>>>,
}

impl RequestSession {
    pub async fn connect(address: impl Into<String>, port: u16) -> transport::Result<Self> {
        let address = address.into();
        let framed = transport::connect(&address, port).await?;
        let (mut sink, mut stream) = framed.split();

        let (outbox_tx, mut outbox_rx) = mpsc::unbounded_channel::<Message>();
        let pending: Arc<Mutex<HashMap<String, PendingEntry>>> = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(msg) = outbox_rx.recv().await {
                if sink.send(to_request_frame(&msg)).await.is_err() {
                    break;
                }
            }
        });

        let pending_reader = pending.clone();
        tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                let msg = match from_request_frame(&frame) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable frame");
                        continue;
                    }
                };
                Self::dispatch_incoming(&pending_reader, msg);
            }
        });

        Ok(Self {
            address,
            port,
            outbox: outbox_tx,
            pending,
        })
    }

    fn dispatch_incoming(pending: &Arc<Mutex<HashMap<String, PendingEntry>>>, msg: Message) {
        use mktl_core::MsgType;

        let transid = msg.env.transid.clone();
        let mut table = pending.lock();
        match msg.env.msg_type {
            MsgType::Ack => {
                if let Some(entry) = table.get(&transid) {
                    entry.ack_notify.notify_waiters();
                }
            }
            MsgType::Rep => {
                if let Some(entry) = table.remove(&transid) {
                    if let Some(tx) = entry.rep_tx.lock().take() {
                        let _ = tx.send(msg);
                    }
                }
            }
            _ => debug!(transid, "ignoring unexpected message type on request session"),
        }
    }

    /// Send a request, waiting up to [`ACK_TIMEOUT`] for the server's ACK.
    /// Returns a [`PendingRequest`] the caller can separately wait on for
    /// the REP.
    pub async fn send(&self, msg: Message) -> transport::Result<PendingRequest> {
        let transid = msg.env.transid.clone();
        let ack_notify = Arc::new(Notify::new());
        let (rep_tx, rep_rx) = oneshot::channel();

        self.pending.lock().insert(
            transid.clone(),
            PendingEntry {
                ack_notify: ack_notify.clone(),
                rep_tx: Mutex::new(Some(rep_tx)),
            },
        );

        let notified = ack_notify.notified();
        self.outbox
            .send(msg)
            .map_err(|_| TransportError::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "session closed")))?;

        if tokio::time::timeout(ACK_TIMEOUT, notified).await.is_err() {
            self.pending.lock().remove(&transid);
            return Err(TransportError::Timeout("ACK"));
        }

        Ok(PendingRequest { transid, rep_rx })
    }

    /// Send a request and wait for the full round trip (ACK then REP).
    pub async fn send_and_wait(&self, msg: Message) -> transport::Result<Message> {
        let pending = self.send(msg).await?;
        pending.wait(REP_TIMEOUT).await
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

/// A handler invoked for every inbound request. Returns the REP payload to
/// send back; the server has already sent the ACK by the time this runs.
pub type Handler = Arc<dyn Fn(Message) -> Pin<Box<dyn Future<Output = Message> + Send>> + Send + Sync>;

/// Server side of request/response traffic: one bound listener, a bounded
/// worker pool for handler dispatch.
pub struct RequestServer {
    pub port: u16,
    shutdown: Arc<Notify>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl RequestServer {
    pub async fn bind(
        address: &str,
        port: Option<u16>,
        avoid: &std::collections::HashSet<u16>,
        handler: Handler,
    ) -> transport::Result<Self> {
        let (listener, bound_port) = transport::bind_any(address, port, avoid).await?;
        let shutdown = Arc::new(Notify::new());
        let accept_task = Self::spawn_accept_loop(listener, handler, shutdown.clone());
        Ok(Self {
            port: bound_port,
            shutdown,
            accept_task,
        })
    }

    fn spawn_accept_loop(listener: TcpListener, handler: Handler, shutdown: Arc<Notify>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let semaphore = Arc::new(Semaphore::new(DEFAULT_WORKERS));
            loop {
                tokio::select! {
                    _ = shutdown.notified() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, _addr)) = accepted else { continue };
                        let handler = handler.clone();
                        let semaphore = semaphore.clone();
                        tokio::spawn(Self::serve_connection(stream, handler, semaphore));
                    }
                }
            }
        })
    }

    async fn serve_connection(stream: tokio::net::TcpStream, handler: Handler, semaphore: Arc<Semaphore>) {
        let framed = tokio_util::codec::Framed::new(stream, crate::framing::FrameCodec);
        let (mut sink, mut stream) = framed.split();
        let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(msg) = reply_rx.recv().await {
                if sink.send(to_request_frame(&msg)).await.is_err() {
                    break;
                }
            }
        });

        while let Some(Ok(frame)) = stream.next().await {
            let req = match from_request_frame(&frame) {
                Ok(m) => m,
                Err(e) => {
                    warn!(error = %e, "dropping unparseable request frame");
                    continue;
                }
            };

            let ack = Message::ack_for(&req.env);
            if reply_tx.send(ack).is_err() {
                break;
            }

            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let handler = handler.clone();
            let reply_tx = reply_tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let response = handler(req).await;
                let _ = reply_tx.send(response);
            });
        }

        drop(writer);
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for RequestServer {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.accept_task.abort();
    }
}

/// Server side of publish traffic: every call to [`PublishSession::publish`]
/// fans out to all currently connected subscribers.
pub struct PublishSession {
    pub port: u16,
    tx: broadcast::Sender<Message>,
    shutdown: Arc<Notify>,
    accept_task: tokio::task::JoinHandle<()>,
}

impl PublishSession {
    pub async fn bind(address: &str, port: Option<u16>, avoid: &std::collections::HashSet<u16>) -> transport::Result<Self> {
        let (listener, bound_port) = transport::bind_any(address, port, avoid).await?;
        let (tx, _rx) = broadcast::channel(1024);
        let shutdown = Arc::new(Notify::new());

        let accept_task = {
            let tx = tx.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = shutdown.notified() => break,
                        accepted = listener.accept() => {
                            let Ok((stream, _addr)) = accepted else { continue };
                            let mut rx = tx.subscribe();
                            tokio::spawn(async move {
                                let framed = tokio_util::codec::Framed::new(stream, crate::framing::FrameCodec);
                                let (mut sink, _stream) = framed.split();
                                while let Ok(msg) = rx.recv().await {
                                    if sink.send(to_publish_frame(&msg)).await.is_err() {
                                        break;
                                    }
                                }
                            });
                        }
                    }
                }
            })
        };

        Ok(Self {
            port: bound_port,
            tx,
            shutdown,
            accept_task,
        })
    }

    pub fn publish(&self, msg: Message) {
        let _ = self.tx.send(msg);
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for PublishSession {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
        self.accept_task.abort();
    }
}

/// Client side of publish traffic: connects to a [`PublishSession`] and
/// filters incoming broadcasts down to the requested topic prefixes.
pub struct SubscribeSession {
    rx: mpsc::UnboundedReceiver<Message>,
    read_task: tokio::task::JoinHandle<()>,
}

impl SubscribeSession {
    pub async fn connect(address: &str, port: u16, topics: Vec<String>) -> transport::Result<Self> {
        let framed = transport::connect(address, port).await?;
        let (_sink, mut stream) = framed.split();
        let (tx, rx) = mpsc::unbounded_channel();

        let read_task = tokio::spawn(async move {
            while let Some(Ok(frame)) = stream.next().await {
                let msg = match from_publish_frame(&frame) {
                    Ok(m) => m,
                    Err(e) => {
                        warn!(error = %e, "dropping unparseable publish frame");
                        continue;
                    }
                };
                if topics.is_empty() || topics.iter().any(|t| msg.env.key.starts_with(t.as_str())) {
                    if tx.send(msg).is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self { rx, read_task })
    }

    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for SubscribeSession {
    fn drop(&mut self) {
        self.read_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mktl_core::{MsgType, Payload, Value};
    use std::collections::HashSet;

    #[tokio::test]
    async fn request_round_trip_through_server() {
        let handler: Handler = Arc::new(|req| {
            Box::pin(async move { Message::reply_for(&req.env, Payload::new(Value::Int(99), 0.0)) })
        });

        let server = RequestServer::bind("127.0.0.1", None, &HashSet::new(), handler).await.unwrap();
        let client = RequestSession::connect("127.0.0.1", server.port).await.unwrap();

        let req = Message::request(MsgType::Get, "store.item", Payload::new(Value::Null, 0.0));
        let rep = client.send_and_wait(req).await.unwrap();

        assert_eq!(rep.env.msg_type, MsgType::Rep);
        assert_eq!(rep.env.payload.value, Value::Int(99));
    }

    #[tokio::test]
    async fn publish_fans_out_to_subscribers() {
        let server = PublishSession::bind("127.0.0.1", None, &HashSet::new()).await.unwrap();
        let mut sub = SubscribeSession::connect("127.0.0.1", server.port, vec!["store.".to_string()])
            .await
            .unwrap();

        // give the subscriber's read task a beat to register before we publish
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.publish(Message::broadcast("store.item", Payload::new(Value::Int(1), 0.0)));

        let received = tokio::time::timeout(Duration::from_secs(1), sub.recv()).await.unwrap().unwrap();
        assert_eq!(received.env.key, "store.item");
    }
}
