//! Backend connection management.
//!
//! Each backend owns a single upstream TCP socket driven by three tasks:
//! a connection driver (readiness probing, dialing, the writer loop and
//! reconnects), a reader per live connection, and a pending-reply sweeper.
//! Requests enter through a bounded send queue; the writer registers the
//! pending reply **before** writing so a fast response can never race ahead
//! of its registration.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use binrelay_common::wire::{Message, MessageBuffer};
use binrelay_common::{RelayError, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, warn};

use crate::pending::{PendingReplies, ReplySender};
use crate::readiness::Readiness;

/// Cadence of readiness probing before the first dial.
const PROBE_INTERVAL: Duration = Duration::from_secs(2);
/// Delay between failed TCP dials.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Cadence of the pending-reply timeout sweep.
const SWEEP_INTERVAL: Duration = Duration::from_millis(10);
/// Bound of the per-backend send queue.
const SEND_QUEUE_CAPACITY: usize = 1000;
/// Read buffer size for the response stream.
const READ_CHUNK: usize = 4096;

/// Anything a request can be dispatched to: a raw [`Backend`] or a
/// [`crate::CircuitBreaker`] composed around one.
#[async_trait]
pub trait Endpoint: Send + Sync {
    fn addr(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// Sends one request and resolves with its response, a synthesised
    /// failure, or a timeout once `deadline` passes.
    async fn send(&self, request: Message, deadline: Instant) -> Result<Message>;

    /// Terminal and idempotent. Only the pool removal path calls this.
    fn stop(&self);
}

struct Dispatch {
    message: Message,
    deadline: Instant,
    reply: ReplySender,
}

/// A single upstream connection with its send queue and pending replies.
pub struct Backend {
    addr: String,
    readiness: Readiness,
    connected: AtomicBool,
    stop_tx: watch::Sender<bool>,
    queue: mpsc::Sender<Dispatch>,
    pending: Arc<PendingReplies>,
}

impl Backend {
    /// Creates the backend and starts its connection driver and sweeper.
    pub fn spawn(addr: String, readiness: Readiness) -> Arc<Self> {
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_CAPACITY);
        let (stop_tx, _) = watch::channel(false);
        let backend = Arc::new(Self {
            addr,
            readiness,
            connected: AtomicBool::new(false),
            stop_tx,
            queue: queue_tx,
            pending: Arc::new(PendingReplies::new()),
        });
        tokio::spawn(Arc::clone(&backend).run(queue_rx));
        tokio::spawn(Arc::clone(&backend).sweep_loop());
        backend
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Requests still awaiting a backend response.
    pub fn pending_replies(&self) -> usize {
        self.pending.len()
    }

    fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    /// Connection driver: probe until ready, dial, run the writer loop,
    /// reconnect when it ends, and on stop fail whatever is still queued so
    /// no caller hangs.
    async fn run(self: Arc<Self>, mut queue: mpsc::Receiver<Dispatch>) {
        let mut stop_rx = self.stop_tx.subscribe();

        while !self.is_stopped() {
            if !self.wait_ready(&mut stop_rx).await {
                break;
            }

            info!("connecting to backend {}", self.addr);
            let stream = match TcpStream::connect(&self.addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to connect to backend {}: {}", self.addr, e);
                    if sleep_or_stop(RECONNECT_DELAY, &mut stop_rx).await {
                        break;
                    }
                    continue;
                }
            };
            info!("connected to backend {}", self.addr);
            self.set_connected(true);

            let (read_half, write_half) = stream.into_split();
            let (dead_tx, dead_rx) = oneshot::channel();
            let reader = tokio::spawn(Arc::clone(&self).read_loop(read_half, dead_tx));

            self.write_loop(&mut queue, write_half, dead_rx).await;

            self.set_connected(false);
            reader.abort();
        }

        self.set_connected(false);
        queue.close();
        while let Ok(dispatch) = queue.try_recv() {
            let _ = dispatch.reply.send(Err(RelayError::NotConnected));
        }
        self.pending.fail_all();
        debug!("backend {} connection driver exited", self.addr);
    }

    /// Polls the readiness probe until it passes. Returns false when the
    /// backend was stopped while probing.
    async fn wait_ready(&self, stop_rx: &mut watch::Receiver<bool>) -> bool {
        loop {
            if self.is_stopped() {
                return false;
            }
            if self.readiness.is_ready().await {
                return true;
            }
            debug!("backend {} not ready yet", self.addr);
            if sleep_or_stop(PROBE_INTERVAL, stop_rx).await {
                return false;
            }
        }
    }

    /// Pops dispatches off the queue, registers the pending reply, then
    /// writes. Ends on write failure (triggering a reconnect), on reader
    /// death, or on stop.
    async fn write_loop(
        &self,
        queue: &mut mpsc::Receiver<Dispatch>,
        mut write_half: OwnedWriteHalf,
        mut dead_rx: oneshot::Receiver<()>,
    ) {
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            if self.is_stopped() {
                return;
            }
            tokio::select! {
                item = queue.recv() => {
                    let Some(dispatch) = item else { return };
                    let seq_id = match dispatch.message.seq_id() {
                        Ok(seq_id) => seq_id,
                        Err(e) => {
                            let _ = dispatch.reply.send(Err(e));
                            continue;
                        }
                    };
                    // Register before write: a reply that beats the write
                    // returning must already find its slot.
                    self.pending.insert(seq_id, dispatch.reply, dispatch.deadline);
                    if let Err(e) = write_half.write_all(dispatch.message.bytes()).await {
                        warn!("failed to write request to backend {}: {}", self.addr, e);
                        if let Some(reply) = self.pending.remove(seq_id) {
                            let _ = reply.send(Err(RelayError::Io(e)));
                        }
                        return;
                    }
                }
                _ = &mut dead_rx => return,
                _ = stop_rx.changed() => return,
            }
        }
    }

    /// Reads the response stream, matching each extracted message to its
    /// pending reply by sequence id. Unmatched responses are logged and
    /// dropped.
    async fn read_loop(self: Arc<Self>, mut read_half: OwnedReadHalf, dead_tx: oneshot::Sender<()>) {
        let mut chunk = [0u8; READ_CHUNK];
        let mut buffer = MessageBuffer::new();
        let mut stop_rx = self.stop_tx.subscribe();

        loop {
            let n = tokio::select! {
                read = read_half.read(&mut chunk) => match read {
                    Ok(0) => {
                        info!("backend {} closed the connection", self.addr);
                        break;
                    }
                    Ok(n) => n,
                    Err(e) => {
                        warn!("failed to read response from backend {}: {}", self.addr, e);
                        break;
                    }
                },
                _ = stop_rx.changed() => break,
            };

            buffer.push(&chunk[..n]);
            while let Some(response) = buffer.extract() {
                match response.seq_id() {
                    Ok(seq_id) => match self.pending.remove(seq_id) {
                        Some(reply) => {
                            let _ = reply.send(Ok(response));
                        }
                        None => warn!(
                            "no pending reply for sequence id {} from backend {}",
                            seq_id, self.addr
                        ),
                    },
                    Err(e) => warn!("unreadable response from backend {}: {}", self.addr, e),
                }
            }
        }

        self.set_connected(false);
        let _ = dead_tx.send(());
    }

    async fn sweep_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        let mut stop_rx = self.stop_tx.subscribe();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if self.is_stopped() {
                        break;
                    }
                    let expired = self.pending.sweep();
                    if expired > 0 {
                        debug!("expired {} pending replies on backend {}", expired, self.addr);
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }
    }
}

#[async_trait]
impl Endpoint for Backend {
    fn addr(&self) -> &str {
        &self.addr
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn send(&self, request: Message, deadline: Instant) -> Result<Message> {
        if self.is_stopped() || !self.is_connected() {
            return Err(RelayError::NotConnected);
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.queue
            .send(Dispatch {
                message: request,
                deadline,
                reply: reply_tx,
            })
            .await
            .map_err(|_| RelayError::NotConnected)?;

        // A dropped slot (backend torn down mid-flight) reads as
        // not-connected so the balancer retries elsewhere.
        reply_rx.await.unwrap_or(Err(RelayError::NotConnected))
    }

    fn stop(&self) {
        if !self.stop_tx.send_replace(true) {
            info!("stopping backend {}", self.addr);
        } else {
            debug!("backend {} already stopped", self.addr);
        }
    }
}

/// Sleeps for `duration` unless the stop flag flips first; returns true
/// when stopped.
async fn sleep_or_stop(duration: Duration, stop_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        _ = stop_rx.changed() => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use binrelay_common::wire::{MessageType, MessageWriter};
    use tokio::net::TcpListener;

    fn call(name: &str, seq_id: i32) -> Message {
        let mut writer = MessageWriter::new(true);
        writer.begin_message(name, MessageType::Call, seq_id);
        writer.into_message()
    }

    fn deadline_in(ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(ms)
    }

    /// Accepts connections and echoes every byte back.
    async fn spawn_echo_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    loop {
                        match stream.read(&mut buf).await {
                            Ok(0) | Err(_) => break,
                            Ok(n) => {
                                if stream.write_all(&buf[..n]).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                });
            }
        });
        addr
    }

    /// Accepts connections and reads forever without replying.
    async fn spawn_sink_server() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 4096];
                    while matches!(stream.read(&mut buf).await, Ok(n) if n > 0) {}
                });
            }
        });
        addr
    }

    async fn wait_connected(backend: &Backend) {
        for _ in 0..200 {
            if backend.is_connected() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend never connected to {}", backend.addr());
    }

    #[tokio::test]
    async fn test_send_fails_fast_when_not_connected() {
        // Nothing listens on this port.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let backend = Backend::spawn(addr, Readiness::Always);
        let result = backend.send(call("ping", 1), deadline_in(1000)).await;
        assert!(matches!(result, Err(RelayError::NotConnected)));
        backend.stop();
    }

    #[tokio::test]
    async fn test_round_trip_through_echo_backend() {
        let addr = spawn_echo_server().await;
        let backend = Backend::spawn(addr, Readiness::Always);
        wait_connected(&backend).await;

        let request = call("ping", 7);
        let response = backend
            .send(request.clone(), deadline_in(5000))
            .await
            .unwrap();
        assert_eq!(response.bytes(), request.bytes());
        assert_eq!(response.seq_id().unwrap(), 7);
        assert!(backend.pending_replies() == 0);
        backend.stop();
    }

    #[tokio::test]
    async fn test_concurrent_requests_matched_by_seq_id() {
        let addr = spawn_echo_server().await;
        let backend = Backend::spawn(addr, Readiness::Always);
        wait_connected(&backend).await;

        let mut handles = Vec::new();
        for seq_id in 1..=20 {
            let backend = Arc::clone(&backend);
            handles.push(tokio::spawn(async move {
                backend.send(call("ping", seq_id), deadline_in(5000)).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let response = handle.await.unwrap().unwrap();
            assert_eq!(response.seq_id().unwrap(), (i + 1) as i32);
        }
        backend.stop();
    }

    #[tokio::test]
    async fn test_unanswered_request_times_out() {
        let addr = spawn_sink_server().await;
        let backend = Backend::spawn(addr, Readiness::Always);
        wait_connected(&backend).await;

        let started = Instant::now();
        let result = backend.send(call("ping", 1), deadline_in(50)).await;
        assert!(matches!(result, Err(RelayError::RequestTimeout)));
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(backend.pending_replies(), 0);
        backend.stop();
    }

    #[tokio::test]
    async fn test_stop_releases_queued_dispatches() {
        let addr = spawn_sink_server().await;
        let backend = Backend::spawn(addr, Readiness::Always);
        wait_connected(&backend).await;

        let sender = Arc::clone(&backend);
        let in_flight =
            tokio::spawn(async move { sender.send(call("ping", 1), deadline_in(60_000)).await });
        // Let the dispatch reach the pending registry.
        tokio::time::sleep(Duration::from_millis(50)).await;

        backend.stop();
        let result = tokio::time::timeout(Duration::from_secs(2), in_flight)
            .await
            .expect("request hung after stop")
            .unwrap();
        assert!(result.is_err());

        // Stopped backends refuse new work immediately.
        let refused = backend.send(call("ping", 2), deadline_in(1000)).await;
        assert!(matches!(refused, Err(RelayError::NotConnected)));
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let addr = spawn_echo_server().await;
        let backend = Backend::spawn(addr, Readiness::Always);
        backend.stop();
        backend.stop();
        assert!(backend.is_stopped());
    }

    #[tokio::test]
    async fn test_reconnects_after_backend_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // First incarnation: accept one connection and drop it.
        let first = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
            drop(listener);
        });

        let backend = Backend::spawn(addr.to_string(), Readiness::Always);
        wait_connected(&backend).await;
        first.await.unwrap();

        // Wait for the drop to be observed.
        for _ in 0..200 {
            if !backend.is_connected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!backend.is_connected());
        backend.stop();
    }
}
