//! Downstream client connections.
//!
//! Each accepted socket gets a reader task and a writer task sharing a
//! bounded response channel. The reader demultiplexes requests: every
//! extracted message is given a fresh proxy-wide sequence id (rewritten in
//! place), the original id is remembered, and the request is handed to the
//! balancer on its own task. Responses are pushed onto the channel in
//! whatever order backends answer — per-client ordering is explicitly not
//! preserved; callers correlate by sequence id.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use binrelay_common::wire::{build_internal_error, Message, MessageBuffer};
use binrelay_common::RelayError;
use binrelay_metrics::ProxyMetrics;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, info, warn};

use crate::balancer::RoundRobin;
use crate::seq_id::{SeqIdAllocator, SeqIdMapper};

/// Bound of the per-client response channel, and of the requests one client
/// may have in flight. When the limit is reached the reader stalls, pushing
/// backpressure onto the downstream socket.
const RESPONSE_QUEUE_CAPACITY: usize = 1000;
/// Read buffer size for the request stream.
const READ_CHUNK: usize = 4096;

pub(crate) struct ClientConn;

impl ClientConn {
    /// Spawns the reader/writer pair for one accepted connection.
    /// `on_close` runs once, when the reader observes the connection gone.
    pub(crate) fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        allocator: Arc<SeqIdAllocator>,
        balancer: Arc<RoundRobin>,
        request_timeout: Duration,
        metrics: Arc<ProxyMetrics>,
        on_close: Box<dyn FnOnce() + Send>,
    ) {
        let (response_tx, response_rx) = mpsc::channel(RESPONSE_QUEUE_CAPACITY);
        let (read_half, write_half) = stream.into_split();

        tokio::spawn(read_requests(
            read_half,
            peer,
            response_tx,
            allocator,
            balancer,
            request_timeout,
            metrics,
            on_close,
        ));
        tokio::spawn(write_responses(write_half, peer, response_rx));
    }
}

#[allow(clippy::too_many_arguments)]
async fn read_requests(
    mut read_half: OwnedReadHalf,
    peer: SocketAddr,
    response_tx: mpsc::Sender<Message>,
    allocator: Arc<SeqIdAllocator>,
    balancer: Arc<RoundRobin>,
    request_timeout: Duration,
    metrics: Arc<ProxyMetrics>,
    on_close: Box<dyn FnOnce() + Send>,
) {
    let mapper = Arc::new(SeqIdMapper::new());
    let in_flight = Arc::new(Semaphore::new(RESPONSE_QUEUE_CAPACITY));
    let mut chunk = [0u8; READ_CHUNK];
    let mut buffer = MessageBuffer::new();

    loop {
        match read_half.read(&mut chunk).await {
            Ok(0) => {
                info!("client {} disconnected", peer);
                break;
            }
            Err(e) => {
                info!("lost connection with client {}: {}", peer, e);
                break;
            }
            Ok(n) => {
                buffer.push(&chunk[..n]);
                while let Some(request) = buffer.extract() {
                    dispatch(
                        request,
                        &allocator,
                        &mapper,
                        &balancer,
                        request_timeout,
                        &metrics,
                        &in_flight,
                        &response_tx,
                    )
                    .await;
                }
            }
        }
    }

    on_close();
    debug!("client {} read task exited", peer);
    // Dropping response_tx here lets the writer drain and exit once the
    // in-flight request tasks have finished.
}

/// Rewrites the sequence id and hands the request to the balancer on its
/// own task; the task restores the original id (or synthesises an
/// exception) and queues the response for the writer. Awaits an in-flight
/// permit first, which is what stalls the reader under load.
#[allow(clippy::too_many_arguments)]
async fn dispatch(
    mut request: Message,
    allocator: &Arc<SeqIdAllocator>,
    mapper: &Arc<SeqIdMapper>,
    balancer: &Arc<RoundRobin>,
    request_timeout: Duration,
    metrics: &Arc<ProxyMetrics>,
    in_flight: &Arc<Semaphore>,
    response_tx: &mpsc::Sender<Message>,
) {
    let framed = request.is_framed();
    let name = request.name().unwrap_or_default();
    let old_seq_id = match request.seq_id() {
        Ok(seq_id) => seq_id,
        Err(e) => {
            warn!("dropping malformed request: {}", e);
            return;
        }
    };

    let new_seq_id = allocator.alloc();
    if let Err(e) = request.set_seq_id(new_seq_id) {
        warn!("dropping malformed request: {}", e);
        return;
    }
    mapper.map(old_seq_id, new_seq_id);
    metrics.record_request();

    // The semaphore is never closed, so acquisition can only succeed.
    let Ok(permit) = Arc::clone(in_flight).acquire_owned().await else {
        return;
    };

    let deadline = Instant::now() + request_timeout;
    let mapper = Arc::clone(mapper);
    let balancer = Arc::clone(balancer);
    let metrics = Arc::clone(metrics);
    let response_tx = response_tx.clone();

    tokio::spawn(async move {
        let _permit = permit;
        let result = balancer.send(request, deadline).await;

        let Some(old_seq_id) = mapper.remove(new_seq_id) else {
            // The client disconnected before the answer came back.
            debug!("dropping response for departed client (seq id {})", new_seq_id);
            return;
        };

        let mut response = match result {
            Ok(response) => {
                metrics.record_reply();
                response
            }
            Err(e) => {
                if matches!(e, RelayError::RequestTimeout) {
                    metrics.record_timeout();
                }
                metrics.record_exception();
                warn!("request '{}' failed: {}", name, e);
                build_internal_error(framed, &name, old_seq_id, &e.to_string())
            }
        };

        if let Err(e) = response.set_seq_id(old_seq_id) {
            warn!("could not restore sequence id on response: {}", e);
            return;
        }

        // The writer may already be gone; a send onto a closed channel is
        // deliberately swallowed.
        let _ = response_tx.send(response).await;
    });
}

async fn write_responses(
    mut write_half: OwnedWriteHalf,
    peer: SocketAddr,
    mut response_rx: mpsc::Receiver<Message>,
) {
    while let Some(response) = response_rx.recv().await {
        if let Err(e) = write_half.write_all(response.bytes()).await {
            info!("failed to send response to client {}: {}", peer, e);
            break;
        }
    }
    debug!("client {} write task exited", peer);
}
