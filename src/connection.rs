//! Single-node TCP session: protocol negotiation, a FIFO request
//! pipeline with at-most-one-inflight, reconnect, and a 5s health tick
//! (§4.E). Modeled after the teacher's `EncryptedStream`/`Peer` split —
//! one task owns the socket and the state machine; the handle the rest
//! of the crate holds is just a command sender plus a lock-free health
//! snapshot so `Cluster`'s replica-retry policy can read it without a
//! round trip through the task.

use crate::config::ClusterClientConfig;
use crate::deferred::{self, Deferred, Resolver};
use crate::error::{Error, ServerError};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Connecting = 0,
    ProtocolProposal = 1,
    Idle = 2,
    Request = 3,
    Disconnected = 4,
}

impl State {
    fn from_code(code: u8) -> Self {
        match code {
            0 => State::Connecting,
            1 => State::ProtocolProposal,
            2 => State::Idle,
            3 => State::Request,
            _ => State::Disconnected,
        }
    }
}

/// A connection's self-reported readiness (§4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Health {
    Good,
    Bad,
}

/// Read-only introspection snapshot, analogous to the teacher's
/// `PeerInfo`/`ConnectionStats`.
#[derive(Debug, Clone)]
pub struct ConnectionSnapshot {
    pub addr: SocketAddr,
    pub health: Health,
    pub queue_depth: usize,
    pub close_reason: Option<String>,
}

enum Command {
    Submit { frame: Vec<u8>, resolver: Resolver<Vec<u8>> },
    Shutdown { resolver: Resolver<()> },
    Snapshot { reply: tokio::sync::oneshot::Sender<ConnectionSnapshot> },
}

struct PendingRequest {
    frame: Vec<u8>,
    resolver: Resolver<Vec<u8>>,
}

/// Handle to a single cluster node's persistent connection. Owned by
/// [`crate::cluster::Cluster`] for the node's whole lifetime.
pub struct Connection {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Command>,
    state: Arc<AtomicU8>,
}

impl Connection {
    /// Dial `addr` and start the connection's background task. Returns
    /// immediately — the socket dial happens inside the task.
    pub fn connect(addr: SocketAddr, config: ClusterClientConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(State::Connecting as u8));

        tokio::spawn(run(addr, config, rx, state.clone()));

        Self { addr, tx, state }
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// `good` whenever the state is `Idle`, `Request`, `Connecting`, or
    /// `ProtocolProposal`; `bad` only when `Disconnected` (§4.E).
    pub fn health(&self) -> Health {
        match State::from_code(self.state.load(Ordering::Acquire)) {
            State::Disconnected => Health::Bad,
            _ => Health::Good,
        }
    }

    /// Submit a pre-built request frame. Resolves with the response
    /// body, or fails with a [`ServerError`] (never retried by this
    /// connection itself — that's the cluster's job).
    pub fn submit(&self, frame: Vec<u8>) -> Deferred<Vec<u8>> {
        let (resolver, deferred) = deferred::channel();
        if self.tx.send(Command::Submit { frame, resolver }).is_err() {
            let (resolver, deferred) = deferred::channel();
            resolver.fail(ServerError::ConnectionClosed("connection task has exited".into()).into());
            return deferred;
        }
        deferred
    }

    /// Graceful shutdown: refuse new submissions, await the in-flight
    /// request, fail queued requests, close the socket (§4.E).
    pub fn close(&self) -> Deferred<()> {
        let (resolver, deferred) = deferred::channel();
        if self.tx.send(Command::Shutdown { resolver }).is_err() {
            let (resolver, deferred) = deferred::channel();
            resolver.succeed(());
            return deferred;
        }
        deferred
    }

    pub async fn snapshot(&self) -> Option<ConnectionSnapshot> {
        let (reply, rx) = tokio::sync::oneshot::channel();
        self.tx.send(Command::Snapshot { reply }).ok()?;
        rx.await.ok()
    }
}

async fn run(addr: SocketAddr, config: ClusterClientConfig, mut cmd_rx: mpsc::UnboundedReceiver<Command>, state: Arc<AtomicU8>) {
    let mut pending: VecDeque<PendingRequest> = VecDeque::new();
    let mut in_flight: Option<Resolver<Vec<u8>>> = None;
    let mut stream: Option<TcpStream> = None;
    let mut inbound = Vec::new();
    let mut last_send = Instant::now();
    let mut closing = false;
    let mut shutdown_resolver: Option<Resolver<()>> = None;
    let mut close_reason: Option<String> = None;
    let mut tick = tokio::time::interval(config.health_tick_interval);
    tick.tick().await; // first tick fires immediately; consume it

    set_state(&state, State::Connecting);
    match dial_and_negotiate(addr, &config.protocol_tag).await {
        Ok(s) => {
            stream = Some(s);
            set_state(&state, State::Idle);
            info!("connected to {addr}");
        }
        Err(e) => {
            warn!("initial dial to {addr} failed: {e}");
            close_reason = Some(e.to_string());
            set_state(&state, State::Disconnected);
        }
    }

    loop {
        if closing && stream.is_none() && in_flight.is_none() {
            fail_all(&mut pending, ServerError::ShutdownRequested);
            if let Some(r) = shutdown_resolver.take() {
                r.succeed(());
            }
            return;
        }

        let current = State::from_code(state.load(Ordering::Acquire));

        // Idle with queued work: dispatch immediately, no need to select.
        if current == State::Idle && !closing {
            if let Some(req) = pending.pop_front() {
                if let Some(s) = stream.as_mut() {
                    match send_frame(s, &req.frame).await {
                        Ok(()) => {
                            last_send = Instant::now();
                            in_flight = Some(req.resolver);
                            set_state(&state, State::Request);
                            continue;
                        }
                        Err(e) => {
                            req.resolver.fail(ServerError::Io(e.to_string()).into());
                            close_socket(&mut stream, &mut inbound);
                            close_reason = Some(e.to_string());
                            set_state(&state, State::Disconnected);
                            fail_all(&mut pending, ServerError::ConnectionClosed(e.to_string()));
                            continue;
                        }
                    }
                } else {
                    req.resolver.fail(ServerError::ConnectionClosed("not connected".into()).into());
                    continue;
                }
            }
        }

        if current == State::Idle && closing {
            fail_all(&mut pending, ServerError::ShutdownRequested);
            close_socket(&mut stream, &mut inbound);
            set_state(&state, State::Disconnected);
            continue;
        }

        tokio::select! {
            biased;

            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Submit { frame, resolver }) => {
                        if closing {
                            resolver.fail(ServerError::ShutdownRequested.into());
                        } else if current == State::Disconnected {
                            resolver.fail(ServerError::ConnectionClosed(
                                close_reason.clone().unwrap_or_else(|| "not connected".into())
                            ).into());
                        } else {
                            pending.push_back(PendingRequest { frame, resolver });
                        }
                    }
                    Some(Command::Shutdown { resolver }) => {
                        closing = true;
                        if in_flight.is_none() && stream.is_none() {
                            fail_all(&mut pending, ServerError::ShutdownRequested);
                            resolver.succeed(());
                            return;
                        }
                        // resolved once the in-flight request drains and
                        // the socket closes; see the loop-top check above.
                        shutdown_resolver = Some(resolver);
                    }
                    Some(Command::Snapshot { reply }) => {
                        let _ = reply.send(ConnectionSnapshot {
                            addr,
                            health: match State::from_code(state.load(Ordering::Acquire)) {
                                State::Disconnected => Health::Bad,
                                _ => Health::Good,
                            },
                            queue_depth: pending.len(),
                            close_reason: close_reason.clone(),
                        });
                    }
                    None => return,
                }
            }

            _ = tick.tick() => {
                match current {
                    State::Disconnected if !closing => {
                        debug!("health tick: attempting reconnect to {addr}");
                        set_state(&state, State::Connecting);
                        match dial_and_negotiate(addr, &config.protocol_tag).await {
                            Ok(s) => {
                                stream = Some(s);
                                close_reason = None;
                                set_state(&state, State::Idle);
                                info!("reconnected to {addr}");
                            }
                            Err(e) => {
                                close_reason = Some(e.to_string());
                                set_state(&state, State::Disconnected);
                            }
                        }
                    }
                    State::Request if last_send.elapsed() >= config.request_timeout => {
                        warn!("request to {addr} timed out after {:?}", config.request_timeout);
                        close_socket(&mut stream, &mut inbound);
                        if let Some(r) = in_flight.take() {
                            r.fail(ServerError::Timeout(config.request_timeout).into());
                        }
                        close_reason = Some("request timeout".into());
                        set_state(&state, State::Disconnected);
                        fail_all(&mut pending, ServerError::ConnectionClosed("request timeout".into()));
                    }
                    _ => {}
                }
            }

            result = read_some(stream.as_mut(), &mut inbound), if current == State::Request && stream.is_some() => {
                match result {
                    Ok(0) => {
                        warn!("connection to {addr} closed by peer");
                        close_socket(&mut stream, &mut inbound);
                        if let Some(r) = in_flight.take() {
                            r.fail(ServerError::ConnectionClosed("closed by peer".into()).into());
                        }
                        close_reason = Some("closed by peer".into());
                        set_state(&state, State::Disconnected);
                        fail_all(&mut pending, ServerError::ConnectionClosed("closed by peer".into()));
                    }
                    Ok(_) => {
                        if let Some(body) = try_take_frame(&mut inbound) {
                            if let Some(r) = in_flight.take() {
                                r.succeed(body);
                            }
                            if closing {
                                fail_all(&mut pending, ServerError::ShutdownRequested);
                                close_socket(&mut stream, &mut inbound);
                                set_state(&state, State::Disconnected);
                            } else {
                                set_state(&state, State::Idle);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("read error on connection to {addr}: {e}");
                        close_socket(&mut stream, &mut inbound);
                        if let Some(r) = in_flight.take() {
                            r.fail(ServerError::Io(e.to_string()).into());
                        }
                        close_reason = Some(e.to_string());
                        set_state(&state, State::Disconnected);
                        fail_all(&mut pending, ServerError::ConnectionClosed(e.to_string()));
                    }
                }
            }
        }
    }
}

/// One-shot request against a transient connection: dial, negotiate,
/// send one frame, read exactly one response frame, close (§4.F step 1
/// uses this for the `cluster.xml`/`stores.xml` bootstrap fetches —
/// spinning up a full persistent [`Connection`] task for a single
/// request the caller immediately discards would be wasteful).
pub(crate) async fn one_shot_request(addr: SocketAddr, protocol_tag: &[u8; 3], frame: &[u8]) -> Result<Vec<u8>, ServerError> {
    let mut stream = dial_and_negotiate(addr, protocol_tag).await?;
    send_frame(&mut stream, frame).await.map_err(ServerError::from)?;

    let mut inbound = Vec::new();
    loop {
        if let Some(body) = try_take_frame(&mut inbound) {
            return Ok(body);
        }
        let n = read_some(Some(&mut stream), &mut inbound).await.map_err(ServerError::from)?;
        if n == 0 {
            return Err(ServerError::ConnectionClosed("closed before a full response frame arrived".into()));
        }
    }
}

fn set_state(state: &AtomicU8, s: State) {
    state.store(s as u8, Ordering::Release);
}

fn close_socket(stream: &mut Option<TcpStream>, inbound: &mut Vec<u8>) {
    *stream = None;
    inbound.clear();
}

fn fail_all(pending: &mut VecDeque<PendingRequest>, err: ServerError) {
    for req in pending.drain(..) {
        req.resolver.fail(Error::Server(err.clone()));
    }
}

async fn send_frame(stream: &mut TcpStream, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

/// Read one chunk into `inbound`. Exists as a standalone function (not a
/// method) so it reads as a single cancel-safe future for `select!`:
/// each call does exactly one `read()`, appends, and returns — no
/// internal looping that would lose buffered bytes if the branch is
/// dropped by `select!`.
async fn read_some(stream: Option<&mut TcpStream>, inbound: &mut Vec<u8>) -> std::io::Result<usize> {
    let stream = stream.expect("guarded by select!'s `if` clause");
    let mut chunk = [0u8; 8192];
    let n = stream.read(&mut chunk).await?;
    if n > 0 {
        inbound.extend_from_slice(&chunk[..n]);
    }
    Ok(n)
}

/// Once `inbound` holds a full `uint32 length || body` frame, drain and
/// return the body; otherwise leave `inbound` untouched.
fn try_take_frame(inbound: &mut Vec<u8>) -> Option<Vec<u8>> {
    if inbound.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes(inbound[0..4].try_into().unwrap()) as usize;
    if inbound.len() < 4 + len {
        return None;
    }
    let body = inbound[4..4 + len].to_vec();
    inbound.drain(0..4 + len);
    Some(body)
}

/// Dial the socket, send the protocol tag, and await the two-byte
/// `ok`/`no` reply (§4.E, §6). Returns the negotiated stream, or a
/// `ServerError` describing why negotiation failed.
async fn dial_and_negotiate(addr: SocketAddr, protocol_tag: &[u8; 3]) -> Result<TcpStream, ServerError> {
    let mut stream = TcpStream::connect(addr)
        .await
        .map_err(|e| ServerError::ConnectionRefused(e.to_string()))?;

    stream.write_all(protocol_tag).await.map_err(ServerError::from)?;
    stream.flush().await.map_err(ServerError::from)?;

    let mut reply = [0u8; 2];
    stream.read_exact(&mut reply).await.map_err(ServerError::from)?;

    if &reply == b"ok" {
        Ok(stream)
    } else {
        Err(ServerError::ConnectionClosed(format!(
            "protocol negotiation rejected, server replied {reply:?}"
        )))
    }
}
