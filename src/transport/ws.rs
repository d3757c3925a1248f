//! Duplex link to the detection service.
//!
//! `Connector` opens a `Link`; everything the link observes (handshake
//! done, result messages, close, errors) comes back as `LinkEvent`s on the
//! channel handed to `connect`. Every event carries the generation of the
//! connection attempt that produced it, so the session can ignore
//! leftovers from a socket it has already replaced.
//!
//! `WsConnector` runs each WebSocket on its own I/O worker thread. The
//! worker owns the socket; the control loop only talks to it through the
//! command channel, so a slow network never blocks a capture tick.

use anyhow::{anyhow, Context, Result};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::io::ErrorKind;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tungstenite::stream::MaybeTlsStream;
use tungstenite::{HandshakeError, Message, WebSocket};

use super::endpoint::WsEndpoint;

/// How long a worker blocks in `read` before checking for commands.
const POLL_INTERVAL: Duration = Duration::from_millis(5);

// ----------------------------------------------------------------------------
// Events and seams
// ----------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum LinkEventKind {
    /// Handshake completed; the link accepts frames.
    Opened,
    /// One message from the service (text or binary payload).
    Message(Vec<u8>),
    /// The peer closed the connection.
    Closed { reason: String },
    /// Connect, handshake or protocol failure.
    Error(String),
}

#[derive(Clone, Debug, PartialEq)]
pub struct LinkEvent {
    pub generation: u64,
    pub kind: LinkEventKind,
}

/// An established (or establishing) connection.
pub trait Link {
    /// Queue one binary frame.
    fn send(&mut self, bytes: Vec<u8>) -> Result<()>;

    /// Close the connection and release its resources. Idempotent.
    fn close(&mut self);
}

/// Opens links. A connect that fails synchronously returns `Err`; later
/// failures are reported as events.
pub trait Connector {
    type Link: Link;

    fn connect(
        &mut self,
        endpoint: &WsEndpoint,
        generation: u64,
        events: Sender<LinkEvent>,
    ) -> Result<Self::Link>;
}

// ----------------------------------------------------------------------------
// WebSocket connector
// ----------------------------------------------------------------------------

enum Command {
    Frame(Vec<u8>),
    Close,
}

/// tungstenite-backed connector.
#[derive(Clone, Debug)]
pub struct WsConnector {
    pub connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl Connector for WsConnector {
    type Link = WsLink;

    fn connect(
        &mut self,
        endpoint: &WsEndpoint,
        generation: u64,
        events: Sender<LinkEvent>,
    ) -> Result<WsLink> {
        if endpoint.secure && !cfg!(feature = "tls") {
            return Err(anyhow!(
                "endpoint {} requires the 'tls' feature.\n\
                 Recompile with: cargo build --features tls\n\
                 Or use protocol 'ws' for a plain connection.",
                endpoint
            ));
        }

        let (commands_tx, commands_rx) = crossbeam_channel::unbounded();
        let endpoint = endpoint.clone();
        let timeout = self.connect_timeout;
        let established = Arc::new(AtomicBool::new(false));
        let worker_established = Arc::clone(&established);
        let worker = std::thread::Builder::new()
            .name(format!("ws-link-{}", generation))
            .spawn(move || {
                run_worker(
                    endpoint,
                    timeout,
                    generation,
                    events,
                    commands_rx,
                    worker_established,
                )
            })
            .context("spawn websocket worker thread")?;

        Ok(WsLink {
            commands: commands_tx,
            worker: Some(worker),
            established,
        })
    }
}

/// Handle to a WebSocket worker thread.
///
/// Closing joins the worker only once its socket is established. A worker
/// still resolving, connecting or handshaking is detached instead; it
/// finds the close command as soon as `open_socket` returns and exits
/// without reporting `Opened`.
pub struct WsLink {
    commands: Sender<Command>,
    worker: Option<JoinHandle<()>>,
    established: Arc<AtomicBool>,
}

impl Link for WsLink {
    fn send(&mut self, bytes: Vec<u8>) -> Result<()> {
        if self.worker.is_none() {
            return Err(anyhow!("link is closed"));
        }
        self.commands
            .send(Command::Frame(bytes))
            .map_err(|_| anyhow!("websocket worker has exited"))
    }

    fn close(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = self.commands.send(Command::Close);
            if !self.established.load(Ordering::SeqCst) {
                log::debug!("websocket worker still connecting; detaching");
                return;
            }
            if worker.join().is_err() {
                log::warn!("websocket worker panicked");
            }
        }
    }
}

impl Drop for WsLink {
    fn drop(&mut self) {
        self.close();
    }
}

// ----------------------------------------------------------------------------
// Worker
// ----------------------------------------------------------------------------

type Socket = WebSocket<MaybeTlsStream<TcpStream>>;

fn run_worker(
    endpoint: WsEndpoint,
    connect_timeout: Duration,
    generation: u64,
    events: Sender<LinkEvent>,
    commands: Receiver<Command>,
    established: Arc<AtomicBool>,
) {
    let emit = |kind: LinkEventKind| {
        // The receiver disappears only on shutdown; nothing left to tell.
        let _ = events.send(LinkEvent { generation, kind });
    };

    let mut socket = match open_socket(&endpoint, connect_timeout) {
        Ok(socket) => socket,
        Err(e) => {
            emit(LinkEventKind::Error(format!("{:#}", e)));
            return;
        }
    };

    // Published before draining commands, so a racing close is either
    // joined or drained here.
    established.store(true, Ordering::SeqCst);
    let mut pending = Vec::new();
    loop {
        match commands.try_recv() {
            Ok(Command::Frame(bytes)) => pending.push(bytes),
            Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                shutdown(&mut socket);
                return;
            }
            Err(TryRecvError::Empty) => break,
        }
    }
    emit(LinkEventKind::Opened);
    for bytes in pending {
        if let Err(e) = socket.send(Message::Binary(bytes)) {
            emit(LinkEventKind::Error(format!("send failed: {}", e)));
            return;
        }
    }

    loop {
        loop {
            match commands.try_recv() {
                Ok(Command::Frame(bytes)) => {
                    if let Err(e) = socket.send(Message::Binary(bytes)) {
                        emit(LinkEventKind::Error(format!("send failed: {}", e)));
                        return;
                    }
                }
                Ok(Command::Close) | Err(TryRecvError::Disconnected) => {
                    shutdown(&mut socket);
                    return;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        match socket.read() {
            Ok(Message::Text(text)) => emit(LinkEventKind::Message(text.into_bytes())),
            Ok(Message::Binary(bytes)) => emit(LinkEventKind::Message(bytes)),
            Ok(Message::Close(frame)) => {
                let reason = match frame {
                    Some(frame) if !frame.reason.is_empty() => {
                        format!("{} ({})", frame.reason, u16::from(frame.code))
                    }
                    Some(frame) => format!("code {}", u16::from(frame.code)),
                    None => "closed by peer".to_string(),
                };
                // Flush the close reply; errors here no longer matter.
                let _ = socket.flush();
                emit(LinkEventKind::Closed { reason });
                return;
            }
            Ok(_) => {}
            Err(tungstenite::Error::Io(e)) if is_timeout(e.kind()) => {}
            Err(tungstenite::Error::ConnectionClosed) | Err(tungstenite::Error::AlreadyClosed) => {
                emit(LinkEventKind::Closed {
                    reason: "connection closed".to_string(),
                });
                return;
            }
            Err(e) => {
                emit(LinkEventKind::Error(e.to_string()));
                return;
            }
        }
    }
}

fn open_socket(endpoint: &WsEndpoint, connect_timeout: Duration) -> Result<Socket> {
    let addrs: Vec<_> = (endpoint.host.as_str(), endpoint.port)
        .to_socket_addrs()
        .with_context(|| format!("resolve {}", endpoint.host))?
        .collect();
    let mut last_err = None;
    let mut stream = None;
    for addr in &addrs {
        match TcpStream::connect_timeout(addr, connect_timeout) {
            Ok(s) => {
                stream = Some(s);
                break;
            }
            Err(e) => last_err = Some(e),
        }
    }
    let stream = match (stream, last_err) {
        (Some(stream), _) => stream,
        (None, Some(e)) => {
            return Err(e).with_context(|| format!("connect to {}", endpoint));
        }
        (None, None) => return Err(anyhow!("no addresses for {}", endpoint.host)),
    };
    stream.set_nodelay(true).context("set TCP_NODELAY")?;

    // Same socket as `stream`; kept to retune the timeout after the handshake.
    let control = stream.try_clone().context("clone tcp stream")?;
    control
        .set_read_timeout(Some(connect_timeout))
        .context("set handshake timeout")?;

    let socket = handshake(endpoint, stream)?;
    control
        .set_read_timeout(Some(POLL_INTERVAL))
        .context("set poll timeout")?;
    Ok(socket)
}

#[cfg(feature = "tls")]
fn handshake(endpoint: &WsEndpoint, stream: TcpStream) -> Result<Socket> {
    match tungstenite::client_tls(endpoint.url(), stream) {
        Ok((socket, _response)) => Ok(socket),
        Err(HandshakeError::Interrupted(_)) => Err(anyhow!("handshake with {} timed out", endpoint)),
        Err(HandshakeError::Failure(e)) => {
            Err(anyhow!(e)).with_context(|| format!("handshake with {}", endpoint))
        }
    }
}

#[cfg(not(feature = "tls"))]
fn handshake(endpoint: &WsEndpoint, stream: TcpStream) -> Result<Socket> {
    match tungstenite::client(endpoint.url(), MaybeTlsStream::Plain(stream)) {
        Ok((socket, _response)) => Ok(socket),
        Err(HandshakeError::Interrupted(_)) => Err(anyhow!("handshake with {} timed out", endpoint)),
        Err(HandshakeError::Failure(e)) => {
            Err(anyhow!(e)).with_context(|| format!("handshake with {}", endpoint))
        }
    }
}

fn shutdown(socket: &mut Socket) {
    if socket.close(None).is_err() {
        return;
    }
    // Give the close frame a chance to leave; the peer's reply is optional.
    for _ in 0..10 {
        match socket.read() {
            Ok(_) => continue,
            Err(tungstenite::Error::Io(e)) if is_timeout(e.kind()) => continue,
            Err(_) => break,
        }
    }
}

fn is_timeout(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}
