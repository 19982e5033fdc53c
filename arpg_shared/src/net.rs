//! Networking primitives.
//!
//! Goals:
//! - Length-prefixed frames over TCP: ordered, at-most-once per connection.
//! - A `Peer` that is either the host (listener, N connections) or a client
//!   (one connection to the host).
//! - The simulation never awaits the network. Socket IO lives on tokio tasks;
//!   outgoing frames are pushed into per-connection channels and incoming
//!   frames are drained with [`Peer::poll`].

use std::{
    collections::{BTreeMap, BTreeSet},
    net::SocketAddr,
    time::Instant,
};

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

/// Largest frame either side accepts.
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Identifies one connection of a peer.
///
/// On a client the single connection to the host is [`ConnectionId::HOST`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct ConnectionId(pub u32);

impl ConnectionId {
    pub const HOST: ConnectionId = ConnectionId(0);
}

/// Writes one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(w: &mut W, payload: &[u8]) -> anyhow::Result<()> {
    let mut buf = BytesMut::with_capacity(4 + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.extend_from_slice(payload);
    w.write_all(&buf).await.context("tcp write")?;
    Ok(())
}

/// Reads one length-prefixed frame.
pub async fn read_frame<R: AsyncRead + Unpin>(r: &mut R) -> anyhow::Result<Bytes> {
    let mut len_buf = [0u8; 4];
    r.read_exact(&mut len_buf).await.context("tcp read len")?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        anyhow::bail!("frame of {len} bytes exceeds limit");
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)
        .await
        .context("tcp read payload")?;
    Ok(Bytes::from(payload))
}

/// Something frames can be sent through.
///
/// Sends are fire-and-forget: a frame for an unknown or closed connection is
/// dropped.
pub trait Transport {
    fn is_hosting(&self) -> bool;
    fn connections(&self) -> Vec<ConnectionId>;
    fn send_frame(&mut self, conn: ConnectionId, frame: Bytes);
}

/// Event surfaced by [`Peer::poll`].
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    Connected(ConnectionId),
    Message {
        conn: ConnectionId,
        frame: Bytes,
        received_at: Instant,
    },
    Disconnected(ConnectionId),
}

enum IoEvent {
    Opened(ConnectionId, ConnHandle),
    Frame(ConnectionId, Bytes, Instant),
    Closed(ConnectionId),
}

struct ConnHandle {
    addr: SocketAddr,
    tx: mpsc::UnboundedSender<Bytes>,
    reader: JoinHandle<()>,
}

fn spawn_connection(
    id: ConnectionId,
    stream: TcpStream,
    io_tx: mpsc::UnboundedSender<IoEvent>,
) -> anyhow::Result<ConnHandle> {
    let addr = stream.peer_addr().context("peer addr")?;
    let _ = stream.set_nodelay(true);
    let (mut rd, mut wr) = stream.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();

    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut rd).await {
                Ok(frame) => {
                    if io_tx.send(IoEvent::Frame(id, frame, Instant::now())).is_err() {
                        return;
                    }
                }
                Err(e) => {
                    debug!(conn = ?id, error = %e, "Connection read ended");
                    break;
                }
            }
        }
        let _ = io_tx.send(IoEvent::Closed(id));
    });

    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut wr, &frame).await {
                debug!(conn = ?id, error = %e, "Connection write failed");
                break;
            }
        }
    });

    Ok(ConnHandle { addr, tx, reader })
}

/// Host or client network endpoint.
pub struct Peer {
    hosting: bool,
    running: bool,
    local_addr: SocketAddr,
    conns: BTreeMap<ConnectionId, ConnHandle>,
    io_rx: mpsc::UnboundedReceiver<IoEvent>,
    accept_task: Option<JoinHandle<()>>,
}

impl Peer {
    /// Binds as host when `is_host`, otherwise connects to the host.
    pub async fn start(address: &str, port: u16, is_host: bool) -> anyhow::Result<Self> {
        let addr = tokio::net::lookup_host((address, port))
            .await
            .with_context(|| format!("resolve {address}:{port}"))?
            .next()
            .with_context(|| format!("no address for {address}:{port}"))?;
        if is_host {
            Self::host(addr).await
        } else {
            Self::connect(addr).await
        }
    }

    /// Binds a listener and starts accepting clients.
    pub async fn host(addr: SocketAddr) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr).await.context("tcp bind")?;
        let local_addr = listener.local_addr()?;
        let (io_tx, io_rx) = mpsc::unbounded_channel();

        let accept_task = tokio::spawn(async move {
            let mut next_id = 1u32;
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = %e, "Accept failed");
                        continue;
                    }
                };
                let id = ConnectionId(next_id);
                next_id += 1;
                match spawn_connection(id, stream, io_tx.clone()) {
                    Ok(handle) => {
                        if io_tx.send(IoEvent::Opened(id, handle)).is_err() {
                            return;
                        }
                    }
                    Err(e) => warn!(%peer, error = %e, "Dropping connection"),
                }
            }
        });

        info!(%local_addr, "Hosting");
        Ok(Self {
            hosting: true,
            running: true,
            local_addr,
            conns: BTreeMap::new(),
            io_rx,
            accept_task: Some(accept_task),
        })
    }

    /// Connects to a host.
    pub async fn connect(addr: SocketAddr) -> anyhow::Result<Self> {
        let stream = TcpStream::connect(addr).await.context("tcp connect")?;
        let local_addr = stream.local_addr()?;
        let (io_tx, io_rx) = mpsc::unbounded_channel();
        let handle = spawn_connection(ConnectionId::HOST, stream, io_tx.clone())?;
        let _ = io_tx.send(IoEvent::Opened(ConnectionId::HOST, handle));

        info!(server = %addr, "Connected");
        Ok(Self {
            hosting: false,
            running: true,
            local_addr,
            conns: BTreeMap::new(),
            io_rx,
            accept_task: None,
        })
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn is_hosting(&self) -> bool {
        self.hosting
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn connection_count(&self) -> usize {
        self.conns.len()
    }

    pub fn peer_addr(&self, conn: ConnectionId) -> Option<SocketAddr> {
        self.conns.get(&conn).map(|h| h.addr)
    }

    /// Drains everything the IO tasks delivered since the last call.
    pub fn poll(&mut self) -> Vec<PeerEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = self.io_rx.try_recv() {
            match ev {
                IoEvent::Opened(id, handle) => {
                    if !self.running {
                        handle.reader.abort();
                        continue;
                    }
                    info!(conn = ?id, addr = %handle.addr, "Connection opened");
                    self.conns.insert(id, handle);
                    out.push(PeerEvent::Connected(id));
                }
                IoEvent::Frame(id, frame, received_at) => {
                    if self.conns.contains_key(&id) {
                        out.push(PeerEvent::Message {
                            conn: id,
                            frame,
                            received_at,
                        });
                    }
                }
                IoEvent::Closed(id) => {
                    if self.conns.remove(&id).is_some() {
                        info!(conn = ?id, "Connection closed");
                        out.push(PeerEvent::Disconnected(id));
                        if !self.hosting {
                            self.running = false;
                        }
                    }
                }
            }
        }
        out
    }

    /// Closes one connection. No `Disconnected` event is produced for it.
    pub fn disconnect(&mut self, conn: ConnectionId) {
        if let Some(handle) = self.conns.remove(&conn) {
            handle.reader.abort();
            info!(conn = ?conn, "Connection dropped locally");
        }
        if !self.hosting && self.conns.is_empty() {
            self.running = false;
        }
    }

    /// Stops accepting and closes every connection.
    pub fn shutdown(&mut self) {
        if let Some(task) = self.accept_task.take() {
            task.abort();
        }
        for (_, handle) in std::mem::take(&mut self.conns) {
            handle.reader.abort();
        }
        self.running = false;
    }
}

impl Drop for Peer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Transport for Peer {
    fn is_hosting(&self) -> bool {
        self.hosting
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.conns.keys().copied().collect()
    }

    fn send_frame(&mut self, conn: ConnectionId, frame: Bytes) {
        match self.conns.get(&conn) {
            Some(handle) => {
                let _ = handle.tx.send(frame);
            }
            None => debug!(conn = ?conn, "Send to unknown connection dropped"),
        }
    }
}

/// In-process transport that records every frame it is asked to send.
///
/// Drives host and client logic without sockets.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    hosting: bool,
    conns: BTreeSet<ConnectionId>,
    sent: Vec<(ConnectionId, Bytes)>,
}

impl MemoryTransport {
    pub fn host() -> Self {
        Self {
            hosting: true,
            ..Default::default()
        }
    }

    /// A client transport already connected to the host.
    pub fn client() -> Self {
        let mut t = Self::default();
        t.conns.insert(ConnectionId::HOST);
        t
    }

    pub fn open(&mut self, conn: ConnectionId) {
        self.conns.insert(conn);
    }

    pub fn close(&mut self, conn: ConnectionId) {
        self.conns.remove(&conn);
    }

    /// Takes every frame sent so far.
    pub fn take_sent(&mut self) -> Vec<(ConnectionId, Bytes)> {
        std::mem::take(&mut self.sent)
    }
}

impl Transport for MemoryTransport {
    fn is_hosting(&self) -> bool {
        self.hosting
    }

    fn connections(&self) -> Vec<ConnectionId> {
        self.conns.iter().copied().collect()
    }

    fn send_frame(&mut self, conn: ConnectionId, frame: Bytes) {
        if self.conns.contains(&conn) {
            self.sent.push((conn, frame));
        }
    }
}
