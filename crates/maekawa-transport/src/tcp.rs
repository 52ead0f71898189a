//! TCP transport.
//!
//! Node `i` listens on `host:(base_port + i)`. Outbound traffic to each peer
//! uses one cached stream, opened on first send. Writes to a peer are
//! serialized by that peer's lock, so frames leave in send order and TCP
//! keeps them in order.
//!
//! A connection carries one peer's traffic. The sender of its first message
//! identifies the peer, and every later delivery on that connection is
//! reported as coming from that peer, whatever sender the message claims.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use maekawa_core::{Message, NodeId};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, trace, warn};

use crate::codec::MessageCodec;
use crate::error::{Result, TransportError};
use crate::{Delivery, Handler, Transport};

type Link = FramedWrite<TcpStream, MessageCodec>;

/// TCP transport configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    /// Identity of this endpoint.
    pub node: NodeId,
    /// Address to listen on.
    pub listen: SocketAddr,
    /// Endpoint of every node, indexed by identity.
    pub peers: Vec<SocketAddr>,
    /// Connection attempts per send before giving up on a peer.
    pub connect_attempts: u32,
    /// Pause between connection attempts.
    pub connect_backoff: Duration,
}

impl TcpConfig {
    /// Endpoints at `host:(base_port + id)` for a population of `num_nodes`.
    pub fn for_cluster(node: NodeId, host: IpAddr, base_port: u16, num_nodes: u32) -> Result<Self> {
        let peers = (0..num_nodes)
            .map(|i| endpoint(host, base_port, NodeId(i)).ok_or(TransportError::UnknownPeer(NodeId(i))))
            .collect::<Result<Vec<_>>>()?;
        let listen = *peers
            .get(node.index())
            .ok_or(TransportError::UnknownPeer(node))?;

        Ok(Self {
            node,
            listen,
            peers,
            connect_attempts: 50,
            connect_backoff: Duration::from_millis(100),
        })
    }

    /// Cluster endpoints on 127.0.0.1.
    pub fn localhost(node: NodeId, num_nodes: u32, base_port: u16) -> Result<Self> {
        Self::for_cluster(node, IpAddr::V4(Ipv4Addr::LOCALHOST), base_port, num_nodes)
    }

    #[must_use]
    pub fn with_connect_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.connect_attempts = attempts;
        self.connect_backoff = backoff;
        self
    }
}

/// Endpoint of `node`: `host:(base_port + id)`, if the port fits.
pub fn endpoint(host: IpAddr, base_port: u16, node: NodeId) -> Option<SocketAddr> {
    let offset = u16::try_from(node.0).ok()?;
    let port = base_port.checked_add(offset)?;
    Some(SocketAddr::new(host, port))
}

struct Inner {
    config: TcpConfig,
    local_addr: SocketAddr,
    /// Taken when the receive handler is registered.
    listener: Mutex<Option<TcpListener>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
    links: Vec<tokio::sync::Mutex<Option<Link>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(task) = self.accept_task.get_mut().ok().and_then(Option::take) {
            task.abort();
        }
    }
}

/// TCP implementation of [`Transport`].
#[derive(Clone)]
pub struct TcpTransport {
    inner: Arc<Inner>,
}

impl TcpTransport {
    /// Bind the listener. Inbound connections queue until
    /// [`on_receive`](Transport::on_receive) starts accepting them.
    pub async fn bind(config: TcpConfig) -> Result<Self> {
        let listener = bind_listener(config.listen)?;
        let local_addr = listener.local_addr()?;
        info!(node = %config.node, addr = %local_addr, peers = config.peers.len(), "TCP transport bound");

        let links = config
            .peers
            .iter()
            .map(|_| tokio::sync::Mutex::new(None))
            .collect();

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                local_addr,
                listener: Mutex::new(Some(listener)),
                accept_task: Mutex::new(None),
                links,
            }),
        })
    }

    /// Address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    async fn connect(&self, to: NodeId, addr: SocketAddr) -> Result<Link> {
        let config = &self.inner.config;
        let attempts = config.connect_attempts.max(1);

        for attempt in 1..=attempts {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    debug!(node = %config.node, peer = %to, addr = %addr, attempt, "Connected to peer");
                    return Ok(FramedWrite::new(stream, MessageCodec::new()));
                }
                Err(e) => {
                    trace!(node = %config.node, peer = %to, attempt, error = %e, "Connect failed");
                    if attempt < attempts {
                        tokio::time::sleep(config.connect_backoff).await;
                    }
                }
            }
        }

        warn!(node = %config.node, peer = %to, addr = %addr, attempts, "Peer unreachable");
        Err(TransportError::Unreachable(to))
    }
}

impl Transport for TcpTransport {
    fn local_node(&self) -> NodeId {
        self.inner.config.node
    }

    fn on_receive(&self, handler: Handler) -> Result<()> {
        let listener = self
            .inner
            .listener
            .lock()
            .map_err(|_| TransportError::Closed)?
            .take()
            .ok_or(TransportError::HandlerAlreadyRegistered)?;

        let task = tokio::spawn(accept_loop(listener, self.inner.config.node, handler));
        *self.inner.accept_task.lock().map_err(|_| TransportError::Closed)? = Some(task);
        Ok(())
    }

    async fn send(&self, to: NodeId, message: Message) -> Result<()> {
        let addr = *self
            .inner
            .config
            .peers
            .get(to.index())
            .ok_or(TransportError::UnknownPeer(to))?;

        let mut link = self.inner.links[to.index()].lock().await;
        if link.is_none() {
            *link = Some(self.connect(to, addr).await?);
        }
        let sink = link.as_mut().ok_or(TransportError::Closed)?;

        match sink.send(message).await {
            Ok(()) => {}
            // Rejected before any byte was written; the connection is intact.
            Err(e @ (TransportError::Codec(_) | TransportError::FrameTooLarge(_))) => return Err(e),
            Err(e) => {
                warn!(node = %self.inner.config.node, peer = %to, error = %e, "Send failed, dropping connection");
                *link = None;
                return Err(TransportError::Unreachable(to));
            }
        }

        trace!(node = %self.inner.config.node, peer = %to, message = %message, "Sent");
        Ok(())
    }
}

/// Listener with `SO_REUSEADDR`, so a restarted node can rebind its port.
fn bind_listener(addr: SocketAddr) -> Result<TcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;
    socket.set_nonblocking(true)?;

    let std_listener: std::net::TcpListener = socket.into();
    Ok(TcpListener::from_std(std_listener)?)
}

async fn accept_loop(listener: TcpListener, node: NodeId, handler: Handler) {
    // Dropping the set (when this task is aborted) aborts every reader.
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(node = %node, peer_addr = %addr, "Accepted connection");
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!(node = %node, error = %e, "set_nodelay failed");
                    }
                    readers.spawn(read_loop(stream, addr, node, handler.clone()));
                }
                Err(e) => warn!(node = %node, error = %e, "Accept failed"),
            },
            Some(_) = readers.join_next(), if !readers.is_empty() => {}
        }
    }
}

async fn read_loop(stream: TcpStream, addr: SocketAddr, node: NodeId, handler: Handler) {
    let mut frames = FramedRead::new(stream, MessageCodec::new());
    let mut peer: Option<NodeId> = None;

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(Ok(message)) => {
                let from = *peer.get_or_insert_with(|| {
                    debug!(node = %node, peer = %message.sender(), peer_addr = %addr, "Identified peer");
                    message.sender()
                });
                handler(Delivery { from, message });
            }
            Ok(Err(e)) => {
                warn!(node = %node, peer_addr = %addr, error = %e, "Discarding malformed message")
            }
            Err(e) => {
                warn!(node = %node, peer_addr = %addr, error = %e, "Dropping connection");
                return;
            }
        }
    }
    debug!(node = %node, peer_addr = %addr, "Peer closed connection");
}
