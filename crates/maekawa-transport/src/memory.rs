//! In-process transport.
//!
//! All endpoints share one hub. A send invokes the recipient's handler
//! directly, so per-pair order is the caller's send order. Links can be cut
//! and restored to exercise the unreachable-peer path.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use maekawa_core::{Message, NodeId};
use tracing::trace;

use crate::error::{Result, TransportError};
use crate::{Delivery, Handler, Transport};

struct Hub {
    num_nodes: u32,
    handlers: Vec<OnceLock<Handler>>,
    /// `links[from * n + to]`, true while the link is up.
    links: Vec<AtomicBool>,
}

impl Hub {
    fn link(&self, from: NodeId, to: NodeId) -> Option<&AtomicBool> {
        if from.0 >= self.num_nodes || to.0 >= self.num_nodes {
            return None;
        }
        self.links.get(from.index() * self.num_nodes as usize + to.index())
    }
}

/// A set of connected in-process endpoints.
#[derive(Clone)]
pub struct MemoryNetwork {
    hub: Arc<Hub>,
}

impl MemoryNetwork {
    pub fn new(num_nodes: u32) -> Self {
        let n = num_nodes as usize;
        Self {
            hub: Arc::new(Hub {
                num_nodes,
                handlers: (0..n).map(|_| OnceLock::new()).collect(),
                links: (0..n * n).map(|_| AtomicBool::new(true)).collect(),
            }),
        }
    }

    /// The endpoint for `node`.
    pub fn endpoint(&self, node: NodeId) -> Result<MemoryTransport> {
        if node.0 >= self.hub.num_nodes {
            return Err(TransportError::UnknownPeer(node));
        }
        Ok(MemoryTransport {
            node,
            hub: Arc::clone(&self.hub),
        })
    }

    /// Cut both directions between `a` and `b`.
    pub fn disconnect(&self, a: NodeId, b: NodeId) {
        self.set_link(a, b, false);
    }

    /// Restore both directions between `a` and `b`.
    pub fn reconnect(&self, a: NodeId, b: NodeId) {
        self.set_link(a, b, true);
    }

    fn set_link(&self, a: NodeId, b: NodeId, up: bool) {
        for (from, to) in [(a, b), (b, a)] {
            if let Some(link) = self.hub.link(from, to) {
                link.store(up, Ordering::SeqCst);
            }
        }
    }
}

/// One node's view of a [`MemoryNetwork`].
#[derive(Clone)]
pub struct MemoryTransport {
    node: NodeId,
    hub: Arc<Hub>,
}

impl Transport for MemoryTransport {
    fn local_node(&self) -> NodeId {
        self.node
    }

    fn on_receive(&self, handler: Handler) -> Result<()> {
        self.hub.handlers[self.node.index()]
            .set(handler)
            .map_err(|_| TransportError::HandlerAlreadyRegistered)
    }

    async fn send(&self, to: NodeId, message: Message) -> Result<()> {
        let link = self
            .hub
            .link(self.node, to)
            .ok_or(TransportError::UnknownPeer(to))?;
        if !link.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable(to));
        }

        let handler = self.hub.handlers[to.index()]
            .get()
            .ok_or(TransportError::Unreachable(to))?;

        trace!(from = %self.node, to = %to, message = %message, "Memory send");
        handler(Delivery {
            from: self.node,
            message,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maekawa_core::MessageKind;
    use std::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    fn recorder() -> (Handler, Arc<Mutex<Vec<Delivery>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handler: Handler = Arc::new(move |d| sink.lock().unwrap().push(d));
        (handler, seen)
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let net = MemoryNetwork::new(3);
        let a = net.endpoint(NodeId(0)).unwrap();
        let c = net.endpoint(NodeId(2)).unwrap();
        let (handler, seen) = recorder();
        c.on_receive(handler).unwrap();

        for ts in 1..=5 {
            assert_ok!(a.send(NodeId(2), Message::new(MessageKind::Request, NodeId(0), ts)).await);
        }

        let seen = seen.lock().unwrap();
        let stamps: Vec<_> = seen.iter().map(|d| d.message.timestamp()).collect();
        assert_eq!(stamps, vec![1, 2, 3, 4, 5]);
        assert!(seen.iter().all(|d| d.from == NodeId(0)));
    }

    #[tokio::test]
    async fn disconnected_link_is_unreachable_both_ways() {
        let net = MemoryNetwork::new(2);
        let a = net.endpoint(NodeId(0)).unwrap();
        let b = net.endpoint(NodeId(1)).unwrap();
        let (ha, _) = recorder();
        let (hb, seen_b) = recorder();
        a.on_receive(ha).unwrap();
        b.on_receive(hb).unwrap();

        net.disconnect(NodeId(0), NodeId(1));
        let msg = Message::new(MessageKind::Grant, NodeId(0), 1);
        assert!(matches!(
            a.send(NodeId(1), msg).await,
            Err(TransportError::Unreachable(NodeId(1)))
        ));
        assert_err!(b.send(NodeId(0), msg).await);

        net.reconnect(NodeId(0), NodeId(1));
        assert_ok!(a.send(NodeId(1), msg).await);
        assert_eq!(seen_b.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn send_without_handler_fails() {
        let net = MemoryNetwork::new(2);
        let a = net.endpoint(NodeId(0)).unwrap();
        let msg = Message::new(MessageKind::Release, NodeId(0), 3);
        assert!(matches!(
            a.send(NodeId(1), msg).await,
            Err(TransportError::Unreachable(NodeId(1)))
        ));
        assert!(matches!(
            a.send(NodeId(5), msg).await,
            Err(TransportError::UnknownPeer(NodeId(5)))
        ));
    }

    #[test]
    fn endpoint_bounds_and_single_handler() {
        let net = MemoryNetwork::new(2);
        assert!(net.endpoint(NodeId(2)).is_err());

        let a = net.endpoint(NodeId(0)).unwrap();
        let (first, _) = recorder();
        let (second, _) = recorder();
        assert!(a.on_receive(first).is_ok());
        assert!(matches!(
            a.on_receive(second),
            Err(TransportError::HandlerAlreadyRegistered)
        ));
    }
}
