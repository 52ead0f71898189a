//! Per-node actor.
//!
//! One task owns a node's state machine. Deliveries from the transport,
//! self-addressed messages and local commands all go through a single
//! queue, so the state machine sees one event at a time.
//!
//! The task runs until every [`NodeHandle`] is dropped. A node keeps voting
//! for its quorum peers only while some handle to it is alive.

use std::future::Future;
use std::sync::Arc;

use maekawa_core::{Envelope, Node, NodeId, NodeStatus, Step};
use maekawa_transport::{Delivery, Handler, Transport};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};

enum Command {
    Acquire(oneshot::Sender<Result<()>>),
    Release(oneshot::Sender<Result<()>>),
    Status(oneshot::Sender<NodeStatus>),
}

enum Input {
    Deliver(Delivery),
    Command(Command),
}

/// Handle to a running node.
#[derive(Clone)]
pub struct NodeHandle {
    id: NodeId,
    inbox: mpsc::UnboundedSender<Input>,
}

impl NodeHandle {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Request the critical section and wait until this node is inside it.
    ///
    /// Fails with a protocol error if a request is already outstanding.
    pub async fn acquire(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Acquire(tx))?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    /// Leave the critical section. Fails if the node is not inside it.
    pub async fn release(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Release(tx))?;
        rx.await.map_err(|_| Error::Stopped)?
    }

    /// Run `action` inside the critical section.
    ///
    /// The critical section is released even if this future is dropped or
    /// `action` panics once it has been entered.
    pub async fn critical_section<F, Fut>(&self, action: F) -> Result<Fut::Output>
    where
        F: FnOnce() -> Fut,
        Fut: Future,
    {
        self.acquire().await?;
        let guard = ReleaseGuard {
            handle: self,
            armed: true,
        };
        let output = action().await;
        guard.disarm();
        self.release().await?;
        Ok(output)
    }

    /// Snapshot of the node's protocol state.
    pub async fn status(&self) -> Result<NodeStatus> {
        let (tx, rx) = oneshot::channel();
        self.submit(Command::Status(tx))?;
        rx.await.map_err(|_| Error::Stopped)
    }

    fn submit(&self, command: Command) -> Result<()> {
        self.inbox
            .send(Input::Command(command))
            .map_err(|_| Error::Stopped)
    }
}

/// Releases the critical section when dropped while armed.
struct ReleaseGuard<'a> {
    handle: &'a NodeHandle,
    armed: bool,
}

impl ReleaseGuard<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            warn!(node = %self.handle.id, "Critical section abandoned, releasing");
            let (tx, _) = oneshot::channel();
            let _ = self.handle.submit(Command::Release(tx));
        }
    }
}

/// Start node `transport.local_node()` of a population of `num_nodes`.
///
/// Registers the transport's receive handler and spawns the node task.
pub fn spawn_node<T: Transport>(num_nodes: u32, transport: T) -> Result<NodeHandle> {
    let id = transport.local_node();
    let node = Node::new(id, num_nodes)?;

    let (tx, rx) = mpsc::unbounded_channel();
    let inbound = tx.downgrade();
    let handler: Handler = Arc::new(move |delivery| {
        if let Some(inbox) = inbound.upgrade() {
            let _ = inbox.send(Input::Deliver(delivery));
        }
    });
    transport.on_receive(handler)?;

    info!(node = %id, num_nodes, quorum = ?node.quorum().members(), "Node started");

    let actor = Actor {
        node,
        transport,
        inbox: rx,
        loopback: tx.downgrade(),
        waiting: None,
    };
    tokio::spawn(actor.run());

    Ok(NodeHandle { id, inbox: tx })
}

struct Actor<T> {
    node: Node,
    transport: T,
    inbox: mpsc::UnboundedReceiver<Input>,
    loopback: mpsc::WeakUnboundedSender<Input>,
    /// Pending `acquire`, completed on critical-section entry.
    waiting: Option<oneshot::Sender<Result<()>>>,
}

impl<T: Transport> Actor<T> {
    async fn run(mut self) {
        while let Some(input) = self.inbox.recv().await {
            match input {
                Input::Deliver(delivery) => self.on_delivery(delivery).await,
                Input::Command(command) => self.on_command(command).await,
            }
        }
        debug!(node = %self.node.id(), "Node stopped");
    }

    async fn on_delivery(&mut self, Delivery { from, message }: Delivery) {
        let id = self.node.id();
        trace!(node = %id, from = %from, message = %message, "Received");

        if from != message.sender() {
            warn!(node = %id, from = %from, message = %message, "Sender mismatch, discarding");
            return;
        }

        match self.node.handle(message) {
            Ok(step) => self.apply(step).await,
            Err(e) => warn!(node = %id, from = %from, message = %message, error = %e, "Discarding message"),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Acquire(reply) => match self.node.request_critical_section() {
                Ok(step) => {
                    debug!(node = %self.node.id(), clock = self.node.clock(), "Requesting critical section");
                    self.waiting = Some(reply);
                    self.apply(step).await;
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            Command::Release(reply) => match self.node.exit_critical_section() {
                Ok(step) => {
                    info!(node = %self.node.id(), "Left critical section");
                    self.dispatch(step.outbox).await;
                    let _ = reply.send(Ok(()));
                }
                Err(e) => {
                    let _ = reply.send(Err(e.into()));
                }
            },
            Command::Status(reply) => {
                let _ = reply.send(self.node.status());
            }
        }
    }

    async fn apply(&mut self, step: Step) {
        self.dispatch(step.outbox).await;

        if step.entered_critical_section {
            let id = self.node.id();
            info!(node = %id, clock = self.node.clock(), "Entered critical section");

            let delivered = self
                .waiting
                .take()
                .is_some_and(|waiter| waiter.send(Ok(())).is_ok());
            if !delivered {
                // Nobody is waiting to run the critical section; give it back.
                warn!(node = %id, "Acquire abandoned, releasing");
                match self.node.exit_critical_section() {
                    Ok(step) => self.dispatch(step.outbox).await,
                    Err(e) => warn!(node = %id, error = %e, "Release failed"),
                }
            }
        }
    }

    async fn dispatch(&self, outbox: Vec<Envelope>) {
        let id = self.node.id();
        for Envelope { to, message } in outbox {
            if to == id {
                if let Some(inbox) = self.loopback.upgrade() {
                    let _ = inbox.send(Input::Deliver(Delivery { from: id, message }));
                }
                continue;
            }

            if let Err(e) = self.transport.send(to, message).await {
                warn!(node = %id, to = %to, message = %message, error = %e, "Send failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maekawa_core::{Message, MessageKind, Phase};
    use maekawa_transport::MemoryNetwork;
    use std::time::Duration;
    use tokio_test::assert_ok;

    fn spawn_all(num_nodes: u32) -> (MemoryNetwork, Vec<NodeHandle>) {
        let net = MemoryNetwork::new(num_nodes);
        let handles = (0..num_nodes)
            .map(|i| spawn_node(num_nodes, net.endpoint(NodeId(i)).unwrap()).unwrap())
            .collect();
        (net, handles)
    }

    #[tokio::test]
    async fn single_node_enters_via_loopback() {
        let (_net, handles) = spawn_all(1);
        let node = &handles[0];

        assert_ok!(node.acquire().await);
        assert_eq!(node.status().await.unwrap().phase, Phase::InCriticalSection);
        assert_ok!(node.release().await);

        let status = node.status().await.unwrap();
        assert_eq!(status.phase, Phase::Idle);
        assert_eq!(status.voted_for, None);
    }

    #[tokio::test]
    async fn acquire_twice_is_rejected() {
        let (_net, handles) = spawn_all(1);
        handles[0].acquire().await.unwrap();
        assert!(matches!(
            handles[0].acquire().await,
            Err(Error::Protocol(maekawa_core::Error::InvalidState { .. }))
        ));
    }

    #[tokio::test]
    async fn release_outside_critical_section_is_rejected() {
        let (_net, handles) = spawn_all(4);
        assert!(matches!(handles[2].release().await, Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn second_requester_waits_for_release() {
        let (_net, handles) = spawn_all(4);
        let (first, second) = (handles[0].clone(), handles[3].clone());

        first.acquire().await.unwrap();

        let waiter = tokio::spawn(async move { second.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        first.release().await.unwrap();
        let entered = tokio::time::timeout(Duration::from_secs(5), waiter).await;
        assert!(matches!(entered, Ok(Ok(Ok(())))));
        assert_eq!(
            handles[3].status().await.unwrap().phase,
            Phase::InCriticalSection
        );
    }

    #[tokio::test]
    async fn critical_section_runs_action_exclusively() {
        let (_net, handles) = spawn_all(9);
        let inside = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let tasks: Vec<_> = handles
            .iter()
            .cloned()
            .map(|handle| {
                let inside = Arc::clone(&inside);
                tokio::spawn(async move {
                    handle
                        .critical_section(move || async move {
                            use std::sync::atomic::Ordering::SeqCst;
                            let now = inside.fetch_add(1, SeqCst) + 1;
                            tokio::time::sleep(Duration::from_millis(2)).await;
                            inside.fetch_sub(1, SeqCst);
                            now
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            let occupancy = task.await.unwrap().unwrap();
            assert_eq!(occupancy, 1);
        }
    }

    #[tokio::test]
    async fn unreachable_member_leaves_request_pending() {
        let (net, handles) = spawn_all(4);
        // Node 0's quorum is {0, 1, 2}; cut it off from node 1.
        net.disconnect(NodeId(0), NodeId(1));

        let stuck = handles[0].clone();
        let waiter = tokio::spawn(async move { stuck.acquire().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        let status = handles[0].status().await.unwrap();
        assert_eq!(status.phase, Phase::Requesting);
        assert!(!status.grants.contains(&NodeId(1)));
        waiter.abort();
    }

    async fn wait_for_phase(handle: &NodeHandle, phase: Phase) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while handle.status().await.unwrap().phase != phase {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn dropped_critical_section_is_released() {
        let (_net, handles) = spawn_all(4);
        let holder = handles[0].clone();
        let task = tokio::spawn(async move {
            holder
                .critical_section(std::future::pending::<()>)
                .await
        });

        wait_for_phase(&handles[0], Phase::InCriticalSection).await;
        task.abort();
        assert!(task.await.unwrap_err().is_cancelled());

        assert_eq!(handles[0].status().await.unwrap().phase, Phase::Idle);
        let next = tokio::time::timeout(Duration::from_secs(5), handles[3].acquire()).await;
        assert!(matches!(next, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn panicking_action_releases() {
        let (_net, handles) = spawn_all(4);
        let holder = handles[1].clone();
        let task = tokio::spawn(async move {
            holder
                .critical_section(|| async { panic!("action failed") })
                .await
        });
        assert!(task.await.unwrap_err().is_panic());

        let status = handles[1].status().await.unwrap();
        assert_eq!(status.phase, Phase::Idle);
        let next = tokio::time::timeout(Duration::from_secs(5), handles[2].acquire()).await;
        assert!(matches!(next, Ok(Ok(()))));
    }

    #[tokio::test]
    async fn message_with_forged_sender_is_discarded() {
        let net = MemoryNetwork::new(4);
        let node = spawn_node(4, net.endpoint(NodeId(0)).unwrap()).unwrap();
        let peer = net.endpoint(NodeId(1)).unwrap();
        let (tx, mut replies) = mpsc::unbounded_channel();
        peer.on_receive(Arc::new(move |d| {
            let _ = tx.send(d);
        }))
        .unwrap();

        // Endpoint 1 claiming to be node 2, which is also in node 0's quorum.
        let forged = Message::new(MessageKind::Request, NodeId(2), 1);
        peer.send(NodeId(0), forged).await.unwrap();
        let status = node.status().await.unwrap();
        assert_eq!(status.voted_for, None);
        assert_eq!(status.clock, 0);

        let honest = Message::new(MessageKind::Request, NodeId(1), 1);
        peer.send(NodeId(0), honest).await.unwrap();
        let status = node.status().await.unwrap();
        assert_eq!(status.voted_for.map(|v| v.node), Some(NodeId(1)));
        assert_eq!(replies.recv().await.unwrap().message.kind(), MessageKind::Grant);
    }

    #[tokio::test]
    async fn stopped_node_reports_stopped() {
        let net = MemoryNetwork::new(1);
        let handle = spawn_node(1, net.endpoint(NodeId(0)).unwrap()).unwrap();
        let orphan = NodeHandle {
            id: handle.id(),
            inbox: {
                let (tx, rx) = mpsc::unbounded_channel();
                drop(rx);
                tx
            },
        };
        assert!(matches!(orphan.status().await, Err(Error::Stopped)));
        assert_ok!(handle.status().await);
    }
}
