//! Deterministic in-process simulation of a node population.
//!
//! Every ordered node pair gets a FIFO channel, which is exactly the delivery
//! guarantee the transport provides. At each step a seeded RNG picks one
//! enabled action:
//!
//! - deliver the head of some non-empty channel
//! - let an idle node with requests left issue a request
//! - let a node inside the critical section leave it
//!
//! Because critical-section exits compete with message deliveries, nodes
//! linger in the critical section while traffic flows, which is where a
//! broken vote hand-off would show up as two simultaneous occupants.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{error, trace};

use crate::error::Result;
use crate::message::{Envelope, Message};
use crate::node::{Node, Phase, Step};
use crate::NodeId;

/// Configuration for a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    /// Population size.
    pub num_nodes: u32,
    /// Critical-section entries each node performs.
    pub requests_per_node: u32,
    /// Seed for the scheduler.
    pub seed: u64,
    /// Give up after this many actions.
    pub max_steps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            num_nodes: 4,
            requests_per_node: 1,
            seed: 42,
            max_steps: 1_000_000,
        }
    }
}

/// Something that happened during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    Sent { from: NodeId, envelope: Envelope },
    Delivered { to: NodeId, message: Message },
    Entered { node: NodeId, step: usize },
    Exited { node: NodeId, step: usize },
}

/// Outcome of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimulationReport {
    /// Actions executed.
    pub steps: usize,
    /// Critical-section entries per node.
    pub entries: Vec<u32>,
    /// Entries that found another node already inside.
    pub violations: usize,
    /// Largest number of simultaneous occupants observed.
    pub max_concurrent: usize,
    /// Every request was served and the network drained.
    pub completed: bool,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    Deliver { from: NodeId, to: NodeId },
    Request(NodeId),
    Exit(NodeId),
}

/// A population of [`Node`]s wired together by FIFO channels.
pub struct Simulation {
    config: SimulationConfig,
    nodes: Vec<Node>,
    channels: BTreeMap<(NodeId, NodeId), VecDeque<Message>>,
    remaining: Vec<u32>,
    occupants: BTreeSet<NodeId>,
    events: Vec<SimEvent>,
    report: SimulationReport,
    rng: StdRng,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Result<Self> {
        let nodes = (0..config.num_nodes)
            .map(|i| Node::new(NodeId(i), config.num_nodes))
            .collect::<Result<Vec<_>>>()?;
        let n = nodes.len();

        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            remaining: vec![config.requests_per_node; n],
            report: SimulationReport {
                entries: vec![0; n],
                ..Default::default()
            },
            config,
            nodes,
            channels: BTreeMap::new(),
            occupants: BTreeSet::new(),
            events: Vec::new(),
        })
    }

    /// Build and run a simulation until it finishes or hits `max_steps`.
    pub fn run_with(config: SimulationConfig) -> Result<SimulationReport> {
        Self::new(config)?.run()
    }

    pub fn run(&mut self) -> Result<SimulationReport> {
        while self.report.steps < self.config.max_steps {
            if !self.step()? {
                break;
            }
        }
        self.report.completed = self.is_finished();
        Ok(self.report.clone())
    }

    /// Execute one randomly chosen action. Returns false when none is enabled.
    pub fn step(&mut self) -> Result<bool> {
        let actions = self.enabled_actions();
        if actions.is_empty() {
            return Ok(false);
        }
        let action = actions[self.rng.gen_range(0..actions.len())];
        self.report.steps += 1;

        match action {
            Action::Deliver { from, to } => {
                let Some(message) = self.channels.get_mut(&(from, to)).and_then(VecDeque::pop_front)
                else {
                    return Ok(true);
                };
                self.events.push(SimEvent::Delivered { to, message });
                let step = self.nodes[to.index()].handle(message)?;
                self.apply(to, step);
            }
            Action::Request(node) => {
                self.remaining[node.index()] -= 1;
                let step = self.nodes[node.index()].request_critical_section()?;
                self.apply(node, step);
            }
            Action::Exit(node) => {
                self.occupants.remove(&node);
                self.events.push(SimEvent::Exited {
                    node,
                    step: self.report.steps,
                });
                let step = self.nodes[node.index()].exit_critical_section()?;
                self.apply(node, step);
            }
        }
        Ok(true)
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn events(&self) -> &[SimEvent] {
        &self.events
    }

    /// Messages sent by `node`, in send order.
    pub fn sent_by(&self, node: NodeId) -> impl Iterator<Item = &Message> + '_ {
        self.events.iter().filter_map(move |event| match event {
            SimEvent::Sent { from, envelope } if *from == node => Some(&envelope.message),
            _ => None,
        })
    }

    /// No requests left, nobody inside, nothing in flight.
    pub fn is_finished(&self) -> bool {
        self.remaining.iter().all(|&r| r == 0)
            && self.occupants.is_empty()
            && self.channels.values().all(VecDeque::is_empty)
            && self.nodes.iter().all(|n| n.phase() == Phase::Idle)
    }

    fn enabled_actions(&self) -> Vec<Action> {
        let deliveries = self
            .channels
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(&(from, to), _)| Action::Deliver { from, to });

        let local = self.nodes.iter().filter_map(|node| match node.phase() {
            Phase::Idle if self.remaining[node.id().index()] > 0 => Some(Action::Request(node.id())),
            Phase::InCriticalSection => Some(Action::Exit(node.id())),
            _ => None,
        });

        deliveries.chain(local).collect()
    }

    fn apply(&mut self, node: NodeId, step: Step) {
        for envelope in step.outbox {
            trace!(from = %node, to = %envelope.to, message = %envelope.message, "Simulated send");
            self.channels
                .entry((node, envelope.to))
                .or_default()
                .push_back(envelope.message);
            self.events.push(SimEvent::Sent {
                from: node,
                envelope,
            });
        }

        if step.entered_critical_section {
            self.report.entries[node.index()] += 1;
            self.events.push(SimEvent::Entered {
                node,
                step: self.report.steps,
            });
            if !self.occupants.is_empty() {
                error!(node = %node, occupants = ?self.occupants, "Mutual exclusion violated");
                self.report.violations += 1;
            }
            self.occupants.insert(node);
            self.report.max_concurrent = self.report.max_concurrent.max(self.occupants.len());
        }
    }
}
