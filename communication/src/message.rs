//! Wire types exchanged over the message bus.

use serde::{Deserialize, Serialize};

/// A directed signal delivered to a vertex, optionally naming the sender and the edge it
/// travelled along.
///
/// Signals are values, not references: they must round-trip through the bus intact, which is
/// why `Id` and `Signal` both carry the [`crate::data::ExchangeData`] bound at the bus boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalMessage<Id, Signal> {
    /// The vertex that emitted the signal, if the algorithm cares to track it.
    pub source_id: Option<Id>,
    /// The vertex the signal is addressed to.
    pub target_id: Id,
    /// The edge the signal notionally travelled along, if any.
    pub edge_id: Option<Id>,
    /// The algorithm-defined payload.
    pub payload: Signal,
}

impl<Id, Signal> SignalMessage<Id, Signal> {
    /// Builds a new signal message.
    pub fn new(source_id: Option<Id>, target_id: Id, edge_id: Option<Id>, payload: Signal) -> Self {
        SignalMessage { source_id, target_id, edge_id, payload }
    }
}

/// A small, serializable set of built-in commands a coordinator (or peer worker) may ask a
/// worker to run.
///
/// A request can carry a function-like command, but arbitrary closures cannot cross a process
/// boundary, so distributed coordination is expressed as this closed enum instead. Graph
/// construction calls that need an arbitrary closure (e.g. `GraphEditor::modify_graph`) are
/// dispatched locally within the owning worker's process — see `DESIGN.md` for the grounding of
/// this split.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command<Id> {
    /// Drain `toSignal` entirely.
    SignalStep,
    /// Drain `toCollect` entirely; the reply carries whether `toSignal` is now empty.
    CollectStep,
    /// Move a `Paused` worker to `Running`.
    Start,
    /// Move a `Running` worker to `Paused` at the next opportunity.
    Pause,
    /// Re-test threshold gates for every owned vertex.
    RecalculateScores,
    /// Re-test threshold gates for a single vertex.
    RecalculateScoresFor(Id),
    /// Record an incoming-edge for bookkeeping at the target's owning worker.
    AddIncomingEdge { source_id: Id, target_id: Id },
    /// Remove a previously recorded incoming-edge record.
    RemoveIncomingEdge { source_id: Id, target_id: Id },
    /// Causes the worker to run `VertexStore::clean_up` and exit its event loop.
    PoisonPill,
}

/// A reply to a [`Command`], sent back only when the request asked for one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Reply {
    /// Acknowledges a command with no interesting payload.
    Ack,
    /// The `CollectStep` reply: whether `toSignal` is now empty.
    CollectStepResult { to_signal_is_empty: bool },
}

/// Status of one worker, as reported to its hosting [`crate::bus`] node sink and, eventually,
/// the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    /// Index of the reporting worker, `0..numberOfWorkers`.
    pub worker_id: usize,
    /// True once the worker has an empty mailbox and empty work queues.
    pub is_idle: bool,
    /// True while the worker is paused.
    pub is_paused: bool,
    /// Total messages sent by this worker since startup.
    pub messages_sent: u64,
    /// Total messages received by this worker since startup.
    pub messages_received: u64,
}

/// Breakdown of messages sent by a node, by destination class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentMessagesStats {
    /// Messages sent to workers (on this node or others).
    pub to_workers: u64,
    /// Messages sent to other nodes' aggregators.
    pub to_nodes: u64,
    /// Messages sent to the coordinator.
    pub to_coordinator: u64,
    /// Messages sent to any other destination class.
    pub to_others: u64,
}

/// Aggregated status of one node, emitted once all of its workers are idle or on heartbeat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeStatus {
    /// Index of the reporting node.
    pub node_id: usize,
    /// Messages sent, broken down by destination class.
    pub sent: SentMessagesStats,
    /// Total messages received by workers hosted on this node.
    pub messages_received: u64,
}

/// Broadcast by the coordinator on every heartbeat interval, carrying a snapshot of the global
/// in-flight message count used for throttling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Nanoseconds since the coordinator's start-of-execution clock.
    pub timestamp_nanos: u64,
    /// `totalMessagesSent - totalMessagesReceived` as last observed by the coordinator.
    pub global_inbox_size: i64,
}

/// Announces that a node has finished bootstrapping and is ready for worker creation, per the
/// node registration protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeReady {
    /// Index of the node that is ready.
    pub node_id: usize,
}

/// The envelope type that actually travels across an `mpsc` channel or TCP connection.
///
/// `Mutation` is intentionally absent here: arbitrary vertex construction/mutation closures are
/// delivered directly within a process (see [`crate::bus::MessageBus::send_local_mutation`])
/// rather than through this serializable envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Envelope<Id, Signal> {
    /// A signal destined for `toCollect` at the owning worker.
    Signal(SignalMessage<Id, Signal>),
    /// Several signals bound for the same worker, delivered as one envelope.
    ///
    /// Produced by [`crate::bulk::BulkSender`], which batches outgoing signals per destination and
    /// flushes once a configured batch size is reached, to amortize cross-node overhead on chatty
    /// graphs. Delivery remains at-most-once per signal: the batch is just a carrier, not a
    /// change to the signal/collect contract.
    SignalBatch(Vec<SignalMessage<Id, Signal>>),
    /// A control command, optionally expecting a [`Reply`].
    Request { command: Command<Id>, reply_to: Option<usize>, reply: bool },
    /// A command's reply, addressed back to the requester by a correlation id.
    Reply { correlation_id: usize, reply: Reply },
    /// A worker announcing a status change or heartbeat response.
    WorkerStatus(WorkerStatus),
    /// A node announcing an aggregated status.
    NodeStatus(NodeStatus),
    /// The coordinator's periodic heartbeat, broadcast to every worker.
    Heartbeat(Heartbeat),
    /// A node announcing it has finished bootstrapping.
    NodeReady(NodeReady),
}
