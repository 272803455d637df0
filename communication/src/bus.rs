//! Routes envelopes to workers, node aggregators, and the coordinator.

use std::collections::HashMap;
use std::net::TcpStream;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::counters::Counters;
use crate::data::ExchangeData;
use crate::message::{Envelope, SentMessagesStats};
use crate::network::NetworkConnection;

/// A routable target for an envelope: a worker, a node's aggregator sink, or the coordinator.
///
/// Carried alongside every envelope sent over a remote [`NetworkConnection`] so the receiving
/// node can demultiplex to the right local sink without re-deriving a vertex-to-worker mapping
/// it has no way to know about at this layer; see [`RemoteEnvelope`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Destination {
    /// A worker by its global index, `0..numberOfWorkers`.
    Worker(usize),
    /// A node's aggregator sink, by node index.
    Node(usize),
    /// The coordinator.
    Coordinator,
}

/// Wire wrapper placed around every [`Envelope`] sent over a [`NetworkConnection`].
///
/// A remote peer's reader thread has no routing table of its own: `destination` is what lets it
/// hand the decoded envelope to the right local worker mailbox, node aggregator, or coordinator
/// without re-deriving a vertex-to-worker mapping it has no way to know about at this layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEnvelope<Id, Signal> {
    /// Where the inner envelope is ultimately addressed.
    pub destination: Destination,
    /// The envelope itself.
    pub envelope: Envelope<Id, Signal>,
}

enum Sink<Id, Signal> {
    Local(Sender<Envelope<Id, Signal>>),
    Remote(Arc<NetworkConnection<RemoteEnvelope<Id, Signal>>>),
}

impl<Id: ExchangeData, Signal: ExchangeData> Sink<Id, Signal> {
    fn send(&self, destination: Destination, envelope: Envelope<Id, Signal>) -> std::io::Result<()> {
        match self {
            Sink::Local(sender) => sender
                .send(envelope)
                .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "receiver dropped")),
            Sink::Remote(connection) => connection.send(&RemoteEnvelope { destination, envelope }),
        }
    }
}

/// The per-process routing table a worker, node actor, or coordinator uses to reach any other
/// participant, local or remote.
///
/// One `MessageBus` is built per OS process during `initialize::try_build` and then cloned (it is
/// cheap: an `Arc` around its sinks) into every locally spawned worker thread. Local delivery
/// goes through a plain `std::sync::mpsc` channel; delivery to a peer node's workers goes out
/// over that node's single [`NetworkConnection`] — one TCP stream per peer node, not one per
/// worker pair.
pub struct MessageBus<Id, Signal> {
    worker_sinks: HashMap<usize, Sink<Id, Signal>>,
    node_sinks: HashMap<usize, Sink<Id, Signal>>,
    coordinator_sink: Option<Sink<Id, Signal>>,
    counters: Arc<Counters>,
    stats: Mutex<SentMessagesStats>,
}

impl<Id: ExchangeData, Signal: ExchangeData> MessageBus<Id, Signal> {
    /// Builds an empty bus; sinks are registered as workers/nodes/the coordinator are spawned.
    pub fn new(counters: Arc<Counters>) -> Self {
        MessageBus {
            worker_sinks: HashMap::new(),
            node_sinks: HashMap::new(),
            coordinator_sink: None,
            counters,
            stats: Mutex::new(SentMessagesStats::default()),
        }
    }

    /// Registers a worker hosted in this process, returning the receiving end of its mailbox.
    pub fn register_local_worker(&mut self, worker_id: usize) -> Receiver<Envelope<Id, Signal>> {
        let (sender, receiver) = channel();
        self.worker_sinks.insert(worker_id, Sink::Local(sender));
        receiver
    }

    /// Routes sends to `worker_id` through an already-built channel sender.
    ///
    /// Used when the matching receiver was created elsewhere (e.g. `initialize::try_build` wires
    /// every worker in a process to every other worker's single shared mailbox channel before
    /// any bus is handed to its worker thread).
    pub fn insert_worker_sender(&mut self, worker_id: usize, sender: Sender<Envelope<Id, Signal>>) {
        self.worker_sinks.insert(worker_id, Sink::Local(sender));
    }

    /// Registers a worker hosted on a remote node, reachable through `connection`.
    pub fn register_remote_worker(&mut self, worker_id: usize, connection: Arc<NetworkConnection<RemoteEnvelope<Id, Signal>>>) {
        self.worker_sinks.insert(worker_id, Sink::Remote(connection));
    }

    /// Registers this process's own node aggregator.
    pub fn register_local_node(&mut self, node_id: usize) -> Receiver<Envelope<Id, Signal>> {
        let (sender, receiver) = channel();
        self.node_sinks.insert(node_id, Sink::Local(sender));
        receiver
    }

    /// Routes sends to `node_id`'s aggregator through an already-built channel sender.
    pub fn insert_node_sender(&mut self, node_id: usize, sender: Sender<Envelope<Id, Signal>>) {
        self.node_sinks.insert(node_id, Sink::Local(sender));
    }

    /// Registers a remote node's aggregator, reachable through `connection`.
    pub fn register_remote_node(&mut self, node_id: usize, connection: Arc<NetworkConnection<RemoteEnvelope<Id, Signal>>>) {
        self.node_sinks.insert(node_id, Sink::Remote(connection));
    }

    /// Registers the coordinator as local to this process.
    pub fn register_local_coordinator(&mut self) -> Receiver<Envelope<Id, Signal>> {
        let (sender, receiver) = channel();
        self.coordinator_sink = Some(Sink::Local(sender));
        receiver
    }

    /// Routes sends to the coordinator through an already-built channel sender.
    pub fn insert_coordinator_sender(&mut self, sender: Sender<Envelope<Id, Signal>>) {
        self.coordinator_sink = Some(Sink::Local(sender));
    }

    /// Registers a remote coordinator, reachable through `connection`.
    pub fn register_remote_coordinator(&mut self, connection: Arc<NetworkConnection<RemoteEnvelope<Id, Signal>>>) {
        self.coordinator_sink = Some(Sink::Remote(connection));
    }

    /// Routes `envelope` to `destination`, recording it in the send-side counters and
    /// per-destination-class statistics used for [`crate::message::NodeStatus`] reports.
    pub fn send(&self, destination: Destination, envelope: Envelope<Id, Signal>) -> std::io::Result<()> {
        let sink = match destination {
            Destination::Worker(id) => self.worker_sinks.get(&id),
            Destination::Node(id) => self.node_sinks.get(&id),
            Destination::Coordinator => self.coordinator_sink.as_ref(),
        };
        let sink = sink.ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, format!("no route to {destination:?}"))
        })?;
        sink.send(destination, envelope)?;
        self.counters.record_sent();
        let mut stats = self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match destination {
            Destination::Worker(_) => stats.to_workers += 1,
            Destination::Node(_) => stats.to_nodes += 1,
            Destination::Coordinator => stats.to_coordinator += 1,
        }
        Ok(())
    }

    /// Broadcasts `build` (invoked once per worker to allow per-recipient addressing) to every
    /// known worker.
    pub fn broadcast_workers(
        &self,
        mut build: impl FnMut(usize) -> Envelope<Id, Signal>,
    ) -> std::io::Result<()> {
        let ids: Vec<usize> = self.worker_sinks.keys().copied().collect();
        for id in ids {
            self.send(Destination::Worker(id), build(id))?;
        }
        Ok(())
    }

    /// Number of workers this bus can currently route to, local or remote.
    pub fn worker_count(&self) -> usize {
        self.worker_sinks.len()
    }

    /// A snapshot of messages sent so far, broken down by destination class.
    pub fn sent_stats(&self) -> SentMessagesStats {
        *self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Records that one message was received; called by whoever pulls an envelope off a mailbox.
    pub fn record_received(&self) {
        self.counters.record_received();
    }
}

/// Spawns a reader thread forwarding frames arriving on `stream` into a fresh local channel,
/// returning both the connection's write half and the channel's receive half.
///
/// Convenience used by `initialize::try_build` when wiring a `cluster` deployment: the same TCP
/// stream serves as both the outbound [`NetworkConnection`] and the source for an inbound reader
/// thread, since node-to-node links are full duplex.
pub fn split_duplex<T: serde::Serialize + serde::de::DeserializeOwned + Send + 'static>(
    stream: TcpStream,
) -> std::io::Result<(Arc<NetworkConnection<T>>, Receiver<T>)> {
    let reader_stream = stream.try_clone()?;
    let connection = Arc::new(NetworkConnection::new(stream)?);
    let (sender, receiver) = channel();
    NetworkConnection::<T>::spawn_reader(reader_stream, sender)?;
    Ok((connection, receiver))
}
