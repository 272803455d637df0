//! Deployment bootstrap: turns a [`Configuration`] into a running set of worker-side
//! [`MessageBus`] handles, joined through [`WorkerGuards`].

use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::bus::{split_duplex, Destination, MessageBus, RemoteEnvelope};
use crate::counters::Counters;
use crate::data::ExchangeData;
use crate::message::Envelope;
use crate::network::{accept_peers, connect_peers, NetworkConnection};

/// How a computation's workers are laid out across threads, processes, and machines.
///
/// Three deployment shapes, generalized to a `deploymentDescriptor` vocabulary where `"local"`
/// and `"tcp"` map to `Thread`/`Process` and `Cluster` respectively.
#[derive(Debug, Clone)]
pub enum Configuration {
    /// A single worker, no threads spawned beyond the caller.
    Thread,
    /// `worker_count` workers sharing one process, communicating over local channels only.
    Process(usize),
    /// A multi-node deployment. `addresses[process_index]` is this node's own listening address;
    /// the remaining entries are the peers to connect to.
    Cluster {
        /// Workers to run on this node.
        threads: usize,
        /// This node's index into `addresses`.
        process: usize,
        /// Listening address of every node, including this one, in rank order.
        addresses: Vec<String>,
    },
}

#[cfg(feature = "getopts")]
impl Configuration {
    /// Builds a [`Configuration`] by parsing command-line-style arguments, most commonly
    /// `std::env::args().skip(1)`.
    ///
    /// `-w`/`--threads` sets the per-process worker count, `-p`/`--process` this process's index,
    /// `-n`/`--processes` the total process count, and `-h`/`--hostfile` a file whose lines are
    /// `processes` listening addresses in rank order; with no hostfile, addresses default to
    /// `localhost:2101`, `localhost:2102`, ... A process count above `1` yields `Cluster`; a
    /// thread count above `1` with one process yields `Process`; otherwise `Thread`.
    pub fn from_args<I: Iterator<Item = String>>(args: I) -> Result<Configuration, String> {
        let mut opts = getopts::Options::new();
        opts.optopt("w", "threads", "number of per-process worker threads", "NUM");
        opts.optopt("p", "process", "index of this process", "IDX");
        opts.optopt("n", "processes", "number of processes", "NUM");
        opts.optopt("h", "hostfile", "text file whose lines are process addresses", "FILE");

        let matches = opts.parse(args).map_err(|err| format!("{err}"))?;

        let threads: usize = matches.opt_str("w").map(|v| v.parse()).transpose().map_err(|err| format!("{err}"))?.unwrap_or(1);
        let process: usize = matches.opt_str("p").map(|v| v.parse()).transpose().map_err(|err| format!("{err}"))?.unwrap_or(0);
        let processes: usize = matches.opt_str("n").map(|v| v.parse()).transpose().map_err(|err| format!("{err}"))?.unwrap_or(1);

        if process >= processes {
            return Err(format!("process index {process} out of range for {processes} processes"));
        }

        if processes > 1 {
            let addresses = if let Some(hostfile) = matches.opt_str("h") {
                let contents = std::fs::read_to_string(&hostfile).map_err(|err| format!("failed to read {hostfile}: {err}"))?;
                let addresses: Vec<String> = contents.lines().map(str::to_string).collect();
                if addresses.len() < processes {
                    return Err(format!("{hostfile} names {} addresses, need {processes}", addresses.len()));
                }
                addresses
            } else {
                (0..processes).map(|index| format!("localhost:{}", 2101 + index)).collect()
            };
            Ok(Configuration::Cluster { threads, process, addresses })
        } else if threads > 1 {
            Ok(Configuration::Process(threads))
        } else {
            Ok(Configuration::Thread)
        }
    }
}

impl Configuration {
    /// Total number of workers across the whole deployment.
    pub fn total_workers(&self) -> usize {
        match self {
            Configuration::Thread => 1,
            Configuration::Process(n) => *n,
            Configuration::Cluster { threads, addresses, .. } => threads * addresses.len(),
        }
    }

    /// Index of the node this process hosts: always `0` outside of `Cluster`.
    pub fn node_id(&self) -> usize {
        match self {
            Configuration::Thread | Configuration::Process(_) => 0,
            Configuration::Cluster { process, .. } => *process,
        }
    }

    /// Whether this process is the one hosting the coordinator and the synchronous-ask driver,
    /// by convention node `0`.
    pub fn hosts_driver(&self) -> bool {
        self.node_id() == 0
    }
}

/// The handles returned by [`try_build`]: one join handle per spawned worker thread.
///
/// Dropping it without calling [`WorkerGuards::join`] never panics, but the calling thread should
/// normally join to propagate a worker panic as an `Err` rather than losing it silently.
pub struct WorkerGuards<T> {
    handles: Vec<JoinHandle<Result<T, String>>>,
}

impl<T> WorkerGuards<T> {
    /// Blocks until every worker thread exits, returning one result per thread in spawn order.
    pub fn join(self) -> Vec<Result<T, String>> {
        self.handles
            .into_iter()
            .map(|handle| handle.join().unwrap_or_else(|_| Err("worker thread panicked".to_string())))
            .collect()
    }
}

/// A worker's view of the bus: the routing table used to reach everyone else, plus the receiving
/// end of its own mailbox.
pub struct WorkerChannels<Id, Signal> {
    /// Routes sends to any worker, node, the coordinator, or the synchronous-ask driver.
    pub bus: MessageBus<Id, Signal>,
    /// Envelopes addressed to this worker.
    pub mailbox: Receiver<Envelope<Id, Signal>>,
    /// Index of the node this worker is hosted on.
    pub node_id: usize,
}

/// Everything `try_build`'s caller must supply beyond the worker-to-worker topology itself: the
/// mailboxes of the three process-level roles hosted outside any individual worker thread.
///
/// `driver_reply_sender` is a reserved "mailbox" at worker id `total_workers` (one past the last
/// real worker): a synchronous driver (`crate::execute` in the `core` crate) registers itself
/// under this id so that a worker's `Envelope::Reply`, which is always addressed back to a worker
/// id, can reach it without the bus needing a fourth kind of destination.
pub struct ProcessChannels<Id, Signal> {
    /// This process's own node aggregator mailbox; every local worker can reach it directly.
    pub node_sender: Sender<Envelope<Id, Signal>>,
    /// The coordinator's mailbox, if this process hosts it (by convention, node 0).
    pub coordinator_sender: Option<Sender<Envelope<Id, Signal>>>,
    /// The synchronous-ask driver's reply mailbox, if this process hosts it (node 0).
    pub driver_reply_sender: Option<Sender<Envelope<Id, Signal>>>,
}

/// Bootstraps `config`, invoking `func` once per local worker with that worker's global index,
/// the total worker count, and its [`WorkerChannels`].
///
/// For `Thread` and `Process`, all workers share this OS process and talk over local channels.
/// For `Cluster`, this node first exchanges TCP connections with every peer named in `addresses`
/// (node 0 accepts, every other node connects), then spawns one reader thread per peer link
/// before handing each local worker its channels.
pub fn try_build<Id, Signal, T, F>(
    config: Configuration,
    process_channels: ProcessChannels<Id, Signal>,
    func: F,
) -> Result<(MessageBus<Id, Signal>, WorkerGuards<T>), String>
where
    Id: ExchangeData,
    Signal: ExchangeData,
    T: Send + 'static,
    F: Fn(usize, usize, WorkerChannels<Id, Signal>) -> T + Send + Sync + 'static,
{
    let counters = Counters::new();
    let func = Arc::new(func);

    match config {
        Configuration::Thread => spawn_local_workers(1, 0, 0, process_channels, counters, func),
        Configuration::Process(worker_count) => {
            spawn_local_workers(worker_count, 0, 0, process_channels, counters, func)
        }
        Configuration::Cluster { threads, process, addresses } => {
            spawn_cluster_workers(threads, process, addresses, process_channels, counters, func)
        }
    }
}

/// Builds `worker_count` fully cross-wired buses sharing this one process, each with its own
/// mailbox, and spawns one thread per worker.
///
/// Every worker's bus carries a sender into every worker's mailbox (including its own), so any
/// worker can address any other purely through `std::sync::mpsc`, with no network involved.
fn spawn_local_workers<Id, Signal, T, F>(
    worker_count: usize,
    base_index: usize,
    node_id: usize,
    process_channels: ProcessChannels<Id, Signal>,
    counters: Arc<Counters>,
    func: Arc<F>,
) -> Result<(MessageBus<Id, Signal>, WorkerGuards<T>), String>
where
    Id: ExchangeData,
    Signal: ExchangeData,
    T: Send + 'static,
    F: Fn(usize, usize, WorkerChannels<Id, Signal>) -> T + Send + Sync + 'static,
{
    let ProcessChannels { node_sender, coordinator_sender, driver_reply_sender } = process_channels;
    let driver_reply_id = base_index + worker_count;

    let mut senders = Vec::with_capacity(worker_count);
    let mut mailboxes = Vec::with_capacity(worker_count);
    for _ in 0..worker_count {
        let (sender, receiver) = channel();
        senders.push(sender);
        mailboxes.push(receiver);
    }

    // One extra bus, registered identically to every worker's, reserved for this process's own
    // node/coordinator/driver actors: they live outside any individual worker thread but still
    // need a routing table to reach workers.
    let mut buses: Vec<MessageBus<Id, Signal>> =
        (0..=worker_count).map(|_| MessageBus::new(counters.clone())).collect();
    for bus in buses.iter_mut() {
        for (peer, sender) in senders.iter().enumerate() {
            bus.insert_worker_sender(base_index + peer, sender.clone());
        }
        bus.insert_node_sender(node_id, node_sender.clone());
        if let Some(sender) = &coordinator_sender {
            bus.insert_coordinator_sender(sender.clone());
        }
        if let Some(sender) = &driver_reply_sender {
            bus.insert_worker_sender(driver_reply_id, sender.clone());
        }
    }
    let process_bus = buses.pop().expect("at least the reserved process bus is present");

    let mut handles = Vec::with_capacity(worker_count);
    for (offset, (bus, mailbox)) in buses.into_iter().zip(mailboxes).enumerate() {
        let index = base_index + offset;
        let func = func.clone();
        let channels = WorkerChannels { bus, mailbox, node_id };
        let handle = std::thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || Ok(func(index, worker_count, channels)))
            .map_err(|err| format!("failed to spawn worker {index}: {err}"))?;
        handles.push(handle);
    }

    Ok((process_bus, WorkerGuards { handles }))
}

fn spawn_cluster_workers<Id, Signal, T, F>(
    threads: usize,
    process: usize,
    addresses: Vec<String>,
    process_channels: ProcessChannels<Id, Signal>,
    counters: Arc<Counters>,
    func: Arc<F>,
) -> Result<(MessageBus<Id, Signal>, WorkerGuards<T>), String>
where
    Id: ExchangeData,
    Signal: ExchangeData,
    T: Send + 'static,
    F: Fn(usize, usize, WorkerChannels<Id, Signal>) -> T + Send + Sync + 'static,
{
    let ProcessChannels { node_sender, coordinator_sender, driver_reply_sender } = process_channels;
    let total = threads * addresses.len();
    let base_index = process * threads;
    let driver_reply_id = total;

    // Local cross-wiring among this node's own threads, exactly as in the single-process case.
    let mut local_senders = Vec::with_capacity(threads);
    let mut mailboxes = Vec::with_capacity(threads);
    for _ in 0..threads {
        let (sender, receiver) = channel();
        local_senders.push(sender);
        mailboxes.push(receiver);
    }
    // One extra bus, registered identically to every worker's, reserved for this process's own
    // node/coordinator/driver actors.
    let mut buses: Vec<MessageBus<Id, Signal>> = (0..=threads).map(|_| MessageBus::new(counters.clone())).collect();
    for bus in buses.iter_mut() {
        for (peer, sender) in local_senders.iter().enumerate() {
            bus.insert_worker_sender(base_index + peer, sender.clone());
        }
        bus.insert_node_sender(process, node_sender.clone());
        if process == 0 {
            let sender = coordinator_sender
                .clone()
                .expect("the process hosting the coordinator must supply coordinator_sender");
            bus.insert_coordinator_sender(sender);
            let reply_sender = driver_reply_sender
                .clone()
                .expect("the process hosting the driver must supply driver_reply_sender");
            bus.insert_worker_sender(driver_reply_id, reply_sender);
        }
    }

    // Remote wiring: one TCP connection per peer node, shared by every local worker's bus. Each
    // connection also carries a background reader whose frames are demultiplexed by
    // `RemoteEnvelope::destination` below, since a node's own workers, node aggregator, and
    // (for node 0) the coordinator and driver all share the single stream to a given peer.
    let streams = connect_cluster(process, &addresses)?;
    for (peer_process, stream) in streams {
        let (connection, inbound): (Arc<NetworkConnection<RemoteEnvelope<Id, Signal>>>, _) =
            split_duplex(stream).map_err(|err| format!("failed to frame peer connection: {err}"))?;
        for local_bus in buses.iter_mut() {
            for remote_thread in 0..threads {
                let remote_worker_id = peer_process * threads + remote_thread;
                local_bus.register_remote_worker(remote_worker_id, connection.clone());
            }
            local_bus.register_remote_node(peer_process, connection.clone());
            if peer_process == 0 && process != 0 {
                local_bus.register_remote_coordinator(connection.clone());
                local_bus.register_remote_worker(driver_reply_id, connection.clone());
            }
        }
        spawn_inbound_demux(
            inbound,
            process,
            base_index,
            threads,
            driver_reply_id,
            local_senders.clone(),
            node_sender.clone(),
            coordinator_sender.clone(),
            driver_reply_sender.clone(),
        );
    }

    let process_bus = buses.pop().expect("at least the reserved process bus is present");

    let mut handles = Vec::with_capacity(threads);
    for (offset, (bus, mailbox)) in buses.into_iter().zip(mailboxes).enumerate() {
        let index = base_index + offset;
        let func = func.clone();
        let channels = WorkerChannels { bus, mailbox, node_id: process };
        let handle = std::thread::Builder::new()
            .name(format!("worker-{index}"))
            .spawn(move || Ok(func(index, total, channels)))
            .map_err(|err| format!("failed to spawn worker {index}: {err}"))?;
        handles.push(handle);
    }

    Ok((process_bus, WorkerGuards { handles }))
}

/// Spawns the thread that drains one peer connection's inbound frames and forwards each to the
/// local mailbox its [`Destination`] names, recomputing nothing: a peer only ever addresses
/// frames meant for us, so this is pure demultiplexing by destination kind.
#[allow(clippy::too_many_arguments)]
fn spawn_inbound_demux<Id, Signal>(
    inbound: Receiver<RemoteEnvelope<Id, Signal>>,
    process: usize,
    base_index: usize,
    threads: usize,
    driver_reply_id: usize,
    local_senders: Vec<Sender<Envelope<Id, Signal>>>,
    node_sender: Sender<Envelope<Id, Signal>>,
    coordinator_sender: Option<Sender<Envelope<Id, Signal>>>,
    driver_reply_sender: Option<Sender<Envelope<Id, Signal>>>,
) where
    Id: ExchangeData,
    Signal: ExchangeData,
{
    std::thread::spawn(move || {
        while let Ok(remote) = inbound.recv() {
            let RemoteEnvelope { destination, envelope } = remote;
            let delivered = match destination {
                Destination::Worker(id) if id == driver_reply_id && process == 0 => driver_reply_sender
                    .as_ref()
                    .map(|sender| sender.send(envelope).is_ok())
                    .unwrap_or(false),
                Destination::Worker(id) if (base_index..base_index + threads).contains(&id) => {
                    local_senders[id - base_index].send(envelope).is_ok()
                }
                Destination::Node(id) if id == process => node_sender.send(envelope).is_ok(),
                Destination::Coordinator if process == 0 => coordinator_sender
                    .as_ref()
                    .map(|sender| sender.send(envelope).is_ok())
                    .unwrap_or(false),
                _ => false,
            };
            if !delivered {
                break;
            }
        }
    });
}

fn connect_cluster(process: usize, addresses: &[String]) -> Result<Vec<(usize, TcpStream)>, String> {
    let mut streams = Vec::new();
    if process == 0 {
        let listener = TcpListener::bind(&addresses[0]).map_err(|err| format!("bind failed: {err}"))?;
        let peers = accept_peers(&listener, addresses.len() - 1).map_err(|err| format!("accept failed: {err}"))?;
        for (offset, stream) in peers.into_iter().enumerate() {
            streams.push((offset + 1, stream));
        }
    } else {
        let listener = TcpListener::bind(&addresses[process]).map_err(|err| format!("bind failed: {err}"))?;
        let connected = connect_peers(&addresses[..1]).map_err(|err| format!("connect failed: {err}"))?;
        streams.push((0, connected.into_iter().next().expect("exactly one address requested")));
        drop(listener);
    }
    Ok(streams)
}
