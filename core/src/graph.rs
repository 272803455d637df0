//! The user-facing graph construction and control surface, and the configuration types that
//! shape a deployment.

use std::any::Any;
use std::path::PathBuf;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sc_communication::{Command, Destination, Envelope, ExchangeData, MessageBus, Reply, SignalMessage, VertexToWorkerMapper};

use crate::coordinator::{requires_superstep_loop, Coordinator, TerminationReason};

/// A vertex-to-worker assignment erased to a plain function, so [`GraphEditor`] stays generic
/// only over `Id`, `V` and `Signal` — not over the concrete mapper type, which vertex
/// implementations never need to name.
pub type WorkerForFn<Id> = Arc<dyn Fn(&Id, usize) -> usize + Send + Sync>;

/// Wraps a concrete [`VertexToWorkerMapper`] as a [`WorkerForFn`].
pub fn erase_mapper<Id, M>(mapper: Arc<M>) -> WorkerForFn<Id>
where
    Id: 'static,
    M: VertexToWorkerMapper<Id>,
{
    Arc::new(move |id, worker_count| mapper.worker_for(id, worker_count))
}
use sc_logging::{Level, LogMessage};

use crate::mutation::{AggregationOperation, Mutation};
use crate::vertex::Edge;

/// How signal/collect supersteps are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Coordinator-driven barriers: signal, then collect, repeated until converged.
    Synchronous,
    /// Workers run continuously; the coordinator polls idleness and batches status forwarding.
    OptimizedAsynchronous,
    /// Workers run continuously with no coordinator batching optimizations.
    PureAsynchronous,
    /// Like `PureAsynchronous`, but the coordinator never stops polling between convergence
    /// checks, suited to long-lived reactive graphs.
    ContinuousAsynchronous,
    /// Execution is driven entirely by external calls into the `GraphEditor`; the coordinator
    /// performs no autonomous scheduling.
    Interactive,
}

/// Execution-time thresholds and limits.
#[derive(Debug, Clone)]
pub struct ExecutionConfiguration<C> {
    /// Scheduling discipline for this run.
    pub execution_mode: ExecutionMode,
    /// Vertices with `scoreSignal <= signal_threshold` are skipped on signal step.
    pub signal_threshold: f64,
    /// Vertices with `scoreCollect <= collect_threshold` are skipped on collect step.
    pub collect_threshold: f64,
    /// Hard wall-clock limit for this execution.
    pub time_limit: Option<Duration>,
    /// Hard limit on synchronous supersteps.
    pub steps_limit: Option<u64>,
    /// A user condition checked alongside idleness; when it reports satisfied, execution stops
    /// with `TerminationReason::GlobalConstraintMet`.
    pub global_termination_condition: Option<C>,
}

impl<C> Default for ExecutionConfiguration<C> {
    fn default() -> Self {
        ExecutionConfiguration {
            execution_mode: ExecutionMode::OptimizedAsynchronous,
            signal_threshold: 0.001,
            collect_threshold: 0.0,
            time_limit: None,
            steps_limit: None,
            global_termination_condition: None,
        }
    }
}

/// Graph builder configuration. Not every option is meaningful to this core engine: a
/// status website (`console_enabled`) and Akka-specific dispatcher/compression knobs are
/// OUT OF SCOPE collaborators and are carried here only so deployment descriptors from the
/// original configuration surface still parse; the core ignores them.
pub struct GraphBuilderConfiguration<Id, Signal> {
    /// Enables an external status website; the core does not implement one.
    pub console_enabled: bool,
    /// Minimum severity surfaced to `logger`.
    pub logging_level: Level,
    /// Receives every log message at or above `logging_level`.
    pub logger: Option<Arc<dyn Fn(LogMessage) + Send + Sync>>,
    /// Interval at which workers publish a `WorkerStatus` even with no state change. Must be set
    /// explicitly; there is no "never" sentinel.
    pub status_update_interval: Option<Duration>,
    /// Provisioner used to bring up remote nodes before worker creation.
    pub node_provisioner: Option<Arc<dyn NodeProvisioner<Id>>>,
    /// Average per-worker in-flight message budget before throttling engages.
    pub throttle_inbox_threshold_per_worker: u64,
    /// Maximum acceptable coordinator-heartbeat age before throttling engages.
    pub throttle_worker_queue_threshold_in_millis: u64,
    /// Invoked once per buffered signal whose target vertex is absent at collect time. Defaults
    /// to a silent drop.
    pub undeliverable_signal_handler: Option<Arc<dyn Fn(Id, Option<Id>, Signal) + Send + Sync>>,
}

impl<Id, Signal> Default for GraphBuilderConfiguration<Id, Signal> {
    fn default() -> Self {
        GraphBuilderConfiguration {
            console_enabled: false,
            logging_level: Level::Info,
            logger: None,
            status_update_interval: None,
            node_provisioner: None,
            throttle_inbox_threshold_per_worker: 1_000,
            throttle_worker_queue_threshold_in_millis: 500,
            undeliverable_signal_handler: None,
        }
    }
}

/// Describes how a computation should be provisioned across nodes.
#[derive(Debug, Clone)]
pub struct DeploymentDescriptor {
    /// Name of the algorithm to run; purely descriptive for this core (algorithms are OUT OF
    /// SCOPE collaborators).
    pub algorithm: String,
    /// Free-form algorithm parameters.
    pub algorithm_parameters: std::collections::HashMap<String, String>,
    /// Memory budget per node, in megabytes.
    pub memory_per_node_mb: u32,
    /// Number of nodes requested.
    pub number_of_nodes: u32,
    /// Files to stage onto each node before execution.
    pub copy_files: Vec<PathBuf>,
    /// `"local"` and `"tcp"` are executed directly by [`crate::execute`]; any other value is
    /// routed to `node_provisioner`, which this core does not implement (YARN/SSH provisioning
    /// is an OUT OF SCOPE collaborator).
    pub cluster_type: String,
}

impl Default for DeploymentDescriptor {
    fn default() -> Self {
        DeploymentDescriptor {
            algorithm: String::new(),
            algorithm_parameters: std::collections::HashMap::new(),
            memory_per_node_mb: 512,
            number_of_nodes: 1,
            copy_files: Vec::new(),
            cluster_type: "local".to_string(),
        }
    }
}

/// Brings up remote nodes, then signals readiness by counting `NodeReady` announcements.
///
/// An out-of-scope collaborator (concrete YARN/SSH provisioning is not part of this
/// core); the core only defines the contract a provisioner must satisfy and drives it through
/// the node registration protocol.
pub trait NodeProvisioner<Id>: Send + Sync {
    /// Requests that `node_count` nodes be brought up, given this deployment descriptor.
    fn provision(&self, deployment: &DeploymentDescriptor) -> Result<(), String>;

    /// Called once every node has announced `NodeReady`; implementations typically trigger
    /// worker creation on every node in deterministic id order.
    fn on_all_nodes_ready(&self, node_count: usize) {
        let _ = node_count;
    }
}

/// Interval used by `GraphEditor::await_idle`'s and `execute`'s asynchronous polling.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// State letting a [`GraphEditor`] drive its own execution from inside `build_graph`, present
/// only on the editor handed to the process that hosts the coordinator (node 0).
struct ExecutionDriver<Id, Signal> {
    coordinator: Arc<Coordinator<Id, Signal>>,
    driver_reply_id: usize,
    driver_reply_receiver: Mutex<Receiver<Envelope<Id, Signal>>>,
}

/// Drains `receiver` until `total` [`Reply`] envelopes have been collected, discarding any other
/// envelope that lands in the same mailbox (a heartbeat, most commonly, since the driver-reply
/// pseudo-worker id is registered on the same bus every real worker id is).
fn collect_replies<Id, Signal>(receiver: &Receiver<Envelope<Id, Signal>>, total: usize) -> Vec<Reply> {
    let mut replies = Vec::with_capacity(total);
    while replies.len() < total {
        match receiver.recv() {
            Ok(Envelope::Reply { reply, .. }) => replies.push(reply),
            Ok(_) => continue,
            Err(_) => break,
        }
    }
    replies
}

/// Sends `command` to every worker `0..total_workers`, requesting a reply addressed to
/// `driver_reply_id`, then blocks for all of them.
///
/// Addresses workers directly by index rather than through `MessageBus::broadcast_workers`: that
/// helper would also hit the driver-reply pseudo-worker slot registered on this same bus.
fn ask<Id: ExchangeData, Signal: ExchangeData>(
    bus: &MessageBus<Id, Signal>,
    total_workers: usize,
    driver_reply_id: usize,
    driver_reply_receiver: &Receiver<Envelope<Id, Signal>>,
    command: Command<Id>,
) -> Vec<Reply> {
    for worker_id in 0..total_workers {
        let _ = bus.send(
            Destination::Worker(worker_id),
            Envelope::Request { command: command.clone(), reply_to: Some(driver_reply_id), reply: true },
        );
    }
    collect_replies(driver_reply_receiver, total_workers)
}

/// Blocks until every worker reports convergence, the global termination condition is met, or
/// `time_limit` elapses, for the asynchronous execution-mode family.
fn poll_until_terminated<Id, Signal, C>(
    coordinator: &Coordinator<Id, Signal>,
    time_limit: Option<Duration>,
    global_termination_condition: &Option<C>,
    check_global_condition: impl Fn(&C) -> bool,
    poll_interval: Duration,
) -> TerminationReason
where
    Id: ExchangeData,
    Signal: ExchangeData,
{
    let start = std::time::Instant::now();
    loop {
        if coordinator.is_converged() {
            return TerminationReason::Converged;
        }
        if let Some(condition) = global_termination_condition {
            if check_global_condition(condition) {
                return TerminationReason::GlobalConstraintMet;
            }
        }
        if let Some(limit) = time_limit {
            if start.elapsed() >= limit {
                return TerminationReason::TimeLimitReached;
            }
        }
        std::thread::sleep(poll_interval);
    }
}

/// The interface algorithms use to build and drive a graph computation.
///
/// One editor is cloned cheaply per caller (vertex callback, driver thread, ...); `sendSignal`
/// crosses the process boundary through the bus, while graph construction and aggregation stay
/// local to the process hosting the target worker, since they carry non-serializable vertex
/// values and closures (see [`crate::mutation`]).
///
/// Only the editor handed to `build_graph` on the node hosting the coordinator carries a driver
/// handle; `await_idle`/`execute`/`shutdown` are no-ops (`execute` returns `None`) on every other
/// editor, including the per-vertex editor passed to `execute_signal_operation`/
/// `execute_collect_operation`.
pub struct GraphEditor<Id, V, Signal> {
    bus: Arc<MessageBus<Id, Signal>>,
    mapper: WorkerForFn<Id>,
    worker_count: usize,
    mutation_senders: Arc<Vec<Sender<Mutation<Id, V, Signal>>>>,
    driver: Option<Arc<ExecutionDriver<Id, Signal>>>,
}

impl<Id, V, Signal> Clone for GraphEditor<Id, V, Signal> {
    fn clone(&self) -> Self {
        GraphEditor {
            bus: self.bus.clone(),
            mapper: self.mapper.clone(),
            worker_count: self.worker_count,
            mutation_senders: self.mutation_senders.clone(),
            driver: self.driver.clone(),
        }
    }
}

impl<Id, V, Signal> GraphEditor<Id, V, Signal>
where
    Id: ExchangeData + std::hash::Hash + Eq,
    Signal: ExchangeData,
{
    /// Builds an editor over an already-wired bus and mutation channels, one sender per worker
    /// in global worker-index order.
    pub fn new(
        bus: Arc<MessageBus<Id, Signal>>,
        mapper: WorkerForFn<Id>,
        worker_count: usize,
        mutation_senders: Arc<Vec<Sender<Mutation<Id, V, Signal>>>>,
    ) -> Self {
        GraphEditor { bus, mapper, worker_count, mutation_senders, driver: None }
    }

    /// Attaches a driver handle, letting this editor's `await_idle`/`execute`/`shutdown` actually
    /// drive execution. Used only by `crate::execute` when wiring the top-level editor on the
    /// node that hosts the coordinator.
    pub(crate) fn with_driver(
        bus: Arc<MessageBus<Id, Signal>>,
        mapper: WorkerForFn<Id>,
        worker_count: usize,
        mutation_senders: Arc<Vec<Sender<Mutation<Id, V, Signal>>>>,
        coordinator: Arc<Coordinator<Id, Signal>>,
        driver_reply_id: usize,
        driver_reply_receiver: Receiver<Envelope<Id, Signal>>,
    ) -> Self {
        GraphEditor {
            bus,
            mapper,
            worker_count,
            mutation_senders,
            driver: Some(Arc::new(ExecutionDriver {
                coordinator,
                driver_reply_id,
                driver_reply_receiver: Mutex::new(driver_reply_receiver),
            })),
        }
    }

    fn worker_for(&self, id: &Id) -> usize {
        (self.mapper)(id, self.worker_count)
    }

    /// Routes a signal to `target_id`'s owning worker.
    pub fn send_signal(&self, payload: Signal, target_id: Id, source_id: Option<Id>) -> std::io::Result<()> {
        let worker_id = self.worker_for(&target_id);
        let message = SignalMessage::new(source_id, target_id, None, payload);
        self.bus.send(Destination::Worker(worker_id), sc_communication::Envelope::Signal(message))
    }

    /// Submits `vertex` for insertion on its owning worker.
    pub fn add_vertex(&self, vertex: V, id: &Id) {
        self.dispatch(id, Mutation::AddVertex(vertex));
    }

    /// Submits a removal of `id` on its owning worker.
    pub fn remove_vertex(&self, id: Id) {
        let worker_id = self.worker_for(&id);
        self.send_mutation(worker_id, Mutation::RemoveVertex(id));
    }

    /// Submits an outgoing edge addition; the edge is created on its source vertex's worker.
    pub fn add_edge(&self, edge: Edge<Id>) {
        self.dispatch(&edge.source_id.clone(), Mutation::AddEdge(edge));
    }

    /// Submits an outgoing edge removal.
    pub fn remove_edge(&self, source_id: Id, target_id: Id) {
        let worker_id = self.worker_for(&source_id);
        self.send_mutation(worker_id, Mutation::RemoveEdge { source_id, target_id });
    }

    /// Runs `mutator` against the store of `on_worker`, or the worker hosting this process's
    /// first shard if unspecified.
    pub fn modify_graph(&self, mutator: Box<dyn FnOnce(&mut crate::store::VertexStore<Id, V, Signal>) + Send>, on_worker: Option<usize>) {
        let worker_id = on_worker.unwrap_or(0);
        self.send_mutation(worker_id, Mutation::Modify(mutator));
    }

    /// Runs `f` against every vertex on every worker known to this process.
    pub fn foreach_vertex(&self, f: Arc<dyn Fn(&Id, &V) + Send + Sync>) {
        for worker_id in 0..self.mutation_senders.len() {
            self.send_mutation(worker_id, Mutation::ForEachVertex(f.clone()));
        }
    }

    /// Folds `op` over every vertex known to this process, combining partial per-worker results
    /// with `op.combine`.
    pub fn aggregate<Op>(&self, op: Op) -> Op::Result
    where
        Op: AggregationOperation<Id, V> + Clone,
        Op::Result: 'static,
    {
        let mut acc = op.neutral_element();
        for worker_id in 0..self.mutation_senders.len() {
            let (reply_tx, reply_rx) = channel::<Box<dyn Any + Send>>();
            let op = op.clone();
            let boxed_fn: Box<dyn FnOnce(&crate::store::VertexStore<Id, V, Signal>) -> Box<dyn Any + Send> + Send> =
                Box::new(move |store| Box::new(crate::mutation::run_aggregate(&op, store)) as Box<dyn Any + Send>);
            self.send_mutation(worker_id, Mutation::Aggregate(boxed_fn, reply_tx));
            if let Ok(boxed_result) = reply_rx.recv() {
                if let Ok(partial) = boxed_result.downcast::<Op::Result>() {
                    acc = op.combine(acc, *partial);
                }
            }
        }
        acc
    }

    /// Blocks until the coordinator reports global convergence: every worker idle and
    /// `Σ messagesSent == Σ messagesReceived`. A no-op on an editor with no driver handle.
    pub fn await_idle(&self) {
        if let Some(driver) = &self.driver {
            while !driver.coordinator.is_converged() {
                std::thread::sleep(POLL_INTERVAL);
            }
        }
    }

    /// Drives one execution round under `execution_configuration`, blocking until it reaches a
    /// [`TerminationReason`]. Returns `None` on an editor with no driver handle.
    ///
    /// `Synchronous` mode runs barrier-separated signal/collect supersteps until every worker
    /// reports an empty `toSignal`; every other mode starts the workers running and polls for
    /// convergence, the time limit, or the global termination condition, whichever comes first.
    pub fn execute<C>(&self, execution_configuration: &ExecutionConfiguration<C>) -> Option<TerminationReason>
    where
        C: Fn() -> bool,
    {
        let driver = self.driver.as_ref()?;
        if requires_superstep_loop(execution_configuration.execution_mode) {
            let receiver = driver.driver_reply_receiver.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            Some(driver.coordinator.run_synchronous(execution_configuration.steps_limit, |command| {
                ask(&self.bus, self.worker_count, driver.driver_reply_id, &receiver, command)
            }))
        } else {
            for worker_id in 0..self.worker_count {
                let _ = self.bus.send(
                    Destination::Worker(worker_id),
                    Envelope::Request { command: Command::Start, reply_to: None, reply: false },
                );
            }
            let check_global_condition = |condition: &C| condition();
            Some(poll_until_terminated(
                &driver.coordinator,
                execution_configuration.time_limit,
                &execution_configuration.global_termination_condition,
                check_global_condition,
                POLL_INTERVAL,
            ))
        }
    }

    /// Sends a `PoisonPill` to every worker, so each runs `VertexStore::clean_up` and exits.
    pub fn shutdown(&self) {
        for worker_id in 0..self.worker_count {
            let _ = self.bus.send(
                Destination::Worker(worker_id),
                Envelope::Request { command: Command::PoisonPill, reply_to: None, reply: false },
            );
        }
    }

    fn dispatch(&self, id: &Id, mutation: Mutation<Id, V, Signal>) {
        let worker_id = self.worker_for(id);
        self.send_mutation(worker_id, mutation);
    }

    fn send_mutation(&self, worker_id: usize, mutation: Mutation<Id, V, Signal>) {
        if let Some(sender) = self.mutation_senders.get(worker_id) {
            let _ = sender.send(mutation);
        }
    }
}
