//! Owns one vertex shard; runs signal/collect on scheduled vertices and processes its mailbox.

use std::collections::HashMap;
use std::hash::Hash;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sc_communication::{Command, Destination, Envelope, ExchangeData, MessageBus, Reply, VertexToWorkerMapper, WorkerStatus};
use sc_logging::{Level, Logger};

use crate::graph::{erase_mapper, GraphEditor};
use crate::logging::{ShutdownEvent, WorkerEvent};
use crate::mutation::Mutation;
use crate::store::VertexStore;
use crate::throttle::Throttle;
use crate::vertex::{Edge, Vertex};

/// How long the worker blocks on an empty mailbox before re-checking convergence.
pub const RECEIVE_TIMEOUT: Duration = Duration::from_millis(5);

/// The worker state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Initial state; no signal/collect work runs.
    Paused,
    /// Actively draining `toSignal`/`toCollect`.
    Running,
    /// `toSignal` and `toCollect` are both empty, but the mailbox may still hold messages.
    Converged,
    /// Converged with an empty mailbox; the worker is parked.
    Idle,
}

/// Per-worker counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct WorkerCounters {
    /// Messages received, including control requests.
    pub messages_received: u64,
    /// Messages sent, read from this worker's own `MessageBus` instance at snapshot time.
    pub messages_sent: u64,
    /// Successful signal operations executed.
    pub signal_operations_executed: u64,
    /// Successful collect operations executed.
    pub collect_operations_executed: u64,
    /// Vertices added to this worker's store.
    pub vertices_added: u64,
    /// Vertices removed from this worker's store.
    pub vertices_removed: u64,
    /// Outgoing edges added.
    pub edges_added: u64,
    /// Outgoing edges removed.
    pub edges_removed: u64,
    /// Synchronous `signalStep` invocations completed.
    pub signal_steps: u64,
    /// Synchronous `collectStep` invocations completed.
    pub collect_steps: u64,
}

type UndeliverableHandler<Id, Signal> = dyn Fn(Id, Option<Id>, Signal) + Send + Sync;

/// A single-threaded event-loop owner of a vertex shard.
pub struct Worker<Id, V, Signal, M> {
    worker_id: usize,
    node_id: usize,
    worker_count: usize,
    workers_per_node: usize,
    store: VertexStore<Id, V, Signal>,
    mailbox: Receiver<Envelope<Id, Signal>>,
    mutation_receiver: Receiver<Mutation<Id, V, Signal>>,
    bus: Arc<MessageBus<Id, Signal>>,
    mapper: Arc<M>,
    state: WorkerState,
    counters: WorkerCounters,
    signal_threshold: f64,
    collect_threshold: f64,
    incoming_edges: HashMap<Id, Vec<Id>>,
    undeliverable_signal_handler: Arc<UndeliverableHandler<Id, Signal>>,
    logger: Option<Logger<WorkerEvent>>,
    log_level: Level,
    throttle: Throttle,
    pending_start: bool,
    pending_pause: bool,
    status_update_interval: Option<Duration>,
    last_status_sent_at: Instant,
    alternate_signal_next: bool,
    reply_correlation: usize,
}

impl<Id, V, Signal, M> Worker<Id, V, Signal, M>
where
    Id: ExchangeData + Hash + Eq,
    Signal: ExchangeData,
    V: Vertex<Id, Signal>,
    M: VertexToWorkerMapper<Id>,
{
    /// Builds a worker. `mutation_receiver` is the local, non-serializable companion channel to
    /// `mailbox` used for graph construction and aggregation (see [`crate::mutation`]).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_id: usize,
        worker_count: usize,
        workers_per_node: usize,
        mailbox: Receiver<Envelope<Id, Signal>>,
        mutation_receiver: Receiver<Mutation<Id, V, Signal>>,
        bus: Arc<MessageBus<Id, Signal>>,
        mapper: Arc<M>,
        signal_threshold: f64,
        collect_threshold: f64,
        throttle: Throttle,
    ) -> Self {
        Worker {
            worker_id,
            node_id: worker_id / workers_per_node.max(1),
            worker_count,
            workers_per_node,
            store: VertexStore::new(),
            mailbox,
            mutation_receiver,
            bus,
            mapper,
            state: WorkerState::Paused,
            counters: WorkerCounters::default(),
            signal_threshold,
            collect_threshold,
            incoming_edges: HashMap::new(),
            undeliverable_signal_handler: Arc::new(|_target, _source, _signal| {}),
            logger: None,
            log_level: Level::Info,
            throttle,
            pending_start: false,
            pending_pause: false,
            status_update_interval: None,
            last_status_sent_at: Instant::now(),
            alternate_signal_next: true,
            reply_correlation: 0,
        }
    }

    /// Installs a handler invoked once per buffered signal that targets a vertex absent from
    /// this worker at collect time.
    pub fn set_undeliverable_signal_handler(&mut self, handler: Arc<UndeliverableHandler<Id, Signal>>) {
        self.undeliverable_signal_handler = handler;
    }

    /// Installs the stream this worker logs domain events to.
    pub fn set_logger(&mut self, logger: Logger<WorkerEvent>) {
        self.logger = Some(logger);
    }

    /// Sets the minimum severity this worker forwards to its logger.
    pub fn set_log_level(&mut self, level: Level) {
        self.log_level = level;
    }

    /// Sets the interval at which a `WorkerStatus` is published even with no idle-edge change.
    pub fn set_status_update_interval(&mut self, interval: Option<Duration>) {
        self.status_update_interval = interval;
    }

    fn log(&self, level: Level, event: WorkerEvent) {
        if level >= self.log_level {
            if let Some(logger) = &self.logger {
                logger.log(event);
            }
        }
    }

    fn graph_editor(&self) -> GraphEditor<Id, V, Signal> {
        // Vertices only ever need `send_signal` from inside a signal/collect call; graph
        // mutation during execution goes through the same mutation channel the worker itself
        // drains, so the editor is built with an empty sender table here and signals route
        // purely through the bus.
        GraphEditor::new(self.bus.clone(), erase_mapper(self.mapper.clone()), self.worker_count, Arc::new(Vec::new()))
    }

    fn is_converged(&self) -> bool {
        self.store.to_signal.is_empty() && self.store.to_collect.is_empty()
    }

    /// Counts and dispatches one already-received envelope. Returns `false` if a `PoisonPill`
    /// was received and the worker should exit its loop.
    fn dispatch_envelope(&mut self, envelope: Envelope<Id, Signal>) -> bool {
        // Heartbeats are internal: both the coordinator's send and this receipt are elided from
        // the conservation accounting, since a heartbeat is not a user-visible message and isn't
        // reflected in any worker's `messages_sent`. Counting it here without a matching
        // sent-side increment would leave `messagesReceivedByWorkers` growing forever and
        // convergence unreachable.
        if !matches!(envelope, Envelope::Heartbeat(_)) {
            self.counters.messages_received += 1;
            self.bus.record_received();
        }
        self.handle_envelope(envelope)
    }

    /// Runs the worker's event loop until a `PoisonPill` is received or the mailbox disconnects.
    /// Always runs `VertexStore::clean_up` on the way out, on every exit path including a
    /// vertex-callback panic caught inside the loop. Returns the final counter snapshot so the
    /// caller (typically `crate::execute`) can fold it into a deployment-wide summary.
    pub fn run(mut self) -> WorkerCounters {
        'outer: loop {
            match self.mailbox.recv_timeout(RECEIVE_TIMEOUT) {
                Ok(envelope) => {
                    if !self.dispatch_envelope(envelope) {
                        break;
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_converged() || self.state == WorkerState::Paused {
                        self.transition_state(if self.is_converged() && self.state != WorkerState::Paused {
                            WorkerState::Idle
                        } else {
                            self.state
                        });
                        self.maybe_publish_idle();
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }

            self.drain_mutations();
            if matches!(self.state, WorkerState::Converged | WorkerState::Idle) && !self.is_converged() {
                self.maybe_publish_busy();
                self.transition_state(WorkerState::Running);
            }
            self.apply_pending_start_pause();
            self.maybe_publish_status_update();

            // Opportunistic work loop: every iteration first gives any arrived envelope a
            // chance to be dispatched (`try_recv` is destructive, so a message it returns must
            // be handled immediately rather than merely used to decide whether to keep looping),
            // and only runs one unit of scheduled signal/collect work once the mailbox is
            // actually empty.
            while !self.is_converged() && self.state == WorkerState::Running {
                match self.mailbox.try_recv() {
                    Ok(envelope) => {
                        if !self.dispatch_envelope(envelope) {
                            break 'outer;
                        }
                        self.drain_mutations();
                        self.apply_pending_start_pause();
                        continue;
                    }
                    Err(std::sync::mpsc::TryRecvError::Empty) => {}
                    Err(std::sync::mpsc::TryRecvError::Disconnected) => break 'outer,
                }

                if self.alternate_signal_next {
                    self.run_one_signal();
                } else {
                    self.run_one_collect();
                }
                self.alternate_signal_next = !self.alternate_signal_next;
            }

            if self.state == WorkerState::Running && self.is_converged() {
                self.transition_state(WorkerState::Converged);
            }
        }

        self.store.clean_up();
        self.log(Level::Info, WorkerEvent::Shutdown(ShutdownEvent { worker_id: self.worker_id }));
        if let Some(logger) = &self.logger {
            logger.flush();
        }
        self.counters()
    }

    fn maybe_publish_idle(&mut self) {
        if self.state == WorkerState::Idle {
            self.log(Level::Info, WorkerEvent::IdleChanged { worker_id: self.worker_id, is_idle: true });
            let _ = self.publish_status();
        }
    }

    /// Reports the `isIdle: true -> false` edge before leaving `Idle`, so the hosting node's
    /// count of idle workers (and the coordinator's snapshot of this worker) doesn't go stale.
    /// Leaving `Converged` needs no report: that state was never itself published as idle.
    fn maybe_publish_busy(&mut self) {
        if self.state == WorkerState::Idle {
            self.log(Level::Info, WorkerEvent::IdleChanged { worker_id: self.worker_id, is_idle: false });
            let _ = self.publish_status();
        }
    }

    fn maybe_publish_status_update(&mut self) {
        if let Some(interval) = self.status_update_interval {
            if self.last_status_sent_at.elapsed() >= interval {
                let _ = self.publish_status();
            }
        }
    }

    fn transition_state(&mut self, next: WorkerState) {
        self.state = next;
    }

    /// Total messages sent by this worker, read straight off its own `MessageBus` instance
    /// rather than a separately maintained counter: every send this worker makes, whether a
    /// vertex-emitted signal through a fresh [`GraphEditor`] or a direct control reply, already
    /// passes through `self.bus.send`, which is the one place that can count correctly.
    fn messages_sent(&self) -> u64 {
        let sent = self.bus.sent_stats();
        sent.to_workers + sent.to_nodes + sent.to_coordinator + sent.to_others
    }

    fn publish_status(&mut self) -> std::io::Result<()> {
        self.last_status_sent_at = Instant::now();
        let status = WorkerStatus {
            worker_id: self.worker_id,
            is_idle: self.state == WorkerState::Idle,
            is_paused: self.state == WorkerState::Paused,
            messages_sent: self.messages_sent(),
            messages_received: self.counters.messages_received,
        };
        self.bus.send(Destination::Node(self.node_id), Envelope::WorkerStatus(status))
    }

    /// Processes one arrived envelope; returns `false` if the worker should exit its loop.
    fn handle_envelope(&mut self, envelope: Envelope<Id, Signal>) -> bool {
        match envelope {
            Envelope::Signal(message) => {
                self.store.to_collect.add_signal(message.target_id, message.payload);
                if self.state == WorkerState::Idle || self.state == WorkerState::Converged {
                    self.maybe_publish_busy();
                    self.transition_state(WorkerState::Running);
                }
                true
            }
            Envelope::SignalBatch(batch) => {
                for message in batch {
                    self.store.to_collect.add_signal(message.target_id, message.payload);
                }
                if self.state == WorkerState::Idle || self.state == WorkerState::Converged {
                    self.maybe_publish_busy();
                    self.transition_state(WorkerState::Running);
                }
                true
            }
            Envelope::Request { command, reply_to, reply } => {
                if matches!(&command, Command::PoisonPill) {
                    return false;
                }
                let outcome = self.run_command(command);
                if reply {
                    if let Some(reply_to) = reply_to {
                        let _ = self.bus.send(
                            Destination::Worker(reply_to),
                            Envelope::Reply { correlation_id: self.reply_correlation, reply: outcome },
                        );
                        self.reply_correlation += 1;
                    }
                }
                true
            }
            Envelope::Heartbeat(heartbeat) => {
                self.throttle.record_heartbeat(heartbeat);
                true
            }
            Envelope::WorkerStatus(_) | Envelope::NodeStatus(_) | Envelope::NodeReady(_) | Envelope::Reply { .. } => {
                self.log(Level::Warning, WorkerEvent::UnknownMessage { worker_id: self.worker_id });
                true
            }
        }
    }

    /// Runs a built-in [`Command`] on this worker, returning the reply payload if one was
    /// requested by the sender.
    fn run_command(&mut self, command: Command<Id>) -> Reply {
        match command {
            Command::SignalStep => {
                self.signal_step();
                Reply::Ack
            }
            Command::CollectStep => {
                let to_signal_is_empty = self.collect_step();
                Reply::CollectStepResult { to_signal_is_empty }
            }
            Command::Start => {
                self.pending_start = true;
                Reply::Ack
            }
            Command::Pause => {
                self.pending_pause = true;
                Reply::Ack
            }
            Command::RecalculateScores => {
                self.recalculate_scores();
                Reply::Ack
            }
            Command::RecalculateScoresFor(id) => {
                self.recalculate_scores_for(&id);
                Reply::Ack
            }
            Command::AddIncomingEdge { source_id, target_id } => {
                self.incoming_edges.entry(target_id).or_default().push(source_id);
                Reply::Ack
            }
            Command::RemoveIncomingEdge { source_id, target_id } => {
                if let Some(sources) = self.incoming_edges.get_mut(&target_id) {
                    sources.retain(|id| id != &source_id);
                }
                Reply::Ack
            }
            Command::PoisonPill => Reply::Ack,
        }
    }

    fn apply_pending_start_pause(&mut self) {
        if self.pending_pause {
            self.transition_state(WorkerState::Paused);
            self.pending_pause = false;
        } else if self.pending_start && self.state == WorkerState::Paused {
            self.transition_state(WorkerState::Running);
            self.pending_start = false;
        }
    }

    fn drain_mutations(&mut self) {
        while let Ok(mutation) = self.mutation_receiver.try_recv() {
            self.apply_mutation(mutation);
        }
    }

    fn apply_mutation(&mut self, mutation: Mutation<Id, V, Signal>) {
        match mutation {
            Mutation::AddVertex(mut vertex) => {
                let id = vertex.id().clone();
                let mut editor = self.graph_editor();
                vertex.after_initialization(&mut editor);
                if self.store.put(id, vertex) {
                    self.counters.vertices_added += 1;
                }
            }
            Mutation::RemoveVertex(id) => {
                if let Some(mut vertex) = self.store.remove(&id) {
                    let mut editor = self.graph_editor();
                    vertex.before_removal(&mut editor);
                    self.counters.vertices_removed += 1;
                } else {
                    self.log(Level::Warning, WorkerEvent::MissingVertexOnMutation { worker_id: self.worker_id });
                }
            }
            Mutation::AddEdge(edge) => self.add_outgoing_edge(edge),
            Mutation::RemoveEdge { source_id, target_id } => self.remove_outgoing_edge(source_id, target_id),
            Mutation::Modify(mutator) => mutator(&mut self.store),
            Mutation::ForEachVertex(f) => self.store.foreach(|id, vertex| f(id, vertex)),
            Mutation::Aggregate(run, reply_to) => {
                let result = run(&self.store);
                let _ = reply_to.send(result);
            }
        }
    }

    /// Adds an outgoing edge to its source vertex, re-scheduling the source for collect and
    /// signal, and notifies the target's owning worker so it can record an incoming-edge entry.
    fn add_outgoing_edge(&mut self, edge: Edge<Id>) {
        let Edge { source_id, target_id, .. } = edge.clone();
        let added = self.store.get_mut(&source_id).map(|vertex| vertex.add_outgoing_edge(edge)).unwrap_or(false);
        if added {
            self.counters.edges_added += 1;
            self.store.to_collect.add_vertex(source_id.clone());
            self.store.to_signal.add(source_id.clone());

            let target_worker = self.mapper.worker_for(&target_id, self.worker_count);
            let _ = self.bus.send(
                Destination::Worker(target_worker),
                Envelope::Request {
                    command: Command::AddIncomingEdge { source_id, target_id },
                    reply_to: None,
                    reply: false,
                },
            );
        } else {
            self.log(Level::Warning, WorkerEvent::MissingVertexOnMutation { worker_id: self.worker_id });
        }
    }

    fn remove_outgoing_edge(&mut self, source_id: Id, target_id: Id) {
        let removed = self
            .store
            .get_mut(&source_id)
            .map(|vertex| vertex.remove_outgoing_edge(&target_id))
            .unwrap_or(false);
        if removed {
            self.counters.edges_removed += 1;
            self.store.to_collect.add_vertex(source_id.clone());
            self.store.to_signal.add(source_id);

            let target_worker = self.mapper.worker_for(&target_id, self.worker_count);
            let _ = self.bus.send(
                Destination::Worker(target_worker),
                Envelope::Request {
                    command: Command::RemoveIncomingEdge { source_id: target_id.clone(), target_id },
                    reply_to: None,
                    reply: false,
                },
            );
        } else {
            self.log(Level::Warning, WorkerEvent::MissingVertexOnMutation { worker_id: self.worker_id });
        }
    }

    /// Drains `toSignal` entirely (the synchronous `signalStep`).
    pub fn signal_step(&mut self) {
        self.counters.signal_steps += 1;
        let mut store = std::mem::take(&mut self.store);
        let snapshot_len = store.to_signal.len();
        for _ in 0..snapshot_len {
            if let Some(id) = store.to_signal.pop_front() {
                self.run_signal_for_id(&mut store, id);
            }
        }
        self.store = store;
    }

    /// Runs one scheduled signal step, as used by the asynchronous mailbox loop.
    fn run_one_signal(&mut self) {
        let mut store = std::mem::take(&mut self.store);
        if let Some(id) = store.to_signal.pop_front() {
            self.run_signal_for_id(&mut store, id);
        }
        self.store = store;
    }

    fn run_signal_for_id(&mut self, store: &mut VertexStore<Id, V, Signal>, id: Id) {
        if self.throttle.should_throttle() {
            // Outgoing sends are suspended; re-schedule so the vertex is revisited once the
            // next heartbeat clears the backlog.
            store.to_signal.add(id);
            return;
        }
        let Some(vertex) = store.get_mut(&id) else { return };
        if vertex.score_signal() <= self.signal_threshold {
            return;
        }
        let mut editor = self.graph_editor();
        let outcome = catch_unwind(AssertUnwindSafe(|| vertex.execute_signal_operation(&mut editor)));
        match outcome {
            Ok(()) => {
                self.counters.signal_operations_executed += 1;
                store.update_state_of_vertex(&id);
            }
            Err(_) => {
                self.log(Level::Severe, WorkerEvent::VertexCallbackFailed { worker_id: self.worker_id, message: "signal".to_string() });
            }
        }
    }

    /// Drains `toCollect` entirely (the synchronous `collectStep`), returning whether
    /// `toSignal` is now empty.
    pub fn collect_step(&mut self) -> bool {
        self.counters.collect_steps += 1;
        let mut store = std::mem::take(&mut self.store);
        let worker_id = self.worker_id;
        let signal_threshold = self.signal_threshold;
        let collect_threshold = self.collect_threshold;
        let mut pending: Vec<(Id, Vec<Signal>)> = Vec::new();
        store.to_collect.foreach(|| false, |id, signals| pending.push((id, signals)));
        for (id, signals) in pending {
            self.run_collect_for(&mut store, id, signals, true, worker_id, signal_threshold, collect_threshold);
        }
        self.store = store;
        self.store.to_signal.is_empty()
    }

    /// Runs one scheduled collect entry, as used by the asynchronous mailbox loop. The caller
    /// (`run`'s main loop) re-checks the mailbox before invoking this again, so only a single
    /// entry is popped per call.
    fn run_one_collect(&mut self) {
        let mut store = std::mem::take(&mut self.store);
        if let Some((id, signals)) = store.to_collect.pop_front() {
            let worker_id = self.worker_id;
            let signal_threshold = self.signal_threshold;
            let collect_threshold = self.collect_threshold;
            self.run_collect_for(&mut store, id, signals, true, worker_id, signal_threshold, collect_threshold);
        }
        self.store = store;
    }

    #[allow(clippy::too_many_arguments)]
    fn run_collect_for(
        &mut self,
        store: &mut VertexStore<Id, V, Signal>,
        id: Id,
        signals: Vec<Signal>,
        add_to_signal: bool,
        worker_id: usize,
        signal_threshold: f64,
        collect_threshold: f64,
    ) {
        let Some(vertex) = store.get_mut(&id) else {
            for signal in signals {
                (self.undeliverable_signal_handler)(id.clone(), None, signal);
            }
            self.log(Level::Warning, WorkerEvent::UndeliverableSignal { worker_id });
            return;
        };
        if vertex.score_collect(&signals) <= collect_threshold {
            return;
        }
        let mut editor = self.graph_editor();
        let outcome = catch_unwind(AssertUnwindSafe(|| vertex.execute_collect_operation(&signals, &mut editor)));
        match outcome {
            Ok(()) => {
                self.counters.collect_operations_executed += 1;
                store.update_state_of_vertex(&id);
                if add_to_signal {
                    if let Some(vertex) = store.get(&id) {
                        if vertex.score_signal() > signal_threshold {
                            store.to_signal.add(id);
                        }
                    }
                }
            }
            Err(_) => {
                self.log(Level::Severe, WorkerEvent::VertexCallbackFailed { worker_id, message: "collect".to_string() });
            }
        }
    }

    /// Re-schedules every owned vertex into both `toSignal` and `toCollect` so threshold gates
    /// are re-tested.
    pub fn recalculate_scores(&mut self) {
        let ids: Vec<Id> = {
            let mut ids = Vec::new();
            self.store.foreach(|id, _| ids.push(id.clone()));
            ids
        };
        for id in ids {
            self.store.to_signal.add(id.clone());
            self.store.to_collect.add_vertex(id);
        }
    }

    /// Re-schedules one vertex into both queues.
    pub fn recalculate_scores_for(&mut self, id: &Id) {
        if self.store.contains(id) {
            self.store.to_signal.add(id.clone());
            self.store.to_collect.add_vertex(id.clone());
        }
    }

    /// A read-only snapshot of this worker's counters.
    pub fn counters(&self) -> WorkerCounters {
        WorkerCounters { messages_sent: self.messages_sent(), ..self.counters }
    }
}

/// Default worker-channel tuple returned by `initialize`-adjacent setup code.
pub type WorkerMutationChannel<Id, V, Signal> = (Sender<Mutation<Id, V, Signal>>, Receiver<Mutation<Id, V, Signal>>);
