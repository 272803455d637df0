//! Turns a deployment [`Configuration`] and an [`ExecutionConfiguration`] into running workers,
//! driving them to termination and returning a summary.
//!
//! One blocking call that validates its configuration up front, spawns the worker threads, and
//! joins them on the way out, folding any worker panic into the returned result rather than
//! losing it silently.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sc_communication::{Configuration, Envelope, ExchangeData, MessageBus, ProcessChannels, VertexToWorkerMapper, WorkerChannels, WorkerGuards};
use sc_logging::{Logger, Registry};

use crate::coordinator::{Coordinator, TerminationReason};
use crate::graph::{erase_mapper, ExecutionConfiguration, ExecutionMode, GraphBuilderConfiguration, GraphEditor};
use crate::logging::worker_event_to_log_message;
use crate::mutation::Mutation;
use crate::node::NodeActor;
use crate::throttle::Throttle;
use crate::vertex::Vertex;
use crate::worker::{Worker, WorkerCounters};

pub use crate::coordinator::ExecutionInformation;

/// Name of the stream every worker logs domain events onto.
const LOG_STREAM: &str = "signalcollect";

/// Why a deployment was rejected before any worker thread was spawned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A `Process`/`Cluster` configuration named zero workers.
    ZeroWorkers,
    /// A deployment descriptor named zero nodes.
    ZeroNodes,
    /// A `Cluster` configuration's address list did not match the node count it implied.
    HostCountMismatch {
        /// Number of addresses the configuration named.
        expected: usize,
        /// Number of addresses actually supplied.
        found: usize,
    },
    /// A `Cluster` configuration did not divide workers evenly across its nodes.
    WorkersPerNodeMismatch,
    /// Worker threads failed to spawn, or the cluster transport failed to come up.
    Transport(String),
}

impl fmt::Display for ConfigurationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigurationError::ZeroWorkers => write!(f, "deployment named zero workers"),
            ConfigurationError::ZeroNodes => write!(f, "deployment named zero nodes"),
            ConfigurationError::HostCountMismatch { expected, found } => {
                write!(f, "expected {expected} node addresses, found {found}")
            }
            ConfigurationError::WorkersPerNodeMismatch => write!(f, "workers do not divide evenly across nodes"),
            ConfigurationError::Transport(message) => write!(f, "transport error: {message}"),
        }
    }
}

impl std::error::Error for ConfigurationError {}

/// Validates `config` against the worker/node shape it implies.
fn validate_configuration(config: &Configuration) -> Result<(), ConfigurationError> {
    match config {
        Configuration::Thread => Ok(()),
        Configuration::Process(workers) => {
            if *workers == 0 {
                Err(ConfigurationError::ZeroWorkers)
            } else {
                Ok(())
            }
        }
        Configuration::Cluster { threads, addresses, .. } => {
            if *threads == 0 {
                return Err(ConfigurationError::ZeroWorkers);
            }
            if addresses.is_empty() {
                return Err(ConfigurationError::ZeroNodes);
            }
            Ok(())
        }
    }
}

/// Builds a dummy, already-disconnected sender: its matching receiver is dropped immediately, so
/// any send through it silently fails. Used to fill the global `mutation_senders` table at
/// indices owned by a remote worker, which this process has no channel to.
fn disconnected_sender<T>() -> Sender<T> {
    let (sender, receiver) = channel::<T>();
    drop(receiver);
    sender
}

/// Per-worker slot handed out exactly once to the worker-building closure `try_build` invokes per
/// local worker thread. A `Mutex<Option<_>>` rather than a plain `Vec` consumed by index because
/// `try_build`'s closure is an `Fn`, not `FnOnce`: it may in principle be called more than once
/// per slot, but this engine only ever calls it once per local worker, so `take` on a second call
/// would simply yield `None`.
struct MutationReceiverSlots<Id, V, Signal> {
    slots: Vec<Mutex<Option<Receiver<Mutation<Id, V, Signal>>>>>,
}

impl<Id, V, Signal> MutationReceiverSlots<Id, V, Signal> {
    fn take(&self, offset: usize) -> Receiver<Mutation<Id, V, Signal>> {
        self.slots[offset]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .expect("each local worker offset is only ever built once")
    }
}

/// Runs a signal/collect computation to completion.
///
/// `build_graph` is invoked exactly once per process, given a [`GraphEditor`] wired to every
/// worker this process can reach; on a `Cluster` deployment every process calls the same closure,
/// each mutating only the vertices its own workers end up owning (mutation sends to a remote
/// worker's slot are silent no-ops, since graph construction closures are not serializable).
///
/// Blocks until the computation reaches one of the [`TerminationReason`]s, then joins every
/// worker thread. A worker panic is folded into `TerminationReason::Error` rather than
/// propagated, since by that point other workers may already have exited cleanly and there is a
/// summary worth returning regardless.
///
/// Under `ExecutionMode::Interactive`, `build_graph` itself is responsible for driving the
/// computation through the `GraphEditor`'s `await_idle`/`execute`/`shutdown`; this function still
/// blocks until `build_graph` returns, and folds whatever final state the coordinator is left in
/// into the returned summary.
pub fn execute<Id, V, Signal, M, C>(
    deployment: Configuration,
    builder_config: GraphBuilderConfiguration<Id, Signal>,
    execution_configuration: ExecutionConfiguration<C>,
    mapper: M,
    build_graph: impl FnOnce(&GraphEditor<Id, V, Signal>) + Send + 'static,
) -> Result<ExecutionInformation, ConfigurationError>
where
    Id: ExchangeData + std::hash::Hash + Eq,
    Signal: ExchangeData,
    V: Vertex<Id, Signal> + Send,
    M: VertexToWorkerMapper<Id>,
    C: Fn() -> bool + Send + Sync + 'static,
{
    validate_configuration(&deployment)?;

    let total_workers = deployment.total_workers();
    let local_workers = match &deployment {
        Configuration::Thread => 1,
        Configuration::Process(n) => *n,
        Configuration::Cluster { threads, .. } => *threads,
    };
    let hosts_driver = deployment.hosts_driver();
    let node_id = deployment.node_id();
    let workers_per_node = local_workers.max(1);

    // Local-only mutation channels, one per local worker, handed out through a `Mutex<Option<_>>`
    // slot so the `Fn` worker-building closure below can give each spawned worker its own
    // receiver despite being callable more than once in principle.
    let mut mutation_senders_local: Vec<Sender<Mutation<Id, V, Signal>>> = Vec::with_capacity(local_workers);
    let mut receiver_slots = Vec::with_capacity(local_workers);
    for _ in 0..local_workers {
        let (sender, receiver) = channel();
        mutation_senders_local.push(sender);
        receiver_slots.push(Mutex::new(Some(receiver)));
    }
    let receiver_slots = Arc::new(MutationReceiverSlots { slots: receiver_slots });

    // The global, worker-index-ordered mutation sender table `GraphEditor` dispatches through:
    // real senders for this process's own workers, disconnected stand-ins for every remote
    // worker slot so `.get(worker_id)` on a non-local index never panics, it just silently drops.
    let base_index = node_id * workers_per_node;
    let mut mutation_senders_global: Vec<Sender<Mutation<Id, V, Signal>>> = Vec::with_capacity(total_workers);
    for worker_id in 0..total_workers {
        if worker_id >= base_index && worker_id < base_index + local_workers {
            mutation_senders_global.push(mutation_senders_local[worker_id - base_index].clone());
        } else {
            mutation_senders_global.push(disconnected_sender());
        }
    }
    let mutation_senders_global = Arc::new(mutation_senders_global);

    let (node_sender, node_receiver) = channel::<Envelope<Id, Signal>>();
    let (coordinator_sender, coordinator_receiver) = if hosts_driver {
        let (s, r) = channel();
        (Some(s), Some(r))
    } else {
        (None, None)
    };
    let (driver_reply_sender, driver_reply_receiver) = if hosts_driver {
        let (s, r) = channel();
        (Some(s), Some(r))
    } else {
        (None, None)
    };

    let process_channels = ProcessChannels { node_sender, coordinator_sender, driver_reply_sender };

    let signal_threshold = execution_configuration.signal_threshold;
    let collect_threshold = execution_configuration.collect_threshold;
    let throttle_inbox_threshold = builder_config.throttle_inbox_threshold_per_worker;
    let throttle_queue_age = Duration::from_millis(builder_config.throttle_worker_queue_threshold_in_millis);
    let status_update_interval = builder_config.status_update_interval;
    let logging_level = builder_config.logging_level;
    let logger_callback = builder_config.logger.clone();
    let undeliverable_handler: Arc<dyn Fn(Id, Option<Id>, Signal) + Send + Sync> = builder_config
        .undeliverable_signal_handler
        .clone()
        .unwrap_or_else(|| Arc::new(|_, _, _| {}));
    let mapper = Arc::new(mapper);
    let mapper_for_editor = mapper.clone();
    let receiver_slots_for_workers = receiver_slots.clone();

    let build_worker = move |worker_id: usize, worker_count: usize, channels: WorkerChannels<Id, Signal>| -> WorkerCounters {
        let WorkerChannels { bus, mailbox, node_id: _ } = channels;
        let offset = worker_id - base_index;
        let mutation_receiver = receiver_slots_for_workers.take(offset);
        let throttle = Throttle::new(throttle_inbox_threshold, throttle_queue_age, worker_count);
        let mut worker = Worker::new(
            worker_id,
            worker_count,
            workers_per_node,
            mailbox,
            mutation_receiver,
            Arc::new(bus),
            mapper.clone(),
            signal_threshold,
            collect_threshold,
            throttle,
        );
        worker.set_undeliverable_signal_handler(undeliverable_handler.clone());
        worker.set_log_level(logging_level);
        worker.set_status_update_interval(status_update_interval);
        if let Some(callback) = logger_callback.clone() {
            // `sc_logging::Registry`/`Logger` are `Rc`-backed and therefore not `Send`: each
            // worker thread builds its own registry around the `Send + Sync` callback rather
            // than sharing one built on the spawning thread.
            let mut registry = Registry::new(Instant::now());
            registry.insert::<crate::logging::WorkerEvent>(LOG_STREAM, move |_now, batch| {
                for (_elapsed, event) in batch {
                    callback(worker_event_to_log_message(event));
                }
            });
            let logger: Logger<crate::logging::WorkerEvent> = registry.get(LOG_STREAM).expect("just inserted");
            worker.set_logger(logger);
        }
        worker.run()
    };

    let (process_bus, guards): (MessageBus<Id, Signal>, WorkerGuards<WorkerCounters>) =
        sc_communication::try_build(deployment, process_channels, build_worker).map_err(ConfigurationError::Transport)?;
    let process_bus = Arc::new(process_bus);

    let node_actor = Arc::new(Mutex::new(NodeActor::new(node_id, process_bus.clone(), local_workers)));
    {
        let node_actor = node_actor.clone();
        std::thread::spawn(move || {
            while let Ok(envelope) = node_receiver.recv() {
                match envelope {
                    Envelope::WorkerStatus(status) => {
                        let mut actor = node_actor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        let _ = actor.on_worker_status(status, workers_per_node);
                    }
                    Envelope::Heartbeat(_) => {
                        let actor = node_actor.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                        let _ = actor.on_heartbeat();
                    }
                    _ => {}
                }
            }
        });
    }

    // The coordinator and its supporting threads are built before `build_graph` runs (rather than
    // after, as the asynchronous driving loop below would otherwise suggest) so the process-level
    // editor handed to `build_graph` can carry a live driver handle: an `Interactive` build_graph
    // closure calls `editor.await_idle`/`editor.execute`/`editor.shutdown` itself, and those need
    // a coordinator already collecting status reports to mean anything.
    let (editor, driver_threads) = if hosts_driver {
        let coordinator_receiver = coordinator_receiver.expect("node 0 always builds a coordinator mailbox");
        let driver_reply_receiver = driver_reply_receiver.expect("node 0 always builds a driver-reply mailbox");
        let driver_reply_id = total_workers;

        let coordinator = Arc::new(Coordinator::new(total_workers, process_bus.clone(), crate::coordinator::DEFAULT_HEARTBEAT_INTERVAL));
        {
            let coordinator = coordinator.clone();
            std::thread::spawn(move || {
                // The coordinator's mailbox also carries `NodeStatus` envelopes (the per-node
                // aggregate `NodeActor::emit_node_status` reports on every heartbeat); only
                // `WorkerStatus` feeds the convergence bookkeeping, so anything else is ignored
                // rather than ending the loop.
                while let Ok(envelope) = coordinator_receiver.recv() {
                    if let Envelope::WorkerStatus(status) = envelope {
                        coordinator.record_status(status);
                    }
                }
            });
        }
        let heartbeat_stop = Arc::new(AtomicBool::new(false));
        let heartbeat_handle = {
            let coordinator = coordinator.clone();
            let heartbeat_stop = heartbeat_stop.clone();
            let interval = coordinator.heartbeat_interval();
            std::thread::spawn(move || {
                while !heartbeat_stop.load(Ordering::Relaxed) {
                    let _ = coordinator.send_heartbeat();
                    std::thread::sleep(interval);
                }
            })
        };

        let editor = GraphEditor::with_driver(
            process_bus.clone(),
            erase_mapper(mapper_for_editor),
            total_workers,
            mutation_senders_global,
            coordinator.clone(),
            driver_reply_id,
            driver_reply_receiver,
        );
        (editor, Some((coordinator, heartbeat_stop, heartbeat_handle)))
    } else {
        // The process-level editor a non-driver node runs `build_graph` against: mutation sends
        // reach only this process's own local workers (the rest of `mutation_senders_global` is
        // disconnected), and `send_signal` crosses the bus like any vertex-emitted signal would.
        let editor = GraphEditor::new(process_bus.clone(), erase_mapper(mapper_for_editor), total_workers, mutation_senders_global);
        (editor, None)
    };

    build_graph(&editor);

    let termination_reason = match driver_threads {
        Some((coordinator, heartbeat_stop, heartbeat_handle)) => {
            let reason = if execution_configuration.execution_mode == ExecutionMode::Interactive {
                // `build_graph` was responsible for driving the computation itself; the
                // coordinator's state when it returns is the best summary available here.
                if coordinator.is_converged() {
                    TerminationReason::Converged
                } else {
                    TerminationReason::Paused
                }
            } else {
                editor.execute(&execution_configuration).expect("editor built with a driver handle")
            };

            heartbeat_stop.store(true, Ordering::Relaxed);
            let _ = heartbeat_handle.join();
            editor.shutdown();
            Some((coordinator, reason))
        }
        None => None,
    };

    let results = guards.join();
    let worker_panicked = results.iter().any(Result::is_err);

    match termination_reason {
        Some((coordinator, reason)) => {
            let reason = if worker_panicked { TerminationReason::Error } else { reason };
            Ok(coordinator.execution_information(reason))
        }
        None => {
            // A non-driver node in a cluster deployment has no coordinator of its own; its
            // contribution is simply to keep its workers alive until the driver's poison pill
            // arrives, which `guards.join()` above already waited for.
            let reason = if worker_panicked { TerminationReason::Error } else { TerminationReason::Converged };
            let sent = process_bus.sent_stats();
            Ok(ExecutionInformation {
                termination_reason: reason,
                duration: Duration::default(),
                messages_sent: sent.to_workers + sent.to_nodes + sent.to_coordinator + sent.to_others,
                messages_received: 0,
            })
        }
    }
}
