//! Drives global execution: heartbeats, convergence detection, and termination.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use sc_communication::{Command, Destination, Envelope, ExchangeData, Heartbeat, MessageBus, Reply, WorkerStatus};

use crate::graph::ExecutionMode;

/// Why an execution stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// Every worker reported idle and the global inbox size reached zero.
    Converged,
    /// `ExecutionConfiguration::time_limit` elapsed before convergence.
    TimeLimitReached,
    /// The user-supplied global termination condition reported satisfied.
    GlobalConstraintMet,
    /// The coordinator was explicitly paused.
    Paused,
    /// An unrecoverable transport-level failure was observed; statistics are partial.
    Error,
}

/// Summary statistics returned once an execution stops.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionInformation {
    /// Why the execution stopped.
    pub termination_reason: TerminationReason,
    /// Wall-clock duration of the execution.
    pub duration: Duration,
    /// Total messages sent, as last observed across all workers.
    pub messages_sent: u64,
    /// Total messages received, as last observed across all workers.
    pub messages_received: u64,
}

/// Default interval between coordinator heartbeats.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(200);

/// Per-worker bookkeeping the coordinator tracks between heartbeats.
#[derive(Debug, Clone, Copy, Default)]
struct WorkerSnapshot {
    status: Option<WorkerStatus>,
}

/// The coordinator's view of global state, shared with its heartbeat thread.
struct SharedState {
    worker_snapshots: Mutex<Vec<WorkerSnapshot>>,
    shared_inbox_size: Arc<sc_communication::counters::SharedInboxSize>,
    paused: AtomicBool,
    steps_completed: AtomicU64,
}

/// Drives a computation to convergence.
///
/// `initialization_messages = numberOfWorkers * (numberOfWorkers + 2)` accounts for the mutual
/// registration fanout (every worker registers with every other worker and with the
/// coordinator, plus a coordinator-to-worker acknowledgement) that predates any per-worker
/// status snapshot; see the accounting formula this constant feeds in [`Coordinator::is_converged`].
fn initialization_messages(worker_count: usize) -> u64 {
    (worker_count * (worker_count + 2)) as u64
}

/// Coordinates a fixed set of workers through to convergence or another termination condition.
pub struct Coordinator<Id, Signal> {
    worker_count: usize,
    bus: Arc<MessageBus<Id, Signal>>,
    state: Arc<SharedState>,
    heartbeat_interval: Duration,
    start: Instant,
}

impl<Id: ExchangeData, Signal: ExchangeData> Coordinator<Id, Signal> {
    /// Builds a coordinator for `worker_count` workers reachable through `bus`.
    pub fn new(worker_count: usize, bus: Arc<MessageBus<Id, Signal>>, heartbeat_interval: Duration) -> Self {
        Coordinator {
            worker_count,
            bus,
            state: Arc::new(SharedState {
                worker_snapshots: Mutex::new(vec![WorkerSnapshot::default(); worker_count]),
                shared_inbox_size: sc_communication::counters::SharedInboxSize::new(),
                paused: AtomicBool::new(false),
                steps_completed: AtomicU64::new(0),
            }),
            heartbeat_interval,
            start: Instant::now(),
        }
    }

    /// Records a freshly arrived worker status, ignoring it if it is not newer (strictly larger
    /// total sent) than what is already on file.
    pub fn record_status(&self, status: WorkerStatus) {
        let mut snapshots = self.state.worker_snapshots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(slot) = snapshots.get_mut(status.worker_id) {
            let is_newer = slot.status.map(|prior| status.messages_sent > prior.messages_sent).unwrap_or(true);
            if is_newer {
                slot.status = Some(status);
            }
        }
    }

    /// `Σ workerStatus[i].messagesSent + numberOfWorkers + initializationMessages`.
    fn messages_sent_by_workers(&self) -> u64 {
        let snapshots = self.state.worker_snapshots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let from_workers: u64 = snapshots.iter().filter_map(|s| s.status.map(|st| st.messages_sent)).sum();
        from_workers + self.worker_count as u64 + initialization_messages(self.worker_count)
    }

    /// `Σ workerStatus[i].messagesReceived`.
    fn messages_received_by_workers(&self) -> u64 {
        let snapshots = self.state.worker_snapshots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        snapshots.iter().filter_map(|s| s.status.map(|st| st.messages_received)).sum()
    }

    /// `totalMessagesSent - totalMessagesReceived`.
    pub fn global_inbox_size(&self) -> i64 {
        self.messages_sent_by_workers() as i64 - self.messages_received_by_workers() as i64
    }

    /// True once every worker has reported and is idle, and the books balance.
    pub fn is_converged(&self) -> bool {
        let snapshots = self.state.worker_snapshots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let all_idle = snapshots.iter().all(|s| matches!(s.status, Some(st) if st.is_idle));
        drop(snapshots);
        all_idle && self.messages_sent_by_workers() == self.messages_received_by_workers()
    }

    /// Broadcasts one heartbeat carrying the current global inbox size, for worker-side
    /// throttling, and publishes the same value locally for `global_inbox_size` callers.
    ///
    /// Addresses the real workers `0..workerCount` directly rather than going through
    /// [`MessageBus::broadcast_workers`]: this bus also carries the reserved driver-reply
    /// worker id used by the synchronous `ask` protocol, which is not a worker and must never
    /// receive a heartbeat meant for throttling.
    pub fn send_heartbeat(&self) -> std::io::Result<()> {
        let global_inbox_size = self.global_inbox_size();
        self.state.shared_inbox_size.publish(global_inbox_size);
        let timestamp_nanos = self.start.elapsed().as_nanos() as u64;
        for worker_id in 0..self.worker_count {
            self.bus.send(
                Destination::Worker(worker_id),
                Envelope::Heartbeat(Heartbeat { timestamp_nanos, global_inbox_size }),
            )?;
        }
        Ok(())
    }

    /// Runs the synchronous execution protocol: repeated signal/collect rounds until every
    /// worker reports an empty `toSignal`.
    ///
    /// `ask` sends a command to every worker and blocks for every reply; the caller (typically
    /// `crate::execute`) supplies it because the reply transport (an in-process channel today)
    /// is deployment-specific.
    pub fn run_synchronous<Ask>(&self, steps_limit: Option<u64>, mut ask: Ask) -> TerminationReason
    where
        Ask: FnMut(Command<Id>) -> Vec<Reply>,
    {
        loop {
            if self.state.paused.load(Ordering::Relaxed) {
                return TerminationReason::Paused;
            }
            if let Some(limit) = steps_limit {
                if self.state.steps_completed.load(Ordering::Relaxed) >= limit {
                    return TerminationReason::TimeLimitReached;
                }
            }

            ask(Command::SignalStep);
            let collect_replies = ask(Command::CollectStep);
            self.state.steps_completed.fetch_add(1, Ordering::Relaxed);

            let all_signal_empty = collect_replies.iter().all(|reply| {
                matches!(reply, Reply::CollectStepResult { to_signal_is_empty: true })
            });
            if all_signal_empty {
                return TerminationReason::Converged;
            }
        }
    }

    /// Requests a pause; the next `run_synchronous` (or asynchronous poll) observes it.
    pub fn pause(&self) {
        self.state.paused.store(true, Ordering::Relaxed);
    }

    /// Clears a prior pause request.
    pub fn resume(&self) {
        self.state.paused.store(false, Ordering::Relaxed);
    }

    /// Builds the final summary once execution stops.
    pub fn execution_information(&self, termination_reason: TerminationReason) -> ExecutionInformation {
        ExecutionInformation {
            termination_reason,
            duration: self.start.elapsed(),
            messages_sent: self.messages_sent_by_workers(),
            messages_received: self.messages_received_by_workers(),
        }
    }

    /// The configured heartbeat cadence.
    pub fn heartbeat_interval(&self) -> Duration {
        self.heartbeat_interval
    }
}

/// Routes `execution_mode` to the right coordinator-driven protocol; kept distinct from
/// [`Coordinator::run_synchronous`] so `Interactive` mode (no autonomous scheduling) and the
/// asynchronous family (idleness polling only, no barrier) don't share a code path with
/// `Synchronous`/`OptimizedAsynchronous`'s superstep loop by accident.
pub fn requires_superstep_loop(execution_mode: ExecutionMode) -> bool {
    matches!(execution_mode, ExecutionMode::Synchronous)
}

/// Destination broadcast helper shared by heartbeat and pause/resume commands.
pub fn coordinator_destination() -> Destination {
    Destination::Coordinator
}
