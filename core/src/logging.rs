//! Domain log events, built on top of [`sc_logging`]'s generic [`sc_logging::Registry`] and
//! [`sc_logging::Logger`].
//!
//! Every worker logs onto a single `"signalcollect"` stream using the events defined here: one
//! event enum per named stream rather than stringly-typed messages.

/// Start/stop marker for a scheduled unit of work, scoped to a signal or collect step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartStop {
    /// The step began.
    Start,
    /// The step ended.
    Stop,
}

/// A synchronous `signalStep`/`collectStep` (or their asynchronous single-entry counterparts)
/// starting or stopping on a worker.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleEvent {
    /// The worker running the step.
    pub worker_id: usize,
    /// Whether this is a signal or a collect step.
    pub is_signal: bool,
    /// Start or stop.
    pub start_stop: StartStop,
}

impl ScheduleEvent {
    /// Builds a `Start` marker.
    pub fn start(worker_id: usize, is_signal: bool) -> Self {
        ScheduleEvent { worker_id, is_signal, start_stop: StartStop::Start }
    }

    /// Builds a `Stop` marker.
    pub fn stop(worker_id: usize, is_signal: bool) -> Self {
        ScheduleEvent { worker_id, is_signal, start_stop: StartStop::Stop }
    }
}

/// A worker ran `VertexStore::clean_up` and exited its event loop.
#[derive(Debug, Clone, Copy)]
pub struct ShutdownEvent {
    /// The worker that shut down.
    pub worker_id: usize,
}

/// Outgoing-signal throttling engaged or released on a worker.
#[derive(Debug, Clone, Copy)]
pub struct ThrottleEvent {
    /// The worker whose throttle state changed.
    pub worker_id: usize,
    /// `true` if throttling just engaged, `false` if it was just released.
    pub engaged: bool,
}

/// Events emitted on a worker's `"signalcollect"` logging stream.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The worker's `isIdle` flag changed.
    IdleChanged { worker_id: usize, is_idle: bool },
    /// A vertex callback (signal/collect/afterInitialization/beforeRemoval) panicked.
    VertexCallbackFailed { worker_id: usize, message: String },
    /// A signal arrived for a vertex this worker does not hold.
    UndeliverableSignal { worker_id: usize },
    /// A mutation referenced a vertex this worker does not hold.
    MissingVertexOnMutation { worker_id: usize },
    /// An envelope variant this worker does not know how to handle arrived.
    UnknownMessage { worker_id: usize },
    /// A signal or collect step started or stopped.
    Schedule(ScheduleEvent),
    /// The worker shut down after draining its mailbox.
    Shutdown(ShutdownEvent),
    /// Outgoing-signal throttling engaged or released.
    Throttle(ThrottleEvent),
}

impl From<ScheduleEvent> for WorkerEvent {
    fn from(event: ScheduleEvent) -> Self {
        WorkerEvent::Schedule(event)
    }
}

impl From<ShutdownEvent> for WorkerEvent {
    fn from(event: ShutdownEvent) -> Self {
        WorkerEvent::Shutdown(event)
    }
}

impl From<ThrottleEvent> for WorkerEvent {
    fn from(event: ThrottleEvent) -> Self {
        WorkerEvent::Throttle(event)
    }
}

/// Renders a [`WorkerEvent`] as a [`sc_logging::LogMessage`], for the `"signalcollect"` stream
/// action installed by `crate::execute` around a caller-supplied logger callback.
pub fn worker_event_to_log_message(event: &WorkerEvent) -> sc_logging::LogMessage {
    use sc_logging::Level;
    let level = match event {
        WorkerEvent::VertexCallbackFailed { .. } => Level::Severe,
        WorkerEvent::UndeliverableSignal { .. } | WorkerEvent::MissingVertexOnMutation { .. } | WorkerEvent::UnknownMessage { .. } => {
            Level::Warning
        }
        WorkerEvent::IdleChanged { .. } | WorkerEvent::Schedule(_) | WorkerEvent::Shutdown(_) | WorkerEvent::Throttle(_) => Level::Info,
    };
    sc_logging::LogMessage::new(level, format!("{event:?}"))
}
