//! Message bus, vertex-to-worker routing, and transport for the signal/collect engine.
//!
//! This crate owns everything that needs to know how bytes travel between workers, nodes, and
//! the coordinator: the wire [`message`] types, the [`bus::MessageBus`] routing table, the
//! [`mapper`] that decides which worker owns a vertex, [`network`] framing for cluster mode, and
//! [`initialize::try_build`] which turns a [`initialize::Configuration`] into running worker
//! threads. The `core` crate builds the signal/collect engine itself on top of these primitives.

pub mod bulk;
pub mod bus;
pub mod counters;
pub mod data;
pub mod initialize;
pub mod mapper;
pub mod message;
pub mod network;

pub use bulk::BulkSender;
pub use bus::{Destination, MessageBus, RemoteEnvelope};
pub use counters::Counters;
pub use data::{Data, ExchangeData};
pub use initialize::{try_build, Configuration, ProcessChannels, WorkerChannels, WorkerGuards};
pub use mapper::{HashMapper, VertexToWorkerMapper};
pub use message::{Command, Envelope, Heartbeat, NodeReady, NodeStatus, Reply, SentMessagesStats, SignalMessage, WorkerStatus};
