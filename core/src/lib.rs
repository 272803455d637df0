//! A vertex-centric graph processing engine, in the signal/collect style: vertices alternate
//! between emitting signals along their outgoing edges and folding buffered signals into their
//! own state, until the whole graph converges.
//!
//! **Vertex model**: the [`vertex`] module defines the [`vertex::Vertex`] capability set every
//! user algorithm implements, plus the [`vertex::Edge`] type connecting them.
//!
//! **Storage and scheduling**: [`store`] owns each worker's vertex shard and the `toSignal`/
//! `toCollect` work queues that decide what runs next.
//!
//! **Graph construction and control**: [`graph`] exposes [`graph::GraphEditor`], the surface
//! algorithms use to send signals, add or remove vertices and edges, and run aggregations, along
//! with the configuration types ([`graph::ExecutionConfiguration`],
//! [`graph::GraphBuilderConfiguration`]) that shape a run.
//!
//! **Worker runtime**: [`worker::Worker`] is the single-threaded event loop owning one vertex
//! shard; [`mutation`] carries the non-serializable construction/aggregation requests dispatched
//! to it from [`graph::GraphEditor`].
//!
//! **Global coordination**: [`coordinator::Coordinator`] drives convergence detection and the
//! synchronous superstep protocol; [`node::NodeActor`] batches per-node worker status before
//! forwarding to it; [`throttle::Throttle`] applies worker-side back-pressure from the
//! coordinator's heartbeat.
//!
//! **Deployment**: [`execute`] turns an [`graph::ExecutionConfiguration`] and a
//! [`sc_communication::Configuration`] into running workers, wiring the pieces above together
//! over [`sc_communication`]'s bus and transport.
//!
//! **Logging**: [`logging`] defines the domain events these pieces emit onto the
//! [`sc_logging::Registry`] streams each worker and node owns.

#![forbid(missing_docs)]

pub mod coordinator;
pub mod execute;
pub mod graph;
pub mod logging;
pub mod mutation;
pub mod node;
pub mod store;
pub mod throttle;
pub mod vertex;
pub mod worker;

pub use coordinator::{Coordinator, ExecutionInformation, TerminationReason};
pub use execute::{execute, ConfigurationError};
pub use graph::{ExecutionConfiguration, ExecutionMode, GraphBuilderConfiguration, GraphEditor};
pub use mutation::AggregationOperation;
pub use store::VertexStore;
pub use vertex::{Edge, Vertex};
pub use worker::Worker;
