//! Graph-construction and aggregation operations dispatched to a vertex's owning worker.
//!
//! These travel over a local, in-process channel rather than the [`sc_communication`] bus: they
//! carry arbitrary closures and user vertex values, neither of which need to be serializable.
//! Only [`crate::vertex::Vertex::execute_signal_operation`]'s signals cross the bus proper.

use std::any::Any;
use std::sync::mpsc::Sender;
use std::sync::Arc;

use crate::store::VertexStore;
use crate::vertex::Edge;

/// A fold over every vertex owned by a worker, combined across workers by `combine`.
///
/// Backs `GraphEditor::aggregate`: `extract` runs once per vertex on its owning worker,
/// `combine` folds partial results together (both within a worker and across workers).
pub trait AggregationOperation<Id, V>: Send + Sync + 'static {
    /// The type folded across vertices.
    type Result: Send + 'static;

    /// The starting value for a fold with no vertices.
    fn neutral_element(&self) -> Self::Result;

    /// Extracts this aggregate's contribution from one vertex.
    fn extract(&self, vertex: &V) -> Self::Result;

    /// Combines two partial results.
    fn combine(&self, a: Self::Result, b: Self::Result) -> Self::Result;
}

/// Folds `op` over every vertex in `store`, combined with `op.combine`. Invoked on the owning
/// worker's thread once per `aggregate` call, local per worker; cross-worker combination happens
/// in [`crate::graph::GraphEditor::aggregate`].
pub fn run_aggregate<Id, V, Signal, Op>(op: &Op, store: &VertexStore<Id, V, Signal>) -> Op::Result
where
    Id: Clone + std::hash::Hash + Eq,
    Op: AggregationOperation<Id, V>,
{
    let mut acc = op.neutral_element();
    store.foreach(|_id, vertex| {
        let extracted = op.extract(vertex);
        acc = op.combine(std::mem::replace(&mut acc, op.neutral_element()), extracted);
    });
    acc
}

/// A graph-construction or aggregation request, local to the process hosting the target worker.
pub enum Mutation<Id, V, Signal> {
    /// Inserts a vertex.
    AddVertex(V),
    /// Removes a vertex by id.
    RemoveVertex(Id),
    /// Adds an outgoing edge to the source vertex named by `edge.source_id`.
    AddEdge(Edge<Id>),
    /// Removes the outgoing edge `source_id -> target_id`.
    RemoveEdge { source_id: Id, target_id: Id },
    /// Runs an arbitrary closure against the owning worker's store.
    Modify(Box<dyn FnOnce(&mut VertexStore<Id, V, Signal>) + Send>),
    /// Runs a read-only closure against every vertex owned by the worker.
    ForEachVertex(Arc<dyn Fn(&Id, &V) + Send + Sync>),
    /// Runs a boxed aggregation and sends the type-erased partial result back.
    Aggregate(
        Box<dyn FnOnce(&VertexStore<Id, V, Signal>) -> Box<dyn Any + Send> + Send>,
        Sender<Box<dyn Any + Send>>,
    ),
}
