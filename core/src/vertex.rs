//! The vertex capability set and the edges that connect vertices.

use crate::graph::GraphEditor;

/// The capability set every vertex implementation exposes to the engine.
///
/// A vertex is opaque user state keyed by `Id`; the engine only ever touches it through this
/// trait. Implementations are free to represent `Signal` however is convenient (a numeric score,
/// a set of neighbor updates, ...) as long as `scoreSignal`/`scoreCollect` stay cheap: both are
/// called on every recalculation, not just on state change.
pub trait Vertex<Id, Signal>: 'static {
    /// This vertex's identifier. Immutable for the vertex's lifetime.
    fn id(&self) -> &Id;

    /// Runs once, immediately after the vertex is added to its owning worker's store.
    fn after_initialization(&mut self, graph_editor: &mut GraphEditor<Id, Self, Signal>) {
        let _ = graph_editor;
    }

    /// A monotone-ish measure of how useful running `execute_signal_operation` would be right
    /// now. Compared against `signalThreshold`; values at or below the threshold skip the step
    /// entirely.
    fn score_signal(&self) -> f64;

    /// Emits this vertex's outgoing signals through `graph_editor`.
    fn execute_signal_operation(&mut self, graph_editor: &mut GraphEditor<Id, Self, Signal>);

    /// How useful running `execute_collect_operation` would be given the signals buffered so far.
    fn score_collect(&self, signals: &[Signal]) -> f64;

    /// Folds buffered `signals` into this vertex's state.
    fn execute_collect_operation(&mut self, signals: &[Signal], graph_editor: &mut GraphEditor<Id, Self, Signal>);

    /// Adds an outgoing edge, returning `false` if an edge with the same target already exists.
    fn add_outgoing_edge(&mut self, edge: Edge<Id>) -> bool;

    /// Removes the outgoing edge to `target_id`, if any, returning whether one was removed.
    fn remove_outgoing_edge(&mut self, target_id: &Id) -> bool;

    /// Number of outgoing edges currently stored on this vertex.
    fn outgoing_edge_count(&self) -> usize;

    /// Runs once, immediately before the vertex is dropped from its owning worker's store.
    fn before_removal(&mut self, graph_editor: &mut GraphEditor<Id, Self, Signal>) {
        let _ = graph_editor;
    }
}

/// A directed edge from `source_id` to `target_id`, logically stored inside the source vertex.
///
/// `Payload` is left generic (e.g. an edge weight) rather than fixed to `()` so future callers
/// can name a weighted edge type directly; [`Vertex::add_outgoing_edge`] currently only takes the
/// unweighted `Edge<Id, ()>` shorthand below, so a weighted algorithm must track weights itself
/// alongside adjacency rather than on the edge (see `DESIGN.md`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edge<Id, Payload = ()> {
    /// The vertex this edge originates from.
    pub source_id: Id,
    /// The vertex this edge points to.
    pub target_id: Id,
    /// Algorithm-defined edge data.
    pub payload: Payload,
}

impl<Id, Payload> Edge<Id, Payload> {
    /// Builds a new edge.
    pub fn new(source_id: Id, target_id: Id, payload: Payload) -> Self {
        Edge { source_id, target_id, payload }
    }
}

impl<Id> Edge<Id, ()> {
    /// Builds a payload-less edge.
    pub fn unweighted(source_id: Id, target_id: Id) -> Self {
        Edge { source_id, target_id, payload: () }
    }
}
