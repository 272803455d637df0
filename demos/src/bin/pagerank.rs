//! Runs PageRank over a small hard-coded graph using `sc_core`'s signal/collect engine.
//!
//! Build a graph, hand it to the engine's entry point, print what comes out. The ranking
//! algorithm itself (damping, the `(1-d)/n` reset term) is the well-known PageRank formulation
//! and is not part of this crate's scope; only the engine that schedules it is.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sc_communication::{Configuration, HashMapper};
use sc_core::{Edge, ExecutionConfiguration, GraphBuilderConfiguration, GraphEditor, Vertex};

const DAMPING_FACTOR: f64 = 0.85;
const VERTEX_COUNT: f64 = 3.0;

/// A PageRank vertex. Writes its own state into a shared map on every collect step so the driver
/// can read final ranks back out after `execute` returns (the `GraphEditor` passed to
/// `build_graph` does not outlive the call).
struct PageRankVertex {
    id: u64,
    state: f64,
    last_signaled_state: f64,
    edges: Vec<Edge<u64>>,
    results: Arc<Mutex<HashMap<u64, f64>>>,
}

impl PageRankVertex {
    fn new(id: u64, results: Arc<Mutex<HashMap<u64, f64>>>) -> Self {
        let vertex = PageRankVertex { id, state: 0.15, last_signaled_state: 0.0, edges: Vec::new(), results };
        vertex.publish();
        vertex
    }

    fn publish(&self) {
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(self.id, self.state);
    }
}

impl Vertex<u64, f64> for PageRankVertex {
    fn id(&self) -> &u64 {
        &self.id
    }

    fn score_signal(&self) -> f64 {
        (self.state - self.last_signaled_state).abs()
    }

    fn execute_signal_operation(&mut self, graph_editor: &mut GraphEditor<u64, Self, f64>) {
        let out_degree = self.outgoing_edge_count().max(1) as f64;
        for edge in &self.edges {
            let _ = graph_editor.send_signal(self.state / out_degree, edge.target_id, Some(self.id));
        }
        self.last_signaled_state = self.state;
    }

    fn score_collect(&self, signals: &[f64]) -> f64 {
        if signals.is_empty() {
            0.0
        } else {
            1.0
        }
    }

    fn execute_collect_operation(&mut self, signals: &[f64], _graph_editor: &mut GraphEditor<u64, Self, f64>) {
        let incoming: f64 = signals.iter().sum();
        self.state = (1.0 - DAMPING_FACTOR) / VERTEX_COUNT + DAMPING_FACTOR * incoming;
        self.publish();
    }

    fn add_outgoing_edge(&mut self, edge: Edge<u64>) -> bool {
        if self.edges.iter().any(|existing| existing.target_id == edge.target_id) {
            false
        } else {
            self.edges.push(edge);
            true
        }
    }

    fn remove_outgoing_edge(&mut self, target_id: &u64) -> bool {
        let before = self.edges.len();
        self.edges.retain(|edge| &edge.target_id != target_id);
        self.edges.len() != before
    }

    fn outgoing_edge_count(&self) -> usize {
        self.edges.len()
    }
}

fn main() {
    let results = Arc::new(Mutex::new(HashMap::new()));
    let builder_results = results.clone();

    let info = sc_core::execute::<u64, PageRankVertex, f64, _, fn() -> bool>(
        Configuration::Thread,
        GraphBuilderConfiguration::default(),
        ExecutionConfiguration::default(),
        HashMapper,
        move |editor: &GraphEditor<u64, PageRankVertex, f64>| {
            for id in [1u64, 2, 3] {
                editor.add_vertex(PageRankVertex::new(id, builder_results.clone()), &id);
            }
            for (source, target) in [(1u64, 2u64), (2, 1), (2, 3), (3, 2)] {
                editor.add_edge(Edge::unweighted(source, target));
            }
        },
    )
    .expect("local single-threaded execution always validates");

    println!("terminated: {:?} after {:?}", info.termination_reason, info.duration);
    let final_state = results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut ranks: Vec<_> = final_state.iter().collect();
    ranks.sort_by_key(|(id, _)| **id);
    for (id, rank) in ranks {
        println!("vertex {id}: rank = {rank:.4}");
    }
}
