//! Runs single-source shortest paths over a small hard-coded DAG using `sc_core`'s signal/collect
//! engine. Distances settle to `None` for any vertex the source cannot reach; the engine still
//! converges with an unreachable vertex present.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use sc_communication::{Configuration, HashMapper};
use sc_core::{Edge, ExecutionConfiguration, GraphBuilderConfiguration, GraphEditor, Vertex};

/// A shortest-path vertex. `None` means "no path known yet"; the source starts at `Some(0)`.
///
/// Every edge costs one hop: `Vertex::add_outgoing_edge` takes an unweighted `Edge<Id>`, so a
/// vertex wanting per-edge weights would need to track them itself alongside adjacency rather
/// than on the edge (see `DESIGN.md`).
struct SsspVertex {
    id: u64,
    distance: Option<u64>,
    last_signaled_distance: Option<u64>,
    edges: Vec<Edge<u64>>,
    results: Arc<Mutex<HashMap<u64, Option<u64>>>>,
}

impl SsspVertex {
    fn new(id: u64, distance: Option<u64>, results: Arc<Mutex<HashMap<u64, Option<u64>>>>) -> Self {
        let vertex = SsspVertex { id, distance, last_signaled_distance: None, edges: Vec::new(), results };
        vertex.publish();
        vertex
    }

    fn publish(&self) {
        self.results.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(self.id, self.distance);
    }
}

impl Vertex<u64, u64> for SsspVertex {
    fn id(&self) -> &u64 {
        &self.id
    }

    fn score_signal(&self) -> f64 {
        if self.distance != self.last_signaled_distance {
            1.0
        } else {
            0.0
        }
    }

    fn execute_signal_operation(&mut self, graph_editor: &mut GraphEditor<u64, Self, u64>) {
        if let Some(distance) = self.distance {
            for edge in &self.edges {
                let _ = graph_editor.send_signal(distance + 1, edge.target_id, Some(self.id));
            }
        }
        self.last_signaled_distance = self.distance;
    }

    fn score_collect(&self, signals: &[u64]) -> f64 {
        if signals.is_empty() {
            0.0
        } else {
            1.0
        }
    }

    fn execute_collect_operation(&mut self, signals: &[u64], _graph_editor: &mut GraphEditor<u64, Self, u64>) {
        let shortest = signals.iter().copied().min();
        self.distance = match (self.distance, shortest) {
            (None, candidate) => candidate,
            (Some(current), Some(candidate)) => Some(current.min(candidate)),
            (current, None) => current,
        };
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
    const SOURCE: u64 = 1;

    let info = sc_core::execute::<u64, SsspVertex, u64, _, fn() -> bool>(
        Configuration::Thread,
        GraphBuilderConfiguration::default(),
        ExecutionConfiguration::default(),
        HashMapper,
        move |editor: &GraphEditor<u64, SsspVertex, u64>| {
            for id in 1u64..=7 {
                let distance = if id == SOURCE { Some(0) } else { None };
                editor.add_vertex(SsspVertex::new(id, distance, builder_results.clone()), &id);
            }
            for (source, target) in [(1u64, 2u64), (2, 3), (3, 4), (1, 5), (4, 6), (5, 6)] {
                editor.add_edge(Edge::unweighted(source, target));
            }
            // Vertex 7 stays isolated: no edges in or out.
        },
    )
    .expect("local single-threaded execution always validates");

    println!("terminated: {:?} after {:?}", info.termination_reason, info.duration);
    let final_state = results.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    let mut distances: Vec<_> = final_state.iter().collect();
    distances.sort_by_key(|(id, _)| **id);
    for (id, distance) in distances {
        match distance {
            Some(d) => println!("vertex {id}: distance = {d}"),
            None => println!("vertex {id}: unreachable"),
        }
    }
}
