//! Hosts multiple workers on one machine and aggregates their status into one node status.

use std::sync::Arc;

use sc_communication::{Destination, Envelope, ExchangeData, MessageBus, NodeStatus, SentMessagesStats, WorkerStatus};

/// Aggregates per-worker status into a single [`NodeStatus`], relaying batched updates to the
/// coordinator only once every worker on the node agrees it is idle.
pub struct NodeActor<Id, Signal> {
    node_id: usize,
    bus: Arc<MessageBus<Id, Signal>>,
    worker_status: Vec<Option<WorkerStatus>>,
    forwarded_to_coordinator: Vec<bool>,
    number_of_idle_workers: usize,
    /// Bootstrap wiring messages (registerWorker/registerNode/registerCoordinator) decrement
    /// this so they don't contribute to the global conservation invariant.
    received_messages_counter: i64,
}

impl<Id: ExchangeData, Signal: ExchangeData> NodeActor<Id, Signal> {
    /// Builds a node actor hosting `workers_on_node` workers.
    pub fn new(node_id: usize, bus: Arc<MessageBus<Id, Signal>>, workers_on_node: usize) -> Self {
        NodeActor {
            node_id,
            bus,
            worker_status: vec![None; workers_on_node],
            forwarded_to_coordinator: vec![false; workers_on_node],
            number_of_idle_workers: 0,
            received_messages_counter: 0,
        }
    }

    /// Index of a worker among this node's own workers, `0..workers_on_node`, from its global
    /// worker index and the uniform `workers_per_node` assignment.
    fn local_index(global_worker_id: usize, workers_per_node: usize) -> usize {
        global_worker_id % workers_per_node
    }

    /// Handles an incoming `WorkerStatus`, updating bookkeeping arrays and forwarding a batch to
    /// the coordinator once every local worker is idle.
    pub fn on_worker_status(&mut self, status: WorkerStatus, workers_per_node: usize) -> std::io::Result<()> {
        let index = Self::local_index(status.worker_id, workers_per_node);
        let was_idle = self.worker_status.get(index).copied().flatten().map(|s| s.is_idle).unwrap_or(false);
        if index < self.worker_status.len() {
            self.worker_status[index] = Some(status);
        }
        match (was_idle, status.is_idle) {
            (false, true) => self.number_of_idle_workers += 1,
            (true, false) => {
                self.number_of_idle_workers = self.number_of_idle_workers.saturating_sub(1);
                // This worker is busy again; its last forward is stale. Allow it (and, since
                // the whole node just left the all-idle state, every other worker too) to be
                // forwarded again the next time every worker on this node agrees it is idle.
                if index < self.forwarded_to_coordinator.len() {
                    self.forwarded_to_coordinator.iter_mut().for_each(|flag| *flag = false);
                }
            }
            _ => {}
        }

        if self.number_of_idle_workers == self.worker_status.len() {
            for (slot_index, slot) in self.worker_status.iter().enumerate() {
                if let Some(worker_status) = slot {
                    if !self.forwarded_to_coordinator[slot_index] {
                        self.bus.send(Destination::Coordinator, Envelope::WorkerStatus(*worker_status))?;
                        self.forwarded_to_coordinator[slot_index] = true;
                    }
                }
            }
            self.emit_node_status()?;
        }
        Ok(())
    }

    /// Handles a coordinator heartbeat by emitting this node's own aggregate status.
    pub fn on_heartbeat(&self) -> std::io::Result<()> {
        self.emit_node_status()
    }

    fn emit_node_status(&self) -> std::io::Result<()> {
        let sent = self.bus.sent_stats();
        let messages_received: u64 = self
            .worker_status
            .iter()
            .filter_map(|s| s.as_ref())
            .map(|s| s.messages_received)
            .sum();
        let status = NodeStatus {
            node_id: self.node_id,
            sent: SentMessagesStats {
                to_workers: sent.to_workers,
                to_nodes: sent.to_nodes,
                to_coordinator: sent.to_coordinator,
                to_others: sent.to_others,
            },
            messages_received,
        };
        self.bus.send(Destination::Coordinator, Envelope::NodeStatus(status))
    }

    /// Records a bootstrap wiring message so it does not inflate the conservation invariant.
    pub fn note_bootstrap_message_received(&mut self) {
        self.received_messages_counter -= 1;
    }
}
