//! Worker-side back-pressure driven by the coordinator's heartbeat.

use std::time::{Duration, Instant};

use sc_communication::Heartbeat;

/// Tracks the most recently received heartbeat and decides whether outgoing signal emission
/// should be suspended.
///
/// Only new signal sends are ever suspended: incoming deliveries and local compute continue
/// regardless, so in-flight traffic drains without deadlock even while throttled.
pub struct Throttle {
    inbox_threshold_per_worker: u64,
    queue_age_threshold: Duration,
    number_of_workers: usize,
    last_heartbeat: Option<(Heartbeat, Instant)>,
}

impl Throttle {
    /// Builds a throttle for a deployment of `number_of_workers` workers.
    pub fn new(inbox_threshold_per_worker: u64, queue_age_threshold: Duration, number_of_workers: usize) -> Self {
        Throttle { inbox_threshold_per_worker, queue_age_threshold, number_of_workers, last_heartbeat: None }
    }

    /// Records a freshly arrived heartbeat.
    pub fn record_heartbeat(&mut self, heartbeat: Heartbeat) {
        self.last_heartbeat = Some((heartbeat, Instant::now()));
    }

    /// True if outgoing signal emission should currently be suspended.
    ///
    /// With no heartbeat observed yet, the worker has no evidence of backlog or staleness and is
    /// never throttled.
    pub fn should_throttle(&self) -> bool {
        let Some((heartbeat, received_at)) = self.last_heartbeat.as_ref() else {
            return false;
        };
        let per_worker_backlog = if self.number_of_workers == 0 {
            0
        } else {
            (heartbeat.global_inbox_size.max(0) as u64) / self.number_of_workers as u64
        };
        let heartbeat_age = received_at.elapsed();
        per_worker_backlog > self.inbox_threshold_per_worker || heartbeat_age > self.queue_age_threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttles_once_backlog_exceeds_threshold() {
        let mut throttle = Throttle::new(10, Duration::from_millis(500), 4);
        assert!(!throttle.should_throttle());
        throttle.record_heartbeat(Heartbeat { timestamp_nanos: 0, global_inbox_size: 44 });
        assert!(!throttle.should_throttle());
        throttle.record_heartbeat(Heartbeat { timestamp_nanos: 0, global_inbox_size: 45 });
        assert!(throttle.should_throttle());
    }

    #[test]
    fn throttles_once_heartbeat_is_stale() {
        let mut throttle = Throttle::new(1_000_000, Duration::from_millis(0), 4);
        throttle.record_heartbeat(Heartbeat { timestamp_nanos: 0, global_inbox_size: 0 });
        std::thread::sleep(Duration::from_millis(5));
        assert!(throttle.should_throttle());
    }
}
