//! Atomic bookkeeping shared between the bus and the coordinator's throttle.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide counters tracking messages sent and received, used to derive the global inbox
/// size (`totalMessagesSent - totalMessagesReceived`) that drives throttling.
///
/// Free-standing atomics rather than a wrapper around a generic channel: the bus records at the
/// point of send and receive directly instead of wrapping every transport in a counting adapter.
#[derive(Debug, Default)]
pub struct Counters {
    sent: AtomicU64,
    received: AtomicU64,
}

impl Counters {
    /// Creates a fresh, zeroed counter pair.
    pub fn new() -> Arc<Self> {
        Arc::new(Counters::default())
    }

    /// Records that one message was sent.
    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    /// Records that one message was received.
    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Total messages sent so far.
    pub fn total_sent(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// Total messages received so far.
    pub fn total_received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// `totalMessagesSent - totalMessagesReceived`, i.e. messages currently in flight.
    pub fn in_flight(&self) -> i64 {
        self.total_sent() as i64 - self.total_received() as i64
    }
}

/// A single `i64` shared between the coordinator (writer) and every worker (reader), carrying
/// the last heartbeat's global inbox size for local throttling decisions.
#[derive(Debug)]
pub struct SharedInboxSize(AtomicI64);

impl SharedInboxSize {
    /// Creates a shared cell initialized to zero.
    pub fn new() -> Arc<Self> {
        Arc::new(SharedInboxSize(AtomicI64::new(0)))
    }

    /// Publishes a freshly observed global inbox size.
    pub fn publish(&self, value: i64) {
        self.0.store(value, Ordering::Relaxed);
    }

    /// Reads the last published global inbox size.
    pub fn get(&self) -> i64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_reflects_sent_minus_received() {
        let counters = Counters::new();
        for _ in 0..5 {
            counters.record_sent();
        }
        for _ in 0..2 {
            counters.record_received();
        }
        assert_eq!(counters.in_flight(), 3);
    }

    #[test]
    fn shared_inbox_size_round_trips() {
        let shared = SharedInboxSize::new();
        assert_eq!(shared.get(), 0);
        shared.publish(42);
        assert_eq!(shared.get(), 42);
    }
}
