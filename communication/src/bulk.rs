//! Batches outgoing signals per destination, flushing once a configured size is reached.
//!
//! Accumulates records for one destination and flushes the accumulated `Vec` as a single message
//! once it fills, the same way a buffered observer amortizes many small writes into fewer larger
//! ones. This is a "bulk" `MessageBus` variant: the contract (at-most-once delivery while both
//! ends are up) is unchanged, only the number of underlying sends is reduced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::bus::{Destination, MessageBus};
use crate::data::ExchangeData;
use crate::message::{Envelope, SignalMessage};

/// Accumulates signals per [`Destination`] and flushes each destination's buffer as one
/// [`Envelope::SignalBatch`] once it reaches `flush_size`, or on an explicit [`BulkSender::flush`].
pub struct BulkSender<Id, Signal> {
    bus: Arc<MessageBus<Id, Signal>>,
    flush_size: usize,
    buffers: Mutex<HashMap<Destination, Vec<SignalMessage<Id, Signal>>>>,
}

impl<Id: ExchangeData, Signal: ExchangeData> BulkSender<Id, Signal> {
    /// Builds a sender flushing each destination's buffer once it holds `flush_size` signals.
    ///
    /// `flush_size == 0` degrades to sending every signal immediately, matching a plain
    /// `MessageBus::send` one-for-one.
    pub fn new(bus: Arc<MessageBus<Id, Signal>>, flush_size: usize) -> Self {
        BulkSender { bus, flush_size: flush_size.max(1), buffers: Mutex::new(HashMap::new()) }
    }

    /// Buffers `signal` for `worker_id`, flushing that worker's buffer if it just filled.
    pub fn send_signal(&self, worker_id: usize, signal: SignalMessage<Id, Signal>) -> std::io::Result<()> {
        let destination = Destination::Worker(worker_id);
        let mut buffers = self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let buffer = buffers.entry(destination).or_default();
        buffer.push(signal);
        if buffer.len() >= self.flush_size {
            let batch = std::mem::take(buffer);
            drop(buffers);
            return self.bus.send(destination, Envelope::SignalBatch(batch));
        }
        Ok(())
    }

    /// Flushes every destination with a non-empty buffer.
    pub fn flush(&self) -> std::io::Result<()> {
        let mut buffers = self.buffers.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for (destination, buffer) in buffers.iter_mut() {
            if !buffer.is_empty() {
                let batch = std::mem::take(buffer);
                self.bus.send(*destination, Envelope::SignalBatch(batch))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counters::Counters;

    #[test]
    fn flushes_once_batch_size_is_reached() {
        let mut bus_mut = MessageBus::<u32, i32>::new(Counters::new());
        let receiver = bus_mut.register_local_worker(0);
        let bus = Arc::new(bus_mut);
        let sender = BulkSender::new(bus, 3);

        sender.send_signal(0, SignalMessage::new(None, 1, None, 10)).unwrap();
        sender.send_signal(0, SignalMessage::new(None, 1, None, 11)).unwrap();
        assert!(receiver.try_recv().is_err());

        sender.send_signal(0, SignalMessage::new(None, 1, None, 12)).unwrap();
        match receiver.try_recv() {
            Ok(Envelope::SignalBatch(batch)) => assert_eq!(batch.len(), 3),
            other => panic!("expected a flushed batch, got {other:?}"),
        }
    }

    #[test]
    fn explicit_flush_sends_partial_batch() {
        let mut bus_mut = MessageBus::<u32, i32>::new(Counters::new());
        let receiver = bus_mut.register_local_worker(0);
        let bus = Arc::new(bus_mut);
        let sender = BulkSender::new(bus, 10);

        sender.send_signal(0, SignalMessage::new(None, 1, None, 1)).unwrap();
        sender.flush().unwrap();
        match receiver.try_recv() {
            Ok(Envelope::SignalBatch(batch)) => assert_eq!(batch.len(), 1),
            other => panic!("expected a flushed batch, got {other:?}"),
        }
    }
}
