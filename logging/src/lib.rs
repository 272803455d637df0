//! A small, dependency-free logging core shared by the communication layer and the engine.
//!
//! A [`Registry`] binds named streams to an action invoked on buffered batches of events, and a
//! cloneable [`Logger<T>`] handle is handed out to callers who want to log events of type `T`
//! without caring who (if anyone) is listening.

use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

/// Severity levels accepted by [`crate::Level`]-aware loggers.
///
/// Numeric values (`Debug=0, Config=100, Info=200, Warning=300, Severe=400`) match the graph
/// builder configuration's minimum-level knob, so a configured threshold can be compared
/// directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Fine-grained internal detail, generally only useful when developing the engine itself.
    Debug = 0,
    /// Configuration and bootstrap information.
    Config = 100,
    /// Routine informational events (worker started, graph converged, ...).
    Info = 200,
    /// A recoverable, per-site fault: a missing vertex on mutation, an unknown message.
    Warning = 300,
    /// A caught vertex-callback failure or other fault that was absorbed but should be seen.
    Severe = 400,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Level::Debug => "DEBUG",
            Level::Config => "CONFIG",
            Level::Info => "INFO",
            Level::Warning => "WARNING",
            Level::Severe => "SEVERE",
        };
        f.write_str(name)
    }
}

/// A plain-text log message, as handed to a user-supplied `logger` callback.
#[derive(Debug, Clone)]
pub struct LogMessage {
    /// Severity of the event.
    pub level: Level,
    /// Rendered message text.
    pub message: String,
}

impl LogMessage {
    /// Builds a new log message at the given level.
    pub fn new(level: Level, message: impl Into<String>) -> Self {
        LogMessage { level, message: message.into() }
    }
}

/// A registry of named, typed logging streams.
///
/// Each worker and node owns one registry. Binding a name twice replaces the destination for
/// future loggers obtained via [`Registry::get`] without disturbing loggers already handed out
/// (those keep writing to the old destination).
pub struct Registry {
    time: Instant,
    streams: HashMap<String, Box<dyn Any>>,
}

impl Registry {
    /// Creates a new registry sharing `time` as its common clock origin.
    pub fn new(time: Instant) -> Self {
        Registry { time, streams: HashMap::new() }
    }

    /// Binds `name` to an action invoked on event batches, returning any logger previously
    /// bound to that name.
    pub fn insert<T: 'static>(
        &mut self,
        name: impl Into<String>,
        action: impl Fn(&Duration, &[(Duration, T)]) + 'static,
    ) -> Option<Logger<T>> {
        let logger = Logger::new(self.time, Box::new(action));
        self.streams
            .insert(name.into(), Box::new(logger))
            .and_then(|prior| prior.downcast::<Logger<T>>().ok().map(|b| *b))
    }

    /// Removes a bound logger, signalling end-of-stream to the action on its next drop.
    pub fn remove(&mut self, name: &str) -> Option<Box<dyn Any>> {
        self.streams.remove(name)
    }

    /// Retrieves a shared handle to a bound logger, if `name` is bound to one of type `T`.
    pub fn get<T: 'static>(&self, name: &str) -> Option<Logger<T>> {
        self.streams
            .get(name)
            .and_then(|entry| entry.downcast_ref::<Logger<T>>())
            .cloned()
    }

    /// Flushes every bound stream that can be downcast to `Logger<T>`.
    ///
    /// Streams of other event types are left untouched; callers typically flush once per
    /// concrete event type they log, at the end of a scheduling step.
    pub fn flush_as<T: 'static>(&self) {
        for entry in self.streams.values() {
            if let Some(logger) = entry.downcast_ref::<Logger<T>>() {
                logger.flush();
            }
        }
    }
}

type Action<T> = dyn Fn(&Duration, &[(Duration, T)]);

/// A cheaply cloneable, buffering handle to a named logging stream.
pub struct Logger<T> {
    time: Instant,
    action: Rc<Action<T>>,
    buffer: Rc<RefCell<Vec<(Duration, T)>>>,
}

impl<T> Clone for Logger<T> {
    fn clone(&self) -> Self {
        Logger { time: self.time, action: self.action.clone(), buffer: self.buffer.clone() }
    }
}

impl<T> Logger<T> {
    /// Allocates a new logger bound to `action`, with its own private buffer.
    pub fn new(time: Instant, action: Box<Action<T>>) -> Self {
        Logger { time, action: Rc::from(action), buffer: Rc::new(RefCell::new(Vec::with_capacity(1024))) }
    }

    /// Buffers `event`, flushing automatically once the buffer reaches capacity.
    pub fn log(&self, event: T) {
        let mut buffer = self.buffer.borrow_mut();
        buffer.push((self.time.elapsed(), event));
        if buffer.len() == buffer.capacity() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }

    /// Forces a flush of any buffered events.
    pub fn flush(&self) {
        let mut buffer = self.buffer.borrow_mut();
        if !buffer.is_empty() {
            (self.action)(&self.time.elapsed(), &buffer[..]);
            buffer.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn insert_then_get_shares_buffer() {
        let mut registry = Registry::new(Instant::now());
        let seen = Rc::new(Cell::new(0usize));
        let seen_in_action = seen.clone();
        registry.insert::<u32>("test", move |_now, batch| {
            seen_in_action.set(seen_in_action.get() + batch.len());
        });

        let logger = registry.get::<u32>("test").expect("logger bound");
        for i in 0..2048u32 {
            logger.log(i);
        }
        logger.flush();
        assert_eq!(seen.get(), 2048);
    }

    #[test]
    fn missing_stream_returns_none() {
        let registry = Registry::new(Instant::now());
        assert!(registry.get::<u32>("absent").is_none());
    }

    #[test]
    fn level_ordering_matches_spec() {
        assert!(Level::Debug < Level::Config);
        assert!(Level::Config < Level::Info);
        assert!(Level::Info < Level::Warning);
        assert!(Level::Warning < Level::Severe);
    }
}
