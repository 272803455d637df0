//! Marker traits describing what may travel through the message bus.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// A composite trait for types usable as vertex identifiers, signal payloads, or any other
/// value held locally by a single worker.
pub trait Data: Clone + Send + 'static {}
impl<T: Clone + Send + 'static> Data for T {}

/// Types that may additionally cross a process or network boundary.
///
/// The bus requires `ExchangeData` for vertex ids and signal payloads uniformly, whether the
/// computation runs in-thread, in-process, or across a TCP cluster: this keeps a single code
/// path correct under all three [`crate::initialize::Configuration`] variants instead of
/// special-casing distributed mode. This does not mandate a *persistent* vertex serialization
/// format; the bound only concerns values that must already round-trip through a channel to
/// satisfy the signal/collect contract.
pub trait ExchangeData: Data + Serialize + DeserializeOwned {}
impl<T: Data + Serialize + DeserializeOwned> ExchangeData for T {}
