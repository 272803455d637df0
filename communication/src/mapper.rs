//! Deterministic vertex-to-worker assignment.

use std::hash::{Hash, Hasher};
use std::collections::hash_map::DefaultHasher;

/// Assigns vertex ids to workers.
///
/// Implementations must be pure functions of `(id, worker_count)`: every node in the cluster
/// computes the same assignment independently, with no coordination, so the mapping is
/// recomputed rather than looked up.
pub trait VertexToWorkerMapper<Id>: Clone + Send + Sync + 'static {
    /// Returns the worker index, in `0..worker_count`, that owns `id`.
    fn worker_for(&self, id: &Id, worker_count: usize) -> usize;
}

/// The default mapper: `hash(id) % worker_count`.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashMapper;

impl<Id: Hash> VertexToWorkerMapper<Id> for HashMapper {
    fn worker_for(&self, id: &Id, worker_count: usize) -> usize {
        assert!(worker_count > 0, "worker_count must be positive");
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        (hasher.finish() % worker_count as u64) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assignment_is_deterministic_and_in_range() {
        let mapper = HashMapper;
        for id in 0..1000u64 {
            let w = mapper.worker_for(&id, 7);
            assert!(w < 7);
            assert_eq!(w, mapper.worker_for(&id, 7));
        }
    }

    #[test]
    fn single_worker_always_owns_everything() {
        let mapper = HashMapper;
        for id in 0..100u64 {
            assert_eq!(mapper.worker_for(&id, 1), 0);
        }
    }
}
