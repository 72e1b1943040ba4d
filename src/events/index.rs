//! # Listener index: copy-on-write, priority-sorted snapshots.
//!
//! Maps each registered event type (or family marker) to an immutable,
//! priority-sorted array of listener entries.
//!
//! ## Rules
//! - **Reads are lock-free**: a reader loads the current snapshot and keeps
//!   a fully consistent, unchanging view for as long as it holds the `Arc`.
//! - **Writes are copy-on-write**: every structural change builds a new
//!   array (and map) and publishes it with a compare-and-swap, retried on
//!   contention. Arrays are never mutated in place.
//! - Insertion uses the binary-search position for `(priority, seq)`, so
//!   equal priorities keep registration order even across CAS retries.
//! - Removing the last entry of a type removes the map slot entirely.
//! - A generation counter increments on every successful mutation; the
//!   dispatch engine uses it to invalidate merged-order caches.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::events::listener::{ErasedHandler, ListenerEntry};

type IndexMap = HashMap<TypeId, Arc<[ListenerEntry]>>;

/// Per-event-type listener storage.
pub(crate) struct ListenerIndex {
    map: ArcSwap<IndexMap>,
    /// Bumped after every successful insert/remove.
    generation: AtomicU64,
    /// Monotonic registration counter; provides handle ids and tie-breaks.
    seq: AtomicU64,
}

impl ListenerIndex {
    pub(crate) fn new() -> Self {
        Self {
            map: ArcSwap::from_pointee(HashMap::new()),
            generation: AtomicU64::new(0),
            seq: AtomicU64::new(0),
        }
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Inserts a listener and returns its id.
    ///
    /// If `identity` matches an existing entry for the same type and
    /// priority, the insert is a no-op and the existing id is returned
    /// (registration-object duplicate semantics).
    pub(crate) fn add(
        &self,
        event_type: TypeId,
        event_type_name: &'static str,
        priority: i8,
        identity: Option<usize>,
        handler: ErasedHandler,
    ) -> u64 {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let entry = ListenerEntry {
            priority,
            seq,
            event_type_name,
            identity,
            handler,
        };

        loop {
            let current = self.map.load_full();
            let existing: &[ListenerEntry] = current
                .get(&event_type)
                .map(|entries| entries.as_ref())
                .unwrap_or(&[]);

            if let Some(id) = identity {
                if let Some(dup) = existing
                    .iter()
                    .find(|e| e.identity == Some(id) && e.priority == priority)
                {
                    return dup.seq;
                }
            }

            let pos = existing.partition_point(|e| e.sort_key() < entry.sort_key());
            let mut entries = Vec::with_capacity(existing.len() + 1);
            entries.extend_from_slice(&existing[..pos]);
            entries.push(entry.clone());
            entries.extend_from_slice(&existing[pos..]);

            let mut next: IndexMap = (*current).clone();
            next.insert(event_type, entries.into());

            let prev = self.map.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                self.generation.fetch_add(1, Ordering::Release);
                return seq;
            }
        }
    }

    /// Removes a listener by id. Idempotent: absent ids are a no-op.
    pub(crate) fn remove(&self, event_type: TypeId, id: u64) -> bool {
        loop {
            let current = self.map.load_full();
            let Some(existing) = current.get(&event_type) else {
                return false;
            };
            let Some(pos) = existing.iter().position(|e| e.seq == id) else {
                return false;
            };

            let mut next: IndexMap = (*current).clone();
            if existing.len() == 1 {
                next.remove(&event_type);
            } else {
                let mut entries = existing.to_vec();
                entries.remove(pos);
                next.insert(event_type, entries.into());
            }

            let prev = self.map.compare_and_swap(&current, Arc::new(next));
            if Arc::ptr_eq(&prev, &current) {
                self.generation.fetch_add(1, Ordering::Release);
                return true;
            }
        }
    }

    /// Returns the merged, globally priority-ordered entries for a set of
    /// dispatch types.
    ///
    /// The union is re-sorted by `(priority, seq)`; concatenating per-type
    /// arrays would break the cross-type ordering guarantee.
    pub(crate) fn merged(&self, types: &[TypeId]) -> Vec<ListenerEntry> {
        let map = self.map.load();
        let mut out = Vec::new();
        for ty in types {
            if let Some(entries) = map.get(ty) {
                out.extend(entries.iter().cloned());
            }
        }
        out.sort_unstable_by_key(ListenerEntry::sort_key);
        out
    }

    /// Current snapshot for one type, if any listeners are registered.
    #[cfg(test)]
    pub(crate) fn snapshot_for(&self, event_type: TypeId) -> Option<Arc<[ListenerEntry]>> {
        self.map.load().get(&event_type).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::event::Event;

    #[derive(Debug)]
    struct Ping;
    impl Event for Ping {}

    #[derive(Debug)]
    struct Pong;
    impl Event for Pong {}

    fn noop_handler() -> ErasedHandler {
        ErasedHandler::Sync(Arc::new(|_ev: &dyn Event| {}))
    }

    fn add(index: &ListenerIndex, ty: TypeId, priority: i8, identity: Option<usize>) -> u64 {
        index.add(ty, "test", priority, identity, noop_handler())
    }

    #[test]
    fn test_insert_orders_by_priority_then_registration() {
        let index = ListenerIndex::new();
        let ty = TypeId::of::<Ping>();
        let a = add(&index, ty, 10, None);
        let b = add(&index, ty, -5, None);
        let c = add(&index, ty, 10, None);
        let d = add(&index, ty, 0, None);

        let snapshot = index.snapshot_for(ty).expect("snapshot");
        let ids: Vec<u64> = snapshot.iter().map(|e| e.seq).collect();
        assert_eq!(ids, vec![b, d, a, c]);
    }

    #[test]
    fn test_duplicate_identity_same_priority_is_noop() {
        let index = ListenerIndex::new();
        let ty = TypeId::of::<Ping>();
        let first = add(&index, ty, 0, Some(0xBEEF));
        let second = add(&index, ty, 0, Some(0xBEEF));
        assert_eq!(first, second);
        assert_eq!(index.snapshot_for(ty).expect("snapshot").len(), 1);

        // Same identity at a different priority is a distinct listener.
        let third = add(&index, ty, 1, Some(0xBEEF));
        assert_ne!(first, third);
        assert_eq!(index.snapshot_for(ty).expect("snapshot").len(), 2);
    }

    #[test]
    fn test_remove_is_idempotent_and_clears_empty_slot() {
        let index = ListenerIndex::new();
        let ty = TypeId::of::<Ping>();
        let id = add(&index, ty, 0, None);

        assert!(index.remove(ty, id));
        assert!(index.snapshot_for(ty).is_none(), "empty slot is dropped");
        assert!(!index.remove(ty, id), "second removal is a no-op");
    }

    #[test]
    fn test_generation_bumps_on_every_mutation() {
        let index = ListenerIndex::new();
        let ty = TypeId::of::<Pong>();
        let g0 = index.generation();
        let id = add(&index, ty, 0, None);
        let g1 = index.generation();
        assert!(g1 > g0);
        index.remove(ty, id);
        assert!(index.generation() > g1);
    }

    #[test]
    fn test_merged_interleaves_across_types() {
        let index = ListenerIndex::new();
        let ping = TypeId::of::<Ping>();
        let pong = TypeId::of::<Pong>();
        let a = add(&index, ping, 5, None);
        let b = add(&index, pong, -1, None);
        let c = add(&index, ping, 0, None);

        let merged = index.merged(&[ping, pong]);
        let ids: Vec<u64> = merged.iter().map(|e| e.seq).collect();
        assert_eq!(ids, vec![b, c, a]);
    }
}
