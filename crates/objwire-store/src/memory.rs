use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use objwire_types::ObjectIdentity;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::traits::StateStore;

/// In-memory, HashMap-based state store.
///
/// Intended for tests and embedding. Slots are held behind a `RwLock` and
/// cloned on read/write. Read and write calls are counted so callers can
/// check how much I/O an operation performed.
pub struct InMemoryStateStore {
    objects: RwLock<HashMap<ObjectIdentity, BTreeMap<u32, Vec<u8>>>>,
    fenced: RwLock<HashSet<ObjectIdentity>>,
    reads: AtomicU64,
    writes: AtomicU64,
}

impl InMemoryStateStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            fenced: RwLock::new(HashSet::new()),
            reads: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of objects with at least one stored field.
    pub fn len(&self) -> usize {
        self.objects.read().expect("lock poisoned").len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.objects.read().expect("lock poisoned").is_empty()
    }

    /// Remove all objects from the store.
    pub fn clear(&self) {
        self.objects.write().expect("lock poisoned").clear();
    }

    /// Sorted identities of every stored object.
    pub fn identities(&self) -> Vec<ObjectIdentity> {
        let map = self.objects.read().expect("lock poisoned");
        let mut ids: Vec<ObjectIdentity> = map.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// All stored slots of one object, without counting as a read.
    pub fn snapshot(&self, identity: &ObjectIdentity) -> BTreeMap<u32, Vec<u8>> {
        self.objects
            .read()
            .expect("lock poisoned")
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of `get` calls served.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    /// Number of successful `set_all` batches applied.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every write to `identity` fail as unavailable until unfenced.
    pub fn fence(&self, identity: &ObjectIdentity) {
        self.fenced
            .write()
            .expect("lock poisoned")
            .insert(identity.clone());
    }

    pub fn unfence(&self, identity: &ObjectIdentity) {
        self.fenced.write().expect("lock poisoned").remove(identity);
    }
}

impl Default for InMemoryStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore for InMemoryStateStore {
    fn get(&self, identity: &ObjectIdentity, index: u32) -> StoreResult<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let map = self.objects.read().expect("lock poisoned");
        Ok(map.get(identity).and_then(|slots| slots.get(&index)).cloned())
    }

    fn set_all(
        &self,
        identity: &ObjectIdentity,
        fields: &BTreeMap<u32, Vec<u8>>,
    ) -> StoreResult<()> {
        if self.fenced.read().expect("lock poisoned").contains(identity) {
            return Err(StoreError::Unavailable {
                identity: identity.clone(),
                reason: "object is fenced".into(),
            });
        }
        if fields.is_empty() {
            return Ok(());
        }
        let mut map = self.objects.write().expect("lock poisoned");
        let slots = map.entry(identity.clone()).or_default();
        for (index, bytes) in fields {
            slots.insert(*index, bytes.clone());
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        debug!(
            class_id = %identity.class_id,
            object_id = identity.object_id,
            fields = fields.len(),
            "state batch written"
        );
        Ok(())
    }

    fn delete(&self, identity: &ObjectIdentity) -> StoreResult<bool> {
        let mut map = self.objects.write().expect("lock poisoned");
        Ok(map.remove(identity).is_some())
    }
}

impl std::fmt::Debug for InMemoryStateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStateStore")
            .field("object_count", &self.len())
            .field("reads", &self.read_count())
            .field("writes", &self.write_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(object_id: u64) -> ObjectIdentity {
        ObjectIdentity::new("Counter", 0, object_id)
    }

    fn batch(entries: &[(u32, &[u8])]) -> BTreeMap<u32, Vec<u8>> {
        entries.iter().map(|(i, b)| (*i, b.to_vec())).collect()
    }

    // -----------------------------------------------------------------------
    // Core operations
    // -----------------------------------------------------------------------

    #[test]
    fn set_all_then_get() {
        let store = InMemoryStateStore::new();
        store.set_all(&id(1), &batch(&[(0, b"5"), (1, b"\"a\"")])).unwrap();
        assert_eq!(store.get(&id(1), 0).unwrap(), Some(b"5".to_vec()));
        assert_eq!(store.get(&id(1), 1).unwrap(), Some(b"\"a\"".to_vec()));
        assert_eq!(store.get(&id(1), 2).unwrap(), None);
        assert_eq!(store.get(&id(2), 0).unwrap(), None);
    }

    #[test]
    fn set_all_merges_slots() {
        let store = InMemoryStateStore::new();
        store.set_all(&id(1), &batch(&[(0, b"1"), (1, b"2")])).unwrap();
        store.set_all(&id(1), &batch(&[(1, b"3")])).unwrap();
        assert_eq!(store.snapshot(&id(1)), batch(&[(0, b"1"), (1, b"3")]));
    }

    #[test]
    fn delete_removes_object() {
        let store = InMemoryStateStore::new();
        store.set_all(&id(1), &batch(&[(0, b"1")])).unwrap();
        assert!(store.delete(&id(1)).unwrap());
        assert!(!store.delete(&id(1)).unwrap());
        assert!(store.is_empty());
    }

    #[test]
    fn get_all_skips_missing() {
        let store = InMemoryStateStore::new();
        store.set_all(&id(1), &batch(&[(0, b"1"), (2, b"3")])).unwrap();
        let got = store.get_all(&id(1), &[0, 1, 2]).unwrap();
        assert_eq!(got, batch(&[(0, b"1"), (2, b"3")]));
    }

    // -----------------------------------------------------------------------
    // Counters and fencing
    // -----------------------------------------------------------------------

    #[test]
    fn counters_track_io() {
        let store = InMemoryStateStore::new();
        store.set_all(&id(1), &batch(&[(0, b"1")])).unwrap();
        store.set_all(&id(1), &BTreeMap::new()).unwrap();
        store.get(&id(1), 0).unwrap();
        let _ = store.snapshot(&id(1));
        assert_eq!(store.write_count(), 1);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn fenced_object_rejects_writes() {
        let store = InMemoryStateStore::new();
        store.fence(&id(1));
        let err = store.set_all(&id(1), &batch(&[(0, b"1")])).unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
        store.set_all(&id(2), &batch(&[(0, b"1")])).unwrap();
        store.unfence(&id(1));
        store.set_all(&id(1), &batch(&[(0, b"1")])).unwrap();
        assert_eq!(store.identities(), vec![id(1), id(2)]);
    }

    #[test]
    fn concurrent_writers() {
        use std::sync::Arc;
        let store = Arc::new(InMemoryStateStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store.set_all(&id(i), &batch(&[(0, b"1")])).unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.len(), 8);
        assert_eq!(store.write_count(), 8);
    }
}
