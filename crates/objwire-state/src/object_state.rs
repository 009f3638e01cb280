use std::collections::{BTreeMap, BTreeSet};

use objwire_codec::TypeCodec;
use objwire_store::StateStore;
use objwire_types::{ClassSchema, ObjectIdentity, Value};
use tracing::debug;

use crate::error::{StateError, StateResult};

/// Where one field of one object stands.
///
/// `Unloaded -> Clean -> Dirty -> Flushed`, with `set` moving any phase to
/// `Dirty` and a failed flush leaving the field `Dirty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPhase {
    /// Nothing cached; the next read goes to storage.
    Unloaded,
    /// Cached and identical to what storage (or the default) holds.
    Clean,
    /// Cached with a change that has not been written yet.
    Dirty,
    /// Cached and written by the most recent flush.
    Flushed,
}

impl FieldPhase {
    pub fn is_cached(self) -> bool {
        !matches!(self, Self::Unloaded)
    }
}

/// Cached field values and the dirty set of one live object.
///
/// Owned by exactly one object and never shared. The dirty set is the
/// sole record of what the next flush must write.
#[derive(Debug, Clone, Default)]
pub struct ObjectState {
    cache: BTreeMap<u32, Value>,
    dirty: BTreeSet<u32>,
    flushed: BTreeSet<u32>,
}

impl ObjectState {
    /// State of an object loaded by identity: every field starts unloaded.
    pub fn new_unloaded() -> Self {
        Self::default()
    }

    /// State of a newly created object: every field holds its default and
    /// is clean.
    pub fn with_defaults(schema: &ClassSchema) -> Self {
        let cache = schema
            .fields()
            .iter()
            .map(|f| (f.index, f.default.clone()))
            .collect();
        Self {
            cache,
            ..Self::default()
        }
    }

    pub fn phase(&self, index: u32) -> FieldPhase {
        if self.dirty.contains(&index) {
            FieldPhase::Dirty
        } else if self.flushed.contains(&index) {
            FieldPhase::Flushed
        } else if self.cache.contains_key(&index) {
            FieldPhase::Clean
        } else {
            FieldPhase::Unloaded
        }
    }

    pub fn cached(&self, index: u32) -> Option<&Value> {
        self.cache.get(&index)
    }

    /// Cache a value read from storage.
    pub(crate) fn load(&mut self, index: u32, value: Value) {
        self.cache.insert(index, value);
    }

    /// Cache a new value and mark it dirty.
    pub(crate) fn stage(&mut self, index: u32, value: Value) {
        self.cache.insert(index, value);
        self.flushed.remove(&index);
        self.dirty.insert(index);
    }

    /// Drop the cached value and any unflushed change.
    pub(crate) fn evict(&mut self, index: u32) {
        self.cache.remove(&index);
        self.dirty.remove(&index);
        self.flushed.remove(&index);
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    pub fn dirty_indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.dirty.iter().copied()
    }

    /// Encode every dirty field into one batch, keyed by index.
    pub fn prepare_flush(&self, schema: &ClassSchema) -> StateResult<BTreeMap<u32, Vec<u8>>> {
        let mut batch = BTreeMap::new();
        for &index in &self.dirty {
            let field = schema
                .field_by_index(index)
                .ok_or_else(|| StateError::UnknownField {
                    class: schema.class_id().to_string(),
                    field: format!("#{index}"),
                })?;
            let value = self.cache.get(&index).unwrap_or(&Value::Null);
            batch.insert(index, TypeCodec::encode_at(&field.name, value, &field.descriptor)?);
        }
        Ok(batch)
    }

    /// Mark the given indices written.
    pub fn complete_flush<'a>(&mut self, written: impl IntoIterator<Item = &'a u32>) {
        for index in written {
            if self.dirty.remove(index) {
                self.flushed.insert(*index);
            }
        }
    }

    /// Write every dirty field as one batch.
    ///
    /// Returns the number of fields written. On failure the dirty set is
    /// left untouched so a later flush retries the same fields.
    pub fn flush(
        &mut self,
        identity: &ObjectIdentity,
        schema: &ClassSchema,
        store: &dyn StateStore,
    ) -> StateResult<usize> {
        if self.dirty.is_empty() {
            return Ok(0);
        }
        let batch = self.prepare_flush(schema)?;
        store.set_all(identity, &batch)?;
        self.complete_flush(batch.keys());
        debug!(
            class_id = %identity.class_id,
            object_id = identity.object_id,
            fields = batch.len(),
            "object flushed"
        );
        Ok(batch.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objwire_store::InMemoryStateStore;
    use objwire_types::{StateField, TypeDescriptor};

    fn schema() -> ClassSchema {
        ClassSchema::builder("Counter")
            .field(StateField::new("count", 0, TypeDescriptor::int()))
            .field(StateField::new("label", 1, TypeDescriptor::string()).with_default("n/a"))
            .build()
            .unwrap()
    }

    fn id() -> ObjectIdentity {
        ObjectIdentity::new("Counter", 0, 1)
    }

    #[test]
    fn defaults_start_clean() {
        let state = ObjectState::with_defaults(&schema());
        assert_eq!(state.phase(0), FieldPhase::Clean);
        assert_eq!(state.cached(1), Some(&Value::from("n/a")));
        assert!(!state.is_dirty());
    }

    #[test]
    fn unloaded_has_no_cache() {
        let state = ObjectState::new_unloaded();
        assert_eq!(state.phase(0), FieldPhase::Unloaded);
        assert!(state.cached(0).is_none());
    }

    #[test]
    fn flush_writes_one_batch() {
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();
        state.stage(0, Value::Int(5));
        state.stage(1, Value::from("x"));
        assert_eq!(state.flush(&id(), &schema(), &store).unwrap(), 2);
        assert_eq!(store.write_count(), 1);
        assert_eq!(state.phase(0), FieldPhase::Flushed);
        assert!(!state.is_dirty());
        assert_eq!(store.snapshot(&id())[&0], b"5".to_vec());
    }

    #[test]
    fn second_flush_is_free() {
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();
        state.stage(0, Value::Int(5));
        state.flush(&id(), &schema(), &store).unwrap();
        assert_eq!(state.flush(&id(), &schema(), &store).unwrap(), 0);
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn failed_flush_keeps_dirty() {
        let store = InMemoryStateStore::new();
        store.fence(&id());
        let mut state = ObjectState::new_unloaded();
        state.stage(0, Value::Int(5));
        assert!(matches!(
            state.flush(&id(), &schema(), &store).unwrap_err(),
            StateError::Store(_)
        ));
        assert_eq!(state.phase(0), FieldPhase::Dirty);

        store.unfence(&id());
        assert_eq!(state.flush(&id(), &schema(), &store).unwrap(), 1);
    }

    #[test]
    fn set_after_flush_is_dirty_again() {
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();
        state.stage(0, Value::Int(1));
        state.flush(&id(), &schema(), &store).unwrap();
        state.stage(0, Value::Int(2));
        assert_eq!(state.phase(0), FieldPhase::Dirty);
        assert_eq!(state.dirty_indices().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn orphan_index_is_rejected() {
        let mut state = ObjectState::new_unloaded();
        state.stage(9, Value::Int(1));
        assert!(matches!(
            state.prepare_flush(&schema()).unwrap_err(),
            StateError::UnknownField { .. }
        ));
    }
}
