use objwire_codec::TypeCodec;
use objwire_store::StateStore;
use objwire_types::{FieldBinding, ObjectIdentity, StateField, TypeDescriptor, Value};
use tracing::trace;

use crate::error::StateResult;
use crate::object_state::{FieldPhase, ObjectState};

/// Binds one declared field to an object's [`ObjectState`].
///
/// Reads are lazy and cached; writes are converted, cached, and marked
/// dirty without any I/O.
#[derive(Debug, Clone, Copy)]
pub struct StateDescriptor<'f> {
    field: &'f StateField,
}

impl<'f> StateDescriptor<'f> {
    pub fn new(field: &'f StateField) -> Self {
        Self { field }
    }

    pub fn field(&self) -> &'f StateField {
        self.field
    }

    /// Whether the field holds identities only.
    pub fn is_reference(&self) -> bool {
        self.field.descriptor.is_reference_like()
    }

    pub fn phase(&self, state: &ObjectState) -> FieldPhase {
        state.phase(self.field.index)
    }

    /// Current value; fetched from storage and cached on first access.
    /// Fields absent from storage read as their default.
    pub fn get(
        &self,
        state: &mut ObjectState,
        identity: &ObjectIdentity,
        store: &dyn StateStore,
    ) -> StateResult<Value> {
        if let Some(value) = state.cached(self.field.index) {
            return Ok(value.clone());
        }
        let value = match store.get(identity, self.field.index)? {
            Some(bytes) => TypeCodec::decode_at(&self.field.name, &bytes, &self.field.descriptor)?,
            None => self.field.default.clone(),
        };
        trace!(
            class_id = %identity.class_id,
            object_id = identity.object_id,
            index = self.field.index,
            "field loaded"
        );
        state.load(self.field.index, value.clone());
        Ok(value)
    }

    /// Convert and stage a new value. Returns the stored value.
    pub fn set(&self, state: &mut ObjectState, value: &Value) -> StateResult<Value> {
        let converted = TypeCodec::convert_at(&self.field.name, value, &self.field.descriptor)?;
        state.stage(self.field.index, converted.clone());
        Ok(converted)
    }

    /// Forget the cached value, including any unflushed change.
    pub fn invalidate(&self, state: &mut ObjectState) {
        state.evict(self.field.index);
    }
}

impl FieldBinding for StateDescriptor<'_> {
    fn name(&self) -> &str {
        &self.field.name
    }

    fn index(&self) -> u32 {
        self.field.index
    }

    fn type_descriptor(&self) -> &TypeDescriptor {
        &self.field.descriptor
    }

    fn default_value(&self) -> &Value {
        &self.field.default
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objwire_store::InMemoryStateStore;
    use std::collections::BTreeMap;

    fn id() -> ObjectIdentity {
        ObjectIdentity::new("Counter", 0, 1)
    }

    #[test]
    fn set_then_get_hits_cache() {
        let field = StateField::new("count", 0, TypeDescriptor::int());
        let desc = StateDescriptor::new(&field);
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();

        desc.set(&mut state, &Value::Int(5)).unwrap();
        assert_eq!(desc.get(&mut state, &id(), &store).unwrap(), Value::Int(5));
        assert_eq!(store.read_count(), 0);
        assert_eq!(desc.phase(&state), FieldPhase::Dirty);
    }

    #[test]
    fn get_loads_once() {
        let field = StateField::new("count", 0, TypeDescriptor::int());
        let desc = StateDescriptor::new(&field);
        let store = InMemoryStateStore::new();
        store.set_all(&id(), &BTreeMap::from([(0, b"7".to_vec())])).unwrap();
        let mut state = ObjectState::new_unloaded();

        assert_eq!(desc.get(&mut state, &id(), &store).unwrap(), Value::Int(7));
        assert_eq!(desc.get(&mut state, &id(), &store).unwrap(), Value::Int(7));
        assert_eq!(store.read_count(), 1);
        assert_eq!(desc.phase(&state), FieldPhase::Clean);
    }

    #[test]
    fn absent_field_reads_default() {
        let field = StateField::new("count", 0, TypeDescriptor::int()).with_default(3i64);
        let desc = StateDescriptor::new(&field);
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();
        assert_eq!(desc.get(&mut state, &id(), &store).unwrap(), Value::Int(3));
    }

    #[test]
    fn set_converts_and_rejects() {
        let field = StateField::new("count", 0, TypeDescriptor::int());
        let desc = StateDescriptor::new(&field);
        let mut state = ObjectState::new_unloaded();
        assert_eq!(desc.set(&mut state, &Value::from("5")).unwrap(), Value::Int(5));
        assert!(desc.set(&mut state, &Value::Float(1.5)).is_err());
        assert_eq!(state.cached(0), Some(&Value::Int(5)));
    }

    #[test]
    fn invalidate_forces_reload() {
        let field = StateField::new("count", 0, TypeDescriptor::int());
        let desc = StateDescriptor::new(&field);
        let store = InMemoryStateStore::new();
        let mut state = ObjectState::new_unloaded();
        desc.get(&mut state, &id(), &store).unwrap();
        desc.invalidate(&mut state);
        assert_eq!(desc.phase(&state), FieldPhase::Unloaded);
        desc.get(&mut state, &id(), &store).unwrap();
        assert_eq!(store.read_count(), 2);
    }

    #[test]
    fn corrupt_bytes_fail_with_field_name() {
        let field = StateField::new("count", 0, TypeDescriptor::int());
        let desc = StateDescriptor::new(&field);
        let store = InMemoryStateStore::new();
        store.set_all(&id(), &BTreeMap::from([(0, b"\"x\"".to_vec())])).unwrap();
        let mut state = ObjectState::new_unloaded();
        let err = desc.get(&mut state, &id(), &store).unwrap_err();
        assert!(err.to_string().contains("count"));
        assert_eq!(desc.phase(&state), FieldPhase::Unloaded);
    }
}
