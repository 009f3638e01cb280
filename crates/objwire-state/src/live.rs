use std::fmt;
use std::sync::Arc;

use objwire_proxy::{IdentityLike, IdentityRegistry, ReferenceProxy};
use objwire_types::{
    AccessorKind, ClassSchema, FromValue, HasIdentity, IntoValue, ObjectIdentity, Value,
};

use crate::descriptor::StateDescriptor;
use crate::error::{StateError, StateResult};
use crate::object_state::{FieldPhase, ObjectState};

/// A resident object: identity, class schema, and cached state.
///
/// All field traffic goes through [`StateDescriptor`]s. Nothing here
/// touches storage except lazy field loads and [`LiveObject::flush`].
#[derive(Clone)]
pub struct LiveObject {
    identity: ObjectIdentity,
    schema: Arc<ClassSchema>,
    state: ObjectState,
    identities: Arc<IdentityRegistry>,
}

impl LiveObject {
    /// A new object: defaults applied, nothing to write yet.
    pub fn created(
        identity: ObjectIdentity,
        schema: Arc<ClassSchema>,
        identities: Arc<IdentityRegistry>,
    ) -> Self {
        let state = ObjectState::with_defaults(&schema);
        Self {
            identity,
            schema,
            state,
            identities,
        }
    }

    /// An existing object; fields load on first access.
    pub fn loaded(
        identity: ObjectIdentity,
        schema: Arc<ClassSchema>,
        identities: Arc<IdentityRegistry>,
    ) -> Self {
        Self {
            identity,
            schema,
            state: ObjectState::new_unloaded(),
            identities,
        }
    }

    pub fn schema(&self) -> &Arc<ClassSchema> {
        &self.schema
    }

    pub fn class_id(&self) -> &str {
        &self.identity.class_id
    }

    pub fn state(&self) -> &ObjectState {
        &self.state
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    fn unknown_field(&self, name: &str) -> StateError {
        StateError::UnknownField {
            class: self.identity.class_id.clone(),
            field: name.to_string(),
        }
    }

    fn descriptor(&self, name: &str) -> StateResult<StateDescriptor<'_>> {
        self.schema
            .field(name)
            .map(StateDescriptor::new)
            .ok_or_else(|| self.unknown_field(name))
    }

    // ---- Fields ----

    pub fn get(&mut self, name: &str) -> StateResult<Value> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown_field(name))?;
        StateDescriptor::new(field).get(
            &mut self.state,
            &self.identity,
            self.identities.store().as_ref(),
        )
    }

    pub fn get_as<T: FromValue>(&mut self, name: &str) -> StateResult<T> {
        Ok(T::from_value(self.get(name)?)?)
    }

    /// Convert, validate, and stage a value. Returns the stored value.
    pub fn set(&mut self, name: &str, value: impl IntoValue) -> StateResult<Value> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown_field(name))?;
        StateDescriptor::new(field).set(&mut self.state, &value.into_value())
    }

    pub fn phase(&self, name: &str) -> StateResult<FieldPhase> {
        Ok(self.descriptor(name)?.phase(&self.state))
    }

    pub fn invalidate(&mut self, name: &str) -> StateResult<()> {
        let schema = Arc::clone(&self.schema);
        let field = schema.field(name).ok_or_else(|| self.unknown_field(name))?;
        StateDescriptor::new(field).invalidate(&mut self.state);
        Ok(())
    }

    // ---- Reference fields ----

    /// Store the identity of `target` in a reference field.
    ///
    /// The target's class is checked here; whether the target exists is
    /// only discovered when the proxy is first used.
    pub fn set_reference<'a>(
        &mut self,
        name: &str,
        target: impl Into<IdentityLike<'a>>,
    ) -> StateResult<ObjectIdentity> {
        let class = self.reference_class(name)?;
        let identity = self.identities.normalize_for(target, &class)?;
        self.set(name, Value::Ref(identity.clone()))?;
        Ok(identity)
    }

    /// Clear an optional reference field.
    pub fn clear_reference(&mut self, name: &str) -> StateResult<()> {
        self.reference_class(name)?;
        self.set(name, Value::Null)?;
        Ok(())
    }

    /// Read a reference field as a proxy; `None` when the field is empty.
    pub fn get_reference(&mut self, name: &str) -> StateResult<Option<ReferenceProxy>> {
        let class = self.reference_class(name)?;
        match self.get(name)? {
            Value::Null => Ok(None),
            value => {
                let identity = self.identities.normalize_for(&value, &class)?;
                Ok(Some(self.identities.materialize(&identity, &class)?))
            }
        }
    }

    fn reference_class(&self, name: &str) -> StateResult<String> {
        let desc = self.descriptor(name)?;
        desc.field()
            .descriptor
            .referenced_class()
            .map(str::to_string)
            .ok_or_else(|| StateError::NotAReference {
                field: name.to_string(),
                descriptor: desc.field().descriptor.kind_name(),
            })
    }

    // ---- Accessors ----

    fn accessor_field(&self, accessor: &str, kind: AccessorKind) -> StateResult<String> {
        let spec = self
            .schema
            .accessor(accessor)
            .ok_or_else(|| StateError::UnknownAccessor {
                class: self.identity.class_id.clone(),
                accessor: accessor.to_string(),
            })?;
        if spec.kind != kind {
            return Err(StateError::WrongAccessorKind {
                accessor: accessor.to_string(),
                expected: format!("{kind:?}").to_lowercase(),
            });
        }
        Ok(spec.field.clone())
    }

    /// Call a read accessor.
    pub fn read(&mut self, accessor: &str) -> StateResult<Value> {
        let field = self.accessor_field(accessor, AccessorKind::Read)?;
        self.get(&field)
    }

    /// Call a write accessor. Only the bound field is touched.
    pub fn write(&mut self, accessor: &str, value: impl IntoValue) -> StateResult<Value> {
        let field = self.accessor_field(accessor, AccessorKind::Write)?;
        self.set(&field, value)
    }

    // ---- Identity and flushing ----

    /// A proxy for this object, equal to any other proxy of its identity.
    pub fn as_reference(&self) -> StateResult<ReferenceProxy> {
        Ok(self.identities.materialize(&self.identity, &self.identity.class_id)?)
    }

    pub fn is_dirty(&self) -> bool {
        self.state.is_dirty()
    }

    /// Names of fields with unflushed changes, in index order.
    pub fn dirty_fields(&self) -> Vec<&str> {
        self.state
            .dirty_indices()
            .filter_map(|i| self.schema.field_by_index(i))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Write all dirty fields as one batch. Returns the number written.
    pub fn flush(&mut self) -> StateResult<usize> {
        self.state.flush(
            &self.identity,
            &self.schema,
            self.identities.store().as_ref(),
        )
    }
}

impl HasIdentity for LiveObject {
    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }
}

impl PartialEq<ReferenceProxy> for LiveObject {
    fn eq(&self, other: &ReferenceProxy) -> bool {
        &self.identity == other.identity()
    }
}

impl IntoValue for &LiveObject {
    fn into_value(self) -> Value {
        Value::Ref(self.identity.clone())
    }
}

impl<'a> From<&'a LiveObject> for IdentityLike<'a> {
    fn from(object: &'a LiveObject) -> Self {
        IdentityLike::Instance(object)
    }
}

impl fmt::Debug for LiveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveObject")
            .field("identity", &self.identity)
            .field("dirty", &self.dirty_fields())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    use objwire_proxy::NoTransport;
    use objwire_store::{InMemoryStateStore, StateStore};
    use objwire_types::{Registry, StateField, TypeDescriptor};

    struct Fixture {
        identities: Arc<IdentityRegistry>,
        store: Arc<InMemoryStateStore>,
    }

    impl Fixture {
        fn new() -> Self {
            let mut registry = Registry::new();
            registry
                .register(
                    ClassSchema::builder("Profile")
                        .field(StateField::new("name", 0, TypeDescriptor::string()))
                        .build()
                        .unwrap(),
                )
                .unwrap();
            registry
                .register(
                    ClassSchema::builder("Account")
                        .field(StateField::new("count", 0, TypeDescriptor::int()))
                        .field(StateField::new(
                            "owner",
                            1,
                            TypeDescriptor::optional(TypeDescriptor::reference("Profile")),
                        ))
                        .field(StateField::new(
                            "followers",
                            2,
                            TypeDescriptor::list(TypeDescriptor::reference("Profile")),
                        ))
                        .field(StateField::new("secret", 3, TypeDescriptor::string()))
                        .read_accessor("get_count", "count")
                        .write_accessor("set_secret", "secret")
                        .build()
                        .unwrap(),
                )
                .unwrap();
            let store = Arc::new(InMemoryStateStore::new());
            let identities = Arc::new(IdentityRegistry::new(
                Arc::new(registry),
                store.clone(),
                Arc::new(NoTransport),
            ));
            Self { identities, store }
        }

        fn create(&self, class: &str, object_id: u64) -> LiveObject {
            let schema = self.identities.registry().schema(class).unwrap();
            LiveObject::created(
                ObjectIdentity::new(class, 0, object_id),
                schema,
                Arc::clone(&self.identities),
            )
        }

        fn load(&self, class: &str, object_id: u64) -> LiveObject {
            let schema = self.identities.registry().schema(class).unwrap();
            LiveObject::loaded(
                ObjectIdentity::new(class, 0, object_id),
                schema,
                Arc::clone(&self.identities),
            )
        }
    }

    // -----------------------------------------------------------------------
    // Plain fields
    // -----------------------------------------------------------------------

    #[test]
    fn set_then_get_without_io() {
        let fx = Fixture::new();
        let mut account = fx.load("Account", 1);
        account.set("count", 5i64).unwrap();
        assert_eq!(account.get_as::<i64>("count").unwrap(), 5);
        assert_eq!(fx.store.read_count(), 0);
        assert_eq!(account.dirty_fields(), vec!["count"]);
    }

    #[test]
    fn created_object_has_defaults_and_nothing_to_flush() {
        let fx = Fixture::new();
        let mut account = fx.create("Account", 1);
        assert_eq!(account.get("count").unwrap(), Value::Int(0));
        assert_eq!(account.get("owner").unwrap(), Value::Null);
        assert_eq!(account.flush().unwrap(), 0);
        assert_eq!(fx.store.write_count(), 0);
    }

    #[test]
    fn loaded_object_reads_storage_lazily() {
        let fx = Fixture::new();
        let mut writer = fx.create("Account", 1);
        writer.set("count", 9i64).unwrap();
        writer.flush().unwrap();

        let mut reader = fx.load("Account", 1);
        assert_eq!(reader.phase("count").unwrap(), FieldPhase::Unloaded);
        assert_eq!(reader.get("count").unwrap(), Value::Int(9));
        assert_eq!(reader.phase("count").unwrap(), FieldPhase::Clean);
    }

    #[test]
    fn unknown_field() {
        let fx = Fixture::new();
        let mut account = fx.create("Account", 1);
        assert!(matches!(
            account.set("nope", 1i64).unwrap_err(),
            StateError::UnknownField { .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Reference fields
    // -----------------------------------------------------------------------

    #[test]
    fn reference_field_reads_back_a_proxy() {
        let fx = Fixture::new();
        let profile = fx.create("Profile", 7);
        let mut account = fx.create("Account", 1);

        account.set_reference("owner", &profile).unwrap();
        let owner = account.get_reference("owner").unwrap().unwrap();
        assert_eq!(owner.identity(), profile.identity());
        assert_eq!(profile, owner);
    }

    #[test]
    fn reference_field_stores_identity_only() {
        let fx = Fixture::new();
        let mut profile = fx.create("Profile", 7);
        profile.set("name", "a very distinctive name").unwrap();
        profile.flush().unwrap();

        let mut account = fx.create("Account", 1);
        account.set_reference("owner", &profile).unwrap();
        account.set("followers", vec![Value::Ref(profile.identity().clone())]).unwrap();
        account.flush().unwrap();

        for bytes in fx.store.snapshot(account.identity()).values() {
            let text = String::from_utf8(bytes.clone()).unwrap();
            assert!(!text.contains("distinctive"));
        }
        let owner = String::from_utf8(fx.store.get(account.identity(), 1).unwrap().unwrap()).unwrap();
        assert!(owner.contains(r#""class_id":"Profile""#));
        assert!(owner.contains(r#""object_id":7"#));
        assert!(!owner.contains("name"));
    }

    #[test]
    fn reference_assignment_checks_class_not_existence() {
        let fx = Fixture::new();
        let other = fx.create("Account", 2);
        let mut account = fx.create("Account", 1);
        assert!(account.set_reference("owner", &other).is_err());
        account.set_reference("owner", ("Profile", 0, 404)).unwrap();
        assert_eq!(fx.store.read_count(), 0);
        account.clear_reference("owner").unwrap();
        assert!(account.get_reference("owner").unwrap().is_none());
    }

    #[test]
    fn non_reference_field() {
        let fx = Fixture::new();
        let mut account = fx.create("Account", 1);
        assert!(matches!(
            account.get_reference("count").unwrap_err(),
            StateError::NotAReference { .. }
        ));
    }

    // -----------------------------------------------------------------------
    // Accessors and identity
    // -----------------------------------------------------------------------

    #[test]
    fn accessors_touch_only_their_field() {
        let fx = Fixture::new();
        let mut account = fx.create("Account", 1);
        assert_eq!(account.write("set_secret", "s3").unwrap(), Value::from("s3"));
        assert_eq!(account.dirty_fields(), vec!["secret"]);
        assert_eq!(account.read("get_count").unwrap(), Value::Int(0));
        assert!(account.read("set_secret").is_err());
        assert!(account.write("get_count", 1i64).is_err());
    }

    #[test]
    fn as_reference_is_interchangeable_with_normalized_proxy() {
        let fx = Fixture::new();
        let account = fx.create("Account", 1);
        let mine = account.as_reference().unwrap();
        let normalized = fx.identities.proxy(&account).unwrap();
        assert_eq!(mine, normalized);

        let mut set = HashSet::new();
        set.insert(mine);
        assert!(!set.insert(normalized));
        assert!(set.contains(account.identity()));
    }

    #[test]
    fn working_copy_is_independent() {
        let fx = Fixture::new();
        let mut account = fx.create("Account", 1);
        let mut copy = account.clone();
        copy.set("count", 3i64).unwrap();
        assert_eq!(account.get("count").unwrap(), Value::Int(0));
        assert!(!account.is_dirty());
    }
}
