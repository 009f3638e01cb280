use std::cell::Cell;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use objwire_codec::TypeCodec;
use objwire_invoke::ServiceCatalog;
use objwire_proxy::{encode_call, IdentityLike, IdentityRegistry, ReferenceProxy};
use objwire_state::LiveObject;
use objwire_types::{
    Categorized, ErrorReport, HasIdentity, IntoValue, InvocationEnvelope, ObjectIdentity, Value,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{SessionError, SessionResult};

/// Outcome of one commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommitReport {
    /// Objects that had dirty fields and were written.
    pub objects_flushed: usize,
    pub fields_written: usize,
    pub objects_deleted: usize,
    /// Objects whose flush or delete failed. Their pending work is kept.
    pub failures: Vec<(ObjectIdentity, ErrorReport)>,
}

impl CommitReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Nothing was written or deleted.
    pub fn is_noop(&self) -> bool {
        self.objects_flushed == 0 && self.objects_deleted == 0 && self.failures.is_empty()
    }

    pub fn merge(&mut self, other: CommitReport) {
        self.objects_flushed += other.objects_flushed;
        self.fields_written += other.fields_written;
        self.objects_deleted += other.objects_deleted;
        self.failures.extend(other.failures);
    }

    pub fn into_result(self) -> SessionResult<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(SessionError::Commit(self))
        }
    }
}

/// Either a resident object or a proxy to one elsewhere.
pub enum ObjectHandle<'s> {
    Local(&'s mut LiveObject),
    Remote(ReferenceProxy),
}

impl ObjectHandle<'_> {
    pub fn identity(&self) -> &ObjectIdentity {
        match self {
            Self::Local(object) => object.identity(),
            Self::Remote(proxy) => proxy.identity(),
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local(_))
    }

    pub fn local(&mut self) -> Option<&mut LiveObject> {
        match self {
            Self::Local(object) => Some(&mut **object),
            Self::Remote(_) => None,
        }
    }

    /// A proxy with the same identity, whichever side the object is on.
    pub fn into_proxy(self) -> SessionResult<ReferenceProxy> {
        match self {
            Self::Local(object) => Ok(object.as_reference()?),
            Self::Remote(proxy) => Ok(proxy),
        }
    }
}

/// One unit of work: the objects it has created or loaded, and the
/// deletions it has queued.
///
/// A session belongs to a single caller at a time and is not `Sync`.
pub struct Session {
    partition_id: u32,
    objects: BTreeMap<ObjectIdentity, LiveObject>,
    pending_deletes: BTreeSet<ObjectIdentity>,
    catalog: Arc<ServiceCatalog>,
    identities: Arc<IdentityRegistry>,
    config: Arc<SessionConfig>,
    _not_sync: PhantomData<Cell<()>>,
}

impl Session {
    pub fn new(
        partition_id: u32,
        catalog: Arc<ServiceCatalog>,
        identities: Arc<IdentityRegistry>,
        config: Arc<SessionConfig>,
    ) -> Self {
        Self {
            partition_id,
            objects: BTreeMap::new(),
            pending_deletes: BTreeSet::new(),
            catalog,
            identities,
            config,
            _not_sync: PhantomData,
        }
    }

    pub fn partition_id(&self) -> u32 {
        self.partition_id
    }

    pub fn identities(&self) -> &Arc<IdentityRegistry> {
        &self.identities
    }

    fn check_class(identity: &ObjectIdentity, class: &str) -> SessionResult<()> {
        if identity.class_id != class {
            return Err(SessionError::ClassMismatch {
                identity: identity.clone(),
                class: class.to_string(),
            });
        }
        Ok(())
    }

    // ---- Lifecycle ----

    /// Create a new object with default field values. No I/O happens; the
    /// object is only written once one of its fields is set and committed.
    pub fn create_object(
        &mut self,
        class: &str,
        identity: Option<ObjectIdentity>,
    ) -> SessionResult<&mut LiveObject> {
        let schema = self.identities.registry().schema(class)?;
        let identity = match identity {
            Some(identity) => {
                Self::check_class(&identity, class)?;
                identity.validate()?;
                identity
            }
            None if self.config.local_only_missing_identity => {
                ObjectIdentity::generate(class, self.partition_id)
            }
            None => {
                return Err(SessionError::MissingIdentity {
                    class: class.to_string(),
                })
            }
        };
        debug!(class_id = %class, object_id = identity.object_id, "object created");
        self.pending_deletes.remove(&identity);
        let object = LiveObject::created(identity.clone(), schema, Arc::clone(&self.identities));
        self.objects.insert(identity.clone(), object);
        self.object_mut(&identity)
    }

    /// Bring an existing object into the session. Fields load lazily; an
    /// object that is already resident is returned as is.
    pub fn load_object(
        &mut self,
        class: &str,
        identity: &ObjectIdentity,
    ) -> SessionResult<&mut LiveObject> {
        Self::check_class(identity, class)?;
        identity.validate()?;
        if !self.objects.contains_key(identity) {
            let schema = self.identities.registry().schema(class)?;
            let object =
                LiveObject::loaded(identity.clone(), schema, Arc::clone(&self.identities));
            self.objects.insert(identity.clone(), object);
        }
        self.object_mut(identity)
    }

    /// Evict an object and queue its removal from storage at the next
    /// commit. Unflushed changes to it are dropped.
    pub fn delete_object(&mut self, identity: &ObjectIdentity) -> bool {
        let was_resident = self.objects.remove(identity).is_some();
        let newly_queued = self.pending_deletes.insert(identity.clone());
        was_resident || newly_queued
    }

    pub fn object(&self, identity: &ObjectIdentity) -> Option<&LiveObject> {
        self.objects.get(identity)
    }

    pub fn object_mut(&mut self, identity: &ObjectIdentity) -> SessionResult<&mut LiveObject> {
        self.objects
            .get_mut(identity)
            .ok_or_else(|| SessionError::NotResident(identity.clone()))
    }

    pub fn is_resident(&self, identity: &ObjectIdentity) -> bool {
        self.objects.contains_key(identity)
    }

    pub fn resident(&self) -> impl Iterator<Item = &ObjectIdentity> {
        self.objects.keys()
    }

    pub fn pending_deletes(&self) -> impl Iterator<Item = &ObjectIdentity> {
        self.pending_deletes.iter()
    }

    /// Nothing resident and no deletes queued.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.pending_deletes.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        !self.pending_deletes.is_empty() || self.objects.values().any(LiveObject::is_dirty)
    }

    /// The resident object for an identity when there is one, otherwise a
    /// proxy. Both expose the same identity.
    pub fn resolve<'a>(&mut self, like: impl Into<IdentityLike<'a>>) -> SessionResult<ObjectHandle<'_>> {
        let identity = self.identities.normalize(like)?;
        match self.objects.get_mut(&identity) {
            Some(object) => Ok(ObjectHandle::Local(object)),
            None => {
                let class = identity.class_id.clone();
                Ok(ObjectHandle::Remote(self.identities.materialize(&identity, &class)?))
            }
        }
    }

    // ---- Calls ----

    /// Run a method against a resident object in this session.
    ///
    /// The call runs on a working copy that replaces the object only when
    /// the call succeeds.
    pub fn invoke_local(
        &mut self,
        identity: &ObjectIdentity,
        method: &str,
        arg: impl IntoValue,
    ) -> SessionResult<Value> {
        let caller = self.catalog.caller(&identity.class_id, method)?.clone();
        let payload = encode_call(caller.signature(), arg.into_value())?;
        let envelope = InvocationEnvelope::new(method, payload);
        let object = self.object_mut(identity)?;
        let mut working = object.clone();
        let bytes = caller.try_invoke(&mut working, &envelope)?;
        *object = working;
        Ok(TypeCodec::decode_at("return", &bytes, &caller.signature().returns)?)
    }

    /// Call a method on whatever `target` names: locally when the object
    /// is resident, through its proxy otherwise.
    pub async fn call<'a>(
        &mut self,
        target: impl Into<IdentityLike<'a>>,
        method: &str,
        arg: impl IntoValue,
    ) -> SessionResult<Value> {
        let identity = self.identities.normalize(target)?;
        if self.is_resident(&identity) {
            return self.invoke_local(&identity, method, arg);
        }
        let proxy = self.identities.materialize(&identity, &identity.class_id)?;
        Ok(proxy.call(method, arg).await?)
    }

    // ---- Commit ----

    /// Flush every dirty object, then apply queued deletes.
    ///
    /// Objects are flushed in identity order, each as one batch. A failed
    /// object keeps its dirty fields (or its queued delete) for the next
    /// commit and does not stop the others.
    pub fn commit(&mut self) -> CommitReport {
        let mut report = CommitReport::default();
        for (identity, object) in self.objects.iter_mut() {
            if !object.is_dirty() {
                continue;
            }
            match object.flush() {
                Ok(written) => {
                    report.objects_flushed += 1;
                    report.fields_written += written;
                }
                Err(err) => {
                    warn!(
                        class_id = %identity.class_id,
                        object_id = identity.object_id,
                        error = %err,
                        "object flush failed"
                    );
                    report.failures.push((identity.clone(), err.report()));
                }
            }
        }
        let store = Arc::clone(self.identities.store());
        let mut retained = BTreeSet::new();
        for identity in std::mem::take(&mut self.pending_deletes) {
            match store.delete(&identity) {
                Ok(_) => report.objects_deleted += 1,
                Err(err) => {
                    warn!(
                        class_id = %identity.class_id,
                        object_id = identity.object_id,
                        error = %err,
                        "object delete failed"
                    );
                    report.failures.push((identity.clone(), err.report()));
                    retained.insert(identity);
                }
            }
        }
        self.pending_deletes = retained;
        if !report.is_noop() {
            debug!(
                partition_id = self.partition_id,
                flushed = report.objects_flushed,
                deleted = report.objects_deleted,
                failed = report.failures.len(),
                "session committed"
            );
        }
        report
    }

    /// [`commit`](Self::commit) from async code without stalling the
    /// runtime's other tasks on storage I/O.
    pub async fn commit_async(&mut self) -> CommitReport {
        match Handle::try_current().map(|h| h.runtime_flavor()) {
            Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(|| self.commit()),
            _ => {
                tokio::task::yield_now().await;
                self.commit()
            }
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("partition_id", &self.partition_id)
            .field("resident", &self.objects.len())
            .field("pending_deletes", &self.pending_deletes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use objwire_proxy::NoTransport;
    use objwire_state::FieldPhase;
    use objwire_store::{InMemoryStateStore, StateStore};

    use crate::testing::catalog;

    fn session_with(config: SessionConfig) -> (Session, Arc<InMemoryStateStore>) {
        let catalog = Arc::new(catalog());
        let store = Arc::new(InMemoryStateStore::new());
        let identities = Arc::new(IdentityRegistry::new(
            Arc::clone(catalog.registry()),
            store.clone(),
            Arc::new(NoTransport),
        ));
        (Session::new(0, catalog, identities, Arc::new(config)), store)
    }

    fn session() -> (Session, Arc<InMemoryStateStore>) {
        session_with(SessionConfig::default())
    }

    fn counter(object_id: u64) -> ObjectIdentity {
        ObjectIdentity::new("Counter", 0, object_id)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    #[test]
    fn create_generates_identity_without_io() {
        let (mut session, store) = session();
        let object = session.create_object("Counter", None).unwrap();
        assert_eq!(object.class_id(), "Counter");
        assert_eq!(object.identity().partition_id, 0);
        assert_eq!(store.read_count() + store.write_count(), 0);
    }

    #[test]
    fn create_without_identity_can_be_refused() {
        let (mut session, _) = session_with(SessionConfig {
            local_only_missing_identity: false,
            ..Default::default()
        });
        assert!(matches!(
            session.create_object("Counter", None).unwrap_err(),
            SessionError::MissingIdentity { .. }
        ));
    }

    #[test]
    fn create_rejects_foreign_identity() {
        let (mut session, _) = session();
        let err = session
            .create_object("Counter", Some(ObjectIdentity::new("Profile", 0, 1)))
            .unwrap_err();
        assert!(matches!(err, SessionError::ClassMismatch { .. }));
    }

    #[test]
    fn identities_past_i64_are_refused() {
        let (mut session, _) = session();
        let far = counter(u64::MAX);
        assert!(matches!(
            session.create_object("Counter", Some(far.clone())).unwrap_err(),
            SessionError::Validation(_)
        ));
        assert!(matches!(
            session.load_object("Counter", &far).unwrap_err(),
            SessionError::Validation(_)
        ));
        assert_eq!(session.resident().count(), 0);
    }

    #[test]
    fn load_is_lazy_and_cached() {
        let (mut session, store) = session();
        store
            .set_all(&counter(1), &BTreeMap::from([(0, b"4".to_vec())]))
            .unwrap();
        let object = session.load_object("Counter", &counter(1)).unwrap();
        assert_eq!(object.phase("count").unwrap(), FieldPhase::Unloaded);
        assert_eq!(object.get("count").unwrap(), Value::Int(4));
        let again = session.load_object("Counter", &counter(1)).unwrap();
        assert_eq!(again.phase("count").unwrap(), FieldPhase::Clean);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn delete_evicts_and_removes_on_commit() {
        let (mut session, store) = session();
        session.create_object("Counter", Some(counter(1))).unwrap().set("count", 1i64).unwrap();
        session.commit();
        assert!(session.delete_object(&counter(1)));
        assert!(!session.is_resident(&counter(1)));
        let report = session.commit();
        assert_eq!(report.objects_deleted, 1);
        assert!(store.is_empty());
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    #[test]
    fn commit_is_idempotent() {
        let (mut session, store) = session();
        session.create_object("Counter", Some(counter(1))).unwrap().set("count", 5i64).unwrap();
        let first = session.commit();
        assert_eq!(first.objects_flushed, 1);
        assert_eq!(first.fields_written, 1);
        let second = session.commit();
        assert!(second.is_noop());
        assert_eq!(store.write_count(), 1);
    }

    #[test]
    fn one_failure_does_not_block_others() {
        let (mut session, store) = session();
        for id in 1..=3 {
            session.create_object("Counter", Some(counter(id))).unwrap().set("count", 1i64).unwrap();
        }
        store.fence(&counter(2));
        let report = session.commit();
        assert_eq!(report.objects_flushed, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].0, counter(2));
        assert!(report.failures[0].1.is_retryable());
        assert!(session.object(&counter(2)).unwrap().is_dirty());

        store.unfence(&counter(2));
        let retry = session.commit().into_result().unwrap();
        assert_eq!(retry.objects_flushed, 1);
    }

    #[tokio::test]
    async fn commit_async_on_current_thread_runtime() {
        let (mut session, store) = session();
        session.create_object("Counter", Some(counter(1))).unwrap().set("count", 2i64).unwrap();
        assert_eq!(session.commit_async().await.objects_flushed, 1);
        assert_eq!(store.write_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Calls and resolution
    // -----------------------------------------------------------------------

    #[test]
    fn invoke_local_applies_changes_on_success() {
        let (mut session, _) = session();
        session.create_object("Counter", Some(counter(1))).unwrap();
        assert_eq!(session.invoke_local(&counter(1), "add", 3i64).unwrap(), Value::Int(3));
        assert_eq!(session.object_mut(&counter(1)).unwrap().get("count").unwrap(), Value::Int(3));
    }

    #[test]
    fn invoke_local_discards_failed_call() {
        let (mut session, _) = session();
        session.create_object("Counter", Some(counter(1))).unwrap();
        let err = session.invoke_local(&counter(1), "add", 500i64).unwrap_err();
        assert_eq!(err.report().message, "overflow");
        let object = session.object_mut(&counter(1)).unwrap();
        assert_eq!(object.get("count").unwrap(), Value::Int(0));
        assert!(!object.is_dirty());
    }

    #[test]
    fn resolve_prefers_resident_object() {
        let (mut session, _) = session();
        session.create_object("Counter", Some(counter(1))).unwrap();
        assert!(session.resolve(counter(1)).unwrap().is_local());
        let remote = session.resolve(("Counter", 0, 2)).unwrap();
        assert!(!remote.is_local());

        let local = session.resolve(counter(1)).unwrap().into_proxy().unwrap();
        let mut keys = HashMap::new();
        keys.insert(local, 1);
        assert_eq!(keys.get(&counter(1)), Some(&1));
    }

    #[tokio::test]
    async fn call_routes_by_residency() {
        let (mut session, _) = session();
        session.create_object("Counter", Some(counter(1))).unwrap();
        assert_eq!(session.call(counter(1), "add", 2i64).await.unwrap(), Value::Int(2));
        let err = session.call(counter(2), "add", 2i64).await.unwrap_err();
        assert!(err.report().is_retryable());
    }
}
