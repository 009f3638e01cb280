use std::sync::Arc;
use std::time::Duration;

use objwire_store::StateStore;
use objwire_types::{HasIdentity, ObjectIdentity, Registry, ValidationError, Value};
use tracing::trace;

use crate::error::{ProxyError, ProxyResult};
use crate::proxy::ReferenceProxy;
use crate::transport::Transport;

/// Default deadline for a forwarded method call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Every form a caller may hand over where an object identity is expected.
pub enum IdentityLike<'a> {
    /// A live, resident object.
    Instance(&'a dyn HasIdentity),
    Proxy(&'a ReferenceProxy),
    Record(ObjectIdentity),
    /// `(class_id, partition_id, object_id)`.
    Tuple(String, u32, u64),
    /// A dynamic value: a `Ref`, an identity record, or a 3-element tuple.
    Value(&'a Value),
}

impl<'a> IdentityLike<'a> {
    pub fn instance(object: &'a dyn HasIdentity) -> Self {
        Self::Instance(object)
    }
}

impl<'a> From<&'a ReferenceProxy> for IdentityLike<'a> {
    fn from(proxy: &'a ReferenceProxy) -> Self {
        Self::Proxy(proxy)
    }
}

impl From<ObjectIdentity> for IdentityLike<'_> {
    fn from(identity: ObjectIdentity) -> Self {
        Self::Record(identity)
    }
}

impl From<&ObjectIdentity> for IdentityLike<'_> {
    fn from(identity: &ObjectIdentity) -> Self {
        Self::Record(identity.clone())
    }
}

impl From<(String, u32, u64)> for IdentityLike<'_> {
    fn from((class_id, partition_id, object_id): (String, u32, u64)) -> Self {
        Self::Tuple(class_id, partition_id, object_id)
    }
}

impl From<(&str, u32, u64)> for IdentityLike<'_> {
    fn from((class_id, partition_id, object_id): (&str, u32, u64)) -> Self {
        Self::Tuple(class_id.to_string(), partition_id, object_id)
    }
}

impl<'a> From<&'a Value> for IdentityLike<'a> {
    fn from(value: &'a Value) -> Self {
        Self::Value(value)
    }
}

/// Turns identity-like input into identities and identities into proxies.
///
/// Normalization is pure and safe to call from any number of threads
/// without synchronization. Materializing a proxy performs no I/O.
pub struct IdentityRegistry {
    registry: Arc<Registry>,
    store: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
}

impl IdentityRegistry {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            registry,
            store,
            transport,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Reduce any identity-like input to a plain identity.
    pub fn normalize<'a>(&self, like: impl Into<IdentityLike<'a>>) -> Result<ObjectIdentity, ValidationError> {
        let identity = match like.into() {
            IdentityLike::Instance(object) => object.identity().clone(),
            IdentityLike::Proxy(proxy) => proxy.identity().clone(),
            IdentityLike::Record(identity) => identity,
            IdentityLike::Tuple(class_id, partition_id, object_id) => {
                ObjectIdentity::new(class_id, partition_id, object_id)
            }
            IdentityLike::Value(value) => ObjectIdentity::from_value(value)?,
        };
        identity.validate()?;
        Ok(identity)
    }

    /// Normalize and require the identity to name an object of `target_class`.
    pub fn normalize_for<'a>(
        &self,
        like: impl Into<IdentityLike<'a>>,
        target_class: &str,
    ) -> Result<ObjectIdentity, ValidationError> {
        let identity = self.normalize(like)?;
        if identity.class_id != target_class {
            return Err(ValidationError::new(
                "identity",
                format!("Ref[{target_class}]"),
                format!("Ref[{}]", identity.class_id),
            ));
        }
        Ok(identity)
    }

    /// Build a proxy for `identity` exposing `target_class`'s members.
    pub fn materialize(&self, identity: &ObjectIdentity, target_class: &str) -> ProxyResult<ReferenceProxy> {
        if identity.class_id != target_class {
            return Err(ProxyError::Validation(ValidationError::new(
                "identity",
                format!("Ref[{target_class}]"),
                format!("Ref[{}]", identity.class_id),
            )));
        }
        let schema = self.registry.schema(target_class)?;
        trace!(%identity, "materialized proxy");
        Ok(ReferenceProxy::new(
            identity.clone(),
            schema,
            Arc::clone(&self.store),
            Arc::clone(&self.transport),
            self.call_timeout,
        ))
    }

    /// Normalize then materialize, using the identity's own class.
    pub fn proxy<'a>(&self, like: impl Into<IdentityLike<'a>>) -> ProxyResult<ReferenceProxy> {
        let identity = self.normalize(like)?;
        let class_id = identity.class_id.clone();
        self.materialize(&identity, &class_id)
    }
}

impl std::fmt::Debug for IdentityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityRegistry")
            .field("classes", &self.registry.len())
            .field("call_timeout", &self.call_timeout)
            .finish()
    }
}
