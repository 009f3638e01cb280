use std::borrow::Borrow;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use objwire_codec::TypeCodec;
use objwire_store::StateStore;
use objwire_types::{
    AccessorKind, CallShape, ClassSchema, FromValue, HasIdentity, IntoValue, InvocationEnvelope,
    MethodSignature, ObjectIdentity, StateField, Value,
};
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::debug;

use crate::error::{ProxyError, ProxyResult};
use crate::transport::Transport;

/// A value-like handle to an object known only by identity.
///
/// Method calls are forwarded through the [`Transport`]; accessor calls go
/// straight to the [`StateStore`] and never pass through the invocation
/// path. Equality and hashing use the identity alone, so a proxy is
/// interchangeable with any other proxy (or live object) of the same
/// identity as a map key.
#[derive(Clone)]
pub struct ReferenceProxy {
    identity: ObjectIdentity,
    schema: Arc<ClassSchema>,
    store: Arc<dyn StateStore>,
    transport: Arc<dyn Transport>,
    call_timeout: Duration,
}

impl ReferenceProxy {
    pub(crate) fn new(
        identity: ObjectIdentity,
        schema: Arc<ClassSchema>,
        store: Arc<dyn StateStore>,
        transport: Arc<dyn Transport>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            schema,
            store,
            transport,
            call_timeout,
        }
    }

    pub fn class_schema(&self) -> &Arc<ClassSchema> {
        &self.schema
    }

    /// Names of the methods this proxy forwards.
    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.schema.methods().map(|m| m.name.as_str())
    }

    fn signature(&self, method: &str) -> ProxyResult<&MethodSignature> {
        self.schema
            .method(method)
            .ok_or_else(|| ProxyError::UnknownMember {
                class: self.identity.class_id.clone(),
                member: method.to_string(),
            })
    }

    // ---- Method forwarding ----

    /// Call a method with a single argument (`Null` for no-argument
    /// methods, a list of positional arguments for variadic ones).
    pub async fn call(&self, method: &str, arg: impl IntoValue) -> ProxyResult<Value> {
        self.call_with_options(method, arg, BTreeMap::new()).await
    }

    /// Call and convert the result into a native type.
    pub async fn call_as<R: FromValue>(&self, method: &str, arg: impl IntoValue) -> ProxyResult<R> {
        let value = self.call(method, arg).await?;
        Ok(R::from_value(value)?)
    }

    /// Call with envelope options, readable by `SingleWithMeta` methods.
    pub async fn call_with_options(
        &self,
        method: &str,
        arg: impl IntoValue,
        options: BTreeMap<String, String>,
    ) -> ProxyResult<Value> {
        let sig = self.signature(method)?;
        let payload = encode_call(sig, arg.into_value())?;
        let mut envelope = InvocationEnvelope::new(method, payload);
        envelope.options = options;
        self.send(sig, envelope).await
    }

    /// Call a variadic method with positional and named arguments.
    pub async fn call_with(
        &self,
        method: &str,
        positional: Vec<Value>,
        named: BTreeMap<String, Value>,
    ) -> ProxyResult<Value> {
        let sig = self.signature(method)?;
        let payload = match sig.shape {
            CallShape::Variadic => TypeCodec::encode_arguments(&sig.params, &positional, &named)?,
            _ if named.is_empty() && positional.len() <= 1 => {
                let arg = positional.into_iter().next().unwrap_or(Value::Null);
                return self.call(method, arg).await;
            }
            _ => {
                return Err(ProxyError::Validation(objwire_types::ValidationError::new(
                    method,
                    "at most one positional argument",
                    format!("{} positional, {} named", positional.len(), named.len()),
                )))
            }
        };
        self.send(sig, InvocationEnvelope::new(method, payload)).await
    }

    /// Send a pre-built envelope and return the raw response payload.
    pub async fn invoke_raw(&self, envelope: InvocationEnvelope) -> ProxyResult<Vec<u8>> {
        let timeout = self
            .schema
            .method(&envelope.method_id)
            .and_then(|sig| sig.timeout)
            .unwrap_or(self.call_timeout);
        let method = envelope.method_id.clone();
        let response = tokio::time::timeout(timeout, self.transport.invoke(&self.identity, envelope))
            .await
            .map_err(|_| ProxyError::Timeout { method, timeout })??;
        match response.error_report() {
            Some(report) => Err(ProxyError::Remote(report)),
            None => Ok(response.payload),
        }
    }

    async fn send(&self, sig: &MethodSignature, envelope: InvocationEnvelope) -> ProxyResult<Value> {
        debug!(
            class_id = %self.identity.class_id,
            object_id = self.identity.object_id,
            method = %sig.name,
            bytes = envelope.payload.len(),
            "forwarding call"
        );
        let payload = self.invoke_raw(envelope).await?;
        Ok(TypeCodec::decode_at("return", &payload, &sig.returns)?)
    }

    /// Call from synchronous code.
    ///
    /// Outside a runtime a private current-thread runtime drives the call.
    /// Inside one, the runtime must be multi-threaded.
    pub fn call_blocking(&self, method: &str, arg: impl IntoValue) -> ProxyResult<Value> {
        let arg = arg.into_value();
        match Handle::try_current() {
            Ok(handle) => match handle.runtime_flavor() {
                RuntimeFlavor::MultiThread => {
                    tokio::task::block_in_place(|| handle.block_on(self.call(method, arg)))
                }
                flavor => Err(ProxyError::Blocking(format!(
                    "{flavor:?} runtime cannot block in place"
                ))),
            },
            Err(_) => tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| ProxyError::Blocking(e.to_string()))?
                .block_on(self.call(method, arg)),
        }
    }

    // ---- Accessors ----

    fn accessor_field(&self, accessor: &str, kind: AccessorKind) -> ProxyResult<&StateField> {
        let spec = self
            .schema
            .accessor(accessor)
            .ok_or_else(|| ProxyError::UnknownMember {
                class: self.identity.class_id.clone(),
                member: accessor.to_string(),
            })?;
        if spec.kind != kind {
            return Err(ProxyError::WrongAccessorKind {
                accessor: accessor.to_string(),
                expected: format!("{kind:?}").to_lowercase(),
            });
        }
        self.schema
            .field(&spec.field)
            .ok_or_else(|| ProxyError::UnknownMember {
                class: self.identity.class_id.clone(),
                member: spec.field.clone(),
            })
    }

    /// Read a field through a read accessor, directly from storage.
    pub fn read(&self, accessor: &str) -> ProxyResult<Value> {
        let field = self.accessor_field(accessor, AccessorKind::Read)?;
        match self.store.get(&self.identity, field.index)? {
            Some(bytes) => Ok(TypeCodec::decode_at(&field.name, &bytes, &field.descriptor)?),
            None => Ok(field.default.clone()),
        }
    }

    /// Write a field through a write accessor, directly to storage.
    ///
    /// Only the accessor's own field is written. Returns the stored value
    /// after conversion.
    pub fn write(&self, accessor: &str, value: impl IntoValue) -> ProxyResult<Value> {
        let field = self.accessor_field(accessor, AccessorKind::Write)?;
        let value = TypeCodec::convert_at(&field.name, &value.into_value(), &field.descriptor)?;
        let bytes = TypeCodec::encode_at(&field.name, &value, &field.descriptor)?;
        let mut batch = BTreeMap::new();
        batch.insert(field.index, bytes);
        self.store.set_all(&self.identity, &batch)?;
        debug!(
            class_id = %self.identity.class_id,
            object_id = self.identity.object_id,
            index = field.index,
            "accessor write"
        );
        Ok(value)
    }
}

/// Encode the payload of a call with one argument value.
///
/// `Null` stands for "no argument"; variadic methods take a list or tuple
/// of positional arguments, or a single value as the first one.
pub fn encode_call(sig: &MethodSignature, arg: Value) -> ProxyResult<Vec<u8>> {
    let payload = match sig.shape {
        CallShape::NoArgs => Vec::new(),
        CallShape::Single | CallShape::SingleWithMeta => match sig.single_param() {
            Some(param) => TypeCodec::encode_argument(param, &arg)?,
            None => Vec::new(),
        },
        CallShape::Variadic => {
            let positional = match arg {
                Value::Null => Vec::new(),
                Value::List(items) | Value::Tuple(items) => items,
                single => vec![single],
            };
            TypeCodec::encode_arguments(&sig.params, &positional, &BTreeMap::new())?
        }
    };
    Ok(payload)
}

impl HasIdentity for ReferenceProxy {
    fn identity(&self) -> &ObjectIdentity {
        &self.identity
    }
}

impl PartialEq for ReferenceProxy {
    fn eq(&self, other: &Self) -> bool {
        self.identity == other.identity
    }
}

impl Eq for ReferenceProxy {}

impl PartialEq<ObjectIdentity> for ReferenceProxy {
    fn eq(&self, other: &ObjectIdentity) -> bool {
        &self.identity == other
    }
}

impl Hash for ReferenceProxy {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl Borrow<ObjectIdentity> for ReferenceProxy {
    fn borrow(&self) -> &ObjectIdentity {
        &self.identity
    }
}

impl IntoValue for ReferenceProxy {
    fn into_value(self) -> Value {
        Value::Ref(self.identity)
    }
}

impl IntoValue for &ReferenceProxy {
    fn into_value(self) -> Value {
        Value::Ref(self.identity.clone())
    }
}

impl fmt::Debug for ReferenceProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceProxy({})", self.identity)
    }
}
