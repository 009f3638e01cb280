use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use objwire_codec::{CodecError, TypeCodec};
use objwire_state::LiveObject;
use objwire_types::{
    CallShape, Categorized, FromValue, HasIdentity, IntoValue, InvocationEnvelope,
    InvocationResponse, MethodSignature, ParamSpec, TypeDescriptor, Value,
};
use tracing::{debug, trace};

use crate::args::{Arguments, CallMeta};
use crate::error::{ApplicationError, InvokeError, InvokeResult};

type MethodFn = Arc<
    dyn Fn(&mut LiveObject, Arguments, &CallMeta) -> Result<Value, ApplicationError> + Send + Sync,
>;

/// A typed caller for one declared method, built once and reused for
/// every call.
///
/// The payload is decoded against the declared parameters before the body
/// runs; a body is never called with malformed arguments. The result is
/// converted to the declared return type and encoded.
#[derive(Clone)]
pub struct MethodCaller {
    signature: MethodSignature,
    body: MethodFn,
}

impl MethodCaller {
    /// A method with no user parameters. Any payload is ignored.
    pub fn nullary<R, F>(name: impl Into<String>, returns: TypeDescriptor, body: F) -> Self
    where
        R: IntoValue,
        F: Fn(&mut LiveObject) -> Result<R, ApplicationError> + Send + Sync + 'static,
    {
        Self {
            signature: MethodSignature::nullary(name, returns),
            body: Arc::new(move |object, _, _| body(object).map(IntoValue::into_value)),
        }
    }

    /// A method whose whole payload is one typed parameter.
    pub fn unary<A, R, F>(
        name: impl Into<String>,
        param: ParamSpec,
        returns: TypeDescriptor,
        body: F,
    ) -> Self
    where
        A: FromValue,
        R: IntoValue,
        F: Fn(&mut LiveObject, A) -> Result<R, ApplicationError> + Send + Sync + 'static,
    {
        Self {
            signature: MethodSignature::unary(name, param, returns),
            body: Arc::new(move |object, args, _| {
                let arg = single_native::<A>(args)?;
                body(object, arg).map(IntoValue::into_value)
            }),
        }
    }

    /// A one-parameter method that also reads the call options.
    pub fn unary_with_meta<A, R, F>(
        name: impl Into<String>,
        param: ParamSpec,
        returns: TypeDescriptor,
        body: F,
    ) -> Self
    where
        A: FromValue,
        R: IntoValue,
        F: Fn(&mut LiveObject, A, &CallMeta) -> Result<R, ApplicationError> + Send + Sync + 'static,
    {
        Self {
            signature: MethodSignature::unary_with_meta(name, param, returns),
            body: Arc::new(move |object, args, meta| {
                let arg = single_native::<A>(args)?;
                body(object, arg, meta).map(IntoValue::into_value)
            }),
        }
    }

    /// A method with any number of positional or named parameters.
    pub fn variadic<R, F>(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        returns: TypeDescriptor,
        body: F,
    ) -> Self
    where
        R: IntoValue,
        F: Fn(&mut LiveObject, Arguments, &CallMeta) -> Result<R, ApplicationError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            signature: MethodSignature::variadic(name, params, returns),
            body: Arc::new(move |object, args, meta| body(object, args, meta).map(IntoValue::into_value)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.signature = self.signature.with_timeout(timeout);
        self
    }

    pub fn signature(&self) -> &MethodSignature {
        &self.signature
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    /// Decode a payload into arguments without running the body.
    pub fn decode_arguments(&self, payload: &[u8]) -> InvokeResult<Arguments> {
        let sig = &self.signature;
        let values = match sig.shape {
            CallShape::NoArgs => Vec::new(),
            CallShape::Single | CallShape::SingleWithMeta => match sig.single_param() {
                Some(param) => vec![TypeCodec::decode_argument(param, payload)?],
                None => Vec::new(),
            },
            CallShape::Variadic => TypeCodec::decode_arguments(&sig.params, payload)?,
        };
        Ok(Arguments::new(&sig.params, values))
    }

    /// Run one call and return the encoded result.
    pub fn try_invoke(
        &self,
        object: &mut LiveObject,
        envelope: &InvocationEnvelope,
    ) -> InvokeResult<Vec<u8>> {
        let args = self.decode_arguments(&envelope.payload)?;
        let meta = CallMeta::from_envelope(object.identity(), envelope);
        trace!(
            class_id = %object.class_id(),
            method = %self.signature.name,
            args = args.len(),
            "invoking method"
        );
        let result = (self.body)(object, args, &meta)?;
        self.encode_result(&result)
    }

    /// Run one call; every failure becomes a structured response.
    pub fn invoke(&self, object: &mut LiveObject, envelope: &InvocationEnvelope) -> InvocationResponse {
        match self.try_invoke(object, envelope) {
            Ok(payload) => InvocationResponse::ok(payload),
            Err(err) => {
                debug!(
                    class_id = %object.class_id(),
                    method = %self.signature.name,
                    category = %err.category(),
                    error = %err,
                    "method call failed"
                );
                InvocationResponse::failure(&err.report())
            }
        }
    }

    fn encode_result(&self, result: &Value) -> InvokeResult<Vec<u8>> {
        let returns = &self.signature.returns;
        let invalid = |source: CodecError| InvokeError::InvalidReturn {
            method: self.signature.name.clone(),
            source,
        };
        let converted = TypeCodec::convert_at("return", result, returns).map_err(|e| invalid(e.into()))?;
        TypeCodec::encode_at("return", &converted, returns).map_err(invalid)
    }
}

fn single_native<A: FromValue>(args: Arguments) -> Result<A, ApplicationError> {
    let value = args.into_values().into_iter().next().unwrap_or(Value::Null);
    Ok(A::from_value(value)?)
}

impl fmt::Debug for MethodCaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodCaller")
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use objwire_proxy::{IdentityRegistry, NoTransport};
    use objwire_store::InMemoryStateStore;
    use objwire_types::{
        ClassSchema, ErrorReport, ObjectIdentity, Registry, ResponseStatus, StateField,
    };

    fn account() -> LiveObject {
        let mut registry = Registry::new();
        let schema = registry
            .register(
                ClassSchema::builder("Account")
                    .field(StateField::new("balance", 0, TypeDescriptor::int()))
                    .build()
                    .unwrap(),
            )
            .unwrap();
        registry
            .register(ClassSchema::builder("Profile").build().unwrap())
            .unwrap();
        let identities = IdentityRegistry::new(
            Arc::new(registry),
            Arc::new(InMemoryStateStore::new()),
            Arc::new(NoTransport),
        );
        LiveObject::created(ObjectIdentity::new("Account", 0, 1), schema, Arc::new(identities))
    }

    fn report(response: &InvocationResponse) -> ErrorReport {
        response.error_report().expect("failure response")
    }

    // -----------------------------------------------------------------------
    // Call shapes
    // -----------------------------------------------------------------------

    #[test]
    fn nullary_ignores_payload() {
        let caller = MethodCaller::nullary("balance", TypeDescriptor::int(), |obj| {
            Ok(obj.get_as::<i64>("balance")?)
        });
        let mut obj = account();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("balance", b"garbage".to_vec()));
        assert!(response.is_ok());
        assert_eq!(response.payload, b"0");
    }

    #[test]
    fn optional_parameter_without_payload() {
        let caller = MethodCaller::unary(
            "greet",
            ParamSpec::new("name", TypeDescriptor::optional(TypeDescriptor::string())),
            TypeDescriptor::string(),
            |_, name: Option<String>| Ok(format!("hello {}", name.as_deref().unwrap_or("world"))),
        );
        let mut obj = account();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("greet", Vec::new()));
        assert_eq!(response.payload, br#""hello world""#);
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("greet", br#""ada""#.to_vec()));
        assert_eq!(response.payload, br#""hello ada""#);
    }

    #[test]
    fn unary_with_meta_sees_options() {
        let caller = MethodCaller::unary_with_meta(
            "tagged",
            ParamSpec::new("n", TypeDescriptor::int()),
            TypeDescriptor::string(),
            |_, n: i64, meta| Ok(format!("{n}:{}", meta.option("tag").unwrap_or("-"))),
        );
        let mut obj = account();
        let envelope = InvocationEnvelope::new("tagged", b"3".to_vec()).with_option("tag", "x");
        assert_eq!(caller.invoke(&mut obj, &envelope).payload, br#""3:x""#);
    }

    #[test]
    fn variadic_unpacks_by_position_and_name() {
        let caller = MethodCaller::variadic(
            "deposit",
            vec![
                ParamSpec::new("amount", TypeDescriptor::int()),
                ParamSpec::new("note", TypeDescriptor::optional(TypeDescriptor::string())),
            ],
            TypeDescriptor::int(),
            |obj, args, _| {
                let balance = obj.get_as::<i64>("balance")? + args.get_as::<i64>("amount")?;
                obj.set("balance", balance)?;
                Ok(balance)
            },
        );
        let mut obj = account();
        let payload = br#"{"positional": [5], "named": {"note": "pay"}}"#.to_vec();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("deposit", payload));
        assert_eq!(response.payload, b"5");
        assert!(obj.is_dirty());
    }

    // -----------------------------------------------------------------------
    // Failures
    // -----------------------------------------------------------------------

    #[test]
    fn invalid_argument_never_runs_body() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let caller = MethodCaller::unary(
            "deposit",
            ParamSpec::new("amount", TypeDescriptor::int()),
            TypeDescriptor::int(),
            move |_, amount: i64| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(amount)
            },
        );
        let mut obj = account();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("deposit", br#""lots""#.to_vec()));
        assert_eq!(response.status, ResponseStatus::InvalidRequest);
        assert_eq!(report(&response).details["path"], "amount");
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("deposit", Vec::new()));
        assert_eq!(response.status, ResponseStatus::InvalidRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn application_error_becomes_structured_failure() {
        let caller = MethodCaller::unary(
            "withdraw",
            ParamSpec::new("amount", TypeDescriptor::int()),
            TypeDescriptor::int(),
            |_, amount: i64| -> Result<i64, ApplicationError> {
                Err(ApplicationError::new("insufficient funds").with_detail("requested", amount.to_string()))
            },
        );
        let mut obj = account();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("withdraw", b"10".to_vec()));
        assert_eq!(response.status, ResponseStatus::AppError);
        let report = report(&response);
        assert_eq!(report.message, "insufficient funds");
        assert_eq!(report.details, BTreeMap::from([("requested".into(), "10".into())]));
    }

    #[test]
    fn invalid_return_is_a_system_error() {
        let caller = MethodCaller::nullary("broken", TypeDescriptor::int(), |_| Ok("not a number"));
        let mut obj = account();
        let response = caller.invoke(&mut obj, &InvocationEnvelope::new("broken", Vec::new()));
        assert_eq!(response.status, ResponseStatus::SystemError);
        assert!(matches!(
            caller.try_invoke(&mut obj, &InvocationEnvelope::new("broken", Vec::new())),
            Err(InvokeError::InvalidReturn { .. })
        ));
    }

    #[test]
    fn reference_result_is_identity_only() {
        let caller = MethodCaller::nullary(
            "owner",
            TypeDescriptor::reference("Profile"),
            |_| Ok(ObjectIdentity::new("Profile", 0, 9)),
        );
        let mut obj = account();
        let bytes = caller
            .try_invoke(&mut obj, &InvocationEnvelope::new("owner", Vec::new()))
            .unwrap();
        let decoded = TypeCodec::decode(&bytes, &TypeDescriptor::reference("Profile")).unwrap();
        assert_eq!(decoded, Value::Ref(ObjectIdentity::new("Profile", 0, 9)));
    }
}
