//! Call-argument payloads.
//!
//! Single-parameter methods carry the parameter's encoding as the whole
//! payload. Variadic methods carry
//! `{ "positional": [...], "named": { ... } }`, unpacked against the
//! declared parameter list by position first, then by name.

use std::collections::BTreeMap;

use objwire_types::{ParamSpec, ValidationError, Value};
use serde_json::{Map as JsonMap, Value as Json};

use crate::codec::{from_json, json_kind, to_json, TypeCodec};
use crate::error::{CodecError, CodecResult};

pub const POSITIONAL_KEY: &str = "positional";
pub const NAMED_KEY: &str = "named";

/// Value of a parameter that was not supplied.
fn absent(param: &ParamSpec) -> Result<Value, ValidationError> {
    match &param.default {
        Some(default) => Ok(default.clone()),
        None if param.descriptor.is_nullable() => Ok(Value::Null),
        None => Err(ValidationError::missing(&param.name, param.descriptor.kind_name())),
    }
}

fn arity_error(params: &[ParamSpec], given: usize) -> ValidationError {
    ValidationError::new(
        POSITIONAL_KEY,
        format!("at most {} positional arguments", params.len()),
        given.to_string(),
    )
    .with_reason("too many positional arguments")
}

impl TypeCodec {
    /// Encode the argument of a single-parameter method.
    ///
    /// `Null` for a non-nullable parameter with a default is sent as an
    /// empty payload so the receiver applies the default.
    pub fn encode_argument(param: &ParamSpec, value: &Value) -> CodecResult<Vec<u8>> {
        if value.is_null() && !param.descriptor.is_nullable() {
            return match param.default {
                Some(_) => Ok(Vec::new()),
                None => Err(ValidationError::missing(&param.name, param.descriptor.kind_name()).into()),
            };
        }
        let converted = Self::convert_at(&param.name, value, &param.descriptor)?;
        Self::encode_at(&param.name, &converted, &param.descriptor)
    }

    /// Decode the argument of a single-parameter method.
    pub fn decode_argument(param: &ParamSpec, bytes: &[u8]) -> CodecResult<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(absent(param)?);
        }
        Self::decode_at(&param.name, bytes, &param.descriptor)
    }

    /// Encode a variadic call. Every argument is converted to its declared
    /// type first; arity, duplicate, and unknown-name problems are rejected
    /// before anything is sent.
    pub fn encode_arguments(
        params: &[ParamSpec],
        positional: &[Value],
        named: &BTreeMap<String, Value>,
    ) -> CodecResult<Vec<u8>> {
        if positional.len() > params.len() {
            return Err(arity_error(params, positional.len()).into());
        }
        let mut positional_json = Vec::with_capacity(positional.len());
        for (param, value) in params.iter().zip(positional) {
            let converted = Self::convert_at(&param.name, value, &param.descriptor)?;
            positional_json.push(to_json(&param.name, &converted, &param.descriptor)?);
        }
        let mut named_json = JsonMap::new();
        for (name, value) in named {
            let position = params.iter().position(|p| &p.name == name).ok_or_else(|| {
                ValidationError::new(name, "declared parameter", "unknown name")
            })?;
            if position < positional.len() {
                return Err(ValidationError::new(name, "single value", "positional and named value")
                    .with_reason("argument supplied twice")
                    .into());
            }
            let param = &params[position];
            let converted = Self::convert_at(&param.name, value, &param.descriptor)?;
            named_json.insert(name.clone(), to_json(&param.name, &converted, &param.descriptor)?);
        }
        for param in &params[positional.len()..] {
            if !named.contains_key(&param.name) {
                absent(param)?;
            }
        }
        let mut envelope = JsonMap::new();
        envelope.insert(POSITIONAL_KEY.to_string(), Json::Array(positional_json));
        envelope.insert(NAMED_KEY.to_string(), Json::Object(named_json));
        serde_json::to_vec(&Json::Object(envelope)).map_err(|e| CodecError::Serialization(e.to_string()))
    }

    /// Decode a variadic call into one value per declared parameter, in
    /// declaration order.
    pub fn decode_arguments(params: &[ParamSpec], bytes: &[u8]) -> CodecResult<Vec<Value>> {
        let (positional, named) = if bytes.iter().all(u8::is_ascii_whitespace) {
            (Vec::new(), JsonMap::new())
        } else {
            let json: Json =
                serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
            split_envelope(json)?
        };
        if positional.len() > params.len() {
            return Err(arity_error(params, positional.len()).into());
        }
        if let Some(unknown) = named.keys().find(|k| !params.iter().any(|p| &&p.name == k)) {
            return Err(ValidationError::new(unknown, "declared parameter", "unknown name").into());
        }
        let mut values = Vec::with_capacity(params.len());
        for (i, param) in params.iter().enumerate() {
            let value = match (positional.get(i), named.get(&param.name)) {
                (Some(_), Some(_)) => {
                    return Err(ValidationError::new(&param.name, "single value", "positional and named value")
                        .with_reason("argument supplied twice")
                        .into())
                }
                (Some(json), None) | (None, Some(json)) => from_json(&param.name, json, &param.descriptor)?,
                (None, None) => absent(param)?,
            };
            values.push(value);
        }
        Ok(values)
    }
}

fn split_envelope(json: Json) -> Result<(Vec<Json>, JsonMap<String, Json>), ValidationError> {
    let mut object = match json {
        Json::Object(object) => object,
        other => return Err(ValidationError::new("", "argument envelope object", json_kind(&other))),
    };
    let positional = match object.remove(POSITIONAL_KEY) {
        None | Some(Json::Null) => Vec::new(),
        Some(Json::Array(items)) => items,
        Some(other) => return Err(ValidationError::new(POSITIONAL_KEY, "array", json_kind(&other))),
    };
    let named = match object.remove(NAMED_KEY) {
        None | Some(Json::Null) => JsonMap::new(),
        Some(Json::Object(named)) => named,
        Some(other) => return Err(ValidationError::new(NAMED_KEY, "object", json_kind(&other))),
    };
    if let Some(extra) = object.keys().next() {
        return Err(ValidationError::new(extra.as_str(), "positional or named", "unexpected key"));
    }
    Ok((positional, named))
}

#[cfg(test)]
mod tests {
    use super::*;
    use objwire_types::TypeDescriptor;

    fn params() -> Vec<ParamSpec> {
        vec![
            ParamSpec::new("name", TypeDescriptor::string()),
            ParamSpec::new("times", TypeDescriptor::int()).with_default(1i64),
            ParamSpec::new("suffix", TypeDescriptor::optional(TypeDescriptor::string())),
        ]
    }

    fn named(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
        entries.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    // ---- Single parameter ----

    #[test]
    fn optional_single_argument_absent() {
        let p = ParamSpec::new("name", TypeDescriptor::optional(TypeDescriptor::string()));
        assert_eq!(TypeCodec::decode_argument(&p, b"").unwrap(), Value::Null);
    }

    #[test]
    fn required_single_argument_absent() {
        let p = ParamSpec::new("amount", TypeDescriptor::int());
        let err = TypeCodec::decode_argument(&p, b"").unwrap_err();
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn single_argument_default_travels_as_empty() {
        let p = ParamSpec::new("amount", TypeDescriptor::int()).with_default(10i64);
        let bytes = TypeCodec::encode_argument(&p, &Value::Null).unwrap();
        assert!(bytes.is_empty());
        assert_eq!(TypeCodec::decode_argument(&p, &bytes).unwrap(), Value::Int(10));
    }

    #[test]
    fn single_argument_is_converted() {
        let p = ParamSpec::new("amount", TypeDescriptor::int());
        let bytes = TypeCodec::encode_argument(&p, &Value::from("5")).unwrap();
        assert_eq!(bytes, b"5");
    }

    // ---- Variadic ----

    #[test]
    fn variadic_roundtrip() {
        let bytes = TypeCodec::encode_arguments(
            &params(),
            &[Value::from("ada")],
            &named(&[("suffix", Value::from("!"))]),
        )
        .unwrap();
        let values = TypeCodec::decode_arguments(&params(), &bytes).unwrap();
        assert_eq!(values, vec![Value::from("ada"), Value::Int(1), Value::from("!")]);
    }

    #[test]
    fn variadic_empty_payload_uses_defaults() {
        let p = vec![ParamSpec::new("times", TypeDescriptor::int()).with_default(2i64)];
        assert_eq!(TypeCodec::decode_arguments(&p, b"").unwrap(), vec![Value::Int(2)]);
    }

    #[test]
    fn variadic_missing_required() {
        let err = TypeCodec::decode_arguments(&params(), br#"{"named": {"times": 2}}"#).unwrap_err();
        match err {
            CodecError::Validation(e) => assert_eq!(e.path, "name"),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn variadic_too_many_positional() {
        let err = TypeCodec::decode_arguments(&params(), br#"{"positional": ["a", 1, "b", 4]}"#)
            .unwrap_err();
        assert!(err.to_string().contains("too many positional"));
    }

    #[test]
    fn variadic_duplicate_argument() {
        let err = TypeCodec::decode_arguments(
            &params(),
            br#"{"positional": ["a"], "named": {"name": "b"}}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("supplied twice"));
    }

    #[test]
    fn variadic_unknown_name() {
        let err = TypeCodec::encode_arguments(&params(), &[], &named(&[("nope", Value::Int(1))]))
            .unwrap_err();
        assert!(err.to_string().contains("unknown name"));
        let err = TypeCodec::decode_arguments(&params(), br#"{"named": {"nope": 1}}"#).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn variadic_type_mismatch_names_param() {
        let err = TypeCodec::decode_arguments(&params(), br#"{"positional": ["a", "many"]}"#)
            .unwrap_err();
        match err {
            CodecError::Validation(e) => {
                assert_eq!(e.path, "times");
                assert_eq!(e.expected, "int");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn envelope_must_be_object() {
        assert!(TypeCodec::decode_arguments(&params(), b"[1,2]").is_err());
        assert!(TypeCodec::decode_arguments(&params(), br#"{"extra": 1}"#).is_err());
    }
}
