use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use objwire_types::value::canonical_set;
use objwire_types::{
    ObjectIdentity, PrimitiveKind, TemporalKind, TypeDescriptor, ValidationError, Value,
};
use serde_json::{Map as JsonMap, Number, Value as Json};
use tracing::trace;
use uuid::Uuid;

use crate::error::{CodecError, CodecResult};
use crate::path;

/// Largest integer magnitude a float represents exactly.
pub(crate) const MAX_SAFE_INT: i64 = 1 << 53;

/// Descriptor-driven codec between [`Value`] and its JSON byte form.
///
/// All operations are pure and never block.
pub struct TypeCodec;

impl TypeCodec {
    /// Encode a value that must already conform to `descriptor`.
    pub fn encode(value: &Value, descriptor: &TypeDescriptor) -> CodecResult<Vec<u8>> {
        Self::encode_at("", value, descriptor)
    }

    /// Like [`encode`](Self::encode), naming the value `path` in errors.
    pub fn encode_at(
        path: &str,
        value: &Value,
        descriptor: &TypeDescriptor,
    ) -> CodecResult<Vec<u8>> {
        let json = to_json(path, value, descriptor)?;
        let bytes =
            serde_json::to_vec(&json).map_err(|e| CodecError::Serialization(e.to_string()))?;
        trace!(descriptor = %descriptor, bytes = bytes.len(), "encoded value");
        Ok(bytes)
    }

    /// Decode bytes against `descriptor`.
    ///
    /// An empty payload means "absent": it decodes to `Null` for nullable
    /// descriptors and is a missing-value error otherwise.
    pub fn decode(bytes: &[u8], descriptor: &TypeDescriptor) -> CodecResult<Value> {
        Self::decode_at("", bytes, descriptor)
    }

    pub fn decode_at(path: &str, bytes: &[u8], descriptor: &TypeDescriptor) -> CodecResult<Value> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return if descriptor.is_nullable() {
                Ok(Value::Null)
            } else {
                Err(ValidationError::missing(path, descriptor.kind_name()).into())
            };
        }
        let json: Json =
            serde_json::from_slice(bytes).map_err(|e| CodecError::Malformed(e.to_string()))?;
        let value = from_json(path, &json, descriptor)?;
        trace!(descriptor = %descriptor, bytes = bytes.len(), "decoded value");
        Ok(value)
    }

    /// Render a conforming value as JSON.
    pub fn to_json(value: &Value, descriptor: &TypeDescriptor) -> CodecResult<Json> {
        to_json("", value, descriptor)
    }

    /// Read a value of `descriptor` out of JSON.
    pub fn from_json(json: &Json, descriptor: &TypeDescriptor) -> CodecResult<Value> {
        Ok(from_json("", json, descriptor)?)
    }

    /// Whether `value` already has the exact shape of `descriptor`.
    pub fn conforms(value: &Value, descriptor: &TypeDescriptor) -> bool {
        descriptor.accepts(value)
    }
}

fn mismatch(path: &str, descriptor: &TypeDescriptor, value: &Value) -> CodecError {
    ValidationError::new(path, descriptor.kind_name(), value.kind_name()).into()
}

/// Identities on the wire keep their object id within `i64`.
fn wire_identity(path: &str, identity: &ObjectIdentity) -> Result<(), ValidationError> {
    identity.validate().map_err(|e| ValidationError {
        path: path.to_string(),
        ..e
    })
}

fn float_json(path: &str, f: f64) -> CodecResult<Json> {
    Number::from_f64(f)
        .map(Json::Number)
        .ok_or_else(|| CodecError::Serialization(format!("{path}: non-finite float {f}")))
}

/// Descriptors whose JSON form is a string, so maps keyed by them can be
/// written as JSON objects.
fn string_keyed(descriptor: &TypeDescriptor) -> bool {
    matches!(
        descriptor,
        TypeDescriptor::Primitive(PrimitiveKind::Str)
            | TypeDescriptor::Primitive(PrimitiveKind::Bytes)
            | TypeDescriptor::Temporal(_)
            | TypeDescriptor::Enum { .. }
    )
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse RFC 3339 text; timestamps without an offset are read as UTC.
pub(crate) fn parse_datetime(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

pub(crate) fn to_json(path: &str, value: &Value, descriptor: &TypeDescriptor) -> CodecResult<Json> {
    match (descriptor, value) {
        (TypeDescriptor::Primitive(PrimitiveKind::Int), Value::Int(i)) => Ok(Json::from(*i)),
        (TypeDescriptor::Primitive(PrimitiveKind::Float), Value::Float(f)) => float_json(path, *f),
        (TypeDescriptor::Primitive(PrimitiveKind::Bool), Value::Bool(b)) => Ok(Json::Bool(*b)),
        (TypeDescriptor::Primitive(PrimitiveKind::Str), Value::Str(s)) => Ok(Json::String(s.clone())),
        (TypeDescriptor::Primitive(PrimitiveKind::Bytes), Value::Bytes(b)) => {
            Ok(Json::String(hex::encode(b)))
        }
        (TypeDescriptor::Temporal(TemporalKind::DateTime), Value::DateTime(dt)) => {
            Ok(Json::String(format_datetime(dt)))
        }
        (TypeDescriptor::Temporal(TemporalKind::Uuid), Value::Uuid(id)) => {
            Ok(Json::String(id.hyphenated().to_string()))
        }
        (TypeDescriptor::Optional(_), Value::Null) => Ok(Json::Null),
        (TypeDescriptor::Optional(inner), v) => to_json(path, v, inner),
        (TypeDescriptor::Union(alternatives), v) => union_to_json(path, v, descriptor, alternatives),
        (TypeDescriptor::List(element), Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| to_json(&path::index(path, i), item, element))
            .collect::<CodecResult<Vec<_>>>()
            .map(Json::Array),
        (TypeDescriptor::Set(element), Value::Set(items)) => canonical_set(items.clone())
            .iter()
            .enumerate()
            .map(|(i, item)| to_json(&path::index(path, i), item, element))
            .collect::<CodecResult<Vec<_>>>()
            .map(Json::Array),
        (TypeDescriptor::Tuple(elements), Value::Tuple(items)) => {
            if elements.len() != items.len() {
                return Err(ValidationError::new(
                    path,
                    descriptor.kind_name(),
                    format!("{}-tuple", items.len()),
                )
                .into());
            }
            elements
                .iter()
                .zip(items)
                .enumerate()
                .map(|(i, (d, v))| to_json(&path::index(path, i), v, d))
                .collect::<CodecResult<Vec<_>>>()
                .map(Json::Array)
        }
        (TypeDescriptor::Map(key_desc, val_desc), Value::Map(entries)) => {
            if string_keyed(key_desc) {
                let mut object = JsonMap::new();
                for (k, v) in entries {
                    let key = match to_json(path, k, key_desc)? {
                        Json::String(s) => s,
                        _ => return Err(mismatch(path, key_desc, k)),
                    };
                    object.insert(key, to_json(&path::key(path, k), v, val_desc)?);
                }
                Ok(Json::Object(object))
            } else {
                let mut pairs = Vec::with_capacity(entries.len());
                for (i, (k, v)) in entries.iter().enumerate() {
                    let entry_path = path::index(path, i);
                    pairs.push(Json::Array(vec![
                        to_json(&entry_path, k, key_desc)?,
                        to_json(&path::key(path, k), v, val_desc)?,
                    ]));
                }
                Ok(Json::Array(pairs))
            }
        }
        (TypeDescriptor::Structured { fields, .. }, Value::Struct(values)) => {
            if let Some(unknown) = values.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
                return Err(ValidationError::new(path::field(path, unknown), "no such field", "value")
                    .with_reason(format!("{} has no field {unknown}", descriptor.kind_name()))
                    .into());
            }
            let mut object = JsonMap::new();
            for field in fields {
                let field_path = path::field(path, &field.name);
                match values.get(&field.name) {
                    Some(v) => {
                        object.insert(field.name.clone(), to_json(&field_path, v, &field.descriptor)?);
                    }
                    None if field.is_required() => {
                        return Err(ValidationError::missing(field_path, field.descriptor.kind_name()).into())
                    }
                    None => {}
                }
            }
            Ok(Json::Object(object))
        }
        (TypeDescriptor::Reference(class_id), Value::Ref(identity)) => {
            if &identity.class_id != class_id {
                return Err(ValidationError::new(
                    path,
                    descriptor.kind_name(),
                    format!("Ref[{}]", identity.class_id),
                )
                .into());
            }
            wire_identity(path, identity)?;
            serde_json::to_value(identity).map_err(|e| CodecError::Serialization(e.to_string()))
        }
        (TypeDescriptor::Enum { variants, .. }, Value::Str(s)) if variants.contains(s) => {
            Ok(Json::String(s.clone()))
        }
        (TypeDescriptor::Any, v) => any_to_json(path, v),
        (_, v) => Err(mismatch(path, descriptor, v)),
    }
}

/// Encode under the first alternative whose output decodes back to `v`.
/// Decoding takes the first alternative that accepts the JSON, so an
/// encoding another alternative would claim first is unusable.
fn union_to_json(
    path: &str,
    v: &Value,
    descriptor: &TypeDescriptor,
    alternatives: &[TypeDescriptor],
) -> CodecResult<Json> {
    let mut candidates = alternatives.iter().filter(|a| a.accepts(v)).peekable();
    if candidates.peek().is_none() {
        return Err(mismatch(path, descriptor, v));
    }
    for alt in candidates {
        let json = to_json(path, v, alt)?;
        let decoded = alternatives
            .iter()
            .find_map(|a| from_json(path, &json, a).ok());
        if decoded.as_ref() == Some(v) {
            return Ok(json);
        }
    }
    Err(ValidationError::new(path, descriptor.kind_name(), v.kind_name())
        .with_reason("no alternative encodes this value unambiguously")
        .into())
}

fn any_to_json(path: &str, value: &Value) -> CodecResult<Json> {
    match value {
        Value::Null => Ok(Json::Null),
        Value::Bool(b) => Ok(Json::Bool(*b)),
        Value::Int(i) => Ok(Json::from(*i)),
        Value::Float(f) => float_json(path, *f),
        Value::Str(s) => Ok(Json::String(s.clone())),
        // Sets are stored canonical, so their array order is stable.
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| any_to_json(&path::index(path, i), item))
            .collect::<CodecResult<Vec<_>>>()
            .map(Json::Array),
        Value::Struct(fields) => {
            let mut object = JsonMap::new();
            for (name, v) in fields {
                object.insert(name.clone(), any_to_json(&path::field(path, name), v)?);
            }
            Ok(Json::Object(object))
        }
        Value::Map(entries) => {
            let mut object = JsonMap::new();
            for (k, v) in entries {
                let Value::Str(name) = k else {
                    return Err(ValidationError::new(path::key(path, k), "str key", k.kind_name()).into());
                };
                object.insert(name.clone(), any_to_json(&path::field(path, name), v)?);
            }
            Ok(Json::Object(object))
        }
        other => Err(mismatch(path, &TypeDescriptor::Any, other)),
    }
}

pub(crate) fn json_kind(json: &Json) -> &'static str {
    match json {
        Json::Null => "null",
        Json::Bool(_) => "bool",
        Json::Number(n) if n.is_f64() => "float",
        Json::Number(_) => "int",
        Json::String(_) => "str",
        Json::Array(_) => "array",
        Json::Object(_) => "object",
    }
}

fn unexpected(path: &str, descriptor: &TypeDescriptor, json: &Json) -> ValidationError {
    ValidationError::new(path, descriptor.kind_name(), json_kind(json))
}

/// Sort map entries by key and reject duplicate keys.
pub(crate) fn canonical_map(
    path: &str,
    mut entries: Vec<(Value, Value)>,
) -> Result<Vec<(Value, Value)>, ValidationError> {
    entries.sort_by(|a, b| a.0.canonical_cmp(&b.0));
    for pair in entries.windows(2) {
        if pair[0].0.canonical_cmp(&pair[1].0).is_eq() {
            return Err(ValidationError::new(path::key(path, &pair[0].0), "unique key", "duplicate key"));
        }
    }
    Ok(entries)
}

pub(crate) fn from_json(path: &str, json: &Json, descriptor: &TypeDescriptor) -> Result<Value, ValidationError> {
    match descriptor {
        TypeDescriptor::Primitive(PrimitiveKind::Int) => match json {
            Json::Number(n) if !n.is_f64() => n.as_i64().map(Value::Int).ok_or_else(|| {
                ValidationError::new(path, "int", n.to_string()).with_reason("out of i64 range")
            }),
            _ => Err(unexpected(path, descriptor, json)),
        },
        TypeDescriptor::Primitive(PrimitiveKind::Float) => match json {
            Json::Number(n) => match (n.as_i64(), n.as_f64()) {
                (Some(i), _) if i.unsigned_abs() > MAX_SAFE_INT as u64 => Err(ValidationError::new(
                    path,
                    "float",
                    n.to_string(),
                )
                .with_reason("integer not exactly representable as float")),
                (_, Some(f)) => Ok(Value::Float(f)),
                _ => Err(unexpected(path, descriptor, json)),
            },
            _ => Err(unexpected(path, descriptor, json)),
        },
        TypeDescriptor::Primitive(PrimitiveKind::Bool) => json
            .as_bool()
            .map(Value::Bool)
            .ok_or_else(|| unexpected(path, descriptor, json)),
        TypeDescriptor::Primitive(PrimitiveKind::Str) => json
            .as_str()
            .map(|s| Value::Str(s.to_string()))
            .ok_or_else(|| unexpected(path, descriptor, json)),
        TypeDescriptor::Primitive(PrimitiveKind::Bytes) => {
            let text = json.as_str().ok_or_else(|| unexpected(path, descriptor, json))?;
            hex::decode(text).map(Value::Bytes).map_err(|e| {
                ValidationError::new(path, "hex-encoded bytes", format!("{text:?}"))
                    .with_reason(e.to_string())
            })
        }
        TypeDescriptor::Temporal(TemporalKind::DateTime) => {
            let text = json.as_str().ok_or_else(|| unexpected(path, descriptor, json))?;
            parse_datetime(text).map(Value::DateTime).ok_or_else(|| {
                ValidationError::new(path, "RFC 3339 datetime", format!("{text:?}"))
            })
        }
        TypeDescriptor::Temporal(TemporalKind::Uuid) => {
            let text = json.as_str().ok_or_else(|| unexpected(path, descriptor, json))?;
            Uuid::parse_str(text).map(Value::Uuid).map_err(|e| {
                ValidationError::new(path, "uuid", format!("{text:?}")).with_reason(e.to_string())
            })
        }
        TypeDescriptor::Optional(inner) => match json {
            Json::Null => Ok(Value::Null),
            other => from_json(path, other, inner),
        },
        TypeDescriptor::Union(alternatives) => {
            let mut failures = Vec::with_capacity(alternatives.len());
            for alt in alternatives {
                match from_json(path, json, alt) {
                    Ok(v) => return Ok(v),
                    Err(e) => failures.push(format!("{alt}: {}", e.received)),
                }
            }
            Err(unexpected(path, descriptor, json)
                .with_reason(format!("no alternative matched ({})", failures.join("; "))))
        }
        TypeDescriptor::List(element) => {
            let items = json.as_array().ok_or_else(|| unexpected(path, descriptor, json))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| from_json(&path::index(path, i), item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List)
        }
        TypeDescriptor::Set(element) => {
            let items = json.as_array().ok_or_else(|| unexpected(path, descriptor, json))?;
            items
                .iter()
                .enumerate()
                .map(|(i, item)| from_json(&path::index(path, i), item, element))
                .collect::<Result<Vec<_>, _>>()
                .map(|items| Value::Set(canonical_set(items)))
        }
        TypeDescriptor::Tuple(elements) => {
            let items = json.as_array().ok_or_else(|| unexpected(path, descriptor, json))?;
            if items.len() != elements.len() {
                return Err(ValidationError::new(
                    path,
                    descriptor.kind_name(),
                    format!("{}-element array", items.len()),
                ));
            }
            elements
                .iter()
                .zip(items)
                .enumerate()
                .map(|(i, (d, item))| from_json(&path::index(path, i), item, d))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple)
        }
        TypeDescriptor::Map(key_desc, val_desc) => {
            let mut entries = Vec::new();
            match json {
                Json::Object(object) if string_keyed(key_desc) => {
                    for (k, v) in object {
                        let key = from_json(path, &Json::String(k.clone()), key_desc)?;
                        let val = from_json(&path::key(path, &key), v, val_desc)?;
                        entries.push((key, val));
                    }
                }
                Json::Array(pairs) => {
                    for (i, pair) in pairs.iter().enumerate() {
                        let entry_path = path::index(path, i);
                        let (k, v) = match pair.as_array().map(Vec::as_slice) {
                            Some([k, v]) => (k, v),
                            _ => {
                                return Err(ValidationError::new(
                                    entry_path,
                                    "[key, value] pair",
                                    json_kind(pair),
                                ))
                            }
                        };
                        let key = from_json(&entry_path, k, key_desc)?;
                        let val = from_json(&path::key(path, &key), v, val_desc)?;
                        entries.push((key, val));
                    }
                }
                other => return Err(unexpected(path, descriptor, other)),
            }
            canonical_map(path, entries).map(Value::Map)
        }
        TypeDescriptor::Structured { fields, .. } => {
            let object = json.as_object().ok_or_else(|| unexpected(path, descriptor, json))?;
            let mut out = std::collections::BTreeMap::new();
            for field in fields {
                let field_path = path::field(path, &field.name);
                let value = match object.get(&field.name) {
                    Some(v) => from_json(&field_path, v, &field.descriptor)?,
                    None => match &field.default {
                        Some(default) => default.clone(),
                        None if field.descriptor.is_nullable() => Value::Null,
                        None => {
                            return Err(ValidationError::missing(
                                field_path,
                                field.descriptor.kind_name(),
                            ))
                        }
                    },
                };
                out.insert(field.name.clone(), value);
            }
            Ok(Value::Struct(out))
        }
        TypeDescriptor::Reference(class_id) => {
            if !json.is_object() {
                return Err(unexpected(path, descriptor, json));
            }
            let identity: ObjectIdentity = serde_json::from_value(json.clone()).map_err(|e| {
                ValidationError::new(path, "object identity", json.to_string())
                    .with_reason(e.to_string())
            })?;
            if &identity.class_id != class_id {
                return Err(ValidationError::new(
                    path,
                    descriptor.kind_name(),
                    format!("Ref[{}]", identity.class_id),
                ));
            }
            wire_identity(path, &identity)?;
            Ok(Value::Ref(identity))
        }
        TypeDescriptor::Enum { variants, .. } => match json.as_str() {
            Some(s) if variants.iter().any(|v| v == s) => Ok(Value::Str(s.to_string())),
            Some(s) => Err(ValidationError::new(path, descriptor.kind_name(), format!("{s:?}"))
                .with_reason(format!("expected one of {}", variants.join(", ")))),
            None => Err(unexpected(path, descriptor, json)),
        },
        TypeDescriptor::Any => Ok(json_to_any(json)),
    }
}

fn json_to_any(json: &Json) -> Value {
    match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(items.iter().map(json_to_any).collect()),
        Json::Object(object) => Value::Struct(
            object
                .iter()
                .map(|(k, v)| (k.clone(), json_to_any(v)))
                .collect(),
        ),
    }
}
