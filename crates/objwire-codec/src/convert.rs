use std::collections::BTreeMap;

use objwire_types::value::canonical_set;
use objwire_types::{
    ObjectIdentity, PrimitiveKind, TemporalKind, TypeDescriptor, ValidationError, Value,
};
use uuid::Uuid;

use crate::codec::{canonical_map, format_datetime, parse_datetime, TypeCodec, MAX_SAFE_INT};
use crate::path;

impl TypeCodec {
    /// Coerce loosely typed input to `descriptor` without touching bytes.
    ///
    /// Lossless widenings and parses are applied (`"5"` into an int field,
    /// `3` into a float field, a scalar into a one-element list); anything
    /// that would drop information is rejected.
    pub fn convert(value: &Value, descriptor: &TypeDescriptor) -> Result<Value, ValidationError> {
        convert("", value, descriptor)
    }

    pub fn convert_at(
        path: &str,
        value: &Value,
        descriptor: &TypeDescriptor,
    ) -> Result<Value, ValidationError> {
        convert(path, value, descriptor)
    }
}

fn refuse(path: &str, descriptor: &TypeDescriptor, value: &Value) -> ValidationError {
    ValidationError::new(path, descriptor.kind_name(), value.kind_name())
}

fn convert(path: &str, value: &Value, descriptor: &TypeDescriptor) -> Result<Value, ValidationError> {
    match descriptor {
        TypeDescriptor::Primitive(kind) => convert_primitive(path, value, *kind, descriptor),
        TypeDescriptor::Temporal(TemporalKind::DateTime) => match value {
            Value::DateTime(_) => Ok(value.clone()),
            Value::Str(s) => parse_datetime(s).map(Value::DateTime).ok_or_else(|| {
                ValidationError::new(path, "RFC 3339 datetime", format!("{s:?}"))
            }),
            other => Err(refuse(path, descriptor, other)),
        },
        TypeDescriptor::Temporal(TemporalKind::Uuid) => match value {
            Value::Uuid(_) => Ok(value.clone()),
            Value::Str(s) => Uuid::parse_str(s).map(Value::Uuid).map_err(|e| {
                ValidationError::new(path, "uuid", format!("{s:?}")).with_reason(e.to_string())
            }),
            other => Err(refuse(path, descriptor, other)),
        },
        TypeDescriptor::Optional(inner) => match value {
            Value::Null => Ok(Value::Null),
            other => convert(path, other, inner),
        },
        TypeDescriptor::Union(alternatives) => {
            if let Some(alt) = alternatives.iter().find(|a| a.accepts(value)) {
                return convert(path, value, alt);
            }
            let mut failures = Vec::with_capacity(alternatives.len());
            for alt in alternatives {
                match convert(path, value, alt) {
                    Ok(v) => return Ok(v),
                    Err(e) => failures.push(format!("{alt}: {}", e.received)),
                }
            }
            Err(refuse(path, descriptor, value)
                .with_reason(format!("no alternative matched ({})", failures.join("; "))))
        }
        TypeDescriptor::List(element) => match value {
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                convert_items(path, items, element).map(Value::List)
            }
            Value::Null | Value::Map(_) | Value::Struct(_) => Err(refuse(path, descriptor, value)),
            scalar => Ok(Value::List(vec![convert(&path::index(path, 0), scalar, element)?])),
        },
        TypeDescriptor::Set(element) => match value {
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => {
                convert_items(path, items, element).map(|items| Value::Set(canonical_set(items)))
            }
            other => Err(refuse(path, descriptor, other)),
        },
        TypeDescriptor::Tuple(elements) => match value {
            Value::List(items) | Value::Tuple(items) if items.len() == elements.len() => elements
                .iter()
                .zip(items)
                .enumerate()
                .map(|(i, (d, v))| convert(&path::index(path, i), v, d))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Tuple),
            Value::List(items) | Value::Tuple(items) => Err(ValidationError::new(
                path,
                descriptor.kind_name(),
                format!("{} elements", items.len()),
            )),
            other => Err(refuse(path, descriptor, other)),
        },
        TypeDescriptor::Map(key_desc, val_desc) => {
            let entries: Vec<(Value, Value)> = match value {
                Value::Map(entries) => entries.clone(),
                Value::Struct(fields) => fields
                    .iter()
                    .map(|(k, v)| (Value::Str(k.clone()), v.clone()))
                    .collect(),
                other => return Err(refuse(path, descriptor, other)),
            };
            let mut out = Vec::with_capacity(entries.len());
            for (k, v) in &entries {
                let key = convert(&path::key(path, k), k, key_desc)?;
                let val = convert(&path::key(path, k), v, val_desc)?;
                out.push((key, val));
            }
            canonical_map(path, out).map(Value::Map)
        }
        TypeDescriptor::Structured { fields, .. } => {
            let input: BTreeMap<String, Value> = match value {
                Value::Struct(fields) => fields.clone(),
                Value::Map(entries) => {
                    let mut out = BTreeMap::new();
                    for (k, v) in entries {
                        match k {
                            Value::Str(name) => {
                                out.insert(name.clone(), v.clone());
                            }
                            other => return Err(refuse(&path::key(path, other), descriptor, other)),
                        }
                    }
                    out
                }
                other => return Err(refuse(path, descriptor, other)),
            };
            if let Some(unknown) = input.keys().find(|k| !fields.iter().any(|f| &f.name == *k)) {
                return Err(ValidationError::new(path::field(path, unknown), "no such field", "value")
                    .with_reason(format!("{} has no field {unknown}", descriptor.kind_name())));
            }
            let mut out = BTreeMap::new();
            for field in fields {
                let field_path = path::field(path, &field.name);
                let v = match input.get(&field.name) {
                    Some(v) => convert(&field_path, v, &field.descriptor)?,
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
                out.insert(field.name.clone(), v);
            }
            Ok(Value::Struct(out))
        }
        TypeDescriptor::Reference(class_id) => {
            let identity = ObjectIdentity::from_value(value).map_err(|mut e| {
                e.path = path::rebase(path, "identity", &e.path);
                e
            })?;
            if &identity.class_id != class_id {
                return Err(ValidationError::new(
                    path,
                    descriptor.kind_name(),
                    format!("Ref[{}]", identity.class_id),
                ));
            }
            Ok(Value::Ref(identity))
        }
        TypeDescriptor::Enum { variants, .. } => match value {
            Value::Str(s) if variants.contains(s) => Ok(value.clone()),
            Value::Str(s) => Err(ValidationError::new(path, descriptor.kind_name(), format!("{s:?}"))
                .with_reason(format!("expected one of {}", variants.join(", ")))),
            other => Err(refuse(path, descriptor, other)),
        },
        TypeDescriptor::Any => convert_any(path, value),
    }
}

fn convert_items(
    path: &str,
    items: &[Value],
    element: &TypeDescriptor,
) -> Result<Vec<Value>, ValidationError> {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| convert(&path::index(path, i), item, element))
        .collect()
}

fn convert_primitive(
    path: &str,
    value: &Value,
    kind: PrimitiveKind,
    descriptor: &TypeDescriptor,
) -> Result<Value, ValidationError> {
    match (kind, value) {
        (PrimitiveKind::Int, Value::Int(_))
        | (PrimitiveKind::Bool, Value::Bool(_))
        | (PrimitiveKind::Str, Value::Str(_))
        | (PrimitiveKind::Bytes, Value::Bytes(_)) => Ok(value.clone()),

        (PrimitiveKind::Int, Value::Float(f)) => {
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.2e18 {
                Ok(Value::Int(*f as i64))
            } else {
                Err(ValidationError::new(path, "int", f.to_string())
                    .with_reason("conversion would lose the fractional part"))
            }
        }
        (PrimitiveKind::Int, Value::Str(s)) => s.trim().parse::<i64>().map(Value::Int).map_err(|_| {
            ValidationError::new(path, "int", format!("{s:?}")).with_reason("not an integer literal")
        }),

        (PrimitiveKind::Float, Value::Float(f)) if f.is_finite() => Ok(value.clone()),
        (PrimitiveKind::Float, Value::Int(i)) => {
            if i.unsigned_abs() <= MAX_SAFE_INT as u64 {
                Ok(Value::Float(*i as f64))
            } else {
                Err(ValidationError::new(path, "float", i.to_string())
                    .with_reason("integer not exactly representable as float"))
            }
        }
        (PrimitiveKind::Float, Value::Str(s)) => match s.trim().parse::<f64>() {
            Ok(f) if f.is_finite() => Ok(Value::Float(f)),
            _ => Err(ValidationError::new(path, "float", format!("{s:?}"))
                .with_reason("not a finite number literal")),
        },

        (PrimitiveKind::Bool, Value::Str(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ => Err(ValidationError::new(path, "bool", format!("{s:?}"))),
        },
        (PrimitiveKind::Bool, Value::Int(0)) => Ok(Value::Bool(false)),
        (PrimitiveKind::Bool, Value::Int(1)) => Ok(Value::Bool(true)),

        (PrimitiveKind::Str, Value::Int(i)) => Ok(Value::Str(i.to_string())),
        (PrimitiveKind::Str, Value::Float(f)) if f.is_finite() => Ok(Value::Str(f.to_string())),
        (PrimitiveKind::Str, Value::Bool(b)) => Ok(Value::Str(b.to_string())),
        (PrimitiveKind::Str, Value::Uuid(id)) => Ok(Value::Str(id.hyphenated().to_string())),
        (PrimitiveKind::Str, Value::DateTime(dt)) => Ok(Value::Str(format_datetime(dt))),

        (PrimitiveKind::Bytes, Value::Str(s)) => Ok(Value::Bytes(s.as_bytes().to_vec())),
        (PrimitiveKind::Bytes, Value::List(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Int(b) => u8::try_from(*b).map_err(|_| {
                    ValidationError::new(path::index(path, i), "byte", b.to_string())
                }),
                other => Err(ValidationError::new(path::index(path, i), "byte", other.kind_name())),
            })
            .collect::<Result<Vec<u8>, _>>()
            .map(Value::Bytes),

        (_, other) => Err(refuse(path, descriptor, other)),
    }
}

fn convert_any(path: &str, value: &Value) -> Result<Value, ValidationError> {
    match value {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_) => Ok(value.clone()),
        Value::Float(f) if f.is_finite() => Ok(value.clone()),
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| convert_any(&path::index(path, i), item))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List),
        Value::Struct(fields) => fields
            .iter()
            .map(|(k, v)| convert_any(&path::field(path, k), v).map(|v| (k.clone(), v)))
            .collect::<Result<BTreeMap<_, _>, _>>()
            .map(Value::Struct),
        Value::Map(entries) => {
            let mut out = BTreeMap::new();
            for (k, v) in entries {
                let name = match k {
                    Value::Str(name) => name.clone(),
                    other => return Err(ValidationError::new(path::key(path, other), "str key", other.kind_name())),
                };
                out.insert(name.clone(), convert_any(&path::field(path, &name), v)?);
            }
            Ok(Value::Struct(out))
        }
        other => Err(refuse(path, &TypeDescriptor::Any, other)),
    }
}
