//! Bridges between native Rust types and [`Value`].
//!
//! `FromValue` is strict: the codec has already coerced wire input to the
//! declared descriptor, so these impls only unwrap the expected shape.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::identity::ObjectIdentity;
use crate::value::Value;

/// Raw bytes, distinguished from `Vec<u8>` (which maps to a list of ints).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Bytes(pub Vec<u8>);

pub trait IntoValue {
    fn into_value(self) -> Value;
}

pub trait FromValue: Sized {
    fn from_value(value: Value) -> Result<Self, ValidationError>;
}

fn mismatch(expected: &str, value: &Value) -> ValidationError {
    ValidationError::new("", expected, value.kind_name())
}

impl IntoValue for Value {
    fn into_value(self) -> Value {
        self
    }
}

impl FromValue for Value {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        Ok(value)
    }
}

impl IntoValue for () {
    fn into_value(self) -> Value {
        Value::Null
    }
}

impl FromValue for () {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Null => Ok(()),
            other => Err(mismatch("null", &other)),
        }
    }
}

impl IntoValue for bool {
    fn into_value(self) -> Value {
        Value::Bool(self)
    }
}

impl FromValue for bool {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Bool(b) => Ok(b),
            other => Err(mismatch("bool", &other)),
        }
    }
}

macro_rules! int_value {
    ($($ty:ty),*) => {$(
        impl IntoValue for $ty {
            fn into_value(self) -> Value {
                Value::Int(self as i64)
            }
        }

        impl FromValue for $ty {
            fn from_value(value: Value) -> Result<Self, ValidationError> {
                match value {
                    Value::Int(i) => <$ty>::try_from(i).map_err(|_| {
                        ValidationError::new("", stringify!($ty), i.to_string())
                            .with_reason("out of range")
                    }),
                    other => Err(mismatch("int", &other)),
                }
            }
        }
    )*};
}

int_value!(i8, i16, i32, i64, u8, u16, u32);

// No `IntoValue for u64`: ids past `i64::MAX` have no `Int` form.
impl FromValue for u64 {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Int(i) => u64::try_from(i).map_err(|_| {
                ValidationError::new("", "u64", i.to_string()).with_reason("out of range")
            }),
            other => Err(mismatch("int", &other)),
        }
    }
}

impl IntoValue for f64 {
    fn into_value(self) -> Value {
        Value::Float(self)
    }
}

impl FromValue for f64 {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Float(f) => Ok(f),
            other => Err(mismatch("float", &other)),
        }
    }
}

impl IntoValue for String {
    fn into_value(self) -> Value {
        Value::Str(self)
    }
}

impl IntoValue for &str {
    fn into_value(self) -> Value {
        Value::Str(self.to_string())
    }
}

impl FromValue for String {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Str(s) => Ok(s),
            other => Err(mismatch("str", &other)),
        }
    }
}

impl IntoValue for Bytes {
    fn into_value(self) -> Value {
        Value::Bytes(self.0)
    }
}

impl FromValue for Bytes {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Bytes(b) => Ok(Bytes(b)),
            other => Err(mismatch("bytes", &other)),
        }
    }
}

impl IntoValue for DateTime<Utc> {
    fn into_value(self) -> Value {
        Value::DateTime(self)
    }
}

impl FromValue for DateTime<Utc> {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::DateTime(dt) => Ok(dt),
            other => Err(mismatch("datetime", &other)),
        }
    }
}

impl IntoValue for Uuid {
    fn into_value(self) -> Value {
        Value::Uuid(self)
    }
}

impl FromValue for Uuid {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Uuid(id) => Ok(id),
            other => Err(mismatch("uuid", &other)),
        }
    }
}

impl IntoValue for ObjectIdentity {
    fn into_value(self) -> Value {
        Value::Ref(self)
    }
}

impl FromValue for ObjectIdentity {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        ObjectIdentity::from_value(&value)
    }
}

impl<T: IntoValue> IntoValue for Option<T> {
    fn into_value(self) -> Value {
        match self {
            Some(v) => v.into_value(),
            None => Value::Null,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::Null => Ok(None),
            other => T::from_value(other).map(Some),
        }
    }
}

impl<T: IntoValue> IntoValue for Vec<T> {
    fn into_value(self) -> Value {
        Value::List(self.into_iter().map(IntoValue::into_value).collect())
    }
}

impl<T: FromValue> FromValue for Vec<T> {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        match value {
            Value::List(items) | Value::Set(items) | Value::Tuple(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, item)| {
                    T::from_value(item).map_err(|mut e| {
                        e.path = format!("[{i}]{}", e.path);
                        e
                    })
                })
                .collect(),
            other => Err(mismatch("list", &other)),
        }
    }
}

impl<T: IntoValue> IntoValue for BTreeMap<String, T> {
    fn into_value(self) -> Value {
        Value::Map(
            self.into_iter()
                .map(|(k, v)| (Value::Str(k), v.into_value()))
                .collect(),
        )
    }
}

impl<T: FromValue> FromValue for BTreeMap<String, T> {
    fn from_value(value: Value) -> Result<Self, ValidationError> {
        let entries: Vec<(Value, Value)> = match value {
            Value::Map(entries) => entries,
            Value::Struct(fields) => fields.into_iter().map(|(k, v)| (Value::Str(k), v)).collect(),
            other => return Err(mismatch("map", &other)),
        };
        let mut out = BTreeMap::new();
        for (key, val) in entries {
            let key = match key {
                Value::Str(s) => s,
                other => return Err(mismatch("str key", &other)),
            };
            let val = T::from_value(val).map_err(|mut e| {
                e.path = format!("[{key:?}]{}", e.path);
                e
            })?;
            out.insert(key, val);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primitives_roundtrip() {
        assert_eq!(i32::from_value(42i32.into_value()).unwrap(), 42);
        assert_eq!(String::from_value("hi".into_value()).unwrap(), "hi");
        assert!(bool::from_value(true.into_value()).unwrap());
        assert_eq!(f64::from_value(1.5f64.into_value()).unwrap(), 1.5);
    }

    #[test]
    fn int_range_is_checked() {
        let err = u8::from_value(Value::Int(300)).unwrap_err();
        assert_eq!(err.reason.as_deref(), Some("out of range"));
        assert!(u64::from_value(Value::Int(-1)).is_err());
    }

    #[test]
    fn no_implicit_coercion() {
        assert!(i64::from_value(Value::Str("5".into())).is_err());
        assert!(f64::from_value(Value::Int(5)).is_err());
    }

    #[test]
    fn option_maps_null() {
        assert_eq!(Option::<String>::from_value(Value::Null).unwrap(), None);
        assert_eq!(
            Option::<String>::from_value(Value::from("x")).unwrap(),
            Some("x".to_string())
        );
        assert_eq!(None::<i64>.into_value(), Value::Null);
    }

    #[test]
    fn vec_error_carries_index() {
        let list = Value::List(vec![Value::Int(1), Value::from("two")]);
        let err = Vec::<i64>::from_value(list).unwrap_err();
        assert_eq!(err.path, "[1]");
    }

    #[test]
    fn string_map_from_struct_or_map() {
        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), 1i64);
        let from_map =
            BTreeMap::<String, i64>::from_value(Value::Map(vec![(Value::from("a"), Value::Int(1))]))
                .unwrap();
        let from_struct =
            BTreeMap::<String, i64>::from_value(Value::record([("a", Value::Int(1))])).unwrap();
        assert_eq!(from_map, expected);
        assert_eq!(from_struct, expected);
    }

    #[test]
    fn bytes_newtype() {
        let b = Bytes(vec![1, 2, 3]);
        assert_eq!(b.clone().into_value(), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(Bytes::from_value(Value::Bytes(vec![1, 2, 3])).unwrap(), b);
    }
}
