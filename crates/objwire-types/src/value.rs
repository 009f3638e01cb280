use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::identity::ObjectIdentity;

/// A dynamically typed in-process value.
///
/// This is the common currency between typed user code and the codec:
/// field values, call arguments, and results all pass through it. Sets
/// and maps are kept in canonical order (see [`Value::canonical_cmp`]) by
/// whoever builds them from untrusted input.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    List(Vec<Value>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Struct(BTreeMap<String, Value>),
    DateTime(DateTime<Utc>),
    Uuid(Uuid),
    Ref(ObjectIdentity),
}

impl Value {
    /// Short name of the value's shape, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Str(_) => "str",
            Self::Bytes(_) => "bytes",
            Self::List(_) => "list",
            Self::Set(_) => "set",
            Self::Tuple(_) => "tuple",
            Self::Map(_) => "map",
            Self::Struct(_) => "struct",
            Self::DateTime(_) => "datetime",
            Self::Uuid(_) => "uuid",
            Self::Ref(_) => "ref",
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_ref_identity(&self) -> Option<&ObjectIdentity> {
        match self {
            Self::Ref(identity) => Some(identity),
            _ => None,
        }
    }

    /// Look up a field of a `Struct` value.
    pub fn field(&self, name: &str) -> Option<&Value> {
        match self {
            Self::Struct(fields) => fields.get(name),
            _ => None,
        }
    }

    /// Build a `Struct` from name/value pairs.
    pub fn record<I, K>(fields: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Struct(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Build a set in canonical order with duplicates removed.
    pub fn set_of(items: impl IntoIterator<Item = Value>) -> Self {
        Self::Set(canonical_set(items.into_iter().collect()))
    }

    /// Build a map in canonical key order; later duplicates win.
    pub fn map_of(entries: impl IntoIterator<Item = (Value, Value)>) -> Self {
        let mut entries: Vec<(Value, Value)> = entries.into_iter().collect();
        // Stable sort keeps insertion order among equal keys; keep the last.
        entries.sort_by(|a, b| a.0.canonical_cmp(&b.0));
        let mut out: Vec<(Value, Value)> = Vec::with_capacity(entries.len());
        for (k, v) in entries {
            match out.last_mut() {
                Some(last) if last.0.canonical_cmp(&k) == Ordering::Equal => last.1 = v,
                _ => out.push((k, v)),
            }
        }
        Self::Map(out)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Bool(_) => 1,
            Self::Int(_) => 2,
            Self::Float(_) => 3,
            Self::Str(_) => 4,
            Self::Bytes(_) => 5,
            Self::DateTime(_) => 6,
            Self::Uuid(_) => 7,
            Self::Ref(_) => 8,
            Self::Tuple(_) => 9,
            Self::List(_) => 10,
            Self::Set(_) => 11,
            Self::Map(_) => 12,
            Self::Struct(_) => 13,
        }
    }

    /// A total order over all values.
    ///
    /// Values of different shapes order by shape first. Floats use IEEE
    /// total ordering so NaN has a fixed place.
    pub fn canonical_cmp(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Null, Self::Null) => Ordering::Equal,
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Float(a), Self::Float(b)) => a.total_cmp(b),
            (Self::Str(a), Self::Str(b)) => a.cmp(b),
            (Self::Bytes(a), Self::Bytes(b)) => a.cmp(b),
            (Self::DateTime(a), Self::DateTime(b)) => a.cmp(b),
            (Self::Uuid(a), Self::Uuid(b)) => a.cmp(b),
            (Self::Ref(a), Self::Ref(b)) => a.cmp(b),
            (Self::Tuple(a), Self::Tuple(b))
            | (Self::List(a), Self::List(b))
            | (Self::Set(a), Self::Set(b)) => cmp_seq(a, b),
            (Self::Map(a), Self::Map(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.canonical_cmp(kb).then_with(|| va.canonical_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Struct(a), Self::Struct(b)) => {
                for ((ka, va), (kb, vb)) in a.iter().zip(b) {
                    let ord = ka.cmp(kb).then_with(|| va.canonical_cmp(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

fn cmp_seq(a: &[Value], b: &[Value]) -> Ordering {
    for (x, y) in a.iter().zip(b) {
        let ord = x.canonical_cmp(y);
        if ord != Ordering::Equal {
            return ord;
        }
    }
    a.len().cmp(&b.len())
}

/// Sort and deduplicate set members.
pub fn canonical_set(mut items: Vec<Value>) -> Vec<Value> {
    items.sort_by(|a, b| a.canonical_cmp(b));
    items.dedup_by(|a, b| a.canonical_cmp(b) == Ordering::Equal);
    items
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<ObjectIdentity> for Value {
    fn from(v: ObjectIdentity) -> Self {
        Self::Ref(v)
    }
}
