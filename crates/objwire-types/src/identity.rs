use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::value::Value;

/// Canonical key names of the identity wire form.
pub const CLASS_ID_KEY: &str = "class_id";
pub const PARTITION_ID_KEY: &str = "partition_id";
pub const OBJECT_ID_KEY: &str = "object_id";

/// Number of low bits in a generated object id filled with randomness.
const RANDOM_BITS: u32 = 22;

/// Generated ids count milliseconds from 2020-01-01T00:00:00Z.
const ID_EPOCH_MILLIS: u64 = 1_577_836_800_000;

/// Largest object id. Ids travel as signed 64-bit ints.
pub const MAX_OBJECT_ID: u64 = i64::MAX as u64;

/// Names exactly one object across the whole system.
///
/// Identities are immutable values with structural equality and a stable
/// hash, so they can be used directly as map keys. The serialized form is
/// the canonical `{ "class_id", "partition_id", "object_id" }` record used
/// inside every reference payload.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectIdentity {
    pub class_id: String,
    pub partition_id: u32,
    pub object_id: u64,
}

impl ObjectIdentity {
    pub fn new(class_id: impl Into<String>, partition_id: u32, object_id: u64) -> Self {
        Self {
            class_id: class_id.into(),
            partition_id,
            object_id,
        }
    }

    /// Allocate a fresh identity with a time-sorted object id.
    ///
    /// The high bits carry milliseconds since [`ID_EPOCH_MILLIS`] and the low
    /// [`RANDOM_BITS`] bits are random, so ids allocated later sort later
    /// (at millisecond granularity) and collisions within one millisecond
    /// are unlikely.
    pub fn generate(class_id: impl Into<String>, partition_id: u32) -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64;
        let millis = millis.saturating_sub(ID_EPOCH_MILLIS);
        let random = rand::thread_rng().gen::<u64>() & ((1 << RANDOM_BITS) - 1);
        Self::new(class_id, partition_id, ((millis << RANDOM_BITS) | random) & MAX_OBJECT_ID)
    }

    /// Check that the identity can be written in wire form.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.class_id.is_empty() {
            return Err(ValidationError::new("identity.class_id", "non-empty class id", "empty string"));
        }
        self.wire_object_id()?;
        Ok(())
    }

    fn wire_object_id(&self) -> Result<i64, ValidationError> {
        i64::try_from(self.object_id).map_err(|_| {
            ValidationError::new("identity.object_id", "object id in i64 range", self.object_id.to_string())
        })
    }

    /// Parse an identity out of a dynamic value.
    ///
    /// Accepts a `Ref`, a struct or string-keyed map carrying the three
    /// canonical keys, or a three-element list/tuple in
    /// `(class_id, partition_id, object_id)` order.
    pub fn from_value(value: &Value) -> Result<Self, ValidationError> {
        match value {
            Value::Ref(identity) => Ok(identity.clone()),
            Value::Struct(fields) => Self::from_record(fields),
            Value::Map(entries) => {
                let mut fields = BTreeMap::new();
                for (key, val) in entries {
                    match key {
                        Value::Str(name) => {
                            fields.insert(name.clone(), val.clone());
                        }
                        other => {
                            return Err(ValidationError::new(
                                "identity",
                                "string key",
                                other.kind_name(),
                            ))
                        }
                    }
                }
                Self::from_record(&fields)
            }
            Value::List(items) | Value::Tuple(items) => match items.as_slice() {
                [class_id, partition_id, object_id] => Ok(Self::new(
                    expect_str("identity[0]", class_id)?,
                    expect_partition("identity[1]", partition_id)?,
                    expect_object_id("identity[2]", object_id)?,
                )),
                _ => Err(ValidationError::new(
                    "identity",
                    "3-element identity tuple",
                    format!("{}-element {}", items.len(), value.kind_name()),
                )),
            },
            other => Err(ValidationError::new(
                "identity",
                "object identity",
                other.kind_name(),
            )),
        }
    }

    fn from_record(fields: &BTreeMap<String, Value>) -> Result<Self, ValidationError> {
        let field = |key: &str| {
            fields.get(key).ok_or_else(|| {
                ValidationError::new(format!("identity.{key}"), "present", "missing")
            })
        };
        Ok(Self::new(
            expect_str("identity.class_id", field(CLASS_ID_KEY)?)?,
            expect_partition("identity.partition_id", field(PARTITION_ID_KEY)?)?,
            expect_object_id("identity.object_id", field(OBJECT_ID_KEY)?)?,
        ))
    }

    /// The identity as a dynamic reference value.
    pub fn to_value(&self) -> Value {
        Value::Ref(self.clone())
    }

    /// The identity as a struct value in canonical wire form.
    pub fn to_record(&self) -> Result<Value, ValidationError> {
        let mut fields = BTreeMap::new();
        fields.insert(CLASS_ID_KEY.to_string(), Value::Str(self.class_id.clone()));
        fields.insert(PARTITION_ID_KEY.to_string(), Value::Int(i64::from(self.partition_id)));
        fields.insert(OBJECT_ID_KEY.to_string(), Value::Int(self.wire_object_id()?));
        Ok(Value::Struct(fields))
    }
}

fn expect_str(path: &str, value: &Value) -> Result<String, ValidationError> {
    match value {
        Value::Str(s) if !s.is_empty() => Ok(s.clone()),
        Value::Str(_) => Err(ValidationError::new(path, "non-empty class id", "empty string")),
        other => Err(ValidationError::new(path, "str", other.kind_name())),
    }
}

fn expect_partition(path: &str, value: &Value) -> Result<u32, ValidationError> {
    match value {
        Value::Int(i) => u32::try_from(*i)
            .map_err(|_| ValidationError::new(path, "partition id in u32 range", i.to_string())),
        other => Err(ValidationError::new(path, "int", other.kind_name())),
    }
}

fn expect_object_id(path: &str, value: &Value) -> Result<u64, ValidationError> {
    match value {
        Value::Int(i) => u64::try_from(*i)
            .map_err(|_| ValidationError::new(path, "non-negative object id", i.to_string())),
        other => Err(ValidationError::new(path, "int", other.kind_name())),
    }
}

/// Anything that carries an [`ObjectIdentity`]: live objects and proxies.
pub trait HasIdentity {
    fn identity(&self) -> &ObjectIdentity;
}

impl HasIdentity for ObjectIdentity {
    fn identity(&self) -> &ObjectIdentity {
        self
    }
}

impl fmt::Debug for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectIdentity({self})")
    }
}

impl fmt::Display for ObjectIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class_id, self.partition_id, self.object_id)
    }
}
