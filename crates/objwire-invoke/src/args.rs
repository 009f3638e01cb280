use std::collections::BTreeMap;

use objwire_types::{FromValue, InvocationEnvelope, ObjectIdentity, ParamSpec, ValidationError, Value};

/// Decoded arguments of one call, in declared parameter order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Arguments {
    names: Vec<String>,
    values: Vec<Value>,
}

impl Arguments {
    pub(crate) fn new(params: &[ParamSpec], values: Vec<Value>) -> Self {
        Self {
            names: params.iter().map(|p| p.name.clone()).collect(),
            values,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let position = self.names.iter().position(|n| n == name)?;
        self.values.get(position)
    }

    pub fn at(&self, position: usize) -> Option<&Value> {
        self.values.get(position)
    }

    /// Take one argument as a native type. Absent names read as `Null`.
    pub fn get_as<T: FromValue>(&self, name: &str) -> Result<T, ValidationError> {
        let value = self.get(name).cloned().unwrap_or(Value::Null);
        T::from_value(value).map_err(|e| e.within(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.names.iter().map(String::as_str).zip(&self.values)
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Call metadata visible to `SingleWithMeta` and variadic methods.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMeta {
    pub target: ObjectIdentity,
    pub method_id: String,
    pub options: BTreeMap<String, String>,
}

impl CallMeta {
    pub fn from_envelope(target: &ObjectIdentity, envelope: &InvocationEnvelope) -> Self {
        Self {
            target: target.clone(),
            method_id: envelope.method_id.clone(),
            options: envelope.options.clone(),
        }
    }

    pub fn option(&self, key: &str) -> Option<&str> {
        self.options.get(key).map(String::as_str)
    }
}
