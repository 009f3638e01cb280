//! Per-class metadata tables.
//!
//! A [`ClassSchema`] is the explicit `{member -> (index, descriptor, default)}`
//! table for one class, validated once when it is built and immutable
//! afterwards. The [`Registry`] holds every schema and is constructed at
//! start-up, then shared behind an `Arc`.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use crate::descriptor::TypeDescriptor;
use crate::error::SchemaError;
use crate::value::Value;

/// The contract every field-backed member satisfies.
pub trait FieldBinding {
    fn name(&self) -> &str;
    fn index(&self) -> u32;
    fn type_descriptor(&self) -> &TypeDescriptor;
    fn default_value(&self) -> &Value;
}

/// One persistent attribute of a class.
#[derive(Debug, Clone, PartialEq)]
pub struct StateField {
    pub name: String,
    pub index: u32,
    pub descriptor: TypeDescriptor,
    pub default: Value,
}

impl StateField {
    /// Declare a field whose default is the descriptor's zero value.
    pub fn new(name: impl Into<String>, index: u32, descriptor: TypeDescriptor) -> Self {
        let default = descriptor.zero_value().unwrap_or(Value::Null);
        Self {
            name: name.into(),
            index,
            descriptor,
            default,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = default.into();
        self
    }
}

impl FieldBinding for StateField {
    fn name(&self) -> &str {
        &self.name
    }

    fn index(&self) -> u32 {
        self.index
    }

    fn type_descriptor(&self) -> &TypeDescriptor {
        &self.descriptor
    }

    fn default_value(&self) -> &Value {
        &self.default
    }
}

/// One declared method parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            default: None,
        }
    }

    pub fn with_default(mut self, default: impl Into<Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// A parameter may be omitted when it has a default or is nullable.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.descriptor.is_nullable()
    }
}

/// How a method receives its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallShape {
    /// No user parameters; any payload is ignored.
    NoArgs,
    /// The whole payload is one typed parameter.
    Single,
    /// One typed parameter plus the raw envelope options.
    SingleWithMeta,
    /// `{ "positional": [...], "named": {...} }` unpacked against the
    /// declared parameter list.
    Variadic,
}

/// The resolved signature of one remote-invokable method.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodSignature {
    pub name: String,
    pub shape: CallShape,
    pub params: Vec<ParamSpec>,
    pub returns: TypeDescriptor,
    /// Overrides the configured default call timeout.
    pub timeout: Option<Duration>,
}

impl MethodSignature {
    pub fn nullary(name: impl Into<String>, returns: TypeDescriptor) -> Self {
        Self::with_shape(name, CallShape::NoArgs, Vec::new(), returns)
    }

    pub fn unary(name: impl Into<String>, param: ParamSpec, returns: TypeDescriptor) -> Self {
        Self::with_shape(name, CallShape::Single, vec![param], returns)
    }

    pub fn unary_with_meta(
        name: impl Into<String>,
        param: ParamSpec,
        returns: TypeDescriptor,
    ) -> Self {
        Self::with_shape(name, CallShape::SingleWithMeta, vec![param], returns)
    }

    pub fn variadic(
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        returns: TypeDescriptor,
    ) -> Self {
        Self::with_shape(name, CallShape::Variadic, params, returns)
    }

    fn with_shape(
        name: impl Into<String>,
        shape: CallShape,
        params: Vec<ParamSpec>,
        returns: TypeDescriptor,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            params,
            returns,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// The single parameter of a `Single`/`SingleWithMeta` method.
    pub fn single_param(&self) -> Option<&ParamSpec> {
        match self.shape {
            CallShape::Single | CallShape::SingleWithMeta => self.params.first(),
            _ => None,
        }
    }

    fn validate(&self, class_id: &str) -> Result<(), SchemaError> {
        let invalid = |reason: &str| SchemaError::InvalidSignature {
            class: class_id.to_string(),
            method: self.name.clone(),
            reason: reason.to_string(),
        };
        match self.shape {
            CallShape::NoArgs if !self.params.is_empty() => {
                return Err(invalid("no-argument method declares parameters"))
            }
            CallShape::Single | CallShape::SingleWithMeta if self.params.len() != 1 => {
                return Err(invalid("single-argument method must declare exactly one parameter"))
            }
            _ => {}
        }
        let mut seen = BTreeSet::new();
        for param in &self.params {
            if !seen.insert(param.name.as_str()) {
                return Err(invalid(&format!("duplicate parameter {}", param.name)));
            }
            if let Some(default) = &param.default {
                if !param.descriptor.accepts(default) {
                    return Err(invalid(&format!(
                        "default for {} does not conform to {}",
                        param.name, param.descriptor
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Direction of a field accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessorKind {
    Read,
    Write,
}

/// A read-only or write-only operation bound to one state field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorSpec {
    pub name: String,
    pub field: String,
    pub kind: AccessorKind,
}

/// Metadata for one class: its state fields, methods, and accessors.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassSchema {
    class_id: String,
    fields: Vec<StateField>,
    methods: BTreeMap<String, MethodSignature>,
    accessors: BTreeMap<String, AccessorSpec>,
}

impl ClassSchema {
    pub fn builder(class_id: impl Into<String>) -> ClassSchemaBuilder {
        ClassSchemaBuilder {
            class_id: class_id.into(),
            fields: Vec::new(),
            methods: Vec::new(),
            accessors: Vec::new(),
        }
    }

    pub fn class_id(&self) -> &str {
        &self.class_id
    }

    /// Fields in ascending index order.
    pub fn fields(&self) -> &[StateField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&StateField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn field_by_index(&self, index: u32) -> Option<&StateField> {
        self.fields
            .binary_search_by_key(&index, |f| f.index)
            .ok()
            .map(|pos| &self.fields[pos])
    }

    pub fn method(&self, name: &str) -> Option<&MethodSignature> {
        self.methods.get(name)
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodSignature> {
        self.methods.values()
    }

    pub fn accessor(&self, name: &str) -> Option<&AccessorSpec> {
        self.accessors.get(name)
    }

    pub fn accessors(&self) -> impl Iterator<Item = &AccessorSpec> {
        self.accessors.values()
    }
}

/// Collects declarations and validates them into a [`ClassSchema`].
#[derive(Debug)]
pub struct ClassSchemaBuilder {
    class_id: String,
    fields: Vec<StateField>,
    methods: Vec<MethodSignature>,
    accessors: Vec<AccessorSpec>,
}

impl ClassSchemaBuilder {
    pub fn field(mut self, field: StateField) -> Self {
        self.fields.push(field);
        self
    }

    pub fn method(mut self, signature: MethodSignature) -> Self {
        self.methods.push(signature);
        self
    }

    pub fn read_accessor(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.accessors.push(AccessorSpec {
            name: name.into(),
            field: field.into(),
            kind: AccessorKind::Read,
        });
        self
    }

    pub fn write_accessor(mut self, name: impl Into<String>, field: impl Into<String>) -> Self {
        self.accessors.push(AccessorSpec {
            name: name.into(),
            field: field.into(),
            kind: AccessorKind::Write,
        });
        self
    }

    pub fn build(self) -> Result<ClassSchema, SchemaError> {
        let class = self.class_id;
        let mut names = BTreeSet::new();
        let mut claim = |name: &str| -> Result<(), SchemaError> {
            if names.insert(name.to_string()) {
                Ok(())
            } else {
                Err(SchemaError::DuplicateName {
                    class: class.clone(),
                    name: name.to_string(),
                })
            }
        };

        let mut indices = BTreeSet::new();
        for field in &self.fields {
            claim(&field.name)?;
            if !indices.insert(field.index) {
                return Err(SchemaError::DuplicateIndex {
                    class: class.clone(),
                    index: field.index,
                });
            }
            if !field.descriptor.accepts(&field.default) {
                return Err(if field.default.is_null() {
                    SchemaError::MissingDefault {
                        class: class.clone(),
                        field: field.name.clone(),
                    }
                } else {
                    SchemaError::InvalidDefault {
                        class: class.clone(),
                        field: field.name.clone(),
                        expected: field.descriptor.kind_name(),
                    }
                });
            }
        }

        let mut methods = BTreeMap::new();
        for method in self.methods {
            claim(&method.name)?;
            method.validate(&class)?;
            methods.insert(method.name.clone(), method);
        }

        let mut accessors = BTreeMap::new();
        for accessor in self.accessors {
            claim(&accessor.name)?;
            if !self.fields.iter().any(|f| f.name == accessor.field) {
                return Err(SchemaError::UnknownField {
                    class: class.clone(),
                    accessor: accessor.name.clone(),
                    field: accessor.field.clone(),
                });
            }
            accessors.insert(accessor.name.clone(), accessor);
        }

        let mut fields = self.fields;
        fields.sort_by_key(|f| f.index);
        Ok(ClassSchema {
            class_id: class,
            fields,
            methods,
            accessors,
        })
    }
}

/// Every known class schema, keyed by class id.
#[derive(Debug, Default)]
pub struct Registry {
    classes: BTreeMap<String, Arc<ClassSchema>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, schema: ClassSchema) -> Result<Arc<ClassSchema>, SchemaError> {
        if self.classes.contains_key(schema.class_id()) {
            return Err(SchemaError::DuplicateClass(schema.class_id().to_string()));
        }
        let schema = Arc::new(schema);
        self.classes
            .insert(schema.class_id().to_string(), Arc::clone(&schema));
        Ok(schema)
    }

    pub fn get(&self, class_id: &str) -> Option<Arc<ClassSchema>> {
        self.classes.get(class_id).cloned()
    }

    pub fn schema(&self, class_id: &str) -> Result<Arc<ClassSchema>, SchemaError> {
        self.get(class_id)
            .ok_or_else(|| SchemaError::UnknownClass(class_id.to_string()))
    }

    pub fn contains(&self, class_id: &str) -> bool {
        self.classes.contains_key(class_id)
    }

    pub fn class_ids(&self) -> impl Iterator<Item = &str> {
        self.classes.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}
