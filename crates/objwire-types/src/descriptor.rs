use std::fmt;

use crate::value::Value;

/// Scalar kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveKind {
    Int,
    Float,
    Bool,
    Str,
    Bytes,
}

/// Time and identifier kinds with a canonical text form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemporalKind {
    DateTime,
    Uuid,
}

/// One named member of a structured descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct StructField {
    pub name: String,
    pub descriptor: TypeDescriptor,
    pub default: Option<Value>,
}

impl StructField {
    pub fn new(name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        Self {
            name: name.into(),
            descriptor,
            default: None,
        }
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Whether the member may be left out of a value.
    pub fn is_required(&self) -> bool {
        self.default.is_none() && !self.descriptor.is_nullable()
    }
}

/// A resolved type shape for a field, parameter, or return value.
///
/// Descriptors are built once when a class is declared and shared from
/// then on; the codec dispatches on them for every encode, decode, and
/// convert.
#[derive(Debug, Clone, PartialEq)]
pub enum TypeDescriptor {
    Primitive(PrimitiveKind),
    Optional(Box<TypeDescriptor>),
    Union(Vec<TypeDescriptor>),
    List(Box<TypeDescriptor>),
    Map(Box<TypeDescriptor>, Box<TypeDescriptor>),
    Set(Box<TypeDescriptor>),
    Tuple(Vec<TypeDescriptor>),
    Temporal(TemporalKind),
    Structured {
        name: String,
        fields: Vec<StructField>,
    },
    /// An identity-only handle to an object of `class`.
    Reference(String),
    /// A string restricted to a fixed set of variants.
    Enum {
        name: String,
        variants: Vec<String>,
    },
    /// Untyped JSON-like data.
    Any,
}

impl TypeDescriptor {
    pub fn int() -> Self {
        Self::Primitive(PrimitiveKind::Int)
    }

    pub fn float() -> Self {
        Self::Primitive(PrimitiveKind::Float)
    }

    pub fn boolean() -> Self {
        Self::Primitive(PrimitiveKind::Bool)
    }

    pub fn string() -> Self {
        Self::Primitive(PrimitiveKind::Str)
    }

    pub fn bytes() -> Self {
        Self::Primitive(PrimitiveKind::Bytes)
    }

    pub fn datetime() -> Self {
        Self::Temporal(TemporalKind::DateTime)
    }

    pub fn uuid() -> Self {
        Self::Temporal(TemporalKind::Uuid)
    }

    pub fn optional(inner: TypeDescriptor) -> Self {
        Self::Optional(Box::new(inner))
    }

    pub fn union(alternatives: Vec<TypeDescriptor>) -> Self {
        Self::Union(alternatives)
    }

    pub fn list(element: TypeDescriptor) -> Self {
        Self::List(Box::new(element))
    }

    pub fn set(element: TypeDescriptor) -> Self {
        Self::Set(Box::new(element))
    }

    pub fn map(key: TypeDescriptor, value: TypeDescriptor) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    pub fn tuple(elements: Vec<TypeDescriptor>) -> Self {
        Self::Tuple(elements)
    }

    pub fn structured(name: impl Into<String>, fields: Vec<StructField>) -> Self {
        Self::Structured {
            name: name.into(),
            fields,
        }
    }

    pub fn reference(class_id: impl Into<String>) -> Self {
        Self::Reference(class_id.into())
    }

    pub fn enumeration<I, S>(name: impl Into<String>, variants: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enum {
            name: name.into(),
            variants: variants.into_iter().map(Into::into).collect(),
        }
    }

    /// Human-readable rendering used in error messages.
    pub fn kind_name(&self) -> String {
        self.to_string()
    }

    /// Whether "no value" is a legal value of this type.
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Optional(_) | Self::Any => true,
            Self::Union(alternatives) => alternatives.iter().any(Self::is_nullable),
            _ => false,
        }
    }

    /// Whether values of this type can contain object references.
    pub fn is_reference_like(&self) -> bool {
        match self {
            Self::Reference(_) => true,
            Self::Optional(inner) | Self::List(inner) | Self::Set(inner) => {
                inner.is_reference_like()
            }
            Self::Map(key, value) => key.is_reference_like() || value.is_reference_like(),
            Self::Union(items) | Self::Tuple(items) => items.iter().any(Self::is_reference_like),
            Self::Structured { fields, .. } => {
                fields.iter().any(|f| f.descriptor.is_reference_like())
            }
            _ => false,
        }
    }

    /// The target class of a (possibly optional) reference.
    pub fn referenced_class(&self) -> Option<&str> {
        match self {
            Self::Reference(class_id) => Some(class_id),
            Self::Optional(inner) => inner.referenced_class(),
            _ => None,
        }
    }

    /// The value a field of this type starts with when no default is
    /// declared, if the type has a natural one.
    pub fn zero_value(&self) -> Option<Value> {
        match self {
            Self::Primitive(PrimitiveKind::Int) => Some(Value::Int(0)),
            Self::Primitive(PrimitiveKind::Float) => Some(Value::Float(0.0)),
            Self::Primitive(PrimitiveKind::Bool) => Some(Value::Bool(false)),
            Self::Primitive(PrimitiveKind::Str) => Some(Value::Str(String::new())),
            Self::Primitive(PrimitiveKind::Bytes) => Some(Value::Bytes(Vec::new())),
            Self::Optional(_) | Self::Any => Some(Value::Null),
            Self::Union(alternatives) => alternatives.iter().find_map(Self::zero_value),
            Self::List(_) => Some(Value::List(Vec::new())),
            Self::Set(_) => Some(Value::Set(Vec::new())),
            Self::Map(_, _) => Some(Value::Map(Vec::new())),
            Self::Tuple(elements) => elements
                .iter()
                .map(Self::zero_value)
                .collect::<Option<Vec<_>>>()
                .map(Value::Tuple),
            Self::Structured { fields, .. } => {
                let mut out = std::collections::BTreeMap::new();
                for field in fields {
                    let value = match &field.default {
                        Some(default) => default.clone(),
                        None => field.descriptor.zero_value()?,
                    };
                    out.insert(field.name.clone(), value);
                }
                Some(Value::Struct(out))
            }
            Self::Enum { variants, .. } => variants.first().cloned().map(Value::Str),
            Self::Temporal(_) | Self::Reference(_) => None,
        }
    }

    /// Strict structural check: does `value` already have this shape?
    ///
    /// No coercion is attempted; see the codec's `convert` for that.
    pub fn accepts(&self, value: &Value) -> bool {
        match (self, value) {
            (Self::Primitive(PrimitiveKind::Int), Value::Int(_))
            | (Self::Primitive(PrimitiveKind::Bool), Value::Bool(_))
            | (Self::Primitive(PrimitiveKind::Str), Value::Str(_))
            | (Self::Primitive(PrimitiveKind::Bytes), Value::Bytes(_))
            | (Self::Temporal(TemporalKind::DateTime), Value::DateTime(_))
            | (Self::Temporal(TemporalKind::Uuid), Value::Uuid(_)) => true,
            (Self::Primitive(PrimitiveKind::Float), Value::Float(f)) => f.is_finite(),
            (Self::Optional(_), Value::Null) => true,
            (Self::Optional(inner), v) => inner.accepts(v),
            (Self::Union(alternatives), v) => alternatives.iter().any(|alt| alt.accepts(v)),
            (Self::List(element), Value::List(items)) | (Self::Set(element), Value::Set(items)) => {
                items.iter().all(|item| element.accepts(item))
            }
            (Self::Tuple(elements), Value::Tuple(items)) => {
                elements.len() == items.len()
                    && elements.iter().zip(items).all(|(d, v)| d.accepts(v))
            }
            (Self::Map(key, val), Value::Map(entries)) => entries
                .iter()
                .all(|(k, v)| key.accepts(k) && val.accepts(v)),
            (Self::Structured { fields, .. }, Value::Struct(values)) => {
                values
                    .keys()
                    .all(|name| fields.iter().any(|f| &f.name == name))
                    && fields.iter().all(|f| match values.get(&f.name) {
                        Some(v) => f.descriptor.accepts(v),
                        None => !f.is_required(),
                    })
            }
            (Self::Reference(class_id), Value::Ref(identity)) => &identity.class_id == class_id,
            (Self::Enum { variants, .. }, Value::Str(s)) => variants.iter().any(|v| v == s),
            (Self::Any, v) => accepts_any(v),
            _ => false,
        }
    }
}

fn accepts_any(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Int(_) | Value::Str(_) => true,
        Value::Float(f) => f.is_finite(),
        Value::List(items) => items.iter().all(accepts_any),
        Value::Struct(fields) => fields.values().all(accepts_any),
        _ => false,
    }
}

fn join(f: &mut fmt::Formatter<'_>, items: &[TypeDescriptor]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(PrimitiveKind::Int) => f.write_str("int"),
            Self::Primitive(PrimitiveKind::Float) => f.write_str("float"),
            Self::Primitive(PrimitiveKind::Bool) => f.write_str("bool"),
            Self::Primitive(PrimitiveKind::Str) => f.write_str("str"),
            Self::Primitive(PrimitiveKind::Bytes) => f.write_str("bytes"),
            Self::Temporal(TemporalKind::DateTime) => f.write_str("datetime"),
            Self::Temporal(TemporalKind::Uuid) => f.write_str("uuid"),
            Self::Optional(inner) => write!(f, "Optional[{inner}]"),
            Self::Union(alternatives) => {
                f.write_str("Union[")?;
                join(f, alternatives)?;
                f.write_str("]")
            }
            Self::List(element) => write!(f, "List[{element}]"),
            Self::Set(element) => write!(f, "Set[{element}]"),
            Self::Map(key, value) => write!(f, "Map[{key}, {value}]"),
            Self::Tuple(elements) => {
                f.write_str("Tuple[")?;
                join(f, elements)?;
                f.write_str("]")
            }
            Self::Structured { name, .. } => f.write_str(name),
            Self::Reference(class_id) => write!(f, "Ref[{class_id}]"),
            Self::Enum { name, .. } => write!(f, "Enum[{name}]"),
            Self::Any => f.write_str("any"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ObjectIdentity;

    fn address() -> TypeDescriptor {
        TypeDescriptor::structured(
            "Address",
            vec![
                StructField::new("street", TypeDescriptor::string()),
                StructField::new("zip", TypeDescriptor::optional(TypeDescriptor::string())),
                StructField::new("floor", TypeDescriptor::int()).with_default(Value::Int(1)),
            ],
        )
    }

    #[test]
    fn display_nested() {
        let d = TypeDescriptor::optional(TypeDescriptor::list(TypeDescriptor::int()));
        assert_eq!(d.to_string(), "Optional[List[int]]");
        let d = TypeDescriptor::map(TypeDescriptor::string(), TypeDescriptor::reference("Profile"));
        assert_eq!(d.kind_name(), "Map[str, Ref[Profile]]");
    }

    #[test]
    fn zero_values() {
        assert_eq!(TypeDescriptor::int().zero_value(), Some(Value::Int(0)));
        assert_eq!(
            TypeDescriptor::optional(TypeDescriptor::reference("P")).zero_value(),
            Some(Value::Null)
        );
        assert_eq!(TypeDescriptor::reference("P").zero_value(), None);
        assert_eq!(TypeDescriptor::datetime().zero_value(), None);
        let zero = address().zero_value().unwrap();
        assert_eq!(zero.field("floor"), Some(&Value::Int(1)));
        assert_eq!(zero.field("zip"), Some(&Value::Null));
    }

    #[test]
    fn accepts_is_strict() {
        assert!(TypeDescriptor::int().accepts(&Value::Int(1)));
        assert!(!TypeDescriptor::int().accepts(&Value::Str("1".into())));
        assert!(!TypeDescriptor::float().accepts(&Value::Int(1)));
        assert!(!TypeDescriptor::float().accepts(&Value::Float(f64::NAN)));
        assert!(TypeDescriptor::optional(TypeDescriptor::int()).accepts(&Value::Null));
    }

    #[test]
    fn accepts_structured_with_missing_optional() {
        let v = Value::record([("street", Value::from("Main"))]);
        assert!(address().accepts(&v));
        let v = Value::record([("zip", Value::from("12345"))]);
        assert!(!address().accepts(&v));
        let v = Value::record([("street", Value::from("Main")), ("extra", Value::Int(1))]);
        assert!(!address().accepts(&v));
    }

    #[test]
    fn accepts_reference_checks_class() {
        let d = TypeDescriptor::reference("Profile");
        assert!(d.accepts(&Value::Ref(ObjectIdentity::new("Profile", 0, 1))));
        assert!(!d.accepts(&Value::Ref(ObjectIdentity::new("Order", 0, 1))));
    }

    #[test]
    fn reference_like_detection() {
        assert!(TypeDescriptor::list(TypeDescriptor::reference("A")).is_reference_like());
        assert!(!TypeDescriptor::list(TypeDescriptor::int()).is_reference_like());
        assert_eq!(
            TypeDescriptor::optional(TypeDescriptor::reference("A")).referenced_class(),
            Some("A")
        );
    }

    #[test]
    fn enum_accepts_declared_variants() {
        let d = TypeDescriptor::enumeration("Color", ["red", "green"]);
        assert!(d.accepts(&Value::from("red")));
        assert!(!d.accepts(&Value::from("blue")));
        assert_eq!(d.zero_value(), Some(Value::from("red")));
    }
}
