//! Foundation types for objwire.
//!
//! This crate holds the shared type taxonomy and identity model that every
//! other objwire crate builds on. It has no I/O and no async code.
//!
//! # Key Types
//!
//! - [`ObjectIdentity`]: `(class_id, partition_id, object_id)` naming one object
//! - [`TypeDescriptor`]: resolved shape of a field, parameter, or return value
//! - [`Value`]: dynamically typed in-process value
//! - [`ClassSchema`] / [`Registry`]: per-class member tables
//! - [`InvocationEnvelope`] / [`InvocationResponse`]: call containers
//! - [`ErrorReport`]: normalized `{status, message, details}` failure shape

pub mod convert;
pub mod descriptor;
pub mod envelope;
pub mod error;
pub mod identity;
pub mod schema;
pub mod value;

pub use convert::{Bytes, FromValue, IntoValue};
pub use descriptor::{PrimitiveKind, StructField, TemporalKind, TypeDescriptor};
pub use envelope::{InvocationEnvelope, InvocationResponse, ResponseStatus};
pub use error::{Categorized, ErrorCategory, ErrorReport, SchemaError, ValidationError};
pub use identity::{HasIdentity, ObjectIdentity, MAX_OBJECT_ID};
pub use schema::{
    AccessorKind, AccessorSpec, CallShape, ClassSchema, ClassSchemaBuilder, FieldBinding,
    MethodSignature, ParamSpec, Registry, StateField,
};
pub use value::Value;
