//! High-level SDK for objwire.
//!
//! [`ObjWire`] wires class schemas, storage, the identity registry, the
//! session manager, and inbound dispatch into one handle. This is the main
//! entry point for applications embedding objwire.

pub mod error;
pub mod objwire;
pub mod prelude;

pub use error::{SdkError, SdkResult};
pub use objwire::{ObjWire, ObjWireBuilder};

// Re-export key types
pub use objwire_codec::TypeCodec;
pub use objwire_invoke::{ApplicationError, Arguments, CallMeta, MethodCaller, ServiceDefinition};
pub use objwire_proxy::{IdentityLike, ReferenceProxy, Transport, TransportError};
pub use objwire_session::{CommitReport, ObjectHandle, Session, SessionConfig, SessionHandle};
pub use objwire_state::{Field, FieldPhase, LiveObject};
pub use objwire_store::{InMemoryStateStore, StateStore};
pub use objwire_types::{
    ErrorCategory, ErrorReport, InvocationEnvelope, InvocationResponse, ObjectIdentity,
    ResponseStatus, TypeDescriptor, ValidationError, Value, MAX_OBJECT_ID,
};
