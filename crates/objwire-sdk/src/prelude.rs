//! Everything needed to declare a service and work with its objects.

pub use crate::{ObjWire, SdkError, SdkResult};
pub use objwire_invoke::{ApplicationError, Arguments, CallMeta, MethodCaller, ServiceDefinition};
pub use objwire_proxy::ReferenceProxy;
pub use objwire_session::{CommitReport, ObjectHandle, Session, SessionConfig, SessionResult};
pub use objwire_state::{Field, LiveObject};
pub use objwire_types::{
    Categorized, FromValue, HasIdentity, IntoValue, ObjectIdentity, ParamSpec, StateField,
    TypeDescriptor, Value,
};
