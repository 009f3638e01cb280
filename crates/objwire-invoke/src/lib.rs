//! Invocation marshalling.
//!
//! A [`MethodCaller`] is built once per declared method. Per call it
//! decodes the envelope payload against the declared parameters, runs the
//! method body against a [`LiveObject`](objwire_state::LiveObject), and
//! encodes the result. Argument problems are rejected before the body
//! runs; every failure leaves as a structured
//! [`InvocationResponse`](objwire_types::InvocationResponse).

pub mod args;
pub mod caller;
pub mod error;
pub mod service;

pub use args::{Arguments, CallMeta};
pub use caller::MethodCaller;
pub use error::{ApplicationError, InvokeError, InvokeResult};
pub use service::{ServiceBuilder, ServiceCatalog, ServiceDefinition};
