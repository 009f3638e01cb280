//! Identity normalization and reference proxies.
//!
//! [`IdentityRegistry`] reduces any identity-like input (a resident object,
//! a proxy, a record, a tuple, or a dynamic value) to an
//! [`ObjectIdentity`](objwire_types::ObjectIdentity), and materializes
//! [`ReferenceProxy`] handles from identities without touching storage.
//!
//! A proxy forwards method calls through a [`Transport`] and serves
//! accessors straight from the [`StateStore`](objwire_store::StateStore).

pub mod error;
pub mod proxy;
pub mod registry;
pub mod transport;

pub use error::{ProxyError, ProxyResult};
pub use proxy::{encode_call, ReferenceProxy};
pub use registry::{IdentityLike, IdentityRegistry, DEFAULT_CALL_TIMEOUT};
pub use transport::{NoTransport, Transport, TransportError};
