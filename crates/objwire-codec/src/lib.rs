//! Type codec for objwire.
//!
//! [`TypeCodec`] converts between in-process [`Value`](objwire_types::Value)s
//! and their JSON byte form, driven by a
//! [`TypeDescriptor`](objwire_types::TypeDescriptor). The same codec is
//! used for persisted state fields and for call arguments and results.
//!
//! - `encode` checks the value's shape strictly and writes bytes.
//! - `decode` reads bytes and validates them against the descriptor.
//! - `convert` coerces loosely typed input without touching bytes.
//!
//! Reference-typed values only ever carry the target's identity.
//!
//! Method arguments use the same rules; see [`args`] for the payload
//! layout of single and variadic calls.

pub mod args;
pub mod codec;
mod convert;
pub mod error;
mod path;

pub use codec::TypeCodec;
pub use error::{CodecError, CodecResult};
