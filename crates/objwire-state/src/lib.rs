//! Per-field object state.
//!
//! Every declared field moves through [`FieldPhase`]s:
//! `Unloaded -> Clean -> Dirty -> Flushed`. Reads are lazy and cached,
//! writes are validated and staged without I/O, and a flush writes all
//! dirty fields of one object as a single batch.
//!
//! - [`ObjectState`]: cached values plus the dirty set of one object
//! - [`StateDescriptor`]: get/set/invalidate for one declared field
//! - [`LiveObject`]: a resident object: identity, schema, state
//! - [`Field`]: typed handle to one named field

pub mod descriptor;
pub mod error;
pub mod field;
pub mod live;
pub mod object_state;

pub use descriptor::StateDescriptor;
pub use error::{StateError, StateResult};
pub use field::Field;
pub use live::LiveObject;
pub use object_state::{FieldPhase, ObjectState};
