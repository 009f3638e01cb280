//! Storage collaborator for objwire.
//!
//! Object state is persisted as a map from small field index to the raw
//! bytes the codec produced for that field. The store never interprets
//! those bytes.
//!
//! # Storage Backends
//!
//! All backends implement the [`StateStore`] trait:
//!
//! - [`InMemoryStateStore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. `set_all` is atomic per object: readers see all of a batch or none of it.
//! 2. Writes merge into existing slots; indices not in the batch are untouched.
//! 3. Backend failures are propagated, never silently ignored.

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::InMemoryStateStore;
pub use traits::StateStore;
