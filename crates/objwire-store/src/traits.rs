use std::collections::BTreeMap;

use objwire_types::ObjectIdentity;

use crate::error::StoreResult;

/// Per-object indexed state storage.
///
/// Implementations must satisfy these invariants:
/// - `set_all` applies its whole batch atomically for one object.
/// - Indices absent from a batch keep their previous bytes.
/// - `get` of a never-written index returns `Ok(None)`.
pub trait StateStore: Send + Sync {
    /// Read the raw bytes of one field.
    fn get(&self, identity: &ObjectIdentity, index: u32) -> StoreResult<Option<Vec<u8>>>;

    /// Write a batch of fields for one object.
    fn set_all(&self, identity: &ObjectIdentity, fields: &BTreeMap<u32, Vec<u8>>)
        -> StoreResult<()>;

    /// Remove every field of an object. Returns `true` if anything existed.
    fn delete(&self, identity: &ObjectIdentity) -> StoreResult<bool>;

    /// Read several fields of one object.
    ///
    /// Default implementation calls `get()` for each index. Backends may
    /// override to fetch in one round-trip. Missing indices are omitted.
    fn get_all(
        &self,
        identity: &ObjectIdentity,
        indices: &[u32],
    ) -> StoreResult<BTreeMap<u32, Vec<u8>>> {
        let mut out = BTreeMap::new();
        for &index in indices {
            if let Some(bytes) = self.get(identity, index)? {
                out.insert(index, bytes);
            }
        }
        Ok(out)
    }
}
