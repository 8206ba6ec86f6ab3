// # Common Types
//
// Shared identifiers and the cache-entry data model used by both the
// Shared Cache and the Transaction Context. Kept deliberately small: this
// crate has one data model, not a schema system.

/// Unique identifier for a transaction, allocated by the `Store` when a
/// `TransactionContext` is created. Never reused within a process lifetime.
pub type TransactionId = u64;

/// Opaque 64-bit object identifier. `ABSENT_ID` (`-1`) means "no such
/// object"; all allocated IDs are `>= 0` and are never reused within a
/// process lifetime.
pub type ObjectId = i64;

/// Sentinel returned by `lookup`/`lookup_object` when no binding exists.
pub const ABSENT_ID: ObjectId = -1;

/// A global directory entry name, unique among live objects.
pub type BindingName = String;

/// Describes the pending intent a transaction holds against a cache entry.
///
/// An entry in the Shared Cache always carries `None`: pending intents are
/// only meaningful within the private cache of the transaction that created
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    None,
    Lock,
    Create,
    Destroy,
}

/// An in-memory record tracked by both the private cache and the Shared
/// Cache.
///
/// `CREATE` entries carry both `name` and `payload`; `DESTROY` entries need
/// only `id` and may have `payload: None`.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub id: ObjectId,
    pub name: Option<BindingName>,
    pub payload: Option<V>,
    pub update_mode: UpdateMode,
}

impl<V> CacheEntry<V> {
    pub fn new(id: ObjectId, name: Option<BindingName>, payload: Option<V>, update_mode: UpdateMode) -> Self {
        Self { id, name, payload, update_mode }
    }
}
