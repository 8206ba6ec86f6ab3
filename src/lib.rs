// Transactional object-store caching layer: per-transaction read/write
// buffering over a process-global Shared Cache, backed by a pessimistic
// Lock Manager with deadlock avoidance and a pluggable Backing Store
// Adapter.

pub mod cache;
pub mod common;
pub mod error;
pub mod store;
pub mod transaction;

pub use cache::SharedCache;
pub use common::{BindingName, CacheEntry, ObjectId, TransactionId, UpdateMode, ABSENT_ID};
pub use error::{Error, Result};
pub use store::{Store, StoreConfig};
pub use transaction::{BackingStore, DeadlockPolicy, TransactionContext, TransactionState};
