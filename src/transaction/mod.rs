// # Transaction Management
//
// One `TransactionContext` per in-flight transaction. Holds a private
// cache tier, a pending-update set, and the set of locks acquired through
// the shared `LockManager`, mediating every read and write issued by
// application code against the Shared Cache and the backing store.
//
// | Module | Responsibility |
// |--------|----------------|
// | [`lock_manager`] | Exclusive per-Object-ID locking, deadlock detection |
// | [`backing`] | Backing-store capability trait and an in-memory reference implementation |
// | [`context`] | `TransactionContext`: state machine, pending-update replay, commit/abort |

pub mod backing;
pub mod context;
pub mod lock_manager;

pub use backing::BackingStore;
pub use context::{TransactionContext, TransactionState};
pub use lock_manager::{DeadlockPolicy, LockManager};
