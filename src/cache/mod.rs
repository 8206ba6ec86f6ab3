// # Shared Cache
//
// A process-wide, thread-safe cache of previously-fetched objects, indexed
// three ways: by object ID, by binding name, and by object identity (value
// equality of the deserialized object). Populated by transaction commits
// and, optionally, by cross-transaction reads that miss through to the
// backing store. Bounded in size with approximate-LRU eviction; entries
// currently referenced by an in-flight transaction are pinned and cannot
// be evicted.
//
// Every operation is atomic with respect to the three indices: a `put`
// updates id-, name-, and value-indices as one observable step. This
// implementation uses a single coarse `parking_lot::Mutex` rather than
// striped locking; the contract is the atomicity, not the mechanism.

mod shared_cache;

pub use shared_cache::SharedCache;
