// # Store Façade
//
// The programmatic surface callers construct once per process: given a
// backing store factory and a `StoreConfig`, produces the shared
// collaborators (Shared Cache, Lock Manager, Object ID allocator) and lets
// callers derive a `TransactionContext` per logical transaction. No
// implicit singletons — the Shared Cache and Lock Manager are owned by
// this struct and torn down with it.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::cache::SharedCache;
use crate::error::{Error, Result};
use crate::transaction::backing::{BackingStore, BackingStoreFactory};
use crate::transaction::lock_manager::{DeadlockPolicy, LockManager};
use crate::transaction::TransactionContext;

/// Recognized configuration, matching `SPEC_FULL.md` §6.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Maximum entries in the Shared Cache. `0` disables the cache.
    pub cache_capacity: usize,
    /// Cycle-resolution rule for the Lock Manager.
    pub deadlock_policy: DeadlockPolicy,
    /// Maximum wait before deadlock victimization by timeout, in
    /// milliseconds. `0` means infinite (no timeout-based victimization).
    pub acquire_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self { cache_capacity: 10_000, deadlock_policy: DeadlockPolicy::default(), acquire_timeout_ms: 0 }
    }
}

impl StoreConfig {
    /// Reads `OBJSTORE_CACHE_CAPACITY`, `OBJSTORE_DEADLOCK_POLICY`, and
    /// `OBJSTORE_LOCK_TIMEOUT_MS`, falling back to defaults for anything
    /// unset. A value that is set but malformed is a configuration error,
    /// not a silently-ignored one.
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();
        if let Ok(raw) = std::env::var("OBJSTORE_CACHE_CAPACITY") {
            cfg.cache_capacity = raw
                .parse()
                .map_err(|_| Error::InvalidState(format!("OBJSTORE_CACHE_CAPACITY must be a non-negative integer, got '{raw}'")))?;
        }
        if let Ok(raw) = std::env::var("OBJSTORE_DEADLOCK_POLICY") {
            cfg.deadlock_policy = match raw.as_str() {
                "requester_victim" => DeadlockPolicy::RequesterVictim,
                "deterministic_victim" => DeadlockPolicy::DeterministicVictim,
                other => return Err(Error::InvalidState(format!("unknown lock.deadlock_policy '{other}'"))),
            };
        }
        if let Ok(raw) = std::env::var("OBJSTORE_LOCK_TIMEOUT_MS") {
            cfg.acquire_timeout_ms = raw
                .parse()
                .map_err(|_| Error::InvalidState(format!("OBJSTORE_LOCK_TIMEOUT_MS must be a non-negative integer, got '{raw}'")))?;
        }
        Ok(cfg)
    }
}

/// Owns the Shared Cache, Lock Manager, and Object ID allocator for one
/// process. `begin()` derives a fresh `TransactionContext` backed by a new
/// per-transaction handle from the configured `BackingStoreFactory`.
pub struct Store<F: BackingStoreFactory> {
    factory: F,
    shared_cache: Arc<SharedCache<<F::Store as BackingStore>::Value>>,
    lock_manager: Arc<LockManager>,
    id_allocator: Arc<AtomicI64>,
    next_txn_id: AtomicU64,
}

impl<F: BackingStoreFactory> Store<F> {
    pub fn new(factory: F, config: StoreConfig) -> Self {
        info!(cache_capacity = config.cache_capacity, deadlock_policy = ?config.deadlock_policy, "store constructed");
        Self {
            factory,
            shared_cache: Arc::new(SharedCache::new(config.cache_capacity)),
            lock_manager: Arc::new(LockManager::new(config.deadlock_policy, config.acquire_timeout_ms)),
            id_allocator: Arc::new(AtomicI64::new(0)),
            next_txn_id: AtomicU64::new(1),
        }
    }

    pub fn begin(&self) -> TransactionContext<F::Store> {
        let id = self.next_txn_id.fetch_add(1, Ordering::SeqCst);
        let backing = self.factory.new_transaction_store();
        info!(txn = id, "transaction begin");
        TransactionContext::new(id, backing, self.shared_cache.clone(), self.lock_manager.clone(), self.id_allocator.clone())
    }

    pub fn shared_cache_len(&self) -> usize {
        self.shared_cache.len()
    }
}
