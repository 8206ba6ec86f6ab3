// # Transaction Context
//
// One per in-flight transaction: a private cache tier, a pending-update
// set, the set of locks acquired through the shared `LockManager`, and a
// one-way state machine (`Active` -> `Committing` -> `Committed`, or
// `Active` -> `Aborting` -> `Aborted`).
//
// Reads consult the private cache first (read-your-writes), then the
// Shared Cache, then the backing store. Writes acquire a lock before any
// cache lookup intended for mutation, so the fetched value is guaranteed
// current. Commit replays the pending-update set against the backing
// store, promotes clean entries into the Shared Cache once the backing
// store has durably accepted them, and releases every held lock.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::cache::SharedCache;
use crate::common::{BindingName, CacheEntry, ObjectId, TransactionId, UpdateMode, ABSENT_ID};
use crate::error::{Error, Result};
use crate::transaction::backing::BackingStore;
use crate::transaction::lock_manager::LockManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committing,
    Committed,
    Aborting,
    Aborted,
}

pub struct TransactionContext<B: BackingStore> {
    id: TransactionId,
    backing: B,
    shared_cache: Arc<SharedCache<B::Value>>,
    lock_manager: Arc<LockManager>,
    id_allocator: Arc<AtomicI64>,
    private: HashMap<ObjectId, CacheEntry<B::Value>>,
    private_names: HashMap<BindingName, ObjectId>,
    /// Insertion order is irrelevant to the contract (§3); kept as a `Vec`
    /// purely so commit replay is deterministic and easy to reason about.
    pending: Vec<ObjectId>,
    held_locks: HashSet<ObjectId>,
    /// IDs this transaction has pinned in the Shared Cache; unpinned as a
    /// set on commit, abort, or drop.
    pinned: HashSet<ObjectId>,
    state: TransactionState,
}

impl<B: BackingStore> TransactionContext<B> {
    pub(crate) fn new(
        id: TransactionId,
        backing: B,
        shared_cache: Arc<SharedCache<B::Value>>,
        lock_manager: Arc<LockManager>,
        id_allocator: Arc<AtomicI64>,
    ) -> Self {
        Self {
            id,
            backing,
            shared_cache,
            lock_manager,
            id_allocator,
            private: HashMap::new(),
            private_names: HashMap::new(),
            pending: Vec::new(),
            held_locks: HashSet::new(),
            pinned: HashSet::new(),
            state: TransactionState::Active,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state == TransactionState::Active {
            Ok(())
        } else {
            Err(Error::InvalidState(format!("transaction {} is {:?}, not active", self.id, self.state)))
        }
    }

    fn mark_pending(&mut self, id: ObjectId) {
        if !self.pending.contains(&id) {
            self.pending.push(id);
        }
    }

    /// No lock taken: the ID is freshly allocated and no other transaction
    /// can observe it before commit.
    pub fn create(&mut self, value: B::Value, name: impl Into<String>) -> Result<ObjectId> {
        self.ensure_active()?;
        let name = name.into();
        let id = self.id_allocator.fetch_add(1, Ordering::SeqCst);
        self.private.insert(id, CacheEntry::new(id, Some(name.clone()), Some(value), UpdateMode::Create));
        self.private_names.insert(name, id);
        self.mark_pending(id);
        debug!(txn = self.id, object_id = id, "create");
        Ok(id)
    }

    /// Permitted even for an ID never read in this transaction: destroying
    /// a detached handle requires no lock.
    pub fn destroy(&mut self, id: ObjectId) -> Result<()> {
        self.ensure_active()?;
        match self.private.get_mut(&id) {
            Some(entry) => entry.update_mode = UpdateMode::Destroy,
            None => {
                self.private.insert(id, CacheEntry::new(id, None, None, UpdateMode::Destroy));
            }
        }
        self.mark_pending(id);
        debug!(txn = self.id, object_id = id, "destroy");
        Ok(())
    }

    pub fn peek(&mut self, id: ObjectId) -> Result<Option<B::Value>> {
        self.ensure_active()?;
        if let Some(entry) = self.private.get(&id) {
            if entry.update_mode == UpdateMode::Destroy {
                return Ok(None);
            }
            return Ok(entry.payload.clone());
        }
        if let Some(entry) = self.shared_cache.get_by_id(id) {
            self.shared_cache.pin(id);
            self.pinned.insert(id);
            self.private.insert(id, CacheEntry::new(id, entry.name.clone(), entry.payload.clone(), UpdateMode::None));
            debug!(txn = self.id, object_id = id, "peek: shared cache hit");
            return Ok(entry.payload);
        }
        match self.backing.peek(id)? {
            Some(value) => {
                self.shared_cache.pin(id);
                self.pinned.insert(id);
                self.shared_cache.put(id, None, value.clone());
                self.private.insert(id, CacheEntry::new(id, None, Some(value.clone()), UpdateMode::None));
                debug!(txn = self.id, object_id = id, "peek: backing store hit");
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Acquires the lock before any cache lookup intended for mutation, so
    /// the value fetched afterward is guaranteed current. Idempotent
    /// within a transaction: a second `lock(id)` returns the already-cached
    /// value without re-fetching.
    pub fn lock(&mut self, id: ObjectId) -> Result<B::Value> {
        self.ensure_active()?;
        if !self.held_locks.contains(&id) {
            self.lock_manager.acquire(self.id, id)?;
            self.held_locks.insert(id);
            debug!(txn = self.id, object_id = id, "lock acquired");
        }

        let existing = self.private.get_mut(&id).map(|entry| {
            let became_pending = entry.update_mode == UpdateMode::None;
            if became_pending {
                entry.update_mode = UpdateMode::Lock;
            }
            (entry.payload.clone(), became_pending)
        });
        if let Some((payload, became_pending)) = existing {
            if became_pending {
                self.mark_pending(id);
            }
            return payload.ok_or_else(|| Error::InvalidState(format!("object {id} has no cached payload to lock")));
        }

        let value = match self.shared_cache.get_by_id(id) {
            Some(entry) => {
                self.shared_cache.pin(id);
                self.pinned.insert(id);
                entry
                    .payload
                    .ok_or_else(|| Error::InvalidState(format!("object {id} has no cached payload in shared cache")))?
            }
            None => {
                let v = self.backing.lock(id)?;
                self.shared_cache.pin(id);
                self.pinned.insert(id);
                self.shared_cache.put(id, None, v.clone());
                v
            }
        };
        self.private.insert(id, CacheEntry::new(id, None, Some(value.clone()), UpdateMode::Lock));
        self.mark_pending(id);
        Ok(value)
    }

    pub fn lookup(&mut self, name: &str) -> Result<ObjectId> {
        self.ensure_active()?;
        if let Some(&id) = self.private_names.get(name) {
            return Ok(id);
        }
        let id = self.shared_cache.get_id_by_name(name);
        if id != ABSENT_ID {
            self.private_names.insert(name.to_string(), id);
            return Ok(id);
        }
        let id = self.backing.lookup(name)?;
        if id != ABSENT_ID {
            self.private_names.insert(name.to_string(), id);
        }
        Ok(id)
    }

    pub fn lookup_object(&mut self, value: &B::Value) -> Result<ObjectId> {
        self.ensure_active()?;
        for entry in self.private.values() {
            if entry.update_mode != UpdateMode::Destroy && entry.payload.as_ref() == Some(value) {
                return Ok(entry.id);
            }
        }
        let id = self.shared_cache.get_id_by_value(value);
        if id != ABSENT_ID {
            return Ok(id);
        }
        self.backing.lookup_object(value)
    }

    /// See `SPEC_FULL.md` §4.3 for the step order. Promotion to the Shared
    /// Cache happens only after the backing store's `commit` succeeds, so a
    /// failed commit never leaves a promoted-but-uncommitted entry visible
    /// to other transactions.
    pub fn commit(&mut self) -> Result<()> {
        self.ensure_active()?;
        self.state = TransactionState::Committing;

        for &id in &self.pending {
            let entry = self
                .private
                .get(&id)
                .ok_or_else(|| Error::InvalidState(format!("pending object {id} has no private entry")))?;
            match entry.update_mode {
                UpdateMode::Create => {
                    let name = entry
                        .name
                        .clone()
                        .ok_or_else(|| Error::InvalidState(format!("object {id} is pending CREATE but carries no name")))?;
                    let value = entry
                        .payload
                        .clone()
                        .ok_or_else(|| Error::InvalidState(format!("object {id} is pending CREATE but carries no payload")))?;
                    self.backing.create(id, value, &name)?;
                }
                UpdateMode::Destroy => self.backing.destroy(id)?,
                UpdateMode::Lock => {}
                UpdateMode::None => {
                    return Err(Error::InvalidState(format!("object {id} is pending with update mode NONE")));
                }
            }
        }

        if let Err(e) = self.backing.commit() {
            error!(txn = self.id, error = %e, "backing commit failed, aborting");
            self.state = TransactionState::Aborting;
            self.release_and_discard();
            self.state = TransactionState::Aborted;
            return Err(e);
        }

        for &id in &self.pending {
            let entry = self
                .private
                .get(&id)
                .ok_or_else(|| Error::InvalidState(format!("pending object {id} has no private entry")))?;
            match entry.update_mode {
                UpdateMode::Create | UpdateMode::Lock => {
                    let value = entry
                        .payload
                        .clone()
                        .ok_or_else(|| Error::InvalidState(format!("object {id} was promoted with no payload")))?;
                    self.shared_cache.put(id, entry.name.clone(), value);
                }
                UpdateMode::Destroy => self.shared_cache.evict(id),
                UpdateMode::None => {}
            }
        }

        self.lock_manager.release_all(self.id);
        self.unpin_all();
        self.state = TransactionState::Committed;
        info!(txn = self.id, entries = self.pending.len(), "transaction committed");
        Ok(())
    }

    /// Safe to call from any non-terminal state, and idempotent: calling
    /// `abort` on an already-terminal transaction is a no-op.
    pub fn abort(&mut self) -> Result<()> {
        if matches!(self.state, TransactionState::Committed | TransactionState::Aborted) {
            return Ok(());
        }
        self.state = TransactionState::Aborting;
        self.release_and_discard();
        if let Err(e) = self.backing.abort() {
            warn!(txn = self.id, error = %e, "backing store abort reported failure, proceeding anyway");
        }
        self.state = TransactionState::Aborted;
        info!(txn = self.id, "transaction aborted");
        Ok(())
    }

    fn release_and_discard(&mut self) {
        self.lock_manager.release_all(self.id);
        self.unpin_all();
        self.private.clear();
        self.private_names.clear();
        self.pending.clear();
        self.held_locks.clear();
    }

    fn unpin_all(&mut self) {
        for id in self.pinned.drain() {
            self.shared_cache.unpin(id);
        }
    }
}

impl<B: BackingStore> Drop for TransactionContext<B> {
    /// A transaction dropped without an explicit commit/abort must not
    /// leak its locks or shared-cache pins onto every other waiter forever.
    fn drop(&mut self) {
        if !matches!(self.state, TransactionState::Committed | TransactionState::Aborted) {
            self.lock_manager.release_all(self.id);
            self.unpin_all();
        }
    }
}
