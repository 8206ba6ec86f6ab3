use std::collections::HashMap;
use std::hash::Hash;

use parking_lot::Mutex;
use tracing::debug;

use crate::common::{BindingName, CacheEntry, ObjectId, UpdateMode, ABSENT_ID};

struct Slot<V> {
    name: Option<BindingName>,
    payload: V,
}

struct Inner<V> {
    by_id: HashMap<ObjectId, Slot<V>>,
    by_name: HashMap<BindingName, ObjectId>,
    by_value: HashMap<V, ObjectId>,
    /// Approximate LRU order, oldest first. Grows and shrinks with the
    /// entry set; a linear `retain` on touch is fine at this cache's scale.
    lru: Vec<ObjectId>,
    pins: HashMap<ObjectId, u32>,
}

impl<V> Inner<V> {
    fn new() -> Self {
        Self {
            by_id: HashMap::new(),
            by_name: HashMap::new(),
            by_value: HashMap::new(),
            lru: Vec::new(),
            pins: HashMap::new(),
        }
    }
}

/// Process-wide cache tier shared by every `TransactionContext`. See the
/// module documentation for the indexing and atomicity contract.
pub struct SharedCache<V: Clone + Eq + Hash + Send + Sync + 'static> {
    inner: Mutex<Inner<V>>,
    capacity: usize,
}

impl<V: Clone + Eq + Hash + Send + Sync + 'static> SharedCache<V> {
    /// `capacity == 0` disables the cache: every operation becomes a no-op
    /// that behaves as a permanent miss, which keeps callers correct (they
    /// simply fall through to the backing store every time).
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner::new()), capacity }
    }

    pub fn get_by_id(&self, id: ObjectId) -> Option<CacheEntry<V>> {
        if self.capacity == 0 {
            return None;
        }
        let mut inner = self.inner.lock();
        if !inner.by_id.contains_key(&id) {
            return None;
        }
        touch(&mut inner.lru, id);
        inner
            .by_id
            .get(&id)
            .map(|slot| CacheEntry::new(id, slot.name.clone(), Some(slot.payload.clone()), UpdateMode::None))
    }

    pub fn get_id_by_name(&self, name: &str) -> ObjectId {
        if self.capacity == 0 {
            return ABSENT_ID;
        }
        let inner = self.inner.lock();
        inner.by_name.get(name).copied().unwrap_or(ABSENT_ID)
    }

    pub fn get_id_by_value(&self, value: &V) -> ObjectId {
        if self.capacity == 0 {
            return ABSENT_ID;
        }
        let inner = self.inner.lock();
        inner.by_value.get(value).copied().unwrap_or(ABSENT_ID)
    }

    /// Inserts or updates an entry. The returned entry always carries
    /// `UpdateMode::None`, regardless of what the caller intends to do with
    /// it next — the shared tier has no notion of pending intent.
    pub fn put(&self, id: ObjectId, name: Option<BindingName>, value: V) -> CacheEntry<V> {
        if self.capacity == 0 {
            return CacheEntry::new(id, name, Some(value), UpdateMode::None);
        }
        let mut inner = self.inner.lock();
        if let Some(old) = inner.by_id.get(&id) {
            if let Some(old_name) = &old.name {
                if name.as_deref() != Some(old_name.as_str()) {
                    inner.by_name.remove(old_name);
                }
            }
            if inner.by_value.get(&old.payload) == Some(&id) {
                inner.by_value.remove(&old.payload);
            }
        } else if inner.by_id.len() >= self.capacity {
            evict_one(&mut inner);
        }
        if let Some(n) = &name {
            inner.by_name.insert(n.clone(), id);
        }
        inner.by_value.insert(value.clone(), id);
        inner.by_id.insert(id, Slot { name: name.clone(), payload: value.clone() });
        touch(&mut inner.lru, id);
        debug!(object_id = id, "shared cache put");
        CacheEntry::new(id, name, Some(value), UpdateMode::None)
    }

    pub fn evict(&self, id: ObjectId) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        remove_entry(&mut inner, id);
    }

    /// Marks `id` as referenced by an in-flight transaction; pinned entries
    /// are skipped by eviction. Safe to call on an id the cache does not
    /// hold (the pin is simply not consulted by anything until a `put`
    /// lands for that id).
    pub fn pin(&self, id: ObjectId) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        *inner.pins.entry(id).or_insert(0) += 1;
    }

    pub fn unpin(&self, id: ObjectId) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if let Some(count) = inner.pins.get_mut(&id) {
            if *count > 0 {
                *count -= 1;
            }
            if *count == 0 {
                inner.pins.remove(&id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn touch(lru: &mut Vec<ObjectId>, id: ObjectId) {
    lru.retain(|x| *x != id);
    lru.push(id);
}

fn remove_entry<V: Clone + Eq + Hash>(inner: &mut Inner<V>, id: ObjectId) {
    if let Some(slot) = inner.by_id.remove(&id) {
        if let Some(name) = &slot.name {
            inner.by_name.remove(name);
        }
        if inner.by_value.get(&slot.payload) == Some(&id) {
            inner.by_value.remove(&slot.payload);
        }
    }
    inner.lru.retain(|x| *x != id);
    inner.pins.remove(&id);
}

/// Evicts the oldest unpinned entry in LRU order. A cache entirely full of
/// pinned entries simply grows past capacity rather than evicting
/// something still in use: pinning is a hard guarantee, not a hint.
fn evict_one<V: Clone + Eq + Hash>(inner: &mut Inner<V>) {
    let victim = inner
        .lru
        .iter()
        .find(|id| !inner.pins.contains_key(*id))
        .copied();
    if let Some(id) = victim {
        debug!(object_id = id, "shared cache eviction");
        remove_entry(inner, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_by_id() {
        let cache: SharedCache<i64> = SharedCache::new(10);
        cache.put(1, Some("a".into()), 42);
        let entry = cache.get_by_id(1).unwrap();
        assert_eq!(entry.payload, Some(42));
        assert_eq!(entry.update_mode, UpdateMode::None);
        assert_eq!(cache.get_id_by_name("a"), 1);
        assert_eq!(cache.get_id_by_value(&42), 1);
    }

    #[test]
    fn miss_returns_absent() {
        let cache: SharedCache<i64> = SharedCache::new(10);
        assert!(cache.get_by_id(99).is_none());
        assert_eq!(cache.get_id_by_name("nope"), ABSENT_ID);
        assert_eq!(cache.get_id_by_value(&7), ABSENT_ID);
    }

    #[test]
    fn eviction_respects_capacity() {
        let cache: SharedCache<i64> = SharedCache::new(2);
        cache.put(1, None, 1);
        cache.put(2, None, 2);
        cache.put(3, None, 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_by_id(1).is_none());
        assert!(cache.get_by_id(2).is_some());
        assert!(cache.get_by_id(3).is_some());
    }

    #[test]
    fn pinned_entries_survive_eviction_pressure() {
        let cache: SharedCache<i64> = SharedCache::new(2);
        cache.put(1, None, 1);
        cache.pin(1);
        cache.put(2, None, 2);
        cache.put(3, None, 3);
        assert!(cache.get_by_id(1).is_some(), "pinned entry must not be evicted");
    }

    #[test]
    fn zero_capacity_disables_cache() {
        let cache: SharedCache<i64> = SharedCache::new(0);
        cache.put(1, Some("a".into()), 1);
        assert!(cache.get_by_id(1).is_none());
        assert_eq!(cache.get_id_by_name("a"), ABSENT_ID);
    }

    #[test]
    fn evict_removes_from_all_indices() {
        let cache: SharedCache<i64> = SharedCache::new(10);
        cache.put(1, Some("a".into()), 42);
        cache.evict(1);
        assert!(cache.get_by_id(1).is_none());
        assert_eq!(cache.get_id_by_name("a"), ABSENT_ID);
        assert_eq!(cache.get_id_by_value(&42), ABSENT_ID);
    }

    #[test]
    fn duplicate_value_across_ids_does_not_clobber_the_other_id() {
        let cache: SharedCache<i64> = SharedCache::new(10);
        cache.put(1, None, 42);
        cache.put(2, None, 42);
        assert_eq!(cache.get_id_by_value(&42), 2, "by_value should point at the most recent id carrying this value");

        // Updating id 1 to a new value must not remove id 2's by_value entry,
        // since both used to share the old value 42.
        cache.put(1, None, 7);
        assert_eq!(cache.get_id_by_value(&42), 2, "id 2 still carries value 42 and must remain findable");
        assert_eq!(cache.get_id_by_value(&7), 1);

        // Evicting id 2 must not remove id 1's current value either, since
        // the two no longer share a value index entry.
        cache.evict(2);
        assert_eq!(cache.get_id_by_value(&7), 1, "evicting id 2 must not disturb id 1's by_value entry");
    }
}
