// SwappingMap — reference-cached map backed by a Store
//
// Values are mutable domain objects shared as `Arc`s. The map never detects
// in-place mutation; owners call `value_updated` (or queue a write with
// `save_upon_commit`) whenever a value changed.

use super::{IterableStore, StoreEntryMapper, StoreError, StoreValue};
use lru::LruCache;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::{Arc, Weak};
use tracing::{debug, error, warn};

/// How long cached values survive once the map is their only holder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePolicy {
    /// The `capacity` most recently used values stay strongly held; the rest
    /// behave like [`CachePolicy::Weak`].
    Soft { capacity: NonZeroUsize },
    /// Values are dropped as soon as no caller holds them.
    Weak,
}

impl CachePolicy {
    pub const DEFAULT_SOFT_CAPACITY: usize = 1024;

    pub fn soft(capacity: usize) -> Self {
        match NonZeroUsize::new(capacity) {
            Some(capacity) => CachePolicy::Soft { capacity },
            None => CachePolicy::Weak,
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::soft(Self::DEFAULT_SOFT_CAPACITY)
    }
}

enum PendingWrite<V> {
    Save(Arc<V>),
    Remove,
}

struct Cache<K, V> {
    weak: HashMap<K, Weak<V>>,
    soft: Option<LruCache<K, Arc<V>>>,
}

impl<K: Clone + Eq + std::hash::Hash, V> Cache<K, V> {
    fn new(policy: CachePolicy) -> Self {
        Self {
            weak: HashMap::new(),
            soft: match policy {
                CachePolicy::Soft { capacity } => Some(LruCache::new(capacity)),
                CachePolicy::Weak => None,
            },
        }
    }

    fn lookup(&mut self, key: &K) -> Option<Arc<V>> {
        if let Some(soft) = self.soft.as_mut() {
            if let Some(found) = soft.get(key) {
                return Some(found.clone());
            }
        }
        match self.weak.get(key).and_then(Weak::upgrade) {
            Some(found) => {
                if let Some(soft) = self.soft.as_mut() {
                    soft.put(key.clone(), found.clone());
                }
                Some(found)
            }
            None => {
                self.weak.remove(key);
                None
            }
        }
    }

    fn insert(&mut self, key: &K, value: &Arc<V>) {
        self.weak.insert(key.clone(), Arc::downgrade(value));
        if let Some(soft) = self.soft.as_mut() {
            soft.put(key.clone(), value.clone());
        }
    }

    fn remove(&mut self, key: &K) {
        self.weak.remove(key);
        if let Some(soft) = self.soft.as_mut() {
            soft.pop(key);
        }
    }

    fn clear(&mut self) {
        self.weak.clear();
        if let Some(soft) = self.soft.as_mut() {
            soft.clear();
        }
    }

    fn purge_reclaimed(&mut self) -> usize {
        let before = self.weak.len();
        self.weak.retain(|_, v| v.strong_count() > 0);
        before - self.weak.len()
    }
}

pub struct SwappingMap<M: StoreEntryMapper> {
    mapper: M,
    store: Arc<dyn IterableStore>,
    cache: Mutex<Cache<M::Key, M::Value>>,
    pending: Mutex<BTreeMap<M::Key, PendingWrite<M::Value>>>,
}

impl<M: StoreEntryMapper> SwappingMap<M> {
    pub fn new(mapper: M, store: Arc<dyn IterableStore>, policy: CachePolicy) -> Self {
        Self {
            mapper,
            store,
            cache: Mutex::new(Cache::new(policy)),
            pending: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    pub fn store(&self) -> &Arc<dyn IterableStore> {
        &self.store
    }

    pub fn get(&self, key: &M::Key) -> Option<Arc<M::Value>> {
        self.get_with(key, |_| {})
    }

    /// Looks up `key`, loading it from storage on a miss.
    ///
    /// `on_load` runs on a freshly loaded value before it becomes visible to any
    /// caller, including callers racing on the same key. It must not call back
    /// into this map.
    pub fn get_with(&self, key: &M::Key, on_load: impl FnOnce(&Arc<M::Value>)) -> Option<Arc<M::Value>> {
        let mut cache = self.cache.lock();
        if let Some(found) = cache.lookup(key) {
            return Some(found);
        }
        if let Some(pending) = self.pending.lock().get(key) {
            return match pending {
                PendingWrite::Save(value) => {
                    cache.insert(key, value);
                    Some(value.clone())
                }
                PendingWrite::Remove => None,
            };
        }

        let loaded = Arc::new(self.load_value_from_storage(key)?);
        on_load(&loaded);
        cache.insert(key, &loaded);
        Some(loaded)
    }

    /// Cache-only lookup.
    pub fn get_cached(&self, key: &M::Key) -> Option<Arc<M::Value>> {
        self.cache.lock().lookup(key)
    }

    /// Every value currently held in memory.
    pub fn cached_values(&self) -> Vec<Arc<M::Value>> {
        let cache = self.cache.lock();
        cache.weak.values().filter_map(Weak::upgrade).collect()
    }

    fn load_value_from_storage(&self, key: &M::Key) -> Option<M::Value> {
        let raw = self.mapper.key_to_string(key);
        match self.store.get(&raw) {
            Ok(Some(value)) => match self.mapper.decode_value(key, &value) {
                Ok(decoded) => Some(decoded),
                Err(e) => {
                    error!("Failed to decode stored value {}: {}", raw, e);
                    None
                }
            },
            Ok(None) => {
                debug!("No stored value for {}", raw);
                None
            }
            Err(e) => {
                error!("Failed to load {} from store: {}", raw, e);
                None
            }
        }
    }

    fn save_value_to_storage(&self, key: &M::Key, value: &M::Value) -> Result<(), StoreError> {
        let raw = self.mapper.key_to_string(key);
        let data = self.mapper.as_bytes(value).map_err(|e| {
            error!("Failed to encode {}: {}", raw, e);
            StoreError::Corrupt(e.to_string())
        })?;
        self.store.put_or_update(StoreValue {
            key: raw,
            encoding_id: self.mapper.preferred_encoding_id().to_string(),
            time_created: self.mapper.time_created(value),
            time_updated: self.mapper.time_updated(value),
            time_read: self.mapper.time_read(value),
            time_expires: self.mapper.time_expires(value),
            data,
        })?;
        Ok(())
    }

    /// Caches `value` and writes it through immediately.
    pub fn put(&self, key: M::Key, value: Arc<M::Value>) -> Result<(), StoreError> {
        self.cache.lock().insert(&key, &value);
        self.pending.lock().remove(&key);
        self.save_value_to_storage(&key, &value)
    }

    /// Caches `value` without touching storage.
    pub fn insert_cached(&self, key: M::Key, value: &Arc<M::Value>) {
        self.cache.lock().insert(&key, value);
    }

    /// Signals that `value` changed and must be flushed now.
    pub fn value_updated(&self, key: &M::Key, value: &Arc<M::Value>) -> Result<(), StoreError> {
        self.cache.lock().insert(key, value);
        self.save_value_to_storage(key, value)
    }

    /// Removes `key` from the cache and the store.
    ///
    /// Fails with [`StoreError::KeyDoesNotExist`] if the store had no record.
    pub fn remove(&self, key: &M::Key) -> Result<(), StoreError> {
        self.cache.lock().remove(key);
        self.pending.lock().remove(key);
        self.store.delete(&self.mapper.key_to_string(key))
    }

    /// Queues a write to be performed by [`Self::transaction_done`].
    pub fn save_upon_commit(&self, key: M::Key, value: Arc<M::Value>) {
        let mut cache = self.cache.lock();
        cache.insert(&key, &value);
        self.pending.lock().insert(key, PendingWrite::Save(value));
    }

    /// Queues a removal to be performed by [`Self::transaction_done`].
    pub fn remove_upon_commit(&self, key: M::Key) {
        let mut cache = self.cache.lock();
        cache.remove(&key);
        self.pending.lock().insert(key, PendingWrite::Remove);
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.pending.lock().is_empty()
    }

    /// Flushes queued writes in key order, then forgets reclaimed cache
    /// entries. Returns how many records were written.
    pub fn transaction_done(&self) -> usize {
        let pending = std::mem::take(&mut *self.pending.lock());
        let mut flushed = 0;
        for (key, write) in pending {
            match write {
                PendingWrite::Save(value) => match self.save_value_to_storage(&key, &value) {
                    Ok(()) => flushed += 1,
                    Err(e) => error!("Failed to flush {:?}: {}", key, e),
                },
                PendingWrite::Remove => match self.store.delete(&self.mapper.key_to_string(&key)) {
                    Ok(()) => flushed += 1,
                    Err(StoreError::KeyDoesNotExist(raw)) => debug!("Nothing stored for removed {}", raw),
                    Err(e) => error!("Failed to remove {:?}: {}", key, e),
                },
            }
        }
        let reclaimed = self.cache.lock().purge_reclaimed();
        if reclaimed > 0 {
            debug!("Forgot {} reclaimed cache entries", reclaimed);
        }
        flushed
    }

    /// All keys in the store, in key order. Unparseable keys are skipped.
    pub fn keys(&self) -> Result<Vec<M::Key>, StoreError> {
        let mut keys = Vec::new();
        for raw in self.store.keys()? {
            match self.mapper.string_to_key(&raw) {
                Ok(key) => keys.push(key),
                Err(e) => warn!("Skipping unparseable store key {}: {}", raw, e),
            }
        }
        Ok(keys)
    }

    pub fn len(&self) -> Result<usize, StoreError> {
        self.store.size()
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        self.store.is_empty()
    }

    pub fn clear(&self) -> Result<(), StoreError> {
        self.cache.lock().clear();
        self.pending.lock().clear();
        self.store.delete_all()
    }

    /// Forgets cache entries whose values were dropped; returns how many.
    pub fn purge_reclaimed(&self) -> usize {
        self.cache.lock().purge_reclaimed()
    }

    pub fn cached_len(&self) -> usize {
        let mut cache = self.cache.lock();
        cache.purge_reclaimed();
        cache.weak.len()
    }
}
