// Store backends — in-memory and sled

use super::{IterableStore, Store, StoreError, StoreValue};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

/// In-memory store, ordered by key. Useful for testing and for transient mesh bases.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<RwLock<BTreeMap<String, StoreValue>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn put(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        let mut data = self.data.write();
        if data.contains_key(&value.key) {
            return Err(StoreError::KeyExistsAlready(value.key));
        }
        data.insert(value.key.clone(), value);
        Ok(())
    }

    fn update(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        let mut data = self.data.write();
        match data.get_mut(&value.key) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(StoreError::KeyDoesNotExist(value.key)),
        }
    }

    fn put_or_update(&self, value: StoreValue) -> Result<bool, StoreError> {
        value.check()?;
        Ok(self.data.write().insert(value.key.clone(), value).is_some())
    }

    fn get(&self, key: &str) -> Result<Option<StoreValue>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.data.write().remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::KeyDoesNotExist(key.to_string())),
        }
    }

    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|k, _| !k.starts_with(prefix));
        Ok(before - data.len())
    }
}

impl IterableStore for MemoryStore {
    fn page(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoreValue>, StoreError> {
        let data = self.data.read();
        let lower = match after {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };
        Ok(data
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, v)| v.clone())
            .collect())
    }

    fn size(&self) -> Result<usize, StoreError> {
        Ok(self.data.read().len())
    }
}

/// Store backed by one sled tree. The record is kept bincode-encoded.
#[derive(Clone)]
pub struct SledStore {
    tree: sled::Tree,
}

impl SledStore {
    /// Opens (or creates) the database at `path` and uses its default tree.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(io_error)?;
        Ok(Self { tree: (*db).clone() })
    }

    /// Uses the named tree of an already-open database.
    pub fn with_tree(db: &sled::Db, name: &str) -> Result<Self, StoreError> {
        let tree = db.open_tree(name).map_err(io_error)?;
        Ok(Self { tree })
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.tree.flush().map_err(io_error)?;
        Ok(())
    }

    fn encode(value: &StoreValue) -> Result<Vec<u8>, StoreError> {
        bincode::serialize(value).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    fn decode(bytes: &[u8]) -> Result<StoreValue, StoreError> {
        bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt(e.to_string()))
    }
}

fn io_error(e: sled::Error) -> StoreError {
    StoreError::Io(e.to_string())
}

impl Store for SledStore {
    fn put(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        let bytes = Self::encode(&value)?;
        self.tree
            .compare_and_swap(value.key.as_bytes(), None as Option<&[u8]>, Some(bytes))
            .map_err(io_error)?
            .map_err(|_| StoreError::KeyExistsAlready(value.key.clone()))
    }

    fn update(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        if !self.tree.contains_key(value.key.as_bytes()).map_err(io_error)? {
            return Err(StoreError::KeyDoesNotExist(value.key));
        }
        self.tree
            .insert(value.key.as_bytes(), Self::encode(&value)?)
            .map_err(io_error)?;
        Ok(())
    }

    fn put_or_update(&self, value: StoreValue) -> Result<bool, StoreError> {
        value.check()?;
        let previous = self
            .tree
            .insert(value.key.as_bytes(), Self::encode(&value)?)
            .map_err(io_error)?;
        Ok(previous.is_some())
    }

    fn get(&self, key: &str) -> Result<Option<StoreValue>, StoreError> {
        match self.tree.get(key.as_bytes()).map_err(io_error)? {
            Some(bytes) => Self::decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self.tree.remove(key.as_bytes()).map_err(io_error)? {
            Some(_) => Ok(()),
            None => Err(StoreError::KeyDoesNotExist(key.to_string())),
        }
    }

    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        let mut count = 0;
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(io_error)?;
            self.tree.remove(key).map_err(io_error)?;
            count += 1;
        }
        Ok(count)
    }
}

impl IterableStore for SledStore {
    fn page(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoreValue>, StoreError> {
        let iter = match after {
            Some(after) => self
                .tree
                .range::<Vec<u8>, _>((Bound::Excluded(after.as_bytes().to_vec()), Bound::Unbounded)),
            None => self.tree.iter(),
        };
        let mut values = Vec::new();
        for item in iter.take(limit) {
            let (_, bytes) = item.map_err(io_error)?;
            values.push(Self::decode(&bytes)?);
        }
        Ok(values)
    }

    fn size(&self) -> Result<usize, StoreError> {
        Ok(self.tree.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exercise(store: &dyn IterableStore) {
        let value = StoreValue::new("alpha", "bincode-v1", 10, vec![1, 2, 3]);
        store.put(value.clone()).unwrap();
        assert_eq!(
            store.put(value.clone()),
            Err(StoreError::KeyExistsAlready("alpha".to_string()))
        );
        assert_eq!(store.get("alpha").unwrap(), Some(value.clone()));
        assert_eq!(store.get("beta").unwrap(), None);

        let mut changed = value.clone();
        changed.data = vec![9];
        changed.time_updated = 20;
        store.update(changed.clone()).unwrap();
        assert_eq!(store.get("alpha").unwrap().unwrap().data, vec![9]);

        let missing = StoreValue::new("gamma", "bincode-v1", 10, vec![]);
        assert_eq!(
            store.update(missing.clone()),
            Err(StoreError::KeyDoesNotExist("gamma".to_string()))
        );
        assert!(!store.put_or_update(missing).unwrap());
        assert!(store.put_or_update(changed).unwrap());
        assert_eq!(store.size().unwrap(), 2);

        store.put(StoreValue::new("obj/1", "e", 1, vec![])).unwrap();
        store.put(StoreValue::new("obj/2", "e", 1, vec![])).unwrap();
        assert_eq!(store.delete_all_with_prefix("obj/").unwrap(), 2);

        store.delete("alpha").unwrap();
        assert_eq!(
            store.delete("alpha"),
            Err(StoreError::KeyDoesNotExist("alpha".to_string()))
        );
        store.delete_all().unwrap();
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_sled_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = SledStore::open(dir.path().join("db")).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_sled_store_pages_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = sled::open(&path).unwrap();
            let store = SledStore::with_tree(&db, "proxies").unwrap();
            for key in ["c", "a", "b"] {
                store.put(StoreValue::new(key, "e", 1, key.as_bytes().to_vec())).unwrap();
            }
            store.flush().unwrap();
        }
        let db = sled::open(&path).unwrap();
        let store = SledStore::with_tree(&db, "proxies").unwrap();
        let keys: Vec<String> = store.page(Some("a"), 10).unwrap().into_iter().map(|v| v.key).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert_eq!(store.size().unwrap(), 3);
    }

    #[test]
    fn test_encoding_id_limit_enforced() {
        let store = MemoryStore::new();
        let value = StoreValue::new("k", "e".repeat(65), 1, vec![]);
        assert_eq!(store.put(value), Err(StoreError::EncodingIdTooLong(65)));
    }
}
