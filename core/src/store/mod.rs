// Store — key-value persistence for proxies and mesh objects

pub mod backend;
pub mod encrypted;
pub mod mapper;
pub mod swapping;
pub mod value;

pub use backend::{MemoryStore, SledStore};
pub use encrypted::EncryptedStore;
pub use mapper::{MapperError, StoreEntryMapper};
pub use swapping::{CachePolicy, SwappingMap};
pub use value::StoreValue;

use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Key exists already: {0}")]
    KeyExistsAlready(String),
    #[error("Key does not exist: {0}")]
    KeyDoesNotExist(String),
    #[error("Encoding id too long: {0} bytes")]
    EncodingIdTooLong(usize),
    #[error("Storage I/O failed: {0}")]
    Io(String),
    #[error("Record corrupt: {0}")]
    Corrupt(String),
    #[error("Encryption failed: {0}")]
    Crypto(String),
}

/// Generic key-value persistence contract.
///
/// `get` reports absence as `Ok(None)`. `update` and `delete` require presence
/// and fail with [`StoreError::KeyDoesNotExist`] otherwise.
pub trait Store: Send + Sync {
    /// Insert a new record; fails if the key is taken.
    fn put(&self, value: StoreValue) -> Result<(), StoreError>;

    /// Replace an existing record.
    fn update(&self, value: StoreValue) -> Result<(), StoreError>;

    /// Insert or replace. Returns `true` if a record was replaced.
    fn put_or_update(&self, value: StoreValue) -> Result<bool, StoreError>;

    fn get(&self, key: &str) -> Result<Option<StoreValue>, StoreError>;

    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Delete every record whose key starts with `prefix`; returns how many.
    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError>;

    fn delete_all(&self) -> Result<(), StoreError> {
        self.delete_all_with_prefix("").map(|_| ())
    }
}

/// A Store whose records can be walked in key order.
pub trait IterableStore: Store {
    /// Up to `limit` records with keys strictly greater than `after`, in key order.
    fn page(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoreValue>, StoreError>;

    fn size(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.size()? == 0)
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self.page(after.as_deref(), StoreCursor::DEFAULT_PAGE_SIZE)?;
            let Some(last) = page.last() else { break };
            after = Some(last.key.clone());
            keys.extend(page.into_iter().map(|v| v.key));
        }
        Ok(keys)
    }
}

/// Lazily paging iterator over an [`IterableStore`].
pub struct StoreCursor<'a> {
    store: &'a dyn IterableStore,
    after: Option<String>,
    buffer: VecDeque<StoreValue>,
    page_size: usize,
    exhausted: bool,
}

impl<'a> StoreCursor<'a> {
    pub const DEFAULT_PAGE_SIZE: usize = 64;

    pub fn new(store: &'a dyn IterableStore) -> Self {
        Self::with_page_size(store, Self::DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(store: &'a dyn IterableStore, page_size: usize) -> Self {
        Self {
            store,
            after: None,
            buffer: VecDeque::new(),
            page_size: page_size.max(1),
            exhausted: false,
        }
    }

    /// Continue after `key` instead of from the start.
    pub fn starting_after(mut self, key: &str) -> Self {
        self.after = Some(key.to_string());
        self
    }
}

impl Iterator for StoreCursor<'_> {
    type Item = Result<StoreValue, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            match self.store.page(self.after.as_deref(), self.page_size) {
                Ok(page) => {
                    if page.len() < self.page_size {
                        self.exhausted = true;
                    }
                    if let Some(last) = page.last() {
                        self.after = Some(last.key.clone());
                    }
                    self.buffer.extend(page);
                }
                Err(e) => {
                    self.exhausted = true;
                    return Some(Err(e));
                }
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}

impl<S: Store + ?Sized> Store for Arc<S> {
    fn put(&self, value: StoreValue) -> Result<(), StoreError> {
        (**self).put(value)
    }

    fn update(&self, value: StoreValue) -> Result<(), StoreError> {
        (**self).update(value)
    }

    fn put_or_update(&self, value: StoreValue) -> Result<bool, StoreError> {
        (**self).put_or_update(value)
    }

    fn get(&self, key: &str) -> Result<Option<StoreValue>, StoreError> {
        (**self).get(key)
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        (**self).delete(key)
    }

    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        (**self).delete_all_with_prefix(prefix)
    }
}

impl<S: IterableStore + ?Sized> IterableStore for Arc<S> {
    fn page(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoreValue>, StoreError> {
        (**self).page(after, limit)
    }

    fn size(&self) -> Result<usize, StoreError> {
        (**self).size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_pages_in_key_order() {
        let store = MemoryStore::new();
        for i in (0..10).rev() {
            store.put(StoreValue::new(format!("k{i}"), "e", 1, vec![i as u8])).unwrap();
        }

        let keys: Vec<String> = StoreCursor::with_page_size(&store, 3)
            .map(|v| v.unwrap().key)
            .collect();
        let expected: Vec<String> = (0..10).map(|i| format!("k{i}")).collect();
        assert_eq!(keys, expected);

        let tail: Vec<String> = StoreCursor::with_page_size(&store, 4)
            .starting_after("k6")
            .map(|v| v.unwrap().key)
            .collect();
        assert_eq!(tail, vec!["k7", "k8", "k9"]);
        assert_eq!(store.keys().unwrap().len(), 10);
    }

    #[test]
    fn test_arc_store_delegates() {
        let store: Arc<dyn IterableStore> = Arc::new(MemoryStore::new());
        store.put(StoreValue::new("a", "e", 1, vec![])).unwrap();
        assert_eq!(store.size().unwrap(), 1);
        store.delete_all().unwrap();
        assert!(store.is_empty().unwrap());
    }
}
