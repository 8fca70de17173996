// EncryptedStore — transparent XChaCha20-Poly1305 wrapper around any Store
//
// Stored data layout: nonce (24 bytes) || ciphertext.
// The record key and encoding id are bound as associated data, so a blob moved to
// another key or relabelled with another encoding fails to decrypt.

use super::{IterableStore, Store, StoreError, StoreValue};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

const NONCE_LEN: usize = 24;
const KDF_CONTEXT: &str = "meshbase 2024 encrypted store key";
const PBKDF2_ROUNDS: u32 = 100_000;

#[derive(Zeroize, ZeroizeOnDrop)]
struct StoreKey([u8; 32]);

pub struct EncryptedStore<S> {
    delegate: S,
    key: StoreKey,
}

impl<S: Store> EncryptedStore<S> {
    pub fn new(delegate: S, key: [u8; 32]) -> Self {
        Self {
            delegate,
            key: StoreKey(key),
        }
    }

    /// Derives a per-purpose key from a master key, e.g. separate keys for the
    /// object store and the proxy store.
    pub fn with_master_key(delegate: S, master: &[u8; 32], purpose: &str) -> Self {
        let mut material = Vec::with_capacity(32 + purpose.len());
        material.extend_from_slice(master);
        material.extend_from_slice(purpose.as_bytes());
        let key = blake3::derive_key(KDF_CONTEXT, &material);
        material.zeroize();
        Self::new(delegate, key)
    }

    /// Derives the key from a passphrase with PBKDF2-HMAC-SHA256.
    pub fn with_passphrase(delegate: S, passphrase: &str, salt: &[u8]) -> Self {
        let mut key = [0u8; 32];
        pbkdf2::pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, PBKDF2_ROUNDS, &mut key);
        let store = Self::new(delegate, key);
        key.zeroize();
        store
    }

    pub fn delegate(&self) -> &S {
        &self.delegate
    }

    fn cipher(&self) -> Result<XChaCha20Poly1305, StoreError> {
        XChaCha20Poly1305::new_from_slice(&self.key.0).map_err(|e| StoreError::Crypto(e.to_string()))
    }

    fn aad(value: &StoreValue) -> Vec<u8> {
        let mut aad = Vec::with_capacity(value.key.len() + 1 + value.encoding_id.len());
        aad.extend_from_slice(value.key.as_bytes());
        aad.push(0);
        aad.extend_from_slice(value.encoding_id.as_bytes());
        aad
    }

    fn encrypt(&self, mut value: StoreValue) -> Result<StoreValue, StoreError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let aad = Self::aad(&value);

        let ciphertext = self
            .cipher()?
            .encrypt(
                XNonce::from_slice(&nonce_bytes),
                Payload {
                    msg: &value.data,
                    aad: &aad,
                },
            )
            .map_err(|e| StoreError::Crypto(e.to_string()))?;

        let mut data = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        data.extend_from_slice(&nonce_bytes);
        data.extend_from_slice(&ciphertext);
        value.data.zeroize();
        value.data = data;
        Ok(value)
    }

    fn decrypt(&self, mut value: StoreValue) -> Result<StoreValue, StoreError> {
        if value.data.len() < NONCE_LEN {
            return Err(StoreError::Crypto(format!("record {} too short", value.key)));
        }
        let aad = Self::aad(&value);
        let (nonce, ciphertext) = value.data.split_at(NONCE_LEN);
        let plaintext = self
            .cipher()?
            .decrypt(
                XNonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad: &aad,
                },
            )
            .map_err(|_| StoreError::Crypto(format!("cannot decrypt record {}", value.key)))?;
        value.data = plaintext;
        Ok(value)
    }
}

impl<S: Store> Store for EncryptedStore<S> {
    fn put(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        self.delegate.put(self.encrypt(value)?)
    }

    fn update(&self, value: StoreValue) -> Result<(), StoreError> {
        value.check()?;
        self.delegate.update(self.encrypt(value)?)
    }

    fn put_or_update(&self, value: StoreValue) -> Result<bool, StoreError> {
        value.check()?;
        self.delegate.put_or_update(self.encrypt(value)?)
    }

    fn get(&self, key: &str) -> Result<Option<StoreValue>, StoreError> {
        match self.delegate.get(key)? {
            Some(value) => self.decrypt(value).map(Some),
            None => Ok(None),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.delegate.delete(key)
    }

    fn delete_all_with_prefix(&self, prefix: &str) -> Result<usize, StoreError> {
        self.delegate.delete_all_with_prefix(prefix)
    }
}

impl<S: IterableStore> IterableStore for EncryptedStore<S> {
    fn page(&self, after: Option<&str>, limit: usize) -> Result<Vec<StoreValue>, StoreError> {
        self.delegate
            .page(after, limit)?
            .into_iter()
            .map(|value| self.decrypt(value))
            .collect()
    }

    fn size(&self) -> Result<usize, StoreError> {
        self.delegate.size()
    }

    fn keys(&self) -> Result<Vec<String>, StoreError> {
        self.delegate.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn sample() -> StoreValue {
        StoreValue::new("obj/1", "bincode-v1", 42, b"secret payload".to_vec())
    }

    #[test]
    fn test_encrypts_at_rest_and_decrypts_on_get() {
        let inner = MemoryStore::new();
        let store = EncryptedStore::new(inner.clone(), [7u8; 32]);
        store.put(sample()).unwrap();

        let raw = inner.get("obj/1").unwrap().unwrap();
        assert_ne!(raw.data, sample().data);
        assert_eq!(raw.encoding_id, "bincode-v1");
        assert_eq!(raw.time_created, 42);

        assert_eq!(store.get("obj/1").unwrap(), Some(sample()));
        assert_eq!(store.page(None, 10).unwrap(), vec![sample()]);
    }

    #[test]
    fn test_wrong_key_fails() {
        let inner = MemoryStore::new();
        EncryptedStore::new(inner.clone(), [1u8; 32]).put(sample()).unwrap();
        let other = EncryptedStore::new(inner, [2u8; 32]);
        assert!(matches!(other.get("obj/1"), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_moved_record_fails() {
        let inner = MemoryStore::new();
        let store = EncryptedStore::with_master_key(inner.clone(), &[3u8; 32], "objects");
        store.put(sample()).unwrap();

        let mut moved = inner.get("obj/1").unwrap().unwrap();
        moved.key = "obj/2".to_string();
        inner.put(moved).unwrap();
        assert!(matches!(store.get("obj/2"), Err(StoreError::Crypto(_))));
    }

    #[test]
    fn test_passphrase_keys_are_stable() {
        let inner = MemoryStore::new();
        EncryptedStore::with_passphrase(inner.clone(), "correct horse", b"salt").put(sample()).unwrap();
        let reopened = EncryptedStore::with_passphrase(inner, "correct horse", b"salt");
        assert_eq!(reopened.get("obj/1").unwrap(), Some(sample()));
    }

    #[test]
    fn test_delete_passes_through() {
        let store = EncryptedStore::new(MemoryStore::new(), [9u8; 32]);
        store.put(sample()).unwrap();
        store.delete("obj/1").unwrap();
        assert_eq!(store.delete("obj/1"), Err(StoreError::KeyDoesNotExist("obj/1".to_string())));
        assert!(store.is_empty().unwrap());
    }
}
