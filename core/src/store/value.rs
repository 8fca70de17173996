// StoreValue — the unit of persistence

use super::StoreError;
use crate::codec::MAX_ENCODING_ID_LEN;
use serde::{Deserialize, Serialize};

/// One record in a [`super::Store`].
///
/// Timestamps are milliseconds since the epoch; `time_expires` is `-1` for never.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreValue {
    pub key: String,
    pub encoding_id: String,
    pub time_created: i64,
    pub time_updated: i64,
    pub time_read: i64,
    pub time_expires: i64,
    pub data: Vec<u8>,
}

impl StoreValue {
    /// Record with all timestamps set to `now` and no expiry.
    pub fn new(key: impl Into<String>, encoding_id: impl Into<String>, now: i64, data: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            encoding_id: encoding_id.into(),
            time_created: now,
            time_updated: now,
            time_read: now,
            time_expires: -1,
            data,
        }
    }

    /// Rejects encoding ids a Store cannot hold.
    pub fn check(&self) -> Result<(), StoreError> {
        if self.encoding_id.len() > MAX_ENCODING_ID_LEN {
            return Err(StoreError::EncodingIdTooLong(self.encoding_id.len()));
        }
        Ok(())
    }

    pub fn has_expired(&self, now: i64) -> bool {
        self.time_expires >= 0 && self.time_expires <= now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_encoding_id_length() {
        let ok = StoreValue::new("k", "x".repeat(MAX_ENCODING_ID_LEN), 1, vec![]);
        assert!(ok.check().is_ok());

        let too_long = StoreValue::new("k", "x".repeat(MAX_ENCODING_ID_LEN + 1), 1, vec![]);
        assert_eq!(
            too_long.check(),
            Err(StoreError::EncodingIdTooLong(MAX_ENCODING_ID_LEN + 1))
        );
    }

    #[test]
    fn test_expiry() {
        let mut value = StoreValue::new("k", "e", 100, vec![1]);
        assert!(!value.has_expired(i64::MAX));
        value.time_expires = 200;
        assert!(!value.has_expired(199));
        assert!(value.has_expired(200));
    }
}
