// StoreEntryMapper — maps typed key/value pairs onto StoreValues

use crate::codec::CodecError;
use crate::identifier::IdentifierError;
use std::fmt::Debug;
use std::hash::Hash;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MapperError {
    #[error("Cannot parse key {key}: {reason}")]
    Parse { key: String, reason: String },
    #[error("Cannot decode value for {key}: {reason}")]
    Decoding { key: String, reason: String },
    #[error("Cannot encode value: {0}")]
    Encoding(String),
    #[error("Unknown encoding id {encoding_id} for {key}")]
    UnknownEncoding { key: String, encoding_id: String },
}

impl MapperError {
    pub fn parse(key: &str, e: IdentifierError) -> Self {
        MapperError::Parse {
            key: key.to_string(),
            reason: e.to_string(),
        }
    }

    pub fn decoding(key: &str, e: impl ToString) -> Self {
        MapperError::Decoding {
            key: key.to_string(),
            reason: e.to_string(),
        }
    }

    /// Maps a codec failure on the record `key` stored under `encoding_id`.
    pub fn from_codec(key: &str, encoding_id: &str, e: CodecError) -> Self {
        match e {
            CodecError::UnknownEncoding(_) => MapperError::UnknownEncoding {
                key: key.to_string(),
                encoding_id: encoding_id.to_string(),
            },
            CodecError::Encode(reason) => MapperError::Encoding(reason),
            CodecError::Decode(reason) => MapperError::Decoding {
                key: key.to_string(),
                reason,
            },
        }
    }
}

/// Bidirectional codec between typed entries and [`super::StoreValue`]s.
///
/// The timestamp accessors supply the metadata written along with each value.
pub trait StoreEntryMapper: Send + Sync {
    type Key: Clone + Eq + Hash + Ord + Debug + Send + Sync;
    type Value: Send + Sync;

    fn key_to_string(&self, key: &Self::Key) -> String;

    fn string_to_key(&self, raw: &str) -> Result<Self::Key, MapperError>;

    fn decode_value(&self, key: &Self::Key, value: &super::StoreValue) -> Result<Self::Value, MapperError>;

    fn as_bytes(&self, value: &Self::Value) -> Result<Vec<u8>, MapperError>;

    /// Encoding id written along with [`Self::as_bytes`] output.
    fn preferred_encoding_id(&self) -> &str;

    fn time_created(&self, value: &Self::Value) -> i64;

    fn time_updated(&self, value: &Self::Value) -> i64;

    fn time_read(&self, value: &Self::Value) -> i64;

    fn time_expires(&self, value: &Self::Value) -> i64;
}
