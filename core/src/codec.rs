// Encodings — serializers selectable by their encoding id
//
// Every stored blob is tagged with the id of the encoding that produced it, so
// that records written by an older preferred encoding stay readable.

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Longest encoding id a Store accepts, in bytes.
pub const MAX_ENCODING_ID_LEN: usize = 64;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Unknown encoding id: {0}")]
    UnknownEncoding(String),
    #[error("Encoding failed: {0}")]
    Encode(String),
    #[error("Decoding failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    #[default]
    Bincode,
    Json,
}

impl Encoding {
    pub const ALL: [Encoding; 2] = [Encoding::Bincode, Encoding::Json];

    pub fn id(&self) -> &'static str {
        match self {
            Encoding::Bincode => "bincode-v1",
            Encoding::Json => "json-v1",
        }
    }

    pub fn from_id(id: &str) -> Result<Self, CodecError> {
        Self::ALL
            .into_iter()
            .find(|e| e.id() == id)
            .ok_or_else(|| CodecError::UnknownEncoding(id.to_string()))
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        match self {
            Encoding::Bincode => bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string())),
            Encoding::Json => serde_json::to_vec(value).map_err(|e| CodecError::Encode(e.to_string())),
        }
    }

    pub fn decode<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T, CodecError> {
        match self {
            Encoding::Bincode => bincode::deserialize(data).map_err(|e| CodecError::Decode(e.to_string())),
            Encoding::Json => serde_json::from_slice(data).map_err(|e| CodecError::Decode(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_id() {
        for encoding in Encoding::ALL {
            assert_eq!(Encoding::from_id(encoding.id()), Ok(encoding));
            assert!(encoding.id().len() <= MAX_ENCODING_ID_LEN);
        }
        assert_eq!(
            Encoding::from_id("xml-v1"),
            Err(CodecError::UnknownEncoding("xml-v1".to_string()))
        );
    }

    #[test]
    fn test_decode_garbage_fails() {
        let garbage = [0xffu8, 0x00, 0x13];
        assert!(matches!(
            Encoding::Json.decode::<Vec<String>>(&garbage),
            Err(CodecError::Decode(_))
        ));
        assert!(matches!(
            Encoding::Bincode.decode::<Vec<String>>(&garbage),
            Err(CodecError::Decode(_))
        ));
    }
}
