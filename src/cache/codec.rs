//! Value Codecs
//!
//! Turn typed values into the bytes backends store, and back. Decoding is
//! driven by the type the caller asks for.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{CacheError, Result};

/// Serialization format used by the cache facade.
pub trait Codec: Send + Sync + 'static {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// JSON via serde_json. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

/// Compact binary encoding via bincode. Not self-describing: values must be
/// read back as the type they were written with.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl Codec for BincodeCodec {
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        bincode::serialize(value).map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        bincode::deserialize(bytes).map_err(|e| CacheError::Serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        name: String,
        tags: Vec<String>,
    }

    fn account() -> Account {
        Account {
            id: 7,
            name: "ada".to_string(),
            tags: vec!["admin".to_string()],
        }
    }

    #[test]
    fn test_json_struct() {
        let bytes = JsonCodec.encode(&account()).unwrap();
        assert_eq!(JsonCodec.decode::<Account>(&bytes).unwrap(), account());
    }

    #[test]
    fn test_bincode_struct() {
        let bytes = BincodeCodec.encode(&account()).unwrap();
        assert_eq!(BincodeCodec.decode::<Account>(&bytes).unwrap(), account());
    }

    #[test]
    fn test_stored_null_is_not_a_miss() {
        let bytes = JsonCodec.encode(&Option::<String>::None).unwrap();
        assert_eq!(JsonCodec.decode::<Option<String>>(&bytes).unwrap(), None);
        assert!(JsonCodec.decode::<String>(&bytes).is_err());
    }

    #[test]
    fn test_decode_as_wrong_type() {
        let bytes = JsonCodec.encode("text").unwrap();
        assert!(matches!(
            JsonCodec.decode::<u64>(&bytes),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_json_rejects_non_string_map_keys() {
        let map: HashMap<(u8, u8), u8> = HashMap::from([((1, 2), 3)]);
        assert!(matches!(
            JsonCodec.encode(&map),
            Err(CacheError::Serialization(_))
        ));
    }

    #[test]
    fn test_bincode_truncated_input() {
        let bytes = BincodeCodec.encode(&account()).unwrap();
        assert!(BincodeCodec.decode::<Account>(&bytes[..3]).is_err());
    }
}
