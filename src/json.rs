//! JSON (de)serialization adapter over `serde_json`

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::error::{DataError, Result};

/// Stateless JSON adapter. Construct it where needed; it holds no state.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonAdapter;

impl JsonAdapter {
    pub fn serialize<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(DataError::JsonSerialize)
    }

    pub fn serialize_pretty<T: Serialize + ?Sized>(&self, value: &T) -> Result<String> {
        serde_json::to_string_pretty(value).map_err(DataError::JsonSerialize)
    }

    pub fn deserialize<T: DeserializeOwned>(&self, json: &str) -> Result<T> {
        serde_json::from_str(json).map_err(DataError::JsonDeserialize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::error::ErrorKind;
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        name: String,
        balance: i64,
    }

    #[test]
    fn deserializes_what_it_serialized() {
        let account = Account {
            name: "ada".into(),
            balance: 42,
        };
        let json = JsonAdapter.serialize(&account).unwrap();
        assert_eq!(json, r#"{"name":"ada","balance":42}"#);
        assert_eq!(JsonAdapter.deserialize::<Account>(&json).unwrap(), account);
    }

    #[test]
    fn malformed_input_is_a_deserialize_error() {
        let err = JsonAdapter.deserialize::<Account>("{\"name\":").unwrap_err();
        assert!(matches!(err, DataError::JsonDeserialize(_)));
        assert_eq!(err.kind(), ErrorKind::Serialization);
    }

    #[test]
    fn non_string_map_keys_fail_to_serialize() {
        let map = BTreeMap::from([((1, 2), "pair")]);
        let err = JsonAdapter.serialize(&map).unwrap_err();
        assert!(matches!(err, DataError::JsonSerialize(_)));
    }
}
