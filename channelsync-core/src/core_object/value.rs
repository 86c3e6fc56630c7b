/*
    value.rs - Storable value model

    A map entry holds exactly one of a closed set of value kinds: a primitive
    leaf (string, binary, number, boolean), a JSON-decoded structure, or a
    reference to another replicated object by its object id.

    Size accounting must be deterministic across replicas because local writes
    are rejected against the transport's message size limit before publishing.
*/

use serde::{Deserialize, Serialize};

/// A value stored in a map entry or counter payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ObjectValue {
    /// A primitive string leaf value
    String(String),
    /// A primitive binary leaf value
    Bytes(Vec<u8>),
    /// A primitive numeric leaf value
    Number(f64),
    /// A primitive boolean leaf value
    Boolean(bool),
    /// A JSON-decoded structure
    Json(serde_json::Value),
    /// A reference to another replicated object, by object id
    ObjectRef(String),
}

impl ObjectValue {
    /// Encoded size of this value in bytes, as counted against the
    /// transport's message size limit.
    ///
    /// Object references are identity fields and are excluded from size
    /// accounting.
    pub fn size_bytes(&self) -> usize {
        match self {
            ObjectValue::String(s) => s.len(),
            ObjectValue::Bytes(b) => b.len(),
            ObjectValue::Number(_) => 8,
            ObjectValue::Boolean(_) => 1,
            ObjectValue::Json(v) => serde_json::to_string(v).map(|s| s.len()).unwrap_or(0),
            ObjectValue::ObjectRef(_) => 0,
        }
    }

    /// True if this value is a reference to another replicated object
    pub fn is_object_ref(&self) -> bool {
        matches!(self, ObjectValue::ObjectRef(_))
    }

    /// The referenced object id, if this value is a reference
    pub fn object_ref(&self) -> Option<&str> {
        match self {
            ObjectValue::ObjectRef(id) => Some(id.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for ObjectValue {
    fn from(s: &str) -> Self {
        ObjectValue::String(s.to_string())
    }
}

impl From<String> for ObjectValue {
    fn from(s: String) -> Self {
        ObjectValue::String(s)
    }
}

impl From<f64> for ObjectValue {
    fn from(n: f64) -> Self {
        ObjectValue::Number(n)
    }
}

impl From<bool> for ObjectValue {
    fn from(b: bool) -> Self {
        ObjectValue::Boolean(b)
    }
}

impl From<Vec<u8>> for ObjectValue {
    fn from(b: Vec<u8>) -> Self {
        ObjectValue::Bytes(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_size_is_utf8_length() {
        assert_eq!(ObjectValue::String("abc".to_string()).size_bytes(), 3);
        // multibyte characters count their encoded length
        assert_eq!(ObjectValue::String("é".to_string()).size_bytes(), 2);
    }

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(ObjectValue::Number(42.0).size_bytes(), 8);
        assert_eq!(ObjectValue::Boolean(true).size_bytes(), 1);
        assert_eq!(ObjectValue::Bytes(vec![0; 10]).size_bytes(), 10);
    }

    #[test]
    fn test_json_size_is_serialized_length() {
        let v = ObjectValue::Json(serde_json::json!({"a": 1}));
        assert_eq!(v.size_bytes(), "{\"a\":1}".len());
    }

    #[test]
    fn test_object_ref_excluded_from_size() {
        let v = ObjectValue::ObjectRef("map:abc@123".to_string());
        assert_eq!(v.size_bytes(), 0);
        assert_eq!(v.object_ref(), Some("map:abc@123"));
    }
}
