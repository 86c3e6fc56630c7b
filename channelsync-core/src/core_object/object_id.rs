/*
    object_id.rs - Object identity

    Object ids are opaque strings scoped to the channel: either the fixed
    "root" id, or "<type>:<hash>@<timestamp>" minted by the creating client,
    where <hash> covers the serialized initial value plus a random nonce.
    The type prefix lets a replica build a zero-value placeholder for an id it
    has never seen a create operation for.
*/

use crate::core_engine::errors::{ObjectsError, ObjectsResult};
use crate::core_object::types::Timestamp;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// The fixed id of the entry-point map of the shared object tree
pub const ROOT_OBJECT_ID: &str = "root";

/// The concrete type of a replicated object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    Map,
    Counter,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectType::Map => write!(f, "map"),
            ObjectType::Counter => write!(f, "counter"),
        }
    }
}

/// A parsed object id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectId {
    pub object_type: ObjectType,
    id: String,
}

impl ObjectId {
    /// Parse an object id string
    ///
    /// The root id parses as a map. Anything else must carry a known type
    /// prefix before the first ':'.
    pub fn parse(id: &str) -> ObjectsResult<Self> {
        if id.is_empty() {
            return Err(ObjectsError::protocol("Invalid object id: empty string"));
        }

        if id == ROOT_OBJECT_ID {
            return Ok(ObjectId {
                object_type: ObjectType::Map,
                id: id.to_string(),
            });
        }

        let (type_str, rest) = id
            .split_once(':')
            .ok_or_else(|| ObjectsError::protocol(format!("Invalid object id: {id}")))?;

        if rest.is_empty() {
            return Err(ObjectsError::protocol(format!("Invalid object id: {id}")));
        }

        let object_type = match type_str {
            "map" => ObjectType::Map,
            "counter" => ObjectType::Counter,
            other => {
                return Err(ObjectsError::protocol(format!(
                    "Invalid object id type prefix: {other}"
                )))
            }
        };

        Ok(ObjectId {
            object_type,
            id: id.to_string(),
        })
    }

    /// Mint a new object id from the serialized initial value of a create
    /// operation, a random nonce and the creation timestamp.
    pub fn from_initial_value(
        object_type: ObjectType,
        initial_value: &[u8],
        nonce: &str,
        timestamp: Timestamp,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(initial_value);
        hasher.update(nonce.as_bytes());
        let hash = hex::encode(hasher.finalize());

        ObjectId {
            object_type,
            id: format!("{}:{}@{}", object_type, hash, timestamp.as_millis()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
