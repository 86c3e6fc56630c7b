/*
    errors.rs - Error types for the sync engine

    Every error carries a stable numeric code so callers can branch
    programmatically:

    - 40000 bad request (batch closed, echo disabled, malformed call)
    - 40003 invalid input type for a public write call
    - 40009 maximum message size exceeded
    - 40013 unsupported value type
    - 40024 missing channel capability mode
    - 90001 channel state precludes the operation
    - 92000 protocol inconsistency on inbound data (logged, not surfaced)
    - 50000 internal error
*/

use thiserror::Error;

/// Errors surfaced by the object sync engine
#[derive(Debug, Error)]
pub enum ObjectsError {
    /// Malformed input to a public API call
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A batch context or one of its wrapper objects was used after the
    /// batch callback completed
    #[error("Batch is closed")]
    BatchClosed,

    /// Echo of published messages is disabled on the connection; local
    /// writes would never be applied
    #[error("Echo of published messages must be enabled for this operation")]
    EchoDisabled,

    /// A public write call received a value of an invalid type
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The outbound message batch exceeds the transport's size limit
    #[error("Maximum size of object messages exceeded (was {size} bytes; limit is {limit} bytes)")]
    MaxMessageSizeExceeded { size: usize, limit: usize },

    /// A map value has a type the protocol cannot carry
    #[error("Unsupported value type: {0}")]
    UnsupportedValueType(String),

    /// The channel is missing a required capability mode
    #[error("\"{0}\" channel mode must be set for this operation")]
    MissingChannelMode(String),

    /// The channel is in a state that precludes the operation
    #[error("Channel is in an invalid state for this operation: {0}")]
    InvalidChannelState(String),

    /// Inbound data is inconsistent with the protocol (wrong target type,
    /// malformed serial or object id)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Publishing to the transport failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ObjectsError {
    /// Construct a protocol inconsistency error
    pub fn protocol(msg: impl Into<String>) -> Self {
        ObjectsError::Protocol(msg.into())
    }

    /// The stable numeric code for this error category
    pub fn code(&self) -> u32 {
        match self {
            ObjectsError::BadRequest(_) => 40000,
            ObjectsError::BatchClosed => 40000,
            ObjectsError::EchoDisabled => 40000,
            ObjectsError::InvalidInput(_) => 40003,
            ObjectsError::MaxMessageSizeExceeded { .. } => 40009,
            ObjectsError::UnsupportedValueType(_) => 40013,
            ObjectsError::MissingChannelMode(_) => 40024,
            ObjectsError::InvalidChannelState(_) => 90001,
            ObjectsError::Protocol(_) => 92000,
            ObjectsError::PublishFailed(_) => 50000,
            ObjectsError::Internal(_) => 50000,
        }
    }

    /// HTTP-like status code for this error category
    pub fn status_code(&self) -> u16 {
        match self.code() {
            40000..=40999 => 400,
            90001 => 400,
            _ => 500,
        }
    }
}

/// Result type for engine operations
pub type ObjectsResult<T> = Result<T, ObjectsError>;
