//! Errors reported by the native lists.

use thiserror::Error;

use crate::arena::RecordId;

/// Errors produced by the foreign parameter and command lists.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NativeError {
    #[error("record {0} is not allocated")]
    StaleRecord(RecordId),

    #[error("parameter with id {id} on node {node} is already listed (with name {name})")]
    AlreadyListed { id: u16, node: u16, name: String },

    #[error("invalid parameter type code {0}")]
    InvalidParamType(u8),

    #[error("index {index} out of range for array of {len}")]
    OffsetOutOfRange { index: usize, len: usize },

    #[error("value of type {found} cannot be stored in a {expected} parameter")]
    ValueType {
        expected: &'static str,
        found: &'static str,
    },

    #[error("no command named '{0}'")]
    UnknownCommand(String),
}

/// Result type for native list operations.
pub type NativeResult<T> = Result<T, NativeError>;
