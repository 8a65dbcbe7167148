use parambridge_native::{CommandStatus, NativeError, RecordId};
use thiserror::Error;

/// Result alias used throughout the bridge.
pub type BridgeResult<T> = Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    // ========== CONSTRUCTION ==========
    #[error("Duplicate identity: {message}")]
    DuplicateIdentity { message: String },

    #[error("Shape mismatch: {message}")]
    ShapeMismatch { message: String },

    #[error("Invalid callback signature: {message}")]
    InvalidCallbackSignature { message: String },

    #[error("No parameter found for {0}")]
    NotFound(String),

    // ========== DISPATCH ==========
    #[error("Invalid value '{value}' for argument '{argument}' of '{function}()': {reason}")]
    ArgumentCoercion {
        function: String,
        argument: String,
        value: String,
        reason: String,
    },

    #[error("Error calling script callback")]
    CallbackPropagation {
        #[source]
        source: Box<BridgeError>,
    },

    #[error("{message}")]
    Script { message: String },

    #[error("Command '{name}' failed with status {status:?}")]
    CommandFailed { name: String, status: CommandStatus },

    // ========== ACCESS ==========
    #[error("Array parameter index {index} out of range for length {len}")]
    IndexOutOfRange { index: i64, len: usize },

    #[error("Type mismatch: {message}")]
    TypeMismatch { message: String },

    #[error("No response from node {node}")]
    NoResponse { node: u16 },

    #[error("Handle for '{name}' has been destroyed")]
    HandleDestroyed { name: String },

    // ========== INVARIANTS ==========
    #[error("Use after free: record {record} is referenced by a handle but owned by no one")]
    UseAfterFree { record: RecordId },

    // ========== ENVIRONMENT ==========
    #[error("Invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Native(#[from] NativeError),
}

impl BridgeError {
    /// Error raised from user code.
    pub fn script(message: impl Into<String>) -> Self {
        BridgeError::Script {
            message: message.into(),
        }
    }

    /// Chain an error raised inside a dispatched callback.
    pub fn propagated(source: BridgeError) -> Self {
        BridgeError::CallbackPropagation {
            source: Box::new(source),
        }
    }

    /// Innermost error of a propagation chain.
    pub fn root_cause(&self) -> &BridgeError {
        match self {
            BridgeError::CallbackPropagation { source } => source.root_cause(),
            other => other,
        }
    }

    pub fn is_propagated(&self) -> bool {
        matches!(self, BridgeError::CallbackPropagation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_propagation_chain() {
        let err = BridgeError::propagated(BridgeError::script("boom"));
        assert!(err.is_propagated());
        assert_eq!(err.to_string(), "Error calling script callback");
        assert_eq!(err.source().map(|s| s.to_string()), Some("boom".to_string()));
        assert!(matches!(err.root_cause(), BridgeError::Script { .. }));
    }

    #[test]
    fn test_native_conversion() {
        let err: BridgeError = NativeError::InvalidParamType(99).into();
        assert_eq!(err.to_string(), "invalid parameter type code 99");
    }
}
