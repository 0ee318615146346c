//! Error types for Parcel

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParcelError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Upload not found: {upload_id}")]
    UploadNotFound { upload_id: String },

    #[error("Invalid part {part_number}: {reason}")]
    InvalidPart { part_number: u32, reason: String },

    #[error("Invalid completion manifest: {0}")]
    InvalidManifest(String),

    #[error("Too many parts: limit is {limit}")]
    TooManyParts { limit: u32 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An operation was attempted in a state that does not allow it
    #[error("Cannot {operation} in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Store rejected request ({status}): {message}")]
    Remote { status: u16, message: String },

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ParcelError {
    /// Returns true for misuse of the API: bad config, bad names, or calls
    /// in the wrong state. These never reach the network and never change
    /// sink state. Running out of part numbers is a limit failure, not misuse.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            ParcelError::InvalidConfig(_)
                | ParcelError::InvalidState { .. }
                | ParcelError::InvalidBucketName(_)
                | ParcelError::InvalidKey(_)
        )
    }

    /// Returns true if a caller could reasonably retry the failed request
    pub fn is_retryable(&self) -> bool {
        match self {
            ParcelError::Transport(_) | ParcelError::Io(_) => true,
            ParcelError::Remote { status, .. } => *status >= 500,
            _ => false,
        }
    }
}
