//! Client error types

use parcel_core::ParcelError;
use thiserror::Error;

use crate::SinkState;

#[derive(Error, Debug)]
pub enum ClientError {
    /// The sink already left the `Open` state
    #[error("Write sink is {state}, no further operations are accepted")]
    SinkClosed { state: SinkState },

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Core error: {0}")]
    Core(#[from] ParcelError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ClientError {
    /// Returns true when the caller misused the API rather than the store
    /// or the network failing
    pub fn is_usage_error(&self) -> bool {
        match self {
            ClientError::SinkClosed { .. } => true,
            ClientError::Core(e) => e.is_usage_error(),
            _ => false,
        }
    }

    /// The underlying store error, if this is one
    pub fn as_core(&self) -> Option<&ParcelError> {
        match self {
            ClientError::Core(e) => Some(e),
            _ => None,
        }
    }
}
