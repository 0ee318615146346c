//! Core data models, configuration and the object-store seam for Parcel

pub mod config;
pub mod error;
pub mod store;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::*;
pub use error::*;
pub use store::*;
pub use types::*;

/// Result type alias for Parcel operations
pub type Result<T> = std::result::Result<T, ParcelError>;
