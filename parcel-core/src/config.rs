//! Configuration consumed by write sinks and the storage engine

use serde::{Deserialize, Serialize};

use crate::ParcelError;

/// Default flush threshold for a write sink (512 MiB)
pub const DEFAULT_MINIMUM_PART_SIZE: usize = 512 * 1024 * 1024;

/// Default initial allocation of the staging buffer (1 MiB)
pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

/// Upper bound on the initial staging allocation; the buffer still grows past it
pub const MAX_BUFFER_SIZE_HINT: usize = 64 * 1024 * 1024;

/// Default largest part the engine accepts (2 GiB)
pub const DEFAULT_MAX_PART_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// A staged part is stored as one fjall value, which must stay below 4 GiB
pub const PART_SIZE_CEILING: u64 = u32::MAX as u64;

/// Write sink settings, fixed at construction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    /// Buffered byte count that triggers a part upload
    pub minimum_part_size: usize,
    /// Initial staging buffer allocation, not a cap
    pub buffer_size_hint: usize,
    /// Abort the remote upload before reporting a network failure
    pub abort_on_failure: bool,
}

impl Default for SinkConfig {
    fn default() -> Self {
        SinkConfig {
            minimum_part_size: DEFAULT_MINIMUM_PART_SIZE,
            buffer_size_hint: DEFAULT_BUFFER_SIZE,
            abort_on_failure: true,
        }
    }
}

impl SinkConfig {
    /// Config with the given flush threshold and default everything else
    pub fn with_part_size(minimum_part_size: usize) -> Self {
        SinkConfig {
            minimum_part_size,
            buffer_size_hint: minimum_part_size.min(DEFAULT_BUFFER_SIZE),
            ..Default::default()
        }
    }

    pub fn abort_on_failure(mut self, enabled: bool) -> Self {
        self.abort_on_failure = enabled;
        self
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.minimum_part_size == 0 {
            return Err(ParcelError::InvalidConfig(
                "minimum_part_size must be greater than zero".to_string(),
            ));
        }
        if self.buffer_size_hint > MAX_BUFFER_SIZE_HINT {
            return Err(ParcelError::InvalidConfig(format!(
                "buffer_size_hint {} exceeds {}",
                self.buffer_size_hint, MAX_BUFFER_SIZE_HINT
            )));
        }
        Ok(())
    }

    /// Bytes to reserve up front for the staging buffer
    pub fn initial_allocation(&self) -> usize {
        self.buffer_size_hint.min(self.minimum_part_size)
    }
}

/// Storage engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Largest part body accepted by `upload_part`
    pub max_part_size: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_part_size: DEFAULT_MAX_PART_SIZE,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_part_size == 0 || self.max_part_size > PART_SIZE_CEILING {
            return Err(ParcelError::InvalidConfig(format!(
                "max_part_size must be between 1 and {}, got {}",
                PART_SIZE_CEILING, self.max_part_size
            )));
        }
        Ok(())
    }
}
