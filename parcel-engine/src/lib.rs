//! Embedded multipart object store built on fjall

use fjall::{Config, Keyspace, PersistMode};
use parcel_core::*;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

pub mod bucket;
pub mod local;
pub mod storage;

pub use bucket::*;
pub use local::*;
pub use storage::*;

/// Storage engine wrapping fjall keyspace
#[derive(Clone)]
pub struct StorageEngine {
    keyspace: Arc<Keyspace>,
    config: EngineConfig,
    // Chunk reference counts are read-modify-write
    write_lock: Arc<Mutex<()>>,
}

impl StorageEngine {
    /// Create new storage engine at the given path
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(path, EngineConfig::default())
    }

    /// Create new storage engine with explicit settings
    pub fn with_config(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        let keyspace = Arc::new(
            Config::new(path)
                .open()
                .map_err(|e| ParcelError::Storage(e.to_string()))?,
        );

        Ok(StorageEngine {
            keyspace,
            config,
            write_lock: Arc::new(Mutex::new(())),
        })
    }

    /// Create temporary storage engine for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp() -> Result<(Self, tempfile::TempDir)> {
        Self::temp_with_config(EngineConfig::default())
    }

    /// Create temporary storage engine with explicit settings for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn temp_with_config(config: EngineConfig) -> Result<(Self, tempfile::TempDir)> {
        let temp_dir = tempfile::tempdir().map_err(|e| ParcelError::Internal(e.to_string()))?;
        let engine = Self::with_config(temp_dir.path(), config)?;
        Ok((engine, temp_dir))
    }

    /// Create or get bucket
    pub fn bucket(&self, bucket_id: &BucketId) -> Result<Bucket> {
        Bucket::new(self.clone(), bucket_id.clone())
    }

    /// Get the underlying keyspace
    pub(crate) fn keyspace(&self) -> &Keyspace {
        &self.keyspace
    }

    /// Serialize mutations that touch chunk reference counts
    pub(crate) fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Persist all changes to disk
    pub fn persist(&self) -> Result<()> {
        self.keyspace
            .persist(PersistMode::SyncAll)
            .map_err(|e| ParcelError::Storage(e.to_string()))
    }
}
