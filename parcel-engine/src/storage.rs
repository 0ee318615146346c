//! High-level storage operations

use parcel_core::*;
use tracing::info;

use crate::StorageEngine;

/// High-level storage interface
#[derive(Clone)]
pub struct Storage {
    engine: StorageEngine,
}

impl Storage {
    /// Create new storage instance
    pub fn new(engine: StorageEngine) -> Self {
        Storage { engine }
    }

    pub fn config(&self) -> &EngineConfig {
        self.engine.config()
    }

    /// Start a multipart upload for `key`
    pub fn initiate_upload(&self, bucket_id: &BucketId, key: &Key) -> Result<UploadId> {
        let bucket = self.engine.bucket(bucket_id)?;
        let upload = bucket.create_upload(key)?;

        info!(
            "Initiated upload {} for {}/{}",
            upload.upload_id, bucket_id, key
        );
        Ok(upload.upload_id)
    }

    /// Stage one part of a pending upload
    pub fn upload_part(
        &self,
        bucket_id: &BucketId,
        key: &Key,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: &[u8],
    ) -> Result<PartTag> {
        let limit = self.engine.config().max_part_size;
        if data.len() as u64 > limit {
            return Err(ParcelError::InvalidPart {
                part_number: part_number.get(),
                reason: format!("{} bytes exceeds the part size limit of {}", data.len(), limit),
            });
        }

        let bucket = self.engine.bucket(bucket_id)?;
        let staged = bucket.stage_part(key, upload_id, part_number, data)?;
        Ok(staged.part_tag)
    }

    /// Commit a pending upload as the object at `key`
    pub fn complete_upload(
        &self,
        bucket_id: &BucketId,
        key: &Key,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let bucket = self.engine.bucket(bucket_id)?;
        let metadata = bucket.complete_upload(key, upload_id, parts)?;

        info!(
            "Completed upload {} as {}/{} ({} bytes, {} parts)",
            upload_id, bucket_id, key, metadata.size, metadata.part_count
        );
        Ok(metadata)
    }

    /// Discard a pending upload
    pub fn abort_upload(&self, bucket_id: &BucketId, key: &Key, upload_id: &UploadId) -> Result<()> {
        let bucket = self.engine.bucket(bucket_id)?;
        bucket.abort_upload(key, upload_id)?;

        info!("Aborted upload {} for {}/{}", upload_id, bucket_id, key);
        Ok(())
    }

    /// List uploads that are neither completed nor aborted
    pub fn list_uploads(&self, bucket_id: &BucketId) -> Result<Vec<PendingUpload>> {
        self.engine.bucket(bucket_id)?.list_uploads()
    }

    /// Get object data
    pub fn get_object(&self, bucket_id: &BucketId, key: &Key) -> Result<Option<Vec<u8>>> {
        self.engine.bucket(bucket_id)?.get_object(key)
    }

    /// Get object metadata
    pub fn get_metadata(&self, bucket_id: &BucketId, key: &Key) -> Result<Option<ObjectMetadata>> {
        self.engine.bucket(bucket_id)?.get_metadata(key)
    }

    /// Get storage engine reference
    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }
}
