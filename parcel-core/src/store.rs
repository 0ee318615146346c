//! The seam between write sinks and whatever holds the objects

use async_trait::async_trait;
use bytes::Bytes;

use crate::types::*;

/// Target of a multipart upload
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: BucketId,
    pub key: Key,
}

impl ObjectLocation {
    pub fn new(bucket: BucketId, key: Key) -> Self {
        ObjectLocation { bucket, key }
    }

    /// Parse and validate a bucket/key pair
    pub fn parse(bucket: &str, key: &str) -> crate::Result<Self> {
        Ok(ObjectLocation {
            bucket: BucketId::new(bucket)?,
            key: Key::new(key)?,
        })
    }
}

impl std::fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Multipart upload protocol of an immutable-object store.
///
/// Each call is one round trip. Implementations perform no retries and must
/// be shareable across many concurrent sinks.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Start an upload and return its id
    async fn initiate_upload(&self, location: &ObjectLocation) -> crate::Result<UploadId>;

    /// Store one part and return the tag the completion manifest must quote
    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: Bytes,
    ) -> crate::Result<PartTag>;

    /// Assemble the listed parts, in order, into the object at `location`
    async fn complete_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> crate::Result<ObjectMetadata>;

    /// Discard the upload and every part staged under it
    async fn abort_upload(&self, location: &ObjectLocation, upload_id: &UploadId) -> crate::Result<()>;
}
