//! In-process [`ObjectStore`] over the storage engine

use async_trait::async_trait;
use bytes::Bytes;
use parcel_core::*;

use crate::{Storage, StorageEngine};

/// Serves the multipart protocol straight from a local [`Storage`].
///
/// fjall calls block, so every operation runs on tokio's blocking pool.
#[derive(Clone)]
pub struct LocalStore {
    storage: Storage,
}

impl LocalStore {
    pub fn new(engine: StorageEngine) -> Self {
        LocalStore {
            storage: Storage::new(engine),
        }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Read a committed object
    pub async fn get_object(&self, location: &ObjectLocation) -> Result<Option<Vec<u8>>> {
        let location = location.clone();
        self.run(move |storage| storage.get_object(&location.bucket, &location.key))
            .await
    }

    /// Uploads in `bucket` that were neither completed nor aborted
    pub async fn list_uploads(&self, bucket: &BucketId) -> Result<Vec<PendingUpload>> {
        let bucket = bucket.clone();
        self.run(move |storage| storage.list_uploads(&bucket)).await
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(Storage) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || op(storage))
            .await
            .map_err(|e| ParcelError::Internal(format!("storage task failed: {}", e)))?
    }
}

#[async_trait]
impl ObjectStore for LocalStore {
    async fn initiate_upload(&self, location: &ObjectLocation) -> Result<UploadId> {
        let location = location.clone();
        self.run(move |storage| storage.initiate_upload(&location.bucket, &location.key))
            .await
    }

    async fn upload_part(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: Bytes,
    ) -> Result<PartTag> {
        let location = location.clone();
        let upload_id = upload_id.clone();
        self.run(move |storage| {
            storage.upload_part(&location.bucket, &location.key, &upload_id, part_number, &data)
        })
        .await
    }

    async fn complete_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let location = location.clone();
        let upload_id = upload_id.clone();
        let parts = parts.to_vec();
        self.run(move |storage| {
            storage.complete_upload(&location.bucket, &location.key, &upload_id, &parts)
        })
        .await
    }

    async fn abort_upload(&self, location: &ObjectLocation, upload_id: &UploadId) -> Result<()> {
        let location = location.clone();
        let upload_id = upload_id.clone();
        self.run(move |storage| storage.abort_upload(&location.bucket, &location.key, &upload_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_store_protocol() {
        let (engine, _temp) = StorageEngine::temp().unwrap();
        let store = LocalStore::new(engine);
        let location = ObjectLocation::parse("test-bucket", "obj").unwrap();

        let upload_id = store.initiate_upload(&location).await.unwrap();
        let tag = store
            .upload_part(&location, &upload_id, PartNumber::FIRST, Bytes::from_static(b"abc"))
            .await
            .unwrap();
        let metadata = store
            .complete_upload(&location, &upload_id, &[CompletedPart::new(PartNumber::FIRST, tag)])
            .await
            .unwrap();

        assert_eq!(metadata.size, 3);
        assert_eq!(store.get_object(&location).await.unwrap().unwrap(), b"abc");
        assert!(store.list_uploads(&location.bucket).await.unwrap().is_empty());
    }
}
