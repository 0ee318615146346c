//! One network round trip per flushed part

use bytes::Bytes;
use parcel_core::*;
use std::sync::Arc;
use tracing::debug;

use crate::UploadSession;

/// Ships staged bytes to the store as numbered parts
#[derive(Clone)]
pub struct PartUploader {
    store: Arc<dyn ObjectStore>,
}

impl PartUploader {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        PartUploader { store }
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload `data` as `part_number` of the session's upload and record the
    /// returned tag on the session before returning it.
    ///
    /// The number is checked against the session before anything is sent.
    /// No retries are attempted.
    pub async fn upload_part(
        &self,
        session: &mut UploadSession,
        part_number: PartNumber,
        data: Bytes,
    ) -> Result<PartTag> {
        let upload_id = session.active_upload_id("upload a part")?.clone();
        let expected = session.next_part_number()?;
        if part_number != expected {
            return Err(ParcelError::InvalidPart {
                part_number: part_number.get(),
                reason: format!("expected part {}", expected),
            });
        }

        let len = data.len();
        let tag = self
            .store
            .upload_part(session.location(), &upload_id, part_number, data)
            .await?;
        debug!(
            upload_id = %upload_id,
            part = part_number.get(),
            bytes = len,
            "Uploaded part"
        );

        session.record_part(part_number, tag.clone())?;
        Ok(tag)
    }
}
