//! Bucket abstraction over fjall partitions
//!
//! A bucket keeps everything in one partition:
//!
//! - `meta:{key}` committed object record (JSON)
//! - `upload:{id}` pending upload (JSON)
//! - `chunk:{hash}` part body, content-addressed
//! - `chunkref:{hash}` little-endian u32 reference count
//!
//! Staged parts and committed objects share chunks. Completing an upload
//! moves the references of its listed parts to the object without copying
//! any part body.

use fjall::{Batch, PartitionCreateOptions, PartitionHandle};
use parcel_core::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::StorageEngine;

/// Committed object as the engine stores it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub metadata: ObjectMetadata,
    pub chunks: Vec<ContentHash>,
}

/// Bucket represents a multi-tenant boundary
pub struct Bucket {
    id: BucketId,
    pub(crate) main_partition: Arc<PartitionHandle>,
    engine: StorageEngine,
}

impl Bucket {
    /// Create or open bucket
    pub(crate) fn new(engine: StorageEngine, id: BucketId) -> Result<Self> {
        let partition_name = format!("{}_main", id.as_str());

        let main_partition = Arc::new(
            engine
                .keyspace()
                .open_partition(&partition_name, PartitionCreateOptions::default())
                .map_err(|e| ParcelError::Storage(e.to_string()))?,
        );

        Ok(Bucket {
            id,
            main_partition,
            engine,
        })
    }

    /// Get bucket ID
    pub fn id(&self) -> &BucketId {
        &self.id
    }

    /// Register a new pending upload for `key`
    pub fn create_upload(&self, key: &Key) -> Result<PendingUpload> {
        let upload = PendingUpload::new(UploadId::generate(), self.id.clone(), key.clone());
        let upload_json = serde_json::to_vec(&upload)?;

        self.main_partition
            .insert(self.upload_key(&upload.upload_id), upload_json)
            .map_err(|e| ParcelError::Storage(e.to_string()))?;
        self.engine.persist()?;

        Ok(upload)
    }

    /// Get a pending upload by id
    pub fn get_upload(&self, upload_id: &UploadId) -> Result<Option<PendingUpload>> {
        match self.main_partition.get(self.upload_key(upload_id)) {
            Ok(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ParcelError::Storage(e.to_string())),
        }
    }

    /// List every pending upload in this bucket
    pub fn list_uploads(&self) -> Result<Vec<PendingUpload>> {
        let mut uploads = Vec::new();
        for item in self.main_partition.prefix(b"upload:") {
            let (_key, value) = item.map_err(|e| ParcelError::Storage(format!("Scan error: {}", e)))?;
            uploads.push(serde_json::from_slice(&value)?);
        }
        Ok(uploads)
    }

    /// Store one part body under a pending upload. A part uploaded again
    /// under the same number replaces the previous one.
    pub fn stage_part(
        &self,
        key: &Key,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: &[u8],
    ) -> Result<StagedPart> {
        let _guard = self.engine.lock_writes();
        let mut upload = self.load_upload(key, upload_id)?;

        let hash = ContentHash::new(data);
        let staged = StagedPart {
            part_number,
            size: data.len() as u64,
            part_tag: PartTag::from(&hash),
        };

        let mut deltas = HashMap::new();
        *deltas.entry(hash.clone()).or_insert(0) += 1;
        if let Some(previous) = upload.part(part_number) {
            *deltas
                .entry(ContentHash::from_hex(previous.part_tag.as_str())?)
                .or_insert(0) -= 1;
        }
        upload.add_part(staged.clone());

        let mut batch = self.engine.keyspace().batch();
        self.apply_ref_deltas(&mut batch, deltas, Some((&hash, data)))?;
        batch.insert(
            &self.main_partition,
            self.upload_key(upload_id),
            serde_json::to_vec(&upload)?,
        );
        batch
            .commit()
            .map_err(|e| ParcelError::Storage(e.to_string()))?;
        self.engine.persist()?;

        debug!(
            "Staged part {} of upload {} ({} bytes)",
            part_number, upload_id, staged.size
        );
        Ok(staged)
    }

    /// Assemble the listed parts into the object at `key` and retire the
    /// upload. Staged parts missing from the manifest are discarded.
    pub fn complete_upload(
        &self,
        key: &Key,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> Result<ObjectMetadata> {
        let _guard = self.engine.lock_writes();
        let upload = self.load_upload(key, upload_id)?;

        if parts.is_empty() {
            return Err(ParcelError::InvalidManifest("no parts listed".to_string()));
        }
        if parts.windows(2).any(|w| w[0].part_number >= w[1].part_number) {
            return Err(ParcelError::InvalidManifest(
                "part numbers must be strictly ascending".to_string(),
            ));
        }

        let mut chunks = Vec::with_capacity(parts.len());
        for part in parts {
            let staged = upload
                .part(part.part_number)
                .ok_or_else(|| ParcelError::InvalidPart {
                    part_number: part.part_number.get(),
                    reason: "part was never uploaded".to_string(),
                })?;
            if staged.part_tag != part.part_tag {
                return Err(ParcelError::InvalidPart {
                    part_number: part.part_number.get(),
                    reason: format!(
                        "tag mismatch: staged {}, listed {}",
                        staged.part_tag, part.part_tag
                    ),
                });
            }
            chunks.push(ContentHash::from_hex(staged.part_tag.as_str())?);
        }

        // Whole-object hash, one chunk in memory at a time
        let mut hasher = blake3::Hasher::new();
        let mut size = 0u64;
        for hash in &chunks {
            let chunk = self.get_chunk(hash)?.ok_or_else(|| {
                ParcelError::Storage(format!("Missing chunk: {}", hash.to_hex()))
            })?;
            hasher.update(&chunk);
            size += chunk.len() as u64;
        }

        let listed: HashSet<PartNumber> = parts.iter().map(|p| p.part_number).collect();
        let mut deltas: HashMap<ContentHash, i64> = HashMap::new();
        for staged in upload.parts.iter().filter(|p| !listed.contains(&p.part_number)) {
            *deltas
                .entry(ContentHash::from_hex(staged.part_tag.as_str())?)
                .or_insert(0) -= 1;
        }
        if let Some(replaced) = self.get_record(key)? {
            for hash in replaced.chunks {
                *deltas.entry(hash).or_insert(0) -= 1;
            }
        }

        let metadata = ObjectMetadata::new(size, ContentHash::from_hasher(&hasher), chunks.len() as u32);
        let record = ObjectRecord {
            metadata: metadata.clone(),
            chunks,
        };

        let mut batch = self.engine.keyspace().batch();
        self.apply_ref_deltas(&mut batch, deltas, None)?;
        batch.insert(
            &self.main_partition,
            self.metadata_key(key),
            serde_json::to_vec(&record)?,
        );
        batch.remove(&self.main_partition, self.upload_key(upload_id));
        batch
            .commit()
            .map_err(|e| ParcelError::Storage(e.to_string()))?;
        self.engine.persist()?;

        Ok(metadata)
    }

    /// Drop a pending upload and release its staged parts
    pub fn abort_upload(&self, key: &Key, upload_id: &UploadId) -> Result<()> {
        let _guard = self.engine.lock_writes();
        let upload = self.load_upload(key, upload_id)?;

        let mut deltas: HashMap<ContentHash, i64> = HashMap::new();
        for staged in &upload.parts {
            *deltas
                .entry(ContentHash::from_hex(staged.part_tag.as_str())?)
                .or_insert(0) -= 1;
        }

        let mut batch = self.engine.keyspace().batch();
        self.apply_ref_deltas(&mut batch, deltas, None)?;
        batch.remove(&self.main_partition, self.upload_key(upload_id));
        batch
            .commit()
            .map_err(|e| ParcelError::Storage(e.to_string()))?;
        self.engine.persist()?;

        Ok(())
    }

    /// Get object metadata
    pub fn get_metadata(&self, key: &Key) -> Result<Option<ObjectMetadata>> {
        Ok(self.get_record(key)?.map(|record| record.metadata))
    }

    /// Get object body, reassembled from its chunks
    pub fn get_object(&self, key: &Key) -> Result<Option<Vec<u8>>> {
        let record = match self.get_record(key)? {
            Some(record) => record,
            None => return Ok(None),
        };

        let mut data = Vec::with_capacity(record.metadata.size as usize);
        for hash in &record.chunks {
            match self.get_chunk(hash)? {
                Some(chunk) => data.extend(chunk),
                None => {
                    return Err(ParcelError::Storage(format!(
                        "Missing chunk: {}",
                        hash.to_hex()
                    )))
                }
            }
        }

        Ok(Some(data))
    }

    /// Get chunk by hash
    pub fn get_chunk(&self, hash: &ContentHash) -> Result<Option<Vec<u8>>> {
        match self.main_partition.get(self.chunk_key(hash)) {
            Ok(Some(data)) => Ok(Some(data.to_vec())),
            Ok(None) => Ok(None),
            Err(e) => Err(ParcelError::Storage(e.to_string())),
        }
    }

    /// Number of staged parts and objects referencing a chunk
    pub fn ref_count(&self, hash: &ContentHash) -> Result<u32> {
        match self.main_partition.get(self.chunk_ref_key(hash)) {
            Ok(Some(data)) => {
                let bytes = <[u8; 4]>::try_from(&data[..]).map_err(|_| {
                    ParcelError::Storage(format!("Corrupt reference count for {}", hash.to_hex()))
                })?;
                Ok(u32::from_le_bytes(bytes))
            }
            Ok(None) => Ok(0),
            Err(e) => Err(ParcelError::Storage(e.to_string())),
        }
    }

    fn get_record(&self, key: &Key) -> Result<Option<ObjectRecord>> {
        match self.main_partition.get(self.metadata_key(key)) {
            Ok(Some(data)) => Ok(Some(serde_json::from_slice(&data)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(ParcelError::Storage(e.to_string())),
        }
    }

    /// Load a pending upload, treating one that targets another key as unknown
    fn load_upload(&self, key: &Key, upload_id: &UploadId) -> Result<PendingUpload> {
        match self.get_upload(upload_id)? {
            Some(upload) if &upload.key == key => Ok(upload),
            _ => Err(ParcelError::UploadNotFound {
                upload_id: upload_id.to_string(),
            }),
        }
    }

    /// Queue reference count changes. A chunk whose count drops to zero is
    /// removed; a chunk gaining its first reference is written from `body`.
    fn apply_ref_deltas(
        &self,
        batch: &mut Batch,
        deltas: HashMap<ContentHash, i64>,
        body: Option<(&ContentHash, &[u8])>,
    ) -> Result<()> {
        for (hash, delta) in deltas {
            if delta == 0 {
                continue;
            }

            let current = i64::from(self.ref_count(&hash)?);
            let next = current + delta;

            if next <= 0 {
                batch.remove(&self.main_partition, self.chunk_key(&hash));
                batch.remove(&self.main_partition, self.chunk_ref_key(&hash));
                continue;
            }

            if current == 0 {
                match body {
                    Some((body_hash, data)) if *body_hash == hash => {
                        batch.insert(&self.main_partition, self.chunk_key(&hash), data);
                    }
                    _ => {
                        return Err(ParcelError::Internal(format!(
                            "no body for new chunk {}",
                            hash.to_hex()
                        )))
                    }
                }
            }
            batch.insert(
                &self.main_partition,
                self.chunk_ref_key(&hash),
                (next as u32).to_le_bytes().to_vec(),
            );
        }
        Ok(())
    }

    // Helper methods for key formatting
    fn metadata_key(&self, key: &Key) -> Vec<u8> {
        format!("meta:{}", key.as_str()).into_bytes()
    }

    fn upload_key(&self, upload_id: &UploadId) -> Vec<u8> {
        format!("upload:{}", upload_id.as_str()).into_bytes()
    }

    fn chunk_key(&self, hash: &ContentHash) -> Vec<u8> {
        format!("chunk:{}", hash.to_hex()).into_bytes()
    }

    fn chunk_ref_key(&self, hash: &ContentHash) -> Vec<u8> {
        format!("chunkref:{}", hash.to_hex()).into_bytes()
    }
}
