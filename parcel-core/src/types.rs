//! Core data types for Parcel

use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use crate::ParcelError;

/// Highest part number a multipart upload may use
pub const MAX_PART_NUMBER: u32 = 10_000;

/// Longest bucket name, in bytes
pub const MAX_BUCKET_NAME_LEN: usize = 63;

/// Longest object key, in bytes
pub const MAX_KEY_LEN: usize = 1024;

/// Unique bucket identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketId(String);

impl BucketId {
    /// Create a new bucket ID with validation
    pub fn new(name: &str) -> crate::Result<Self> {
        if name.is_empty() {
            return Err(ParcelError::InvalidBucketName("empty name".to_string()));
        }

        if name.len() > MAX_BUCKET_NAME_LEN {
            return Err(ParcelError::InvalidBucketName(format!(
                "longer than {} bytes",
                MAX_BUCKET_NAME_LEN
            )));
        }

        // ASCII alphanumeric, hyphens, underscores only
        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ParcelError::InvalidBucketName(format!(
                "invalid characters in '{}'",
                name
            )));
        }

        Ok(BucketId(name.to_string()))
    }

    /// Get the bucket name as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object key within a bucket
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(String);

impl Key {
    /// Create a new key with validation
    pub fn new(key: &str) -> crate::Result<Self> {
        if key.is_empty() {
            return Err(ParcelError::InvalidKey("empty key".to_string()));
        }

        if key.len() > MAX_KEY_LEN {
            return Err(ParcelError::InvalidKey(format!(
                "{} bytes exceeds the limit of {}",
                key.len(),
                MAX_KEY_LEN
            )));
        }

        if key.chars().any(|c| c.is_control()) {
            return Err(ParcelError::InvalidKey(
                "control characters not allowed".to_string(),
            ));
        }

        Ok(Key(key.to_string()))
    }

    /// Get the key as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Version identifier using ULID for time-ordering
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(ulid::Ulid);

impl Version {
    /// Generate a new version with current timestamp
    pub fn new() -> Self {
        Version(ulid::Ulid::new())
    }

    /// Get timestamp component
    pub fn timestamp(&self) -> u64 {
        self.0.timestamp_ms()
    }
}

impl Default for Version {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Content hash for integrity verification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Create hash from data using BLAKE3
    pub fn new(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        ContentHash(hash.into())
    }

    /// Create from a finished incremental hasher
    pub fn from_hasher(hasher: &blake3::Hasher) -> Self {
        ContentHash(hasher.finalize().into())
    }

    /// Parse a hash from its hex form
    pub fn from_hex(hex: &str) -> crate::Result<Self> {
        blake3::Hash::from_hex(hex)
            .map(|hash| ContentHash(hash.into()))
            .map_err(|e| ParcelError::Internal(format!("invalid content hash '{}': {}", hex, e)))
    }

    /// Get hash as bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Get hash as hex string
    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }
}

/// Store-assigned identifier of one multipart upload session
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct UploadId(String);

impl UploadId {
    /// Wrap an id returned by a store. An empty id is a protocol violation.
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(ParcelError::ProtocolViolation(
                "store returned an empty upload id".to_string(),
            ));
        }
        if id.chars().any(|c| c.is_control() || c == '/') {
            return Err(ParcelError::ProtocolViolation(format!(
                "malformed upload id '{}'",
                id.escape_debug()
            )));
        }
        Ok(UploadId(id))
    }

    /// Issue a fresh, time-ordered upload id
    pub fn generate() -> Self {
        UploadId(ulid::Ulid::new().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UploadId {
    type Error = ParcelError;

    fn try_from(id: String) -> crate::Result<Self> {
        UploadId::new(id)
    }
}

impl std::fmt::Display for UploadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 1-based position of a part within an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct PartNumber(u32);

impl PartNumber {
    /// The first part of every upload
    pub const FIRST: PartNumber = PartNumber(1);

    /// Create a part number, rejecting 0 and anything above [`MAX_PART_NUMBER`]
    pub fn new(n: u32) -> crate::Result<Self> {
        if n == 0 {
            return Err(ParcelError::InvalidPart {
                part_number: n,
                reason: "part numbers start at 1".to_string(),
            });
        }
        if n > MAX_PART_NUMBER {
            return Err(ParcelError::TooManyParts {
                limit: MAX_PART_NUMBER,
            });
        }
        Ok(PartNumber(n))
    }

    /// The number following this one
    pub fn next(self) -> crate::Result<Self> {
        PartNumber::new(self.0 + 1)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl TryFrom<u32> for PartNumber {
    type Error = ParcelError;

    fn try_from(n: u32) -> crate::Result<Self> {
        PartNumber::new(n)
    }
}

impl From<PartNumber> for u32 {
    fn from(n: PartNumber) -> u32 {
        n.0
    }
}

impl std::fmt::Display for PartNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-part identifier returned by the store (ETag equivalent)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct PartTag(String);

impl PartTag {
    /// Wrap a tag returned by a store. An empty tag is a protocol violation.
    pub fn new(tag: impl Into<String>) -> crate::Result<Self> {
        let tag = tag.into();
        if tag.is_empty() {
            return Err(ParcelError::ProtocolViolation(
                "store returned an empty part tag".to_string(),
            ));
        }
        Ok(PartTag(tag))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PartTag {
    type Error = ParcelError;

    fn try_from(tag: String) -> crate::Result<Self> {
        PartTag::new(tag)
    }
}

impl From<&ContentHash> for PartTag {
    fn from(hash: &ContentHash) -> Self {
        PartTag(hash.to_hex())
    }
}

impl std::fmt::Display for PartTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A part the store acknowledged, as listed in the completion manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: PartNumber,
    pub part_tag: PartTag,
}

impl CompletedPart {
    pub fn new(part_number: PartNumber, part_tag: PartTag) -> Self {
        CompletedPart {
            part_number,
            part_tag,
        }
    }
}

/// Body of a completion request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteManifest {
    pub parts: Vec<CompletedPart>,
}

/// Response body of an initiate request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InitiateUploadResponse {
    pub upload_id: UploadId,
}

/// Response body of a part upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadPartResponse {
    pub part_number: PartNumber,
    pub part_tag: PartTag,
}

/// Body of every non-success HTTP response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Metadata of a committed object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMetadata {
    pub size: u64,
    pub version: Version,
    pub content_hash: ContentHash,
    pub part_count: u32,
    pub created_at: SystemTime,
}

impl ObjectMetadata {
    /// Create metadata for an object assembled from `part_count` parts
    pub fn new(size: u64, content_hash: ContentHash, part_count: u32) -> Self {
        ObjectMetadata {
            size,
            version: Version::new(),
            content_hash,
            part_count,
            created_at: SystemTime::now(),
        }
    }
}

/// Information about a part staged in a pending upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagedPart {
    pub part_number: PartNumber,
    pub size: u64,
    pub part_tag: PartTag,
}

/// Store-side state of an upload that has been initiated but not completed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingUpload {
    pub upload_id: UploadId,
    pub bucket: BucketId,
    pub key: Key,
    pub parts: Vec<StagedPart>,
    pub created_at: SystemTime,
}

impl PendingUpload {
    /// Create new pending upload
    pub fn new(upload_id: UploadId, bucket: BucketId, key: Key) -> Self {
        PendingUpload {
            upload_id,
            bucket,
            key,
            parts: Vec::new(),
            created_at: SystemTime::now(),
        }
    }

    /// Record a staged part. Re-uploading a part number replaces the
    /// earlier part.
    pub fn add_part(&mut self, part: StagedPart) {
        self.parts.retain(|p| p.part_number != part.part_number);
        self.parts.push(part);
        self.parts.sort_by_key(|p| p.part_number);
    }

    /// Find a staged part by number
    pub fn part(&self, part_number: PartNumber) -> Option<&StagedPart> {
        self.parts.iter().find(|p| p.part_number == part_number)
    }

    /// Get total size of staged parts
    pub fn total_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_number_bounds() {
        assert!(PartNumber::new(0).is_err());
        assert_eq!(PartNumber::new(1).unwrap(), PartNumber::FIRST);
        assert!(PartNumber::new(MAX_PART_NUMBER).is_ok());
        assert!(matches!(
            PartNumber::new(MAX_PART_NUMBER + 1),
            Err(ParcelError::TooManyParts { .. })
        ));
        assert_eq!(PartNumber::FIRST.next().unwrap().get(), 2);
    }

    #[test]
    fn test_name_length_limits() {
        assert!(Key::new(&"k".repeat(MAX_KEY_LEN)).is_ok());
        assert!(matches!(
            Key::new(&"k".repeat(MAX_KEY_LEN + 1)),
            Err(ParcelError::InvalidKey(_))
        ));
        // multi-byte characters count by bytes
        assert!(Key::new(&"é".repeat(MAX_KEY_LEN / 2 + 1)).is_err());

        assert!(BucketId::new(&"b".repeat(MAX_BUCKET_NAME_LEN)).is_ok());
        assert!(BucketId::new(&"b".repeat(MAX_BUCKET_NAME_LEN + 1)).is_err());
        assert!(BucketId::new("café").is_err());
    }

    #[test]
    fn test_part_number_rejects_zero_when_deserialized() {
        assert!(serde_json::from_str::<PartNumber>("0").is_err());
        let n: PartNumber = serde_json::from_str("7").unwrap();
        assert_eq!(n.get(), 7);
    }

    #[test]
    fn test_empty_tag_and_upload_id_are_protocol_violations() {
        assert!(matches!(
            PartTag::new(""),
            Err(ParcelError::ProtocolViolation(_))
        ));
        assert!(matches!(
            UploadId::new(""),
            Err(ParcelError::ProtocolViolation(_))
        ));
        assert!(UploadId::new("a/b").is_err());
    }

    #[test]
    fn test_pending_upload_replaces_reuploaded_part() {
        let mut upload = PendingUpload::new(
            UploadId::generate(),
            BucketId::new("b").unwrap(),
            Key::new("k").unwrap(),
        );
        let two = PartNumber::new(2).unwrap();
        upload.add_part(StagedPart {
            part_number: two,
            size: 3,
            part_tag: PartTag::new("x").unwrap(),
        });
        upload.add_part(StagedPart {
            part_number: PartNumber::FIRST,
            size: 5,
            part_tag: PartTag::new("y").unwrap(),
        });
        upload.add_part(StagedPart {
            part_number: two,
            size: 4,
            part_tag: PartTag::new("z").unwrap(),
        });

        assert_eq!(upload.parts.len(), 2);
        assert_eq!(upload.parts[0].part_number, PartNumber::FIRST);
        assert_eq!(upload.part(two).unwrap().part_tag.as_str(), "z");
        assert_eq!(upload.total_size(), 9);
    }

    #[test]
    fn test_part_response_with_empty_tag_rejected() {
        let ok: UploadPartResponse =
            serde_json::from_str(r#"{"part_number":2,"part_tag":"abc"}"#).unwrap();
        assert_eq!(ok.part_number.get(), 2);
        assert!(serde_json::from_str::<UploadPartResponse>(r#"{"part_number":1,"part_tag":""}"#).is_err());
        assert!(serde_json::from_str::<InitiateUploadResponse>(r#"{"upload_id":""}"#).is_err());
    }

    #[test]
    fn test_content_hash_hex() {
        let hash = ContentHash::new(b"abc");
        assert_eq!(hash.to_hex().len(), 64);
        assert_eq!(PartTag::from(&hash).as_str(), hash.to_hex());
    }
}
