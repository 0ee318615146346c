//! Test utilities for exercising code written against [`ObjectStore`]

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::store::{ObjectLocation, ObjectStore};
use crate::types::*;
use crate::ParcelError;

/// One protocol call observed by a [`RecordingStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Initiate {
        location: ObjectLocation,
    },
    UploadPart {
        upload_id: UploadId,
        part_number: u32,
        len: usize,
    },
    Complete {
        upload_id: UploadId,
        part_numbers: Vec<u32>,
    },
    Abort {
        upload_id: UploadId,
    },
}

/// Where a one-shot fault fires
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    Initiate,
    UploadPart(u32),
    Complete,
    Abort,
    /// Completion succeeds but reports one part fewer than submitted
    ShortCompletion,
}

#[derive(Default)]
struct State {
    calls: Vec<StoreCall>,
    pending: HashMap<UploadId, BTreeMap<u32, Bytes>>,
    objects: HashMap<ObjectLocation, Bytes>,
    faults: HashSet<FaultPoint>,
}

/// In-memory store that records every call and can inject failures
#[derive(Default)]
pub struct RecordingStore {
    state: Mutex<State>,
}

impl RecordingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a fault; it fires once, on the next call that reaches it
    pub fn set_fault(&self, point: FaultPoint) {
        self.lock().faults.insert(point);
    }

    pub fn calls(&self) -> Vec<StoreCall> {
        self.lock().calls.clone()
    }

    pub fn initiate_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Initiate { .. }))
    }

    pub fn upload_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::UploadPart { .. }))
    }

    pub fn complete_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Complete { .. }))
    }

    pub fn abort_count(&self) -> usize {
        self.count(|c| matches!(c, StoreCall::Abort { .. }))
    }

    /// Part numbers in the order they were uploaded
    pub fn uploaded_part_numbers(&self) -> Vec<u32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|c| match c {
                StoreCall::UploadPart { part_number, .. } => Some(*part_number),
                _ => None,
            })
            .collect()
    }

    /// Part numbers listed by the last completion call
    pub fn completed_part_numbers(&self) -> Option<Vec<u32>> {
        self.lock().calls.iter().rev().find_map(|c| match c {
            StoreCall::Complete { part_numbers, .. } => Some(part_numbers.clone()),
            _ => None,
        })
    }

    /// Bodies of the parts staged under `upload_id`, in part order
    pub fn staged_parts(&self, upload_id: &UploadId) -> Vec<Bytes> {
        self.lock()
            .pending
            .get(upload_id)
            .map(|parts| parts.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Committed object body
    pub fn object(&self, location: &ObjectLocation) -> Option<Bytes> {
        self.lock().objects.get(location).cloned()
    }

    /// Number of uploads initiated but neither completed nor aborted
    pub fn pending_uploads(&self) -> usize {
        self.lock().pending.len()
    }

    fn count(&self, pred: impl Fn(&StoreCall) -> bool) -> usize {
        self.lock().calls.iter().filter(|c| pred(c)).count()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl State {
    fn take_fault(&mut self, point: FaultPoint) -> crate::Result<()> {
        if self.faults.remove(&point) {
            Err(ParcelError::Transport(format!("injected fault at {:?}", point)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ObjectStore for RecordingStore {
    async fn initiate_upload(&self, location: &ObjectLocation) -> crate::Result<UploadId> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Initiate {
            location: location.clone(),
        });
        state.take_fault(FaultPoint::Initiate)?;

        let upload_id = UploadId::generate();
        state.pending.insert(upload_id.clone(), BTreeMap::new());
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        _location: &ObjectLocation,
        upload_id: &UploadId,
        part_number: PartNumber,
        data: Bytes,
    ) -> crate::Result<PartTag> {
        let mut state = self.lock();
        state.calls.push(StoreCall::UploadPart {
            upload_id: upload_id.clone(),
            part_number: part_number.get(),
            len: data.len(),
        });
        state.take_fault(FaultPoint::UploadPart(part_number.get()))?;

        let tag = PartTag::from(&ContentHash::new(&data));
        let parts = state
            .pending
            .get_mut(upload_id)
            .ok_or_else(|| ParcelError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })?;
        parts.insert(part_number.get(), data);
        Ok(tag)
    }

    async fn complete_upload(
        &self,
        location: &ObjectLocation,
        upload_id: &UploadId,
        parts: &[CompletedPart],
    ) -> crate::Result<ObjectMetadata> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Complete {
            upload_id: upload_id.clone(),
            part_numbers: parts.iter().map(|p| p.part_number.get()).collect(),
        });
        state.take_fault(FaultPoint::Complete)?;
        let short = state.take_fault(FaultPoint::ShortCompletion).is_err();

        let staged = state
            .pending
            .remove(upload_id)
            .ok_or_else(|| ParcelError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })?;

        let mut body = BytesMut::new();
        for part in parts {
            let data = staged
                .get(&part.part_number.get())
                .ok_or_else(|| ParcelError::InvalidPart {
                    part_number: part.part_number.get(),
                    reason: "part was never uploaded".to_string(),
                })?;
            body.extend_from_slice(data);
        }
        let body = body.freeze();

        let mut part_count = parts.len() as u32;
        if short {
            part_count = part_count.saturating_sub(1);
        }
        let metadata = ObjectMetadata::new(body.len() as u64, ContentHash::new(&body), part_count);
        state.objects.insert(location.clone(), body);
        Ok(metadata)
    }

    async fn abort_upload(&self, _location: &ObjectLocation, upload_id: &UploadId) -> crate::Result<()> {
        let mut state = self.lock();
        state.calls.push(StoreCall::Abort {
            upload_id: upload_id.clone(),
        });
        state.take_fault(FaultPoint::Abort)?;

        state
            .pending
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| ParcelError::UploadNotFound {
                upload_id: upload_id.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> ObjectLocation {
        ObjectLocation::parse("test-bucket", "dir/object.bin").unwrap()
    }

    #[tokio::test]
    async fn test_records_protocol_calls() {
        let store = RecordingStore::new();
        let loc = location();

        let id = store.initiate_upload(&loc).await.unwrap();
        let tag = store
            .upload_part(&loc, &id, PartNumber::FIRST, Bytes::from_static(b"hello"))
            .await
            .unwrap();
        let meta = store
            .complete_upload(&loc, &id, &[CompletedPart::new(PartNumber::FIRST, tag)])
            .await
            .unwrap();

        assert_eq!(meta.size, 5);
        assert_eq!(meta.part_count, 1);
        assert_eq!(store.object(&loc).unwrap(), Bytes::from_static(b"hello"));
        assert_eq!(store.initiate_count(), 1);
        assert_eq!(store.upload_count(), 1);
        assert_eq!(store.completed_part_numbers(), Some(vec![1]));
        assert_eq!(store.pending_uploads(), 0);
    }

    #[tokio::test]
    async fn test_fault_fires_once() {
        let store = RecordingStore::new();
        let loc = location();
        store.set_fault(FaultPoint::Initiate);

        assert!(store.initiate_upload(&loc).await.is_err());
        assert!(store.initiate_upload(&loc).await.is_ok());
        assert_eq!(store.initiate_count(), 2);
    }

    #[tokio::test]
    async fn test_abort_drops_staged_parts() {
        let store = RecordingStore::new();
        let loc = location();

        let id = store.initiate_upload(&loc).await.unwrap();
        store
            .upload_part(&loc, &id, PartNumber::FIRST, Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert_eq!(store.staged_parts(&id).len(), 1);

        store.abort_upload(&loc, &id).await.unwrap();
        assert!(store.staged_parts(&id).is_empty());
        assert!(matches!(
            store.abort_upload(&loc, &id).await,
            Err(ParcelError::UploadNotFound { .. })
        ));
    }
}
