//! Multipart upload session: upload id, recorded parts and the protocol state

use parcel_core::*;
use tracing::{debug, info};

/// Protocol state of an [`UploadSession`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No initiate call has been made
    Idle,
    Initiated { upload_id: UploadId },
    Completed { upload_id: UploadId },
    Aborted { upload_id: UploadId },
}

impl SessionState {
    fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Initiated { .. } => "initiated",
            SessionState::Completed { .. } => "completed",
            SessionState::Aborted { .. } => "aborted",
        }
    }

    pub fn upload_id(&self) -> Option<&UploadId> {
        match self {
            SessionState::Idle => None,
            SessionState::Initiated { upload_id }
            | SessionState::Completed { upload_id }
            | SessionState::Aborted { upload_id } => Some(upload_id),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionState::Completed { .. } | SessionState::Aborted { .. }
        )
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one multipart upload through
/// `Idle -> Initiated -> Completed | Aborted`.
///
/// Recorded parts are append-only and numbered `1..=parts.len()`.
#[derive(Debug)]
pub struct UploadSession {
    location: ObjectLocation,
    state: SessionState,
    parts: Vec<CompletedPart>,
}

impl UploadSession {
    pub fn new(location: ObjectLocation) -> Self {
        UploadSession {
            location,
            state: SessionState::Idle,
            parts: Vec::new(),
        }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn upload_id(&self) -> Option<&UploadId> {
        self.state.upload_id()
    }

    pub fn parts(&self) -> &[CompletedPart] {
        &self.parts
    }

    pub fn is_initiated(&self) -> bool {
        matches!(self.state, SessionState::Initiated { .. })
    }

    /// Number the next recorded part must carry
    pub fn next_part_number(&self) -> Result<PartNumber> {
        match u32::try_from(self.parts.len() + 1) {
            Ok(n) => PartNumber::new(n),
            Err(_) => Err(ParcelError::TooManyParts {
                limit: MAX_PART_NUMBER,
            }),
        }
    }

    /// Obtain an upload id from the store. Only valid once, from `Idle`.
    pub async fn initiate(&mut self, store: &dyn ObjectStore) -> Result<&UploadId> {
        if self.state != SessionState::Idle {
            return Err(self.invalid("initiate"));
        }

        let upload_id = store.initiate_upload(&self.location).await?;
        info!("Initiated upload {} for {}", upload_id, self.location);
        self.state = SessionState::Initiated { upload_id };
        self.upload_id_or_internal()
    }

    /// The upload id of an initiated session, checked before a part is sent
    pub(crate) fn active_upload_id(&self, operation: &'static str) -> Result<&UploadId> {
        match &self.state {
            SessionState::Initiated { upload_id } => Ok(upload_id),
            _ => Err(self.invalid(operation)),
        }
    }

    /// Append an acknowledged part. `part_number` must be the next expected one.
    pub fn record_part(&mut self, part_number: PartNumber, part_tag: PartTag) -> Result<()> {
        self.active_upload_id("record a part")?;
        let expected = self.next_part_number()?;
        if part_number != expected {
            return Err(ParcelError::InvalidPart {
                part_number: part_number.get(),
                reason: format!("expected part {}", expected),
            });
        }

        debug!(part = part_number.get(), tag = %part_tag, "Recorded part");
        self.parts.push(CompletedPart::new(part_number, part_tag));
        Ok(())
    }

    /// Ask the store to assemble every recorded part, in order.
    ///
    /// On any failure the session stays `Initiated` so it can still be aborted.
    pub async fn complete(&mut self, store: &dyn ObjectStore) -> Result<ObjectMetadata> {
        let upload_id = self.active_upload_id("complete")?.clone();
        if self.parts.is_empty() {
            return Err(ParcelError::InvalidState {
                operation: "complete",
                state: "initiated with no parts".to_string(),
            });
        }

        let metadata = store
            .complete_upload(&self.location, &upload_id, &self.parts)
            .await?;
        if metadata.part_count as usize != self.parts.len() {
            return Err(ParcelError::ProtocolViolation(format!(
                "store assembled {} parts, {} were submitted",
                metadata.part_count,
                self.parts.len()
            )));
        }

        info!(
            "Completed upload {} as {} ({} bytes, {} parts)",
            upload_id, self.location, metadata.size, metadata.part_count
        );
        self.state = SessionState::Completed { upload_id };
        Ok(metadata)
    }

    /// Discard the upload on the store. Only valid from `Initiated`.
    pub async fn abort(&mut self, store: &dyn ObjectStore) -> Result<()> {
        let upload_id = self.active_upload_id("abort")?.clone();
        store.abort_upload(&self.location, &upload_id).await?;

        info!("Aborted upload {} for {}", upload_id, self.location);
        self.state = SessionState::Aborted { upload_id };
        Ok(())
    }

    fn upload_id_or_internal(&self) -> Result<&UploadId> {
        self.upload_id()
            .ok_or_else(|| ParcelError::Internal("session lost its upload id".to_string()))
    }

    fn invalid(&self, operation: &'static str) -> ParcelError {
        ParcelError::InvalidState {
            operation,
            state: self.state.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::test_utils::{FaultPoint, RecordingStore};

    fn session() -> UploadSession {
        UploadSession::new(ObjectLocation::parse("test-bucket", "obj").unwrap())
    }

    fn tag(s: &str) -> PartTag {
        PartTag::new(s).unwrap()
    }

    #[tokio::test]
    async fn test_initiate_once() {
        let store = RecordingStore::new();
        let mut session = session();

        let id = session.initiate(&store).await.unwrap().clone();
        assert_eq!(session.upload_id(), Some(&id));

        let err = session.initiate(&store).await.unwrap_err();
        assert!(err.is_usage_error());
        assert_eq!(store.initiate_count(), 1);
        assert_eq!(session.upload_id(), Some(&id));
    }

    #[tokio::test]
    async fn test_failed_initiate_stays_idle() {
        let store = RecordingStore::new();
        store.set_fault(FaultPoint::Initiate);
        let mut session = session();

        assert!(session.initiate(&store).await.is_err());
        assert_eq!(session.state(), &SessionState::Idle);
    }

    #[tokio::test]
    async fn test_record_requires_next_number() {
        let store = RecordingStore::new();
        let mut session = session();

        assert!(session.record_part(PartNumber::FIRST, tag("a")).is_err());
        session.initiate(&store).await.unwrap();

        session.record_part(PartNumber::FIRST, tag("a")).unwrap();
        let three = PartNumber::new(3).unwrap();
        assert!(matches!(
            session.record_part(three, tag("c")),
            Err(ParcelError::InvalidPart { part_number: 3, .. })
        ));
        assert_eq!(session.parts().len(), 1);
        assert_eq!(session.next_part_number().unwrap().get(), 2);
    }

    #[tokio::test]
    async fn test_complete_from_idle_is_usage_error() {
        let store = RecordingStore::new();
        let mut session = session();

        let err = session.complete(&store).await.unwrap_err();
        assert!(matches!(err, ParcelError::InvalidState { operation: "complete", .. }));
        assert!(session.abort(&store).await.unwrap_err().is_usage_error());
        assert!(store.calls().is_empty());
    }

    #[tokio::test]
    async fn test_short_completion_is_protocol_violation() {
        let store = RecordingStore::new();
        let mut session = session();
        let id = session.initiate(&store).await.unwrap().clone();

        for n in 1..=2u32 {
            let part_number = PartNumber::new(n).unwrap();
            let tag = store
                .upload_part(session.location(), &id, part_number, bytes::Bytes::from_static(b"x"))
                .await
                .unwrap();
            session.record_part(part_number, tag).unwrap();
        }

        store.set_fault(FaultPoint::ShortCompletion);
        let err = session.complete(&store).await.unwrap_err();
        assert!(matches!(err, ParcelError::ProtocolViolation(_)));
        assert!(session.is_initiated());
    }

    #[tokio::test]
    async fn test_abort_is_terminal() {
        let store = RecordingStore::new();
        let mut session = session();
        session.initiate(&store).await.unwrap();

        session.abort(&store).await.unwrap();
        assert!(session.state().is_terminal());
        assert!(session.abort(&store).await.is_err());
        assert_eq!(store.abort_count(), 1);
    }
}
