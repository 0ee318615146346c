//! Producer-facing write sink over a multipart upload

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parcel_core::*;
use std::sync::Arc;
use tracing::{info, warn};

use crate::{ClientError, PartUploader, StagingBuffer, UploadSession};

/// Lifecycle of a [`WriteSink`]. Every state but `Open` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Finalized,
    /// A network step failed and the upload was aborted on the store
    Aborted,
    /// A network step failed and no abort was performed, or the abort failed
    Failed,
}

impl std::fmt::Display for SinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SinkState::Open => "open",
            SinkState::Finalized => "finalized",
            SinkState::Aborted => "aborted",
            SinkState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Streams an object of unbounded size into a store, one part at a time.
///
/// Writes accumulate in a staging buffer; each time it reaches
/// `minimum_part_size` bytes the buffer is shipped as the next part and the
/// call waits for the store to acknowledge it. The upload is initiated
/// lazily by the first flush. [`finalize`](WriteSink::finalize) ships the
/// remainder and commits the object.
///
/// ```no_run
/// # use std::sync::Arc;
/// # use parcel_client::{HttpStore, WriteSink};
/// # use parcel_core::{ObjectLocation, SinkConfig};
/// # async fn run() -> parcel_client::Result<()> {
/// let store = Arc::new(HttpStore::new("http://127.0.0.1:8080")?);
/// let location = ObjectLocation::parse("logs", "2024/app.log")?;
/// let mut sink = WriteSink::new(store, location, SinkConfig::default())?;
/// sink.write(b"first line\n").await?;
/// let metadata = sink.finalize().await?;
/// # let _ = metadata;
/// # Ok(())
/// # }
/// ```
pub struct WriteSink {
    config: SinkConfig,
    session: UploadSession,
    buffer: StagingBuffer,
    uploader: Option<PartUploader>,
    state: SinkState,
    bytes_written: u64,
}

impl WriteSink {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        config: SinkConfig,
    ) -> crate::Result<Self> {
        config.validate()?;
        Ok(WriteSink {
            buffer: StagingBuffer::new(config.minimum_part_size, config.initial_allocation()),
            session: UploadSession::new(location),
            uploader: Some(PartUploader::new(store)),
            state: SinkState::Open,
            bytes_written: 0,
            config,
        })
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn location(&self) -> &ObjectLocation {
        self.session.location()
    }

    pub fn session(&self) -> &UploadSession {
        &self.session
    }

    /// Upload id, once the first flush has initiated the upload
    pub fn upload_id(&self) -> Option<&UploadId> {
        self.session.upload_id()
    }

    /// Total bytes accepted by `write`
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn parts_uploaded(&self) -> usize {
        self.session.parts().len()
    }

    /// Bytes staged but not yet shipped
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Append bytes, shipping a part every time the buffer fills.
    ///
    /// A write larger than the threshold is cut into threshold-sized parts,
    /// so chunking by the producer never changes the part sequence.
    pub async fn write(&mut self, data: &[u8]) -> crate::Result<()> {
        self.ensure_open()?;

        let mut rest = data;
        while !rest.is_empty() {
            let (head, tail) = rest.split_at(rest.len().min(self.buffer.remaining()));
            self.buffer.append(head);
            self.bytes_written += head.len() as u64;
            rest = tail;

            if self.buffer.is_full() {
                if let Err(e) = self.flush().await {
                    return Err(self.fail(e).await);
                }
            }
        }
        Ok(())
    }

    /// Drain a stream of chunks into the sink, returning the bytes copied.
    ///
    /// A stream error is returned as is and leaves the sink open.
    pub async fn write_all_from<S>(&mut self, stream: S) -> crate::Result<u64>
    where
        S: Stream<Item = std::io::Result<Bytes>>,
    {
        let mut stream = std::pin::pin!(stream);
        let mut copied = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            self.write(&chunk).await?;
            copied += chunk.len() as u64;
        }
        Ok(copied)
    }

    /// Ship any remaining bytes and commit the object.
    ///
    /// At least one part is always uploaded, even for an empty object.
    /// On success the store handle is released.
    pub async fn finalize(&mut self) -> crate::Result<ObjectMetadata> {
        self.ensure_open()?;

        if !self.buffer.is_empty() || self.session.parts().is_empty() {
            if let Err(e) = self.flush().await {
                return Err(self.fail(e).await);
            }
        }

        let store = match self.store() {
            Ok(store) => store,
            Err(e) => return Err(self.fail(e).await),
        };
        match self.session.complete(store.as_ref()).await {
            Ok(metadata) => {
                self.state = SinkState::Finalized;
                self.uploader = None;
                Ok(metadata)
            }
            Err(e) => Err(self.fail(e).await),
        }
    }

    /// Give up on the object: discard staged bytes and abort the upload if
    /// one was initiated.
    pub async fn abort(&mut self) -> crate::Result<()> {
        self.ensure_open()?;
        let store = self.store()?;
        self.buffer.clear();
        self.uploader = None;
        if self.session.is_initiated() {
            if let Err(e) = self.session.abort(store.as_ref()).await {
                self.state = SinkState::Failed;
                return Err(e.into());
            }
        }

        info!("Write sink for {} aborted by caller", self.location());
        self.state = SinkState::Aborted;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        let store = self.store()?;
        if !self.session.is_initiated() {
            self.session.initiate(store.as_ref()).await?;
        }

        let part_number = self.session.next_part_number()?;
        let data = self.buffer.drain();
        PartUploader::new(store)
            .upload_part(&mut self.session, part_number, data)
            .await?;
        Ok(())
    }

    /// Move to a terminal state after a failed network step, aborting the
    /// upload first when configured to. Returns the original error.
    async fn fail(&mut self, err: ParcelError) -> ClientError {
        self.buffer.clear();
        self.state = SinkState::Failed;
        let uploader = self.uploader.take();

        match (uploader, self.session.upload_id().cloned()) {
            (Some(uploader), Some(upload_id))
                if self.config.abort_on_failure && self.session.is_initiated() =>
            {
                warn!(
                    "Upload {} for {} failed ({}), aborting",
                    upload_id,
                    self.location(),
                    err
                );
                match self.session.abort(uploader.store().as_ref()).await {
                    Ok(()) => self.state = SinkState::Aborted,
                    Err(abort_err) => warn!(
                        "Abort of upload {} failed, it may remain pending: {}",
                        upload_id, abort_err
                    ),
                }
            }
            (_, Some(upload_id)) if self.session.is_initiated() => {
                warn!(
                    "Upload {} for {} failed ({}), leaving it pending",
                    upload_id,
                    self.location(),
                    err
                );
            }
            _ => warn!("Write sink for {} failed: {}", self.location(), err),
        }

        err.into()
    }

    fn ensure_open(&self) -> crate::Result<()> {
        if self.state == SinkState::Open {
            Ok(())
        } else {
            Err(ClientError::SinkClosed { state: self.state })
        }
    }

    fn store(&self) -> Result<Arc<dyn ObjectStore>> {
        self.uploader
            .as_ref()
            .map(|uploader| uploader.store().clone())
            .ok_or_else(|| ParcelError::Internal("store handle already released".to_string()))
    }
}

impl Drop for WriteSink {
    fn drop(&mut self) {
        if self.state != SinkState::Open {
            return;
        }

        warn!(
            location = %self.session.location(),
            buffered = self.buffer.len(),
            parts = self.session.parts().len(),
            "Write sink dropped without finalize, buffered bytes discarded"
        );

        let (Some(uploader), Some(upload_id)) =
            (self.uploader.take(), self.session.upload_id().cloned())
        else {
            return;
        };
        let location = self.session.location().clone();

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = uploader.store().abort_upload(&location, &upload_id).await {
                        warn!("Abort of dropped upload {} failed: {}", upload_id, e);
                    }
                });
            }
            Err(_) => warn!(
                "No runtime to abort upload {} for {}, it remains pending",
                upload_id, location
            ),
        }
    }
}
