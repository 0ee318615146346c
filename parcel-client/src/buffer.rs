//! Staging buffer for bytes not yet shipped as a part

use bytes::{Bytes, BytesMut};

/// Accumulates writes until a part's worth of bytes is available.
///
/// `capacity` is a flush threshold, not an allocation limit: `append` never
/// truncates and never flushes on its own.
#[derive(Debug)]
pub struct StagingBuffer {
    content: BytesMut,
    capacity: usize,
}

impl StagingBuffer {
    pub fn new(capacity: usize, initial_allocation: usize) -> Self {
        StagingBuffer {
            content: BytesMut::with_capacity(initial_allocation),
            capacity,
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.content.extend_from_slice(data);
    }

    /// Take the accumulated bytes, leaving the buffer empty
    pub fn drain(&mut self) -> Bytes {
        self.content.split().freeze()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that fit before the threshold is reached
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.content.len())
    }

    pub fn is_full(&self) -> bool {
        self.content.len() >= self.capacity
    }

    /// Discard pending bytes and release their memory
    pub fn clear(&mut self) {
        self.content = BytesMut::new();
    }
}
