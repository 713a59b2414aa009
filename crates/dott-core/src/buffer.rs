//! Chunk ingestion buffer.
//!
//! A fixed-capacity, append-only byte sink. Appends are all-or-nothing: a
//! chunk that would cross the capacity is rejected and the buffer is left
//! exactly as it was.

use crate::error::{Error, ResourceError};

/// Fixed-capacity append-only buffer owned by one transfer session
#[derive(Debug)]
pub struct IngestBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl IngestBuffer {
    /// Allocate a buffer that will hold at most `capacity` bytes.
    ///
    /// The full capacity is reserved up front.
    ///
    /// # Errors
    ///
    /// Returns `ResourceError::Allocation` if the reservation fails.
    pub fn with_capacity(capacity: usize) -> Result<Self, ResourceError> {
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|_| ResourceError::Allocation(capacity))?;
        Ok(Self { data, capacity })
    }

    /// Append a chunk.
    ///
    /// # Errors
    ///
    /// Returns `Error::Overflow` if `len() + chunk.len()` would exceed the
    /// capacity. Nothing is written in that case.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), Error> {
        if chunk.len() > self.remaining() {
            return Err(Error::Overflow {
                received: self.data.len(),
                len: chunk.len(),
                limit: self.capacity,
            });
        }
        self.data.extend_from_slice(chunk);
        Ok(())
    }

    /// Bytes accepted so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if nothing has been accepted
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Capacity fixed at allocation
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Bytes that can still be accepted
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.capacity - self.data.len()
    }

    /// Check if the buffer is exactly full
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.data.len() == self.capacity
    }

    /// Accepted bytes
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}
