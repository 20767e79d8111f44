//! Dirty-tracked byte buffers
//!
//! Every editable byte range in the container codecs is held in a
//! [`SegmentData`]. Replacing or mutating the bytes flips the dirty flag, which
//! the storage layer uses to decide which archive entries need to be rewritten.

use serde::{Deserialize, Serialize};

/// A byte buffer that remembers whether it has been modified since it was read
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentData {
    bytes: Vec<u8>,
    dirty: bool,
}

impl SegmentData {
    /// Wrap freshly read bytes. The buffer starts clean.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            dirty: false,
        }
    }

    /// Current bytes
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Length of the current bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Whether the bytes were replaced or mutated
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Replace the contents and mark the buffer dirty.
    pub fn replace(&mut self, bytes: Vec<u8>) {
        self.bytes = bytes;
        self.dirty = true;
    }

    /// Mutable access to the bytes. Marks the buffer dirty.
    pub fn bytes_mut(&mut self) -> &mut Vec<u8> {
        self.dirty = true;
        &mut self.bytes
    }

    /// Clear the dirty flag after the bytes were persisted.
    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Consume the buffer, returning the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

impl From<Vec<u8>> for SegmentData {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_replace_marks_dirty() {
        let mut data = SegmentData::new(vec![1, 2, 3]);
        assert!(!data.is_dirty());

        data.replace(vec![4, 5]);
        assert!(data.is_dirty());
        assert_eq!(data.bytes(), &[4, 5]);

        data.mark_clean();
        assert!(!data.is_dirty());
    }

    #[test]
    fn test_mutable_access_marks_dirty() {
        let mut data = SegmentData::new(vec![0; 4]);
        data.bytes_mut()[2] = 0xFF;
        assert!(data.is_dirty());
        assert_eq!(data.bytes(), &[0, 0, 0xFF, 0]);
    }
}
