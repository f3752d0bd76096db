use bytes::Bytes;

/// An opaque binary message moving through the graph.
///
/// The payload is shared by every holder of a clone and is immutable once
/// the message has been handed to a port. Cloning is cheap (reference
/// counted); the bytes are released when the last clone is dropped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Wrap an owned buffer without copying.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    /// Copy a byte slice into a new message.
    pub fn copy_from_slice(bytes: &[u8]) -> Self {
        Self {
            payload: Bytes::copy_from_slice(bytes),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Zero-length messages are permitted and are a no-op in most consumers.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Self::new(payload)
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Self::new(payload.as_bytes())
    }
}
