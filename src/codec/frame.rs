//! Frame type shared by the parser, the broadcaster and the viewers

use bytes::Bytes;

/// One complete encoded image taken from a capture stream
///
/// This is designed to be cheap to clone due to `Bytes` reference counting:
/// every subscriber queue holds a handle to the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position of the frame in its source stream, starting at 0
    pub sequence: u64,
    /// Encoded image payload (zero-copy via reference counting)
    pub data: Bytes,
}

impl Frame {
    /// Create a frame
    pub fn new(sequence: u64, data: impl Into<Bytes>) -> Self {
        Self {
            sequence,
            data: data.into(),
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
