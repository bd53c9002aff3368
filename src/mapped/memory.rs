use super::Backend;

/// Image backed by an owned buffer
#[derive(Debug)]
pub struct MemoryBuffer {
    data: Vec<u8>,
}

impl MemoryBuffer {
    /// Create a new memory backend
    ///
    /// ## Arguments
    /// * 'data' - The data buffer to consume
    #[must_use]
    pub fn new(data: Vec<u8>) -> MemoryBuffer {
        MemoryBuffer { data }
    }

    /// Returns the buffer, consuming the backend.
    #[must_use]
    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl Backend for MemoryBuffer {
    fn data(&self) -> &[u8] {
        self.data.as_slice()
    }
}
