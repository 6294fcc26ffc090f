use super::ReadAt;
use std::io::{self, Read};

/// Sequential [`Read`] view over the tail of a [`ReadAt`] source.
///
/// Bytes are pulled on demand, so a payload of any size is never held in
/// memory at once.
pub struct PayloadReader<R: ReadAt> {
    source: R,
    start: u64,
    position: u64,
}

impl<R: ReadAt> PayloadReader<R> {
    pub fn new(source: R, start: u64) -> Self {
        Self {
            source,
            start,
            position: start,
        }
    }

    /// Offset of the first payload byte in the underlying source.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Total payload length, independent of how much has been read.
    pub fn len(&self) -> u64 {
        self.source.size().saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<R: ReadAt> Read for PayloadReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.source.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}
