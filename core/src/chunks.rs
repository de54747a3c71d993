//! Chunked iteration over a download.

use std::io::Read;

use crate::error::ApiError;
use crate::sender::{read_full, CHUNK_SIZE};

/// Lazy, single-pass iterator over a body in chunks of `CHUNK_SIZE` bytes.
///
/// Every chunk but the last is full. The iterator ends at the first empty
/// read; a read error is yielded once and ends it too. Dropping the iterator
/// drops the reader, which for a `Response` closes the connection.
pub struct ChunkIterator<R> {
    reader: R,
    done: bool,
}

impl<R: Read> ChunkIterator<R> {
    pub fn new(reader: R) -> Self {
        Self { reader, done: false }
    }

    /// Give back the reader, e.g. to inspect a partially read response.
    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: Read> Iterator for ChunkIterator<R> {
    type Item = Result<Vec<u8>, ApiError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut chunk = vec![0u8; CHUNK_SIZE];
        match read_full(&mut self.reader, &mut chunk) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) => {
                if n < CHUNK_SIZE {
                    chunk.truncate(n);
                    self.done = true;
                }
                Some(Ok(chunk))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

impl<R: Read> std::iter::FusedIterator for ChunkIterator<R> {}
