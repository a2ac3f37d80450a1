//! Byte-producing entities
//!
//! An [`Entity`] is a source of bytes that knows how to write itself to a
//! sink, optionally advertising its length up front. Only what streaming
//! encryption and digesting need is modelled here.

use bytes::Bytes;
use std::io::{self, Read, Write};

use crate::DEFAULT_CHUNK_SIZE;

/// A source of bytes that can be written to a sink
pub trait Entity {
    /// Number of bytes `write_to` will produce, or `None` when unknown
    fn content_length(&self) -> Option<u64>;

    /// Write the entity to `out`, returning the number of bytes written
    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64>;

    /// The in-memory buffer holding the entity's bytes, if it has one
    fn backing_buffer(&self) -> Option<&[u8]> {
        None
    }

    /// Whether `write_to` can be called more than once
    fn is_repeatable(&self) -> bool {
        false
    }
}

impl<E: Entity + ?Sized> Entity for Box<E> {
    fn content_length(&self) -> Option<u64> {
        (**self).content_length()
    }

    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        (**self).write_to(out)
    }

    fn backing_buffer(&self) -> Option<&[u8]> {
        (**self).backing_buffer()
    }

    fn is_repeatable(&self) -> bool {
        (**self).is_repeatable()
    }
}

/// Memory-backed entity
#[derive(Clone, Debug, Default)]
pub struct BytesEntity {
    data: Bytes,
}

impl BytesEntity {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }
}

impl Entity for BytesEntity {
    fn content_length(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        out.write_all(&self.data)?;
        Ok(self.data.len() as u64)
    }

    fn backing_buffer(&self) -> Option<&[u8]> {
        Some(&self.data)
    }

    fn is_repeatable(&self) -> bool {
        true
    }
}

/// Entity streaming from a reader, read in bounded chunks
pub struct ReaderEntity<R> {
    reader: R,
    length: Option<u64>,
    chunk_size: usize,
    consumed: bool,
}

impl<R: Read> ReaderEntity<R> {
    /// Reader whose total length is known in advance
    pub fn with_length(reader: R, length: u64) -> Self {
        Self {
            reader,
            length: Some(length),
            chunk_size: DEFAULT_CHUNK_SIZE,
            consumed: false,
        }
    }

    /// Reader of unknown length
    pub fn unknown_length(reader: R) -> Self {
        Self {
            reader,
            length: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            consumed: false,
        }
    }

    /// Set the read buffer size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }
}

impl<R: Read> Entity for ReaderEntity<R> {
    fn content_length(&self) -> Option<u64> {
        self.length
    }

    fn write_to(&mut self, out: &mut dyn Write) -> io::Result<u64> {
        if self.consumed {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "stream entity has already been consumed",
            ));
        }
        self.consumed = true;

        let mut buf = vec![0u8; self.chunk_size];
        let mut total = 0u64;
        loop {
            let n = match self.reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            out.write_all(&buf[..n])?;
            total += n as u64;
        }

        match self.length {
            Some(expected) if expected != total => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("source produced {} bytes, expected {}", total, expected),
            )),
            _ => Ok(total),
        }
    }
}
