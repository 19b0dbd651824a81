// Cadenza
// Copyright (c) 2026 The Project Cadenza Developers.
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The `io` module implements the byte-source boundary of the decoder and the bit-level reader
//! used by the codec bitstream parsers.
//!
//! A [`ByteSource`] is any provider of compressed bytes: a file, an in-memory buffer, or a
//! caller-supplied stream. Sources are forward-read; seeking is an optional capability queried at
//! runtime, and a failed seek simply degrades the decoder to forward-only scanning.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};

mod bit;

pub use bit::BitReader;

/// `ByteSource` is the byte provider a decoder pulls its compressed stream from.
pub trait ByteSource: Send {
    /// Reads up-to `buf.len()` bytes into `buf` and returns the number of bytes read. A return
    /// value of 0 indicates end-of-stream.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Attempts to reposition the source to an absolute byte offset. Returns false if the source
    /// cannot seek; the caller must then treat the source as forward-only.
    fn seek(&mut self, pos: u64) -> bool;

    /// Returns the total length of the source in bytes, if known.
    fn byte_len(&self) -> Option<u64>;
}

impl ByteSource for File {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(self, buf)
    }

    fn seek(&mut self, pos: u64) -> bool {
        Seek::seek(self, SeekFrom::Start(pos)).is_ok()
    }

    /// Returns the length in bytes of the `File` backing the `ByteSource`.
    ///
    /// Note: This operation involves querying the underlying file descriptor for information and
    /// may be moderately expensive. Therefore it is recommended to cache this value if used often.
    fn byte_len(&self) -> Option<u64> {
        match self.metadata() {
            Ok(metadata) if metadata.is_file() => Some(metadata.len()),
            _ => None,
        }
    }
}

/// `MemorySource` adapts an owned byte buffer into a seekable [`ByteSource`].
pub struct MemorySource {
    data: Vec<u8>,
    pos: usize,
}

impl MemorySource {
    /// Instantiate a new `MemorySource` by taking ownership of the provided buffer.
    pub fn new(data: Vec<u8>) -> Self {
        MemorySource { data, pos: 0 }
    }
}

impl ByteSource for MemorySource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos.min(self.data.len())..];
        let len = remaining.len().min(buf.len());
        buf[..len].copy_from_slice(&remaining[..len]);
        self.pos += len;
        Ok(len)
    }

    fn seek(&mut self, pos: u64) -> bool {
        if pos <= self.data.len() as u64 {
            self.pos = pos as usize;
            true
        }
        else {
            false
        }
    }

    fn byte_len(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }
}

/// `ReadOnlySource` wraps any reader implementing [`std::io::Read`] in an unseekable
/// [`ByteSource`] of unknown length.
pub struct ReadOnlySource<R: Read + Send> {
    inner: R,
}

impl<R: Read + Send> ReadOnlySource<R> {
    /// Instantiates a new `ReadOnlySource<R>` by taking ownership and wrapping the provided
    /// `Read`er.
    pub fn new(inner: R) -> Self {
        ReadOnlySource { inner }
    }

    /// Unwraps this `ReadOnlySource<R>`, returning the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Send> ByteSource for ReadOnlySource<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }

    fn seek(&mut self, _pos: u64) -> bool {
        false
    }

    fn byte_len(&self) -> Option<u64> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_memory_source_read_and_seek() {
        let mut src = MemorySource::new(vec![1, 2, 3, 4, 5]);

        let mut buf = [0u8; 3];
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [1, 2, 3]);

        assert!(src.seek(1));
        assert_eq!(src.read(&mut buf).unwrap(), 3);
        assert_eq!(buf, [2, 3, 4]);

        assert_eq!(src.read(&mut buf).unwrap(), 1);
        assert_eq!(buf[0], 5);
        assert_eq!(src.read(&mut buf).unwrap(), 0);

        assert!(!src.seek(6));
        assert_eq!(src.byte_len(), Some(5));
    }
}
