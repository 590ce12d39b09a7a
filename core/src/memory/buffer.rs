//! Packet byte buffer.
//!
//! ## Remarks
//! A [`ByteBuffer`] is owned by exactly one packet store and is never handed out for structural
//! mutation directly. Offsets into it are logical: growing the buffer may relocate its storage,
//! but the order of untouched bytes is always preserved, so interpreters record offsets rather
//! than addresses.

use crate::utils::hexdump::hexdump_lines;

use std::fmt;
use std::iter;
use std::ops::Range;

use anyhow::{bail, Result};
use thiserror::Error;

/// A contiguous, resizable byte sequence.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    /// Creates an empty buffer.
    pub fn new() -> ByteBuffer {
        ByteBuffer::default()
    }

    /// Creates a buffer of `len` zero bytes.
    pub fn zeroed(len: usize) -> ByteBuffer {
        ByteBuffer {
            data: vec![0; len],
        }
    }

    /// Creates a buffer holding a copy of `data`.
    pub fn from_bytes(data: &[u8]) -> ByteBuffer {
        ByteBuffer {
            data: data.to_vec(),
        }
    }

    /// Returns the number of bytes in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the buffer holds no bytes.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the contents of the buffer as a byte slice.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Returns the contents of the buffer as a mutable byte slice. The length cannot change
    /// through this slice.
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Returns a byte slice of data with length `count` at `offset`.
    ///
    /// Errors if `offset` is greater than the buffer length or `count` exceeds the size of the
    /// data stored at `offset`.
    pub fn get_data_slice(&self, offset: usize, count: usize) -> Result<&[u8]> {
        let range = self.checked_range(offset, count)?;
        Ok(&self.data[range])
    }

    /// Mutable counterpart of [`get_data_slice`](ByteBuffer::get_data_slice).
    pub fn get_data_slice_mut(&mut self, offset: usize, count: usize) -> Result<&mut [u8]> {
        let range = self.checked_range(offset, count)?;
        Ok(&mut self.data[range])
    }

    /// Inserts `bytes` before `pos`.
    pub fn insert(&mut self, pos: usize, bytes: &[u8]) -> Result<()> {
        if pos > self.len() {
            bail!(BufferError::WritePastBuffer);
        }
        self.data.splice(pos..pos, bytes.iter().copied());
        Ok(())
    }

    /// Inserts `count` copies of `value` before `pos`.
    pub fn insert_fill(&mut self, pos: usize, count: usize, value: u8) -> Result<()> {
        if pos > self.len() {
            bail!(BufferError::WritePastBuffer);
        }
        self.data
            .splice(pos..pos, iter::repeat(value).take(count));
        Ok(())
    }

    /// Removes the bytes in `range`.
    pub fn erase(&mut self, range: Range<usize>) -> Result<()> {
        if range.start > range.end {
            bail!(BufferError::BadOffset);
        }
        if range.end > self.len() {
            bail!(BufferError::WritePastBuffer);
        }
        self.data.drain(range);
        Ok(())
    }

    fn checked_range(&self, offset: usize, count: usize) -> Result<Range<usize>> {
        if offset > self.len() {
            bail!(BufferError::BadOffset);
        }
        match offset.checked_add(count) {
            Some(end) if end <= self.len() => Ok(offset..end),
            _ => bail!(BufferError::ReadPastBuffer),
        }
    }
}

impl fmt::Debug for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteBuffer")
            .field("len", &self.len())
            .field("data", &hex::encode(&self.data))
            .finish()
    }
}

// displays the buffer contents as a hex dump
impl fmt::Display for ByteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in hexdump_lines(&self.data, 16) {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferError {
    #[error("Offset exceeds buffer length")]
    BadOffset,

    #[error("Data read exceeds buffer")]
    ReadPastBuffer,

    #[error("Data write exceeds buffer")]
    WritePastBuffer,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(err: &anyhow::Error) -> Option<BufferError> {
        err.downcast_ref::<BufferError>().copied()
    }

    #[test]
    fn test_insert_erase() {
        let mut buf = ByteBuffer::new();
        buf.insert(0, &[0, 1, 2, 3, 4, 5, 6, 7]).unwrap();
        assert_eq!(buf.len(), 8);
        buf.insert_fill(2, 1, 0xf0).unwrap();
        assert_eq!(buf.data(), &[0, 1, 0xf0, 2, 3, 4, 5, 6, 7]);
        buf.erase(0..1).unwrap();
        buf.erase(2..7).unwrap();
        assert_eq!(buf.data(), &[1, 0xf0, 7]);
        buf.erase(0..3).unwrap();
        assert!(buf.is_empty());
    }

    #[test]
    fn test_bounds() {
        let mut buf = ByteBuffer::zeroed(4);
        assert_eq!(buf.get_data_slice(4, 0).unwrap().len(), 0);
        assert_eq!(
            kind(&buf.get_data_slice(5, 0).unwrap_err()),
            Some(BufferError::BadOffset)
        );
        assert_eq!(
            kind(&buf.get_data_slice(2, 3).unwrap_err()),
            Some(BufferError::ReadPastBuffer)
        );
        assert_eq!(
            kind(&buf.insert(5, &[1]).unwrap_err()),
            Some(BufferError::WritePastBuffer)
        );
        assert_eq!(
            kind(&buf.erase(3..6).unwrap_err()),
            Some(BufferError::WritePastBuffer)
        );
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_fill_and_display() {
        let mut buf = ByteBuffer::from_bytes(b"ab");
        buf.insert_fill(2, 2, 0x2e).unwrap();
        assert_eq!(buf.data(), b"ab..");
        assert_eq!(
            buf.to_string(),
            format!("0000:  {:<47}  |ab..|\n", "61 62 2e 2e")
        );
        buf.get_data_slice_mut(1, 2).unwrap().copy_from_slice(b"xy");
        assert_eq!(buf.data(), b"axy.");
    }
}
