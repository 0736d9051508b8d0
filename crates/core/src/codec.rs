//! Binary codec helpers shared by every block structure.
//!
//! All integers are big-endian and fixed-width; hashes are written as raw
//! 32-byte groups with no length prefix. Decoding goes through [`Reader`],
//! which tracks its offset so that every failure can report the field and
//! the position it was read from.

use crate::hash::{Hash, HASH_LENGTH};
use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

/// Errors that can occur while decoding binary data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("invalid length (expected {expected} bytes, got {actual})")]
    InvalidLength { expected: usize, actual: usize },

    #[error("truncated {field} at offset {offset} (needed {needed} bytes, {remaining} remaining)")]
    Truncated {
        field: &'static str,
        offset: usize,
        needed: usize,
        remaining: usize,
    },

    #[error("declared {field} count {declared} does not match payload ({actual})")]
    CountMismatch {
        field: &'static str,
        declared: u64,
        actual: u64,
    },

    #[error("{field} is {len} bytes, at most {max} allowed")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("unknown entry type {tag:#04x} at offset {offset}")]
    UnknownEntryType { tag: u8, offset: usize },

    #[error("declared body size {declared} does not match decoded body ({actual})")]
    BodySizeMismatch { declared: u64, actual: u64 },

    #[error("{0} trailing bytes after decoded block")]
    TrailingBytes(usize),
}

pub type Result<T> = std::result::Result<T, CodecError>;

/// Append-only big-endian writer.
#[derive(Debug, Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        let mut bytes = [0u8; 2];
        BigEndian::write_u16(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_u32(&mut self, value: u32) {
        let mut bytes = [0u8; 4];
        BigEndian::write_u32(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_u64(&mut self, value: u64) {
        let mut bytes = [0u8; 8];
        BigEndian::write_u64(&mut bytes, value);
        self.buf.extend_from_slice(&bytes);
    }

    pub fn put_hash(&mut self, hash: &Hash) {
        self.buf.extend_from_slice(hash.as_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a byte slice that reports field names and offsets on failure.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    /// Current position from the start of the input.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.offset
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Take exactly `n` bytes, or fail naming `field`.
    pub fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                field,
                offset: self.offset,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.offset..self.offset + n];
        self.offset += n;
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16> {
        Ok(BigEndian::read_u16(self.take(2, field)?))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        Ok(BigEndian::read_u32(self.take(4, field)?))
    }

    pub fn read_u64(&mut self, field: &'static str) -> Result<u64> {
        Ok(BigEndian::read_u64(self.take(8, field)?))
    }

    pub fn read_hash(&mut self, field: &'static str) -> Result<Hash> {
        Hash::from_slice(self.take(HASH_LENGTH, field)?)
    }

    pub fn read_array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    /// Consume everything that is left.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let out = &self.data[self.offset..];
        self.offset = self.data.len();
        out
    }

    /// Fail if any input is left unconsumed.
    pub fn finish(&self) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            n => Err(CodecError::TrailingBytes(n)),
        }
    }
}

/// Types with a canonical binary encoding.
pub trait BinaryMarshal {
    fn marshal_into(&self, w: &mut Writer);

    fn marshal(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.marshal_into(&mut w);
        w.into_bytes()
    }
}

/// Types that can be decoded from their canonical binary encoding.
pub trait BinaryUnmarshal: Sized {
    fn unmarshal_from(r: &mut Reader<'_>) -> Result<Self>;

    /// Decode a value that must span the whole input.
    fn unmarshal(data: &[u8]) -> Result<Self> {
        let mut r = Reader::new(data);
        let value = Self::unmarshal_from(&mut r)?;
        r.finish()?;
        Ok(value)
    }
}
