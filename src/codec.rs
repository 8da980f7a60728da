//! Bounded little-endian decode helpers shared by all on-disk structures.
//!
//! Every variable-length field in the format is length-prefixed. Decoders here
//! check a declared length against the remaining section before allocating,
//! so a corrupt length field produces a `Format` error instead of a huge
//! allocation or a panic.

use crate::error::{NovusError, Result};

/// Cursor over a byte slice with positional fixed-size reads.
///
/// `base_offset` is the absolute file offset of `buf[0]`, used only for error
/// context.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
    base_offset: u64,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8], base_offset: u64) -> Self {
        Reader {
            buf,
            pos: 0,
            base_offset,
        }
    }

    /// Absolute file offset of the next unread byte.
    pub fn offset(&self) -> u64 {
        self.base_offset + self.pos as u64
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, n: usize, field: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(NovusError::format(
                format!(
                    "{}: need {} bytes, {} remain in section",
                    field,
                    n,
                    self.remaining()
                ),
                self.offset(),
            ));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u8(&mut self, field: &str) -> Result<u8> {
        Ok(self.take(1, field)?[0])
    }

    pub fn u16(&mut self, field: &str) -> Result<u16> {
        let b = self.take(2, field)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&mut self, field: &str) -> Result<u32> {
        let b = self.take(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn u64(&mut self, field: &str) -> Result<u64> {
        let b = self.take(8, field)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read exactly `n` declared bytes. The allocation is capped by the
    /// section boundary check in `take`, never by the declared value alone.
    pub fn bytes(&mut self, n: usize, field: &str) -> Result<Vec<u8>> {
        Ok(self.take(n, field)?.to_vec())
    }

    /// Read a declared-length UTF-8 string.
    pub fn utf8(&mut self, n: usize, field: &str) -> Result<String> {
        let offset = self.offset();
        let raw = self.take(n, field)?;
        String::from_utf8(raw.to_vec())
            .map_err(|_| NovusError::format(format!("{}: invalid UTF-8", field), offset))
    }
}

/// Append-only little-endian encoder.
#[derive(Default)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Writer::default()
    }

    pub fn with_capacity(n: usize) -> Self {
        Writer {
            buf: Vec::with_capacity(n),
        }
    }

    pub fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn u16(&mut self, v: u16) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn bytes(&mut self, v: &[u8]) {
        self.buf.extend_from_slice(v);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}
