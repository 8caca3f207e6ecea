//! Varint/zigzag byte codec.
//!
//! Unsigned values are LEB128; signed values are zigzag-mapped first so
//! small negative deltas stay short. The writer grows its buffer by the
//! usual `Vec` doubling; the reader borrows and never allocates.

use crate::error::DecodeError;

/// Zigzag-encode a signed value.
/// Maps: 0 -> 0, -1 -> 1, 1 -> 2, -2 -> 3, ...
#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ (-((value & 1) as i64))
}

/// Append-only encoder over a growable buffer.
#[derive(Debug, Default, Clone)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_u64(&mut self, mut value: u64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.push(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_u32(&mut self, value: u32) {
        self.write_u64(value as u64);
    }

    pub fn write_s64(&mut self, value: i64) {
        self.write_u64(zigzag_encode(value));
    }

    pub fn write_s32(&mut self, value: i32) {
        self.write_s64(value as i64);
    }

    pub fn write_byte(&mut self, byte: u8) {
        self.buf.push(byte);
    }

    /// Raw bytes, no length prefix.
    pub fn write_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed bytes.
    pub fn write_byte_array(&mut self, bytes: &[u8]) {
        self.write_u64(bytes.len() as u64);
        self.write_bytes(bytes);
    }

    pub fn position(&self) -> usize {
        self.buf.len()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over an immutable byte slice.
#[derive(Debug, Clone)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    /// Move the cursor; seeking to exactly the end is allowed.
    pub fn seek(&mut self, pos: usize) -> Result<(), DecodeError> {
        if pos > self.buf.len() {
            return Err(DecodeError::SeekOutOfBounds {
                pos,
                len: self.buf.len(),
            });
        }
        self.pos = pos;
        Ok(())
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn read_raw_byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self.buf.get(self.pos).ok_or(DecodeError::UnexpectedEof {
            pos: self.pos,
            needed: 1,
        })?;
        self.pos += 1;
        Ok(byte)
    }

    pub fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let start = self.pos;
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_raw_byte()?;
            let payload = (byte & 0x7F) as u64;
            if shift >= 64 || (shift == 63 && payload > 1) {
                return Err(DecodeError::VarintOverflow {
                    pos: start,
                    bits: 64,
                });
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, DecodeError> {
        let start = self.pos;
        let value = self.read_u64()?;
        u32::try_from(value).map_err(|_| DecodeError::VarintOverflow {
            pos: start,
            bits: 32,
        })
    }

    pub fn read_s64(&mut self) -> Result<i64, DecodeError> {
        Ok(zigzag_decode(self.read_u64()?))
    }

    pub fn read_s32(&mut self) -> Result<i32, DecodeError> {
        let start = self.pos;
        let value = self.read_s64()?;
        i32::try_from(value).map_err(|_| DecodeError::VarintOverflow {
            pos: start,
            bits: 32,
        })
    }

    /// Borrow the next `len` raw bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], DecodeError> {
        if len > self.remaining() {
            return Err(DecodeError::UnexpectedEof {
                pos: self.pos,
                needed: len - self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Borrow a length-prefixed byte array.
    pub fn read_byte_array(&mut self) -> Result<&'a [u8], DecodeError> {
        let len = self.read_u64()?;
        let len = usize::try_from(len).map_err(|_| DecodeError::OutOfRange("byte array length"))?;
        self.read_bytes(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_varint_sizes() {
        let mut w = ByteWriter::new();
        w.write_u64(127);
        assert_eq!(w.position(), 1);
        w.write_u64(128);
        assert_eq!(w.position(), 3);
    }

    #[test]
    fn test_mixed_sequence() {
        let mut w = ByteWriter::new();
        w.write_u32(300);
        w.write_s32(-2);
        w.write_s64(i64::MIN);
        w.write_u64(u64::MAX);
        w.write_byte(0xAB);
        w.write_byte_array(b"abc");

        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32().unwrap(), 300);
        assert_eq!(r.read_s32().unwrap(), -2);
        assert_eq!(r.read_s64().unwrap(), i64::MIN);
        assert_eq!(r.read_u64().unwrap(), u64::MAX);
        assert_eq!(r.read_raw_byte().unwrap(), 0xAB);
        assert_eq!(r.read_byte_array().unwrap(), b"abc");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_zigzag_mapping() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
        for v in [i64::MIN, -1000, 0, 77, i64::MAX] {
            assert_eq!(zigzag_decode(zigzag_encode(v)), v);
        }
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut r = ByteReader::new(&[0x80]);
        assert!(matches!(
            r.read_u64(),
            Err(DecodeError::UnexpectedEof { .. })
        ));

        let mut r = ByteReader::new(&[3, 1, 2]);
        assert!(matches!(
            r.read_byte_array(),
            Err(DecodeError::UnexpectedEof { needed: 1, .. })
        ));
    }

    #[test]
    fn test_u32_overflow() {
        let mut w = ByteWriter::new();
        w.write_u64(u32::MAX as u64 + 1);
        let bytes = w.into_inner();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(
            r.read_u32(),
            Err(DecodeError::VarintOverflow { bits: 32, .. })
        ));
    }

    #[test]
    fn test_seek() {
        let mut r = ByteReader::new(&[1, 2, 3]);
        r.seek(2).unwrap();
        assert_eq!(r.read_raw_byte().unwrap(), 3);
        r.seek(3).unwrap();
        assert!(r.is_empty());
        assert!(r.seek(4).is_err());
    }
}
