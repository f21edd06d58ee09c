//! Read cursor over an immutable byte span.

use ferro_types::CodecError;

/// A bounds-checked read cursor.
///
/// Every getter either succeeds and consumes exactly the bytes read, or
/// fails leaving the cursor byte-for-byte unchanged, so a caller may
/// attempt one interpretation, fail, and retry another.
#[derive(Debug, Clone, Copy)]
pub struct ByteCursor<'a> {
    data: &'a [u8],
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor over the given span.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Remaining unread bytes.
    pub fn remaining(&self) -> &'a [u8] {
        self.data
    }

    /// Number of unread bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Skip `n` bytes.
    pub fn skip(&mut self, n: usize) -> Result<(), CodecError> {
        if self.data.len() < n {
            return Err(CodecError::Truncated);
        }
        self.data = &self.data[n..];
        Ok(())
    }

    /// Read a big-endian unsigned integer of `width` bytes (1..=4).
    fn get_uint(&mut self, width: usize) -> Result<u32, CodecError> {
        debug_assert!((1..=4).contains(&width));
        if self.data.len() < width {
            return Err(CodecError::Truncated);
        }
        let mut v: u32 = 0;
        for &b in &self.data[..width] {
            v = (v << 8) | u32::from(b);
        }
        self.data = &self.data[width..];
        Ok(v)
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.get_uint(1)? as u8)
    }

    pub fn get_u16(&mut self) -> Result<u16, CodecError> {
        Ok(self.get_uint(2)? as u16)
    }

    pub fn get_u24(&mut self) -> Result<u32, CodecError> {
        self.get_uint(3)
    }

    pub fn get_u32(&mut self) -> Result<u32, CodecError> {
        self.get_uint(4)
    }

    /// Read the last byte of the span, shrinking the visible length.
    pub fn get_last_u8(&mut self) -> Result<u8, CodecError> {
        let (&last, rest) = self.data.split_last().ok_or(CodecError::Truncated)?;
        self.data = rest;
        Ok(last)
    }

    /// Read `n` bytes as a sub-cursor.
    pub fn get_bytes(&mut self, n: usize) -> Result<ByteCursor<'a>, CodecError> {
        if self.data.len() < n {
            return Err(CodecError::Truncated);
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Ok(ByteCursor::new(head))
    }

    /// Read `n` bytes into a fixed-size array.
    pub fn get_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let sub = self.get_bytes(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(sub.remaining());
        Ok(out)
    }

    /// Read a `width`-byte big-endian length, then that many bytes as a
    /// sub-cursor. On failure the length prefix is not consumed either.
    pub fn get_length_prefixed(&mut self, width: usize) -> Result<ByteCursor<'a>, CodecError> {
        let saved = *self;
        let len = self.get_uint(width)? as usize;
        match self.get_bytes(len) {
            Ok(sub) => Ok(sub),
            Err(e) => {
                *self = saved;
                Err(e)
            }
        }
    }

    pub fn get_u8_length_prefixed(&mut self) -> Result<ByteCursor<'a>, CodecError> {
        self.get_length_prefixed(1)
    }

    pub fn get_u16_length_prefixed(&mut self) -> Result<ByteCursor<'a>, CodecError> {
        self.get_length_prefixed(2)
    }

    pub fn get_u24_length_prefixed(&mut self) -> Result<ByteCursor<'a>, CodecError> {
        self.get_length_prefixed(3)
    }

    /// Peek the next byte without consuming.
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// True if the next byte equals `value`. Consumes nothing.
    pub fn peek_tag(&self, value: u8) -> bool {
        self.peek_u8() == Some(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_width_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.get_u8().unwrap(), 0x01);
        assert_eq!(c.get_u16().unwrap(), 0x0203);
        assert_eq!(c.get_u24().unwrap(), 0x040506);
        assert_eq!(c.get_u32().unwrap(), 0x0708090A);
        assert!(c.is_empty());
    }

    #[test]
    fn test_failed_read_leaves_cursor_unchanged() {
        let data = [0x01, 0x02, 0x03];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.get_u8().unwrap(), 0x01);
        assert_eq!(c.get_u32().unwrap_err(), CodecError::Truncated);
        // Position unchanged: the u16 still reads the same bytes.
        assert_eq!(c.get_u16().unwrap(), 0x0203);
    }

    #[test]
    fn test_over_read_sequence_fails_at_first_overrun() {
        // Declared lengths sum past the span; the first over-read fails
        // cleanly with no partial consumption.
        let data = [0xAA, 0xBB];
        let mut c = ByteCursor::new(&data);
        assert!(c.get_bytes(1).is_ok());
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_bytes(2).unwrap_err(), CodecError::Truncated);
        assert_eq!(c.len(), 1);
        assert_eq!(c.get_u8().unwrap(), 0xBB);
    }

    #[test]
    fn test_length_prefixed() {
        let data = [0x00, 0x03, 0x10, 0x20, 0x30, 0xFF];
        let mut c = ByteCursor::new(&data);
        let sub = c.get_u16_length_prefixed().unwrap();
        assert_eq!(sub.remaining(), &[0x10, 0x20, 0x30]);
        assert_eq!(c.get_u8().unwrap(), 0xFF);
    }

    #[test]
    fn test_length_prefixed_overflowing_declared_length() {
        // Declared length 5, only 2 bytes follow: fail without consuming
        // the prefix.
        let data = [0x05, 0xAA, 0xBB];
        let mut c = ByteCursor::new(&data);
        assert_eq!(
            c.get_u8_length_prefixed().unwrap_err(),
            CodecError::Truncated
        );
        assert_eq!(c.len(), 3);
        assert_eq!(c.get_u8().unwrap(), 0x05);
    }

    #[test]
    fn test_get_last_u8() {
        let data = [0x01, 0x02, 0x03];
        let mut c = ByteCursor::new(&data);
        assert_eq!(c.get_last_u8().unwrap(), 0x03);
        assert_eq!(c.len(), 2);
        assert_eq!(c.get_last_u8().unwrap(), 0x02);
        assert_eq!(c.get_last_u8().unwrap(), 0x01);
        assert_eq!(c.get_last_u8().unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn test_peek_does_not_consume() {
        let data = [0x16, 0x03];
        let c = ByteCursor::new(&data);
        assert!(c.peek_tag(0x16));
        assert!(!c.peek_tag(0x17));
        assert_eq!(c.len(), 2);
    }

    #[test]
    fn test_skip() {
        let data = [0x01, 0x02, 0x03];
        let mut c = ByteCursor::new(&data);
        c.skip(2).unwrap();
        assert_eq!(c.get_u8().unwrap(), 0x03);
        assert_eq!(c.skip(1).unwrap_err(), CodecError::Truncated);
    }

    #[test]
    fn test_get_array() {
        let data = [0xAA; 32];
        let mut c = ByteCursor::new(&data);
        let arr: [u8; 32] = c.get_array().unwrap();
        assert_eq!(arr, [0xAA; 32]);
        assert!(c.is_empty());
    }
}
