//! Bounds-checked byte reader shared by the format loaders

use crate::error::{Error, Result};

/// Cursor over raw module bytes
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    /// Create a new reader positioned at the start of `data`
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Number of bytes left after the current position
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Get current position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Seek to an absolute position
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::decode(format!(
                "Seek to {pos:#x} past end of data ({:#x})",
                self.data.len()
            )));
        }
        self.pos = pos;
        Ok(())
    }

    /// Advance without reading
    pub fn skip(&mut self, len: usize) -> Result<()> {
        self.seek(self.pos.saturating_add(len))
    }

    /// Read a single byte
    pub fn read_u8(&mut self) -> Result<u8> {
        let b = *self
            .data
            .get(self.pos)
            .ok_or_else(|| Error::decode("Unexpected end of data"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    /// Read a 16-bit little-endian value
    pub fn read_u16_le(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.read_array()?))
    }

    /// Read a 16-bit big-endian value
    pub fn read_u16_be(&mut self) -> Result<u16> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    /// Read a 32-bit little-endian value
    pub fn read_u32_le(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    /// Borrow the next `len` bytes
    pub fn read_slice(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .ok_or_else(|| Error::decode("Unexpected end of data"))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Borrow up to `len` bytes, stopping early at the end of the buffer
    pub fn read_slice_truncated(&mut self, len: usize) -> &'a [u8] {
        let end = self.pos.saturating_add(len).min(self.data.len());
        let slice = &self.data[self.pos.min(end)..end];
        self.pos = end;
        slice
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_slice(N)?);
        Ok(out)
    }

    /// Read a fixed-width, NUL-padded text field
    pub fn read_string(&mut self, len: usize) -> Result<String> {
        Ok(decode_text(self.read_slice(len)?))
    }

    /// Read bytes at a specific offset without advancing position
    pub fn peek_slice_at(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .filter(|&end| end <= self.data.len())
            .map(|end| &self.data[offset..end])
            .ok_or_else(|| Error::decode("Offset out of bounds"))
    }
}

/// Decode a fixed-width tracker text field.
///
/// Text stops at the first NUL; trailing spaces are dropped and non-printable bytes
/// become spaces. Bytes above 0x7F are taken as Latin-1.
pub fn decode_text(raw: &[u8]) -> String {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let text: String = raw[..end]
        .iter()
        .map(|&b| match b {
            0x20..=0x7E | 0xA0..=0xFF => b as char,
            _ => ' ',
        })
        .collect();
    text.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endianness() {
        let data = [0x12, 0x34, 0x12, 0x34, 0x78, 0x56, 0x34, 0x12];
        let mut reader = ByteReader::new(&data);
        assert_eq!(reader.read_u16_le().unwrap(), 0x3412);
        assert_eq!(reader.read_u16_be().unwrap(), 0x1234);
        assert_eq!(reader.read_u32_le().unwrap(), 0x12345678);
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_overrun_is_decode_error() {
        let data = [0x01];
        let mut reader = ByteReader::new(&data);
        assert!(matches!(reader.read_u16_le(), Err(Error::Decode(_))));
        assert!(reader.seek(2).is_err());
        assert!(reader.peek_slice_at(usize::MAX, 2).is_err());
    }

    #[test]
    fn test_truncated_slice() {
        let data = [1, 2, 3];
        let mut reader = ByteReader::new(&data);
        reader.skip(1).unwrap();
        assert_eq!(reader.read_slice_truncated(10), &[2, 3]);
        assert_eq!(reader.read_slice_truncated(10), &[] as &[u8]);
    }

    #[test]
    fn test_decode_text() {
        assert_eq!(decode_text(b"Hello\0junk"), "Hello");
        assert_eq!(decode_text(b"Pad   "), "Pad");
        assert_eq!(decode_text(b"a\x01b"), "a b");
        assert_eq!(decode_text(b""), "");
    }
}
