//! Bounded, checked view over the raw input buffer.
//!
//! Every multi-byte read is validated against the buffer length before it
//! happens, so no header field can steer a read past the end of the input.

use crate::error::ParseError;

type Result<T> = std::result::Result<T, ParseError>;

/// Read-only window over the bytes being parsed.
#[derive(Debug, Clone, Copy)]
pub struct ByteView<'a> {
    data: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Total length of the underlying buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whole underlying buffer.
    pub fn bytes(&self) -> &'a [u8] {
        self.data
    }

    fn check(&self, offset: usize, needed: usize) -> Result<()> {
        match offset.checked_add(needed) {
            Some(end) if end <= self.data.len() => Ok(()),
            _ => Err(ParseError::Truncated {
                offset,
                needed,
                available: self.data.len().saturating_sub(offset.min(self.data.len())),
            }),
        }
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        self.check(offset, len)?;
        Ok(&self.data[offset..offset + len])
    }

    /// Borrow everything from `offset` to the end of the buffer.
    pub fn slice_from(&self, offset: usize) -> Result<&'a [u8]> {
        self.check(offset, 0)?;
        Ok(&self.data[offset..])
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8> {
        self.check(offset, 1)?;
        Ok(self.data[offset])
    }

    pub fn read_u16(&self, offset: usize) -> Result<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn read_u32(&self, offset: usize) -> Result<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&self, offset: usize) -> Result<u64> {
        let b = self.slice(offset, 8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    pub fn read_i32(&self, offset: usize) -> Result<i32> {
        let b = self.slice(offset, 4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a NUL-terminated ASCII string at `offset`, scanning at most
    /// `max` bytes. Stops at the buffer end if no terminator is found.
    pub fn read_cstr(&self, offset: usize, max: usize) -> Result<String> {
        self.check(offset, 0)?;
        let window = &self.data[offset..self.data.len().min(offset + max)];
        let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
        Ok(String::from_utf8_lossy(&window[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checked_reads() {
        let data = [0x4D, 0x5A, 0x90, 0x00, 0x03, 0x00, 0x00, 0x00];
        let view = ByteView::new(&data);

        assert_eq!(view.read_u16(0).unwrap(), 0x5A4D);
        assert_eq!(view.read_u32(0).unwrap(), 0x00905A4D);
        assert_eq!(view.read_u64(0).unwrap(), 0x0000_0003_0090_5A4D);
    }

    #[test]
    fn test_read_past_end() {
        let data = [0x4D, 0x5A];
        let view = ByteView::new(&data);

        assert!(matches!(
            view.read_u32(0),
            Err(ParseError::Truncated { needed: 4, .. })
        ));
        assert!(view.read_u8(2).is_err());
    }

    #[test]
    fn test_overflowing_offset() {
        let data = [0u8; 16];
        let view = ByteView::new(&data);
        assert!(view.slice(usize::MAX - 2, 8).is_err());
    }

    #[test]
    fn test_read_cstr() {
        let data = b"KERNEL32.DLL\0junk";
        let view = ByteView::new(data);
        assert_eq!(view.read_cstr(0, 64).unwrap(), "KERNEL32.DLL");

        // No terminator before the end: take what is there.
        assert_eq!(view.read_cstr(13, 64).unwrap(), "junk");
    }
}
