//! DOS header and stub.

use crate::error::ParseError;
use crate::view::ByteView;

/// `MZ` magic.
pub const DOS_MAGIC: u16 = 0x5A4D;

/// IMAGE_DOS_HEADER. First structure of the file; `e_lfanew` points at the
/// PE signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DosHeader {
    pub magic: u16,
    pub used_bytes_in_last_page: u16,
    pub file_size_in_pages: u16,
    pub numberof_relocation: u16,
    pub header_size_in_paragraphs: u16,
    pub minimum_extra_paragraphs: u16,
    pub maximum_extra_paragraphs: u16,
    pub initial_relative_ss: u16,
    pub initial_sp: u16,
    pub checksum: u16,
    pub initial_ip: u16,
    pub initial_relative_cs: u16,
    pub addressof_relocation_table: u16,
    pub overlay_number: u16,
    pub reserved: [u16; 4],
    pub oem_id: u16,
    pub oem_info: u16,
    pub reserved2: [u16; 10],
    /// File offset of the PE signature.
    pub addressof_new_exeheader: u32,
}

impl DosHeader {
    /// Size of the DOS header in bytes.
    pub const SIZE: usize = 64;

    /// Decode the header at offset 0 of `view`, checking the `MZ` magic.
    pub fn parse(view: &ByteView<'_>) -> Result<Self, ParseError> {
        let magic = view.read_u16(0)?;
        if magic != DOS_MAGIC {
            return Err(ParseError::BadDosMagic(magic));
        }

        let mut reserved = [0u16; 4];
        for (i, slot) in reserved.iter_mut().enumerate() {
            *slot = view.read_u16(28 + i * 2)?;
        }
        let mut reserved2 = [0u16; 10];
        for (i, slot) in reserved2.iter_mut().enumerate() {
            *slot = view.read_u16(40 + i * 2)?;
        }

        Ok(Self {
            magic,
            used_bytes_in_last_page: view.read_u16(2)?,
            file_size_in_pages: view.read_u16(4)?,
            numberof_relocation: view.read_u16(6)?,
            header_size_in_paragraphs: view.read_u16(8)?,
            minimum_extra_paragraphs: view.read_u16(10)?,
            maximum_extra_paragraphs: view.read_u16(12)?,
            initial_relative_ss: view.read_u16(14)?,
            initial_sp: view.read_u16(16)?,
            checksum: view.read_u16(18)?,
            initial_ip: view.read_u16(20)?,
            initial_relative_cs: view.read_u16(22)?,
            addressof_relocation_table: view.read_u16(24)?,
            overlay_number: view.read_u16(26)?,
            reserved,
            oem_id: view.read_u16(36)?,
            oem_info: view.read_u16(38)?,
            reserved2,
            addressof_new_exeheader: view.read_u32(60)?,
        })
    }

    /// Encode the header into `out` (must hold [`Self::SIZE`] bytes).
    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.magic.to_le_bytes());
        out[2..4].copy_from_slice(&self.used_bytes_in_last_page.to_le_bytes());
        out[4..6].copy_from_slice(&self.file_size_in_pages.to_le_bytes());
        out[6..8].copy_from_slice(&self.numberof_relocation.to_le_bytes());
        out[8..10].copy_from_slice(&self.header_size_in_paragraphs.to_le_bytes());
        out[10..12].copy_from_slice(&self.minimum_extra_paragraphs.to_le_bytes());
        out[12..14].copy_from_slice(&self.maximum_extra_paragraphs.to_le_bytes());
        out[14..16].copy_from_slice(&self.initial_relative_ss.to_le_bytes());
        out[16..18].copy_from_slice(&self.initial_sp.to_le_bytes());
        out[18..20].copy_from_slice(&self.checksum.to_le_bytes());
        out[20..22].copy_from_slice(&self.initial_ip.to_le_bytes());
        out[22..24].copy_from_slice(&self.initial_relative_cs.to_le_bytes());
        out[24..26].copy_from_slice(&self.addressof_relocation_table.to_le_bytes());
        out[26..28].copy_from_slice(&self.overlay_number.to_le_bytes());
        for (i, val) in self.reserved.iter().enumerate() {
            out[28 + i * 2..30 + i * 2].copy_from_slice(&val.to_le_bytes());
        }
        out[36..38].copy_from_slice(&self.oem_id.to_le_bytes());
        out[38..40].copy_from_slice(&self.oem_info.to_le_bytes());
        for (i, val) in self.reserved2.iter().enumerate() {
            out[40 + i * 2..42 + i * 2].copy_from_slice(&val.to_le_bytes());
        }
        out[60..64].copy_from_slice(&self.addressof_new_exeheader.to_le_bytes());
    }
}

impl Default for DosHeader {
    /// Header matching what link.exe emits for a fresh image, with the PE
    /// signature at 0x80.
    fn default() -> Self {
        Self {
            magic: DOS_MAGIC,
            used_bytes_in_last_page: 0x90,
            file_size_in_pages: 0x03,
            numberof_relocation: 0,
            header_size_in_paragraphs: 0x04,
            minimum_extra_paragraphs: 0,
            maximum_extra_paragraphs: 0xFFFF,
            initial_relative_ss: 0,
            initial_sp: 0xB8,
            checksum: 0,
            initial_ip: 0,
            initial_relative_cs: 0,
            addressof_relocation_table: 0x40,
            overlay_number: 0,
            reserved: [0; 4],
            oem_id: 0,
            oem_info: 0,
            reserved2: [0; 10],
            addressof_new_exeheader: 0x80,
        }
    }
}

/// The stock stub program placed between the DOS header and the PE
/// signature when creating a binary from scratch, padded so the PE
/// signature lands at 0x80.
pub fn default_stub() -> Vec<u8> {
    let mut stub = vec![0u8; 0x80 - DosHeader::SIZE];
    let program: &[u8] =
        b"\x0e\x1f\xba\x0e\x00\xb4\x09\xcd\x21\xb8\x01\x4c\xcd\x21This program cannot be run in DOS mode.\r\r\n$";
    stub[..program.len()].copy_from_slice(program);
    stub
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_bad_magic() {
        let data = [0u8; 64];
        let result = DosHeader::parse(&ByteView::new(&data));
        assert!(matches!(result, Err(ParseError::BadDosMagic(0))));
    }

    #[test]
    fn test_rejects_short_buffer() {
        let data = [0x4D, 0x5A, 0x00];
        let result = DosHeader::parse(&ByteView::new(&data));
        assert!(matches!(result, Err(ParseError::Truncated { .. })));
    }

    #[test]
    fn test_roundtrip() {
        let header = DosHeader::default();
        let mut out = [0u8; DosHeader::SIZE];
        header.write(&mut out);

        let reparsed = DosHeader::parse(&ByteView::new(&out)).unwrap();
        assert_eq!(header, reparsed);
        assert_eq!(reparsed.addressof_new_exeheader, 0x80);
    }

    #[test]
    fn test_default_stub_pads_to_pe_offset() {
        assert_eq!(default_stub().len() + DosHeader::SIZE, 0x80);
    }
}
