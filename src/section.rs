//! Sections: header fields plus owned raw content.

use bitflags::bitflags;

use crate::error::ParseError;
use crate::view::ByteView;

/// On-disk size of IMAGE_SECTION_HEADER.
pub const SECTION_HEADER_SIZE: usize = 40;

bitflags! {
    /// IMAGE_SCN_* section characteristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SectionFlags: u32 {
        const CNT_CODE = 0x0000_0020;
        const CNT_INITIALIZED_DATA = 0x0000_0040;
        const CNT_UNINITIALIZED_DATA = 0x0000_0080;
        const LNK_INFO = 0x0000_0200;
        const LNK_REMOVE = 0x0000_0800;
        const LNK_COMDAT = 0x0000_1000;
        const GPREL = 0x0000_8000;
        const MEM_DISCARDABLE = 0x0200_0000;
        const MEM_NOT_CACHED = 0x0400_0000;
        const MEM_NOT_PAGED = 0x0800_0000;
        const MEM_SHARED = 0x1000_0000;
        const MEM_EXECUTE = 0x2000_0000;
        const MEM_READ = 0x4000_0000;
        const MEM_WRITE = 0x8000_0000;
    }
}

/// A section: the forty header bytes plus the raw content they describe.
///
/// `[virtual_address, virtual_address + virtual_size)` spans of distinct
/// sections must not overlap, and neither must their raw file ranges; the
/// builder re-checks both before serializing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    /// Raw 8-byte name, NUL padded. Need not be unique.
    pub name: [u8; 8],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub sizeof_raw_data: u32,
    pub pointerto_raw_data: u32,
    pub pointerto_relocations: u32,
    pub pointerto_linenumbers: u32,
    pub numberof_relocations: u16,
    pub numberof_linenumbers: u16,
    pub characteristics: SectionFlags,
    /// Bytes backing the section on disk. May be shorter than
    /// `sizeof_raw_data` only transiently, during edits; the builder pads
    /// with zeroes up to the aligned raw size.
    pub content: Vec<u8>,
}

impl Section {
    /// A fresh section with the given name (truncated to 8 bytes) and
    /// content; addresses and sizes are assigned by the binary's editors.
    pub fn new(name: &str, content: Vec<u8>, characteristics: SectionFlags) -> Self {
        let mut section = Self {
            name: [0u8; 8],
            virtual_size: content.len() as u32,
            virtual_address: 0,
            sizeof_raw_data: 0,
            pointerto_raw_data: 0,
            pointerto_relocations: 0,
            pointerto_linenumbers: 0,
            numberof_relocations: 0,
            numberof_linenumbers: 0,
            characteristics,
            content,
        };
        section.set_name(name);
        section
    }

    /// Decode the header at `offset`; content is attached by the parser.
    pub fn parse_header(view: &ByteView<'_>, offset: usize) -> Result<Self, ParseError> {
        let mut name = [0u8; 8];
        name.copy_from_slice(view.slice(offset, 8)?);

        Ok(Self {
            name,
            virtual_size: view.read_u32(offset + 8)?,
            virtual_address: view.read_u32(offset + 12)?,
            sizeof_raw_data: view.read_u32(offset + 16)?,
            pointerto_raw_data: view.read_u32(offset + 20)?,
            pointerto_relocations: view.read_u32(offset + 24)?,
            pointerto_linenumbers: view.read_u32(offset + 28)?,
            numberof_relocations: view.read_u16(offset + 32)?,
            numberof_linenumbers: view.read_u16(offset + 34)?,
            characteristics: SectionFlags::from_bits_retain(view.read_u32(offset + 36)?),
            content: Vec::new(),
        })
    }

    /// Encode the header into `out` (must hold [`SECTION_HEADER_SIZE`]
    /// bytes).
    pub fn write_header(&self, out: &mut [u8]) {
        out[0..8].copy_from_slice(&self.name);
        out[8..12].copy_from_slice(&self.virtual_size.to_le_bytes());
        out[12..16].copy_from_slice(&self.virtual_address.to_le_bytes());
        out[16..20].copy_from_slice(&self.sizeof_raw_data.to_le_bytes());
        out[20..24].copy_from_slice(&self.pointerto_raw_data.to_le_bytes());
        out[24..28].copy_from_slice(&self.pointerto_relocations.to_le_bytes());
        out[28..32].copy_from_slice(&self.pointerto_linenumbers.to_le_bytes());
        out[32..34].copy_from_slice(&self.numberof_relocations.to_le_bytes());
        out[34..36].copy_from_slice(&self.numberof_linenumbers.to_le_bytes());
        out[36..40].copy_from_slice(&self.characteristics.bits().to_le_bytes());
    }

    /// Name with trailing NULs stripped.
    pub fn name(&self) -> &str {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(8);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = [0u8; 8];
        let bytes = name.as_bytes();
        let len = bytes.len().min(8);
        self.name[..len].copy_from_slice(&bytes[..len]);
    }

    /// Virtual span occupied once loaded. Sections with a zero virtual
    /// size still map their raw data.
    pub fn virtual_span(&self) -> u32 {
        self.virtual_size.max(self.sizeof_raw_data)
    }

    /// One past the last mapped RVA.
    pub fn end_rva(&self) -> u32 {
        self.virtual_address.saturating_add(self.virtual_span())
    }

    /// One past the last raw file offset.
    pub fn end_offset(&self) -> u32 {
        self.pointerto_raw_data.saturating_add(self.sizeof_raw_data)
    }

    pub fn contains_rva(&self, rva: u32) -> bool {
        rva >= self.virtual_address && rva < self.end_rva()
    }

    pub fn contains_offset(&self, offset: u32) -> bool {
        self.sizeof_raw_data != 0
            && offset >= self.pointerto_raw_data
            && offset < self.end_offset()
    }

    pub fn is_executable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_EXECUTE)
    }

    pub fn is_writable(&self) -> bool {
        self.characteristics.contains(SectionFlags::MEM_WRITE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_truncation() {
        let section = Section::new(".averylongname", Vec::new(), SectionFlags::MEM_READ);
        assert_eq!(section.name(), ".averylo");
    }

    #[test]
    fn test_header_roundtrip() {
        let mut section = Section::new(
            ".text",
            vec![0xCC; 0x100],
            SectionFlags::CNT_CODE | SectionFlags::MEM_EXECUTE | SectionFlags::MEM_READ,
        );
        section.virtual_address = 0x1000;
        section.sizeof_raw_data = 0x200;
        section.pointerto_raw_data = 0x400;

        let mut out = [0u8; SECTION_HEADER_SIZE];
        section.write_header(&mut out);

        let reparsed = Section::parse_header(&ByteView::new(&out), 0).unwrap();
        assert_eq!(reparsed.name(), ".text");
        assert_eq!(reparsed.virtual_address, 0x1000);
        assert!(reparsed.is_executable());
        assert!(!reparsed.is_writable());
    }

    #[test]
    fn test_spans() {
        let mut section = Section::new(".data", vec![0u8; 0x80], SectionFlags::MEM_READ);
        section.virtual_address = 0x2000;
        section.virtual_size = 0x300;
        section.sizeof_raw_data = 0x200;
        section.pointerto_raw_data = 0x600;

        assert!(section.contains_rva(0x2000));
        assert!(section.contains_rva(0x22FF));
        assert!(!section.contains_rva(0x2300));
        assert!(section.contains_offset(0x600));
        assert!(!section.contains_offset(0x800));
    }
}
