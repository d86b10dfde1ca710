//! Base relocations: 4 KiB page blocks of (offset, type) fixups.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

/// On-disk size of the IMAGE_BASE_RELOCATION block header.
pub const BLOCK_HEADER_SIZE: usize = 8;

/// Fixup kinds (high nibble of an entry).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RelocationKind {
    /// Padding entry, skipped by the loader.
    Absolute = 0,
    High = 1,
    Low = 2,
    HighLow = 3,
    HighAdj = 4,
    MachineSpecific5 = 5,
    Reserved = 6,
    MachineSpecific7 = 7,
    MachineSpecific8 = 8,
    MachineSpecific9 = 9,
    Dir64 = 10,
}

impl RelocationKind {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::High,
            2 => Self::Low,
            3 => Self::HighLow,
            4 => Self::HighAdj,
            5 => Self::MachineSpecific5,
            6 => Self::Reserved,
            7 => Self::MachineSpecific7,
            8 => Self::MachineSpecific8,
            9 => Self::MachineSpecific9,
            10 => Self::Dir64,
            _ => Self::Absolute,
        }
    }
}

/// One fixup within a block: a 12-bit page offset and a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocationEntry {
    pub kind: RelocationKind,
    pub offset: u16,
}

impl RelocationEntry {
    pub fn from_u16(value: u16) -> Self {
        Self {
            kind: RelocationKind::from_u8((value >> 12) as u8),
            offset: value & 0x0FFF,
        }
    }

    pub fn to_u16(self) -> u16 {
        ((self.kind as u16) << 12) | (self.offset & 0x0FFF)
    }

    pub fn is_padding(self) -> bool {
        matches!(self.kind, RelocationKind::Absolute)
    }
}

/// Fixups for one 4 KiB page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelocationBlock {
    /// Page-aligned base RVA of every entry in the block.
    pub page_rva: u32,
    pub entries: Vec<RelocationEntry>,
}

impl RelocationBlock {
    pub fn new(page_rva: u32) -> Self {
        Self {
            page_rva,
            entries: Vec::new(),
        }
    }

    /// Absolute RVA of one entry's fixup target.
    pub fn entry_rva(&self, entry: RelocationEntry) -> u32 {
        self.page_rva.saturating_add(entry.offset as u32)
    }

    /// On-disk block size: header plus entries, padded to 4 bytes as the
    /// loader expects.
    pub fn byte_size(&self) -> usize {
        let raw = BLOCK_HEADER_SIZE + self.entries.len() * 2;
        raw + raw % 4
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        let size = self.byte_size();
        out.extend_from_slice(&self.page_rva.to_le_bytes());
        out.extend_from_slice(&(size as u32).to_le_bytes());
        for entry in &self.entries {
            out.extend_from_slice(&entry.to_u16().to_le_bytes());
        }
        // Pad odd entry counts with an ABSOLUTE entry.
        if (BLOCK_HEADER_SIZE + self.entries.len() * 2) % 4 != 0 {
            out.extend_from_slice(&0u16.to_le_bytes());
        }
    }
}

/// Decode the relocation directory spanned by `dir`.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    dir: DataDirectory,
) -> Result<Vec<RelocationBlock>, ParseError> {
    let base = translate::rva_to_offset(sections, dir.rva)
        .map_err(|_| ParseError::Malformed("relocation rva does not translate"))? as usize;
    let table = ByteView::new(view.slice(base, dir.size as usize)?);

    let mut blocks = Vec::new();
    let mut cursor = 0usize;
    while cursor + BLOCK_HEADER_SIZE <= table.len() {
        let page_rva = table.read_u32(cursor)?;
        let block_size = table.read_u32(cursor + 4)? as usize;
        if page_rva == 0 || block_size < BLOCK_HEADER_SIZE {
            break;
        }

        let numberof_entries = (block_size.min(table.len() - cursor) - BLOCK_HEADER_SIZE) / 2;
        let mut entries = Vec::with_capacity(numberof_entries);
        for i in 0..numberof_entries {
            let value = table.read_u16(cursor + BLOCK_HEADER_SIZE + i * 2)?;
            entries.push(RelocationEntry::from_u16(value));
        }

        blocks.push(RelocationBlock { page_rva, entries });
        cursor += block_size;
    }

    Ok(blocks)
}

/// Serialize blocks back into directory form.
pub fn serialize(blocks: &[RelocationBlock]) -> Vec<u8> {
    let mut out = Vec::with_capacity(blocks.iter().map(RelocationBlock::byte_size).sum());
    for block in blocks {
        block.write_into(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    #[test]
    fn test_entry_packing() {
        let entry = RelocationEntry {
            kind: RelocationKind::Dir64,
            offset: 0xABC,
        };
        assert_eq!(entry.to_u16(), 0xAABC);
        assert_eq!(RelocationEntry::from_u16(0xAABC), entry);
        assert!(RelocationEntry::from_u16(0).is_padding());
    }

    #[test]
    fn test_serialize_pads_odd_blocks() {
        let mut block = RelocationBlock::new(0x1000);
        block.entries.push(RelocationEntry {
            kind: RelocationKind::HighLow,
            offset: 0x10,
        });
        let bytes = serialize(&[block]);
        // Header (8) + 1 entry (2) + padding (2).
        assert_eq!(bytes.len(), 12);
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 12);
        assert_eq!(&bytes[10..12], &[0, 0]);
    }

    #[test]
    fn test_parse_roundtrip() {
        let mut block = RelocationBlock::new(0x3000);
        block.entries.push(RelocationEntry {
            kind: RelocationKind::Dir64,
            offset: 0x20,
        });
        block.entries.push(RelocationEntry {
            kind: RelocationKind::Dir64,
            offset: 0x48,
        });
        let raw = serialize(&[block.clone()]);

        let mut section = Section::new(".reloc", raw.clone(), SectionFlags::MEM_DISCARDABLE);
        section.virtual_address = 0x3000;
        section.virtual_size = raw.len() as u32;
        section.sizeof_raw_data = raw.len() as u32;
        section.pointerto_raw_data = 0;

        let data = raw;
        let blocks = parse(
            &ByteView::new(&data),
            &[section],
            DataDirectory {
                rva: 0x3000,
                size: data.len() as u32,
            },
        )
        .unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].page_rva, 0x3000);
        assert_eq!(blocks[0].entries, block.entries);
        assert_eq!(blocks[0].entry_rva(blocks[0].entries[1]), 0x3048);
    }
}
