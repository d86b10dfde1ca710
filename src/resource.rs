//! Resource tree, decoded structurally. Leaf payloads stay opaque bytes;
//! version info, icons and friends are not interpreted.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

const DIRECTORY_SIZE: usize = 16;
const ENTRY_SIZE: usize = 8;

/// Resource trees are three levels deep in well-formed files (type, id,
/// language); a hard cap keeps crafted self-referencing tables finite.
const MAX_DEPTH: usize = 8;

const MAX_ENTRIES: usize = 4096;

/// Entry identifier: a UTF-16 name or a numeric id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceId {
    Name(String),
    Id(u32),
}

/// One node of the resource tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceNode {
    Directory {
        characteristics: u32,
        timestamp: u32,
        major_version: u16,
        minor_version: u16,
        children: Vec<(ResourceId, ResourceNode)>,
    },
    Data {
        /// RVA of the payload as recorded in the data entry.
        rva: u32,
        codepage: u32,
        content: Vec<u8>,
    },
}

impl ResourceNode {
    /// Child with the given id, directories only.
    pub fn child(&self, id: &ResourceId) -> Option<&ResourceNode> {
        match self {
            Self::Directory { children, .. } => {
                children.iter().find(|(i, _)| i == id).map(|(_, n)| n)
            }
            Self::Data { .. } => None,
        }
    }

    /// Total node count, the root included.
    pub fn count(&self) -> usize {
        match self {
            Self::Directory { children, .. } => {
                1 + children.iter().map(|(_, n)| n.count()).sum::<usize>()
            }
            Self::Data { .. } => 1,
        }
    }
}

struct Walker<'a, 'b> {
    view: &'a ByteView<'b>,
    sections: &'a [Section],
    /// File offset of the table start; entry offsets are relative to it.
    table: usize,
}

impl Walker<'_, '_> {
    fn name_at(&self, offset: u32) -> Result<String, ParseError> {
        let at = self.table + (offset & 0x7FFF_FFFF) as usize;
        let len = self.view.read_u16(at)? as usize;
        let mut units = Vec::with_capacity(len.min(256));
        for i in 0..len.min(256) {
            units.push(self.view.read_u16(at + 2 + i * 2)?);
        }
        Ok(String::from_utf16_lossy(&units))
    }

    fn directory_at(&self, offset: usize, depth: usize) -> Result<ResourceNode, ParseError> {
        if depth > MAX_DEPTH {
            return Err(ParseError::Malformed("resource tree too deep"));
        }
        let base = self.table + offset;

        let numberof_named = self.view.read_u16(base + 12)? as usize;
        let numberof_ids = self.view.read_u16(base + 14)? as usize;
        let total = (numberof_named + numberof_ids).min(MAX_ENTRIES);

        let mut children = Vec::with_capacity(total);
        for i in 0..total {
            let entry = base + DIRECTORY_SIZE + i * ENTRY_SIZE;
            let id_field = self.view.read_u32(entry)?;
            let offset_field = self.view.read_u32(entry + 4)?;

            let id = if id_field & 0x8000_0000 != 0 {
                ResourceId::Name(self.name_at(id_field)?)
            } else {
                ResourceId::Id(id_field)
            };

            let node = if offset_field & 0x8000_0000 != 0 {
                self.directory_at((offset_field & 0x7FFF_FFFF) as usize, depth + 1)?
            } else {
                self.data_at(offset_field as usize)?
            };
            children.push((id, node));
        }

        Ok(ResourceNode::Directory {
            characteristics: self.view.read_u32(base)?,
            timestamp: self.view.read_u32(base + 4)?,
            major_version: self.view.read_u16(base + 8)?,
            minor_version: self.view.read_u16(base + 10)?,
            children,
        })
    }

    fn data_at(&self, offset: usize) -> Result<ResourceNode, ParseError> {
        let base = self.table + offset;
        let rva = self.view.read_u32(base)?;
        let size = self.view.read_u32(base + 4)?;
        let codepage = self.view.read_u32(base + 8)?;

        // Payloads that do not translate are kept empty rather than failing
        // the whole tree.
        let content = translate::rva_to_offset(self.sections, rva)
            .ok()
            .and_then(|o| self.view.slice(o as usize, size as usize).ok())
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        Ok(ResourceNode::Data {
            rva,
            codepage,
            content,
        })
    }
}

/// Decode the resource tree rooted at `dir`.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    dir: DataDirectory,
) -> Result<ResourceNode, ParseError> {
    let table = translate::rva_to_offset(sections, dir.rva)
        .map_err(|_| ParseError::Malformed("resource rva does not translate"))?
        as usize;

    let walker = Walker {
        view,
        sections,
        table,
    };
    walker.directory_at(0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    fn flat_section(len: u32) -> Vec<Section> {
        let mut s = Section::new(".rsrc", Vec::new(), SectionFlags::CNT_INITIALIZED_DATA);
        s.virtual_address = 0x1000;
        s.virtual_size = len;
        s.sizeof_raw_data = len;
        s.pointerto_raw_data = 0x1000;
        vec![s]
    }

    #[test]
    fn test_two_level_tree_with_named_entry() {
        let mut data = vec![0u8; 0x2000];

        // Root directory at table offset 0: one id entry pointing at a
        // subdirectory at offset 0x40.
        data[0x100E..0x1010].copy_from_slice(&1u16.to_le_bytes());
        data[0x1010..0x1014].copy_from_slice(&24u32.to_le_bytes()); // RT_MANIFEST
        data[0x1014..0x1018].copy_from_slice(&0x8000_0040u32.to_le_bytes());

        // Subdirectory at 0x40: one named entry pointing at a data entry at
        // offset 0x80. Name at table offset 0x60.
        data[0x104C..0x104E].copy_from_slice(&1u16.to_le_bytes());
        data[0x1050..0x1054].copy_from_slice(&0x8000_0060u32.to_le_bytes());
        data[0x1054..0x1058].copy_from_slice(&0x80u32.to_le_bytes());

        // UTF-16 name "APP".
        data[0x1060..0x1062].copy_from_slice(&3u16.to_le_bytes());
        for (i, c) in "APP".encode_utf16().enumerate() {
            data[0x1062 + i * 2..0x1064 + i * 2].copy_from_slice(&c.to_le_bytes());
        }

        // Data entry at 0x80: payload at RVA 0x1200, 5 bytes.
        data[0x1080..0x1084].copy_from_slice(&0x1200u32.to_le_bytes());
        data[0x1084..0x1088].copy_from_slice(&5u32.to_le_bytes());
        data[0x1200..0x1205].copy_from_slice(b"<xml>");

        let root = parse(
            &ByteView::new(&data),
            &flat_section(0x1000),
            DataDirectory {
                rva: 0x1000,
                size: 0x300,
            },
        )
        .unwrap();

        assert_eq!(root.count(), 3);
        let manifest = root.child(&ResourceId::Id(24)).unwrap();
        let leaf = manifest.child(&ResourceId::Name("APP".into())).unwrap();
        match leaf {
            ResourceNode::Data { rva, content, .. } => {
                assert_eq!(*rva, 0x1200);
                assert_eq!(content, b"<xml>");
            }
            ResourceNode::Directory { .. } => panic!("expected data node"),
        }
    }

    #[test]
    fn test_self_referencing_tree_is_rejected() {
        let mut data = vec![0u8; 0x1100];
        // Root with one entry pointing back at the root.
        data[0x100E..0x1010].copy_from_slice(&1u16.to_le_bytes());
        data[0x1014..0x1018].copy_from_slice(&0x8000_0000u32.to_le_bytes());

        let result = parse(
            &ByteView::new(&data),
            &flat_section(0x100),
            DataDirectory {
                rva: 0x1000,
                size: 0x100,
            },
        );
        assert!(matches!(result, Err(ParseError::Malformed(_))));
    }
}
