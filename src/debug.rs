//! Debug directory entries.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

/// On-disk size of one IMAGE_DEBUG_DIRECTORY record.
pub const DEBUG_ENTRY_SIZE: usize = 28;

const MAX_ENTRIES: usize = 256;

/// IMAGE_DEBUG_TYPE_* values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DebugType {
    Coff,
    CodeView,
    Fpo,
    Misc,
    Exception,
    Fixup,
    OmapToSrc,
    OmapFromSrc,
    Borland,
    Reserved10,
    Clsid,
    VcFeature,
    Pogo,
    Iltcg,
    Mpx,
    Repro,
    ExDllCharacteristics,
    Unknown(u32),
}

impl DebugType {
    pub fn from_u32(value: u32) -> Self {
        match value {
            1 => Self::Coff,
            2 => Self::CodeView,
            3 => Self::Fpo,
            4 => Self::Misc,
            5 => Self::Exception,
            6 => Self::Fixup,
            7 => Self::OmapToSrc,
            8 => Self::OmapFromSrc,
            9 => Self::Borland,
            10 => Self::Reserved10,
            11 => Self::Clsid,
            12 => Self::VcFeature,
            13 => Self::Pogo,
            14 => Self::Iltcg,
            15 => Self::Mpx,
            16 => Self::Repro,
            20 => Self::ExDllCharacteristics,
            other => Self::Unknown(other),
        }
    }

    pub fn to_u32(self) -> u32 {
        match self {
            Self::Coff => 1,
            Self::CodeView => 2,
            Self::Fpo => 3,
            Self::Misc => 4,
            Self::Exception => 5,
            Self::Fixup => 6,
            Self::OmapToSrc => 7,
            Self::OmapFromSrc => 8,
            Self::Borland => 9,
            Self::Reserved10 => 10,
            Self::Clsid => 11,
            Self::VcFeature => 12,
            Self::Pogo => 13,
            Self::Iltcg => 14,
            Self::Mpx => 15,
            Self::Repro => 16,
            Self::ExDllCharacteristics => 20,
            Self::Unknown(other) => other,
        }
    }
}

/// One debug directory record. The payload it points at is kept as an
/// opaque copy; interpreting CodeView and friends is out of scope here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugEntry {
    pub characteristics: u32,
    pub timestamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub debug_type: DebugType,
    pub sizeof_data: u32,
    pub addressof_rawdata: u32,
    pub pointerto_rawdata: u32,
    pub payload: Vec<u8>,
}

/// Decode every record in the debug directory.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    dir: DataDirectory,
) -> Result<Vec<DebugEntry>, ParseError> {
    let base = translate::rva_to_offset(sections, dir.rva)
        .map_err(|_| ParseError::Malformed("debug rva does not translate"))? as usize;

    let count = (dir.size as usize / DEBUG_ENTRY_SIZE).min(MAX_ENTRIES);
    let mut entries = Vec::with_capacity(count);
    for i in 0..count {
        let offset = base + i * DEBUG_ENTRY_SIZE;
        let sizeof_data = view.read_u32(offset + 16)?;
        let pointerto_rawdata = view.read_u32(offset + 24)?;

        // Payload is addressed by file offset; a record whose payload lies
        // outside the file is kept with an empty payload.
        let payload = view
            .slice(pointerto_rawdata as usize, sizeof_data as usize)
            .map(<[u8]>::to_vec)
            .unwrap_or_default();

        entries.push(DebugEntry {
            characteristics: view.read_u32(offset)?,
            timestamp: view.read_u32(offset + 4)?,
            major_version: view.read_u16(offset + 8)?,
            minor_version: view.read_u16(offset + 10)?,
            debug_type: DebugType::from_u32(view.read_u32(offset + 12)?),
            sizeof_data,
            addressof_rawdata: view.read_u32(offset + 20)?,
            pointerto_rawdata,
            payload,
        });
    }

    Ok(entries)
}

/// Encode one record header into `out` (must hold [`DEBUG_ENTRY_SIZE`]
/// bytes).
pub fn write_entry(entry: &DebugEntry, out: &mut [u8]) {
    out[0..4].copy_from_slice(&entry.characteristics.to_le_bytes());
    out[4..8].copy_from_slice(&entry.timestamp.to_le_bytes());
    out[8..10].copy_from_slice(&entry.major_version.to_le_bytes());
    out[10..12].copy_from_slice(&entry.minor_version.to_le_bytes());
    out[12..16].copy_from_slice(&entry.debug_type.to_u32().to_le_bytes());
    out[16..20].copy_from_slice(&entry.sizeof_data.to_le_bytes());
    out[20..24].copy_from_slice(&entry.addressof_rawdata.to_le_bytes());
    out[24..28].copy_from_slice(&entry.pointerto_rawdata.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    #[test]
    fn test_parse_codeview_entry() {
        let mut data = vec![0u8; 0x1400];
        // One record at RVA 0x1000 (offset 0x1000 via flat section).
        data[0x1004..0x1008].copy_from_slice(&0x5F00_0000u32.to_le_bytes()); // timestamp
        data[0x100C..0x1010].copy_from_slice(&2u32.to_le_bytes()); // CodeView
        data[0x1010..0x1014].copy_from_slice(&4u32.to_le_bytes()); // size
        data[0x1018..0x101C].copy_from_slice(&0x1200u32.to_le_bytes()); // file offset
        data[0x1200..0x1204].copy_from_slice(b"RSDS");

        let mut s = Section::new(".rdata", Vec::new(), SectionFlags::CNT_INITIALIZED_DATA);
        s.virtual_address = 0x1000;
        s.virtual_size = 0x400;
        s.sizeof_raw_data = 0x400;
        s.pointerto_raw_data = 0x1000;

        let entries = parse(
            &ByteView::new(&data),
            &[s],
            DataDirectory {
                rva: 0x1000,
                size: DEBUG_ENTRY_SIZE as u32,
            },
        )
        .unwrap();

        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].debug_type, DebugType::CodeView);
        assert_eq!(entries[0].payload, b"RSDS");

        let mut out = [0u8; DEBUG_ENTRY_SIZE];
        write_entry(&entries[0], &mut out);
        assert_eq!(&out[..], &data[0x1000..0x1000 + DEBUG_ENTRY_SIZE]);
    }

    #[test]
    fn test_out_of_file_payload_is_empty() {
        let mut data = vec![0u8; 0x1100];
        data[0x1010..0x1014].copy_from_slice(&0x100u32.to_le_bytes()); // size
        data[0x1018..0x101C].copy_from_slice(&0x9_0000u32.to_le_bytes()); // bogus offset

        let mut s = Section::new(".rdata", Vec::new(), SectionFlags::CNT_INITIALIZED_DATA);
        s.virtual_address = 0x1000;
        s.virtual_size = 0x100;
        s.sizeof_raw_data = 0x100;
        s.pointerto_raw_data = 0x1000;

        let entries = parse(
            &ByteView::new(&data),
            &[s],
            DataDirectory {
                rva: 0x1000,
                size: DEBUG_ENTRY_SIZE as u32,
            },
        )
        .unwrap();
        assert!(entries[0].payload.is_empty());
    }
}
