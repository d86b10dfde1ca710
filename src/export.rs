//! Export table.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

/// On-disk size of IMAGE_EXPORT_DIRECTORY.
pub const EXPORT_DIRECTORY_SIZE: usize = 40;

const MAX_EXPORTS: u32 = 0x10000;

/// Where an exported symbol points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportTarget {
    /// RVA of the exported code or data.
    Address(u32),
    /// Forwarded to another library, e.g. `NTDLL.RtlAllocateHeap`.
    Forwarded(String),
}

/// One exported symbol.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportEntry {
    /// Exported name; `None` for ordinal-only exports.
    pub name: Option<String>,
    /// Biased ordinal (`ordinal_base + index`).
    pub ordinal: u32,
    pub target: ExportTarget,
}

/// The decoded export directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    /// Name of the exporting module, as recorded in the directory.
    pub name: String,
    pub timestamp: u32,
    pub major_version: u16,
    pub minor_version: u16,
    pub ordinal_base: u32,
    pub entries: Vec<ExportEntry>,
}

impl Export {
    pub fn entry(&self, name: &str) -> Option<&ExportEntry> {
        self.entries.iter().find(|e| e.name.as_deref() == Some(name))
    }
}

fn offset_of(sections: &[Section], rva: u32) -> Result<usize, ParseError> {
    translate::rva_to_offset(sections, rva)
        .map(|o| o as usize)
        .map_err(|_| ParseError::Malformed("export rva does not translate"))
}

/// Decode the export directory pointed at by `dir`.
///
/// An address-table RVA falling inside the directory's own span is a
/// forwarder string rather than code.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    dir: DataDirectory,
) -> Result<Export, ParseError> {
    let base = offset_of(sections, dir.rva)?;

    let timestamp = view.read_u32(base + 4)?;
    let major_version = view.read_u16(base + 8)?;
    let minor_version = view.read_u16(base + 10)?;
    let name_rva = view.read_u32(base + 12)?;
    let ordinal_base = view.read_u32(base + 16)?;
    let numberof_functions = view.read_u32(base + 20)?.min(MAX_EXPORTS);
    let numberof_names = view.read_u32(base + 24)?.min(MAX_EXPORTS);
    let addresses_rva = view.read_u32(base + 28)?;
    let names_rva = view.read_u32(base + 32)?;
    let name_ordinals_rva = view.read_u32(base + 36)?;

    let name = view.read_cstr(offset_of(sections, name_rva)?, 256)?;

    // Address table first, names attached afterwards through the
    // name-ordinal table.
    let addresses_offset = offset_of(sections, addresses_rva)?;
    let mut entries = Vec::with_capacity(numberof_functions as usize);
    for i in 0..numberof_functions {
        let rva = view.read_u32(addresses_offset + i as usize * 4)?;
        let target = if rva >= dir.rva && rva < dir.rva.saturating_add(dir.size) {
            ExportTarget::Forwarded(view.read_cstr(offset_of(sections, rva)?, 512)?)
        } else {
            ExportTarget::Address(rva)
        };
        let ordinal = ordinal_base
            .checked_add(i)
            .ok_or(ParseError::Malformed("export ordinal overflows"))?;
        entries.push(ExportEntry {
            name: None,
            ordinal,
            target,
        });
    }

    let names_offset = offset_of(sections, names_rva)?;
    let ordinals_offset = offset_of(sections, name_ordinals_rva)?;
    for i in 0..numberof_names as usize {
        let symbol_rva = view.read_u32(names_offset + i * 4)?;
        let index = view.read_u16(ordinals_offset + i * 2)? as usize;
        let symbol = view.read_cstr(offset_of(sections, symbol_rva)?, 512)?;
        if let Some(entry) = entries.get_mut(index) {
            entry.name = Some(symbol);
        }
    }

    Ok(Export {
        name,
        timestamp,
        major_version,
        minor_version,
        ordinal_base,
        entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    /// One flat section at RVA 0x1000 backed by `bytes` at offset 0x1000,
    /// so RVA == offset and the test can poke absolute positions.
    fn flat_section(len: u32) -> Vec<Section> {
        let mut s = Section::new(".edata", Vec::new(), SectionFlags::CNT_INITIALIZED_DATA);
        s.virtual_address = 0x1000;
        s.virtual_size = len;
        s.sizeof_raw_data = len;
        s.pointerto_raw_data = 0x1000;
        vec![s]
    }

    #[test]
    fn test_parse_named_and_forwarded_exports() {
        let mut data = vec![0u8; 0x2000];
        let dir = DataDirectory {
            rva: 0x1000,
            size: 0x200,
        };

        // Directory header at 0x1000.
        data[0x100C..0x1010].copy_from_slice(&0x1100u32.to_le_bytes()); // module name rva
        data[0x1010..0x1014].copy_from_slice(&1u32.to_le_bytes()); // ordinal base
        data[0x1014..0x1018].copy_from_slice(&2u32.to_le_bytes()); // function count
        data[0x1018..0x101C].copy_from_slice(&1u32.to_le_bytes()); // name count
        data[0x101C..0x1020].copy_from_slice(&0x1120u32.to_le_bytes()); // address table
        data[0x1020..0x1024].copy_from_slice(&0x1130u32.to_le_bytes()); // name pointers
        data[0x1024..0x1028].copy_from_slice(&0x1140u32.to_le_bytes()); // name ordinals

        data[0x1100..0x1109].copy_from_slice(b"TEST.DLL\0");
        // Function 0: plain address. Function 1: forwarder (inside dir span).
        data[0x1120..0x1124].copy_from_slice(&0x4000u32.to_le_bytes());
        data[0x1124..0x1128].copy_from_slice(&0x1150u32.to_le_bytes());
        data[0x1130..0x1134].copy_from_slice(&0x1170u32.to_le_bytes()); // name rva
        data[0x1140..0x1142].copy_from_slice(&0u16.to_le_bytes()); // index 0
        data[0x1150..0x1161].copy_from_slice(b"NTDLL.RtlDoThing\0");
        data[0x1170..0x1174].copy_from_slice(b"Fn0\0");

        let view = ByteView::new(&data);
        let sections = flat_section(0x1000);
        let export = parse(&view, &sections, dir).unwrap();

        assert_eq!(export.name, "TEST.DLL");
        assert_eq!(export.ordinal_base, 1);
        assert_eq!(export.entries.len(), 2);

        let named = export.entry("Fn0").unwrap();
        assert_eq!(named.ordinal, 1);
        assert_eq!(named.target, ExportTarget::Address(0x4000));

        assert_eq!(
            export.entries[1].target,
            ExportTarget::Forwarded("NTDLL.RtlDoThing".into())
        );
        assert_eq!(export.entries[1].name, None);
    }

    #[test]
    fn test_untranslatable_directory_is_an_error() {
        let data = vec![0u8; 0x40];
        let view = ByteView::new(&data);
        let result = parse(
            &view,
            &flat_section(0x10),
            DataDirectory {
                rva: 0x9_0000,
                size: 0x40,
            },
        );
        assert!(result.is_err());
    }
}
