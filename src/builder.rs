//! Serializer: a [`Binary`] back to bytes.
//!
//! The builder writes the model it is given; layout decisions (addresses,
//! directory values, header sizes) were already made by the parser or the
//! editors. It validates the structural invariants first, so an image the
//! editors were bypassed on (via the directory escape hatch or raw header
//! mutation) fails loudly instead of producing garbage.

use std::path::Path;

use tracing::debug;

use crate::binary::Binary;
use crate::checksum;
use crate::coff::{CoffHeader, PE_MAGIC};
use crate::data_dir::DirectoryType;
use crate::dos::DosHeader;
use crate::error::{AddressError, BuildError};
use crate::section::SECTION_HEADER_SIZE;
use crate::translate;

/// Serializer with its knobs.
#[derive(Debug, Clone)]
pub struct Builder {
    recompute_checksum: bool,
}

impl Default for Builder {
    fn default() -> Self {
        Self {
            recompute_checksum: true,
        }
    }
}

impl Builder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute the optional-header checksum over the final bytes
    /// (default). Disable to write the stored field verbatim.
    pub fn recompute_checksum(mut self, enabled: bool) -> Self {
        self.recompute_checksum = enabled;
        self
    }

    /// Serialize `binary` to a fresh byte vector.
    pub fn build(&self, binary: &Binary) -> Result<Vec<u8>, BuildError> {
        validate(binary)?;

        let pe_offset = binary.dos.addressof_new_exeheader as usize;
        let coff_offset = pe_offset + 4;
        let optional_offset = coff_offset + CoffHeader::SIZE;
        let directories_offset = optional_offset + binary.optional.base_size();
        let table_offset = optional_offset + binary.coff.sizeof_optional_header as usize;
        let headers_end = table_offset + binary.sections.len() * SECTION_HEADER_SIZE;

        let mut body_end = headers_end.max(binary.optional.sizeof_headers as usize);
        for section in &binary.sections {
            body_end = body_end.max(section.end_offset() as usize);
        }

        let mut out = vec![0u8; body_end + binary.overlay.len()];

        binary.dos.write(&mut out[..DosHeader::SIZE]);
        out[DosHeader::SIZE..DosHeader::SIZE + binary.dos_stub.len()]
            .copy_from_slice(&binary.dos_stub);
        out[pe_offset..pe_offset + 4].copy_from_slice(&PE_MAGIC.to_le_bytes());
        binary
            .coff
            .write(&mut out[coff_offset..coff_offset + CoffHeader::SIZE]);
        binary
            .optional
            .write(&mut out[optional_offset..optional_offset + binary.optional.base_size()]);
        binary
            .directories
            .write(&mut out[directories_offset..directories_offset + binary.directories.byte_size()]);

        for (i, section) in binary.sections.iter().enumerate() {
            let at = table_offset + i * SECTION_HEADER_SIZE;
            section.write_header(&mut out[at..at + SECTION_HEADER_SIZE]);

            // Content shorter than the declared raw size is zero padded by
            // the pre-zeroed buffer; longer content is truncated.
            let start = section.pointerto_raw_data as usize;
            let len = section.content.len().min(section.sizeof_raw_data as usize);
            out[start..start + len].copy_from_slice(&section.content[..len]);
        }

        out[body_end..].copy_from_slice(&binary.overlay);

        if self.recompute_checksum {
            let field = optional_offset + 64;
            let value = checksum::image_checksum(&out, field);
            out[field..field + 4].copy_from_slice(&value.to_le_bytes());
        }

        debug!(bytes = out.len(), "image serialized");
        Ok(out)
    }

    /// Serialize and write to `path`.
    pub fn write<P: AsRef<Path>>(&self, binary: &Binary, path: P) -> Result<(), BuildError> {
        let bytes = self.build(binary)?;
        std::fs::write(path, bytes)?;
        Ok(())
    }
}

fn validate(binary: &Binary) -> Result<(), BuildError> {
    let pe_offset = binary.dos.addressof_new_exeheader as usize;
    if pe_offset < DosHeader::SIZE + binary.dos_stub.len() {
        return Err(BuildError::Inconsistent(format!(
            "e_lfanew {pe_offset:#x} overlaps the DOS header and stub"
        )));
    }

    if binary.coff.numberof_sections as usize != binary.sections.len() {
        return Err(BuildError::Inconsistent(format!(
            "COFF header declares {} sections, model holds {}",
            binary.coff.numberof_sections,
            binary.sections.len()
        )));
    }

    let optional_size = binary.optional.base_size() + binary.directories.byte_size();
    if (binary.coff.sizeof_optional_header as usize) < optional_size {
        return Err(BuildError::Inconsistent(format!(
            "sizeof_optional_header {} cannot hold {} directory entries",
            binary.coff.sizeof_optional_header,
            binary.directories.len()
        )));
    }

    for section in &binary.sections {
        if section
            .pointerto_raw_data
            .checked_add(section.sizeof_raw_data)
            .is_none()
            || section
                .virtual_address
                .checked_add(section.virtual_span())
                .is_none()
        {
            return Err(BuildError::Inconsistent(format!(
                "section `{}` wraps the 32-bit address space",
                section.name()
            )));
        }
    }

    // A directory changed since parse or creation must point into the
    // image. Entries still at their baseline are written back verbatim,
    // keeping degraded parses byte-identical on rebuild.
    for index in 0..binary.directories.len() {
        let kind = match DirectoryType::from_index(index) {
            Some(kind) => kind,
            None => continue,
        };
        let dir = binary.directories.get(kind);
        if !dir.is_present()
            || dir == binary.baseline_directories.get(kind)
            || kind == DirectoryType::CertificateTable
        {
            // The certificate entry holds a file offset, not an RVA.
            continue;
        }
        match translate::rva_to_offset(&binary.sections, dir.rva) {
            Ok(_) | Err(AddressError::NoFileBacking(_)) => {}
            Err(_) => {
                return Err(BuildError::Inconsistent(format!(
                    "{kind:?} directory points at unmapped rva {:#x}",
                    dir.rva
                )));
            }
        }
    }

    // Virtual spans must not overlap.
    let mut spans: Vec<(u32, u32, &str)> = binary
        .sections
        .iter()
        .filter(|s| s.virtual_span() != 0)
        .map(|s| (s.virtual_address, s.end_rva(), s.name()))
        .collect();
    spans.sort_unstable();
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(BuildError::Inconsistent(format!(
                "sections `{}` and `{}` overlap virtually",
                pair[0].2, pair[1].2
            )));
        }
    }

    // Neither must raw file ranges.
    let mut ranges: Vec<(u32, u32, &str)> = binary
        .sections
        .iter()
        .filter(|s| s.sizeof_raw_data != 0)
        .map(|s| (s.pointerto_raw_data, s.end_offset(), s.name()))
        .collect();
    ranges.sort_unstable();
    for pair in ranges.windows(2) {
        if pair[1].0 < pair[0].1 {
            return Err(BuildError::Inconsistent(format!(
                "sections `{}` and `{}` overlap in the file",
                pair[0].2, pair[1].2
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EditError;
    use crate::optional::PeKind;
    use crate::section::{Section, SectionFlags};

    #[test]
    fn test_build_fresh_image_and_reparse() {
        let mut binary = Binary::new(PeKind::Pe64);
        binary
            .add_section(Section::new(
                ".text",
                vec![0xC3; 0x20],
                SectionFlags::CNT_CODE | SectionFlags::MEM_EXECUTE | SectionFlags::MEM_READ,
            ))
            .unwrap();

        let bytes = Builder::new().build(&binary).unwrap();
        let reparsed = Binary::parse(&bytes).unwrap();
        assert_eq!(reparsed.sections().len(), 1);
        assert_eq!(reparsed.sections()[0].name(), ".text");
        assert_eq!(&reparsed.sections()[0].content[..0x20], &[0xC3; 0x20]);
    }

    #[test]
    fn test_checksum_is_patched() {
        let binary = Binary::new(PeKind::Pe32);
        let bytes = Builder::new().build(&binary).unwrap();
        let reparsed = Binary::parse(&bytes).unwrap();
        assert_ne!(reparsed.optional_header().checksum, 0);

        let raw = Builder::new()
            .recompute_checksum(false)
            .build(&binary)
            .unwrap();
        let reparsed = Binary::parse(&raw).unwrap();
        assert_eq!(reparsed.optional_header().checksum, 0);
    }

    #[test]
    fn test_section_count_mismatch_is_inconsistent() {
        let mut binary = Binary::new(PeKind::Pe64);
        binary
            .add_section(Section::new(".a", vec![0u8; 4], SectionFlags::MEM_READ))
            .unwrap();
        binary.coff.numberof_sections = 5;

        match Builder::new().build(&binary) {
            Err(BuildError::Inconsistent(msg)) => assert!(msg.contains("sections")),
            other => panic!("expected Inconsistent, got {other:?}"),
        }
    }

    #[test]
    fn test_repointed_directory_must_translate() {
        let mut binary = Binary::new(PeKind::Pe64);
        binary
            .add_section(Section::new(".a", vec![0u8; 0x10], SectionFlags::MEM_READ))
            .unwrap();
        let dir = binary.data_directory_mut(DirectoryType::Debug);
        dir.rva = 0x00F0_0000;
        dir.size = 0x40;

        match Builder::new().build(&binary) {
            Err(BuildError::Inconsistent(msg)) => assert!(msg.contains("unmapped")),
            other => panic!("expected Inconsistent, got {other:?}"),
        }
    }

    #[test]
    fn test_virtual_overlap_is_inconsistent() {
        let mut binary = Binary::new(PeKind::Pe64);
        let a = binary
            .add_section(Section::new(".a", vec![0u8; 0x10], SectionFlags::MEM_READ))
            .unwrap();
        binary
            .add_section(Section::new(".b", vec![0u8; 0x10], SectionFlags::MEM_READ))
            .unwrap();
        // Stale handle first, then corrupt via a fresh one.
        assert!(matches!(
            binary.section_by_handle_mut(a),
            Err(EditError::StaleHandle)
        ));
        let a = binary.section_handle(".a").unwrap();
        binary.section_by_handle_mut(a).unwrap().virtual_size = 0x10_0000;

        assert!(matches!(
            Builder::new().build(&binary),
            Err(BuildError::Inconsistent(_))
        ));
    }
}
