//! Address translation between RVAs, VAs, and file offsets.
//!
//! Stateless: every function takes the section table (and whatever header
//! fields it needs) by reference. Section order in the table is the tie
//! break for malformed, overlapping inputs: the first match wins.

use crate::error::AddressError;
use crate::section::Section;

/// Convert an RVA to a file offset.
///
/// An RVA below the first section's virtual address falls in the header
/// region, which is mapped identity (offset == rva). Inside a section, an
/// RVA past `sizeof_raw_data` addresses zero-fill virtual memory and has no
/// file backing.
pub fn rva_to_offset(sections: &[Section], rva: u32) -> Result<u32, AddressError> {
    for section in sections {
        if !section.contains_rva(rva) {
            continue;
        }
        let delta = rva - section.virtual_address;
        if delta >= section.sizeof_raw_data {
            return Err(AddressError::NoFileBacking(rva));
        }
        // A corrupt raw pointer near u32::MAX must not wrap.
        return section
            .pointerto_raw_data
            .checked_add(delta)
            .ok_or(AddressError::Unmapped(rva));
    }

    // Header region: identity mapping up to the first mapped RVA.
    let header_end = sections
        .iter()
        .map(|s| s.virtual_address)
        .min()
        .unwrap_or(u32::MAX);
    if rva < header_end {
        return Ok(rva);
    }

    Err(AddressError::Unmapped(rva))
}

/// Convert an absolute VA to a file offset by peeling off the image base.
pub fn va_to_offset(sections: &[Section], imagebase: u64, va: u64) -> Result<u32, AddressError> {
    let rva = va
        .checked_sub(imagebase)
        .ok_or(AddressError::BelowImageBase(va))?;
    if rva > u32::MAX as u64 {
        return Err(AddressError::Unmapped(u32::MAX));
    }
    rva_to_offset(sections, rva as u32)
}

/// Section whose virtual span contains `rva`, first match wins.
pub fn section_from_rva(sections: &[Section], rva: u32) -> Option<&Section> {
    sections.iter().find(|s| s.contains_rva(rva))
}

/// Section whose raw file range contains `offset`, first match wins.
pub fn section_from_offset(sections: &[Section], offset: u32) -> Option<&Section> {
    sections.iter().find(|s| s.contains_offset(offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    fn sections() -> Vec<Section> {
        let mut text = Section::new(".text", vec![0u8; 0x200], SectionFlags::CNT_CODE);
        text.virtual_address = 0x1000;
        text.virtual_size = 0x400;
        text.sizeof_raw_data = 0x200;
        text.pointerto_raw_data = 0x400;

        let mut data = Section::new(".data", vec![0u8; 0x200], SectionFlags::MEM_WRITE);
        data.virtual_address = 0x2000;
        data.virtual_size = 0x200;
        data.sizeof_raw_data = 0x200;
        data.pointerto_raw_data = 0x600;

        vec![text, data]
    }

    #[test]
    fn test_rva_inside_section() {
        let sections = sections();
        assert_eq!(rva_to_offset(&sections, 0x1000).unwrap(), 0x400);
        assert_eq!(rva_to_offset(&sections, 0x1010).unwrap(), 0x410);
        assert_eq!(rva_to_offset(&sections, 0x2001).unwrap(), 0x601);
    }

    #[test]
    fn test_rva_in_zero_fill_padding() {
        let sections = sections();
        // .text maps 0x1000..0x1400 but only 0x200 raw bytes exist.
        assert!(matches!(
            rva_to_offset(&sections, 0x1200),
            Err(AddressError::NoFileBacking(0x1200))
        ));
    }

    #[test]
    fn test_header_region_is_identity() {
        let sections = sections();
        assert_eq!(rva_to_offset(&sections, 0x40).unwrap(), 0x40);
        assert_eq!(rva_to_offset(&sections, 0xFFF).unwrap(), 0xFFF);
    }

    #[test]
    fn test_unmapped_rva() {
        let sections = sections();
        assert!(matches!(
            rva_to_offset(&sections, 0x9000),
            Err(AddressError::Unmapped(0x9000))
        ));
        // Gap between .text's span end and .data.
        assert!(rva_to_offset(&sections, 0x1400).is_err());
    }

    #[test]
    fn test_va_translation() {
        let sections = sections();
        let base = 0x1_4000_0000u64;
        assert_eq!(
            va_to_offset(&sections, base, base + 0x1010).unwrap(),
            rva_to_offset(&sections, 0x1010).unwrap()
        );
        assert!(matches!(
            va_to_offset(&sections, base, 0x1000),
            Err(AddressError::BelowImageBase(0x1000))
        ));
    }

    #[test]
    fn test_raw_pointer_near_u32_max_does_not_wrap() {
        let mut sections = sections();
        sections[0].pointerto_raw_data = 0xFFFF_FF00;
        assert!(matches!(
            rva_to_offset(&sections, 0x1180),
            Err(AddressError::Unmapped(0x1180))
        ));
    }

    #[test]
    fn test_overlap_first_section_wins() {
        let mut sections = sections();
        sections[1].virtual_address = 0x1100; // malformed: overlaps .text
        let offset = rva_to_offset(&sections, 0x1100).unwrap();
        assert_eq!(offset, 0x500); // resolved through .text, not .data
    }

    #[test]
    fn test_section_lookup() {
        let sections = sections();
        assert_eq!(section_from_rva(&sections, 0x2010).unwrap().name(), ".data");
        assert_eq!(section_from_offset(&sections, 0x410).unwrap().name(), ".text");
        assert!(section_from_rva(&sections, 0x40).is_none());
    }
}
