//! Alignment arithmetic shared by the editors and the builder.

use crate::coff::CoffHeader;
use crate::dos::DosHeader;

/// Align a value up to the given alignment (no-op for alignment 0).
#[inline]
pub fn align_up(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

/// Align a value down to the given alignment.
#[inline]
pub fn align_down(value: u32, alignment: u32) -> u32 {
    if alignment == 0 {
        return value;
    }
    value / alignment * alignment
}

/// Unaligned size of the header region: DOS header + stub, PE signature,
/// COFF header, optional header, and the section header table.
pub fn raw_headers_size(
    stub_len: usize,
    optional_header_size: usize,
    section_count: usize,
) -> u32 {
    (DosHeader::SIZE
        + stub_len
        + 4
        + CoffHeader::SIZE
        + optional_header_size
        + section_count * crate::section::SECTION_HEADER_SIZE) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 0x200), 0);
        assert_eq!(align_up(1, 0x200), 0x200);
        assert_eq!(align_up(0x200, 0x200), 0x200);
        assert_eq!(align_up(0x201, 0x200), 0x400);
        assert_eq!(align_up(7, 0), 7);
    }

    #[test]
    fn test_align_down() {
        assert_eq!(align_down(0x1FF, 0x200), 0);
        assert_eq!(align_down(0x200, 0x200), 0x200);
        assert_eq!(align_down(0x3FF, 0x200), 0x200);
    }
}
