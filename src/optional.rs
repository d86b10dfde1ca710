//! Optional header, unified over the PE32 and PE32+ layouts.
//!
//! The two on-disk variants differ only in field widths (and PE32's extra
//! `baseof_data`), so the in-memory model keeps one struct with 64-bit
//! fields and a [`PeKind`] discriminant; the codec widens or narrows at the
//! boundary.

use bitflags::bitflags;

use crate::error::ParseError;
use crate::view::ByteView;

/// Magic selecting the 32-bit optional header layout.
pub const PE32_MAGIC: u16 = 0x10B;
/// Magic selecting the 64-bit (PE32+) layout.
pub const PE64_MAGIC: u16 = 0x20B;

/// Optional-header variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeKind {
    /// PE32 (magic 0x10b).
    Pe32,
    /// PE32+ (magic 0x20b).
    Pe64,
}

impl PeKind {
    pub fn magic(self) -> u16 {
        match self {
            Self::Pe32 => PE32_MAGIC,
            Self::Pe64 => PE64_MAGIC,
        }
    }

    /// Size of the fixed part of the optional header, data directories
    /// excluded.
    pub fn base_size(self) -> usize {
        match self {
            Self::Pe32 => 96,
            Self::Pe64 => 112,
        }
    }

    /// Width of an import thunk / IAT slot.
    pub fn thunk_size(self) -> usize {
        match self {
            Self::Pe32 => 4,
            Self::Pe64 => 8,
        }
    }
}

/// Windows subsystem the image targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[non_exhaustive]
pub enum Subsystem {
    Unknown = 0,
    Native = 1,
    WindowsGui = 2,
    WindowsCui = 3,
    EfiApplication = 10,
    EfiBootServiceDriver = 11,
    EfiRuntimeDriver = 12,
    EfiRom = 13,
}

bitflags! {
    /// IMAGE_DLLCHARACTERISTICS_* flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DllCharacteristics: u16 {
        const HIGH_ENTROPY_VA = 0x0020;
        const DYNAMIC_BASE = 0x0040;
        const FORCE_INTEGRITY = 0x0080;
        const NX_COMPAT = 0x0100;
        const NO_ISOLATION = 0x0200;
        const NO_SEH = 0x0400;
        const NO_BIND = 0x0800;
        const APPCONTAINER = 0x1000;
        const WDM_DRIVER = 0x2000;
        const GUARD_CF = 0x4000;
        const TERMINAL_SERVER_AWARE = 0x8000;
    }
}

/// IMAGE_OPTIONAL_HEADER32 / IMAGE_OPTIONAL_HEADER64, data directories
/// excluded (those live in [`crate::data_dir::DirectoryTable`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionalHeader {
    pub kind: PeKind,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub sizeof_code: u32,
    pub sizeof_initialized_data: u32,
    pub sizeof_uninitialized_data: u32,
    pub addressof_entrypoint: u32,
    pub baseof_code: u32,
    /// Only meaningful for PE32; PE32+ drops the field.
    pub baseof_data: u32,
    pub imagebase: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub sizeof_image: u32,
    pub sizeof_headers: u32,
    pub checksum: u32,
    pub subsystem: u16,
    pub dll_characteristics: DllCharacteristics,
    pub sizeof_stack_reserve: u64,
    pub sizeof_stack_commit: u64,
    pub sizeof_heap_reserve: u64,
    pub sizeof_heap_commit: u64,
    pub loader_flags: u32,
    pub numberof_rva_and_size: u32,
}

impl OptionalHeader {
    /// Decode the header at `offset`, selecting the layout from the magic.
    pub fn parse(view: &ByteView<'_>, offset: usize) -> Result<Self, ParseError> {
        let magic = view.read_u16(offset)?;
        let kind = match magic {
            PE32_MAGIC => PeKind::Pe32,
            PE64_MAGIC => PeKind::Pe64,
            other => return Err(ParseError::BadOptionalMagic(other)),
        };

        // Fields up to baseof_code share the same offsets in both layouts.
        let mut header = Self {
            kind,
            major_linker_version: view.read_u8(offset + 2)?,
            minor_linker_version: view.read_u8(offset + 3)?,
            sizeof_code: view.read_u32(offset + 4)?,
            sizeof_initialized_data: view.read_u32(offset + 8)?,
            sizeof_uninitialized_data: view.read_u32(offset + 12)?,
            addressof_entrypoint: view.read_u32(offset + 16)?,
            baseof_code: view.read_u32(offset + 20)?,
            baseof_data: 0,
            imagebase: 0,
            section_alignment: view.read_u32(offset + 32)?,
            file_alignment: view.read_u32(offset + 36)?,
            major_operating_system_version: view.read_u16(offset + 40)?,
            minor_operating_system_version: view.read_u16(offset + 42)?,
            major_image_version: view.read_u16(offset + 44)?,
            minor_image_version: view.read_u16(offset + 46)?,
            major_subsystem_version: view.read_u16(offset + 48)?,
            minor_subsystem_version: view.read_u16(offset + 50)?,
            win32_version_value: view.read_u32(offset + 52)?,
            sizeof_image: view.read_u32(offset + 56)?,
            sizeof_headers: view.read_u32(offset + 60)?,
            checksum: view.read_u32(offset + 64)?,
            subsystem: view.read_u16(offset + 68)?,
            dll_characteristics: DllCharacteristics::from_bits_retain(view.read_u16(offset + 70)?),
            sizeof_stack_reserve: 0,
            sizeof_stack_commit: 0,
            sizeof_heap_reserve: 0,
            sizeof_heap_commit: 0,
            loader_flags: 0,
            numberof_rva_and_size: 0,
        };

        match kind {
            PeKind::Pe32 => {
                header.baseof_data = view.read_u32(offset + 24)?;
                header.imagebase = view.read_u32(offset + 28)? as u64;
                header.sizeof_stack_reserve = view.read_u32(offset + 72)? as u64;
                header.sizeof_stack_commit = view.read_u32(offset + 76)? as u64;
                header.sizeof_heap_reserve = view.read_u32(offset + 80)? as u64;
                header.sizeof_heap_commit = view.read_u32(offset + 84)? as u64;
                header.loader_flags = view.read_u32(offset + 88)?;
                header.numberof_rva_and_size = view.read_u32(offset + 92)?;
            }
            PeKind::Pe64 => {
                header.imagebase = view.read_u64(offset + 24)?;
                header.sizeof_stack_reserve = view.read_u64(offset + 72)?;
                header.sizeof_stack_commit = view.read_u64(offset + 80)?;
                header.sizeof_heap_reserve = view.read_u64(offset + 88)?;
                header.sizeof_heap_commit = view.read_u64(offset + 96)?;
                header.loader_flags = view.read_u32(offset + 104)?;
                header.numberof_rva_and_size = view.read_u32(offset + 108)?;
            }
        }

        Ok(header)
    }

    /// Size of the fixed part, data directories excluded.
    pub fn base_size(&self) -> usize {
        self.kind.base_size()
    }

    /// Encode the fixed part into `out` (must hold [`Self::base_size`]
    /// bytes). Data directories are serialized separately.
    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.kind.magic().to_le_bytes());
        out[2] = self.major_linker_version;
        out[3] = self.minor_linker_version;
        out[4..8].copy_from_slice(&self.sizeof_code.to_le_bytes());
        out[8..12].copy_from_slice(&self.sizeof_initialized_data.to_le_bytes());
        out[12..16].copy_from_slice(&self.sizeof_uninitialized_data.to_le_bytes());
        out[16..20].copy_from_slice(&self.addressof_entrypoint.to_le_bytes());
        out[20..24].copy_from_slice(&self.baseof_code.to_le_bytes());
        match self.kind {
            PeKind::Pe32 => {
                out[24..28].copy_from_slice(&self.baseof_data.to_le_bytes());
                out[28..32].copy_from_slice(&(self.imagebase as u32).to_le_bytes());
            }
            PeKind::Pe64 => {
                out[24..32].copy_from_slice(&self.imagebase.to_le_bytes());
            }
        }
        out[32..36].copy_from_slice(&self.section_alignment.to_le_bytes());
        out[36..40].copy_from_slice(&self.file_alignment.to_le_bytes());
        out[40..42].copy_from_slice(&self.major_operating_system_version.to_le_bytes());
        out[42..44].copy_from_slice(&self.minor_operating_system_version.to_le_bytes());
        out[44..46].copy_from_slice(&self.major_image_version.to_le_bytes());
        out[46..48].copy_from_slice(&self.minor_image_version.to_le_bytes());
        out[48..50].copy_from_slice(&self.major_subsystem_version.to_le_bytes());
        out[50..52].copy_from_slice(&self.minor_subsystem_version.to_le_bytes());
        out[52..56].copy_from_slice(&self.win32_version_value.to_le_bytes());
        out[56..60].copy_from_slice(&self.sizeof_image.to_le_bytes());
        out[60..64].copy_from_slice(&self.sizeof_headers.to_le_bytes());
        out[64..68].copy_from_slice(&self.checksum.to_le_bytes());
        out[68..70].copy_from_slice(&self.subsystem.to_le_bytes());
        out[70..72].copy_from_slice(&self.dll_characteristics.bits().to_le_bytes());
        match self.kind {
            PeKind::Pe32 => {
                out[72..76].copy_from_slice(&(self.sizeof_stack_reserve as u32).to_le_bytes());
                out[76..80].copy_from_slice(&(self.sizeof_stack_commit as u32).to_le_bytes());
                out[80..84].copy_from_slice(&(self.sizeof_heap_reserve as u32).to_le_bytes());
                out[84..88].copy_from_slice(&(self.sizeof_heap_commit as u32).to_le_bytes());
                out[88..92].copy_from_slice(&self.loader_flags.to_le_bytes());
                out[92..96].copy_from_slice(&self.numberof_rva_and_size.to_le_bytes());
            }
            PeKind::Pe64 => {
                out[72..80].copy_from_slice(&self.sizeof_stack_reserve.to_le_bytes());
                out[80..88].copy_from_slice(&self.sizeof_stack_commit.to_le_bytes());
                out[88..96].copy_from_slice(&self.sizeof_heap_reserve.to_le_bytes());
                out[96..104].copy_from_slice(&self.sizeof_heap_commit.to_le_bytes());
                out[104..108].copy_from_slice(&self.loader_flags.to_le_bytes());
                out[108..112].copy_from_slice(&self.numberof_rva_and_size.to_le_bytes());
            }
        }
    }

    /// Loader-sane defaults for a fresh image of the given kind.
    pub fn with_defaults(kind: PeKind) -> Self {
        Self {
            kind,
            major_linker_version: 14,
            minor_linker_version: 0,
            sizeof_code: 0,
            sizeof_initialized_data: 0,
            sizeof_uninitialized_data: 0,
            addressof_entrypoint: 0,
            baseof_code: 0,
            baseof_data: 0,
            imagebase: match kind {
                PeKind::Pe32 => 0x0040_0000,
                PeKind::Pe64 => 0x0001_4000_0000,
            },
            section_alignment: 0x1000,
            file_alignment: 0x200,
            major_operating_system_version: 6,
            minor_operating_system_version: 0,
            major_image_version: 0,
            minor_image_version: 0,
            major_subsystem_version: 6,
            minor_subsystem_version: 0,
            win32_version_value: 0,
            sizeof_image: 0,
            sizeof_headers: 0,
            checksum: 0,
            subsystem: Subsystem::WindowsCui as u16,
            dll_characteristics: DllCharacteristics::HIGH_ENTROPY_VA
                | DllCharacteristics::DYNAMIC_BASE
                | DllCharacteristics::NX_COMPAT
                | DllCharacteristics::TERMINAL_SERVER_AWARE,
            sizeof_stack_reserve: 0x10_0000,
            sizeof_stack_commit: 0x1000,
            sizeof_heap_reserve: 0x10_0000,
            sizeof_heap_commit: 0x1000,
            loader_flags: 0,
            numberof_rva_and_size: crate::data_dir::NUMBEROF_DIRECTORIES as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_sizes() {
        assert_eq!(PeKind::Pe32.base_size(), 96);
        assert_eq!(PeKind::Pe64.base_size(), 112);
    }

    #[test]
    fn test_rejects_bad_magic() {
        let data = [0xFFu8; 112];
        assert!(matches!(
            OptionalHeader::parse(&ByteView::new(&data), 0),
            Err(ParseError::BadOptionalMagic(0xFFFF))
        ));
    }

    #[test]
    fn test_roundtrip_pe64() {
        let mut header = OptionalHeader::with_defaults(PeKind::Pe64);
        header.addressof_entrypoint = 0x1234;
        header.sizeof_image = 0x5000;

        let mut out = vec![0u8; header.base_size()];
        header.write(&mut out);

        let reparsed = OptionalHeader::parse(&ByteView::new(&out), 0).unwrap();
        assert_eq!(header, reparsed);
    }

    #[test]
    fn test_roundtrip_pe32_narrows_wide_fields() {
        let mut header = OptionalHeader::with_defaults(PeKind::Pe32);
        header.baseof_data = 0x2000;

        let mut out = vec![0u8; header.base_size()];
        header.write(&mut out);

        let reparsed = OptionalHeader::parse(&ByteView::new(&out), 0).unwrap();
        assert_eq!(reparsed.imagebase, 0x0040_0000);
        assert_eq!(reparsed.baseof_data, 0x2000);
        assert_eq!(header, reparsed);
    }
}
