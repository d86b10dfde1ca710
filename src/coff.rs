//! COFF file header.

use bitflags::bitflags;

use crate::error::ParseError;
use crate::view::ByteView;

/// `PE\0\0` signature preceding the COFF header.
pub const PE_MAGIC: u32 = 0x0000_4550;

/// Target machine of the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
#[non_exhaustive]
pub enum Machine {
    Unknown = 0x0000,
    I386 = 0x014C,
    Amd64 = 0x8664,
    Arm = 0x01C0,
    ArmNt = 0x01C4,
    Arm64 = 0xAA64,
    Ia64 = 0x0200,
    RiscV32 = 0x5032,
    RiscV64 = 0x5064,
}

impl Machine {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0000 => Some(Self::Unknown),
            0x014C => Some(Self::I386),
            0x8664 => Some(Self::Amd64),
            0x01C0 => Some(Self::Arm),
            0x01C4 => Some(Self::ArmNt),
            0xAA64 => Some(Self::Arm64),
            0x0200 => Some(Self::Ia64),
            0x5032 => Some(Self::RiscV32),
            0x5064 => Some(Self::RiscV64),
            _ => None,
        }
    }
}

bitflags! {
    /// IMAGE_FILE_* characteristics.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileCharacteristics: u16 {
        const RELOCS_STRIPPED = 0x0001;
        const EXECUTABLE_IMAGE = 0x0002;
        const LINE_NUMS_STRIPPED = 0x0004;
        const LOCAL_SYMS_STRIPPED = 0x0008;
        const AGGRESSIVE_WS_TRIM = 0x0010;
        const LARGE_ADDRESS_AWARE = 0x0020;
        const BYTES_REVERSED_LO = 0x0080;
        const MACHINE_32BIT = 0x0100;
        const DEBUG_STRIPPED = 0x0200;
        const REMOVABLE_RUN_FROM_SWAP = 0x0400;
        const NET_RUN_FROM_SWAP = 0x0800;
        const SYSTEM = 0x1000;
        const DLL = 0x2000;
        const UP_SYSTEM_ONLY = 0x4000;
        const BYTES_REVERSED_HI = 0x8000;
    }
}

/// IMAGE_FILE_HEADER.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoffHeader {
    pub machine: u16,
    pub numberof_sections: u16,
    pub timestamp: u32,
    pub pointerto_symbol_table: u32,
    pub numberof_symbols: u32,
    pub sizeof_optional_header: u16,
    pub characteristics: FileCharacteristics,
}

impl CoffHeader {
    /// Size of the COFF header in bytes.
    pub const SIZE: usize = 20;

    /// Decode the header at `offset` in `view`.
    pub fn parse(view: &ByteView<'_>, offset: usize) -> Result<Self, ParseError> {
        Ok(Self {
            machine: view.read_u16(offset)?,
            numberof_sections: view.read_u16(offset + 2)?,
            timestamp: view.read_u32(offset + 4)?,
            pointerto_symbol_table: view.read_u32(offset + 8)?,
            numberof_symbols: view.read_u32(offset + 12)?,
            sizeof_optional_header: view.read_u16(offset + 16)?,
            characteristics: FileCharacteristics::from_bits_retain(view.read_u16(offset + 18)?),
        })
    }

    /// Encode the header into `out` (must hold [`Self::SIZE`] bytes).
    pub fn write(&self, out: &mut [u8]) {
        out[0..2].copy_from_slice(&self.machine.to_le_bytes());
        out[2..4].copy_from_slice(&self.numberof_sections.to_le_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_le_bytes());
        out[8..12].copy_from_slice(&self.pointerto_symbol_table.to_le_bytes());
        out[12..16].copy_from_slice(&self.numberof_symbols.to_le_bytes());
        out[16..18].copy_from_slice(&self.sizeof_optional_header.to_le_bytes());
        out[18..20].copy_from_slice(&self.characteristics.bits().to_le_bytes());
    }

    pub fn machine_type(&self) -> Option<Machine> {
        Machine::from_u16(self.machine)
    }

    pub fn is_dll(&self) -> bool {
        self.characteristics.contains(FileCharacteristics::DLL)
    }
}

/// Check the `PE\0\0` signature at `offset`.
pub fn check_pe_magic(view: &ByteView<'_>, offset: usize) -> Result<(), ParseError> {
    let magic = view.read_u32(offset)?;
    if magic != PE_MAGIC {
        return Err(ParseError::BadPeSignature(magic));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_from_u16() {
        assert_eq!(Machine::from_u16(0x8664), Some(Machine::Amd64));
        assert_eq!(Machine::from_u16(0x014C), Some(Machine::I386));
        assert_eq!(Machine::from_u16(0xBEEF), None);
    }

    #[test]
    fn test_roundtrip() {
        let header = CoffHeader {
            machine: Machine::Amd64 as u16,
            numberof_sections: 4,
            timestamp: 0x5F00_0000,
            pointerto_symbol_table: 0,
            numberof_symbols: 0,
            sizeof_optional_header: 240,
            characteristics: FileCharacteristics::EXECUTABLE_IMAGE
                | FileCharacteristics::LARGE_ADDRESS_AWARE,
        };

        let mut out = [0u8; CoffHeader::SIZE];
        header.write(&mut out);

        let reparsed = CoffHeader::parse(&ByteView::new(&out), 0).unwrap();
        assert_eq!(header, reparsed);
        assert!(!reparsed.is_dll());
    }

    #[test]
    fn test_pe_magic_check() {
        let good = b"PE\0\0rest";
        assert!(check_pe_magic(&ByteView::new(good), 0).is_ok());

        let bad = b"PE\x01\0";
        assert!(matches!(
            check_pe_magic(&ByteView::new(bad), 0),
            Err(ParseError::BadPeSignature(_))
        ));
    }
}
