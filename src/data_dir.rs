//! Data directory registry.

use crate::error::ParseError;
use crate::view::ByteView;

/// Number of directory entries a standard optional header carries.
pub const NUMBEROF_DIRECTORIES: usize = 16;

/// Well-known data directory slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum DirectoryType {
    ExportTable = 0,
    ImportTable = 1,
    ResourceTable = 2,
    ExceptionTable = 3,
    /// Certificate table. Its "RVA" is a plain file offset.
    CertificateTable = 4,
    BaseRelocationTable = 5,
    Debug = 6,
    Architecture = 7,
    GlobalPtr = 8,
    TlsTable = 9,
    LoadConfigTable = 10,
    BoundImport = 11,
    /// Import address table.
    Iat = 12,
    DelayImportDescriptor = 13,
    ClrRuntimeHeader = 14,
    Reserved = 15,
}

impl DirectoryType {
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Self::ExportTable),
            1 => Some(Self::ImportTable),
            2 => Some(Self::ResourceTable),
            3 => Some(Self::ExceptionTable),
            4 => Some(Self::CertificateTable),
            5 => Some(Self::BaseRelocationTable),
            6 => Some(Self::Debug),
            7 => Some(Self::Architecture),
            8 => Some(Self::GlobalPtr),
            9 => Some(Self::TlsTable),
            10 => Some(Self::LoadConfigTable),
            11 => Some(Self::BoundImport),
            12 => Some(Self::Iat),
            13 => Some(Self::DelayImportDescriptor),
            14 => Some(Self::ClrRuntimeHeader),
            15 => Some(Self::Reserved),
            _ => None,
        }
    }
}

/// One (rva, size) directory entry. `(0, 0)` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DataDirectory {
    pub rva: u32,
    pub size: u32,
}

impl DataDirectory {
    /// On-disk size of one entry.
    pub const SIZE: usize = 8;

    pub fn is_present(&self) -> bool {
        self.rva != 0 || self.size != 0
    }

    pub fn clear(&mut self) {
        self.rva = 0;
        self.size = 0;
    }
}

/// The fixed table of directory entries following the optional header.
///
/// The raw (rva, size) pairs are kept verbatim even when the pointed-to
/// structure fails to decode, so an unedited rebuild stays byte-identical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryTable {
    entries: Vec<DataDirectory>,
}

impl Default for DirectoryTable {
    fn default() -> Self {
        Self {
            entries: vec![DataDirectory::default(); NUMBEROF_DIRECTORIES],
        }
    }
}

impl DirectoryTable {
    /// Decode `count` entries at `offset`.
    pub fn parse(view: &ByteView<'_>, offset: usize, count: usize) -> Result<Self, ParseError> {
        let mut entries = Vec::with_capacity(count);
        for i in 0..count {
            let at = offset + i * DataDirectory::SIZE;
            entries.push(DataDirectory {
                rva: view.read_u32(at)?,
                size: view.read_u32(at + 4)?,
            });
        }
        Ok(Self { entries })
    }

    /// Encode all entries into `out`.
    pub fn write(&self, out: &mut [u8]) {
        for (i, dir) in self.entries.iter().enumerate() {
            let at = i * DataDirectory::SIZE;
            out[at..at + 4].copy_from_slice(&dir.rva.to_le_bytes());
            out[at + 4..at + 8].copy_from_slice(&dir.size.to_le_bytes());
        }
    }

    /// On-disk size of the whole table.
    pub fn byte_size(&self) -> usize {
        self.entries.len() * DataDirectory::SIZE
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry for a well-known slot; absent when the header declared fewer
    /// directories than standard.
    pub fn get(&self, kind: DirectoryType) -> DataDirectory {
        self.entries.get(kind.index()).copied().unwrap_or_default()
    }

    /// Mutable entry access. This is the unguarded escape hatch from the
    /// editor API: writing a nonsensical (rva, size) here will make the
    /// next build fail or produce an unloadable image.
    pub fn get_mut(&mut self, kind: DirectoryType) -> &mut DataDirectory {
        let index = kind.index();
        if index >= self.entries.len() {
            self.entries.resize(index + 1, DataDirectory::default());
        }
        &mut self.entries[index]
    }

    pub fn iter(&self) -> impl Iterator<Item = &DataDirectory> {
        self.entries.iter()
    }
}
