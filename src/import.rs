//! Import table: decoding, the in-memory model, and the deterministic
//! layout used when the table has to be rebuilt after edits.

use crate::error::ParseError;
use crate::optional::PeKind;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

/// On-disk size of IMAGE_IMPORT_DESCRIPTOR.
pub const DESCRIPTOR_SIZE: usize = 20;

/// Upper bounds on table walks so adversarial descriptor chains cannot
/// allocate unbounded memory.
const MAX_DESCRIPTORS: usize = 4096;
const MAX_THUNKS: usize = 65536;

/// How a symbol is named in the import lookup table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportName {
    /// Import by hint/name.
    ByName { hint: u16, name: String },
    /// Import by ordinal (high bit set in the thunk).
    ByOrdinal(u16),
}

/// One imported symbol and the IAT slot the loader patches for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportEntry {
    pub symbol: ImportName,
    /// RVA of this symbol's import-address-table slot.
    pub iat_rva: u32,
}

impl ImportEntry {
    pub fn name(&self) -> Option<&str> {
        match &self.symbol {
            ImportName::ByName { name, .. } => Some(name),
            ImportName::ByOrdinal(_) => None,
        }
    }

    pub fn is_ordinal(&self) -> bool {
        matches!(self.symbol, ImportName::ByOrdinal(_))
    }
}

/// One imported library: its name and the symbols pulled from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Import {
    pub name: String,
    pub entries: Vec<ImportEntry>,
    /// Bound-import timestamp from the descriptor, preserved for rebuilds.
    pub timestamp: u32,
    pub forwarder_chain: u32,
}

impl Import {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
            timestamp: 0,
            forwarder_chain: 0,
        }
    }

    /// Entry for `function`, matching by name.
    pub fn entry(&self, function: &str) -> Option<&ImportEntry> {
        self.entries.iter().find(|e| e.name() == Some(function))
    }
}

fn read_at_rva<'a>(
    view: &ByteView<'a>,
    sections: &[Section],
    rva: u32,
    len: usize,
) -> Result<ByteView<'a>, ParseError> {
    let offset = translate::rva_to_offset(sections, rva)
        .map_err(|_| ParseError::Malformed("import rva does not translate"))?;
    view.slice(offset as usize, len).map(ByteView::new)
}

/// Walk the descriptor chain at `rva` and decode every library.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    rva: u32,
    kind: PeKind,
) -> Result<Vec<Import>, ParseError> {
    let mut imports = Vec::new();

    for i in 0..MAX_DESCRIPTORS {
        let desc_rva = rva
            .checked_add((i * DESCRIPTOR_SIZE) as u32)
            .ok_or(ParseError::Malformed("import descriptor rva overflows"))?;
        let desc = read_at_rva(view, sections, desc_rva, DESCRIPTOR_SIZE)?;
        let ilt_rva = desc.read_u32(0)?;
        let timestamp = desc.read_u32(4)?;
        let forwarder_chain = desc.read_u32(8)?;
        let name_rva = desc.read_u32(12)?;
        let iat_rva = desc.read_u32(16)?;

        // All-zero descriptor terminates the chain.
        if ilt_rva == 0 && timestamp == 0 && forwarder_chain == 0 && name_rva == 0 && iat_rva == 0
        {
            break;
        }

        let name_offset = translate::rva_to_offset(sections, name_rva)
            .map_err(|_| ParseError::Malformed("import name rva does not translate"))?;
        let name = view.read_cstr(name_offset as usize, 256)?;

        // Prefer the lookup table for names; some linkers leave it zero and
        // the (unbound) address table carries the same values.
        let thunks_rva = if ilt_rva != 0 { ilt_rva } else { iat_rva };
        let entries = parse_thunks(view, sections, thunks_rva, iat_rva, kind)?;

        imports.push(Import {
            name,
            entries,
            timestamp,
            forwarder_chain,
        });
    }

    Ok(imports)
}

fn parse_thunks(
    view: &ByteView<'_>,
    sections: &[Section],
    thunks_rva: u32,
    iat_rva: u32,
    kind: PeKind,
) -> Result<Vec<ImportEntry>, ParseError> {
    let thunk_size = kind.thunk_size();
    let mut entries = Vec::new();

    for i in 0..MAX_THUNKS {
        let stride = (i * thunk_size) as u32;
        let at = thunks_rva
            .checked_add(stride)
            .ok_or(ParseError::Malformed("import thunk rva overflows"))?;
        let thunk = read_at_rva(view, sections, at, thunk_size)?;
        let (value, is_ordinal) = match kind {
            PeKind::Pe32 => {
                let v = thunk.read_u32(0)?;
                (v as u64, v & 0x8000_0000 != 0)
            }
            PeKind::Pe64 => {
                let v = thunk.read_u64(0)?;
                (v, v & 0x8000_0000_0000_0000 != 0)
            }
        };
        if value == 0 {
            break;
        }

        let symbol = if is_ordinal {
            ImportName::ByOrdinal((value & 0xFFFF) as u16)
        } else {
            let hint_rva = (value & 0x7FFF_FFFF) as u32;
            let offset = translate::rva_to_offset(sections, hint_rva)
                .map_err(|_| ParseError::Malformed("hint/name rva does not translate"))?
                as usize;
            let hint = view.read_u16(offset)?;
            let name = view.read_cstr(offset + 2, 512)?;
            ImportName::ByName { hint, name }
        };

        let slot = iat_rva
            .checked_add(stride)
            .ok_or(ParseError::Malformed("import address table rva overflows"))?;
        entries.push(ImportEntry {
            symbol,
            iat_rva: slot,
        });
    }

    Ok(entries)
}

/// Serialized import table plus the directory values describing it.
#[derive(Debug, Clone)]
pub struct ImportLayout {
    pub bytes: Vec<u8>,
    /// Size of the descriptor array including the null terminator, as
    /// reported in the import data directory.
    pub directory_size: u32,
    /// RVA and size of the combined import address tables.
    pub iat_rva: u32,
    pub iat_size: u32,
    /// Per-library, per-entry IAT slot RVAs, in `imports` order.
    pub slots: Vec<Vec<u32>>,
}

/// Lay out the complete import table at `base_rva`:
/// descriptors, per-library lookup tables, per-library address tables,
/// hint/name blobs, then library name strings. Deterministic in the input
/// order, so repeated edits and the final build agree on every slot RVA.
pub fn layout(imports: &[Import], kind: PeKind, base_rva: u32) -> ImportLayout {
    let thunk_size = kind.thunk_size();

    let descriptors_size = (imports.len() + 1) * DESCRIPTOR_SIZE;
    let thunks_per_table: usize = imports.iter().map(|lib| lib.entries.len() + 1).sum();
    let tables_size = thunks_per_table * thunk_size;

    let ilt_base = descriptors_size;
    let iat_base = ilt_base + tables_size;
    let names_base = iat_base + tables_size;

    // Hint/name blobs first, then library names, offsets recorded up front.
    let mut blob = Vec::new();
    let mut hint_offsets: Vec<Vec<Option<usize>>> = Vec::with_capacity(imports.len());
    for lib in imports {
        let mut offsets = Vec::with_capacity(lib.entries.len());
        for entry in &lib.entries {
            match &entry.symbol {
                ImportName::ByName { hint, name } => {
                    offsets.push(Some(names_base + blob.len()));
                    blob.extend_from_slice(&hint.to_le_bytes());
                    blob.extend_from_slice(name.as_bytes());
                    blob.push(0);
                    if blob.len() % 2 != 0 {
                        blob.push(0);
                    }
                }
                ImportName::ByOrdinal(_) => offsets.push(None),
            }
        }
        hint_offsets.push(offsets);
    }
    let mut name_offsets = Vec::with_capacity(imports.len());
    for lib in imports {
        name_offsets.push(names_base + blob.len());
        blob.extend_from_slice(lib.name.as_bytes());
        blob.push(0);
        if blob.len() % 2 != 0 {
            blob.push(0);
        }
    }

    let total = names_base + blob.len();
    let mut bytes = vec![0u8; total];
    bytes[names_base..].copy_from_slice(&blob);

    let mut slots = Vec::with_capacity(imports.len());
    let mut table_cursor = 0usize; // thunk index across all per-library tables
    for (i, lib) in imports.iter().enumerate() {
        let ilt_off = ilt_base + table_cursor * thunk_size;
        let iat_off = iat_base + table_cursor * thunk_size;
        table_cursor += lib.entries.len() + 1;

        // Descriptor.
        let d = i * DESCRIPTOR_SIZE;
        bytes[d..d + 4].copy_from_slice(&(base_rva + ilt_off as u32).to_le_bytes());
        bytes[d + 4..d + 8].copy_from_slice(&lib.timestamp.to_le_bytes());
        bytes[d + 8..d + 12].copy_from_slice(&lib.forwarder_chain.to_le_bytes());
        bytes[d + 12..d + 16].copy_from_slice(&(base_rva + name_offsets[i] as u32).to_le_bytes());
        bytes[d + 16..d + 20].copy_from_slice(&(base_rva + iat_off as u32).to_le_bytes());

        // Lookup and address tables carry the same (unbound) values.
        let mut lib_slots = Vec::with_capacity(lib.entries.len());
        for (j, entry) in lib.entries.iter().enumerate() {
            let value: u64 = match (&entry.symbol, &hint_offsets[i][j]) {
                (ImportName::ByOrdinal(ordinal), _) => match kind {
                    PeKind::Pe32 => 0x8000_0000u64 | *ordinal as u64,
                    PeKind::Pe64 => 0x8000_0000_0000_0000u64 | *ordinal as u64,
                },
                (_, Some(offset)) => (base_rva + *offset as u32) as u64,
                (_, None) => 0,
            };
            for table in [ilt_off, iat_off] {
                let at = table + j * thunk_size;
                match kind {
                    PeKind::Pe32 => {
                        bytes[at..at + 4].copy_from_slice(&(value as u32).to_le_bytes())
                    }
                    PeKind::Pe64 => bytes[at..at + 8].copy_from_slice(&value.to_le_bytes()),
                }
            }
            lib_slots.push(base_rva + (iat_off + j * thunk_size) as u32);
        }
        slots.push(lib_slots);
    }

    ImportLayout {
        bytes,
        directory_size: descriptors_size as u32,
        iat_rva: base_rva + iat_base as u32,
        iat_size: tables_size as u32,
        slots,
    }
}
