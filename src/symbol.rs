//! COFF symbol table. Mostly present in object files and malware with
//! leftover debug info; images built by modern linkers usually strip it.

use crate::error::ParseError;
use crate::view::ByteView;

/// On-disk size of one symbol record.
pub const SYMBOL_RECORD_SIZE: usize = 18;

const MAX_SYMBOLS: u32 = 0x100000;

/// IMAGE_SYM_CLASS_* storage classes, kept raw; only the common ones get
/// named accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    /// 1-based section index; 0 undefined, -1 absolute, -2 debug.
    pub section_number: i16,
    pub symbol_type: u16,
    pub storage_class: u8,
    /// Auxiliary records following this one, kept raw.
    pub aux: Vec<[u8; SYMBOL_RECORD_SIZE]>,
}

impl Symbol {
    pub fn is_external(&self) -> bool {
        self.storage_class == 2
    }

    pub fn is_function(&self) -> bool {
        self.symbol_type >> 4 == 2
    }
}

fn record_name(
    view: &ByteView<'_>,
    offset: usize,
    strings_offset: usize,
) -> Result<String, ParseError> {
    let raw = view.slice(offset, 8)?;
    // A zeroed first dword means the second dword is a string table offset.
    if raw[..4] == [0, 0, 0, 0] {
        let string_offset = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
        return view.read_cstr(strings_offset + string_offset, 512);
    }
    let end = raw.iter().position(|&b| b == 0).unwrap_or(8);
    Ok(String::from_utf8_lossy(&raw[..end]).into_owned())
}

/// Decode the symbol table at `pointerto_symbol_table`. The string table
/// follows the last record immediately.
pub fn parse(
    view: &ByteView<'_>,
    pointerto_symbol_table: u32,
    numberof_symbols: u32,
) -> Result<Vec<Symbol>, ParseError> {
    if pointerto_symbol_table == 0 || numberof_symbols == 0 {
        return Ok(Vec::new());
    }

    let base = pointerto_symbol_table as usize;
    let count = numberof_symbols.min(MAX_SYMBOLS) as usize;
    let strings_offset = base + count * SYMBOL_RECORD_SIZE;

    let mut symbols = Vec::new();
    let mut i = 0usize;
    while i < count {
        let offset = base + i * SYMBOL_RECORD_SIZE;
        let numberof_aux = view.read_u8(offset + 17)? as usize;

        let mut aux = Vec::with_capacity(numberof_aux);
        for j in 0..numberof_aux.min(count - i - 1) {
            let mut record = [0u8; SYMBOL_RECORD_SIZE];
            record.copy_from_slice(
                view.slice(offset + (j + 1) * SYMBOL_RECORD_SIZE, SYMBOL_RECORD_SIZE)?,
            );
            aux.push(record);
        }

        symbols.push(Symbol {
            name: record_name(view, offset, strings_offset)?,
            value: view.read_u32(offset + 8)?,
            section_number: view.read_u16(offset + 12)? as i16,
            symbol_type: view.read_u16(offset + 14)?,
            storage_class: view.read_u8(offset + 16)?,
            aux,
        });
        i += 1 + numberof_aux;
    }

    Ok(symbols)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_and_long_names() {
        let mut data = vec![0u8; 0x100];
        let base = 0x10usize;

        // Record 0: inline name "main", external function.
        data[base..base + 4].copy_from_slice(b"main");
        data[base + 8..base + 12].copy_from_slice(&0x1000u32.to_le_bytes());
        data[base + 12..base + 14].copy_from_slice(&1u16.to_le_bytes());
        data[base + 14..base + 16].copy_from_slice(&0x20u16.to_le_bytes());
        data[base + 16] = 2;

        // Record 1: long name via string table offset 4.
        let r1 = base + SYMBOL_RECORD_SIZE;
        data[r1 + 4..r1 + 8].copy_from_slice(&4u32.to_le_bytes());
        data[r1 + 16] = 3; // static

        // String table: 4-byte length then the name.
        let strings = base + 2 * SYMBOL_RECORD_SIZE;
        data[strings + 4..strings + 24].copy_from_slice(b"a_very_long_symbol\0\0");

        let symbols = parse(&ByteView::new(&data), base as u32, 2).unwrap();
        assert_eq!(symbols.len(), 2);
        assert_eq!(symbols[0].name, "main");
        assert!(symbols[0].is_external());
        assert!(symbols[0].is_function());
        assert_eq!(symbols[1].name, "a_very_long_symbol");
    }

    #[test]
    fn test_aux_records_are_skipped() {
        let mut data = vec![0u8; 0x100];
        let base = 0x10usize;
        data[base..base + 5].copy_from_slice(b".text");
        data[base + 16] = 3;
        data[base + 17] = 1; // one aux record follows

        let symbols = parse(&ByteView::new(&data), base as u32, 2).unwrap();
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols[0].aux.len(), 1);
    }

    #[test]
    fn test_empty_table() {
        let data = vec![0u8; 4];
        assert!(parse(&ByteView::new(&data), 0, 0).unwrap().is_empty());
    }
}
