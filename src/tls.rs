//! Thread local storage directory.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::optional::PeKind;
use crate::section::Section;
use crate::translate;
use crate::view::ByteView;

const MAX_CALLBACKS: usize = 4096;

/// IMAGE_TLS_DIRECTORY, with the 32 and 64 bit layouts folded into one
/// record. Address fields hold absolute VAs as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Tls {
    /// VA of the first byte of the template data.
    pub addressof_raw_data_start: u64,
    /// VA one past the last byte of the template data.
    pub addressof_raw_data_end: u64,
    /// VA of the slot the loader writes the TLS index into.
    pub addressof_index: u64,
    /// VA of the NULL-terminated callback pointer array.
    pub addressof_callbacks: u64,
    pub sizeof_zero_fill: u32,
    pub characteristics: u32,
    /// Decoded callback VAs, in array order.
    pub callbacks: Vec<u64>,
}

fn offset_of(sections: &[Section], rva: u32) -> Result<usize, ParseError> {
    translate::rva_to_offset(sections, rva)
        .map(|o| o as usize)
        .map_err(|_| ParseError::Malformed("tls rva does not translate"))
}

/// Decode the TLS directory pointed at by `dir`.
pub fn parse(
    view: &ByteView<'_>,
    sections: &[Section],
    imagebase: u64,
    kind: PeKind,
    dir: DataDirectory,
) -> Result<Tls, ParseError> {
    let base = offset_of(sections, dir.rva)?;

    let mut tls = match kind {
        PeKind::Pe32 => Tls {
            addressof_raw_data_start: view.read_u32(base)? as u64,
            addressof_raw_data_end: view.read_u32(base + 4)? as u64,
            addressof_index: view.read_u32(base + 8)? as u64,
            addressof_callbacks: view.read_u32(base + 12)? as u64,
            sizeof_zero_fill: view.read_u32(base + 16)?,
            characteristics: view.read_u32(base + 20)?,
            callbacks: Vec::new(),
        },
        PeKind::Pe64 => Tls {
            addressof_raw_data_start: view.read_u64(base)?,
            addressof_raw_data_end: view.read_u64(base + 8)?,
            addressof_index: view.read_u64(base + 16)?,
            addressof_callbacks: view.read_u64(base + 24)?,
            sizeof_zero_fill: view.read_u32(base + 32)?,
            characteristics: view.read_u32(base + 36)?,
            callbacks: Vec::new(),
        },
    };

    if tls.addressof_callbacks != 0 {
        if let Ok(mut cursor) =
            translate::va_to_offset(sections, imagebase, tls.addressof_callbacks)
        {
            let step = kind.thunk_size();
            while tls.callbacks.len() < MAX_CALLBACKS {
                let callback = match kind {
                    PeKind::Pe32 => view.read_u32(cursor as usize)? as u64,
                    PeKind::Pe64 => view.read_u64(cursor as usize)?,
                };
                if callback == 0 {
                    break;
                }
                tls.callbacks.push(callback);
                cursor = match cursor.checked_add(step as u32) {
                    Some(next) => next,
                    None => break,
                };
            }
        }
    }

    Ok(tls)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::section::SectionFlags;

    fn flat_section(len: u32) -> Vec<Section> {
        let mut s = Section::new(".rdata", Vec::new(), SectionFlags::CNT_INITIALIZED_DATA);
        s.virtual_address = 0x1000;
        s.virtual_size = len;
        s.sizeof_raw_data = len;
        s.pointerto_raw_data = 0x1000;
        vec![s]
    }

    #[test]
    fn test_parse_pe64_with_callbacks() {
        let base = 0x1_4000_0000u64;
        let mut data = vec![0u8; 0x2000];

        // Directory at RVA 0x1000.
        data[0x1000..0x1008].copy_from_slice(&(base + 0x2000).to_le_bytes());
        data[0x1008..0x1010].copy_from_slice(&(base + 0x2100).to_le_bytes());
        data[0x1010..0x1018].copy_from_slice(&(base + 0x1800).to_le_bytes());
        data[0x1018..0x1020].copy_from_slice(&(base + 0x1100).to_le_bytes());
        data[0x1020..0x1024].copy_from_slice(&0x40u32.to_le_bytes());

        // Callback array at RVA 0x1100: two entries then NULL.
        data[0x1100..0x1108].copy_from_slice(&(base + 0x1234).to_le_bytes());
        data[0x1108..0x1110].copy_from_slice(&(base + 0x1250).to_le_bytes());

        let tls = parse(
            &ByteView::new(&data),
            &flat_section(0x1000),
            base,
            PeKind::Pe64,
            DataDirectory {
                rva: 0x1000,
                size: 40,
            },
        )
        .unwrap();

        assert_eq!(tls.sizeof_zero_fill, 0x40);
        assert_eq!(tls.addressof_index, base + 0x1800);
        assert_eq!(tls.callbacks, vec![base + 0x1234, base + 0x1250]);
    }

    #[test]
    fn test_parse_pe32() {
        let mut data = vec![0u8; 0x2000];
        data[0x1000..0x1004].copy_from_slice(&0x40_2000u32.to_le_bytes());
        data[0x1004..0x1008].copy_from_slice(&0x40_2100u32.to_le_bytes());
        data[0x1008..0x100C].copy_from_slice(&0x40_1800u32.to_le_bytes());

        let tls = parse(
            &ByteView::new(&data),
            &flat_section(0x1000),
            0x40_0000,
            PeKind::Pe32,
            DataDirectory {
                rva: 0x1000,
                size: 24,
            },
        )
        .unwrap();

        assert_eq!(tls.addressof_raw_data_start, 0x40_2000);
        assert_eq!(tls.addressof_callbacks, 0);
        assert!(tls.callbacks.is_empty());
    }
}
