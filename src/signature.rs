//! Authenticode signature: the WIN_CERTIFICATE wrapper kept as an opaque
//! blob. The certificate table directory stores a file offset, not an RVA.

use crate::data_dir::DataDirectory;
use crate::error::ParseError;
use crate::view::ByteView;

/// WIN_CERTIFICATE header size.
pub const CERTIFICATE_HEADER_SIZE: usize = 8;

pub const WIN_CERT_REVISION_1_0: u16 = 0x0100;
pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;

/// One attribute certificate entry. The PKCS#7 payload is not decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    pub revision: u16,
    pub certificate_type: u16,
    /// Payload bytes following the 8-byte header.
    pub content: Vec<u8>,
}

impl Certificate {
    /// Declared on-disk length, header included.
    pub fn length(&self) -> u32 {
        (CERTIFICATE_HEADER_SIZE + self.content.len()) as u32
    }
}

/// Decode the certificate entries spanned by `dir`. Entries are 8-byte
/// aligned within the table.
pub fn parse(view: &ByteView<'_>, dir: DataDirectory) -> Result<Vec<Certificate>, ParseError> {
    let table = ByteView::new(view.slice(dir.rva as usize, dir.size as usize)?);

    let mut certificates = Vec::new();
    let mut cursor = 0usize;
    while cursor + CERTIFICATE_HEADER_SIZE <= table.len() {
        let length = table.read_u32(cursor)? as usize;
        if length < CERTIFICATE_HEADER_SIZE || cursor + length > table.len() {
            return Err(ParseError::Malformed("certificate length out of bounds"));
        }
        certificates.push(Certificate {
            revision: table.read_u16(cursor + 4)?,
            certificate_type: table.read_u16(cursor + 6)?,
            content: table
                .slice(cursor + CERTIFICATE_HEADER_SIZE, length - CERTIFICATE_HEADER_SIZE)?
                .to_vec(),
        });
        cursor += (length + 7) & !7;
    }

    Ok(certificates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_two_aligned_entries() {
        let mut data = Vec::new();
        // Entry 1: 8 header + 5 payload = 13, padded to 16.
        data.extend_from_slice(&13u32.to_le_bytes());
        data.extend_from_slice(&WIN_CERT_REVISION_2_0.to_le_bytes());
        data.extend_from_slice(&WIN_CERT_TYPE_PKCS_SIGNED_DATA.to_le_bytes());
        data.extend_from_slice(b"hello");
        data.extend_from_slice(&[0u8; 3]);
        // Entry 2: header only.
        data.extend_from_slice(&8u32.to_le_bytes());
        data.extend_from_slice(&WIN_CERT_REVISION_1_0.to_le_bytes());
        data.extend_from_slice(&WIN_CERT_TYPE_PKCS_SIGNED_DATA.to_le_bytes());

        let certs = parse(
            &ByteView::new(&data),
            DataDirectory {
                rva: 0,
                size: data.len() as u32,
            },
        )
        .unwrap();

        assert_eq!(certs.len(), 2);
        assert_eq!(certs[0].content, b"hello");
        assert_eq!(certs[0].length(), 13);
        assert_eq!(certs[1].revision, WIN_CERT_REVISION_1_0);
        assert!(certs[1].content.is_empty());
    }

    #[test]
    fn test_truncated_entry_is_an_error() {
        let mut data = Vec::new();
        data.extend_from_slice(&64u32.to_le_bytes()); // claims more than present
        data.extend_from_slice(&WIN_CERT_REVISION_2_0.to_le_bytes());
        data.extend_from_slice(&WIN_CERT_TYPE_PKCS_SIGNED_DATA.to_le_bytes());

        let result = parse(
            &ByteView::new(&data),
            DataDirectory {
                rva: 0,
                size: data.len() as u32,
            },
        );
        assert!(result.is_err());
    }
}
