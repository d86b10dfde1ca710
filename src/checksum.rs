//! PE image checksum.
//!
//! The loader only enforces the checksum for drivers and other system
//! images, but writing a correct one keeps the output indistinguishable
//! from linker output.

/// Compute the PE checksum over `data`, skipping the 4-byte checksum field
/// at `field_offset`: carry-folded sum of 16-bit words plus the file length.
pub fn image_checksum(data: &[u8], field_offset: usize) -> u32 {
    let mut sum: u64 = 0;

    let mut i = 0;
    while i + 1 < data.len() {
        if i >= field_offset && i < field_offset + 4 {
            i += 2;
            continue;
        }
        sum += u16::from_le_bytes([data[i], data[i + 1]]) as u64;
        i += 2;
    }
    if i < data.len() {
        sum += data[i] as u64;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    sum as u32 + data.len() as u32
}
