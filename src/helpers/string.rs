//! Little-endian integers and floats read from the front of byte slices.
//! Callers pass slices of at least the needed length.

pub(crate) fn to_u16(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

pub(crate) fn to_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// A 32-bit count, offset or sector id
pub(crate) fn to_usize(bytes: &[u8]) -> usize {
    to_u32(bytes) as usize
}

pub(crate) fn to_u64(bytes: &[u8]) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(word)
}

pub(crate) fn to_f64(bytes: &[u8]) -> f64 {
    f64::from_bits(to_u64(bytes))
}

/// Splits a buffer into 32-bit ids; a trailing partial word is ignored.
pub(crate) fn to_usize_iter(bytes: &[u8]) -> impl Iterator<Item = usize> + '_ {
    bytes.chunks_exact(4).map(to_usize)
}
