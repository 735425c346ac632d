use crate::error::CodecError;

pub const BITMAP_HEX_LEN: usize = 16;

/// Bit for field `n`, MSB first: field 1 is the top bit, field 64 the lowest.
pub fn bit(field: u8) -> u64 {
    1u64 << (64 - u32::from(field))
}

pub fn is_set(bitmap: u64, field: u8) -> bool {
    bitmap & bit(field) != 0
}

/// Present fields in ascending order.
pub fn present_fields(bitmap: u64) -> impl Iterator<Item = u8> {
    (1..=64u8).filter(move |field| is_set(bitmap, *field))
}

pub fn to_hex(bitmap: u64) -> String {
    format!("{bitmap:016X}")
}

pub fn parse_hex(raw: &[u8]) -> Result<u64, CodecError> {
    if raw.len() != BITMAP_HEX_LEN || !raw.iter().all(u8::is_ascii_hexdigit) {
        return Err(CodecError::InvalidBitmap);
    }
    let text = std::str::from_utf8(raw).map_err(|_| CodecError::InvalidBitmap)?;
    u64::from_str_radix(text, 16).map_err(|_| CodecError::InvalidBitmap)
}
