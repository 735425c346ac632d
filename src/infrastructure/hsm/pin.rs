//! ISO 9564 clear PIN blocks, formats 0 and 1.

use crate::error::CryptoError;
use rand::Rng;

pub const PIN_BLOCK_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinBlockFormat {
    /// PIN field XORed with twelve PAN digits.
    Iso0,
    /// PIN field with random fill, no PAN binding.
    Iso1,
}

impl PinBlockFormat {
    fn control(self) -> u8 {
        match self {
            PinBlockFormat::Iso0 => 0,
            PinBlockFormat::Iso1 => 1,
        }
    }
}

fn validate_pin(pin: &str) -> Result<(), CryptoError> {
    if (4..=12).contains(&pin.len()) && pin.bytes().all(|b| b.is_ascii_digit()) {
        Ok(())
    } else {
        Err(CryptoError::InvalidPin)
    }
}

fn pack(nibbles: &[u8; 16]) -> [u8; PIN_BLOCK_LEN] {
    let mut out = [0u8; PIN_BLOCK_LEN];
    for (i, pair) in nibbles.chunks_exact(2).enumerate() {
        out[i] = (pair[0] << 4) | pair[1];
    }
    out
}

fn unpack(block: &[u8; PIN_BLOCK_LEN]) -> [u8; 16] {
    let mut nibbles = [0u8; 16];
    for (i, byte) in block.iter().enumerate() {
        nibbles[2 * i] = byte >> 4;
        nibbles[2 * i + 1] = byte & 0x0F;
    }
    nibbles
}

/// `0000` followed by the twelve rightmost PAN digits, check digit excluded.
fn pan_field(pan: &str) -> Result<[u8; PIN_BLOCK_LEN], CryptoError> {
    if pan.len() < 13 || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CryptoError::InvalidPan);
    }
    let digits = &pan.as_bytes()[pan.len() - 13..pan.len() - 1];
    let mut nibbles = [0u8; 16];
    for (slot, digit) in nibbles[4..].iter_mut().zip(digits) {
        *slot = digit - b'0';
    }
    Ok(pack(&nibbles))
}

pub fn build(format: PinBlockFormat, pin: &str, pan: &str) -> Result<[u8; PIN_BLOCK_LEN], CryptoError> {
    validate_pin(pin)?;

    let mut nibbles = [0x0Fu8; 16];
    nibbles[0] = format.control();
    nibbles[1] = pin.len() as u8;
    for (slot, digit) in nibbles[2..].iter_mut().zip(pin.bytes()) {
        *slot = digit - b'0';
    }

    match format {
        PinBlockFormat::Iso0 => {
            let pin_field = pack(&nibbles);
            let pan_field = pan_field(pan)?;
            let mut block = [0u8; PIN_BLOCK_LEN];
            for (i, out) in block.iter_mut().enumerate() {
                *out = pin_field[i] ^ pan_field[i];
            }
            Ok(block)
        }
        PinBlockFormat::Iso1 => {
            let mut rng = rand::thread_rng();
            for slot in nibbles[2 + pin.len()..].iter_mut() {
                *slot = rng.gen_range(0..16);
            }
            Ok(pack(&nibbles))
        }
    }
}

/// Recovers the PIN from a clear PIN block. The PAN is required for format 0.
pub fn extract(block: &[u8; PIN_BLOCK_LEN], pan: &str) -> Result<(PinBlockFormat, String), CryptoError> {
    let format = match block[0] >> 4 {
        0 => PinBlockFormat::Iso0,
        1 => PinBlockFormat::Iso1,
        _ => return Err(CryptoError::InvalidPinBlock),
    };

    let clear = match format {
        PinBlockFormat::Iso0 => {
            let pan_field = pan_field(pan)?;
            let mut clear = [0u8; PIN_BLOCK_LEN];
            for (i, out) in clear.iter_mut().enumerate() {
                *out = block[i] ^ pan_field[i];
            }
            clear
        }
        PinBlockFormat::Iso1 => *block,
    };

    let nibbles = unpack(&clear);
    let len = usize::from(nibbles[1]);
    if !(4..=12).contains(&len) {
        return Err(CryptoError::InvalidPinBlock);
    }
    let digits = &nibbles[2..2 + len];
    if digits.iter().any(|d| *d > 9) {
        return Err(CryptoError::InvalidPinBlock);
    }
    if format == PinBlockFormat::Iso0 && nibbles[2 + len..].iter().any(|n| *n != 0x0F) {
        return Err(CryptoError::InvalidPinBlock);
    }

    let pin = digits.iter().map(|d| char::from(b'0' + d)).collect();
    Ok((format, pin))
}
