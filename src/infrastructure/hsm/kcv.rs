use super::mac::hmac_sha256;
use super::symmetric::encrypt_zero_block;
use crate::domain::key::KeyAlgorithm;
use crate::error::CryptoError;
use subtle::ConstantTimeEq;

const KCV_BYTES: usize = 3;

/// Key check value: the first three bytes of the key applied to a zero block,
/// as six upper-case hex digits. AES uses its native 16 byte block; HMAC keys
/// authenticate an 8 byte zero block instead.
pub fn kcv(algorithm: KeyAlgorithm, key: &[u8]) -> Result<String, CryptoError> {
    let output = match algorithm {
        KeyAlgorithm::HmacSha256 => hmac_sha256(key, &[0u8; 8])?,
        _ => encrypt_zero_block(algorithm, key)?,
    };
    Ok(hex::encode_upper(&output[..KCV_BYTES]))
}

pub fn verify_kcv(algorithm: KeyAlgorithm, key: &[u8], expected: &str) -> Result<bool, CryptoError> {
    let actual = kcv(algorithm, key)?;
    Ok(actual
        .as_bytes()
        .ct_eq(expected.to_ascii_uppercase().as_bytes())
        .into())
}

/// Forces odd parity on every byte by flipping the low bit where needed.
pub fn set_odd_parity(key: &mut [u8]) {
    for byte in key.iter_mut() {
        if byte.count_ones() % 2 == 0 {
            *byte ^= 0x01;
        }
    }
}

pub fn has_odd_parity(key: &[u8]) -> bool {
    key.iter().all(|byte| byte.count_ones() % 2 == 1)
}
