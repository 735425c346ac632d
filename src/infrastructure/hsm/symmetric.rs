//! Block cipher primitives over RustCrypto's `cipher` traits.
//!
//! CBC output carries a random IV in front of the ciphertext; ECB output
//! carries nothing but ciphertext. Both always apply PKCS#7 padding.

use crate::domain::key::KeyAlgorithm;
use crate::error::CryptoError;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{
    Block, BlockCipher, BlockDecryptMut, BlockEncrypt, BlockEncryptMut, KeyInit, KeyIvInit,
};
use rand::RngCore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Cbc,
    Ecb,
}

/// Runs a generic cipher routine with the concrete cipher selected by
/// algorithm and key length.
macro_rules! dispatch_cipher {
    ($algorithm:expr, $key:expr, $routine:ident ( $($arg:expr),* )) => {
        match ($algorithm, $key.len()) {
            (KeyAlgorithm::Des, 8) => $routine::<des::Des>($key, $($arg),*),
            (KeyAlgorithm::TripleDes, 16) => $routine::<des::TdesEde2>($key, $($arg),*),
            (KeyAlgorithm::TripleDes, 24) => $routine::<des::TdesEde3>($key, $($arg),*),
            (KeyAlgorithm::Aes, 16) => $routine::<aes::Aes128>($key, $($arg),*),
            (KeyAlgorithm::Aes, 24) => $routine::<aes::Aes192>($key, $($arg),*),
            (KeyAlgorithm::Aes, 32) => $routine::<aes::Aes256>($key, $($arg),*),
            (KeyAlgorithm::HmacSha256, _) => {
                Err(CryptoError::UnsupportedAlgorithm(KeyAlgorithm::HmacSha256.name()))
            }
            (_, len) => Err(CryptoError::InvalidKeyLength(len)),
        }
    };
}

pub fn encrypt(
    algorithm: KeyAlgorithm,
    key: &[u8],
    mode: CipherMode,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match mode {
        CipherMode::Cbc => dispatch_cipher!(algorithm, key, cbc_encrypt(data)),
        CipherMode::Ecb => dispatch_cipher!(algorithm, key, ecb_encrypt(data)),
    }
}

pub fn decrypt(
    algorithm: KeyAlgorithm,
    key: &[u8],
    mode: CipherMode,
    data: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    match mode {
        CipherMode::Cbc => dispatch_cipher!(algorithm, key, cbc_decrypt(data)),
        CipherMode::Ecb => dispatch_cipher!(algorithm, key, ecb_decrypt(data)),
    }
}

/// Raw encryption of one all-zero block, no padding. Used for check values.
pub fn encrypt_zero_block(algorithm: KeyAlgorithm, key: &[u8]) -> Result<Vec<u8>, CryptoError> {
    dispatch_cipher!(algorithm, key, zero_block())
}

fn invalid_length(key: &[u8]) -> CryptoError {
    CryptoError::InvalidKeyLength(key.len())
}

fn cbc_encrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let mut iv = Block::<C>::default();
    rand::thread_rng().fill_bytes(&mut iv);
    let cipher = cbc::Encryptor::<C>::new_from_slices(key, &iv).map_err(|_| invalid_length(key))?;

    let mut out = iv.to_vec();
    out.extend_from_slice(&cipher.encrypt_padded_vec_mut::<Pkcs7>(data));
    Ok(out)
}

fn cbc_decrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let iv_len = Block::<C>::default().len();
    if data.len() <= iv_len {
        return Err(CryptoError::MalformedCiphertext);
    }
    let (iv, ciphertext) = data.split_at(iv_len);
    let cipher = cbc::Decryptor::<C>::new_from_slices(key, iv).map_err(|_| invalid_length(key))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| CryptoError::MalformedCiphertext)
}

fn ecb_encrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockEncryptMut + BlockCipher + KeyInit,
{
    let cipher = ecb::Encryptor::<C>::new_from_slice(key).map_err(|_| invalid_length(key))?;
    Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(data))
}

fn ecb_decrypt<C>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockDecryptMut + BlockCipher + KeyInit,
{
    let cipher = ecb::Decryptor::<C>::new_from_slice(key).map_err(|_| invalid_length(key))?;
    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::MalformedCiphertext)
}

fn zero_block<C>(key: &[u8]) -> Result<Vec<u8>, CryptoError>
where
    C: BlockEncrypt + KeyInit,
{
    let cipher = C::new_from_slice(key).map_err(|_| invalid_length(key))?;
    let mut block = Block::<C>::default();
    cipher.encrypt_block(&mut block);
    Ok(block.to_vec())
}
