use crate::error::CryptoError;
use des::Des;
use des::cipher::generic_array::GenericArray;
use des::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

const DES_BLOCK: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacAlgorithm {
    /// ISO 9797-1 MAC algorithm 3 with padding method 2, double-length key.
    RetailMac,
    HmacSha256,
}

/// ISO 9797-1 padding method 2: a mandatory `0x80` then zeros to the block
/// boundary.
fn pad_method_2(data: &[u8]) -> Vec<u8> {
    let mut padded = Vec::with_capacity(data.len() + DES_BLOCK);
    padded.extend_from_slice(data);
    padded.push(0x80);
    while padded.len() % DES_BLOCK != 0 {
        padded.push(0x00);
    }
    padded
}

/// Retail MAC (ANSI X9.19).
///
/// Single DES CBC over every block under the left half of the key with a
/// zero IV, then the final output is decrypted under the right half and
/// encrypted again under the left half.
pub fn retail_mac(key: &[u8], data: &[u8]) -> Result<[u8; DES_BLOCK], CryptoError> {
    if key.len() != 2 * DES_BLOCK {
        return Err(CryptoError::InvalidKeyLength(key.len()));
    }
    let left = Des::new_from_slice(&key[..DES_BLOCK])
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    let right = Des::new_from_slice(&key[DES_BLOCK..])
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;

    let mut chain = [0u8; DES_BLOCK];
    for block in pad_method_2(data).chunks_exact(DES_BLOCK) {
        for (c, b) in chain.iter_mut().zip(block) {
            *c ^= b;
        }
        left.encrypt_block(GenericArray::from_mut_slice(&mut chain));
    }
    right.decrypt_block(GenericArray::from_mut_slice(&mut chain));
    left.encrypt_block(GenericArray::from_mut_slice(&mut chain));
    Ok(chain)
}

pub fn hmac_sha256(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// HMAC over a sequence of parts, each length-prefixed so that part
/// boundaries cannot be shifted.
pub fn hmac_sha256_parts(key: &[u8], parts: &[&[u8]]) -> Result<Vec<u8>, CryptoError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength(key.len()))?;
    for part in parts {
        mac.update(&(part.len() as u32).to_be_bytes());
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}
