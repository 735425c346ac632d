//! Per-transaction key derivation.
//!
//! An initial key is derived from the base derivation key and the KSN with
//! its counter cleared; the transaction key is then folded forward once for
//! every set bit of the counter, lowest bit first. Each fold keys HMAC-SHA256
//! with the running key over the KSN carrying the bits accumulated so far.

use super::hsm::kcv::set_odd_parity;
use super::hsm::mac::hmac_sha256;
use crate::domain::key::{Key, KeyId, KeyMaterial, Ksn, TransactionKey};
use crate::error::{CryptoError, ReplayError};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use tracing::warn;
use zeroize::Zeroizing;

fn fold(key: &[u8], data: &[u8], len: usize) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
    let mut out = hmac_sha256(key, data)?;
    if len > out.len() {
        return Err(CryptoError::InvalidKeyLength(len));
    }
    out.truncate(len);
    Ok(Zeroizing::new(out))
}

/// Derives the transaction key for `ksn` under `bdk`. Deterministic: the
/// same inputs always give the same key.
pub fn derive(bdk: &Key, ksn: &Ksn) -> Result<TransactionKey, CryptoError> {
    let len = bdk.material.len();
    let mut current = fold(bdk.material.as_bytes(), &ksn.masked(), len)?;

    let mut register = 0u32;
    for bit in 0..Ksn::COUNTER_BITS {
        let mask = 1u32 << bit;
        if ksn.counter() & mask != 0 {
            register |= mask;
            current = fold(&current, &ksn.with_register(register), len)?;
        }
    }

    let mut material = current.to_vec();
    if bdk.algorithm.requires_parity() {
        set_odd_parity(&mut material);
    }

    Ok(TransactionKey {
        ksn: *ksn,
        base_key: bdk.id,
        algorithm: bdk.algorithm,
        material: KeyMaterial::new(material),
    })
}

/// Tracks the highest counter consumed per base key and terminal.
///
/// Terminal counters only move forward, so any counter at or below the
/// recorded high-water mark has either been used or was skipped, and both
/// are refused.
#[derive(Debug, Default)]
pub struct KsnLedger {
    high_water: Mutex<HashMap<(KeyId, u64), u32>>,
}

impl KsnLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `ksn` as consumed. Check and insert happen under one lock.
    pub fn consume(&self, bdk: KeyId, ksn: &Ksn) -> Result<(), ReplayError> {
        let mut high_water = self.high_water.lock();
        match high_water.entry((bdk, ksn.prefix())) {
            Entry::Occupied(mut seen) => {
                if ksn.counter() <= *seen.get() {
                    warn!(target: "audit", ksn = %ksn, high_water = *seen.get(), "KSN replay refused");
                    return Err(ReplayError::KsnReplay(ksn.to_hex()));
                }
                seen.insert(ksn.counter());
            }
            Entry::Vacant(slot) => {
                slot.insert(ksn.counter());
            }
        }
        Ok(())
    }

    pub fn high_water(&self, bdk: KeyId, ksn_prefix: u64) -> Option<u32> {
        self.high_water.lock().get(&(bdk, ksn_prefix)).copied()
    }
}
