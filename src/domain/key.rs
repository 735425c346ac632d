use crate::error::{CryptoError, KeyStateError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

/// Identifier of an entry in the key table. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyId(pub u32);

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K{:06}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyAlgorithm {
    Des,
    TripleDes,
    Aes,
    HmacSha256,
}

impl KeyAlgorithm {
    pub fn name(self) -> &'static str {
        match self {
            KeyAlgorithm::Des => "DES",
            KeyAlgorithm::TripleDes => "3DES",
            KeyAlgorithm::Aes => "AES",
            KeyAlgorithm::HmacSha256 => "HMAC-SHA256",
        }
    }

    /// Cipher block size in bytes, `None` for non-block algorithms.
    pub fn block_size(self) -> Option<usize> {
        match self {
            KeyAlgorithm::Des | KeyAlgorithm::TripleDes => Some(8),
            KeyAlgorithm::Aes => Some(16),
            KeyAlgorithm::HmacSha256 => None,
        }
    }

    /// Legacy DES family keys carry odd parity in every byte.
    pub fn requires_parity(self) -> bool {
        matches!(self, KeyAlgorithm::Des | KeyAlgorithm::TripleDes)
    }

    /// Checks a key size expressed in bits, returning the byte length.
    pub fn key_len(self, bits: usize) -> Result<usize, CryptoError> {
        let supported: &[usize] = match self {
            KeyAlgorithm::Des => &[64],
            KeyAlgorithm::TripleDes => &[128, 192],
            KeyAlgorithm::Aes => &[128, 256],
            KeyAlgorithm::HmacSha256 => &[256],
        };
        if supported.contains(&bits) {
            Ok(bits / 8)
        } else {
            Err(CryptoError::UnsupportedKeySize {
                algorithm: self.name(),
                bits,
            })
        }
    }
}

/// Role of a key in the hierarchy.
///
/// The zone master key sits at the root; zone and base derivation keys are
/// owned by it; terminal keys are owned by the zone key of the same kind.
/// A parent always sits exactly one tier above its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    ZoneMaster,
    ZonePin,
    ZoneMac,
    BaseDerivation,
    ResponseSigning,
    TerminalPin,
    TerminalMac,
}

impl KeyUsage {
    pub fn tier(self) -> u8 {
        match self {
            KeyUsage::ZoneMaster => 0,
            KeyUsage::ZonePin
            | KeyUsage::ZoneMac
            | KeyUsage::BaseDerivation
            | KeyUsage::ResponseSigning => 1,
            KeyUsage::TerminalPin | KeyUsage::TerminalMac => 2,
        }
    }

    pub fn can_own(self, child: KeyUsage) -> bool {
        if self.tier() + 1 != child.tier() {
            return false;
        }
        match child {
            KeyUsage::TerminalPin => self == KeyUsage::ZonePin,
            KeyUsage::TerminalMac => self == KeyUsage::ZoneMac,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyState {
    Pending,
    Active,
    Revoked,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RevocationReason {
    Rotated,
    Compromised,
    Administrative(String),
}

/// Secret key bytes, wiped on drop and never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyMaterial(Zeroizing<Vec<u8>>);

impl KeyMaterial {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        hex::decode(hex_str)
            .map(Self::new)
            .map_err(|_| CryptoError::InvalidHex)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyMaterial([REDACTED; {}])", self.0.len())
    }
}

/// Well known key slots. A slot names the role a key plays for the switch;
/// each slot has at most one current key and one pending successor.
pub mod slots {
    pub const ZONE_MASTER: &str = "ZMK";
    pub const BASE_DERIVATION: &str = "BDK";
    pub const RESPONSE_SIGNING: &str = "RSK";
    pub const ZONE_MAC: &str = "ZAK";

    pub fn terminal_mac(terminal_id: &str) -> String {
        format!("TAK:{}", terminal_id.trim())
    }
}

/// An immutable version of a key. State changes produce a new value that
/// replaces the old one in the key table.
#[derive(Debug, Clone, PartialEq)]
pub struct Key {
    pub id: KeyId,
    pub slot: String,
    pub usage: KeyUsage,
    pub algorithm: KeyAlgorithm,
    pub material: KeyMaterial,
    pub kcv: String,
    pub version: u32,
    pub parent: Option<KeyId>,
    pub state: KeyState,
    pub created_at: DateTime<Utc>,
    pub activated_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub revocation_reason: Option<RevocationReason>,
}

impl Key {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now >= expires)
    }

    /// Fails unless the key is active and inside its validity window.
    pub fn ensure_usable(&self, now: DateTime<Utc>) -> Result<(), KeyStateError> {
        match self.state {
            KeyState::Revoked => Err(KeyStateError::Revoked(self.id)),
            KeyState::Pending => Err(KeyStateError::WrongState {
                id: self.id,
                state: self.state,
                expected: KeyState::Active,
            }),
            KeyState::Active if self.is_expired_at(now) => Err(KeyStateError::Expired(self.id)),
            KeyState::Active => Ok(()),
        }
    }
}

/// Key serial number: a 59 bit terminal identifier followed by a 21 bit
/// transaction counter, 80 bits in total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Ksn {
    prefix: u64,
    counter: u32,
}

impl Ksn {
    pub const COUNTER_BITS: u32 = 21;
    pub const MAX_COUNTER: u32 = (1 << Self::COUNTER_BITS) - 1;
    const PREFIX_BITS: u32 = 59;
    pub const LEN: usize = 10;

    pub fn new(prefix: u64, counter: u32) -> Result<Self, CryptoError> {
        if prefix >> Self::PREFIX_BITS != 0 || counter > Self::MAX_COUNTER {
            return Err(CryptoError::InvalidKsn);
        }
        Ok(Self { prefix, counter })
    }

    /// Builds the KSN a terminal would send for its `counter`-th transaction.
    pub fn for_terminal(terminal_id: &str, counter: u32) -> Result<Self, CryptoError> {
        Self::new(Self::terminal_prefix(terminal_id), counter)
    }

    pub fn terminal_prefix(terminal_id: &str) -> u64 {
        let digest = Sha256::digest(terminal_id.trim().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(head) >> (64 - Self::PREFIX_BITS)
    }

    pub fn parse(hex_str: &str) -> Result<Self, CryptoError> {
        let raw = hex::decode(hex_str).map_err(|_| CryptoError::InvalidKsn)?;
        if raw.len() != Self::LEN {
            return Err(CryptoError::InvalidKsn);
        }
        let mut wide = [0u8; 16];
        wide[16 - Self::LEN..].copy_from_slice(&raw);
        let value = u128::from_be_bytes(wide);
        let counter = (value & u128::from(Self::MAX_COUNTER)) as u32;
        let prefix = (value >> Self::COUNTER_BITS) as u64;
        Self::new(prefix, counter)
    }

    pub fn prefix(&self) -> u64 {
        self.prefix
    }

    pub fn counter(&self) -> u32 {
        self.counter
    }

    /// Serialized form with an arbitrary value in the counter position.
    pub fn with_register(&self, register: u32) -> [u8; Self::LEN] {
        let value = (u128::from(self.prefix) << Self::COUNTER_BITS)
            | u128::from(register & Self::MAX_COUNTER);
        let wide = value.to_be_bytes();
        let mut out = [0u8; Self::LEN];
        out.copy_from_slice(&wide[16 - Self::LEN..]);
        out
    }

    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        self.with_register(self.counter)
    }

    /// The KSN with the counter cleared, input to the initial key.
    pub fn masked(&self) -> [u8; Self::LEN] {
        self.with_register(0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.to_bytes())
    }
}

impl fmt::Display for Ksn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Single-use key derived from a base derivation key and a KSN.
#[derive(Debug, Clone)]
pub struct TransactionKey {
    pub ksn: Ksn,
    pub base_key: KeyId,
    pub algorithm: KeyAlgorithm,
    pub material: KeyMaterial,
}

/// Key material in transit to an endpoint, wrapped under the parent key and
/// signed by the switch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEnvelope {
    pub slot: String,
    pub key_id: KeyId,
    pub version: u32,
    pub kcv: String,
    pub wrapped: Vec<u8>,
    pub signature: Vec<u8>,
}

impl KeyEnvelope {
    /// Bytes covered by the envelope signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(64 + self.wrapped.len());
        payload.extend_from_slice(self.slot.as_bytes());
        payload.push(0);
        payload.extend_from_slice(&self.key_id.0.to_be_bytes());
        payload.extend_from_slice(&self.version.to_be_bytes());
        payload.extend_from_slice(self.kcv.as_bytes());
        payload.extend_from_slice(&self.wrapped);
        payload
    }
}
