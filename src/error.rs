use crate::domain::key::{KeyId, KeyState};
use thiserror::Error;

/// Failures while encoding or decoding a wire message.
///
/// Every variant is recoverable: the offending message is rejected and the
/// switch keeps serving.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message truncated at offset {offset}: needed {needed} bytes, {remaining} remaining")]
    Truncated {
        offset: usize,
        needed: usize,
        remaining: usize,
    },
    #[error("malformed length prefix for field {field}")]
    BadLength { field: u8 },
    #[error("unknown MTI {0:?}")]
    UnknownMti(String),
    #[error("MTI {mti} requires field {field}")]
    MissingField { mti: &'static str, field: u8 },
    #[error("field {field} must be exactly {expected} characters, got {actual}")]
    FixedLength {
        field: u8,
        expected: usize,
        actual: usize,
    },
    #[error("field {field} exceeds its maximum length of {max}")]
    Oversize { field: u8, max: usize },
    #[error("field {0} is outside the primary bitmap range")]
    FieldNotAllowed(u8),
    #[error("field {field} contains non-printable or non-ASCII data")]
    InvalidCharacter { field: u8 },
    #[error("bitmap is not a 16 digit hexadecimal value")]
    InvalidBitmap,
    #[error("secondary bitmap is not supported")]
    SecondaryBitmap,
    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),
}

/// Failures inside the simulated HSM primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid key length {0} for the requested primitive")]
    InvalidKeyLength(usize),
    #[error("{algorithm} does not support {bits}-bit keys")]
    UnsupportedKeySize { algorithm: &'static str, bits: usize },
    #[error("{0} cannot be used for this operation")]
    UnsupportedAlgorithm(&'static str),
    #[error("ciphertext is malformed")]
    MalformedCiphertext,
    #[error("PIN must be 4 to 12 digits")]
    InvalidPin,
    #[error("PAN is too short to build a PIN block")]
    InvalidPan,
    #[error("PIN block is malformed")]
    InvalidPinBlock,
    #[error("key material fails the odd parity check")]
    Parity,
    #[error("invalid hexadecimal input")]
    InvalidHex,
    #[error("key serial number is malformed")]
    InvalidKsn,
}

/// Integrity failures. Deliberately carries no detail about where the
/// mismatch was found.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
    #[error("integrity check failed")]
    Mismatch,
    #[error("signature outside its validity window")]
    Expired,
    #[error("integrity material is malformed")]
    Malformed,
}

/// Operations against keys in the wrong lifecycle state. These reach the
/// administrative caller with full detail.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KeyStateError {
    #[error("key {0} does not exist")]
    Missing(KeyId),
    #[error("no active key in slot {0}")]
    NoActiveKey(String),
    #[error("key {0} has been revoked")]
    Revoked(KeyId),
    #[error("key {id} is {state:?}, expected {expected:?}")]
    WrongState {
        id: KeyId,
        state: KeyState,
        expected: KeyState,
    },
    #[error("key {0} has expired")]
    Expired(KeyId),
    #[error("slot {0} already has a rotation in progress")]
    RotationInProgress(String),
    #[error("key {0} cannot own a key of this usage")]
    InvalidParent(KeyId),
    #[error("key {0} has no parent to wrap it under")]
    NoWrappingKey(KeyId),
    #[error("key {id} is not usable for {expected}")]
    WrongUsage { id: KeyId, expected: &'static str },
    #[error("key {0} was not delivered to any endpoint")]
    NotDistributed(KeyId),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Replay signals. Both map to a generic external decline.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplayError {
    #[error("sequence {stan} from terminal {terminal_id} already seen ({attempts} attempts)")]
    SequenceReplay {
        terminal_id: String,
        stan: String,
        attempts: u32,
    },
    #[error("KSN {0} was already consumed")]
    KsnReplay(String),
}

/// Failures pushing key material to a remote endpoint.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DistributionError {
    #[error("endpoint {0} is offline")]
    Offline(String),
    #[error("endpoint {0} is unknown")]
    UnknownEndpoint(String),
    #[error("endpoint {endpoint} rejected the key: {reason}")]
    Rejected { endpoint: String, reason: String },
}

#[derive(Error, Debug)]
pub enum SwitchError {
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("Integrity error: {0}")]
    Integrity(#[from] IntegrityError),
    #[error("Key state error: {0}")]
    KeyState(#[from] KeyStateError),
    #[error("Replay: {0}")]
    Replay(#[from] ReplayError),
    #[error("Distribution error: {0}")]
    Distribution(#[from] DistributionError),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T, E = SwitchError> = std::result::Result<T, E>;
