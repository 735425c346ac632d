//! Simulated hardware security module.
//!
//! All cryptography used by the switch goes through [`CryptoService`]: block
//! cipher encryption, message authentication, PIN block translation, key
//! check values, key wrapping for transport and asymmetric signing.

pub mod kcv;
pub mod mac;
pub mod pin;
pub mod response;
pub mod signing;
pub mod symmetric;

pub use mac::MacAlgorithm;
pub use pin::PinBlockFormat;
pub use response::ResponseSignature;
pub use signing::SigningKeyPair;
pub use symmetric::CipherMode;

use crate::domain::key::{Key, KeyAlgorithm, KeyMaterial, TransactionKey};
use crate::domain::message::{FIELD_MAC, Message};
use crate::error::{CryptoError, IntegrityError, Result};
use crate::interfaces::iso8583;
use ed25519_dalek::VerifyingKey;
use subtle::ConstantTimeEq;

/// Anything that can key a symmetric primitive.
pub trait SymmetricKey {
    fn algorithm(&self) -> KeyAlgorithm;
    fn material(&self) -> &[u8];
}

impl SymmetricKey for Key {
    fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    fn material(&self) -> &[u8] {
        self.material.as_bytes()
    }
}

impl SymmetricKey for TransactionKey {
    fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    fn material(&self) -> &[u8] {
        self.material.as_bytes()
    }
}

/// Stateless facade over the cryptographic primitives. Key material is
/// always passed in; the service never holds keys of its own.
#[derive(Debug, Default, Clone, Copy)]
pub struct CryptoService;

impl CryptoService {
    pub fn new() -> Self {
        Self
    }

    pub fn encrypt(&self, data: &[u8], key: &impl SymmetricKey, mode: CipherMode) -> Result<Vec<u8>, CryptoError> {
        symmetric::encrypt(key.algorithm(), key.material(), mode, data)
    }

    pub fn decrypt(&self, data: &[u8], key: &impl SymmetricKey, mode: CipherMode) -> Result<Vec<u8>, CryptoError> {
        symmetric::decrypt(key.algorithm(), key.material(), mode, data)
    }

    pub fn generate_mac(
        &self,
        data: &[u8],
        key: &impl SymmetricKey,
        algorithm: MacAlgorithm,
    ) -> Result<Vec<u8>, CryptoError> {
        match algorithm {
            MacAlgorithm::RetailMac => {
                if key.algorithm() != KeyAlgorithm::TripleDes {
                    return Err(CryptoError::UnsupportedAlgorithm(key.algorithm().name()));
                }
                Ok(mac::retail_mac(key.material(), data)?.to_vec())
            }
            MacAlgorithm::HmacSha256 => mac::hmac_sha256(key.material(), data),
        }
    }

    /// Constant-time MAC check. Any difference is reported as a bare
    /// [`IntegrityError::Mismatch`].
    pub fn verify_mac(
        &self,
        data: &[u8],
        mac: &[u8],
        key: &impl SymmetricKey,
        algorithm: MacAlgorithm,
    ) -> Result<()> {
        let expected = self.generate_mac(data, key, algorithm)?;
        if bool::from(expected.as_slice().ct_eq(mac)) {
            Ok(())
        } else {
            Err(IntegrityError::Mismatch.into())
        }
    }

    pub fn kcv(&self, key: &impl SymmetricKey) -> Result<String, CryptoError> {
        kcv::kcv(key.algorithm(), key.material())
    }

    pub fn verify_kcv(&self, key: &impl SymmetricKey, expected: &str) -> Result<bool, CryptoError> {
        kcv::verify_kcv(key.algorithm(), key.material(), expected)
    }

    /// Builds and encrypts a PIN block under a PIN or transaction key.
    pub fn encrypt_pin_block(
        &self,
        format: PinBlockFormat,
        pin: &str,
        pan: &str,
        key: &impl SymmetricKey,
    ) -> Result<Vec<u8>, CryptoError> {
        let clear = pin::build(format, pin, pan)?;
        self.encrypt(&clear, key, CipherMode::Ecb)
    }

    pub fn decrypt_pin_block(
        &self,
        encrypted: &[u8],
        pan: &str,
        key: &impl SymmetricKey,
    ) -> Result<String, CryptoError> {
        let clear = self.decrypt(encrypted, key, CipherMode::Ecb)?;
        let block: [u8; pin::PIN_BLOCK_LEN] = clear
            .as_slice()
            .try_into()
            .map_err(|_| CryptoError::InvalidPinBlock)?;
        let (_, pin) = pin::extract(&block, pan)?;
        Ok(pin)
    }

    /// Encrypts key material under a key encryption key for transport.
    pub fn wrap_key(&self, key: &Key, wrapping_key: &Key) -> Result<Vec<u8>, CryptoError> {
        self.encrypt(key.material.as_bytes(), wrapping_key, CipherMode::Ecb)
    }

    pub fn unwrap_key(&self, wrapped: &[u8], wrapping_key: &Key) -> Result<KeyMaterial, CryptoError> {
        self.decrypt(wrapped, wrapping_key, CipherMode::Ecb)
            .map(KeyMaterial::new)
    }

    pub fn sign(&self, data: &[u8], key: &SigningKeyPair) -> Vec<u8> {
        key.sign(data)
    }

    pub fn verify_signature(
        &self,
        data: &[u8],
        signature: &[u8],
        public_key: &VerifyingKey,
    ) -> Result<(), IntegrityError> {
        signing::verify(public_key, data, signature)
    }

    /// Sets field 64 to the retail MAC of the message.
    pub fn seal_message(&self, message: &mut Message, key: &impl SymmetricKey) -> Result<()> {
        let input = iso8583::mac_input(message)?;
        let mac = self.generate_mac(&input, key, MacAlgorithm::RetailMac)?;
        message.set(FIELD_MAC, hex::encode_upper(mac))?;
        Ok(())
    }

    /// Checks field 64 of an inbound message.
    pub fn verify_message_mac(&self, message: &Message, key: &impl SymmetricKey) -> Result<()> {
        let provided = message.field(FIELD_MAC).ok_or(IntegrityError::Malformed)?;
        let provided = hex::decode(provided).map_err(|_| IntegrityError::Malformed)?;
        let input = iso8583::mac_input(message)?;
        self.verify_mac(&input, &provided, key, MacAlgorithm::RetailMac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::key::{KeyId, Ksn};
    use crate::domain::message::*;
    use crate::error::SwitchError;

    fn tdes(hex_key: &str) -> TransactionKey {
        TransactionKey {
            ksn: Ksn::for_terminal("T1", 1).unwrap(),
            base_key: KeyId(1),
            algorithm: KeyAlgorithm::TripleDes,
            material: KeyMaterial::from_hex(hex_key).unwrap(),
        }
    }

    fn request() -> Message {
        Message::new(Mti::AuthorizationRequest)
            .with(FIELD_PAN, "4111111111111111")
            .unwrap()
            .with(FIELD_PROCESSING_CODE, "000000")
            .unwrap()
            .with(FIELD_AMOUNT, "000000010000")
            .unwrap()
            .with(FIELD_TRANSMISSION_TIME, "0612143000")
            .unwrap()
            .with(FIELD_STAN, "000001")
            .unwrap()
            .with(FIELD_TERMINAL_ID, "T1      ")
            .unwrap()
    }

    #[test]
    fn test_seal_and_verify_message() {
        let crypto = CryptoService::new();
        let key = tdes("0123456789ABCDEFFEDCBA9876543210");
        let mut message = request();
        crypto.seal_message(&mut message, &key).unwrap();
        assert_eq!(message.field(FIELD_MAC).unwrap().len(), 16);
        assert!(crypto.verify_message_mac(&message, &key).is_ok());

        message.set(FIELD_AMOUNT, "000000010001").unwrap();
        assert!(matches!(
            crypto.verify_message_mac(&message, &key),
            Err(SwitchError::Integrity(IntegrityError::Mismatch))
        ));
    }

    #[test]
    fn test_verify_mac_rejects_other_key() {
        let crypto = CryptoService::new();
        let key = tdes("0123456789ABCDEFFEDCBA9876543210");
        let other = tdes("FEDCBA98765432100123456789ABCDEF");
        let mac = crypto
            .generate_mac(b"payload", &key, MacAlgorithm::RetailMac)
            .unwrap();
        assert!(crypto.verify_mac(b"payload", &mac, &key, MacAlgorithm::RetailMac).is_ok());
        assert!(crypto.verify_mac(b"payload", &mac, &other, MacAlgorithm::RetailMac).is_err());
        assert!(crypto.verify_mac(b"payload", &mac[..4], &key, MacAlgorithm::RetailMac).is_err());
    }

    #[test]
    fn test_pin_block_round_trip_under_transaction_key() {
        let crypto = CryptoService::new();
        let key = tdes("0123456789ABCDEFFEDCBA9876543210");
        let encrypted = crypto
            .encrypt_pin_block(PinBlockFormat::Iso0, "4321", "4111111111111111", &key)
            .unwrap();
        assert_eq!(encrypted.len(), 16);
        assert_eq!(
            crypto
                .decrypt_pin_block(&encrypted, "4111111111111111", &key)
                .unwrap(),
            "4321"
        );
    }

    #[test]
    fn test_retail_mac_needs_triple_des_key() {
        let crypto = CryptoService::new();
        let mut key = tdes("0123456789ABCDEFFEDCBA9876543210");
        key.algorithm = KeyAlgorithm::Aes;
        assert!(matches!(
            crypto.generate_mac(b"x", &key, MacAlgorithm::RetailMac),
            Err(CryptoError::UnsupportedAlgorithm("AES"))
        ));
    }
}
