use crate::error::IntegrityError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// Asymmetric identity of the switch, used to sign key transport envelopes.
pub struct SigningKeyPair {
    signing_key: SigningKey,
}

impl SigningKeyPair {
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }

    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing_key.sign(message).to_bytes().to_vec()
    }
}

pub fn verify(public_key: &VerifyingKey, message: &[u8], signature: &[u8]) -> Result<(), IntegrityError> {
    let bytes: [u8; 64] = signature.try_into().map_err(|_| IntegrityError::Malformed)?;
    public_key
        .verify(message, &Signature::from_bytes(&bytes))
        .map_err(|_| IntegrityError::Mismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify() {
        let pair = SigningKeyPair::generate();
        let signature = pair.sign(b"envelope");
        assert!(verify(&pair.verifying_key(), b"envelope", &signature).is_ok());
        assert_eq!(
            verify(&pair.verifying_key(), b"envelopE", &signature),
            Err(IntegrityError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_key_and_malformed_signature() {
        let pair = SigningKeyPair::from_seed([1u8; 32]);
        let other = SigningKeyPair::from_seed([2u8; 32]);
        let signature = pair.sign(b"payload");
        assert_eq!(
            verify(&other.verifying_key(), b"payload", &signature),
            Err(IntegrityError::Mismatch)
        );
        assert_eq!(
            verify(&pair.verifying_key(), b"payload", &signature[..10]),
            Err(IntegrityError::Malformed)
        );
    }
}
