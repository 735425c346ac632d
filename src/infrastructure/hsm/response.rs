use super::CryptoService;
use super::SymmetricKey;
use super::mac::hmac_sha256_parts;
use crate::domain::message::{
    FIELD_AMOUNT, FIELD_AUTH_CODE, FIELD_PROCESSING_CODE, FIELD_RESPONSE_CODE, FIELD_SIGNATURE,
    FIELD_STAN, FIELD_TERMINAL_ID, Message,
};
use crate::error::{IntegrityError, Result};
use chrono::{DateTime, Duration, SubsecRound, TimeZone, Utc};
use subtle::ConstantTimeEq;

/// Response fields covered by the signature, in signing order.
pub const SIGNED_FIELDS: [u8; 6] = [
    FIELD_PROCESSING_CODE,
    FIELD_AMOUNT,
    FIELD_STAN,
    FIELD_AUTH_CODE,
    FIELD_RESPONSE_CODE,
    FIELD_TERMINAL_ID,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseSignature {
    pub signature: String,
    pub timestamp: DateTime<Utc>,
}

impl ResponseSignature {
    /// Wire form carried in field 63: `<millis>:<hex hmac>`.
    pub fn to_field(&self) -> String {
        format!("{}:{}", self.timestamp.timestamp_millis(), self.signature)
    }

    pub fn parse_field(raw: &str) -> Result<Self, IntegrityError> {
        let (millis, signature) = raw.split_once(':').ok_or(IntegrityError::Malformed)?;
        let millis: i64 = millis.parse().map_err(|_| IntegrityError::Malformed)?;
        let timestamp = Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or(IntegrityError::Malformed)?;
        if signature.len() != 64 || !signature.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(IntegrityError::Malformed);
        }
        Ok(Self {
            signature: signature.to_ascii_uppercase(),
            timestamp,
        })
    }
}

fn signing_parts(message: &Message, timestamp: DateTime<Utc>) -> Vec<Vec<u8>> {
    let mut parts = Vec::with_capacity(SIGNED_FIELDS.len() + 2);
    parts.push(message.mti().code().as_bytes().to_vec());
    for field in SIGNED_FIELDS {
        let part = match message.field(field) {
            Some(value) => format!("{field:02}={value}"),
            None => format!("{field:02}-"),
        };
        parts.push(part.into_bytes());
    }
    parts.push(timestamp.timestamp_millis().to_string().into_bytes());
    parts
}

fn compute(message: &Message, key: &impl SymmetricKey, timestamp: DateTime<Utc>) -> Result<Vec<u8>> {
    let parts = signing_parts(message, timestamp);
    let borrowed: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
    Ok(hmac_sha256_parts(key.material(), &borrowed)?)
}

impl CryptoService {
    /// Signs the critical response fields with a millisecond timestamp and
    /// stores the result in field 63.
    pub fn sign_response(
        &self,
        message: &mut Message,
        key: &impl SymmetricKey,
        now: DateTime<Utc>,
    ) -> Result<ResponseSignature> {
        // only millisecond precision survives the wire
        let timestamp = now.trunc_subsecs(3);
        let signature = ResponseSignature {
            signature: hex::encode_upper(compute(message, key, timestamp)?),
            timestamp,
        };
        message.set(FIELD_SIGNATURE, signature.to_field())?;
        Ok(signature)
    }

    /// Receiver-side check of a signed response.
    ///
    /// Content is checked before freshness, so a tampered response always
    /// reports a mismatch even when it is also stale.
    pub fn verify_response(
        &self,
        message: &Message,
        key: &impl SymmetricKey,
        now: DateTime<Utc>,
        validity: Duration,
    ) -> Result<()> {
        let raw = message
            .field(FIELD_SIGNATURE)
            .ok_or(IntegrityError::Malformed)?;
        let signature = ResponseSignature::parse_field(raw)?;
        let provided = hex::decode(&signature.signature).map_err(|_| IntegrityError::Malformed)?;
        let expected = compute(message, key, signature.timestamp)?;

        if !bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            return Err(IntegrityError::Mismatch.into());
        }
        let age = now - signature.timestamp;
        if age > validity || age < -validity {
            return Err(IntegrityError::Expired.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::Mti;
    use crate::error::SwitchError;

    struct RawKey(Vec<u8>);

    impl SymmetricKey for RawKey {
        fn algorithm(&self) -> crate::domain::key::KeyAlgorithm {
            crate::domain::key::KeyAlgorithm::HmacSha256
        }

        fn material(&self) -> &[u8] {
            &self.0
        }
    }

    fn response() -> Message {
        Message::new(Mti::AuthorizationResponse)
            .with(FIELD_AMOUNT, "000000010000")
            .unwrap()
            .with(FIELD_STAN, "000001")
            .unwrap()
            .with(FIELD_AUTH_CODE, "A1B2C3")
            .unwrap()
            .with(FIELD_RESPONSE_CODE, "00")
            .unwrap()
            .with(FIELD_TERMINAL_ID, "T1      ")
            .unwrap()
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 12, 14, 30, 0).unwrap()
    }

    #[test]
    fn test_signed_response_verifies_inside_window() {
        let crypto = CryptoService::new();
        let key = RawKey(vec![9u8; 32]);
        let mut message = response();
        let signature = crypto.sign_response(&mut message, &key, now()).unwrap();

        assert_eq!(message.field(FIELD_SIGNATURE), Some(signature.to_field().as_str()));
        let later = now() + Duration::seconds(59);
        assert!(crypto.verify_response(&message, &key, later, Duration::seconds(60)).is_ok());
    }

    #[test]
    fn test_stale_response_is_expired() {
        let crypto = CryptoService::new();
        let key = RawKey(vec![9u8; 32]);
        let mut message = response();
        crypto.sign_response(&mut message, &key, now()).unwrap();

        let later = now() + Duration::seconds(61);
        assert!(matches!(
            crypto.verify_response(&message, &key, later, Duration::seconds(60)),
            Err(SwitchError::Integrity(IntegrityError::Expired))
        ));
    }

    #[test]
    fn test_tampering_reports_mismatch_even_when_stale() {
        let crypto = CryptoService::new();
        let key = RawKey(vec![9u8; 32]);
        let mut message = response();
        crypto.sign_response(&mut message, &key, now()).unwrap();
        message.set(FIELD_RESPONSE_CODE, "05").unwrap();

        for offset in [0, 3600] {
            let at = now() + Duration::seconds(offset);
            assert!(matches!(
                crypto.verify_response(&message, &key, at, Duration::seconds(60)),
                Err(SwitchError::Integrity(IntegrityError::Mismatch))
            ));
        }
    }

    #[test]
    fn test_unsigned_or_garbled_signature_is_malformed() {
        let crypto = CryptoService::new();
        let key = RawKey(vec![9u8; 32]);
        let mut message = response();
        assert!(matches!(
            crypto.verify_response(&message, &key, now(), Duration::seconds(60)),
            Err(SwitchError::Integrity(IntegrityError::Malformed))
        ));

        message.set(FIELD_SIGNATURE, "not-a-signature").unwrap();
        assert!(matches!(
            crypto.verify_response(&message, &key, now(), Duration::seconds(60)),
            Err(SwitchError::Integrity(IntegrityError::Malformed))
        ));
    }
}
