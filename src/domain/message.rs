use crate::error::CodecError;
use std::collections::BTreeMap;
use std::fmt;

pub const FIELD_PAN: u8 = 2;
pub const FIELD_PROCESSING_CODE: u8 = 3;
pub const FIELD_AMOUNT: u8 = 4;
pub const FIELD_TRANSMISSION_TIME: u8 = 7;
pub const FIELD_STAN: u8 = 11;
pub const FIELD_MCC: u8 = 18;
pub const FIELD_ENTRY_MODE: u8 = 22;
pub const FIELD_RRN: u8 = 37;
pub const FIELD_AUTH_CODE: u8 = 38;
pub const FIELD_RESPONSE_CODE: u8 = 39;
pub const FIELD_TERMINAL_ID: u8 = 41;
pub const FIELD_MERCHANT_ID: u8 = 42;
pub const FIELD_MERCHANT_LOCATION: u8 = 43;
pub const FIELD_ADDITIONAL_DATA: u8 = 48;
pub const FIELD_CURRENCY: u8 = 49;
pub const FIELD_PIN_BLOCK: u8 = 52;
pub const FIELD_KSN: u8 = 53;
pub const FIELD_SIGNATURE: u8 = 63;
pub const FIELD_MAC: u8 = 64;

/// Message type indicator, one variant per supported message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mti {
    AuthorizationRequest,
    AuthorizationResponse,
    FinancialRequest,
    FinancialResponse,
    ReversalRequest,
    ReversalResponse,
    ReversalAdvice,
    ReversalAdviceResponse,
    NetworkRequest,
    NetworkResponse,
}

/// Families of messages sharing a required field set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageClass {
    Authorization,
    Financial,
    Reversal,
    NetworkManagement,
    Response,
    NetworkResponse,
}

impl MessageClass {
    const AUTHORIZATION: &'static [u8] = &[
        FIELD_PAN,
        FIELD_PROCESSING_CODE,
        FIELD_AMOUNT,
        FIELD_TRANSMISSION_TIME,
        FIELD_STAN,
        FIELD_TERMINAL_ID,
    ];
    const REVERSAL: &'static [u8] = &[FIELD_PAN, FIELD_AMOUNT, FIELD_STAN, FIELD_TERMINAL_ID];
    const NETWORK: &'static [u8] = &[FIELD_TRANSMISSION_TIME, FIELD_STAN];
    const RESPONSE: &'static [u8] = &[FIELD_STAN, FIELD_RESPONSE_CODE, FIELD_TERMINAL_ID];
    const NETWORK_RESPONSE: &'static [u8] = &[FIELD_STAN, FIELD_RESPONSE_CODE];

    pub fn required_fields(self) -> &'static [u8] {
        match self {
            MessageClass::Authorization | MessageClass::Financial => Self::AUTHORIZATION,
            MessageClass::Reversal => Self::REVERSAL,
            MessageClass::NetworkManagement => Self::NETWORK,
            MessageClass::Response => Self::RESPONSE,
            MessageClass::NetworkResponse => Self::NETWORK_RESPONSE,
        }
    }
}

impl Mti {
    pub fn code(self) -> &'static str {
        match self {
            Mti::AuthorizationRequest => "0100",
            Mti::AuthorizationResponse => "0110",
            Mti::FinancialRequest => "0200",
            Mti::FinancialResponse => "0210",
            Mti::ReversalRequest => "0400",
            Mti::ReversalResponse => "0410",
            Mti::ReversalAdvice => "0420",
            Mti::ReversalAdviceResponse => "0430",
            Mti::NetworkRequest => "0800",
            Mti::NetworkResponse => "0810",
        }
    }

    pub fn parse(code: &str) -> Result<Self, CodecError> {
        match code {
            "0100" => Ok(Mti::AuthorizationRequest),
            "0110" => Ok(Mti::AuthorizationResponse),
            "0200" => Ok(Mti::FinancialRequest),
            "0210" => Ok(Mti::FinancialResponse),
            "0400" => Ok(Mti::ReversalRequest),
            "0410" => Ok(Mti::ReversalResponse),
            "0420" => Ok(Mti::ReversalAdvice),
            "0430" => Ok(Mti::ReversalAdviceResponse),
            "0800" => Ok(Mti::NetworkRequest),
            "0810" => Ok(Mti::NetworkResponse),
            other => Err(CodecError::UnknownMti(other.to_string())),
        }
    }

    pub fn class(self) -> MessageClass {
        match self {
            Mti::AuthorizationRequest => MessageClass::Authorization,
            Mti::FinancialRequest => MessageClass::Financial,
            Mti::ReversalRequest | Mti::ReversalAdvice => MessageClass::Reversal,
            Mti::NetworkRequest => MessageClass::NetworkManagement,
            Mti::NetworkResponse => MessageClass::NetworkResponse,
            Mti::AuthorizationResponse
            | Mti::FinancialResponse
            | Mti::ReversalResponse
            | Mti::ReversalAdviceResponse => MessageClass::Response,
        }
    }

    pub fn is_request(self) -> bool {
        self.response().is_some()
    }

    /// The MTI answering this request, `None` for responses.
    pub fn response(self) -> Option<Mti> {
        match self {
            Mti::AuthorizationRequest => Some(Mti::AuthorizationResponse),
            Mti::FinancialRequest => Some(Mti::FinancialResponse),
            Mti::ReversalRequest => Some(Mti::ReversalResponse),
            Mti::ReversalAdvice => Some(Mti::ReversalAdviceResponse),
            Mti::NetworkRequest => Some(Mti::NetworkResponse),
            _ => None,
        }
    }
}

impl fmt::Display for Mti {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// A decoded financial message.
///
/// Fields are kept in a `BTreeMap`, so iteration is always in ascending field
/// order and the presence bitmap is derived from the keys rather than stored
/// separately. Only the primary bitmap (fields 2 to 64) is supported; field 1
/// is reserved for the secondary bitmap indicator and cannot be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    mti: Mti,
    fields: BTreeMap<u8, String>,
}

impl Message {
    pub fn new(mti: Mti) -> Self {
        Self {
            mti,
            fields: BTreeMap::new(),
        }
    }

    pub fn mti(&self) -> Mti {
        self.mti
    }

    /// Sets a field, replacing any previous value.
    pub fn set(&mut self, field: u8, value: impl Into<String>) -> Result<&mut Self, CodecError> {
        if !(2..=64).contains(&field) {
            return Err(CodecError::FieldNotAllowed(field));
        }
        self.fields.insert(field, value.into());
        Ok(self)
    }

    /// Builder-style variant of [`Message::set`].
    pub fn with(mut self, field: u8, value: impl Into<String>) -> Result<Self, CodecError> {
        self.set(field, value)?;
        Ok(self)
    }

    pub fn field(&self, field: u8) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }

    pub fn require(&self, field: u8) -> Result<&str, CodecError> {
        self.field(field).ok_or(CodecError::MissingField {
            mti: self.mti.code(),
            field,
        })
    }

    pub fn remove(&mut self, field: u8) -> Option<String> {
        self.fields.remove(&field)
    }

    pub fn has(&self, field: u8) -> bool {
        self.fields.contains_key(&field)
    }

    pub fn fields(&self) -> impl Iterator<Item = (u8, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }

    /// Primary bitmap: bit `64 - n` is set iff field `n` is present.
    pub fn bitmap(&self) -> u64 {
        self.fields
            .keys()
            .fold(0u64, |acc, field| acc | (1u64 << (64 - u32::from(*field))))
    }

    /// Checks the required field set of this message's class.
    pub fn validate(&self) -> Result<(), CodecError> {
        for field in self.mti.class().required_fields() {
            self.require(*field)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mti_round_trip_and_response() {
        for code in ["0100", "0200", "0400", "0420", "0800"] {
            let mti = Mti::parse(code).unwrap();
            assert_eq!(mti.code(), code);
            assert!(mti.is_request());
            let response = mti.response().unwrap();
            let expected = format!("{:04}", code.parse::<u16>().unwrap() + 10);
            assert_eq!(response.code(), expected);
            assert!(!response.is_request());
        }
    }

    #[test]
    fn test_unknown_mti() {
        assert_eq!(
            Mti::parse("0999"),
            Err(CodecError::UnknownMti("0999".to_string()))
        );
    }

    #[test]
    fn test_bitmap_tracks_fields() {
        let message = Message::new(Mti::NetworkRequest)
            .with(FIELD_STAN, "000001")
            .unwrap()
            .with(FIELD_MAC, "0000000000000000")
            .unwrap()
            .with(FIELD_PAN, "4111111111111111")
            .unwrap();

        assert_eq!(message.bitmap(), (1 << 62) | (1 << 53) | 1);
        let order: Vec<u8> = message.fields().map(|(n, _)| n).collect();
        assert_eq!(order, vec![2, 11, 64]);
    }

    #[test]
    fn test_field_one_is_reserved() {
        let mut message = Message::new(Mti::NetworkRequest);
        assert_eq!(
            message.set(1, "x").unwrap_err(),
            CodecError::FieldNotAllowed(1)
        );
        assert_eq!(
            message.set(65, "x").unwrap_err(),
            CodecError::FieldNotAllowed(65)
        );
    }

    #[test]
    fn test_validate_reports_first_missing_field() {
        let message = Message::new(Mti::AuthorizationRequest)
            .with(FIELD_PAN, "4111111111111111")
            .unwrap();
        assert_eq!(
            message.validate(),
            Err(CodecError::MissingField {
                mti: "0100",
                field: FIELD_PROCESSING_CODE
            })
        );
    }
}
