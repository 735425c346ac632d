use super::authorization::ResponseCode;
use super::message::{
    FIELD_ADDITIONAL_DATA, FIELD_AMOUNT, FIELD_CURRENCY, FIELD_ENTRY_MODE, FIELD_KSN, FIELD_MCC,
    FIELD_MERCHANT_ID, FIELD_MERCHANT_LOCATION, FIELD_PAN, FIELD_PIN_BLOCK, FIELD_PROCESSING_CODE,
    FIELD_RRN, FIELD_STAN, FIELD_TERMINAL_ID, FIELD_TRANSMISSION_TIME, Message, Mti,
};
use crate::error::SwitchError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Represents a positive transaction amount in major currency units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, SwitchError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(SwitchError::ValidationError(
                "Amount must be positive".to_string(),
            ))
        }
    }

    /// Parses the twelve digit minor-unit representation of field 4.
    pub fn from_minor_units(raw: &str) -> Result<Self, SwitchError> {
        if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SwitchError::ValidationError(format!(
                "Amount {raw:?} is not numeric"
            )));
        }
        let minor: i64 = raw
            .parse()
            .map_err(|_| SwitchError::ValidationError(format!("Amount {raw:?} out of range")))?;
        Self::new(Decimal::new(minor, 2))
    }

    pub fn to_minor_units(&self) -> String {
        let minor = (self.0 * Decimal::ONE_HUNDRED).trunc();
        format!("{:0>12}", minor.to_string())
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = SwitchError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CardStatus {
    #[default]
    Active,
    Inactive,
    PendingActivation,
    Blocked,
    Expired,
    Stolen,
    Lost,
}

/// Card expiry as embossed, `MMYY`. The card is valid through the last day
/// of that month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CardExpiry {
    month: u32,
    year: i32,
}

impl CardExpiry {
    pub fn parse(mmyy: &str) -> Result<Self, SwitchError> {
        let invalid = || SwitchError::ValidationError(format!("Expiry {mmyy:?} is not MMYY"));
        if mmyy.len() != 4 || !mmyy.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let month: u32 = mmyy[..2].parse().map_err(|_| invalid())?;
        let year: i32 = mmyy[2..].parse().map_err(|_| invalid())?;
        if !(1..=12).contains(&month) {
            return Err(invalid());
        }
        Ok(Self {
            month,
            year: 2000 + year,
        })
    }

    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        (at.year(), at.month()) > (self.year, self.month)
    }
}

impl TryFrom<String> for CardExpiry {
    type Error = SwitchError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<CardExpiry> for String {
    fn from(expiry: CardExpiry) -> Self {
        format!("{:02}{:02}", expiry.month, expiry.year % 100)
    }
}

/// Issuer-side view of a card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CardProfile {
    pub pan: String,
    pub single_txn_limit: Decimal,
    pub available_balance: Decimal,
    pub home_country: String,
    #[serde(default)]
    pub three_ds_enrolled: bool,
    /// Hex SHA-256 of PAN followed by PIN. `None` for cards without a PIN.
    #[serde(default)]
    pub pin_hash: Option<String>,
    #[serde(default)]
    pub status: CardStatus,
    #[serde(default)]
    pub expiry: Option<CardExpiry>,
}

impl CardProfile {
    pub fn pin_hash_for(pan: &str, pin: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(pan.as_bytes());
        hasher.update(pin.as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Status and expiry checks, as the decline code to answer with.
    pub fn usability(&self, at: DateTime<Utc>) -> Option<ResponseCode> {
        match self.status {
            CardStatus::Active => {}
            CardStatus::Expired => return Some(ResponseCode::ExpiredCard),
            CardStatus::Stolen => return Some(ResponseCode::StolenCard),
            CardStatus::Lost => return Some(ResponseCode::LostCard),
            CardStatus::Inactive | CardStatus::PendingActivation | CardStatus::Blocked => {
                return Some(ResponseCode::RestrictedCard);
            }
        }
        self.expiry
            .filter(|expiry| expiry.is_expired(at))
            .map(|_| ResponseCode::ExpiredCard)
    }

    pub fn verify_pin(&self, pin: &str) -> bool {
        match &self.pin_hash {
            Some(expected) => {
                let actual = Self::pin_hash_for(&self.pan, pin);
                actual
                    .as_bytes()
                    .ct_eq(expected.to_ascii_lowercase().as_bytes())
                    .into()
            }
            None => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalProfile {
    pub terminal_id: String,
    pub merchant_id: String,
    pub mcc: String,
    pub country: String,
    pub max_amount: Decimal,
    #[serde(default = "default_online")]
    pub online: bool,
}

fn default_online() -> bool {
    true
}

/// A past authorization kept for velocity and behavior analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalTransaction {
    pub pan: String,
    pub amount: Decimal,
    pub timestamp: DateTime<Utc>,
    pub country: Option<String>,
    pub merchant_id: String,
    pub mcc: String,
    pub response_code: String,
}

/// Typed view of an authorization or financial request.
#[derive(Debug, Clone, PartialEq)]
pub struct TransactionDetails {
    pub mti: Mti,
    pub pan: String,
    pub processing_code: String,
    pub amount: Amount,
    pub currency: String,
    pub transmitted_at: DateTime<Utc>,
    pub stan: String,
    pub rrn: Option<String>,
    pub terminal_id: String,
    pub merchant_id: String,
    pub mcc: String,
    pub country: Option<String>,
    pub ecommerce: bool,
    pub three_ds: bool,
    pub pin_block: Option<String>,
    pub ksn: Option<String>,
}

impl TransactionDetails {
    /// Extracts the transaction from a decoded request.
    ///
    /// Field 7 carries no year; the year is taken from `now`, stepping back
    /// one year when that would put the transaction more than a day in the
    /// future. Missing merchant data falls back to the terminal profile.
    pub fn from_message(
        message: &Message,
        terminal: &TerminalProfile,
        now: DateTime<Utc>,
        default_currency: &str,
    ) -> Result<Self, SwitchError> {
        let pan = message.require(FIELD_PAN)?.to_string();
        if !pan.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SwitchError::ValidationError("PAN is not numeric".into()));
        }

        let mcc = message
            .field(FIELD_MCC)
            .map(str::to_string)
            .unwrap_or_else(|| terminal.mcc.clone());
        let merchant_id = message
            .field(FIELD_MERCHANT_ID)
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| terminal.merchant_id.clone());
        let country = message
            .field(FIELD_MERCHANT_LOCATION)
            .and_then(location_country)
            .or_else(|| Some(terminal.country.clone()));
        let additional = message.field(FIELD_ADDITIONAL_DATA).unwrap_or_default();

        Ok(Self {
            mti: message.mti(),
            pan,
            processing_code: message.require(FIELD_PROCESSING_CODE)?.to_string(),
            amount: Amount::from_minor_units(message.require(FIELD_AMOUNT)?)?,
            currency: message
                .field(FIELD_CURRENCY)
                .unwrap_or(default_currency)
                .to_string(),
            transmitted_at: parse_transmission_time(message.require(FIELD_TRANSMISSION_TIME)?, now)?,
            stan: message.require(FIELD_STAN)?.to_string(),
            rrn: message.field(FIELD_RRN).map(str::to_string),
            terminal_id: message.require(FIELD_TERMINAL_ID)?.trim().to_string(),
            merchant_id,
            mcc,
            country,
            ecommerce: message
                .field(FIELD_ENTRY_MODE)
                .is_some_and(|mode| mode.starts_with("81")),
            three_ds: additional.split(';').any(|tag| tag.trim() == "3DS=Y"),
            pin_block: message.field(FIELD_PIN_BLOCK).map(str::to_string),
            ksn: message.field(FIELD_KSN).map(str::to_string),
        })
    }
}

/// Country code from the last two characters of field 43.
fn location_country(raw: &str) -> Option<String> {
    let trimmed = raw.trim_end();
    if trimmed.len() < 2 {
        return None;
    }
    let code = &trimmed[trimmed.len() - 2..];
    code.bytes()
        .all(|b| b.is_ascii_alphabetic())
        .then(|| code.to_ascii_uppercase())
}

/// Parses `MMDDhhmmss` against the current year.
pub fn parse_transmission_time(raw: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>, SwitchError> {
    let invalid = || SwitchError::ValidationError(format!("Invalid transmission time {raw:?}"));
    if raw.len() != 10 || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }
    let part = |range: std::ops::Range<usize>| raw[range].parse::<u32>().map_err(|_| invalid());
    let (month, day) = (part(0..2)?, part(2..4)?);
    let time = NaiveTime::from_hms_opt(part(4..6)?, part(6..8)?, part(8..10)?).ok_or_else(invalid)?;

    let at_year = |year: i32| {
        NaiveDate::from_ymd_opt(year, month, day)
            .map(|date| NaiveDateTime::new(date, time).and_utc())
    };
    match at_year(now.year()) {
        Some(candidate) if candidate <= now + Duration::days(1) => Ok(candidate),
        _ => at_year(now.year() - 1).ok_or_else(invalid),
    }
}

/// Luhn mod-10 check over a numeric PAN.
pub fn luhn_valid(pan: &str) -> bool {
    if pan.len() < 12 || !pan.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    let sum: u32 = pan
        .bytes()
        .rev()
        .enumerate()
        .map(|(i, b)| {
            let digit = u32::from(b - b'0');
            if i % 2 == 1 {
                let doubled = digit * 2;
                if doubled > 9 { doubled - 9 } else { doubled }
            } else {
                digit
            }
        })
        .sum();
    sum % 10 == 0
}

/// Everything the scoring engines may look at.
#[derive(Debug, Clone)]
pub struct AuthorizationContext {
    pub transaction: TransactionDetails,
    pub card: CardProfile,
    pub terminal: TerminalProfile,
    /// Most recent first.
    pub history: Vec<HistoricalTransaction>,
}

impl AuthorizationContext {
    /// History entries in the hour before the transaction.
    pub fn transactions_in_last_hour(&self) -> usize {
        let at = self.transaction.transmitted_at;
        let cutoff = at - Duration::hours(1);
        self.history
            .iter()
            .filter(|tx| tx.timestamp > cutoff && tx.timestamp <= at)
            .count()
    }
}
