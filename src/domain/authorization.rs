use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Challenge,
    Decline,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Decision::Approve => "APPROVE",
            Decision::Challenge => "CHALLENGE",
            Decision::Decline => "DECLINE",
        };
        f.write_str(name)
    }
}

/// Field 39 values produced by the switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseCode {
    Approved,
    StepUpRequired,
    DoNotHonor,
    InvalidTransaction,
    InvalidCard,
    FormatError,
    LostCard,
    StolenCard,
    InsufficientFunds,
    ExpiredCard,
    IncorrectPin,
    SuspectedFraud,
    ExceedsLimit,
    RestrictedCard,
    SystemMalfunction,
}

impl ResponseCode {
    pub fn code(self) -> &'static str {
        match self {
            ResponseCode::Approved => "00",
            ResponseCode::StepUpRequired => "1A",
            ResponseCode::DoNotHonor => "05",
            ResponseCode::InvalidTransaction => "12",
            ResponseCode::InvalidCard => "14",
            ResponseCode::FormatError => "30",
            ResponseCode::LostCard => "41",
            ResponseCode::StolenCard => "43",
            ResponseCode::InsufficientFunds => "51",
            ResponseCode::ExpiredCard => "54",
            ResponseCode::IncorrectPin => "55",
            ResponseCode::SuspectedFraud => "59",
            ResponseCode::ExceedsLimit => "61",
            ResponseCode::RestrictedCard => "62",
            ResponseCode::SystemMalfunction => "96",
        }
    }

    pub fn decision(self) -> Decision {
        match self {
            ResponseCode::Approved => Decision::Approve,
            ResponseCode::StepUpRequired => Decision::Challenge,
            _ => Decision::Decline,
        }
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl Serialize for ResponseCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Pipeline states of a single authorization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuthorizationStage {
    Received,
    Decoded,
    IntegrityChecked,
    ReplayChecked,
    Scored,
    Decided,
    Signed,
    Encoded,
    Declined,
}

impl AuthorizationStage {
    /// The stage reached once this one completes. `Declined` and `Encoded`
    /// are terminal.
    pub fn next(self) -> Option<Self> {
        use AuthorizationStage::*;
        match self {
            Received => Some(Decoded),
            Decoded => Some(IntegrityChecked),
            IntegrityChecked => Some(ReplayChecked),
            ReplayChecked => Some(Scored),
            Scored => Some(Decided),
            Decided => Some(Signed),
            Signed => Some(Encoded),
            Encoded | Declined => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationResult {
    pub response_code: ResponseCode,
    pub auth_code: Option<String>,
    pub fraud_score: f64,
    pub risk_score: u8,
    pub decision: Decision,
    pub signature: Option<String>,
    pub signature_timestamp: Option<DateTime<Utc>>,
}

impl AuthorizationResult {
    pub fn new(response_code: ResponseCode) -> Self {
        Self {
            response_code,
            auth_code: None,
            fraud_score: 0.0,
            risk_score: 0,
            decision: response_code.decision(),
            signature: None,
            signature_timestamp: None,
        }
    }

    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }
}

const AUTH_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Six uppercase alphanumerics for field 38.
pub fn generate_auth_code() -> String {
    let mut rng = rand::thread_rng();
    (0..6)
        .map(|_| AUTH_CODE_ALPHABET[rng.gen_range(0..AUTH_CODE_ALPHABET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_codes_map_to_decisions() {
        assert_eq!(ResponseCode::Approved.decision(), Decision::Approve);
        assert_eq!(ResponseCode::StepUpRequired.decision(), Decision::Challenge);
        for code in [
            ResponseCode::DoNotHonor,
            ResponseCode::SuspectedFraud,
            ResponseCode::ExceedsLimit,
            ResponseCode::InsufficientFunds,
            ResponseCode::RestrictedCard,
            ResponseCode::SystemMalfunction,
        ] {
            assert_eq!(code.decision(), Decision::Decline);
        }
        assert_eq!(ResponseCode::StepUpRequired.to_string(), "1A");
        assert_eq!(ResponseCode::InsufficientFunds.to_string(), "51");
        assert_eq!(ResponseCode::StolenCard.to_string(), "43");
    }

    #[test]
    fn test_auth_code_shape() {
        for _ in 0..50 {
            let code = generate_auth_code();
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
        }
    }

    #[test]
    fn test_stage_order() {
        let mut stage = AuthorizationStage::Received;
        let mut seen = vec![stage];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage);
        }
        assert_eq!(seen.len(), 8);
        assert_eq!(stage, AuthorizationStage::Encoded);
        assert_eq!(AuthorizationStage::Declined.next(), None);
    }

    #[test]
    fn test_result_serializes_codes() {
        let result = AuthorizationResult::new(ResponseCode::ExceedsLimit);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["response_code"], "61");
        assert_eq!(json["decision"], "DECLINE");
    }
}
