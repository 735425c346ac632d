use crate::config::SwitchConfig;
use crate::domain::authorization::{
    AuthorizationResult, AuthorizationStage, ResponseCode, generate_auth_code,
};
use crate::domain::fraud::FraudEngine;
use crate::domain::key::{Key, Ksn, slots};
use crate::domain::message::{
    FIELD_AMOUNT, FIELD_AUTH_CODE, FIELD_CURRENCY, FIELD_MERCHANT_ID, FIELD_PIN_BLOCK,
    FIELD_PROCESSING_CODE, FIELD_RESPONSE_CODE, FIELD_RRN, FIELD_SIGNATURE, FIELD_STAN,
    FIELD_TERMINAL_ID, FIELD_TRANSMISSION_TIME, Message, MessageClass, Mti,
};
use crate::domain::ports::{CardStoreBox, ClockHandle, TerminalStoreBox, TransactionStoreBox};
use crate::domain::risk::RiskEngine;
use crate::domain::transaction::{
    AuthorizationContext, CardProfile, HistoricalTransaction, TransactionDetails, luhn_valid,
};
use crate::error::{ReplayError, Result, SwitchError};
use crate::infrastructure::hsm::CryptoService;
use crate::infrastructure::key_store::KeyStore;
use crate::infrastructure::replay_guard::ReplayGuard;
use crate::interfaces::iso8583;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

const PLACEHOLDER_STAN: &str = "000000";
const PLACEHOLDER_TERMINAL: &str = "00000000";

/// Request fields copied into every response.
const ECHOED_FIELDS: [u8; 8] = [
    FIELD_PROCESSING_CODE,
    FIELD_AMOUNT,
    FIELD_TRANSMISSION_TIME,
    FIELD_STAN,
    FIELD_RRN,
    FIELD_TERMINAL_ID,
    FIELD_MERCHANT_ID,
    FIELD_CURRENCY,
];

/// Everything produced for one inbound message.
#[derive(Debug, Clone)]
pub struct AuthorizationOutcome {
    pub result: AuthorizationResult,
    /// Encoded response, signed and, when the terminal key is known, MACed.
    pub response: Vec<u8>,
    pub terminal_id: String,
    pub stan: String,
    /// `Encoded` when the pipeline ran to completion, `Declined` when it
    /// short-circuited.
    pub stage: AuthorizationStage,
}

/// A short-circuit out of the pipeline.
struct Rejection {
    code: ResponseCode,
    stage: AuthorizationStage,
}

impl Rejection {
    fn new(code: ResponseCode, stage: AuthorizationStage) -> Self {
        Self { code, stage }
    }

    /// Maps an internal failure to the code returned to the terminal.
    /// Integrity and replay failures all collapse to a generic decline.
    fn from_error(error: &SwitchError, stage: AuthorizationStage) -> Self {
        let code = match error {
            SwitchError::Codec(_)
            | SwitchError::ValidationError(_)
            | SwitchError::CsvError(_)
            | SwitchError::JsonError(_) => ResponseCode::FormatError,
            SwitchError::Integrity(_) | SwitchError::Replay(_) | SwitchError::Crypto(_) => {
                ResponseCode::DoNotHonor
            }
            SwitchError::KeyState(_) | SwitchError::IoError(_) | SwitchError::Distribution(_) => {
                ResponseCode::SystemMalfunction
            }
        };
        Self { code, stage }
    }
}

fn rejecting(stage: AuthorizationStage) -> impl Fn(SwitchError) -> Rejection + Copy {
    move |e| Rejection::from_error(&e, stage)
}

/// Per-request state carried between pipeline stages.
#[derive(Default)]
struct Progress {
    terminal_mac_key: Option<Arc<Key>>,
    risk_score: u8,
    fraud_score: f64,
    auth_code: Option<String>,
}

/// The authorization orchestrator.
///
/// Drives a raw request through decode, integrity, replay, scoring and
/// decision, then signs and encodes the response. Any failure becomes a
/// well-formed decline; `authorize` itself never fails.
pub struct AuthorizationSwitch {
    cards: CardStoreBox,
    terminals: TerminalStoreBox,
    transactions: TransactionStoreBox,
    keys: Arc<KeyStore>,
    crypto: CryptoService,
    replay_guard: ReplayGuard,
    risk: RiskEngine,
    fraud: FraudEngine,
    clock: ClockHandle,
    config: SwitchConfig,
}

impl AuthorizationSwitch {
    pub fn new(
        config: SwitchConfig,
        keys: Arc<KeyStore>,
        cards: CardStoreBox,
        terminals: TerminalStoreBox,
        transactions: TransactionStoreBox,
        clock: ClockHandle,
    ) -> Self {
        let replay_guard = ReplayGuard::new(
            config.replay_window(),
            config.replay_capacity,
            clock.clone(),
        );
        Self {
            cards,
            terminals,
            transactions,
            keys,
            crypto: CryptoService::new(),
            replay_guard,
            risk: RiskEngine::new(),
            fraud: FraudEngine::new(config.fraud_threshold),
            clock,
            config,
        }
    }

    pub fn replay_guard(&self) -> &ReplayGuard {
        &self.replay_guard
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Processes one raw message and returns the decision and encoded
    /// response.
    pub async fn authorize(&self, raw: &[u8]) -> AuthorizationOutcome {
        debug!(stage = ?AuthorizationStage::Received, bytes = raw.len());
        let request = match iso8583::decode(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "undecodable message");
                return self.format_error(raw);
            }
        };
        debug!(stage = ?AuthorizationStage::Decoded, mti = %request.mti());

        let mut progress = Progress::default();
        let verdict = match request.mti().class() {
            MessageClass::Authorization | MessageClass::Financial => {
                self.evaluate(&request, &mut progress).await
            }
            MessageClass::NetworkManagement => Ok(ResponseCode::Approved),
            MessageClass::Reversal | MessageClass::Response | MessageClass::NetworkResponse => Err(
                Rejection::new(ResponseCode::InvalidTransaction, AuthorizationStage::Decoded),
            ),
        };

        let (code, stage) = match verdict {
            Ok(code) => (code, AuthorizationStage::Encoded),
            Err(rejection) => {
                debug!(failed_at = ?rejection.stage, code = %rejection.code, "declined");
                (rejection.code, AuthorizationStage::Declined)
            }
        };
        self.respond(&request, code, progress, stage)
    }

    async fn evaluate(
        &self,
        request: &Message,
        progress: &mut Progress,
    ) -> Result<ResponseCode, Rejection> {
        use AuthorizationStage::*;
        let terminal_id = request
            .require(FIELD_TERMINAL_ID)
            .map_err(SwitchError::from)
            .map_err(rejecting(Decoded))?;
        let terminal = self
            .terminals
            .get(terminal_id)
            .await
            .map_err(rejecting(Decoded))?
            .ok_or_else(|| {
                warn!(target: "audit", terminal_id = terminal_id.trim(), "unknown terminal");
                Rejection::new(ResponseCode::DoNotHonor, Decoded)
            })?;

        let mac_key = self
            .keys
            .current(&slots::terminal_mac(&terminal.terminal_id))
            .map_err(rejecting(Decoded))?;
        progress.terminal_mac_key = Some(mac_key.clone());
        if let Err(e) = self.crypto.verify_message_mac(request, &*mac_key) {
            warn!(target: "audit", terminal_id = %terminal.terminal_id, error = %e, "request MAC rejected");
            return Err(Rejection::from_error(&e, Decoded));
        }
        debug!(stage = ?IntegrityChecked);

        let now = self.clock.now();
        let details = TransactionDetails::from_message(request, &terminal, now, &self.config.currency)
            .map_err(rejecting(IntegrityChecked))?;

        let check = self
            .replay_guard
            .check(&details.terminal_id, &details.stan, details.transmitted_at);
        if check.is_duplicate {
            let replay = ReplayError::SequenceReplay {
                terminal_id: details.terminal_id.clone(),
                stan: details.stan.clone(),
                attempts: check.info.attempt_count,
            };
            debug!(error = %replay);
            return Err(Rejection::from_error(&replay.into(), IntegrityChecked));
        }
        debug!(stage = ?ReplayChecked);

        let card = self.verify_card(&details, request).await?;

        let history = self
            .transactions
            .recent(&details.pan, self.config.history_depth)
            .await
            .map_err(rejecting(ReplayChecked))?;
        let ctx = AuthorizationContext {
            transaction: details,
            card,
            terminal,
            history,
        };
        let risk = self.risk.score_risk(&ctx);
        let fraud = self.fraud.score_fraud(&ctx);
        progress.risk_score = risk.score;
        progress.fraud_score = fraud.score;
        debug!(
            stage = ?Scored,
            risk = risk.score,
            level = %risk.level,
            fraud = fraud.score,
            indicators = ?fraud.factors,
        );

        let code = decide(&ctx, risk.level.requires_challenge(), fraud.is_fraudulent);
        if code == ResponseCode::Approved {
            progress.auth_code = Some(generate_auth_code());
        }
        info!(
            terminal_id = %ctx.transaction.terminal_id,
            stan = %ctx.transaction.stan,
            amount = %ctx.transaction.amount.value(),
            code = %code,
            decision = %code.decision(),
            "authorization decided"
        );

        let tx = &ctx.transaction;
        let record = HistoricalTransaction {
            pan: tx.pan.clone(),
            amount: tx.amount.value(),
            timestamp: tx.transmitted_at,
            country: tx.country.clone(),
            merchant_id: tx.merchant_id.clone(),
            mcc: tx.mcc.clone(),
            response_code: code.code().to_string(),
        };
        if let Err(e) = self.transactions.record(record).await {
            error!(error = %e, "failed to record transaction history");
        }
        Ok(code)
    }

    /// Card lookup, Luhn check, status and expiry and, when a PIN block is
    /// present, PIN verification under the transaction key derived from the
    /// KSN.
    async fn verify_card(
        &self,
        details: &TransactionDetails,
        request: &Message,
    ) -> Result<CardProfile, Rejection> {
        use AuthorizationStage::ReplayChecked;
        let reject = rejecting(ReplayChecked);

        if !luhn_valid(&details.pan) {
            return Err(Rejection::new(ResponseCode::InvalidCard, ReplayChecked));
        }
        let card = self
            .cards
            .get(&details.pan)
            .await
            .map_err(reject)?
            .ok_or_else(|| Rejection::new(ResponseCode::InvalidCard, ReplayChecked))?;
        if let Some(code) = card.usability(details.transmitted_at) {
            warn!(target: "audit", terminal_id = %details.terminal_id, status = ?card.status, code = %code, "card not usable");
            return Err(Rejection::new(code, ReplayChecked));
        }

        let Some(pin_block) = request.field(FIELD_PIN_BLOCK) else {
            return Ok(card);
        };
        let ksn = details
            .ksn
            .as_deref()
            .ok_or_else(|| Rejection::new(ResponseCode::DoNotHonor, ReplayChecked))
            .and_then(|raw| {
                Ksn::parse(raw).map_err(|e| reject(e.into()))
            })?;
        if ksn.prefix() != Ksn::terminal_prefix(&details.terminal_id) {
            warn!(target: "audit", terminal_id = %details.terminal_id, ksn = %ksn, "KSN issued to another terminal");
            return Err(Rejection::new(ResponseCode::DoNotHonor, ReplayChecked));
        }

        let bdk = self.keys.current(slots::BASE_DERIVATION).map_err(reject)?;
        let transaction_key = self.keys.derive_session_key(bdk.id, &ksn).map_err(reject)?;
        let encrypted = hex::decode(pin_block)
            .map_err(|_| Rejection::new(ResponseCode::DoNotHonor, ReplayChecked))?;
        let pin = self
            .crypto
            .decrypt_pin_block(&encrypted, &details.pan, &transaction_key)
            .map_err(|e| reject(e.into()))?;

        if card.verify_pin(&pin) {
            Ok(card)
        } else {
            Err(Rejection::new(ResponseCode::IncorrectPin, ReplayChecked))
        }
    }

    fn respond(
        &self,
        request: &Message,
        code: ResponseCode,
        progress: Progress,
        stage: AuthorizationStage,
    ) -> AuthorizationOutcome {
        let mti = request.mti().response().unwrap_or(request.mti());
        let mut response = Message::new(mti);
        for field in ECHOED_FIELDS {
            if let Some(value) = request.field(field) {
                put(&mut response, field, value);
            }
        }

        let mut result = AuthorizationResult::new(code);
        result.risk_score = progress.risk_score;
        result.fraud_score = progress.fraud_score;
        result.auth_code = progress.auth_code;

        let terminal_id = request
            .field(FIELD_TERMINAL_ID)
            .map(|tid| tid.trim().to_string())
            .unwrap_or_default();
        let stan = request.field(FIELD_STAN).unwrap_or(PLACEHOLDER_STAN).to_string();

        let response = self.finish(response, &mut result, progress.terminal_mac_key.as_deref());
        let stage = if result.signature.is_some() {
            stage
        } else {
            AuthorizationStage::Declined
        };
        debug!(stage = ?stage, code = %result.response_code, bytes = response.len(), "response ready");
        AuthorizationOutcome {
            result,
            response,
            terminal_id,
            stan,
            stage,
        }
    }

    /// Decline for input that could not be decoded at all.
    fn format_error(&self, raw: &[u8]) -> AuthorizationOutcome {
        let mti = raw
            .get(..4)
            .and_then(|code| std::str::from_utf8(code).ok())
            .and_then(|code| Mti::parse(code).ok())
            .and_then(Mti::response)
            .unwrap_or(Mti::AuthorizationResponse);
        let mut response = Message::new(mti);
        put(&mut response, FIELD_STAN, PLACEHOLDER_STAN);
        put(&mut response, FIELD_TERMINAL_ID, PLACEHOLDER_TERMINAL);

        let mut result = AuthorizationResult::new(ResponseCode::FormatError);
        let response = self.finish(response, &mut result, None);
        AuthorizationOutcome {
            result,
            response,
            terminal_id: String::new(),
            stan: PLACEHOLDER_STAN.to_string(),
            stage: AuthorizationStage::Declined,
        }
    }

    /// Sets the outcome fields, signs, MACs and encodes.
    ///
    /// A response that cannot be signed goes out as a system malfunction
    /// decline, never as the decision it would have carried.
    fn finish(
        &self,
        mut response: Message,
        result: &mut AuthorizationResult,
        terminal_mac_key: Option<&Key>,
    ) -> Vec<u8> {
        if let Some(auth_code) = &result.auth_code {
            put(&mut response, FIELD_AUTH_CODE, auth_code);
        }
        put(&mut response, FIELD_RESPONSE_CODE, result.response_code.code());

        match self.sign(&mut response) {
            Ok((signature, timestamp)) => {
                result.signature = Some(signature);
                result.signature_timestamp = Some(timestamp);
                debug!(stage = ?AuthorizationStage::Signed);
            }
            Err(e) => {
                error!(error = %e, code = %result.response_code, "response signing failed, declining");
                unsigned_decline(&mut response, result);
            }
        }
        if let Some(key) = terminal_mac_key
            && let Err(e) = self.crypto.seal_message(&mut response, key)
        {
            error!(error = %e, "response MAC failed");
        }

        match iso8583::encode(&response) {
            Ok(bytes) => bytes,
            Err(e) => {
                error!(error = %e, "response encoding failed");
                Vec::new()
            }
        }
    }

    fn sign(&self, response: &mut Message) -> Result<(String, DateTime<Utc>)> {
        let key = self.keys.current(slots::RESPONSE_SIGNING)?;
        let signature = self
            .crypto
            .sign_response(response, &*key, self.clock.now())?;
        Ok((signature.signature, signature.timestamp))
    }
}

/// Sets a response field. Field numbers here are constants in range, so a
/// refusal is logged and the field left out.
fn put(message: &mut Message, field: u8, value: &str) {
    if let Err(e) = message.set(field, value) {
        error!(field, error = %e, "response field dropped");
    }
}

fn unsigned_decline(response: &mut Message, result: &mut AuthorizationResult) {
    result.response_code = ResponseCode::SystemMalfunction;
    result.decision = ResponseCode::SystemMalfunction.decision();
    result.auth_code = None;
    result.signature = None;
    result.signature_timestamp = None;
    response.remove(FIELD_AUTH_CODE);
    response.remove(FIELD_SIGNATURE);
    put(response, FIELD_RESPONSE_CODE, ResponseCode::SystemMalfunction.code());
}

/// Decision policy once every check has passed. Limits and funds come
/// first and are independent of the scores.
fn decide(ctx: &AuthorizationContext, challenge: bool, fraudulent: bool) -> ResponseCode {
    let amount = ctx.transaction.amount.value();
    if amount > ctx.card.single_txn_limit || amount > ctx.terminal.max_amount {
        ResponseCode::ExceedsLimit
    } else if amount > ctx.card.available_balance {
        ResponseCode::InsufficientFunds
    } else if fraudulent {
        ResponseCode::SuspectedFraud
    } else if challenge {
        ResponseCode::StepUpRequired
    } else {
        ResponseCode::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::tests::context;
    use rust_decimal_macros::dec;

    fn limited(card_limit: rust_decimal::Decimal, terminal_limit: rust_decimal::Decimal) -> AuthorizationContext {
        let mut ctx = context(dec!(620), 14);
        ctx.card.single_txn_limit = card_limit;
        ctx.terminal.max_amount = terminal_limit;
        ctx
    }

    #[test]
    fn test_limit_overrides_scores() {
        let ctx = limited(dec!(500), dec!(10000));
        assert_eq!(decide(&ctx, true, true), ResponseCode::ExceedsLimit);
        let ctx = limited(dec!(10000), dec!(600));
        assert_eq!(decide(&ctx, false, false), ResponseCode::ExceedsLimit);
    }

    #[test]
    fn test_insufficient_funds_after_limits_before_scores() {
        let mut ctx = limited(dec!(10000), dec!(10000));
        ctx.card.available_balance = dec!(600);
        assert_eq!(decide(&ctx, true, true), ResponseCode::InsufficientFunds);
        // a limit breach still wins
        ctx.card.single_txn_limit = dec!(500);
        assert_eq!(decide(&ctx, false, false), ResponseCode::ExceedsLimit);

        ctx.card.single_txn_limit = dec!(10000);
        ctx.card.available_balance = dec!(620);
        assert_eq!(decide(&ctx, false, false), ResponseCode::Approved);
    }

    #[test]
    fn test_unsigned_decline_strips_approval() {
        let mut response = Message::new(Mti::AuthorizationResponse);
        put(&mut response, FIELD_AUTH_CODE, "AB12CD");
        put(&mut response, FIELD_RESPONSE_CODE, "00");
        let mut result = AuthorizationResult::new(ResponseCode::Approved);
        result.auth_code = Some("AB12CD".into());

        unsigned_decline(&mut response, &mut result);
        assert_eq!(result.response_code, ResponseCode::SystemMalfunction);
        assert!(!result.is_approved());
        assert!(result.auth_code.is_none());
        assert_eq!(response.field(FIELD_RESPONSE_CODE), Some("96"));
        assert!(!response.has(FIELD_AUTH_CODE));
    }

    #[test]
    fn test_out_of_range_field_is_left_out() {
        let mut response = Message::new(Mti::AuthorizationResponse);
        put(&mut response, 65, "X");
        put(&mut response, FIELD_STAN, "000001");
        assert_eq!(response.fields().count(), 1);
        assert_eq!(response.field(FIELD_STAN), Some("000001"));
    }

    #[test]
    fn test_fraud_before_challenge() {
        let ctx = limited(dec!(10000), dec!(10000));
        assert_eq!(decide(&ctx, true, true), ResponseCode::SuspectedFraud);
        assert_eq!(decide(&ctx, true, false), ResponseCode::StepUpRequired);
        assert_eq!(decide(&ctx, false, false), ResponseCode::Approved);
    }

    #[test]
    fn test_error_mapping_hides_integrity_detail() {
        use crate::error::{IntegrityError, KeyStateError, ReplayError};
        use crate::domain::key::KeyId;

        let stage = AuthorizationStage::Decoded;
        let mismatch = Rejection::from_error(&IntegrityError::Mismatch.into(), stage);
        let replay = Rejection::from_error(&ReplayError::KsnReplay("00".into()).into(), stage);
        assert_eq!(mismatch.code, ResponseCode::DoNotHonor);
        assert_eq!(replay.code, ResponseCode::DoNotHonor);

        let key_state = Rejection::from_error(&KeyStateError::Revoked(KeyId(1)).into(), stage);
        assert_eq!(key_state.code, ResponseCode::SystemMalfunction);
    }
}
