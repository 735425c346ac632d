use crate::application::AuthorizationOutcome;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Debug, Serialize)]
struct ResultRow<'a> {
    terminal_id: &'a str,
    stan: &'a str,
    response_code: &'static str,
    decision: String,
    auth_code: &'a str,
    risk_score: u8,
    fraud_score: String,
    signature_timestamp: String,
    response: String,
}

/// Writes one CSV row per authorization outcome.
pub struct ResultWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> ResultWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    pub fn write(&mut self, outcome: &AuthorizationOutcome) -> Result<()> {
        let result = &outcome.result;
        self.writer.serialize(ResultRow {
            terminal_id: &outcome.terminal_id,
            stan: &outcome.stan,
            response_code: result.response_code.code(),
            decision: result.decision.to_string(),
            auth_code: result.auth_code.as_deref().unwrap_or_default(),
            risk_score: result.risk_score,
            fraud_score: format!("{:.2}", result.fraud_score),
            signature_timestamp: result
                .signature_timestamp
                .map(|ts| ts.timestamp_millis().to_string())
                .unwrap_or_default(),
            response: String::from_utf8_lossy(&outcome.response).into_owned(),
        })?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()?;
        Ok(())
    }
}
