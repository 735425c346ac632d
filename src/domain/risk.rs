use super::transaction::AuthorizationContext;
use chrono::Timelike;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;

pub const HIGH_RISK_COUNTRIES: [&str; 8] = ["KP", "IR", "SY", "CU", "VE", "MM", "BY", "RU"];
pub const HIGH_RISK_MCCS: [&str; 6] = ["7995", "5816", "5967", "6051", "6211", "4829"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: u8) -> Self {
        match score {
            80.. => RiskLevel::Critical,
            60..=79 => RiskLevel::High,
            30..=59 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }

    /// Levels that call for step-up authentication.
    pub fn requires_challenge(self) -> bool {
        matches!(self, RiskLevel::High | RiskLevel::Critical)
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
            RiskLevel::Critical => "CRITICAL",
        };
        f.write_str(name)
    }
}

/// Individual factor scores, each 0 to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct RiskFactors {
    pub velocity: u8,
    pub amount: u8,
    pub location: u8,
    pub time: u8,
    pub merchant: u8,
    pub behavior: u8,
}

impl RiskFactors {
    const WEIGHTS: [f64; 6] = [0.15, 0.20, 0.25, 0.10, 0.15, 0.15];

    fn as_array(&self) -> [u8; 6] {
        [
            self.velocity,
            self.amount,
            self.location,
            self.time,
            self.merchant,
            self.behavior,
        ]
    }

    pub fn weighted_score(&self) -> u8 {
        let total: f64 = self
            .as_array()
            .iter()
            .zip(Self::WEIGHTS)
            .map(|(score, weight)| f64::from(*score) * weight)
            .sum();
        total.round().clamp(0.0, 100.0) as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub score: u8,
    pub level: RiskLevel,
    pub factors: RiskFactors,
    pub recommendations: Vec<String>,
}

/// Weighted six-factor risk model. Stateless: the assessment depends only on
/// the context it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct RiskEngine;

impl RiskEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn score_risk(&self, ctx: &AuthorizationContext) -> RiskAssessment {
        let factors = RiskFactors {
            velocity: velocity_risk(ctx),
            amount: amount_risk(ctx),
            location: location_risk(ctx),
            time: time_risk(ctx),
            merchant: merchant_risk(ctx),
            behavior: behavior_risk(ctx),
        };
        let score = factors.weighted_score();
        let level = RiskLevel::from_score(score);

        let mut recommendations = Vec::new();
        if factors.velocity > 50 {
            recommendations.push("Consider velocity limit enforcement".to_string());
        }
        if factors.location > 50 {
            recommendations.push("Trigger 3D-Secure for cross-border".to_string());
        }
        if factors.amount > 50 {
            recommendations.push("Request additional authentication".to_string());
        }
        if level == RiskLevel::Critical {
            recommendations.push("Manual review recommended".to_string());
        }

        RiskAssessment {
            score,
            level,
            factors,
            recommendations,
        }
    }
}

fn velocity_risk(ctx: &AuthorizationContext) -> u8 {
    match ctx.transactions_in_last_hour() {
        10.. => 100,
        5..=9 => 60,
        3..=4 => 30,
        _ => 0,
    }
}

fn amount_risk(ctx: &AuthorizationContext) -> u8 {
    let amount = ctx.transaction.amount.value();
    let balance = ctx.card.available_balance;
    if amount > balance * dec!(0.8) {
        80
    } else if amount > balance * dec!(0.5) {
        40
    } else if amount > dec!(5000) {
        70
    } else if amount > dec!(1000) {
        30
    } else if is_round(amount) {
        20
    } else {
        0
    }
}

fn location_risk(ctx: &AuthorizationContext) -> u8 {
    let Some(country) = ctx.transaction.country.as_deref() else {
        return 10;
    };
    if HIGH_RISK_COUNTRIES.contains(&country) {
        return 100;
    }
    match ctx.history.first().and_then(|last| last.country.as_deref()) {
        Some(previous) if previous != country => 40,
        _ => 0,
    }
}

fn time_risk(ctx: &AuthorizationContext) -> u8 {
    match ctx.transaction.transmitted_at.hour() {
        2..=5 => 50,
        0..=6 => 25,
        _ => 0,
    }
}

fn merchant_risk(ctx: &AuthorizationContext) -> u8 {
    if HIGH_RISK_MCCS.contains(&ctx.transaction.mcc.as_str()) {
        70
    } else {
        0
    }
}

fn behavior_risk(ctx: &AuthorizationContext) -> u8 {
    if ctx.history.is_empty() {
        return 30;
    }
    let total: Decimal = ctx.history.iter().map(|tx| tx.amount).sum();
    let average = total / Decimal::from(ctx.history.len());
    let amount = ctx.transaction.amount.value();
    if amount > average * dec!(5) {
        70
    } else if amount > average * dec!(3) {
        40
    } else if amount > average * dec!(2) {
        20
    } else {
        0
    }
}

/// Whole hundreds from 500 up.
pub(crate) fn is_round(amount: Decimal) -> bool {
    amount >= dec!(500) && (amount % dec!(100)).is_zero()
}
