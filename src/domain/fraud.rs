use super::risk::is_round;
use super::transaction::AuthorizationContext;
use chrono::Timelike;
use rust_decimal_macros::dec;
use serde::Serialize;

pub const MODEL_VERSION: &str = "FD-SIM-v2.0";
pub const DEFAULT_THRESHOLD: f64 = 0.7;

const HIGH_RISK_MERCHANT_PREFIXES: [&str; 4] = ["HR_", "CRYPTO_", "GAMBL_", "ADULT_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudIndicator {
    pub name: &'static str,
    pub score: f64,
    pub reason: String,
    pub severity: Severity,
}

impl FraudIndicator {
    fn new(name: &'static str, score: f64, severity: Severity, reason: impl Into<String>) -> Self {
        Self {
            name,
            score,
            reason: reason.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FraudAnalysis {
    pub score: f64,
    pub is_fraudulent: bool,
    pub confidence: f64,
    pub indicators: Vec<FraudIndicator>,
    pub model_version: &'static str,
    pub explanation: String,
    pub factors: Vec<String>,
}

/// Combines indicator scores with rank-diminishing weights.
///
/// Scores are sorted descending and the `i`-th (1-indexed) contributes
/// `score / (i + 1)`. The sum is divided by the largest sum attainable with
/// the same number of indicators and clamped to `[0, 1]`.
pub fn combine(indicators: &[FraudIndicator]) -> f64 {
    if indicators.is_empty() {
        return 0.0;
    }
    let mut scores: Vec<f64> = indicators.iter().map(|i| i.score).collect();
    scores.sort_by(|a, b| b.total_cmp(a));

    let (weighted, max) = scores
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(weighted, max), (rank, score)| {
            let weight = 1.0 / (rank as f64 + 1.0);
            (weighted + score * weight, max + weight)
        });
    (weighted / max).clamp(0.0, 1.0)
}

/// Confidence grows with the number of agreeing signals, not with the score.
pub fn confidence(indicator_count: usize) -> f64 {
    match indicator_count {
        0 => 0.95,
        1..=2 => 0.70,
        _ => 0.85,
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FraudEngine {
    threshold: f64,
}

impl Default for FraudEngine {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

impl FraudEngine {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn score_fraud(&self, ctx: &AuthorizationContext) -> FraudAnalysis {
        let indicators = detect(ctx);
        let score = combine(&indicators);
        let count = indicators.len();

        let explanation = if score < 0.3 {
            "Transaction appears legitimate with no significant risk indicators.".to_string()
        } else if score < self.threshold {
            format!(
                "Moderate risk detected: {count} indicator(s) triggered. Consider additional verification."
            )
        } else {
            format!(
                "High fraud probability: {count} risk indicator(s) detected. Manual review recommended."
            )
        };
        let factors = indicators
            .iter()
            .map(|i| format!("{}: {:.0}%", i.name, i.score * 100.0))
            .collect();

        FraudAnalysis {
            score,
            is_fraudulent: score >= self.threshold,
            confidence: confidence(count),
            indicators,
            model_version: MODEL_VERSION,
            explanation,
            factors,
        }
    }
}

fn detect(ctx: &AuthorizationContext) -> Vec<FraudIndicator> {
    let tx = &ctx.transaction;
    let amount = tx.amount.value();
    let mut indicators = Vec::new();

    if tx.ecommerce && !tx.three_ds {
        indicators.push(FraudIndicator::new(
            "CNP_NO_3DS",
            0.4,
            Severity::Medium,
            "Card-not-present transaction without 3-D Secure",
        ));
    }

    if ctx.history.len() < 3 && amount > dec!(500) {
        indicators.push(FraudIndicator::new(
            "NEW_CARD_HIGH_VALUE",
            0.35,
            Severity::Medium,
            "High-value transaction on a card with little history",
        ));
    }

    let recent = ctx.transactions_in_last_hour();
    if recent > 5 {
        indicators.push(FraudIndicator::new(
            "VELOCITY_SPIKE",
            (recent as f64 * 0.1).min(0.8),
            Severity::High,
            format!("{recent} transactions in last hour"),
        ));
    }

    if is_testing_pattern(ctx) {
        indicators.push(FraudIndicator::new(
            "TESTING_PATTERN",
            0.9,
            Severity::High,
            "Small test transactions followed by a large one",
        ));
    }

    if is_geographic_anomaly(ctx) {
        indicators.push(FraudIndicator::new(
            "GEO_ANOMALY",
            0.6,
            Severity::High,
            "Transaction country not seen in recent history",
        ));
    }

    if (2..=5).contains(&tx.transmitted_at.hour()) {
        indicators.push(FraudIndicator::new(
            "UNUSUAL_TIME",
            0.25,
            Severity::Low,
            "Transaction during unusual hours (2-5 AM)",
        ));
    }

    if HIGH_RISK_MERCHANT_PREFIXES
        .iter()
        .any(|prefix| tx.merchant_id.starts_with(prefix))
    {
        indicators.push(FraudIndicator::new(
            "HIGH_RISK_MERCHANT",
            0.5,
            Severity::Medium,
            "Merchant in a high-risk category",
        ));
    }

    if is_round(amount) {
        indicators.push(FraudIndicator::new(
            "ROUND_AMOUNT",
            0.15,
            Severity::Low,
            "Suspiciously round amount",
        ));
    }

    indicators
}

fn is_testing_pattern(ctx: &AuthorizationContext) -> bool {
    if ctx.history.len() < 2 {
        return false;
    }
    let small = ctx
        .history
        .iter()
        .take(3)
        .filter(|tx| tx.amount < dec!(5))
        .count();
    small >= 2 && ctx.transaction.amount.value() > dec!(200)
}

fn is_geographic_anomaly(ctx: &AuthorizationContext) -> bool {
    let Some(country) = ctx.transaction.country.as_deref() else {
        return false;
    };
    let recent: Vec<&str> = ctx
        .history
        .iter()
        .take(5)
        .filter_map(|tx| tx.country.as_deref())
        .collect();
    !recent.is_empty() && !recent.contains(&country)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::tests::{context, past};
    use chrono::Duration;

    fn indicator(score: f64) -> FraudIndicator {
        FraudIndicator::new("TEST", score, Severity::Low, "test")
    }

    fn names(analysis: &FraudAnalysis) -> Vec<&'static str> {
        analysis.indicators.iter().map(|i| i.name).collect()
    }

    #[test]
    fn test_clean_transaction() {
        let mut ctx = context(dec!(42), 14);
        ctx.history = vec![past(dec!(40), Duration::days(1), "FR")];
        let analysis = FraudEngine::default().score_fraud(&ctx);
        assert!(analysis.indicators.is_empty());
        assert_eq!(analysis.score, 0.0);
        assert_eq!(analysis.confidence, 0.95);
        assert!(!analysis.is_fraudulent);
        assert_eq!(analysis.model_version, "FD-SIM-v2.0");
        assert_eq!(
            analysis.explanation,
            "Transaction appears legitimate with no significant risk indicators."
        );
    }

    #[test]
    fn test_testing_pattern_with_cnp_is_fraud() {
        let mut ctx = context(dec!(300), 14);
        ctx.transaction.ecommerce = true;
        ctx.history = vec![
            past(dec!(1.00), Duration::minutes(90), "FR"),
            past(dec!(2.50), Duration::minutes(120), "FR"),
        ];
        let analysis = FraudEngine::default().score_fraud(&ctx);
        assert_eq!(names(&analysis), vec!["CNP_NO_3DS", "TESTING_PATTERN"]);
        // (0.9 + 0.4 / 2) / 1.5
        assert!((analysis.score - 0.7333).abs() < 1e-3);
        assert!(analysis.is_fraudulent);
        assert_eq!(analysis.confidence, 0.70);
        assert_eq!(analysis.factors, vec!["CNP_NO_3DS: 40%", "TESTING_PATTERN: 90%"]);
        assert!(analysis.explanation.starts_with("High fraud probability: 2"));
    }

    #[test]
    fn test_three_ds_suppresses_cnp() {
        let mut ctx = context(dec!(42), 14);
        ctx.history = vec![past(dec!(40), Duration::days(1), "FR")];
        ctx.transaction.ecommerce = true;
        ctx.transaction.three_ds = true;
        assert!(FraudEngine::default().score_fraud(&ctx).indicators.is_empty());
    }

    #[test]
    fn test_new_card_off_hours_is_moderate() {
        let ctx = context(dec!(620), 3);
        let analysis = FraudEngine::default().score_fraud(&ctx);
        assert_eq!(names(&analysis), vec!["NEW_CARD_HIGH_VALUE", "UNUSUAL_TIME"]);
        assert!(analysis.score > 0.3 && analysis.score < 0.7);
        assert!(!analysis.is_fraudulent);
        assert!(analysis.explanation.starts_with("Moderate risk detected: 2"));
    }

    #[test]
    fn test_velocity_geo_merchant_and_round() {
        let mut ctx = context(dec!(1000), 14);
        ctx.transaction.merchant_id = "CRYPTO_EXCHANGE".into();
        ctx.history = (1..=7)
            .map(|i| past(dec!(100), Duration::minutes(i * 5), "DE"))
            .collect();
        let analysis = FraudEngine::default().score_fraud(&ctx);
        assert_eq!(
            names(&analysis),
            vec!["VELOCITY_SPIKE", "GEO_ANOMALY", "HIGH_RISK_MERCHANT", "ROUND_AMOUNT"]
        );
        assert!((analysis.indicators[0].score - 0.7).abs() < 1e-9);
        assert_eq!(analysis.confidence, 0.85);
    }

    #[test]
    fn test_combine_normalizes_by_rank() {
        assert_eq!(combine(&[]), 0.0);
        assert!((combine(&[indicator(0.4)]) - 0.4).abs() < 1e-9);
        let combined = combine(&[indicator(0.25), indicator(0.35)]);
        assert!((combined - (0.35 + 0.125) / 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_higher_indicator_never_lowers_score() {
        let sets: [&[f64]; 4] = [
            &[0.15],
            &[0.5, 0.25],
            &[0.6, 0.4, 0.15, 0.15],
            &[0.9, 0.0, 0.0, 0.0, 0.0],
        ];
        for set in sets {
            let base: Vec<FraudIndicator> = set.iter().copied().map(indicator).collect();
            let top = set.iter().copied().fold(0.0, f64::max);
            for extra in [top, (top + 0.1).min(1.0), 1.0] {
                let mut extended = base.clone();
                extended.push(indicator(extra));
                assert!(combine(&extended) >= combine(&base) - 1e-12);
            }
        }
    }

    #[test]
    fn test_confidence_steps() {
        assert_eq!(confidence(0), 0.95);
        assert_eq!(confidence(1), 0.70);
        assert_eq!(confidence(2), 0.70);
        assert_eq!(confidence(3), 0.85);
        assert_eq!(confidence(8), 0.85);
    }
}
