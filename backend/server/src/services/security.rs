//! # Payment Security
//!
//! Placeholder risk model run before every card payment.
//!
//! Five independent checks, each contributing a fixed risk score when it
//! fails. Scores are summed and bucketed:
//!
//! | Total       | Level    | Valid |
//! |-------------|----------|-------|
//! | `< 25`      | `Low`    | yes   |
//! | `25..=50`   | `Medium` | yes   |
//! | `> 50`      | `High`   | no    |
//!
//! No real PCI validation (shape only, no Luhn), no fraud model, and the rate
//! limit always passes. Keep it that way until a processor integration exists.
use fleet::models::{RiskLevel, SecurityCheckResult, SecurityCheckType, SecurityValidation};
use serde::Deserialize;

pub const PCI_FAILURE_RISK: i32 = 30;
pub const CVV_FAILURE_RISK: i32 = 20;
pub const FRAUD_FAILURE_RISK: i32 = 25;
pub const ADDRESS_FAILURE_RISK: i32 = 15;

/// 10,000.00 in minor units.
pub const FRAUD_AMOUNT_THRESHOLD_CENTS: i64 = 1_000_000;
pub const MIN_ADDRESS_LEN: usize = 10;

pub const MEDIUM_RISK_FLOOR: i32 = 25;
pub const HIGH_RISK_CEILING: i32 = 50;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardDetails {
    pub card_number: String,
    pub cvv: String,
    pub amount_cents: i64,
    pub billing_address: Option<String>,
}

fn check(check_type: SecurityCheckType, passed: bool, failure_risk: i32, message: String) -> SecurityCheckResult {
    SecurityCheckResult {
        check_type,
        passed,
        risk_score: if passed { 0 } else { failure_risk },
        message,
    }
}

pub fn card_digits(card_number: &str) -> String {
    card_number
        .chars()
        .filter(|c| !matches!(c, ' ' | '-'))
        .collect()
}

pub fn validate_pci_compliance(card_number: &str) -> SecurityCheckResult {
    let digits = card_digits(card_number);
    let passed = (13..=19).contains(&digits.len()) && digits.chars().all(|c| c.is_ascii_digit());

    let message = if passed {
        "Card number format is valid"
    } else {
        "Card number must be 13 to 19 digits"
    };

    check(SecurityCheckType::PciCompliance, passed, PCI_FAILURE_RISK, message.to_string())
}

pub fn validate_card_security(cvv: &str) -> SecurityCheckResult {
    let passed = matches!(cvv.len(), 3 | 4) && cvv.chars().all(|c| c.is_ascii_digit());

    let message = if passed {
        "CVV format is valid"
    } else {
        "CVV must be 3 or 4 digits"
    };

    check(SecurityCheckType::CardSecurity, passed, CVV_FAILURE_RISK, message.to_string())
}

pub fn detect_fraud(amount_cents: i64) -> SecurityCheckResult {
    let passed = amount_cents <= FRAUD_AMOUNT_THRESHOLD_CENTS;

    let message = if passed {
        "Amount within expected range".to_string()
    } else {
        format!("Amount exceeds {FRAUD_AMOUNT_THRESHOLD_CENTS} cents")
    };

    check(SecurityCheckType::FraudDetection, passed, FRAUD_FAILURE_RISK, message)
}

pub fn check_rate_limit() -> SecurityCheckResult {
    check(SecurityCheckType::RateLimit, true, 0, "Rate limit not exceeded".to_string())
}

pub fn verify_address(billing_address: Option<&str>) -> SecurityCheckResult {
    let length = billing_address.map(|a| a.trim().chars().count()).unwrap_or(0);
    let passed = length >= MIN_ADDRESS_LEN;

    let message = if passed {
        "Billing address looks complete".to_string()
    } else {
        format!("Billing address shorter than {MIN_ADDRESS_LEN} characters")
    };

    check(SecurityCheckType::AddressVerification, passed, ADDRESS_FAILURE_RISK, message)
}

pub fn classify(risk_score: i32) -> (RiskLevel, bool) {
    if risk_score > HIGH_RISK_CEILING {
        (RiskLevel::High, false)
    } else if risk_score >= MEDIUM_RISK_FLOOR {
        (RiskLevel::Medium, true)
    } else {
        (RiskLevel::Low, true)
    }
}

pub fn summarize(checks: Vec<SecurityCheckResult>) -> SecurityValidation {
    let risk_score = checks.iter().map(|c| c.risk_score).sum::<i32>();
    let (risk_level, is_valid) = classify(risk_score);

    SecurityValidation {
        checks,
        risk_score,
        risk_level,
        is_valid,
    }
}

pub fn validate_payment_security(card: &CardDetails) -> SecurityValidation {
    summarize(vec![
        validate_pci_compliance(&card.card_number),
        validate_card_security(&card.cvv),
        detect_fraud(card.amount_cents),
        check_rate_limit(),
        verify_address(card.billing_address.as_deref()),
    ])
}
