//! # Payments
//!
//! Card payments for transport fees. Every request is scored by
//! [`security`](super::security) first; anything the scorer rejects is stored
//! as `Declined` without touching the gateway.
//!
//! The gateway is simulated: an artificial delay, then a `TXN-<uuid>`
//! transaction id. Only the last four card digits are ever stored.
use std::time::Duration;

use chrono::Utc;
use fleet::models::{Id, Payment, PaymentStatus, SecurityValidation};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    audit, count,
    security::{CardDetails, validate_payment_security},
    students::load_student,
};
use crate::{
    database::{Database, parse_column},
    error::AppError,
    utils::{Page, PageRequest, TenantId},
};

const PAYMENT_COLUMNS: &str = "id, student_id, amount_cents, currency, card_last4, status,
     transaction_id, risk_score, risk_level, description, created_at";

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub student_id: Id,
    pub amount_cents: i64,
    #[serde(default = "default_currency")]
    pub currency: String,
    pub card_number: String,
    pub cvv: String,
    pub billing_address: Option<String>,
    pub description: Option<String>,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl PaymentRequest {
    pub fn card(&self) -> CardDetails {
        CardDetails {
            card_number: self.card_number.clone(),
            cvv: self.cvv.clone(),
            amount_cents: self.amount_cents,
            billing_address: self.billing_address.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOutcome {
    pub payment: Payment,
    pub security: SecurityValidation,
}

/// Stand-in for a processor round trip.
pub async fn charge_card(delay: Duration) -> String {
    tokio::time::sleep(delay).await;

    format!("TXN-{}", Uuid::new_v4())
}

/// Last four ASCII digits; anything else in the input is ignored.
fn last4(card_number: &str) -> String {
    let digits: Vec<char> = card_number.chars().filter(char::is_ascii_digit).collect();
    let start = digits.len().saturating_sub(4);

    digits[start..].iter().collect()
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: row.get(0)?,
        student_id: row.get(1)?,
        amount_cents: row.get(2)?,
        currency: row.get(3)?,
        card_last4: row.get(4)?,
        status: parse_column(row, 5)?,
        transaction_id: row.get(6)?,
        risk_score: row.get(7)?,
        risk_level: parse_column(row, 8)?,
        description: row.get(9)?,
        created_at: row.get(10)?,
    })
}

fn load_payment(conn: &Connection, tenant: &TenantId, id: Id) -> Result<Payment, AppError> {
    conn.query_row(
        &format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE tenant_id = ?1 AND id = ?2 AND is_deleted = 0"),
        params![tenant.as_str(), id],
        payment_from_row,
    )
    .optional()?
    .ok_or(AppError::NotFound("Payment"))
}

pub async fn process_payment(
    db: &Database,
    tenant: TenantId,
    request: PaymentRequest,
    gateway_delay: Duration,
) -> Result<PaymentOutcome, AppError> {
    if request.amount_cents <= 0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    let currency = request.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(AppError::Validation("Currency must be a 3 letter code".to_string()));
    }
    let currency = currency.to_ascii_uppercase();

    {
        let tenant = tenant.clone();
        let student_id = request.student_id;
        db.call(move |conn| load_student(conn, &tenant, student_id)).await?;
    }

    let security = validate_payment_security(&request.card());

    let (status, transaction_id) = if security.is_valid {
        (PaymentStatus::Completed, Some(charge_card(gateway_delay).await))
    } else {
        warn!(
            "Declining payment for student {}: risk score {}",
            request.student_id, security.risk_score
        );
        (PaymentStatus::Declined, None)
    };

    let payment = {
        let card_last4 = last4(&request.card_number);
        let risk_score = security.risk_score;
        let risk_level = security.risk_level;

        db.call(move |conn| {
            let tx = conn.transaction()?;

            tx.execute(
                "INSERT INTO payments
                     (tenant_id, student_id, amount_cents, currency, card_last4, status,
                      transaction_id, risk_score, risk_level, description, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    tenant.as_str(),
                    request.student_id,
                    request.amount_cents,
                    currency,
                    card_last4,
                    status.as_str(),
                    transaction_id,
                    risk_score,
                    risk_level.as_str(),
                    request.description,
                    Utc::now()
                ],
            )?;
            let id = tx.last_insert_rowid();

            audit::record(&tx, &tenant, "Payment", id, status.as_str(), transaction_id.as_deref())?;
            let payment = load_payment(&tx, &tenant, id)?;

            tx.commit()?;
            Ok(payment)
        })
        .await?
    };

    info!(
        "Payment {} for student {}: {} ({} risk)",
        payment.id, payment.student_id, payment.status, payment.risk_level
    );

    Ok(PaymentOutcome { payment, security })
}

pub async fn get_payment(db: &Database, tenant: TenantId, id: Id) -> Result<Payment, AppError> {
    db.call(move |conn| load_payment(conn, &tenant, id)).await
}

pub async fn list_payments(
    db: &Database,
    tenant: TenantId,
    student_id: Option<Id>,
    page: PageRequest,
) -> Result<Page<Payment>, AppError> {
    db.call(move |conn| {
        let where_clause = "tenant_id = ?1 AND is_deleted = 0 AND (?2 IS NULL OR student_id = ?2)";

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM payments WHERE {where_clause}"),
            params![tenant.as_str(), student_id],
        )?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE {where_clause}
             ORDER BY id DESC LIMIT ?3 OFFSET ?4"
        ))?;
        let items = stmt
            .query_map(
                params![tenant.as_str(), student_id, page.limit(), page.offset()],
                payment_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page::new(items, page, total))
    })
    .await
}

#[cfg(test)]
mod tests {
    use fleet::models::RiskLevel;

    use super::*;
    use crate::services::students::{NewParent, NewStudent, create_student};

    async fn student(db: &Database, tenant: &TenantId) -> Id {
        create_student(
            db,
            tenant.clone(),
            NewStudent {
                student_number: "S-1".into(),
                first_name: "Ada".into(),
                last_name: "Byron".into(),
                grade: None,
                stop_id: None,
                parent: NewParent {
                    name: "Anne".into(),
                    email: "anne@example.com".into(),
                    phone: None,
                },
            },
        )
        .await
        .unwrap()
        .id
    }

    fn request(student_id: Id) -> PaymentRequest {
        PaymentRequest {
            student_id,
            amount_cents: 12_500,
            currency: "usd".into(),
            card_number: "4111 1111 1111 1234".into(),
            cvv: "123".into(),
            billing_address: Some("400 Centennial Mall".into()),
            description: Some("Fall term transport".into()),
        }
    }

    #[test]
    fn test_last4() {
        assert_eq!(last4("4111-1111-1111-1234"), "1234");
        assert_eq!(last4("12"), "12");
    }

    #[test]
    fn test_last4_ignores_multibyte_characters() {
        assert_eq!(last4("é123"), "123");
        assert_eq!(last4("4111 1111 1111 12é34"), "1234");
        assert_eq!(last4("ééé"), "");
    }

    #[tokio::test]
    async fn test_multibyte_card_number_keeps_ascii_tail() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let student_id = student(&db, &tenant).await;

        let mut odd = request(student_id);
        odd.card_number = "é123".into();

        let outcome = process_payment(&db, tenant, odd, Duration::ZERO).await.unwrap();
        assert_eq!(outcome.payment.card_last4, "123");
        assert!(!outcome.security.checks[0].passed);
    }

    #[tokio::test]
    async fn test_currency_checked_before_uppercasing() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let student_id = student(&db, &tenant).await;

        let mut german = request(student_id);
        german.currency = "ßx".into();
        assert!(matches!(
            process_payment(&db, tenant.clone(), german, Duration::ZERO).await,
            Err(AppError::Validation(_))
        ));

        let mut lower = request(student_id);
        lower.currency = " eur ".into();
        let outcome = process_payment(&db, tenant, lower, Duration::ZERO).await.unwrap();
        assert_eq!(outcome.payment.currency, "EUR");
    }

    #[tokio::test]
    async fn test_clean_payment_completes() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let student_id = student(&db, &tenant).await;

        let outcome = process_payment(&db, tenant.clone(), request(student_id), Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(outcome.payment.status, PaymentStatus::Completed);
        assert_eq!(outcome.payment.card_last4, "1234");
        assert_eq!(outcome.payment.currency, "USD");
        assert!(outcome.payment.transaction_id.unwrap().starts_with("TXN-"));
        assert_eq!(outcome.security.risk_level, RiskLevel::Low);

        let listed = list_payments(&db, tenant, Some(student_id), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(listed.total_count, 1);
    }

    #[tokio::test]
    async fn test_high_risk_is_declined_without_transaction() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let student_id = student(&db, &tenant).await;

        let mut risky = request(student_id);
        risky.card_number = "1234".into();
        risky.cvv = "1".into();
        risky.billing_address = None;

        let outcome = process_payment(&db, tenant.clone(), risky, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(outcome.payment.status, PaymentStatus::Declined);
        assert_eq!(outcome.payment.transaction_id, None);
        assert_eq!(outcome.payment.risk_level, RiskLevel::High);
        assert!(!outcome.security.is_valid);

        let stored = get_payment(&db, tenant, outcome.payment.id).await.unwrap();
        assert_eq!(stored.risk_score, 65);
    }

    #[tokio::test]
    async fn test_rejects_bad_amount_and_unknown_student() {
        let db = Database::open_in_memory().unwrap();
        let tenant = TenantId("north".into());
        let student_id = student(&db, &tenant).await;

        let mut zero = request(student_id);
        zero.amount_cents = 0;
        assert!(matches!(
            process_payment(&db, tenant.clone(), zero, Duration::ZERO).await,
            Err(AppError::Validation(_))
        ));

        assert!(matches!(
            process_payment(&db, tenant, request(student_id + 100), Duration::ZERO).await,
            Err(AppError::NotFound("Student"))
        ));
    }
}
