//! One-time codes sent over SMS.
//!
//! Only a SHA-256 hash of each code is stored. A challenge can be verified
//! once, before it expires, and is locked after [`MAX_ATTEMPTS`] bad codes.
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    database::Database,
    error::AppError,
    sms::{SmsSender, send_with_backoff},
    utils::{TenantId, require_non_empty},
};

pub const CODE_DIGITS: usize = 6;
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeRequest {
    pub user_id: String,
    pub phone: String,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub challenge_id: String,
    pub code: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Challenge {
    pub challenge_id: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Verified {
    pub challenge_id: String,
    pub user_id: String,
}

fn generate_code() -> String {
    let n: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{n:0width$}", width = CODE_DIGITS)
}

fn hash_code(code: &str) -> String {
    hex::encode(Sha256::digest(code.as_bytes()))
}

pub async fn issue_challenge(
    db: &Database,
    sms: &dyn SmsSender,
    tenant: TenantId,
    request: ChallengeRequest,
    ttl: Duration,
    sms_base_delay: Duration,
) -> Result<Challenge, AppError> {
    let user_id = require_non_empty("userId", &request.user_id)?;
    let phone = require_non_empty("phone", &request.phone)?;

    let code = generate_code();
    let challenge_id = Uuid::new_v4().to_string();
    let now = Utc::now();
    let expires_at = now + chrono::Duration::from_std(ttl).map_err(AppError::internal)?;

    {
        let challenge_id = challenge_id.clone();
        let code_hash = hash_code(&code);
        let user_id = user_id.clone();

        db.call(move |conn| {
            conn.execute(
                "INSERT INTO mfa_challenges (id, tenant_id, user_id, code_hash, expires_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![challenge_id, tenant.as_str(), user_id, code_hash, expires_at, now],
            )?;
            Ok(())
        })
        .await?;
    }

    let body = format!("Your Rideline verification code is {code}");
    send_with_backoff(sms, &phone, &body, sms_base_delay)
        .await
        .map_err(|e| AppError::internal(format!("SMS delivery failed: {e}")))?;

    info!("Issued MFA challenge {challenge_id} for user {user_id}");
    Ok(Challenge {
        challenge_id,
        expires_at,
    })
}

pub async fn verify_challenge(
    db: &Database,
    tenant: TenantId,
    request: VerifyRequest,
) -> Result<Verified, AppError> {
    let challenge_id = request.challenge_id.clone();

    let verified = db
        .call(move |conn| {
            let tx = conn.transaction()?;

            let row: Option<(String, String, DateTime<Utc>, u32, bool)> = tx
                .query_row(
                    "SELECT user_id, code_hash, expires_at, attempts, consumed
                     FROM mfa_challenges WHERE tenant_id = ?1 AND id = ?2",
                    params![tenant.as_str(), request.challenge_id],
                    |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
                )
                .optional()?;

            let Some((user_id, code_hash, expires_at, attempts, consumed)) = row else {
                return Err(AppError::Unauthorized("Unknown challenge".to_string()));
            };
            if consumed {
                return Err(AppError::Unauthorized("Challenge already used".to_string()));
            }
            if expires_at <= Utc::now() {
                return Err(AppError::Unauthorized("Challenge expired".to_string()));
            }
            if attempts >= MAX_ATTEMPTS {
                return Err(AppError::Unauthorized("Too many attempts".to_string()));
            }

            let given = hash_code(request.code.trim());
            let matches: bool = given.as_bytes().ct_eq(code_hash.as_bytes()).into();

            if !matches {
                tx.execute(
                    "UPDATE mfa_challenges SET attempts = attempts + 1 WHERE id = ?1",
                    [&request.challenge_id],
                )?;
                tx.commit()?;
                return Ok(None);
            }

            tx.execute(
                "UPDATE mfa_challenges SET consumed = 1 WHERE id = ?1",
                [&request.challenge_id],
            )?;
            tx.commit()?;

            Ok(Some(Verified {
                challenge_id: request.challenge_id,
                user_id,
            }))
        })
        .await?;

    match verified {
        Some(verified) => {
            info!("MFA challenge {challenge_id} verified");
            Ok(verified)
        }
        None => {
            warn!("Wrong code for MFA challenge {challenge_id}");
            Err(AppError::Unauthorized("Invalid code".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;

    #[derive(Default)]
    struct Recording {
        sent: Mutex<Vec<(String, String)>>,
    }

    impl Recording {
        fn last_code(&self) -> String {
            let sent = self.sent.lock().unwrap();
            let (_, body) = sent.last().unwrap();
            body[body.len() - CODE_DIGITS..].to_string()
        }
    }

    #[async_trait]
    impl SmsSender for Recording {
        async fn send(&self, to: &str, body: &str) -> Result<(), anyhow::Error> {
            self.sent.lock().unwrap().push((to.to_string(), body.to_string()));
            Ok(())
        }
    }

    fn challenge_request() -> ChallengeRequest {
        ChallengeRequest {
            user_id: "driver-7".into(),
            phone: "+15551234567".into(),
        }
    }

    async fn issue(db: &Database, sms: &Recording, ttl: Duration) -> Challenge {
        issue_challenge(
            db,
            sms,
            TenantId("north".into()),
            challenge_request(),
            ttl,
            Duration::ZERO,
        )
        .await
        .unwrap()
    }

    #[test]
    fn test_code_shape() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), CODE_DIGITS);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[tokio::test]
    async fn test_verify_once() {
        let db = Database::open_in_memory().unwrap();
        let sms = Recording::default();
        let challenge = issue(&db, &sms, Duration::from_secs(600)).await;
        let code = sms.last_code();

        let request = VerifyRequest {
            challenge_id: challenge.challenge_id.clone(),
            code,
        };
        let verified = verify_challenge(&db, TenantId("north".into()), request.clone())
            .await
            .unwrap();
        assert_eq!(verified.user_id, "driver-7");

        let again = verify_challenge(&db, TenantId("north".into()), request).await;
        assert!(matches!(again, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_other_tenant_cannot_verify() {
        let db = Database::open_in_memory().unwrap();
        let sms = Recording::default();
        let challenge = issue(&db, &sms, Duration::from_secs(600)).await;

        let result = verify_challenge(
            &db,
            TenantId("south".into()),
            VerifyRequest {
                challenge_id: challenge.challenge_id,
                code: sms.last_code(),
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_locks_after_max_attempts() {
        let db = Database::open_in_memory().unwrap();
        let sms = Recording::default();
        let challenge = issue(&db, &sms, Duration::from_secs(600)).await;
        let code = sms.last_code();
        let wrong = if code == "000000" { "111111" } else { "000000" };

        for _ in 0..MAX_ATTEMPTS {
            let result = verify_challenge(
                &db,
                TenantId("north".into()),
                VerifyRequest {
                    challenge_id: challenge.challenge_id.clone(),
                    code: wrong.into(),
                },
            )
            .await;
            assert!(matches!(result, Err(AppError::Unauthorized(_))));
        }

        let result = verify_challenge(
            &db,
            TenantId("north".into()),
            VerifyRequest {
                challenge_id: challenge.challenge_id,
                code,
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(m)) if m == "Too many attempts"));
    }

    #[tokio::test]
    async fn test_expired() {
        let db = Database::open_in_memory().unwrap();
        let sms = Recording::default();
        let challenge = issue(&db, &sms, Duration::ZERO).await;

        let result = verify_challenge(
            &db,
            TenantId("north".into()),
            VerifyRequest {
                challenge_id: challenge.challenge_id,
                code: sms.last_code(),
            },
        )
        .await;
        assert!(matches!(result, Err(AppError::Unauthorized(m)) if m == "Challenge expired"));
    }

    #[tokio::test]
    async fn test_blank_phone_rejected() {
        let db = Database::open_in_memory().unwrap();
        let sms = Recording::default();

        let result = issue_challenge(
            &db,
            &sms,
            TenantId("north".into()),
            ChallengeRequest {
                user_id: "driver-7".into(),
                phone: "  ".into(),
            },
            Duration::from_secs(600),
            Duration::ZERO,
        )
        .await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert!(sms.sent.lock().unwrap().is_empty());
    }
}
