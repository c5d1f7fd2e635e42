use std::time::Duration;

use anyhow::Error;
use async_trait::async_trait;
use tracing::{info, warn};

pub const SMS_ATTEMPTS: u32 = 3;

#[async_trait]
pub trait SmsSender: Send + Sync {
    async fn send(&self, to: &str, body: &str) -> Result<(), Error>;
}

/// Writes messages to the log instead of a provider.
pub struct LogSmsSender {
    api_key: Option<String>,
}

impl LogSmsSender {
    pub fn new(api_key: Option<String>) -> Self {
        if api_key.is_none() {
            info!("No SMS_API_KEY secret found, SMS messages will only be logged");
        }

        Self { api_key }
    }
}

#[async_trait]
impl SmsSender for LogSmsSender {
    async fn send(&self, to: &str, body: &str) -> Result<(), Error> {
        info!(
            "SMS to {} ({} chars, keyed: {})",
            mask_phone(to),
            body.len(),
            self.api_key.is_some()
        );
        Ok(())
    }
}

/// Everything but the last four digits replaced.
pub fn mask_phone(phone: &str) -> String {
    let digits: Vec<char> = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(4);

    format!("***{}", digits[start..].iter().collect::<String>())
}

/// Sends with up to [`SMS_ATTEMPTS`] tries, doubling the wait after each failure.
pub async fn send_with_backoff(
    sender: &dyn SmsSender,
    to: &str,
    body: &str,
    base_delay: Duration,
) -> Result<(), Error> {
    let mut delay = base_delay;
    let mut attempt = 1;

    loop {
        match sender.send(to, body).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < SMS_ATTEMPTS => {
                warn!("SMS attempt {attempt} to {} failed: {e}", mask_phone(to));
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => {
                warn!("Giving up on SMS to {} after {attempt} attempts", mask_phone(to));
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use anyhow::anyhow;

    use super::*;

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl SmsSender for Flaky {
        async fn send(&self, _to: &str, _body: &str) -> Result<(), Error> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(anyhow!("provider unavailable"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn test_recovers_within_attempts() {
        let sender = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };

        send_with_backoff(&sender, "+15551234567", "hi", Duration::from_millis(1))
            .await
            .unwrap();
        assert_eq!(sender.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_three() {
        let sender = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };

        let result = send_with_backoff(&sender, "+15551234567", "hi", Duration::from_millis(1)).await;
        assert!(result.is_err());
        assert_eq!(sender.calls.load(Ordering::SeqCst), SMS_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_delay_doubles() {
        let sender = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let started = tokio::time::Instant::now();

        send_with_backoff(&sender, "555", "hi", Duration::from_millis(10))
            .await
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_mask_phone() {
        assert_eq!(mask_phone("+1 (555) 123-4567"), "***4567");
        assert_eq!(mask_phone("12"), "***12");
    }
}
