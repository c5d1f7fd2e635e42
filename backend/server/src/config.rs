use std::{env, fmt::Display, fs::read_to_string, str::FromStr, time::Duration};

use anyhow::{Error, anyhow};
use tracing::{info, warn};

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub database_path: String,
    pub attendance_radius_km: f64,
    pub allowed_deviation_km: f64,
    pub speed_limit_kmh: f64,
    pub mfa_code_ttl: Duration,
    pub sms_base_delay: Duration,
    pub gateway_delay: Duration,
    pub cors_origin: Option<String>,
    pub sms_api_key: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self, Error> {
        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            database_path: try_load("DATABASE_PATH", "rideline.db")?,
            attendance_radius_km: try_load("ATTENDANCE_RADIUS_KM", "0.5")?,
            allowed_deviation_km: try_load("ALLOWED_DEVIATION_KM", "2.0")?,
            speed_limit_kmh: try_load("SPEED_LIMIT_KMH", "80")?,
            mfa_code_ttl: Duration::from_secs(try_load("MFA_CODE_TTL_SECS", "600")?),
            sms_base_delay: Duration::from_millis(try_load("SMS_BASE_DELAY_MS", "500")?),
            gateway_delay: Duration::from_millis(try_load("GATEWAY_DELAY_MS", "200")?),
            cors_origin: var("CORS_ORIGIN").ok(),
            sms_api_key: read_secret("SMS_API_KEY"),
        })
    }

    /// Defaults with a caller-chosen database, no environment involved.
    pub fn with_database(database_path: impl Into<String>) -> Self {
        Self {
            port: 0,
            database_path: database_path.into(),
            attendance_radius_km: 0.5,
            allowed_deviation_km: 2.0,
            speed_limit_kmh: 80.0,
            mfa_code_ttl: Duration::from_secs(600),
            sms_base_delay: Duration::from_millis(500),
            gateway_delay: Duration::from_millis(200),
            cors_origin: None,
            sms_api_key: None,
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| {
        info!("Environment variable {key} not found, using default");
    })
}

fn try_load<T: FromStr>(key: &str, default: &str) -> Result<T, Error>
where
    T::Err: Display,
{
    let raw = var(key).unwrap_or_else(|_| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    parse_value(key, &raw)
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, Error>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e| {
        warn!("Invalid {key} value: {e}");
        anyhow!("Environment misconfigured: {key}={raw}: {e}")
    })
}

fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .map_err(|e| {
            warn!("Failed to read {secret_name} from file: {e}");
        })
        .ok()
}
