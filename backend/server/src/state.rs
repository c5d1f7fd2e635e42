use std::sync::Arc;

use anyhow::Error;

use super::{
    config::Config,
    database::Database,
    hub::NotificationHub,
    services::geofence::TrackingLimits,
    sms::{LogSmsSender, SmsSender},
};

pub struct State {
    pub config: Config,
    pub db: Database,
    pub hub: NotificationHub,
    pub sms: Arc<dyn SmsSender>,
}

impl State {
    pub fn new(config: Config) -> Result<Arc<Self>, Error> {
        let sms = Arc::new(LogSmsSender::new(config.sms_api_key.clone()));

        Self::with_sms(config, sms)
    }

    pub fn with_sms(config: Config, sms: Arc<dyn SmsSender>) -> Result<Arc<Self>, Error> {
        let db = Database::open(&config.database_path)?;

        Ok(Arc::new(Self {
            config,
            db,
            hub: NotificationHub::default(),
            sms,
        }))
    }

    pub fn tracking_limits(&self) -> TrackingLimits {
        TrackingLimits {
            allowed_deviation_km: self.config.allowed_deviation_km,
            speed_limit_kmh: self.config.speed_limit_kmh,
        }
    }
}
