//! # Notification Hub
//!
//! Pushes trip-status changes and emergency alerts to connected clients.
//!
//! One broadcast channel for the whole process; every event is stamped with
//! its tenant and each subscription filters to its own tenant. Slow
//! subscribers that fall behind the channel capacity lose the oldest events
//! rather than blocking publishers.
use chrono::{DateTime, Utc};
use fleet::models::{GeofenceAlert, Id, TripStatus};
use futures::{Stream, stream};
use serde::Serialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use crate::utils::TenantId;

pub const HUB_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all_fields = "camelCase")]
pub enum Notification {
    TripStatusChanged {
        trip_id: Id,
        status: TripStatus,
        changed_at: DateTime<Utc>,
    },
    EmergencyAlert {
        alert: GeofenceAlert,
    },
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::TripStatusChanged { .. } => "TripStatusChanged",
            Notification::EmergencyAlert { .. } => "EmergencyAlert",
        }
    }
}

#[derive(Clone, Debug)]
struct TenantEvent {
    tenant: TenantId,
    notification: Notification,
}

#[derive(Clone)]
pub struct NotificationHub {
    sender: broadcast::Sender<TenantEvent>,
}

impl NotificationHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);

        Self { sender }
    }

    pub fn publish(&self, tenant: &TenantId, notification: Notification) {
        debug!("Publishing {} to {}", notification.kind(), tenant.as_str());

        // no subscribers is fine, nobody is listening
        let _ = self.sender.send(TenantEvent {
            tenant: tenant.clone(),
            notification,
        });
    }

    pub fn subscribe(&self, tenant: TenantId) -> Subscription {
        Subscription {
            tenant,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(HUB_CAPACITY)
    }
}

pub struct Subscription {
    tenant: TenantId,
    receiver: broadcast::Receiver<TenantEvent>,
}

impl Subscription {
    /// Next event for this tenant, `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Notification> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.tenant == self.tenant => return Some(event.notification),
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Subscriber for {} skipped {skipped} events", self.tenant.as_str());
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> impl Stream<Item = Notification> {
        stream::unfold(self, |mut subscription| async move {
            subscription
                .recv()
                .await
                .map(|notification| (notification, subscription))
        })
    }
}
