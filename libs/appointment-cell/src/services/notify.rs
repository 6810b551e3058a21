// libs/appointment-cell/src/services/notify.rs
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentError, LifecycleEvent};

/// Best-effort push/email fan-out on state changes. Callers must treat a
/// failed send as a logging concern, never as a reason to roll back the
/// transition that triggered it.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(
        &self,
        party_id: Uuid,
        event: LifecycleEvent,
        appointment: &Appointment,
    ) -> Result<(), AppointmentError>;
}

pub struct HttpNotificationSender {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNotificationSender {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.notification_service_url.clone(),
        }
    }
}

#[async_trait]
impl NotificationSender for HttpNotificationSender {
    async fn notify(
        &self,
        party_id: Uuid,
        event: LifecycleEvent,
        appointment: &Appointment,
    ) -> Result<(), AppointmentError> {
        debug!("Notifying {} of {:?} for appointment {}", party_id, event, appointment.id);

        let url = format!("{}/notifications", self.base_url);
        let body = json!({
            "party_id": party_id,
            "event": event,
            "appointment_id": appointment.id,
            "booking_code": appointment.booking_code,
            "appointment_date": appointment.appointment_date,
            "appointment_time": appointment.appointment_time,
        });

        let response = self.client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| AppointmentError::ExternalServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppointmentError::ExternalServiceError(format!(
                "Notification service returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
