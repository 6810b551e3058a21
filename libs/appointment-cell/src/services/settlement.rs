// libs/appointment-cell/src/services/settlement.rs
use async_trait::async_trait;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{Appointment, AppointmentError, SettlementIntentType};

/// One settlement instruction for the wallet collaborator. The collaborator
/// treats duplicates for the same (appointment_id, intent_type) as no-ops, so
/// emission here does not need to be exactly-once.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementIntent {
    pub appointment_id: Uuid,
    pub intent_type: SettlementIntentType,
    pub amount: f64,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
}

impl SettlementIntent {
    pub fn for_appointment(appointment: &Appointment, intent_type: SettlementIntentType) -> Self {
        Self {
            appointment_id: appointment.id,
            intent_type,
            amount: appointment.fee,
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
        }
    }
}

/// Boundary to the wallet/payment collaborator. Lifecycle transitions emit
/// capture, refund, and payout intents through this seam.
#[async_trait]
pub trait SettlementNotifier: Send + Sync {
    async fn settle(
        &self,
        appointment: &Appointment,
        intent_type: SettlementIntentType,
    ) -> Result<(), AppointmentError>;
}

pub struct HttpSettlementNotifier {
    client: reqwest::Client,
    base_url: String,
}

impl HttpSettlementNotifier {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.wallet_service_url.clone(),
        }
    }
}

#[async_trait]
impl SettlementNotifier for HttpSettlementNotifier {
    async fn settle(
        &self,
        appointment: &Appointment,
        intent_type: SettlementIntentType,
    ) -> Result<(), AppointmentError> {
        let intent = SettlementIntent::for_appointment(appointment, intent_type);
        debug!("Emitting {} intent for appointment {}", intent_type, appointment.id);

        let url = format!("{}/intents", self.base_url);
        let response = self.client
            .post(&url)
            .json(&intent)
            .send()
            .await
            .map_err(|e| AppointmentError::ExternalServiceError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AppointmentError::ExternalServiceError(format!(
                "Wallet service returned {}",
                response.status()
            )));
        }

        Ok(())
    }
}
