// libs/appointment-cell/src/services/store.rs
use async_trait::async_trait;
use chrono::Utc;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{Appointment, AppointmentError, AppointmentPatch, AppointmentStatus};

/// Persistence seam for appointment records. The `update_guarded` contract is
/// what serializes per-appointment transitions: the write only lands if the
/// record still carries the status the caller read, and `None` reports that a
/// concurrent transition won.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    async fn insert(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError>;

    async fn fetch(&self, id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError>;

    async fn update_guarded(
        &self,
        id: Uuid,
        expected_status: AppointmentStatus,
        patch: &AppointmentPatch,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError>;

    async fn list_for_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError>;

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError>;
}

pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    fn patch_to_json(patch: &AppointmentPatch) -> Value {
        let mut update = serde_json::Map::new();

        if let Some(status) = patch.status {
            update.insert("status".to_string(), json!(status));
        }
        if let Some(payment_status) = patch.payment_status {
            update.insert("payment_status".to_string(), json!(payment_status));
        }
        if let Some(date) = patch.appointment_date {
            update.insert("appointment_date".to_string(), json!(date));
        }
        if let Some(ref time) = patch.appointment_time {
            update.insert("appointment_time".to_string(), json!(time));
        }
        if let Some(slot_id) = patch.slot_id {
            update.insert("slot_id".to_string(), json!(slot_id));
        }
        if let Some(ref reason) = patch.rejection_reason {
            update.insert("rejection_reason".to_string(), json!(reason));
        }
        if let Some(ref reason) = patch.cancellation_reason {
            update.insert("cancellation_reason".to_string(), json!(reason));
        }
        if let Some(by) = patch.cancelled_by {
            update.insert("cancelled_by".to_string(), json!(by));
        }
        if let Some(ref proposal) = patch.reschedule_proposal {
            update.insert("reschedule_proposal".to_string(), json!(proposal));
        }
        if let Some(ref reason) = patch.reschedule_rejection_reason {
            update.insert("reschedule_rejection_reason".to_string(), json!(reason));
        }
        if let Some(ref notes) = patch.completion_notes {
            update.insert("completion_notes".to_string(), json!(notes));
        }
        update.insert("updated_at".to_string(), json!(Utc::now().to_rfc3339()));

        Value::Object(update)
    }

    fn parse_rows(rows: Vec<Value>) -> Result<Vec<Appointment>, AppointmentError> {
        rows.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Appointment>, _>>()
            .map_err(|e| AppointmentError::DatabaseError(format!("Failed to parse appointment: {}", e)))
    }

    fn representation_headers() -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            "Prefer",
            reqwest::header::HeaderValue::from_static("return=representation"),
        );
        headers
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn insert(
        &self,
        appointment: &Appointment,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Creating appointment record {}", appointment.id);

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/appointments",
            Some(auth_token),
            Some(json!(appointment)),
            Some(Self::representation_headers()),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Self::parse_rows(result)?
            .into_iter()
            .next()
            .ok_or_else(|| AppointmentError::DatabaseError("Failed to create appointment".to_string()))
    }

    async fn fetch(&self, id: Uuid, auth_token: &str) -> Result<Appointment, AppointmentError> {
        debug!("Fetching appointment {}", id);

        let path = format!("/rest/v1/appointments?id=eq.{}", id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Self::parse_rows(result)?
            .into_iter()
            .next()
            .ok_or(AppointmentError::NotFound)
    }

    async fn update_guarded(
        &self,
        id: Uuid,
        expected_status: AppointmentStatus,
        patch: &AppointmentPatch,
        auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        debug!("Guarded update of appointment {} from status {}", id, expected_status);

        // The status filter is the optimistic check: PostgREST only patches
        // rows still matching it, so a stale caller gets an empty result
        // back instead of overwriting a concurrent transition.
        let path = format!("/rest/v1/appointments?id=eq.{}&status=eq.{}", id, expected_status);

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(Self::patch_to_json(patch)),
            Some(Self::representation_headers()),
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Ok(Self::parse_rows(result)?.into_iter().next())
    }

    async fn list_for_patient(
        &self,
        patient_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?patient_id=eq.{}&order=created_at.desc",
            patient_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Self::parse_rows(result)
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!(
            "/rest/v1/appointments?doctor_id=eq.{}&order=created_at.desc",
            doctor_id
        );
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| AppointmentError::DatabaseError(e.to_string()))?;

        Self::parse_rows(result)
    }
}
