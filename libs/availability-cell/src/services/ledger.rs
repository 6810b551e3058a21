// libs/availability-cell/src/services/ledger.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_database::supabase::SupabaseClient;

use crate::models::{PublishSlotsRequest, Slot, SlotError};

/// The slot ledger answers "is this doctor free at this window" and owns the
/// atomic reserve/release of windows. Reservation must be linearizable per
/// slot: two racing `reserve` calls for the same id must not both succeed.
#[async_trait]
pub trait SlotLedger: Send + Sync {
    async fn get(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, SlotError>;

    /// Bookable windows for a doctor on a date. Excludes reserved slots and,
    /// for the current date, windows whose start time has already passed.
    async fn list_available(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError>;

    /// Flip `available -> reserved` as one conditional update. A lost race
    /// surfaces as `AlreadyReserved`, never as a silent overwrite.
    async fn reserve(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, SlotError>;

    /// Idempotent: releasing an already-available or unknown slot is a no-op.
    async fn release(&self, slot_id: Uuid, auth_token: &str) -> Result<(), SlotError>;
}

pub struct SupabaseSlotLedger {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseSlotLedger {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: Arc::new(SupabaseClient::new(config)),
        }
    }

    pub fn with_client(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    /// Publish a day's windows for a doctor. Windows must be well-formed,
    /// mutually non-overlapping, and must not overlap any window already
    /// published for that (doctor, date).
    pub async fn publish_windows(
        &self,
        doctor_id: Uuid,
        request: PublishSlotsRequest,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        debug!("Publishing {} windows for doctor {} on {}",
               request.windows.len(), doctor_id, request.date);

        if request.windows.is_empty() {
            return Err(SlotError::InvalidWindow("No windows supplied".to_string()));
        }

        for window in &request.windows {
            if window.start_time >= window.end_time {
                return Err(SlotError::InvalidWindow(
                    "Start time must be before end time".to_string(),
                ));
            }
        }

        for (i, a) in request.windows.iter().enumerate() {
            for b in request.windows.iter().skip(i + 1) {
                if a.start_time < b.end_time && b.start_time < a.end_time {
                    return Err(SlotError::Overlapping);
                }
            }
        }

        let existing = self.fetch_day(doctor_id, request.date, auth_token).await?;
        for window in &request.windows {
            if existing.iter().any(|s| s.overlaps(window.start_time, window.end_time)) {
                return Err(SlotError::Overlapping);
            }
        }

        let now = Utc::now();
        let rows: Vec<Value> = request.windows.iter().map(|w| json!({
            "doctor_id": doctor_id,
            "slot_date": request.date,
            "start_time": w.start_time.format("%H:%M:%S").to_string(),
            "end_time": w.end_time.format("%H:%M:%S").to_string(),
            "fee": w.fee,
            "is_available": true,
            "created_at": now.to_rfc3339(),
            "updated_at": now.to_rfc3339()
        })).collect();

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::POST,
            "/rest/v1/slots",
            Some(auth_token),
            Some(Value::Array(rows)),
            Some(headers),
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        let slots = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slots: {}", e)))?;

        Ok(slots)
    }

    /// All windows for a (doctor, date), reserved ones included.
    async fn fetch_day(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        let path = format!(
            "/rest/v1/slots?doctor_id=eq.{}&slot_date=eq.{}&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slots: {}", e)))
    }
}

/// Drop windows that have already started when listing the current day.
/// Pure so the midnight-boundary cases are testable with a fixed clock.
fn filter_elapsed(slots: Vec<Slot>, date: NaiveDate, now: DateTime<Utc>) -> Vec<Slot> {
    if date != now.date_naive() {
        return slots;
    }
    let now_time = now.time();
    slots.into_iter().filter(|s| s.start_time > now_time).collect()
}

#[async_trait]
impl SlotLedger for SupabaseSlotLedger {
    async fn get(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, SlotError> {
        let path = format!("/rest/v1/slots?id=eq.{}", slot_id);
        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            return Err(SlotError::NotFound);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    async fn list_available(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        debug!("Listing available slots for doctor {} on {}", doctor_id, date);

        let path = format!(
            "/rest/v1/slots?doctor_id=eq.{}&slot_date=eq.{}&is_available=eq.true&order=start_time.asc",
            doctor_id, date
        );

        let result: Vec<Value> = self.supabase.request(
            Method::GET,
            &path,
            Some(auth_token),
            None,
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        let slots = result.into_iter()
            .map(serde_json::from_value)
            .collect::<Result<Vec<Slot>, _>>()
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slots: {}", e)))?;

        Ok(filter_elapsed(slots, date, Utc::now()))
    }

    async fn reserve(&self, slot_id: Uuid, auth_token: &str) -> Result<Slot, SlotError> {
        debug!("Reserving slot {}", slot_id);

        // The is_available filter makes this a compare-and-set: PostgREST only
        // updates rows matching the filter, and with return=representation an
        // empty result means another reservation got there first.
        let path = format!("/rest/v1/slots?id=eq.{}&is_available=eq.true", slot_id);
        let body = json!({
            "is_available": false,
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(headers),
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            warn!("Reservation lost the race for slot {}", slot_id);
            return Err(SlotError::AlreadyReserved);
        }

        serde_json::from_value(result[0].clone())
            .map_err(|e| SlotError::DatabaseError(format!("Failed to parse slot: {}", e)))
    }

    async fn release(&self, slot_id: Uuid, auth_token: &str) -> Result<(), SlotError> {
        debug!("Releasing slot {}", slot_id);

        let path = format!("/rest/v1/slots?id=eq.{}", slot_id);
        let body = json!({
            "is_available": true,
            "updated_at": Utc::now().to_rfc3339()
        });

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("Prefer", reqwest::header::HeaderValue::from_static("return=representation"));

        let result: Vec<Value> = self.supabase.request_with_headers(
            Method::PATCH,
            &path,
            Some(auth_token),
            Some(body),
            Some(headers),
        ).await.map_err(|e| SlotError::DatabaseError(e.to_string()))?;

        if result.is_empty() {
            // Unknown slot id; releasing is idempotent so this is not an error.
            debug!("Release of slot {} matched no row", slot_id);
        }

        Ok(())
    }
}
