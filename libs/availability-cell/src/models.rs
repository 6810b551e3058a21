// libs/availability-cell/src/models.rs
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A doctor-published, date-scoped time window. Reserved by at most one
/// active appointment at a time; `is_available` is the field the reservation
/// compare-and-set flips.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub slot_date: NaiveDate,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub fee: f64,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    /// Human-facing window label, e.g. "10:00 - 10:30".
    pub fn window_label(&self) -> String {
        format!(
            "{} - {}",
            self.start_time.format("%H:%M"),
            self.end_time.format("%H:%M")
        )
    }

    pub fn overlaps(&self, start: NaiveTime, end: NaiveTime) -> bool {
        self.start_time < end && start < self.end_time
    }
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotWindow {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub fee: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishSlotsRequest {
    pub date: NaiveDate,
    pub windows: Vec<SlotWindow>,
}

#[derive(Debug, Deserialize)]
pub struct SlotQuery {
    pub date: NaiveDate,
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum SlotError {
    #[error("Slot not found")]
    NotFound,

    #[error("Slot already reserved")]
    AlreadyReserved,

    #[error("Invalid slot window: {0}")]
    InvalidWindow(String),

    #[error("Slot overlaps an existing window")]
    Overlapping,

    #[error("Database error: {0}")]
    DatabaseError(String),
}
