// libs/appointment-cell/src/models.rs
use chrono::{DateTime, NaiveDate, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

/// One booking's full lifecycle record. Never physically deleted; terminal
/// states are retained for history and the settlement ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    /// Human-facing short id, distinct from the storage id.
    pub booking_code: String,
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    /// The currently held (or, in terminal states, formerly held) slot.
    pub slot_id: Uuid,
    pub appointment_date: NaiveDate,
    /// Window label copied from the slot, e.g. "10:00 - 10:30".
    pub appointment_time: String,
    pub channel: ConsultationChannel,
    pub status: AppointmentStatus,
    pub payment_status: PaymentStatus,
    pub fee: f64,
    pub reason: String,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub reschedule_proposal: Option<RescheduleProposal>,
    pub reschedule_rejection_reason: Option<String>,
    pub completion_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    RescheduleRequested,
    Completed,
    Cancelled,
    Rejected,
}

impl AppointmentStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AppointmentStatus::Completed
                | AppointmentStatus::Cancelled
                | AppointmentStatus::Rejected
        )
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Pending => write!(f, "pending"),
            AppointmentStatus::Confirmed => write!(f, "confirmed"),
            AppointmentStatus::RescheduleRequested => write!(f, "reschedule_requested"),
            AppointmentStatus::Completed => write!(f, "completed"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
            AppointmentStatus::Rejected => write!(f, "rejected"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Paid => write!(f, "paid"),
            PaymentStatus::Failed => write!(f, "failed"),
            PaymentStatus::Refunded => write!(f, "refunded"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConsultationChannel {
    Video,
    Chat,
}

impl fmt::Display for ConsultationChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConsultationChannel::Video => write!(f, "video"),
            ConsultationChannel::Chat => write!(f, "chat"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelledBy {
    Patient,
    Doctor,
}

/// Who is acting on an appointment. `System` is reserved for
/// service-to-service callers such as the wallet collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Patient,
    Doctor,
    System,
}

#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
    pub role: ActorRole,
}

impl Actor {
    pub fn patient(id: Uuid) -> Self {
        Self { id, role: ActorRole::Patient }
    }

    pub fn doctor(id: Uuid) -> Self {
        Self { id, role: ActorRole::Doctor }
    }

    pub fn system() -> Self {
        Self { id: Uuid::nil(), role: ActorRole::System }
    }
}

/// A doctor-initiated request to move a confirmed appointment to a different
/// slot. At most one outstanding proposal per appointment; its presence is
/// coupled to `status = reschedule_requested`. The candidate slot is held
/// from the moment the proposal is made.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RescheduleProposal {
    pub slot_id: Uuid,
    pub date: NaiveDate,
    pub time: String,
    pub proposed_by: ActorRole,
}

/// Outcome reported back by the payment collaborator for a capture intent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentResult {
    Paid,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SettlementIntentType {
    Capture,
    Refund,
    Payout,
}

impl fmt::Display for SettlementIntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementIntentType::Capture => write!(f, "capture"),
            SettlementIntentType::Refund => write!(f, "refund"),
            SettlementIntentType::Payout => write!(f, "payout"),
        }
    }
}

/// Lifecycle events fanned out to both parties, best effort.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Booked,
    Approved,
    Rejected,
    Cancelled,
    RescheduleProposed,
    RescheduleAccepted,
    RescheduleRejected,
    Completed,
    PaymentUpdated,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAppointmentRequest {
    pub patient_id: Uuid,
    pub doctor_id: Uuid,
    pub slot_id: Uuid,
    pub channel: ConsultationChannel,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteAppointmentRequest {
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposeRescheduleRequest {
    pub slot_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RejectRescheduleRequest {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentResultRequest {
    pub result: PaymentResult,
}

// ==============================================================================
// FIELD-LEVEL PATCH
// ==============================================================================

/// Field updates produced by a transition and applied as one guarded write.
/// `reschedule_proposal` is doubly optional so a transition can distinguish
/// "leave as is" (None) from "clear" (Some(None)).
#[derive(Debug, Clone, Default)]
pub struct AppointmentPatch {
    pub status: Option<AppointmentStatus>,
    pub payment_status: Option<PaymentStatus>,
    pub appointment_date: Option<NaiveDate>,
    pub appointment_time: Option<String>,
    pub slot_id: Option<Uuid>,
    pub rejection_reason: Option<String>,
    pub cancellation_reason: Option<String>,
    pub cancelled_by: Option<CancelledBy>,
    pub reschedule_proposal: Option<Option<RescheduleProposal>>,
    pub reschedule_rejection_reason: Option<String>,
    pub completion_notes: Option<String>,
}

impl AppointmentPatch {
    pub fn apply_to(&self, appointment: &mut Appointment) {
        if let Some(status) = self.status {
            appointment.status = status;
        }
        if let Some(payment_status) = self.payment_status {
            appointment.payment_status = payment_status;
        }
        if let Some(date) = self.appointment_date {
            appointment.appointment_date = date;
        }
        if let Some(ref time) = self.appointment_time {
            appointment.appointment_time = time.clone();
        }
        if let Some(slot_id) = self.slot_id {
            appointment.slot_id = slot_id;
        }
        if let Some(ref reason) = self.rejection_reason {
            appointment.rejection_reason = Some(reason.clone());
        }
        if let Some(ref reason) = self.cancellation_reason {
            appointment.cancellation_reason = Some(reason.clone());
        }
        if let Some(by) = self.cancelled_by {
            appointment.cancelled_by = Some(by);
        }
        if let Some(ref proposal) = self.reschedule_proposal {
            appointment.reschedule_proposal = proposal.clone();
        }
        if let Some(ref reason) = self.reschedule_rejection_reason {
            appointment.reschedule_rejection_reason = Some(reason.clone());
        }
        if let Some(ref notes) = self.completion_notes {
            appointment.completion_notes = Some(notes.clone());
        }
        appointment.updated_at = Utc::now();
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub enum AppointmentError {
    #[error("Appointment not found")]
    NotFound,

    #[error("Slot no longer available")]
    SlotUnavailable,

    #[error("Not authorized to perform this operation")]
    Unauthorized,

    #[error("Operation not allowed in status {0}")]
    InvalidState(AppointmentStatus),

    #[error("Payment must be captured before approval")]
    PaymentRequired,

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),
}

// ==============================================================================
// HELPERS
// ==============================================================================

/// Short id shown to users and support staff, e.g. `APT-7KQ2M9XC`.
/// Ambiguous characters (0/O, 1/I) are left out of the alphabet.
pub fn generate_booking_code() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
    let mut rng = rand::thread_rng();
    let code: String = (0..8)
        .map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char)
        .collect();
    format!("APT-{}", code)
}
