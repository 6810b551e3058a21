// libs/appointment-cell/src/services/lifecycle.rs
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use availability_cell::models::SlotError;
use availability_cell::services::ledger::{SlotLedger, SupabaseSlotLedger};
use shared_config::AppConfig;

use crate::models::{
    Actor, ActorRole, Appointment, AppointmentError, AppointmentStatus,
    CreateAppointmentRequest, LifecycleEvent, PaymentResult, PaymentStatus, RescheduleProposal,
    SettlementIntentType, generate_booking_code,
};
use crate::services::notify::{HttpNotificationSender, NotificationSender};
use crate::services::settlement::{HttpSettlementNotifier, SettlementNotifier};
use crate::services::store::{AppointmentStore, SupabaseAppointmentStore};
use crate::state::{check_ownership, transition, LifecycleCommand, SideEffect};

fn from_slot_error(e: SlotError) -> AppointmentError {
    match e {
        SlotError::NotFound => AppointmentError::NotFound,
        SlotError::AlreadyReserved => AppointmentError::SlotUnavailable,
        SlotError::InvalidWindow(msg) => AppointmentError::ValidationError(msg),
        SlotError::Overlapping => {
            AppointmentError::ValidationError("Slot overlaps an existing window".to_string())
        }
        SlotError::DatabaseError(msg) => AppointmentError::DatabaseError(msg),
    }
}

/// Owns every valid state transition of an appointment. All collaborators are
/// injected so the protocol can be exercised against fakes; `from_config`
/// wires the Supabase-backed and HTTP-backed implementations used in
/// production handlers.
pub struct AppointmentLifecycleService {
    slots: Arc<dyn SlotLedger>,
    store: Arc<dyn AppointmentStore>,
    settlement: Arc<dyn SettlementNotifier>,
    notifier: Arc<dyn NotificationSender>,
}

impl AppointmentLifecycleService {
    pub fn new(
        slots: Arc<dyn SlotLedger>,
        store: Arc<dyn AppointmentStore>,
        settlement: Arc<dyn SettlementNotifier>,
        notifier: Arc<dyn NotificationSender>,
    ) -> Self {
        Self { slots, store, settlement, notifier }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(SupabaseSlotLedger::new(config)),
            Arc::new(SupabaseAppointmentStore::new(config)),
            Arc::new(HttpSettlementNotifier::new(config)),
            Arc::new(HttpNotificationSender::new(config)),
        )
    }

    /// Book a slot for a patient. The reservation is the linearization point:
    /// the appointment row is only written once the slot CAS has succeeded,
    /// so two racing bookings can never both hold the same window.
    pub async fn create(
        &self,
        request: CreateAppointmentRequest,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        info!("Booking slot {} for patient {}", request.slot_id, request.patient_id);

        if actor.role != ActorRole::Patient || actor.id != request.patient_id {
            return Err(AppointmentError::Unauthorized);
        }

        let slot = self.slots.get(request.slot_id, auth_token).await.map_err(from_slot_error)?;
        if slot.doctor_id != request.doctor_id {
            return Err(AppointmentError::ValidationError(
                "Slot does not belong to the requested doctor".to_string(),
            ));
        }

        let reserved = self.slots.reserve(request.slot_id, auth_token).await.map_err(from_slot_error)?;

        let now = Utc::now();
        let appointment = Appointment {
            id: Uuid::new_v4(),
            booking_code: generate_booking_code(),
            patient_id: request.patient_id,
            doctor_id: request.doctor_id,
            slot_id: reserved.id,
            appointment_date: reserved.slot_date,
            appointment_time: reserved.window_label(),
            channel: request.channel,
            status: AppointmentStatus::Pending,
            payment_status: PaymentStatus::Pending,
            fee: reserved.fee,
            reason: request.reason,
            rejection_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            reschedule_proposal: None,
            reschedule_rejection_reason: None,
            completion_notes: None,
            created_at: now,
            updated_at: now,
        };

        let created = self.store.insert(&appointment, auth_token).await?;

        // Capture is delegated to the wallet collaborator; approval stays
        // blocked until it reports back a paid status.
        self.run_effects(
            &created,
            &[
                SideEffect::Settle(SettlementIntentType::Capture),
                SideEffect::Notify(LifecycleEvent::Booked),
            ],
            auth_token,
        ).await;

        info!("Appointment {} created as {}", created.id, created.booking_code);
        Ok(created)
    }

    pub async fn approve(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(appointment_id, actor, LifecycleCommand::Approve, auth_token).await
    }

    pub async fn reject(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        reason: String,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(appointment_id, actor, LifecycleCommand::Reject { reason }, auth_token).await
    }

    pub async fn cancel(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        reason: String,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(appointment_id, actor, LifecycleCommand::Cancel { reason }, auth_token).await
    }

    pub async fn complete(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        notes: Option<String>,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(appointment_id, actor, LifecycleCommand::Complete { notes }, auth_token).await
    }

    /// Doctor proposes moving a confirmed appointment to a candidate slot.
    /// The candidate is reserved up front so nobody grabs it during the
    /// negotiation; the original stays held until the proposal resolves.
    pub async fn propose_reschedule(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        candidate_slot_id: Uuid,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let current = self.store.fetch(appointment_id, auth_token).await?;
        check_ownership(&current, actor)?;

        if current.status != AppointmentStatus::Confirmed {
            return Err(AppointmentError::InvalidState(current.status));
        }
        if candidate_slot_id == current.slot_id {
            return Err(AppointmentError::ValidationError(
                "Proposed slot must differ from the current one".to_string(),
            ));
        }

        let candidate = self.slots.get(candidate_slot_id, auth_token).await.map_err(from_slot_error)?;
        if candidate.doctor_id != current.doctor_id {
            return Err(AppointmentError::ValidationError(
                "Proposed slot belongs to another doctor".to_string(),
            ));
        }

        let reserved = self.slots.reserve(candidate_slot_id, auth_token).await.map_err(from_slot_error)?;

        let proposal = RescheduleProposal {
            slot_id: reserved.id,
            date: reserved.slot_date,
            time: reserved.window_label(),
            proposed_by: ActorRole::Doctor,
        };

        let outcome = transition(
            &current,
            LifecycleCommand::ProposeReschedule { proposal },
            actor.role,
        )?;

        match self.store.update_guarded(appointment_id, current.status, &outcome.patch, auth_token).await? {
            Some(updated) => {
                self.run_effects(&updated, &outcome.effects, auth_token).await;
                info!("Reschedule proposed for appointment {}", appointment_id);
                Ok(updated)
            }
            None => {
                // The appointment moved under us; the speculative hold on the
                // candidate has nothing referencing it and must be undone.
                if let Err(e) = self.slots.release(candidate_slot_id, auth_token).await {
                    error!("Failed to release candidate slot {}: {}", candidate_slot_id, e);
                }
                let fresh = self.store.fetch(appointment_id, auth_token).await?;
                warn!("Reschedule proposal lost a status race on appointment {}", appointment_id);
                Err(AppointmentError::InvalidState(fresh.status))
            }
        }
    }

    pub async fn accept_reschedule(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(appointment_id, actor, LifecycleCommand::AcceptReschedule, auth_token).await
    }

    pub async fn reject_reschedule(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        reason: String,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.execute(
            appointment_id,
            actor,
            LifecycleCommand::RejectReschedule { reason },
            auth_token,
        ).await
    }

    /// Wallet collaborator reporting the outcome of a capture intent.
    pub async fn record_payment_result(
        &self,
        appointment_id: Uuid,
        result: PaymentResult,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let actor = Actor::system();
        self.execute(
            appointment_id,
            &actor,
            LifecycleCommand::RecordPaymentResult { result },
            auth_token,
        ).await
    }

    pub async fn get(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.store.fetch(appointment_id, auth_token).await?;
        check_ownership(&appointment, actor)?;
        Ok(appointment)
    }

    pub async fn list_for_patient(
        &self,
        patient_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if actor.role != ActorRole::Patient || actor.id != patient_id {
            return Err(AppointmentError::Unauthorized);
        }
        self.store.list_for_patient(patient_id, auth_token).await
    }

    pub async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        actor: &Actor,
        auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        if actor.role != ActorRole::Doctor || actor.id != doctor_id {
            return Err(AppointmentError::Unauthorized);
        }
        self.store.list_for_doctor(doctor_id, auth_token).await
    }

    /// Fetch, authorize, transition, commit, then run side effects. The
    /// guarded write is conditioned on the status read here, so a stale
    /// command surfaces as `InvalidState` rather than a silent overwrite.
    async fn execute(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        command: LifecycleCommand,
        auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        debug!("Executing {:?} on appointment {}", command, appointment_id);

        let current = self.store.fetch(appointment_id, auth_token).await?;
        check_ownership(&current, actor)?;

        let outcome = transition(&current, command, actor.role)?;

        match self.store.update_guarded(appointment_id, current.status, &outcome.patch, auth_token).await? {
            Some(updated) => {
                self.run_effects(&updated, &outcome.effects, auth_token).await;
                info!("Appointment {} moved to {}", appointment_id, updated.status);
                Ok(updated)
            }
            None => {
                let fresh = self.store.fetch(appointment_id, auth_token).await?;
                warn!(
                    "Stale transition on appointment {}: expected {}, found {}",
                    appointment_id, current.status, fresh.status
                );
                Err(AppointmentError::InvalidState(fresh.status))
            }
        }
    }

    /// Side effects run after the transition has committed. None of them may
    /// fail the operation: releases are idempotent, settlement intents are
    /// idempotent at the collaborator, and notifications are best effort by
    /// contract.
    async fn run_effects(&self, appointment: &Appointment, effects: &[SideEffect], auth_token: &str) {
        for effect in effects {
            match effect {
                SideEffect::ReleaseSlot(slot_id) => {
                    if let Err(e) = self.slots.release(*slot_id, auth_token).await {
                        error!("Failed to release slot {}: {}", slot_id, e);
                    }
                }
                SideEffect::Settle(intent_type) => {
                    if let Err(e) = self.settlement.settle(appointment, *intent_type).await {
                        error!(
                            "Failed to emit {} intent for appointment {}: {}",
                            intent_type, appointment.id, e
                        );
                    }
                }
                SideEffect::Notify(event) => {
                    for party in [appointment.patient_id, appointment.doctor_id] {
                        if let Err(e) = self.notifier.notify(party, *event, appointment).await {
                            warn!(
                                "Notification {:?} to {} failed: {}",
                                event, party, e
                            );
                        }
                    }
                }
            }
        }
    }
}
