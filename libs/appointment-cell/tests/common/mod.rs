// In-memory fakes for the injected collaborator traits, so lifecycle tests
// exercise the real protocol against deterministic state.
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentPatch, AppointmentStatus, LifecycleEvent,
    SettlementIntentType,
};
use appointment_cell::services::lifecycle::AppointmentLifecycleService;
use appointment_cell::services::notify::NotificationSender;
use appointment_cell::services::settlement::SettlementNotifier;
use appointment_cell::services::store::AppointmentStore;
use availability_cell::models::{Slot, SlotError};
use availability_cell::services::ledger::SlotLedger;

pub const TOKEN: &str = "test-token";

#[derive(Default)]
pub struct InMemorySlotLedger {
    slots: Mutex<HashMap<Uuid, Slot>>,
}

impl InMemorySlotLedger {
    pub fn add_slot(&self, doctor_id: Uuid, date: NaiveDate, start: &str, end: &str) -> Slot {
        let now = Utc::now();
        let slot = Slot {
            id: Uuid::new_v4(),
            doctor_id,
            slot_date: date,
            start_time: NaiveTime::parse_from_str(start, "%H:%M").unwrap(),
            end_time: NaiveTime::parse_from_str(end, "%H:%M").unwrap(),
            fee: 45.0,
            is_available: true,
            created_at: now,
            updated_at: now,
        };
        self.slots.lock().unwrap().insert(slot.id, slot.clone());
        slot
    }

    pub fn is_available(&self, slot_id: Uuid) -> bool {
        self.slots.lock().unwrap().get(&slot_id).map(|s| s.is_available).unwrap_or(false)
    }
}

#[async_trait]
impl SlotLedger for InMemorySlotLedger {
    async fn get(&self, slot_id: Uuid, _auth_token: &str) -> Result<Slot, SlotError> {
        self.slots
            .lock()
            .unwrap()
            .get(&slot_id)
            .cloned()
            .ok_or(SlotError::NotFound)
    }

    async fn list_available(
        &self,
        doctor_id: Uuid,
        date: NaiveDate,
        _auth_token: &str,
    ) -> Result<Vec<Slot>, SlotError> {
        Ok(self
            .slots
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.doctor_id == doctor_id && s.slot_date == date && s.is_available)
            .cloned()
            .collect())
    }

    async fn reserve(&self, slot_id: Uuid, _auth_token: &str) -> Result<Slot, SlotError> {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.get_mut(&slot_id).ok_or(SlotError::NotFound)?;
        if !slot.is_available {
            return Err(SlotError::AlreadyReserved);
        }
        slot.is_available = false;
        slot.updated_at = Utc::now();
        Ok(slot.clone())
    }

    async fn release(&self, slot_id: Uuid, _auth_token: &str) -> Result<(), SlotError> {
        if let Some(slot) = self.slots.lock().unwrap().get_mut(&slot_id) {
            slot.is_available = true;
            slot.updated_at = Utc::now();
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAppointmentStore {
    records: Mutex<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn count(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn insert(
        &self,
        appointment: &Appointment,
        _auth_token: &str,
    ) -> Result<Appointment, AppointmentError> {
        self.records
            .lock()
            .unwrap()
            .insert(appointment.id, appointment.clone());
        Ok(appointment.clone())
    }

    async fn fetch(&self, id: Uuid, _auth_token: &str) -> Result<Appointment, AppointmentError> {
        self.records
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(AppointmentError::NotFound)
    }

    async fn update_guarded(
        &self,
        id: Uuid,
        expected_status: AppointmentStatus,
        patch: &AppointmentPatch,
        _auth_token: &str,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(&id) else {
            return Ok(None);
        };
        if record.status != expected_status {
            return Ok(None);
        }
        patch.apply_to(record);
        Ok(Some(record.clone()))
    }

    async fn list_for_patient(
        &self,
        patient_id: Uuid,
        _auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.patient_id == patient_id)
            .cloned()
            .collect())
    }

    async fn list_for_doctor(
        &self,
        doctor_id: Uuid,
        _auth_token: &str,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.doctor_id == doctor_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct RecordingSettlementNotifier {
    intents: Mutex<Vec<(Uuid, SettlementIntentType)>>,
}

impl RecordingSettlementNotifier {
    pub fn intents_for(&self, appointment_id: Uuid) -> Vec<SettlementIntentType> {
        self.intents
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| *id == appointment_id)
            .map(|(_, intent)| *intent)
            .collect()
    }
}

#[async_trait]
impl SettlementNotifier for RecordingSettlementNotifier {
    async fn settle(
        &self,
        appointment: &Appointment,
        intent_type: SettlementIntentType,
    ) -> Result<(), AppointmentError> {
        self.intents
            .lock()
            .unwrap()
            .push((appointment.id, intent_type));
        Ok(())
    }
}

pub struct RecordingNotificationSender {
    events: Mutex<Vec<(Uuid, LifecycleEvent)>>,
    fail: bool,
}

impl RecordingNotificationSender {
    pub fn new() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: false }
    }

    pub fn failing() -> Self {
        Self { events: Mutex::new(Vec::new()), fail: true }
    }

    pub fn events(&self) -> Vec<(Uuid, LifecycleEvent)> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationSender for RecordingNotificationSender {
    async fn notify(
        &self,
        party_id: Uuid,
        event: LifecycleEvent,
        _appointment: &Appointment,
    ) -> Result<(), AppointmentError> {
        if self.fail {
            return Err(AppointmentError::ExternalServiceError(
                "notification channel down".to_string(),
            ));
        }
        self.events.lock().unwrap().push((party_id, event));
        Ok(())
    }
}

pub struct Harness {
    pub slots: Arc<InMemorySlotLedger>,
    pub store: Arc<InMemoryAppointmentStore>,
    pub settlement: Arc<RecordingSettlementNotifier>,
    pub notifier: Arc<RecordingNotificationSender>,
    pub service: AppointmentLifecycleService,
}

pub fn harness() -> Harness {
    build_harness(RecordingNotificationSender::new())
}

pub fn harness_with_failing_notifier() -> Harness {
    build_harness(RecordingNotificationSender::failing())
}

fn build_harness(notifier: RecordingNotificationSender) -> Harness {
    let slots = Arc::new(InMemorySlotLedger::default());
    let store = Arc::new(InMemoryAppointmentStore::default());
    let settlement = Arc::new(RecordingSettlementNotifier::default());
    let notifier = Arc::new(notifier);

    let service = AppointmentLifecycleService::new(
        slots.clone(),
        store.clone(),
        settlement.clone(),
        notifier.clone(),
    );

    Harness { slots, store, settlement, notifier, service }
}
