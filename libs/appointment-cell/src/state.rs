// libs/appointment-cell/src/state.rs
//
// The appointment state machine. Every lifecycle mutation is expressed as a
// command applied to the current record by `transition`, which pattern-matches
// (status, command, actor role) exhaustively and returns the field patch plus
// the side effects the caller must run. Illegal combinations come back as
// typed errors instead of being scattered across handler conditionals.

use uuid::Uuid;

use crate::models::{
    Actor, ActorRole, Appointment, AppointmentError, AppointmentPatch, AppointmentStatus,
    CancelledBy, LifecycleEvent, PaymentResult, PaymentStatus, RescheduleProposal,
    SettlementIntentType,
};

#[derive(Debug, Clone)]
pub enum LifecycleCommand {
    Approve,
    Reject { reason: String },
    Cancel { reason: String },
    ProposeReschedule { proposal: RescheduleProposal },
    AcceptReschedule,
    RejectReschedule { reason: String },
    Complete { notes: Option<String> },
    RecordPaymentResult { result: PaymentResult },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    ReleaseSlot(Uuid),
    Settle(SettlementIntentType),
    Notify(LifecycleEvent),
}

#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub patch: AppointmentPatch,
    pub effects: Vec<SideEffect>,
}

/// Role gate, checked before anything else. A patient can never invoke a
/// doctor-only command regardless of which appointment it targets; ownership
/// (the acting id matching the record) is the controller's concern.
fn check_role(command: &LifecycleCommand, role: ActorRole) -> Result<(), AppointmentError> {
    let allowed = match command {
        LifecycleCommand::Approve
        | LifecycleCommand::Reject { .. }
        | LifecycleCommand::ProposeReschedule { .. }
        | LifecycleCommand::Complete { .. } => role == ActorRole::Doctor,
        LifecycleCommand::AcceptReschedule
        | LifecycleCommand::RejectReschedule { .. } => role == ActorRole::Patient,
        LifecycleCommand::Cancel { .. } => {
            matches!(role, ActorRole::Patient | ActorRole::Doctor)
        }
        LifecycleCommand::RecordPaymentResult { .. } => role == ActorRole::System,
    };

    if allowed {
        Ok(())
    } else {
        Err(AppointmentError::Unauthorized)
    }
}

fn require_reason(reason: &str) -> Result<String, AppointmentError> {
    let trimmed = reason.trim();
    if trimmed.is_empty() {
        return Err(AppointmentError::ValidationError(
            "A reason is required".to_string(),
        ));
    }
    Ok(trimmed.to_string())
}

pub fn transition(
    appointment: &Appointment,
    command: LifecycleCommand,
    role: ActorRole,
) -> Result<TransitionOutcome, AppointmentError> {
    use AppointmentStatus::*;

    check_role(&command, role)?;

    let status = appointment.status;

    match command {
        LifecycleCommand::Approve => match status {
            Pending if appointment.payment_status == PaymentStatus::Paid => {
                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(Confirmed),
                        ..Default::default()
                    },
                    effects: vec![SideEffect::Notify(LifecycleEvent::Approved)],
                })
            }
            Pending => Err(AppointmentError::PaymentRequired),
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::Reject { reason } => match status {
            Pending => {
                let reason = require_reason(&reason)?;
                let mut effects = vec![SideEffect::ReleaseSlot(appointment.slot_id)];
                let mut payment_status = None;
                if appointment.payment_status == PaymentStatus::Paid {
                    effects.push(SideEffect::Settle(SettlementIntentType::Refund));
                    payment_status = Some(PaymentStatus::Refunded);
                }
                effects.push(SideEffect::Notify(LifecycleEvent::Rejected));

                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(Rejected),
                        payment_status,
                        rejection_reason: Some(reason),
                        ..Default::default()
                    },
                    effects,
                })
            }
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::Cancel { reason } => match status {
            Pending | Confirmed | RescheduleRequested => {
                let reason = require_reason(&reason)?;
                let cancelled_by = match role {
                    ActorRole::Patient => CancelledBy::Patient,
                    _ => CancelledBy::Doctor,
                };

                // Release everything currently held: the primary slot and,
                // mid-negotiation, the speculatively reserved candidate.
                let mut effects = vec![SideEffect::ReleaseSlot(appointment.slot_id)];
                if let Some(proposal) = &appointment.reschedule_proposal {
                    effects.push(SideEffect::ReleaseSlot(proposal.slot_id));
                }

                let mut payment_status = None;
                if appointment.payment_status == PaymentStatus::Paid {
                    effects.push(SideEffect::Settle(SettlementIntentType::Refund));
                    payment_status = Some(PaymentStatus::Refunded);
                }
                effects.push(SideEffect::Notify(LifecycleEvent::Cancelled));

                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(Cancelled),
                        payment_status,
                        cancellation_reason: Some(reason),
                        cancelled_by: Some(cancelled_by),
                        reschedule_proposal: Some(None),
                        ..Default::default()
                    },
                    effects,
                })
            }
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::ProposeReschedule { proposal } => match status {
            Confirmed => {
                if proposal.slot_id == appointment.slot_id {
                    return Err(AppointmentError::ValidationError(
                        "Proposed slot must differ from the current one".to_string(),
                    ));
                }

                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(RescheduleRequested),
                        reschedule_proposal: Some(Some(proposal)),
                        ..Default::default()
                    },
                    effects: vec![SideEffect::Notify(LifecycleEvent::RescheduleProposed)],
                })
            }
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::AcceptReschedule => match status {
            RescheduleRequested => {
                let proposal = appointment
                    .reschedule_proposal
                    .as_ref()
                    .ok_or(AppointmentError::InvalidState(status))?;

                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(Confirmed),
                        appointment_date: Some(proposal.date),
                        appointment_time: Some(proposal.time.clone()),
                        slot_id: Some(proposal.slot_id),
                        reschedule_proposal: Some(None),
                        ..Default::default()
                    },
                    effects: vec![
                        SideEffect::ReleaseSlot(appointment.slot_id),
                        SideEffect::Notify(LifecycleEvent::RescheduleAccepted),
                    ],
                })
            }
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::RejectReschedule { reason } => match status {
            RescheduleRequested => {
                let reason = require_reason(&reason)?;
                let proposal = appointment
                    .reschedule_proposal
                    .as_ref()
                    .ok_or(AppointmentError::InvalidState(status))?;

                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        status: Some(Confirmed),
                        reschedule_proposal: Some(None),
                        reschedule_rejection_reason: Some(reason),
                        ..Default::default()
                    },
                    effects: vec![
                        SideEffect::ReleaseSlot(proposal.slot_id),
                        SideEffect::Notify(LifecycleEvent::RescheduleRejected),
                    ],
                })
            }
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::Complete { notes } => match status {
            Confirmed => Ok(TransitionOutcome {
                patch: AppointmentPatch {
                    status: Some(Completed),
                    completion_notes: notes,
                    ..Default::default()
                },
                effects: vec![
                    SideEffect::Settle(SettlementIntentType::Payout),
                    SideEffect::Notify(LifecycleEvent::Completed),
                ],
            }),
            other => Err(AppointmentError::InvalidState(other)),
        },

        LifecycleCommand::RecordPaymentResult { result } => match status {
            Pending | Confirmed | RescheduleRequested => {
                let payment_status = match result {
                    PaymentResult::Paid => PaymentStatus::Paid,
                    PaymentResult::Failed => PaymentStatus::Failed,
                };
                Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        payment_status: Some(payment_status),
                        ..Default::default()
                    },
                    effects: vec![SideEffect::Notify(LifecycleEvent::PaymentUpdated)],
                })
            }
            // A capture that lands after cancellation/rejection raced the
            // terminal transition; the money goes straight back.
            Cancelled | Rejected => match result {
                PaymentResult::Paid => Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        payment_status: Some(PaymentStatus::Refunded),
                        ..Default::default()
                    },
                    effects: vec![SideEffect::Settle(SettlementIntentType::Refund)],
                }),
                PaymentResult::Failed => Ok(TransitionOutcome {
                    patch: AppointmentPatch {
                        payment_status: Some(PaymentStatus::Failed),
                        ..Default::default()
                    },
                    effects: vec![],
                }),
            },
            // Completion implies payment settled at approval time; a late
            // callback here is a duplicate and changes nothing.
            Completed => Ok(TransitionOutcome {
                patch: AppointmentPatch::default(),
                effects: vec![],
            }),
        },
    }
}

/// Ownership gate: the acting id must be the appointment's own counterparty.
pub fn check_ownership(appointment: &Appointment, actor: &Actor) -> Result<(), AppointmentError> {
    let owns = match actor.role {
        ActorRole::Patient => actor.id == appointment.patient_id,
        ActorRole::Doctor => actor.id == appointment.doctor_id,
        ActorRole::System => true,
    };

    if owns {
        Ok(())
    } else {
        Err(AppointmentError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, Utc};

    fn fixture(status: AppointmentStatus, payment: PaymentStatus) -> Appointment {
        let now = Utc::now();
        Appointment {
            id: Uuid::new_v4(),
            booking_code: "APT-TESTCODE".to_string(),
            patient_id: Uuid::new_v4(),
            doctor_id: Uuid::new_v4(),
            slot_id: Uuid::new_v4(),
            appointment_date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            appointment_time: "10:00 - 10:30".to_string(),
            channel: crate::models::ConsultationChannel::Video,
            status,
            payment_status: payment,
            fee: 45.0,
            reason: "persistent headaches".to_string(),
            rejection_reason: None,
            cancellation_reason: None,
            cancelled_by: None,
            reschedule_proposal: None,
            reschedule_rejection_reason: None,
            completion_notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn proposal() -> RescheduleProposal {
        RescheduleProposal {
            slot_id: Uuid::new_v4(),
            date: NaiveDate::from_ymd_opt(2024, 6, 10).unwrap(),
            time: "11:00 - 11:30".to_string(),
            proposed_by: ActorRole::Doctor,
        }
    }

    fn negotiating(payment: PaymentStatus) -> Appointment {
        let mut appointment = fixture(AppointmentStatus::RescheduleRequested, payment);
        appointment.reschedule_proposal = Some(proposal());
        appointment
    }

    #[test]
    fn approve_requires_captured_payment() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Pending);
        assert_matches!(
            transition(&appointment, LifecycleCommand::Approve, ActorRole::Doctor),
            Err(AppointmentError::PaymentRequired)
        );

        let paid = fixture(AppointmentStatus::Pending, PaymentStatus::Paid);
        let outcome = transition(&paid, LifecycleCommand::Approve, ActorRole::Doctor).unwrap();
        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Confirmed));
        assert!(!outcome.effects.iter().any(|e| matches!(e, SideEffect::ReleaseSlot(_))));
    }

    #[test]
    fn doctor_only_commands_refuse_patients() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Paid);
        assert_matches!(
            transition(&appointment, LifecycleCommand::Approve, ActorRole::Patient),
            Err(AppointmentError::Unauthorized)
        );

        let confirmed = fixture(AppointmentStatus::Confirmed, PaymentStatus::Paid);
        assert_matches!(
            transition(&confirmed, LifecycleCommand::Complete { notes: None }, ActorRole::Patient),
            Err(AppointmentError::Unauthorized)
        );
    }

    #[test]
    fn patient_only_commands_refuse_doctors() {
        let appointment = negotiating(PaymentStatus::Paid);
        assert_matches!(
            transition(&appointment, LifecycleCommand::AcceptReschedule, ActorRole::Doctor),
            Err(AppointmentError::Unauthorized)
        );
    }

    #[test]
    fn terminal_states_admit_no_lifecycle_command() {
        let commands: Vec<(LifecycleCommand, ActorRole)> = vec![
            (LifecycleCommand::Approve, ActorRole::Doctor),
            (LifecycleCommand::Reject { reason: "late".into() }, ActorRole::Doctor),
            (LifecycleCommand::Cancel { reason: "late".into() }, ActorRole::Patient),
            (
                LifecycleCommand::ProposeReschedule { proposal: proposal() },
                ActorRole::Doctor,
            ),
            (LifecycleCommand::AcceptReschedule, ActorRole::Patient),
            (
                LifecycleCommand::RejectReschedule { reason: "no".into() },
                ActorRole::Patient,
            ),
            (LifecycleCommand::Complete { notes: None }, ActorRole::Doctor),
        ];

        for terminal in [
            AppointmentStatus::Completed,
            AppointmentStatus::Cancelled,
            AppointmentStatus::Rejected,
        ] {
            let appointment = fixture(terminal, PaymentStatus::Paid);
            for (command, role) in &commands {
                assert_matches!(
                    transition(&appointment, command.clone(), *role),
                    Err(AppointmentError::InvalidState(s)) if s == terminal,
                    "{:?} should be rejected in {:?}",
                    command,
                    terminal
                );
            }
        }
    }

    #[test]
    fn reject_and_cancel_require_a_reason() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Pending);

        assert_matches!(
            transition(
                &appointment,
                LifecycleCommand::Reject { reason: "".into() },
                ActorRole::Doctor
            ),
            Err(AppointmentError::ValidationError(_))
        );
        assert_matches!(
            transition(
                &appointment,
                LifecycleCommand::Cancel { reason: "   ".into() },
                ActorRole::Patient
            ),
            Err(AppointmentError::ValidationError(_))
        );
    }

    #[test]
    fn reject_after_capture_refunds() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Paid);
        let outcome = transition(
            &appointment,
            LifecycleCommand::Reject { reason: "fully booked".into() },
            ActorRole::Doctor,
        )
        .unwrap();

        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Rejected));
        assert_eq!(outcome.patch.payment_status, Some(PaymentStatus::Refunded));
        assert!(outcome.effects.contains(&SideEffect::ReleaseSlot(appointment.slot_id)));
        assert!(outcome
            .effects
            .contains(&SideEffect::Settle(SettlementIntentType::Refund)));
    }

    #[test]
    fn cancel_during_negotiation_releases_both_slots() {
        let appointment = negotiating(PaymentStatus::Paid);
        let candidate = appointment.reschedule_proposal.as_ref().unwrap().slot_id;

        let outcome = transition(
            &appointment,
            LifecycleCommand::Cancel { reason: "travelling".into() },
            ActorRole::Patient,
        )
        .unwrap();

        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Cancelled));
        assert_eq!(outcome.patch.cancelled_by, Some(CancelledBy::Patient));
        assert!(outcome.effects.contains(&SideEffect::ReleaseSlot(appointment.slot_id)));
        assert!(outcome.effects.contains(&SideEffect::ReleaseSlot(candidate)));
    }

    #[test]
    fn propose_requires_a_different_slot() {
        let appointment = fixture(AppointmentStatus::Confirmed, PaymentStatus::Paid);
        let mut same_slot = proposal();
        same_slot.slot_id = appointment.slot_id;

        assert_matches!(
            transition(
                &appointment,
                LifecycleCommand::ProposeReschedule { proposal: same_slot },
                ActorRole::Doctor
            ),
            Err(AppointmentError::ValidationError(_))
        );
    }

    #[test]
    fn accept_reschedule_adopts_the_candidate_window() {
        let appointment = negotiating(PaymentStatus::Paid);
        let proposal = appointment.reschedule_proposal.clone().unwrap();

        let outcome =
            transition(&appointment, LifecycleCommand::AcceptReschedule, ActorRole::Patient)
                .unwrap();

        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(outcome.patch.slot_id, Some(proposal.slot_id));
        assert_eq!(outcome.patch.appointment_time, Some(proposal.time));
        assert_eq!(outcome.patch.reschedule_proposal, Some(None));
        assert!(outcome.effects.contains(&SideEffect::ReleaseSlot(appointment.slot_id)));
    }

    #[test]
    fn reject_reschedule_keeps_the_original_window() {
        let appointment = negotiating(PaymentStatus::Paid);
        let candidate = appointment.reschedule_proposal.as_ref().unwrap().slot_id;

        let outcome = transition(
            &appointment,
            LifecycleCommand::RejectReschedule { reason: "conflict".into() },
            ActorRole::Patient,
        )
        .unwrap();

        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Confirmed));
        assert_eq!(outcome.patch.slot_id, None);
        assert_eq!(outcome.patch.appointment_date, None);
        assert_eq!(outcome.patch.reschedule_proposal, Some(None));
        assert!(outcome.effects.contains(&SideEffect::ReleaseSlot(candidate)));
        assert!(!outcome.effects.contains(&SideEffect::ReleaseSlot(appointment.slot_id)));
    }

    #[test]
    fn complete_emits_a_payout() {
        let appointment = fixture(AppointmentStatus::Confirmed, PaymentStatus::Paid);
        let outcome = transition(
            &appointment,
            LifecycleCommand::Complete { notes: Some("follow up in two weeks".into()) },
            ActorRole::Doctor,
        )
        .unwrap();

        assert_eq!(outcome.patch.status, Some(AppointmentStatus::Completed));
        assert!(outcome
            .effects
            .contains(&SideEffect::Settle(SettlementIntentType::Payout)));
        // The held slot was consumed, not freed for rebooking.
        assert!(!outcome.effects.iter().any(|e| matches!(e, SideEffect::ReleaseSlot(_))));
    }

    #[test]
    fn capture_landing_after_cancellation_is_refunded() {
        let appointment = fixture(AppointmentStatus::Cancelled, PaymentStatus::Pending);
        let outcome = transition(
            &appointment,
            LifecycleCommand::RecordPaymentResult { result: PaymentResult::Paid },
            ActorRole::System,
        )
        .unwrap();

        assert_eq!(outcome.patch.payment_status, Some(PaymentStatus::Refunded));
        assert!(outcome
            .effects
            .contains(&SideEffect::Settle(SettlementIntentType::Refund)));
    }

    #[test]
    fn payment_result_needs_the_service_role() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Pending);
        assert_matches!(
            transition(
                &appointment,
                LifecycleCommand::RecordPaymentResult { result: PaymentResult::Paid },
                ActorRole::Patient
            ),
            Err(AppointmentError::Unauthorized)
        );
    }

    #[test]
    fn ownership_is_checked_per_counterparty() {
        let appointment = fixture(AppointmentStatus::Pending, PaymentStatus::Pending);

        assert!(check_ownership(&appointment, &Actor::patient(appointment.patient_id)).is_ok());
        assert!(check_ownership(&appointment, &Actor::doctor(appointment.doctor_id)).is_ok());
        assert_matches!(
            check_ownership(&appointment, &Actor::patient(Uuid::new_v4())),
            Err(AppointmentError::Unauthorized)
        );
        assert_matches!(
            check_ownership(&appointment, &Actor::doctor(Uuid::new_v4())),
            Err(AppointmentError::Unauthorized)
        );
    }
}
