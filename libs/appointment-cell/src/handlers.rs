// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{
    Actor, ActorRole, AppointmentError, CancelAppointmentRequest, CompleteAppointmentRequest,
    CreateAppointmentRequest, PaymentResultRequest, ProposeRescheduleRequest,
    RejectAppointmentRequest, RejectRescheduleRequest,
};
use crate::services::lifecycle::AppointmentLifecycleService;

fn to_app_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::NotFound => AppError::NotFound("Appointment or slot not found".to_string()),
        AppointmentError::SlotUnavailable => {
            AppError::Conflict("Slot no longer available".to_string())
        }
        AppointmentError::InvalidState(status) => {
            AppError::Conflict(format!("Operation not allowed in status {}", status))
        }
        AppointmentError::PaymentRequired => {
            AppError::PaymentRequired("Payment must be captured before approval".to_string())
        }
        AppointmentError::Unauthorized => {
            AppError::Auth("Not authorized for this appointment".to_string())
        }
        AppointmentError::ValidationError(msg) => AppError::ValidationError(msg),
        AppointmentError::DatabaseError(msg) => AppError::Database(msg),
        AppointmentError::ExternalServiceError(msg) => AppError::ExternalService(msg),
    }
}

/// Build the acting identity from the JWT user, insisting on the given role.
fn actor_with_role(user: &User, role: ActorRole) -> Result<Actor, AppError> {
    let role_matches = match role {
        ActorRole::Patient => user.is_patient(),
        ActorRole::Doctor => user.is_doctor(),
        ActorRole::System => user.is_service(),
    };
    if !role_matches {
        return Err(AppError::Auth("Operation not permitted for this role".to_string()));
    }

    let id = Uuid::parse_str(&user.id)
        .map_err(|_| AppError::Auth("Invalid subject claim".to_string()))?;

    Ok(Actor { id, role })
}

/// Either counterparty role, for read paths and cancellation.
fn actor_from_user(user: &User) -> Result<Actor, AppError> {
    if user.is_patient() {
        actor_with_role(user, ActorRole::Patient)
    } else if user.is_doctor() {
        actor_with_role(user, ActorRole::Doctor)
    } else {
        Err(AppError::Auth("Operation not permitted for this role".to_string()))
    }
}

#[axum::debug_handler]
pub async fn create_appointment(
    State(state): State<Arc<AppConfig>>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CreateAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Patient)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .create(request, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment requested; awaiting payment and doctor approval"
    })))
}

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .get(appointment_id, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn approve_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Doctor)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .approve(appointment_id, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment confirmed"
    })))
}

#[axum::debug_handler]
pub async fn reject_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RejectAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Doctor)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .reject(appointment_id, &actor, request.reason, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment rejected"
    })))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CancelAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_from_user(&user)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .cancel(appointment_id, &actor, request.reason, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled"
    })))
}

#[axum::debug_handler]
pub async fn complete_appointment(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<CompleteAppointmentRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Doctor)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .complete(appointment_id, &actor, request.notes, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Consultation completed"
    })))
}

#[axum::debug_handler]
pub async fn propose_reschedule(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<ProposeRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Doctor)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .propose_reschedule(appointment_id, &actor, request.slot_id, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Reschedule proposed; awaiting patient response"
    })))
}

#[axum::debug_handler]
pub async fn accept_reschedule(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Patient)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .accept_reschedule(appointment_id, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Reschedule accepted"
    })))
}

#[axum::debug_handler]
pub async fn reject_reschedule(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<RejectRescheduleRequest>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Patient)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .reject_reschedule(appointment_id, &actor, request.reason, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Reschedule declined; original time kept"
    })))
}

/// Wallet collaborator callback reporting a capture outcome.
#[axum::debug_handler]
pub async fn record_payment_result(
    State(state): State<Arc<AppConfig>>,
    Path(appointment_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<PaymentResultRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_service() {
        return Err(AppError::Auth("Operation not permitted for this role".to_string()));
    }
    let service = AppointmentLifecycleService::from_config(&state);

    let appointment = service
        .record_payment_result(appointment_id, request.result, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment
    })))
}

#[axum::debug_handler]
pub async fn get_patient_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(patient_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Patient)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointments = service
        .list_for_patient(patient_id, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointments": appointments
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_appointments(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
) -> Result<Json<Value>, AppError> {
    let actor = actor_with_role(&user, ActorRole::Doctor)?;
    let service = AppointmentLifecycleService::from_config(&state);

    let appointments = service
        .list_for_doctor(doctor_id, &actor, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointments": appointments
    })))
}
