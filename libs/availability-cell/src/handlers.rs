// libs/availability-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use axum_extra::TypedHeader;
use headers::{authorization::Bearer, Authorization};
use serde_json::{json, Value};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::auth::User;
use shared_models::error::AppError;

use crate::models::{PublishSlotsRequest, SlotError, SlotQuery};
use crate::services::ledger::{SlotLedger, SupabaseSlotLedger};

fn to_app_error(e: SlotError) -> AppError {
    match e {
        SlotError::NotFound => AppError::NotFound("Slot not found".to_string()),
        SlotError::AlreadyReserved => AppError::Conflict("Slot no longer available".to_string()),
        SlotError::InvalidWindow(msg) => AppError::ValidationError(msg),
        SlotError::Overlapping => {
            AppError::Conflict("Window overlaps an existing slot".to_string())
        }
        SlotError::DatabaseError(msg) => AppError::Database(msg),
    }
}

/// Read path for the booking UI: bookable windows for a doctor on a date.
#[axum::debug_handler]
pub async fn list_available_slots(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotQuery>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Value>, AppError> {
    let ledger = SupabaseSlotLedger::new(&state);

    let slots = ledger
        .list_available(doctor_id, query.date, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "slots": slots
    })))
}

/// Doctors publish their own availability windows for a day.
#[axum::debug_handler]
pub async fn publish_slots(
    State(state): State<Arc<AppConfig>>,
    Path(doctor_id): Path<Uuid>,
    TypedHeader(auth): TypedHeader<Authorization<Bearer>>,
    Extension(user): Extension<User>,
    Json(request): Json<PublishSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    if !user.is_doctor() || doctor_id.to_string() != user.id {
        return Err(AppError::Auth(
            "Not authorized to publish slots for this doctor".to_string(),
        ));
    }

    let ledger = SupabaseSlotLedger::new(&state);

    let slots = ledger
        .publish_windows(doctor_id, request, auth.token())
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "slots": slots,
        "message": "Availability published"
    })))
}
