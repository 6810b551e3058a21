// libs/availability-cell/src/router.rs
use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};

use shared_config::AppConfig;
use shared_utils::extractor::auth_middleware;

use crate::handlers;

pub fn slot_routes(state: Arc<AppConfig>) -> Router {
    let protected_routes = Router::new()
        .route("/doctors/{doctor_id}", get(handlers::list_available_slots))
        .route("/doctors/{doctor_id}", post(handlers::publish_slots))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .merge(protected_routes)
        .with_state(state)
}
