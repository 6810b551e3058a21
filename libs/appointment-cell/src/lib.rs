pub mod models;
pub mod state;
pub mod services;
pub mod handlers;
pub mod router;

pub use models::*;
pub use router::appointment_routes;
