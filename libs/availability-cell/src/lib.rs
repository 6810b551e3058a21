pub mod models;
pub mod services;
pub mod handlers;
pub mod router;

pub use models::{Slot, SlotError};
pub use services::ledger::{SlotLedger, SupabaseSlotLedger};
pub use router::slot_routes;
