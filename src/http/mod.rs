//! The REST adapter layer (§4.8, §6).

pub mod envelope;
pub mod handlers;

pub use handlers::{build_router, AppState};
