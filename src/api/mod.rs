pub mod events;
pub mod fees;
pub mod market;
pub mod routes;
pub mod runes;

pub use routes::{create_router, ApiError, AppState};
