pub mod models;
pub mod services;
pub mod state;
pub mod handlers;
pub mod router;

pub use models::*;
pub use state::AppointmentCellState;
pub use router::appointment_routes;
