use std::sync::Arc;

use axum::{
    Router,
    routing::get,
};

use appointment_cell::router::appointment_routes;
use appointment_cell::state::AppointmentCellState;

pub fn create_router(state: Arc<AppointmentCellState>) -> Router {
    Router::new()
        .route("/", get(|| async { "ClinicFlow API is running!" }))
        .nest("/appointments", appointment_routes(state))
}
