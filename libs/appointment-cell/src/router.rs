// libs/appointment-cell/src/router.rs
use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};

use crate::handlers;
use crate::state::AppointmentCellState;

pub fn appointment_routes(state: Arc<AppointmentCellState>) -> Router {
    Router::new()
        // Booking and lifecycle
        .route("/", post(handlers::book_appointment).get(handlers::search_appointments))
        .route("/{appointment_id}", get(handlers::get_appointment).delete(handlers::delete_appointment))
        .route("/{appointment_id}/cancel", post(handlers::cancel_appointment))
        .route("/{appointment_id}/reschedule", post(handlers::reschedule_appointment))

        // Utility endpoints
        .route("/conflicts/check", post(handlers::check_appointment_conflicts))
        .route("/doctors/{doctor_id}/calendar.ics", get(handlers::get_doctor_calendar))

        .with_state(state)
}
