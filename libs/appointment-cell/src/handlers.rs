// libs/appointment-cell/src/handlers.rs
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use shared_models::error::AppError;

use crate::models::{
    AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookAppointmentRequest,
    BookingOutcome, ConflictCheckResponse, RescheduleAppointmentRequest,
};
use crate::services::calendar::generate_doctor_calendar;
use crate::state::AppointmentCellState;

fn to_app_error(e: AppointmentError) -> AppError {
    match e {
        AppointmentError::InvalidRequest(msg) => AppError::ValidationError(msg),
        AppointmentError::NotFound => AppError::NotFound("Appointment not found".to_string()),
        AppointmentError::InvalidStatusTransition(status) => {
            AppError::BadRequest(format!("Appointment cannot be changed in status: {}", status))
        }
        AppointmentError::StoreConflict(_) => AppError::Conflict(e.to_string()),
        AppointmentError::StoreUnavailable(_)
        | AppointmentError::LockTimeout
        | AppointmentError::Timeout
        | AppointmentError::Busy(_) => AppError::ServiceUnavailable(e.to_string()),
    }
}

fn outcome_response(outcome: BookingOutcome, message: &str) -> Response {
    match outcome {
        BookingOutcome::Booked(appointment) => (
            StatusCode::CREATED,
            Json(json!({
                "success": true,
                "appointment": appointment,
                "message": message
            })),
        )
            .into_response(),
        BookingOutcome::Rejected { reason, with } => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "error": format!("Conflicting appointment: {}", reason),
                "reason": reason,
                "conflicting_appointment_id": with
            })),
        )
            .into_response(),
    }
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn book_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Response, AppError> {
    let booking_service = state.booking_service();

    let (booking, notes) = request
        .into_booking(booking_service.policy().default_duration_minutes)
        .map_err(to_app_error)?;

    let outcome = booking_service.book(&booking, &notes).await.map_err(to_app_error)?;

    Ok(outcome_response(outcome, "Appointment booked successfully"))
}

/// Answers whether a booking would be accepted right now. Nothing is written,
/// so a later `book` may still be rejected.
#[axum::debug_handler]
pub async fn check_appointment_conflicts(
    State(state): State<Arc<AppointmentCellState>>,
    Json(request): Json<BookAppointmentRequest>,
) -> Result<Json<ConflictCheckResponse>, AppError> {
    let booking_service = state.booking_service();

    let (booking, _) = request
        .into_booking(booking_service.policy().default_duration_minutes)
        .map_err(to_app_error)?;

    let result = booking_service.check(&booking).await.map_err(to_app_error)?;

    Ok(Json(ConflictCheckResponse::from(result)))
}

#[axum::debug_handler]
pub async fn reschedule_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<RescheduleAppointmentRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .booking_service()
        .reschedule(appointment_id, request)
        .await
        .map_err(to_app_error)?;

    Ok(outcome_response(outcome, "Appointment rescheduled successfully"))
}

#[axum::debug_handler]
pub async fn cancel_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking_service()
        .cancel(appointment_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "success": true,
        "appointment": appointment,
        "message": "Appointment cancelled successfully"
    })))
}

#[axum::debug_handler]
pub async fn delete_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    state
        .booking_service()
        .remove(appointment_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "ok": true,
        "deleted_id": appointment_id
    })))
}

// ==============================================================================
// LOOKUP HANDLERS
// ==============================================================================

#[axum::debug_handler]
pub async fn get_appointment(
    State(state): State<Arc<AppointmentCellState>>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .booking_service()
        .get(appointment_id)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!(appointment)))
}

#[axum::debug_handler]
pub async fn search_appointments(
    State(state): State<Arc<AppointmentCellState>>,
    Query(query): Query<AppointmentSearchQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .booking_service()
        .search(&query)
        .await
        .map_err(to_app_error)?;

    Ok(Json(json!({
        "appointments": appointments,
        "total": appointments.len()
    })))
}

#[axum::debug_handler]
pub async fn get_doctor_calendar(
    State(state): State<Arc<AppointmentCellState>>,
    Path(doctor_id): Path<String>,
) -> Result<Response, AppError> {
    let booking_service = state.booking_service();

    let query = AppointmentSearchQuery {
        doctor_id: Some(doctor_id.clone()),
        status: Some(AppointmentStatus::Scheduled),
        ..AppointmentSearchQuery::default()
    };
    let appointments = booking_service.search(&query).await.map_err(to_app_error)?;

    let calendar = generate_doctor_calendar(
        &doctor_id,
        &appointments,
        booking_service.policy().default_duration_minutes,
        Utc::now(),
    );

    Ok((
        [
            (header::CONTENT_TYPE, "text/calendar; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}.ics\"", doctor_id.replace('"', "")),
            ),
        ],
        calendar,
    )
        .into_response())
}
