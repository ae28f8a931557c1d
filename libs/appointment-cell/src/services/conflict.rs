// libs/appointment-cell/src/services/conflict.rs
use tracing::{debug, warn};

use crate::models::{
    Appointment, AppointmentError, BookingRequest, ConflictReason, ConflictResult,
};
use crate::services::slot::TimeWindow;

/// Decides whether a proposed booking collides with existing appointments.
///
/// Two visits collide when their half-open windows `[start, start + duration)`
/// intersect and they share a doctor, a room, or a patient. Back-to-back visits
/// (`end == start`) never collide. Cancelled appointments and appointments on
/// other dates are ignored, so callers may pass an unfiltered day or range.
#[derive(Debug, Clone, Copy)]
pub struct ConflictChecker {
    default_duration_minutes: i32,
}

impl ConflictChecker {
    pub fn new(default_duration_minutes: i32) -> Self {
        Self { default_duration_minutes }
    }

    /// Reject proposals that cannot be checked. Unparseable or incomplete input
    /// never reaches the overlap test.
    pub fn validate(&self, proposed: &BookingRequest) -> Result<TimeWindow, AppointmentError> {
        for (field, value) in [
            ("patient_id", &proposed.patient_id),
            ("doctor_id", &proposed.doctor_id),
            ("room_id", &proposed.room_id),
        ] {
            if value.trim().is_empty() {
                return Err(AppointmentError::InvalidRequest(format!("{} is required", field)));
            }
        }

        let window = TimeWindow::new(proposed.start_time, proposed.duration_minutes)?;
        if !window.fits_in_day() {
            return Err(AppointmentError::InvalidRequest(
                "appointment must end by midnight of the booked date".to_string(),
            ));
        }

        Ok(window)
    }

    /// Return the first conflict in `existing` order, or `NoConflict`.
    ///
    /// When several resources collide on the same appointment the reason is
    /// reported as doctor, then room, then patient.
    pub fn check_conflict(
        &self,
        proposed: &BookingRequest,
        existing: &[Appointment],
    ) -> Result<ConflictResult, AppointmentError> {
        let proposed_window = self.validate(proposed)?;

        debug!(
            "Checking {} existing appointments on {} against {}-{} min",
            existing.len(), proposed.date, proposed_window.start, proposed_window.end
        );

        for appointment in existing {
            if !appointment.is_scheduled() || appointment.date != proposed.date {
                continue;
            }
            if proposed.appointment_id == Some(appointment.id) {
                continue;
            }

            let window = appointment.window(self.default_duration_minutes).map_err(|_| {
                warn!("Stored appointment {} has invalid duration {:?}",
                      appointment.id, appointment.duration_minutes);
                AppointmentError::InvalidRequest(format!(
                    "existing appointment {} has an invalid duration", appointment.id
                ))
            })?;

            if !proposed_window.overlaps(&window) {
                continue;
            }

            if let Some(reason) = shared_resource(proposed, appointment) {
                debug!("Proposed booking collides with {} ({:?})", appointment.id, reason);
                return Ok(ConflictResult::Conflict { reason, with: appointment.id });
            }
        }

        Ok(ConflictResult::NoConflict)
    }
}

fn shared_resource(proposed: &BookingRequest, existing: &Appointment) -> Option<ConflictReason> {
    if proposed.doctor_id == existing.doctor_id {
        Some(ConflictReason::DoctorBusy)
    } else if proposed.room_id == existing.room_id {
        Some(ConflictReason::RoomBusy)
    } else if proposed.patient_id == existing.patient_id {
        Some(ConflictReason::PatientDoubleBooked)
    } else {
        None
    }
}
