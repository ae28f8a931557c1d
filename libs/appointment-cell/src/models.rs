// libs/appointment-cell/src/models.rs
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc, NaiveDate, NaiveTime};
use std::fmt;

use crate::services::slot::{self, TimeWindow};

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Appointment {
    pub id: Uuid,
    pub patient_id: String,
    pub doctor_id: String,
    pub room_id: String,
    pub date: NaiveDate,
    #[serde(with = "slot::hhmm")]
    pub start_time: NaiveTime,
    /// `None` means the visit runs for the clinic-wide default length.
    #[serde(default)]
    pub duration_minutes: Option<i32>,
    pub status: AppointmentStatus,
    #[serde(default)]
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn is_scheduled(&self) -> bool {
        self.status == AppointmentStatus::Scheduled
    }

    pub fn effective_duration(&self, default_minutes: i32) -> i32 {
        self.duration_minutes.unwrap_or(default_minutes)
    }

    /// Occupied window `[start, start + duration)` in minutes since midnight.
    pub fn window(&self, default_minutes: i32) -> Result<TimeWindow, AppointmentError> {
        TimeWindow::new(self.start_time, self.effective_duration(default_minutes))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Scheduled,
    #[serde(alias = "canceled")]
    Cancelled,
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppointmentStatus::Scheduled => write!(f, "scheduled"),
            AppointmentStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Row handed to a store for insertion. The store assigns id and timestamps.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NewAppointment {
    pub patient_id: String,
    pub doctor_id: String,
    pub room_id: String,
    pub date: NaiveDate,
    #[serde(with = "slot::hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: Option<i32>,
    pub notes: String,
}

// ==============================================================================
// CONFLICT DETECTION MODELS
// ==============================================================================

/// A proposed booking as seen by the conflict checker.
#[derive(Debug, Clone, PartialEq)]
pub struct BookingRequest {
    /// Set when the proposal replaces an existing appointment, so the checker
    /// does not compare it against itself.
    pub appointment_id: Option<Uuid>,
    pub patient_id: String,
    pub doctor_id: String,
    pub room_id: String,
    pub date: NaiveDate,
    pub start_time: NaiveTime,
    pub duration_minutes: i32,
}

impl BookingRequest {
    pub fn into_new_appointment(self, notes: String) -> NewAppointment {
        NewAppointment {
            patient_id: self.patient_id,
            doctor_id: self.doctor_id,
            room_id: self.room_id,
            date: self.date,
            start_time: self.start_time,
            duration_minutes: Some(self.duration_minutes),
            notes,
        }
    }
}

/// Which shared resource a proposed booking collided on. Declaration order is
/// the reporting priority.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConflictReason {
    DoctorBusy,
    RoomBusy,
    PatientDoubleBooked,
}

impl fmt::Display for ConflictReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictReason::DoctorBusy => write!(f, "doctor is already booked at this time"),
            ConflictReason::RoomBusy => write!(f, "room is already booked at this time"),
            ConflictReason::PatientDoubleBooked => {
                write!(f, "patient already has an appointment at this time")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictResult {
    NoConflict,
    Conflict { reason: ConflictReason, with: Uuid },
}

impl ConflictResult {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConflictResult::Conflict { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConflictCheckResponse {
    pub has_conflict: bool,
    pub reason: Option<ConflictReason>,
    pub conflicting_appointment_id: Option<Uuid>,
    pub message: String,
}

impl From<ConflictResult> for ConflictCheckResponse {
    fn from(result: ConflictResult) -> Self {
        match result {
            ConflictResult::NoConflict => Self {
                has_conflict: false,
                reason: None,
                conflicting_appointment_id: None,
                message: "Slot is available".to_string(),
            },
            ConflictResult::Conflict { reason, with } => Self {
                has_conflict: true,
                reason: Some(reason),
                conflicting_appointment_id: Some(with),
                message: format!("Conflicting appointment: {}", reason),
            },
        }
    }
}

/// Result of a committed booking attempt. A rejection is an expected outcome,
/// not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum BookingOutcome {
    Booked(Appointment),
    Rejected { reason: ConflictReason, with: Uuid },
}

// ==============================================================================
// REQUEST/RESPONSE MODELS
// ==============================================================================

/// Booking request as it arrives on the wire. Every field is optional here so
/// that missing input is reported as one validation error rather than a body
/// rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BookAppointmentRequest {
    pub patient_id: Option<String>,
    pub doctor_id: Option<String>,
    pub room_id: Option<String>,
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub notes: Option<String>,
}

impl BookAppointmentRequest {
    /// Parse and shape-check the request. Semantic checks (duration, window)
    /// are left to the conflict checker.
    pub fn into_booking(
        self,
        default_duration_minutes: i32,
    ) -> Result<(BookingRequest, String), AppointmentError> {
        let mut missing = Vec::new();
        let patient_id = required(self.patient_id, "patient_id", &mut missing);
        let doctor_id = required(self.doctor_id, "doctor_id", &mut missing);
        let room_id = required(self.room_id, "room_id", &mut missing);
        let date = required(self.date, "date", &mut missing);
        let time = required(self.time, "time", &mut missing);

        if !missing.is_empty() {
            return Err(AppointmentError::InvalidRequest(format!(
                "Missing required fields: {}",
                missing.join(", ")
            )));
        }

        let booking = BookingRequest {
            appointment_id: None,
            patient_id,
            doctor_id,
            room_id,
            date: slot::parse_date(&date)?,
            start_time: slot::parse_start_time(&time)?,
            duration_minutes: self.duration_minutes.unwrap_or(default_duration_minutes),
        };

        Ok((booking, self.notes.unwrap_or_default()))
    }
}

fn required(value: Option<String>, name: &'static str, missing: &mut Vec<&'static str>) -> String {
    match value.map(|v| v.trim().to_string()) {
        Some(v) if !v.is_empty() => v,
        _ => {
            missing.push(name);
            String::new()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RescheduleAppointmentRequest {
    pub date: Option<String>,
    pub time: Option<String>,
    pub duration_minutes: Option<i32>,
    pub room_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppointmentSearchQuery {
    pub date: Option<NaiveDate>,
    pub doctor_id: Option<String>,
    pub room_id: Option<String>,
    pub patient_id: Option<String>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentSearchQuery {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.date.map_or(true, |d| appointment.date == d)
            && self.doctor_id.as_deref().map_or(true, |d| appointment.doctor_id == d)
            && self.room_id.as_deref().map_or(true, |r| appointment.room_id == r)
            && self.patient_id.as_deref().map_or(true, |p| appointment.patient_id == p)
            && self.status.map_or(true, |s| appointment.status == s)
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Invalid booking request: {0}")]
    InvalidRequest(String),

    #[error("Appointment not found")]
    NotFound,

    #[error("Appointment cannot be modified in current status: {0}")]
    InvalidStatusTransition(AppointmentStatus),

    #[error("Appointment store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Appointment store rejected a concurrent write: {0}")]
    StoreConflict(String),

    #[error("Timed out waiting for booking lock")]
    LockTimeout,

    #[error("Booking transaction timed out")]
    Timeout,

    #[error("Booking system busy after {0} attempts, please retry")]
    Busy(u32),
}

impl AppointmentError {
    /// Contention errors that warrant a fresh read and another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppointmentError::LockTimeout | AppointmentError::StoreConflict(_))
    }
}
