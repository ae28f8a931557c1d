// libs/appointment-cell/src/services/calendar.rs
use chrono::{DateTime, Duration, NaiveDateTime, Utc};

use crate::models::Appointment;

const PRODID: &str = "-//ClinicFlow//Appointments//EN";
const UID_DOMAIN: &str = "clinicflow.local";

/// Render a doctor's scheduled appointments as an iCalendar (RFC 5545) feed.
///
/// Times are floating local times, matching how appointments are stored.
/// Appointments for other doctors and cancelled ones are skipped.
pub fn generate_doctor_calendar(
    doctor_id: &str,
    appointments: &[Appointment],
    default_duration_minutes: i32,
    stamp: DateTime<Utc>,
) -> String {
    let dt_stamp = stamp.format("%Y%m%dT%H%M%SZ").to_string();

    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{}", PRODID),
        "CALSCALE:GREGORIAN".to_string(),
    ];

    for appointment in appointments
        .iter()
        .filter(|a| a.doctor_id == doctor_id && a.is_scheduled())
    {
        let start = NaiveDateTime::new(appointment.date, appointment.start_time);
        let duration = appointment.effective_duration(default_duration_minutes).max(0);
        let end = start + Duration::minutes(i64::from(duration));

        lines.push("BEGIN:VEVENT".to_string());
        lines.push(format!("UID:{}@{}", appointment.id, UID_DOMAIN));
        lines.push(format!("DTSTAMP:{}", dt_stamp));
        lines.push(format!("DTSTART:{}", ics_local(start)));
        lines.push(format!("DTEND:{}", ics_local(end)));
        lines.push(format!(
            "SUMMARY:{}",
            escape_text(&format!("Visit with patient {}", appointment.patient_id))
        ));
        if !appointment.notes.is_empty() {
            lines.push(format!("DESCRIPTION:{}", escape_text(&appointment.notes)));
        }
        lines.push(format!("LOCATION:{}", escape_text(&appointment.room_id)));
        lines.push("END:VEVENT".to_string());
    }

    lines.push("END:VCALENDAR".to_string());
    let mut calendar = lines.join("\r\n");
    calendar.push_str("\r\n");
    calendar
}

fn ics_local(at: NaiveDateTime) -> String {
    at.format("%Y%m%dT%H%M%S").to_string()
}

fn escape_text(text: &str) -> String {
    text.replace('\\', "\\\\")
        .replace(';', "\\;")
        .replace(',', "\\,")
        .replace("\r\n", "\\n")
        .replace('\n', "\\n")
}
