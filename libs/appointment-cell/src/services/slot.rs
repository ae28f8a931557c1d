// libs/appointment-cell/src/services/slot.rs
use chrono::{NaiveDate, NaiveTime, Timelike};

use crate::models::AppointmentError;

pub const MINUTES_PER_DAY: i32 = 24 * 60;

/// Half-open visit window `[start, end)` in minutes since local midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: i32,
    pub end: i32,
}

impl TimeWindow {
    /// Minute resolution: seconds on `start_time` are dropped.
    pub fn new(start_time: NaiveTime, duration_minutes: i32) -> Result<Self, AppointmentError> {
        if duration_minutes <= 0 {
            return Err(AppointmentError::InvalidRequest(format!(
                "duration_minutes must be positive, got {}",
                duration_minutes
            )));
        }
        if duration_minutes > MINUTES_PER_DAY {
            return Err(AppointmentError::InvalidRequest(format!(
                "duration_minutes must not exceed {}, got {}",
                MINUTES_PER_DAY, duration_minutes
            )));
        }

        let start = minutes_since_midnight(start_time);
        Ok(Self {
            start,
            end: start + duration_minutes,
        })
    }

    pub fn overlaps(&self, other: &TimeWindow) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn fits_in_day(&self) -> bool {
        self.end <= MINUTES_PER_DAY
    }
}

pub fn minutes_since_midnight(time: NaiveTime) -> i32 {
    (time.hour() * 60 + time.minute()) as i32
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, AppointmentError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").map_err(|_| {
        AppointmentError::InvalidRequest(format!("date must be YYYY-MM-DD, got {:?}", raw))
    })
}

/// Accepts `HH:MM`, or `HH:MM:SS` with zero seconds.
pub fn parse_start_time(raw: &str) -> Result<NaiveTime, AppointmentError> {
    let raw = raw.trim();
    let parsed = NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| {
            AppointmentError::InvalidRequest(format!("time must be HH:MM, got {:?}", raw))
        })?;

    if parsed.second() != 0 || parsed.nanosecond() != 0 {
        return Err(AppointmentError::InvalidRequest(format!(
            "time must fall on a whole minute, got {:?}",
            raw
        )));
    }

    Ok(parsed)
}

pub fn format_start_time(time: NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

/// Serde adapter that writes `HH:MM` and reads `HH:MM` or `HH:MM:SS`, the
/// latter being what Postgres `time` columns return.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_start_time(*time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveTime::parse_from_str(&raw, "%H:%M")
            .or_else(|_| NaiveTime::parse_from_str(&raw, "%H:%M:%S"))
            .map_err(|_| de::Error::custom(format!("invalid time of day: {}", raw)))
    }
}
