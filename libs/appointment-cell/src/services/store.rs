// libs/appointment-cell/src/services/store.rs
use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, NewAppointment,
};

/// Persistence capability the booking service is built on.
///
/// Implementations do not enforce the no-double-booking rule; the booking
/// service does that under `BookingLocks` before calling `insert`.
#[async_trait]
pub trait AppointmentStore: Send + Sync {
    /// Every appointment on `date`, whatever its status.
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError>;

    /// Persist a new scheduled appointment. Either the row is stored in full
    /// or nothing is written.
    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError>;

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Matching appointments ordered by date, then start time.
    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError>;

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Returns `false` when no appointment had this id.
    async fn delete(&self, id: Uuid) -> Result<bool, AppointmentError>;
}

/// Document-style store kept in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAppointmentStore {
    appointments: RwLock<HashMap<Uuid, Appointment>>,
}

impl InMemoryAppointmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with already-built appointments, keeping their ids.
    pub fn with_appointments(appointments: impl IntoIterator<Item = Appointment>) -> Self {
        Self {
            appointments: RwLock::new(appointments.into_iter().map(|a| (a.id, a)).collect()),
        }
    }
}

fn sort_by_schedule(appointments: &mut [Appointment]) {
    appointments.sort_by(|a, b| {
        (a.date, a.start_time, a.created_at).cmp(&(b.date, b.start_time, b.created_at))
    });
}

#[async_trait]
impl AppointmentStore for InMemoryAppointmentStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut found: Vec<Appointment> = appointments
            .values()
            .filter(|a| a.date == date)
            .cloned()
            .collect();
        sort_by_schedule(&mut found);
        Ok(found)
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();
        let stored = Appointment {
            id: Uuid::new_v4(),
            patient_id: appointment.patient_id,
            doctor_id: appointment.doctor_id,
            room_id: appointment.room_id,
            date: appointment.date,
            start_time: appointment.start_time,
            duration_minutes: appointment.duration_minutes,
            status: AppointmentStatus::Scheduled,
            notes: appointment.notes,
            created_at: now,
            updated_at: now,
        };

        self.appointments.write().await.insert(stored.id, stored.clone());
        debug!("Stored appointment {} in memory", stored.id);
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.appointments.read().await.get(&id).cloned())
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let appointments = self.appointments.read().await;
        let mut found: Vec<Appointment> = appointments
            .values()
            .filter(|a| query.matches(a))
            .cloned()
            .collect();
        sort_by_schedule(&mut found);
        Ok(found)
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut appointments = self.appointments.write().await;
        Ok(appointments.get_mut(&id).map(|appointment| {
            appointment.status = status;
            appointment.updated_at = Utc::now();
            appointment.clone()
        }))
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        Ok(self.appointments.write().await.remove(&id).is_some())
    }
}
