// libs/appointment-cell/src/services/locking.rs
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};

use crate::models::{Appointment, AppointmentError, BookingRequest};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BookedResource {
    Doctor(String),
    Room(String),
    Patient(String),
}

/// Unit of booking serialization: one resource on one calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockKey {
    pub date: NaiveDate,
    pub resource: BookedResource,
}

impl LockKey {
    pub fn for_booking(request: &BookingRequest) -> Vec<LockKey> {
        Self::for_resources(request.date, &request.doctor_id, &request.room_id, &request.patient_id)
    }

    pub fn for_appointment(appointment: &Appointment) -> Vec<LockKey> {
        Self::for_resources(
            appointment.date,
            &appointment.doctor_id,
            &appointment.room_id,
            &appointment.patient_id,
        )
    }

    fn for_resources(date: NaiveDate, doctor_id: &str, room_id: &str, patient_id: &str) -> Vec<LockKey> {
        vec![
            LockKey { date, resource: BookedResource::Doctor(doctor_id.to_string()) },
            LockKey { date, resource: BookedResource::Room(room_id.to_string()) },
            LockKey { date, resource: BookedResource::Patient(patient_id.to_string()) },
        ]
    }
}

/// Holds every lock taken by one `acquire` call until dropped.
#[derive(Debug)]
pub struct BookingGuard {
    keys: Vec<LockKey>,
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl BookingGuard {
    pub fn keys(&self) -> &[LockKey] {
        &self.keys
    }
}

/// In-process lock table keyed by `(date, resource)`.
///
/// Two bookings that could collide always share at least one key, so holding
/// all three keys for the proposed booking serializes every check-and-commit
/// that could race with it. Keys are taken in sorted order.
#[derive(Debug, Default)]
pub struct BookingLocks {
    slots: Mutex<HashMap<LockKey, Arc<AsyncMutex<()>>>>,
}

impl BookingLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire<I>(&self, keys: I, timeout: Duration) -> Result<BookingGuard, AppointmentError>
    where
        I: IntoIterator<Item = LockKey>,
    {
        let mut keys: Vec<LockKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut slots = self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            // Only the table itself references an idle entry.
            slots.retain(|_, mutex| Arc::strong_count(mutex) > 1);
            keys.iter()
                .map(|key| slots.entry(key.clone()).or_default().clone())
                .collect()
        };

        let acquire_all = async move {
            let mut guards = Vec::with_capacity(mutexes.len());
            for mutex in mutexes {
                guards.push(mutex.lock_owned().await);
            }
            guards
        };

        match tokio::time::timeout(timeout, acquire_all).await {
            Ok(guards) => {
                debug!("Acquired {} booking locks", keys.len());
                Ok(BookingGuard { keys, _guards: guards })
            }
            Err(_) => {
                warn!("Timed out after {:?} waiting for booking locks {:?}", timeout, keys);
                Err(AppointmentError::LockTimeout)
            }
        }
    }

    /// Number of keys currently tracked, including idle ones not yet pruned.
    pub fn tracked_keys(&self) -> usize {
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }
}
