// libs/appointment-cell/src/services/booking.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use shared_config::AppConfig;

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookingOutcome,
    BookingRequest, ConflictResult, NewAppointment, RescheduleAppointmentRequest,
};
use crate::services::conflict::ConflictChecker;
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::locking::{BookingGuard, BookingLocks, LockKey};
use crate::services::slot;
use crate::services::store::AppointmentStore;

/// Tunables for the check-and-commit path.
#[derive(Debug, Clone)]
pub struct BookingPolicy {
    pub default_duration_minutes: i32,
    /// Upper bound on waiting for the per-resource locks.
    pub lock_timeout: Duration,
    /// Upper bound on read + check + write once the locks are held.
    pub transaction_timeout: Duration,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            default_duration_minutes: shared_config::DEFAULT_VISIT_MINUTES,
            lock_timeout: Duration::from_millis(shared_config::DEFAULT_BOOKING_TIMEOUT_MS),
            transaction_timeout: Duration::from_millis(shared_config::DEFAULT_BOOKING_TIMEOUT_MS),
            max_attempts: shared_config::DEFAULT_BOOKING_MAX_ATTEMPTS,
            retry_backoff: Duration::from_millis(100),
        }
    }
}

impl BookingPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            default_duration_minutes: config.default_visit_minutes,
            lock_timeout: Duration::from_millis(config.booking_timeout_ms),
            transaction_timeout: Duration::from_millis(config.booking_timeout_ms),
            max_attempts: config.booking_max_attempts.max(1),
            ..Self::default()
        }
    }
}

/// Books, cancels and removes appointments while holding the booking locks
/// of every resource involved, so no two writes that could double-book
/// interleave their check and commit.
pub struct AppointmentBookingService {
    store: Arc<dyn AppointmentStore>,
    locks: Arc<BookingLocks>,
    checker: ConflictChecker,
    lifecycle_service: AppointmentLifecycleService,
    policy: BookingPolicy,
}

impl AppointmentBookingService {
    pub fn new(store: Arc<dyn AppointmentStore>, locks: Arc<BookingLocks>, policy: BookingPolicy) -> Self {
        Self {
            store,
            locks,
            checker: ConflictChecker::new(policy.default_duration_minutes),
            lifecycle_service: AppointmentLifecycleService::new(),
            policy,
        }
    }

    pub fn checker(&self) -> &ConflictChecker {
        &self.checker
    }

    pub fn policy(&self) -> &BookingPolicy {
        &self.policy
    }

    /// Check the proposal against a fresh read of its date and insert it when
    /// clear. A `Rejected` outcome carries the colliding appointment.
    #[instrument(skip(self, request, notes), fields(doctor_id = %request.doctor_id, date = %request.date))]
    pub async fn book(&self, request: &BookingRequest, notes: &str) -> Result<BookingOutcome, AppointmentError> {
        self.checker.validate(request)?;

        let outcome = self.with_retries(|| self.try_book(request, notes)).await?;

        match &outcome {
            BookingOutcome::Booked(appointment) => {
                info!("Booked appointment {} for doctor {} on {} at {}",
                      appointment.id, appointment.doctor_id, appointment.date,
                      slot::format_start_time(appointment.start_time));
            }
            BookingOutcome::Rejected { reason, with } => {
                info!("Booking rejected: {} (conflicts with {})", reason, with);
            }
        }

        Ok(outcome)
    }

    async fn try_book(&self, request: &BookingRequest, notes: &str) -> Result<BookingOutcome, AppointmentError> {
        let _guard = self.locks
            .acquire(LockKey::for_booking(request), self.policy.lock_timeout)
            .await?;

        self.within_transaction(async {
            let existing = self.store.find_by_date(request.date).await?;

            if let ConflictResult::Conflict { reason, with } =
                self.checker.check_conflict(request, &existing)?
            {
                return Ok(BookingOutcome::Rejected { reason, with });
            }

            let created = self.store
                .insert(request.clone().into_new_appointment(notes.to_string()))
                .await?;
            Ok(BookingOutcome::Booked(created))
        })
        .await
    }

    /// Dry run: same decision as `book`, without locks or writes.
    pub async fn check(&self, request: &BookingRequest) -> Result<ConflictResult, AppointmentError> {
        self.checker.validate(request)?;
        let existing = self.store.find_by_date(request.date).await?;
        self.checker.check_conflict(request, &existing)
    }

    #[instrument(skip(self))]
    pub async fn cancel(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let cancelled = self.with_retries(|| self.try_cancel(appointment_id)).await?;
        info!("Cancelled appointment {}", appointment_id);
        Ok(cancelled)
    }

    async fn try_cancel(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let current = self.get(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(&current.status, &AppointmentStatus::Cancelled)?;

        let _guard = self.locks
            .acquire(LockKey::for_appointment(&current), self.policy.lock_timeout)
            .await?;

        self.within_transaction(async {
            // Re-read under the lock; a concurrent cancel may have won.
            let fresh = self.get(appointment_id).await?;
            self.lifecycle_service
                .validate_status_transition(&fresh.status, &AppointmentStatus::Cancelled)?;

            self.store
                .update_status(appointment_id, AppointmentStatus::Cancelled)
                .await?
                .ok_or(AppointmentError::NotFound)
        })
        .await
    }

    /// Move a scheduled appointment to a new slot: the replacement is booked
    /// and the original cancelled while both slots' locks are held. The
    /// original never blocks its own replacement. Only the read and check are
    /// bounded by the transaction timeout; once writing starts it completes.
    #[instrument(skip(self, request))]
    pub async fn reschedule(
        &self,
        appointment_id: Uuid,
        request: RescheduleAppointmentRequest,
    ) -> Result<BookingOutcome, AppointmentError> {
        let current = self.get(appointment_id).await?;
        self.lifecycle_service
            .validate_status_transition(&current.status, &AppointmentStatus::Cancelled)?;

        let proposal = BookingRequest {
            appointment_id: Some(current.id),
            patient_id: current.patient_id.clone(),
            doctor_id: current.doctor_id.clone(),
            room_id: request.room_id.clone().unwrap_or_else(|| current.room_id.clone()),
            date: match request.date.as_deref() {
                Some(raw) => slot::parse_date(raw)?,
                None => current.date,
            },
            start_time: match request.time.as_deref() {
                Some(raw) => slot::parse_start_time(raw)?,
                None => current.start_time,
            },
            duration_minutes: request
                .duration_minutes
                .unwrap_or_else(|| current.effective_duration(self.policy.default_duration_minutes)),
        };
        self.checker.validate(&proposal)?;

        let outcome = self.with_retries(|| self.try_reschedule(&current, &proposal)).await?;
        if let BookingOutcome::Booked(replacement) = &outcome {
            info!("Rescheduled appointment {} as {}", appointment_id, replacement.id);
        }
        Ok(outcome)
    }

    async fn try_reschedule(
        &self,
        current: &Appointment,
        proposal: &BookingRequest,
    ) -> Result<BookingOutcome, AppointmentError> {
        let keys = LockKey::for_appointment(current)
            .into_iter()
            .chain(LockKey::for_booking(proposal));
        let guard = self.locks.acquire(keys, self.policy.lock_timeout).await?;

        let (decision, notes) = self.within_transaction(async {
            let fresh = self.get(current.id).await?;
            self.lifecycle_service
                .validate_status_transition(&fresh.status, &AppointmentStatus::Cancelled)?;

            let existing = self.store.find_by_date(proposal.date).await?;
            let decision = self.checker.check_conflict(proposal, &existing)?;
            Ok((decision, fresh.notes))
        })
        .await?;

        if let ConflictResult::Conflict { reason, with } = decision {
            return Ok(BookingOutcome::Rejected { reason, with });
        }

        // Writes and their rollback run to completion on their own task, which
        // owns the locks until it finishes.
        let commit = tokio::spawn(commit_reschedule(
            Arc::clone(&self.store),
            guard,
            current.id,
            proposal.clone().into_new_appointment(notes),
        ));

        let replacement = commit.await.map_err(|e| {
            error!("Reschedule of {} aborted: {}", current.id, e);
            AppointmentError::StoreUnavailable(format!("reschedule task failed: {}", e))
        })??;

        Ok(BookingOutcome::Booked(replacement))
    }

    /// Administrative removal. Independent of the lifecycle: any status may be
    /// removed.
    #[instrument(skip(self))]
    pub async fn remove(&self, appointment_id: Uuid) -> Result<(), AppointmentError> {
        self.with_retries(|| self.try_remove(appointment_id)).await?;
        info!("Removed appointment {}", appointment_id);
        Ok(())
    }

    async fn try_remove(&self, appointment_id: Uuid) -> Result<(), AppointmentError> {
        let current = self.get(appointment_id).await?;
        let _guard = self.locks
            .acquire(LockKey::for_appointment(&current), self.policy.lock_timeout)
            .await?;

        self.within_transaction(async {
            if self.store.delete(appointment_id).await? {
                Ok(())
            } else {
                Err(AppointmentError::NotFound)
            }
        })
        .await
    }

    pub async fn get(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get(appointment_id)
            .await?
            .ok_or(AppointmentError::NotFound)
    }

    pub async fn search(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Searching appointments with {:?}", query);
        self.store.list(query).await
    }

    // ==============================================================================
    // PRIVATE HELPER METHODS
    // ==============================================================================

    async fn within_transaction<T, F>(&self, work: F) -> Result<T, AppointmentError>
    where
        F: Future<Output = Result<T, AppointmentError>>,
    {
        tokio::time::timeout(self.policy.transaction_timeout, work)
            .await
            .map_err(|_| {
                warn!("Booking transaction exceeded {:?}", self.policy.transaction_timeout);
                AppointmentError::Timeout
            })?
    }

    /// Re-run `attempt` with a fresh read after lock contention or a store
    /// write conflict, backing off a little longer each time.
    async fn with_retries<T, F, Fut>(&self, mut attempt: F) -> Result<T, AppointmentError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AppointmentError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt_number = 1;

        loop {
            match attempt().await {
                Err(e) if e.is_retryable() => {
                    if attempt_number >= max_attempts {
                        warn!("Giving up after {} attempts: {}", attempt_number, e);
                        return Err(AppointmentError::Busy(attempt_number));
                    }
                    warn!("Booking contention ({}), retrying attempt {}/{}",
                          e, attempt_number + 1, max_attempts);
                    tokio::time::sleep(self.policy.retry_backoff * attempt_number).await;
                    attempt_number += 1;
                }
                result => return result,
            }
        }
    }
}

/// Insert the replacement, then cancel the original. When the cancel fails the
/// replacement is deleted again.
async fn commit_reschedule(
    store: Arc<dyn AppointmentStore>,
    _guard: BookingGuard,
    original_id: Uuid,
    replacement: NewAppointment,
) -> Result<Appointment, AppointmentError> {
    let replacement = store.insert(replacement).await?;

    let cancelled = store
        .update_status(original_id, AppointmentStatus::Cancelled)
        .await
        .and_then(|updated| updated.ok_or(AppointmentError::NotFound));

    if let Err(e) = cancelled {
        error!("Failed to cancel {} after booking {}: {}", original_id, replacement.id, e);
        if let Err(undo) = store.delete(replacement.id).await {
            error!("Failed to remove replacement {}: {}", replacement.id, undo);
        }
        return Err(e);
    }

    Ok(replacement)
}
