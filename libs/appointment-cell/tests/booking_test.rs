// libs/appointment-cell/tests/booking_test.rs
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime, Utc};
use uuid::Uuid;

use appointment_cell::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, BookingOutcome,
    BookingRequest, ConflictReason, ConflictResult, NewAppointment, RescheduleAppointmentRequest,
};
use appointment_cell::services::booking::{AppointmentBookingService, BookingPolicy};
use appointment_cell::services::locking::{BookingLocks, LockKey};
use appointment_cell::services::store::{AppointmentStore, InMemoryAppointmentStore};

// ==============================================================================
// TEST FIXTURES
// ==============================================================================

fn june_first() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()
}

fn at(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn request(doctor: &str, room: &str, patient: &str, start: NaiveTime) -> BookingRequest {
    BookingRequest {
        appointment_id: None,
        patient_id: patient.to_string(),
        doctor_id: doctor.to_string(),
        room_id: room.to_string(),
        date: june_first(),
        start_time: start,
        duration_minutes: 30,
    }
}

fn fast_policy() -> BookingPolicy {
    BookingPolicy {
        lock_timeout: Duration::from_millis(50),
        transaction_timeout: Duration::from_millis(500),
        max_attempts: 2,
        retry_backoff: Duration::from_millis(1),
        ..BookingPolicy::default()
    }
}

fn service_with(store: Arc<dyn AppointmentStore>, policy: BookingPolicy) -> AppointmentBookingService {
    AppointmentBookingService::new(store, Arc::new(BookingLocks::new()), policy)
}

fn memory_service() -> (Arc<InMemoryAppointmentStore>, AppointmentBookingService) {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let service = service_with(store.clone(), BookingPolicy::default());
    (store, service)
}

fn booked(outcome: BookingOutcome) -> Appointment {
    match outcome {
        BookingOutcome::Booked(appointment) => appointment,
        other => panic!("expected a booking, got {:?}", other),
    }
}

/// Store whose every call fails as if the backend were down.
struct UnreachableStore;

#[async_trait]
impl AppointmentStore for UnreachableStore {
    async fn find_by_date(&self, _date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        Err(AppointmentError::StoreUnavailable("connection refused".to_string()))
    }

    async fn insert(&self, _appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        panic!("insert must not be reached when the read failed");
    }

    async fn get(&self, _id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Err(AppointmentError::StoreUnavailable("connection refused".to_string()))
    }

    async fn list(&self, _query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        Err(AppointmentError::StoreUnavailable("connection refused".to_string()))
    }

    async fn update_status(
        &self,
        _id: Uuid,
        _status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        Err(AppointmentError::StoreUnavailable("connection refused".to_string()))
    }

    async fn delete(&self, _id: Uuid) -> Result<bool, AppointmentError> {
        Err(AppointmentError::StoreUnavailable("connection refused".to_string()))
    }
}

/// Rejects the first `failures` inserts with a write conflict, then behaves
/// like the in-memory store.
struct ContendedStore {
    inner: InMemoryAppointmentStore,
    failures: u32,
    inserts: AtomicU32,
}

impl ContendedStore {
    fn new(failures: u32) -> Self {
        Self { inner: InMemoryAppointmentStore::new(), failures, inserts: AtomicU32::new(0) }
    }
}

#[async_trait]
impl AppointmentStore for ContendedStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.find_by_date(date).await
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        let attempt = self.inserts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt <= self.failures {
            return Err(AppointmentError::StoreConflict("duplicate key".to_string()));
        }
        self.inner.insert(appointment).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.get(id).await
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list(query).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.update_status(id, status).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        self.inner.delete(id).await
    }
}

/// In-memory store whose status updates are slow or fail outright.
struct SlowCancelStore {
    inner: InMemoryAppointmentStore,
    delay: Duration,
    fail: bool,
}

#[async_trait]
impl AppointmentStore for SlowCancelStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.find_by_date(date).await
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        self.inner.insert(appointment).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        self.inner.get(id).await
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        self.inner.list(query).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(AppointmentError::StoreUnavailable("write timed out upstream".to_string()));
        }
        self.inner.update_status(id, status).await
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        self.inner.delete(id).await
    }
}

async fn scheduled_starts(store: &dyn AppointmentStore) -> Vec<NaiveTime> {
    store
        .find_by_date(june_first())
        .await
        .unwrap()
        .into_iter()
        .filter(|a| a.is_scheduled())
        .map(|a| a.start_time)
        .collect()
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[tokio::test]
async fn test_book_stores_scheduled_appointment() {
    let (store, service) = memory_service();

    let appointment = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "first visit").await.unwrap());

    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.duration_minutes, Some(30));
    assert_eq!(appointment.notes, "first visit");
    assert_eq!(store.get(appointment.id).await.unwrap(), Some(appointment));
}

#[tokio::test]
async fn test_overlapping_booking_is_rejected_and_not_written() {
    let (store, service) = memory_service();
    let first = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());

    let outcome = service.book(&request("d1", "r2", "p2", at(9, 15)), "").await.unwrap();

    assert_eq!(outcome, BookingOutcome::Rejected { reason: ConflictReason::DoctorBusy, with: first.id });
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_back_to_back_bookings_both_succeed() {
    let (store, service) = memory_service();

    booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());
    booked(service.book(&request("d1", "r1", "p1", at(9, 30)), "").await.unwrap());

    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_invalid_duration_never_reaches_store() {
    let service = service_with(Arc::new(UnreachableStore), fast_policy());
    let mut invalid = request("d1", "r1", "p1", at(10, 0));
    invalid.duration_minutes = 0;

    let result = service.book(&invalid, "").await;

    assert_matches!(result, Err(AppointmentError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_oversized_duration_is_rejected_before_any_write() {
    let (store, service) = memory_service();
    let mut oversized = request("d1", "r1", "p1", at(8, 0));
    oversized.duration_minutes = i32::MAX;

    let result = service.book(&oversized, "").await;

    assert_matches!(result, Err(AppointmentError::InvalidRequest(_)));
    assert!(store.find_by_date(june_first()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_failure_is_propagated() {
    let service = service_with(Arc::new(UnreachableStore), fast_policy());

    let result = service.book(&request("d1", "r1", "p1", at(9, 0)), "").await;

    assert_matches!(result, Err(AppointmentError::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_check_is_a_dry_run() {
    let (store, service) = memory_service();
    let first = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());

    let clash = service.check(&request("d2", "r1", "p2", at(9, 10))).await.unwrap();
    let clear = service.check(&request("d2", "r2", "p2", at(9, 10))).await.unwrap();

    assert_eq!(clash, ConflictResult::Conflict { reason: ConflictReason::RoomBusy, with: first.id });
    assert_eq!(clear, ConflictResult::NoConflict);
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 1);
}

// ==============================================================================
// CONCURRENCY AND RETRIES
// ==============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_bookings_admit_exactly_one() {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let service = Arc::new(service_with(store.clone(), BookingPolicy::default()));

    let attempts = (0..16).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            // Same doctor and slot, different rooms and patients.
            let proposal = request("d1", &format!("r{}", i), &format!("p{}", i), at(9, 0));
            service.book(&proposal, "").await
        })
    });

    let outcomes: Vec<BookingOutcome> = futures::future::join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    let booked_count = outcomes.iter().filter(|o| matches!(o, BookingOutcome::Booked(_))).count();
    assert_eq!(booked_count, 1);
    assert!(outcomes.iter().all(|o| match o {
        BookingOutcome::Booked(_) => true,
        BookingOutcome::Rejected { reason, .. } => *reason == ConflictReason::DoctorBusy,
    }));
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_on_disjoint_resources_all_succeed() {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let service = Arc::new(service_with(store.clone(), BookingPolicy::default()));

    let attempts = (0..8).map(|i| {
        let service = Arc::clone(&service);
        tokio::spawn(async move {
            let proposal = request(&format!("d{}", i), &format!("r{}", i), &format!("p{}", i), at(9, 0));
            service.book(&proposal, "").await
        })
    });

    for joined in futures::future::join_all(attempts).await {
        assert_matches!(joined.unwrap(), Ok(BookingOutcome::Booked(_)));
    }
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 8);
}

#[tokio::test]
async fn test_held_lock_ends_in_busy() {
    let store = Arc::new(InMemoryAppointmentStore::new());
    let locks = Arc::new(BookingLocks::new());
    let service = AppointmentBookingService::new(store.clone(), Arc::clone(&locks), fast_policy());
    let proposal = request("d1", "r1", "p1", at(9, 0));

    let _held = locks
        .acquire(LockKey::for_booking(&proposal), Duration::from_secs(1))
        .await
        .unwrap();

    let result = service.book(&proposal, "").await;

    assert_eq!(result, Err(AppointmentError::Busy(2)));
    assert!(store.find_by_date(june_first()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_store_write_conflict_is_retried() {
    let store = Arc::new(ContendedStore::new(1));
    let service = service_with(store.clone(), fast_policy());

    let outcome = service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap();

    assert_matches!(outcome, BookingOutcome::Booked(_));
    assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_persistent_write_conflict_ends_in_busy() {
    let store = Arc::new(ContendedStore::new(u32::MAX));
    let service = service_with(store.clone(), fast_policy());

    let result = service.book(&request("d1", "r1", "p1", at(9, 0)), "").await;

    assert_eq!(result, Err(AppointmentError::Busy(2)));
    assert_eq!(store.inserts.load(Ordering::SeqCst), 2);
}

// ==============================================================================
// LIFECYCLE
// ==============================================================================

#[tokio::test]
async fn test_cancel_frees_the_slot() {
    let (_store, service) = memory_service();
    let first = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());

    let cancelled = service.cancel(first.id).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);

    booked(service.book(&request("d1", "r1", "p2", at(9, 0)), "").await.unwrap());
}

#[tokio::test]
async fn test_cancel_twice_is_invalid_transition() {
    let (_store, service) = memory_service();
    let first = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());

    service.cancel(first.id).await.unwrap();
    let result = service.cancel(first.id).await;

    assert_eq!(result, Err(AppointmentError::InvalidStatusTransition(AppointmentStatus::Cancelled)));
}

#[tokio::test]
async fn test_cancel_unknown_is_not_found() {
    let (_store, service) = memory_service();

    assert_eq!(service.cancel(Uuid::new_v4()).await, Err(AppointmentError::NotFound));
}

#[tokio::test]
async fn test_remove_deletes_any_status() {
    let (store, service) = memory_service();
    let first = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());
    service.cancel(first.id).await.unwrap();

    service.remove(first.id).await.unwrap();

    assert_eq!(store.get(first.id).await.unwrap(), None);
    assert_eq!(service.remove(first.id).await, Err(AppointmentError::NotFound));
}

// ==============================================================================
// RESCHEDULE
// ==============================================================================

#[tokio::test]
async fn test_reschedule_overlapping_itself_succeeds() {
    let (store, service) = memory_service();
    let original = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "checkup").await.unwrap());

    let outcome = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("09:15".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await
        .unwrap();

    let replacement = booked(outcome);
    assert_ne!(replacement.id, original.id);
    assert_eq!(replacement.start_time, at(9, 15));
    assert_eq!(replacement.notes, "checkup");

    let original = store.get(original.id).await.unwrap().unwrap();
    assert_eq!(original.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn test_reschedule_into_taken_slot_is_rejected() {
    let (store, service) = memory_service();
    let original = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());
    let blocker = booked(service.book(&request("d2", "r2", "p2", at(11, 0)), "").await.unwrap());

    let outcome = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("11:00".to_string()),
            room_id: Some("r2".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await
        .unwrap();

    assert_eq!(outcome, BookingOutcome::Rejected { reason: ConflictReason::RoomBusy, with: blocker.id });
    let original = store.get(original.id).await.unwrap().unwrap();
    assert!(original.is_scheduled());
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reschedule_cancelled_is_invalid_transition() {
    let (_store, service) = memory_service();
    let original = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());
    service.cancel(original.id).await.unwrap();

    let result = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("10:00".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidStatusTransition(_)));
}

#[tokio::test]
async fn test_reschedule_rejects_malformed_time() {
    let (_store, service) = memory_service();
    let original = booked(service.book(&request("d1", "r1", "p1", at(9, 0)), "").await.unwrap());

    let result = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("9 o'clock".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await;

    assert_matches!(result, Err(AppointmentError::InvalidRequest(_)));
}

#[tokio::test]
async fn test_slow_cancel_during_reschedule_leaves_one_scheduled_visit() {
    let seeded = InMemoryAppointmentStore::new();
    let original = seeded
        .insert(request("d1", "r1", "p1", at(9, 0)).into_new_appointment(String::new()))
        .await
        .unwrap();
    let store = Arc::new(SlowCancelStore { inner: seeded, delay: Duration::from_millis(300), fail: false });
    let policy = BookingPolicy { transaction_timeout: Duration::from_millis(100), ..fast_policy() };
    let service = service_with(store.clone(), policy);

    let outcome = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("09:15".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await
        .unwrap();

    assert_matches!(outcome, BookingOutcome::Booked(_));
    assert_eq!(scheduled_starts(store.as_ref()).await, vec![at(9, 15)]);
}

#[tokio::test]
async fn test_failed_cancel_during_reschedule_removes_replacement() {
    let seeded = InMemoryAppointmentStore::new();
    let original = seeded
        .insert(request("d1", "r1", "p1", at(9, 0)).into_new_appointment(String::new()))
        .await
        .unwrap();
    let store = Arc::new(SlowCancelStore { inner: seeded, delay: Duration::ZERO, fail: true });
    let service = service_with(store.clone(), fast_policy());

    let result = service
        .reschedule(original.id, RescheduleAppointmentRequest {
            time: Some("09:15".to_string()),
            ..RescheduleAppointmentRequest::default()
        })
        .await;

    assert_matches!(result, Err(AppointmentError::StoreUnavailable(_)));
    assert_eq!(scheduled_starts(store.as_ref()).await, vec![at(9, 0)]);
    assert_eq!(store.find_by_date(june_first()).await.unwrap().len(), 1);
}

// ==============================================================================
// SEARCH
// ==============================================================================

#[tokio::test]
async fn test_search_filters_and_orders_by_start() {
    let legacy = Appointment {
        id: Uuid::new_v4(),
        patient_id: "p9".to_string(),
        doctor_id: "d1".to_string(),
        room_id: "r9".to_string(),
        date: june_first(),
        start_time: at(8, 0),
        duration_minutes: None,
        status: AppointmentStatus::Scheduled,
        notes: String::new(),
        created_at: Utc::now(),
        updated_at: Utc::now(),
    };
    let store = Arc::new(InMemoryAppointmentStore::with_appointments([legacy.clone()]));
    let service = service_with(store, BookingPolicy::default());

    booked(service.book(&request("d1", "r1", "p1", at(10, 0)), "").await.unwrap());
    booked(service.book(&request("d2", "r2", "p2", at(9, 0)), "").await.unwrap());

    let for_doctor = service
        .search(&AppointmentSearchQuery {
            doctor_id: Some("d1".to_string()),
            ..AppointmentSearchQuery::default()
        })
        .await
        .unwrap();

    assert_eq!(for_doctor.len(), 2);
    assert_eq!(for_doctor[0].id, legacy.id);
    assert_eq!(for_doctor[1].start_time, at(10, 0));

    // The seeded visit has no stored length and blocks for the default 30 minutes.
    let outcome = service.book(&request("d1", "r3", "p3", at(8, 20)), "").await.unwrap();
    assert_eq!(outcome, BookingOutcome::Rejected { reason: ConflictReason::DoctorBusy, with: legacy.id });
}
