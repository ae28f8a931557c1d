pub mod booking;
pub mod calendar;
pub mod conflict;
pub mod lifecycle;
pub mod locking;
pub mod slot;
pub mod store;
pub mod supabase_store;

pub use booking::{AppointmentBookingService, BookingPolicy};
pub use conflict::ConflictChecker;
pub use locking::BookingLocks;
pub use store::{AppointmentStore, InMemoryAppointmentStore};
pub use supabase_store::SupabaseAppointmentStore;
