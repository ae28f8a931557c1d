// libs/appointment-cell/src/state.rs
use std::sync::Arc;

use tracing::info;

use shared_config::{AppConfig, StoreBackend};
use shared_database::supabase::SupabaseClient;

use crate::services::booking::{AppointmentBookingService, BookingPolicy};
use crate::services::locking::BookingLocks;
use crate::services::store::{AppointmentStore, InMemoryAppointmentStore};
use crate::services::supabase_store::SupabaseAppointmentStore;

/// Shared handler state: the configured store and the process-wide booking
/// lock table. Handlers build a booking service per request from it.
pub struct AppointmentCellState {
    pub config: AppConfig,
    pub store: Arc<dyn AppointmentStore>,
    pub locks: Arc<BookingLocks>,
}

impl AppointmentCellState {
    pub fn new(config: AppConfig, store: Arc<dyn AppointmentStore>) -> Self {
        Self {
            config,
            store,
            locks: Arc::new(BookingLocks::new()),
        }
    }

    pub fn from_config(config: AppConfig) -> Self {
        let store: Arc<dyn AppointmentStore> = match config.appointment_store {
            StoreBackend::Memory => {
                info!("Using in-memory appointment store");
                Arc::new(InMemoryAppointmentStore::new())
            }
            StoreBackend::Supabase => {
                info!("Using Supabase appointment store at {}", config.supabase_url);
                let supabase = Arc::new(SupabaseClient::new(&config));
                Arc::new(SupabaseAppointmentStore::new(supabase))
            }
        };

        Self::new(config, store)
    }

    pub fn booking_service(&self) -> AppointmentBookingService {
        AppointmentBookingService::new(
            Arc::clone(&self.store),
            Arc::clone(&self.locks),
            BookingPolicy::from_config(&self.config),
        )
    }
}
