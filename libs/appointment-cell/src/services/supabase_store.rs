// libs/appointment-cell/src/services/supabase_store.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use reqwest::Method;
use serde_json::json;
use tracing::{debug, error, warn};
use uuid::Uuid;

use shared_database::supabase::{return_representation, SupabaseClient, SupabaseError};

use crate::models::{
    Appointment, AppointmentError, AppointmentSearchQuery, AppointmentStatus, NewAppointment,
};
use crate::services::store::AppointmentStore;

const APPOINTMENTS_PATH: &str = "/rest/v1/appointments";
const SCHEDULE_ORDER: &str = "order=date.asc,start_time.asc";

/// Relational store reached through PostgREST.
///
/// The `appointments` table is expected to carry a unique constraint on
/// `(date, doctor_id, start_time)` for scheduled rows. A violation comes back
/// as HTTP 409 and surfaces as `StoreConflict`.
pub struct SupabaseAppointmentStore {
    supabase: Arc<SupabaseClient>,
}

impl SupabaseAppointmentStore {
    pub fn new(supabase: Arc<SupabaseClient>) -> Self {
        Self { supabase }
    }

    async fn fetch(&self, filters: Vec<String>) -> Result<Vec<Appointment>, AppointmentError> {
        let mut query_parts = filters;
        query_parts.push(SCHEDULE_ORDER.to_string());
        let path = format!("{}?{}", APPOINTMENTS_PATH, query_parts.join("&"));

        self.supabase
            .request::<Vec<Appointment>>(Method::GET, &path, None)
            .await
            .map_err(map_store_error)
    }
}

fn eq_filter(column: &str, value: &str) -> String {
    format!("{}=eq.{}", column, urlencoding::encode(value))
}

fn map_store_error(err: SupabaseError) -> AppointmentError {
    if err.is_conflict() {
        warn!("Appointment store rejected write: {}", err);
        AppointmentError::StoreConflict(err.to_string())
    } else {
        error!("Appointment store error: {}", err);
        AppointmentError::StoreUnavailable(err.to_string())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseAppointmentStore {
    async fn find_by_date(&self, date: NaiveDate) -> Result<Vec<Appointment>, AppointmentError> {
        debug!("Fetching appointments on {}", date);
        self.fetch(vec![eq_filter("date", &date.to_string())]).await
    }

    async fn insert(&self, appointment: NewAppointment) -> Result<Appointment, AppointmentError> {
        let now = Utc::now();
        let appointment_id = Uuid::new_v4();

        let mut row = serde_json::to_value(&appointment)
            .map_err(|e| AppointmentError::StoreUnavailable(format!("Failed to encode appointment: {}", e)))?;
        if let Some(fields) = row.as_object_mut() {
            fields.insert("id".to_string(), json!(appointment_id));
            fields.insert("status".to_string(), json!(AppointmentStatus::Scheduled));
            fields.insert("created_at".to_string(), json!(now.to_rfc3339()));
            fields.insert("updated_at".to_string(), json!(now.to_rfc3339()));
        }

        let created: Vec<Appointment> = self.supabase
            .request_with_headers(Method::POST, APPOINTMENTS_PATH, Some(row), Some(return_representation()))
            .await
            .map_err(map_store_error)?;

        created.into_iter().next().ok_or_else(|| {
            AppointmentError::StoreUnavailable("Appointment insert returned no row".to_string())
        })
    }

    async fn get(&self, id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let found = self.fetch(vec![eq_filter("id", &id.to_string())]).await?;
        Ok(found.into_iter().next())
    }

    async fn list(&self, query: &AppointmentSearchQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let mut filters = Vec::new();
        if let Some(date) = query.date {
            filters.push(eq_filter("date", &date.to_string()));
        }
        if let Some(doctor_id) = &query.doctor_id {
            filters.push(eq_filter("doctor_id", doctor_id));
        }
        if let Some(room_id) = &query.room_id {
            filters.push(eq_filter("room_id", room_id));
        }
        if let Some(patient_id) = &query.patient_id {
            filters.push(eq_filter("patient_id", patient_id));
        }
        if let Some(status) = query.status {
            filters.push(eq_filter("status", &status.to_string()));
        }

        self.fetch(filters).await
    }

    async fn update_status(
        &self,
        id: Uuid,
        status: AppointmentStatus,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("{}?{}", APPOINTMENTS_PATH, eq_filter("id", &id.to_string()));
        let body = json!({
            "status": status,
            "updated_at": Utc::now().to_rfc3339(),
        });

        let updated: Vec<Appointment> = self.supabase
            .request_with_headers(Method::PATCH, &path, Some(body), Some(return_representation()))
            .await
            .map_err(map_store_error)?;

        Ok(updated.into_iter().next())
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppointmentError> {
        let path = format!("{}?{}", APPOINTMENTS_PATH, eq_filter("id", &id.to_string()));

        let deleted: Vec<Appointment> = self.supabase
            .request_with_headers(Method::DELETE, &path, None, Some(return_representation()))
            .await
            .map_err(map_store_error)?;

        Ok(!deleted.is_empty())
    }
}
