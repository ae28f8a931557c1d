use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use shared_config::{AppConfig, StoreBackend};

pub struct TestConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub appointment_store: StoreBackend,
    pub default_visit_minutes: i32,
    pub booking_timeout_ms: u64,
    pub booking_max_attempts: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            supabase_url: "http://localhost:54321".to_string(),
            supabase_anon_key: "test-anon-key".to_string(),
            appointment_store: StoreBackend::Memory,
            default_visit_minutes: 30,
            booking_timeout_ms: 2_000,
            booking_max_attempts: 3,
        }
    }
}

impl TestConfig {
    /// Config pointing the Supabase backend at a mock server.
    pub fn supabase(url: &str) -> Self {
        Self {
            supabase_url: url.to_string(),
            appointment_store: StoreBackend::Supabase,
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            supabase_url: self.supabase_url.clone(),
            supabase_anon_key: self.supabase_anon_key.clone(),
            appointment_store: self.appointment_store,
            default_visit_minutes: self.default_visit_minutes,
            booking_timeout_ms: self.booking_timeout_ms,
            booking_max_attempts: self.booking_max_attempts,
            ..AppConfig::default()
        }
    }
}

pub struct MockSupabaseResponses;

impl MockSupabaseResponses {
    /// An `appointments` row as PostgREST returns it (`time` columns carry seconds).
    pub fn appointment_row(
        id: Uuid,
        doctor_id: &str,
        room_id: &str,
        patient_id: &str,
        date: &str,
        start_time: &str,
        status: &str,
    ) -> serde_json::Value {
        json!({
            "id": id,
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "room_id": room_id,
            "date": date,
            "start_time": format!("{}:00", start_time),
            "duration_minutes": 30,
            "status": status,
            "notes": "",
            "created_at": Utc::now().to_rfc3339(),
            "updated_at": Utc::now().to_rfc3339()
        })
    }

    pub fn booking_body(
        doctor_id: &str,
        room_id: &str,
        patient_id: &str,
        date: &str,
        time: &str,
    ) -> serde_json::Value {
        json!({
            "patient_id": patient_id,
            "doctor_id": doctor_id,
            "room_id": room_id,
            "date": date,
            "time": time
        })
    }

    pub fn error_response(message: &str, code: &str) -> serde_json::Value {
        json!({
            "message": message,
            "code": code
        })
    }
}
