use std::env;
use std::str::FromStr;
use tracing::warn;

pub const DEFAULT_VISIT_MINUTES: i32 = 30;
pub const DEFAULT_BOOKING_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_BOOKING_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_SERVER_PORT: u16 = 3000;

/// Which appointment store backend the API should run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Supabase,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" | "in_memory" | "document" => Ok(StoreBackend::Memory),
            "supabase" | "postgrest" | "relational" => Ok(StoreBackend::Supabase),
            other => Err(format!("unknown appointment store backend: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub appointment_store: StoreBackend,
    pub default_visit_minutes: i32,
    pub booking_timeout_ms: u64,
    pub booking_max_attempts: u32,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            appointment_store: StoreBackend::Memory,
            default_visit_minutes: DEFAULT_VISIT_MINUTES,
            booking_timeout_ms: DEFAULT_BOOKING_TIMEOUT_MS,
            booking_max_attempts: DEFAULT_BOOKING_MAX_ATTEMPTS,
            server_port: DEFAULT_SERVER_PORT,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            supabase_url: env::var("SUPABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_URL not set, using empty value");
                    String::new()
                }),
            supabase_anon_key: env::var("SUPABASE_ANON_PUBLIC_KEY")
                .unwrap_or_else(|_| {
                    warn!("SUPABASE_ANON_PUBLIC_KEY not set, using empty value");
                    String::new()
                }),
            appointment_store: parse_var("APPOINTMENT_STORE", StoreBackend::Memory),
            default_visit_minutes: parse_var("DEFAULT_VISIT_MINUTES", DEFAULT_VISIT_MINUTES),
            booking_timeout_ms: parse_var("BOOKING_TIMEOUT_MS", DEFAULT_BOOKING_TIMEOUT_MS),
            booking_max_attempts: parse_var("BOOKING_MAX_ATTEMPTS", DEFAULT_BOOKING_MAX_ATTEMPTS),
            server_port: parse_var("SERVER_PORT", DEFAULT_SERVER_PORT),
        };

        if config.default_visit_minutes <= 0 {
            warn!(
                "DEFAULT_VISIT_MINUTES must be positive, got {}; using {}",
                config.default_visit_minutes, DEFAULT_VISIT_MINUTES
            );
            return Self { default_visit_minutes: DEFAULT_VISIT_MINUTES, ..config };
        }

        if config.appointment_store == StoreBackend::Supabase && !config.is_supabase_configured() {
            warn!("APPOINTMENT_STORE=supabase but Supabase is not fully configured");
        }

        config
    }

    pub fn is_supabase_configured(&self) -> bool {
        !self.supabase_url.is_empty() && !self.supabase_anon_key.is_empty()
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {:?}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
