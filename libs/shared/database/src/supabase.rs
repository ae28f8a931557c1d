use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Method, StatusCode,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error};

use shared_config::AppConfig;

#[derive(Error, Debug)]
pub enum SupabaseError {
    #[error("Supabase request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Supabase API error ({status}): {body}")]
    Api { status: StatusCode, body: String },

    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl SupabaseError {
    /// True when PostgREST rejected the write because of a uniqueness or
    /// exclusion constraint.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SupabaseError::Api { status, .. } if *status == StatusCode::CONFLICT)
    }
}

pub struct SupabaseClient {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.supabase_url.trim_end_matches('/').to_string(),
            anon_key: config.supabase_anon_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, SupabaseError> {
        let mut headers = HeaderMap::new();

        let api_key = HeaderValue::from_str(&self.anon_key)
            .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.anon_key))
            .map_err(|e| SupabaseError::InvalidHeader(e.to_string()))?;

        headers.insert("apikey", api_key);
        headers.insert(reqwest::header::AUTHORIZATION, bearer);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(headers)
    }

    pub async fn request<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        self.request_with_headers(method, path, body, None).await
    }

    pub async fn request_with_headers<T>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        extra_headers: Option<HeaderMap>,
    ) -> Result<T, SupabaseError>
    where
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut headers = self.get_headers()?;
        if let Some(extra) = extra_headers {
            headers.extend(extra);
        }

        let mut req = self.client.request(method, &url).headers(headers);

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await?;
            error!("API error ({}): {}", status, body);
            return Err(SupabaseError::Api { status, body });
        }

        let data = response.json::<T>().await?;
        Ok(data)
    }
}

/// `Prefer: return=representation` so writes echo the stored rows back.
pub fn return_representation() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert("Prefer", HeaderValue::from_static("return=representation"));
    headers
}
