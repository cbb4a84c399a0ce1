//! Blocking client for OpenAI-compatible HTTP endpoints.
//!
//! Shared by the remote embedder and the chat model. Maps HTTP failures onto
//! [`ApiError`]; nothing here retries.
use reqwest::StatusCode;
use reqwest::blocking::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },

    #[error("rate limit exceeded: {message}")]
    RateLimited { message: String },

    #[error("API error: {status} - {message}")]
    Server { status: u16, message: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    pub fn is_authentication_error(&self) -> bool {
        matches!(self, ApiError::Authentication { .. })
    }
}

fn normalize_base_url(url: &str) -> String {
    url.trim_end_matches('/').to_string()
}

fn has_version_suffix(base_url: &str) -> bool {
    let Some(last_segment) = base_url.rsplit('/').next() else {
        return false;
    };
    let Some(rest) = last_segment.strip_prefix('v') else {
        return false;
    };
    !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
}

/// Resolve `path` (e.g. `embeddings`) against a base URL that may or may not
/// already carry a version segment.
pub fn endpoint(base_url: &str, path: &str) -> String {
    let normalized = normalize_base_url(base_url);
    if normalized.ends_with(&format!("/{path}")) {
        return normalized;
    }
    if has_version_suffix(&normalized) {
        return format!("{normalized}/{path}");
    }
    format!("{normalized}/v1/{path}")
}

/// Pull a human-readable message out of an OpenAI error body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

pub struct OpenAiClient {
    http: Client,
    api_key: Secret<String>,
    base_url: String,
}

impl OpenAiClient {
    pub fn new(api_key: Secret<String>, base_url: &str) -> Self {
        Self {
            http: Client::new(),
            api_key,
            base_url: normalize_base_url(base_url),
        }
    }

    /// POST `body` as JSON to `path` and decode the JSON reply.
    pub fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = endpoint(&self.base_url, path);
        debug!("POST {url}");

        let resp = self
            .http
            .post(&url)
            .bearer_auth(self.api_key.expose_secret())
            .json(body)
            .send()?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<R>()
                .map_err(|e| ApiError::InvalidResponse(e.to_string()));
        }

        let message = error_message(&resp.text().unwrap_or_default());
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ApiError::Authentication { message }
            }
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited { message },
            _ => ApiError::Server {
                status: status.as_u16(),
                message,
            },
        })
    }
}
