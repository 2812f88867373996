//! HTTP implementation of the verification client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{StatusCode, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use super::{VerificationClient, VerificationOutcome};
use crate::config::VerifierConfig;
use crate::session::User;

#[derive(Debug, Error)]
pub enum VerifierError {
    #[error("Failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
    #[error("Invalid verification URL: {0}")]
    Url(String),
}

/// Calls `GET <url>` with the credential as a bearer token.
#[derive(Debug, Clone)]
pub struct HttpVerifier {
    client: reqwest::Client,
    url: Url,
}

impl HttpVerifier {
    pub fn new(config: &VerifierConfig) -> Result<Self, VerifierError> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(2)
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Self::with_client(client, &config.url)
    }

    /// Use a preconfigured client (timeouts, proxies) against `url`.
    pub fn with_client(client: reqwest::Client, url: &str) -> Result<Self, VerifierError> {
        Ok(Self {
            client,
            url: Url::parse(url).map_err(|e| VerifierError::Url(e.to_string()))?,
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl VerificationClient for HttpVerifier {
    async fn verify(&self, credential: &str) -> VerificationOutcome {
        let Some(headers) = auth_headers(credential) else {
            // A credential that cannot be sent as a header can never be accepted.
            warn!("Credential is not a valid header value");
            return VerificationOutcome::Rejected;
        };

        let response = match self.client.get(self.url.clone()).headers(headers).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, timeout = e.is_timeout(), "Verification request failed");
                return VerificationOutcome::Unavailable;
            }
        };

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED {
            debug!("Verification endpoint rejected the credential");
            return VerificationOutcome::Rejected;
        }
        if !status.is_success() {
            debug!(status = %status, "Verification endpoint returned an error status");
            return VerificationOutcome::Unavailable;
        }

        let body = match response.bytes().await {
            Ok(body) => body,
            Err(e) => {
                debug!(error = %e, "Failed to read verification response body");
                return VerificationOutcome::Unavailable;
            }
        };

        match parse_user_payload(&body) {
            Some(user) => VerificationOutcome::Confirmed(user),
            None => {
                warn!(bytes = body.len(), "Verification payload is not a valid user");
                VerificationOutcome::Malformed
            }
        }
    }
}

/// Headers authorizing a request with `credential`. `None` when the
/// credential contains bytes that cannot appear in a header.
pub fn auth_headers(credential: &str) -> Option<HeaderMap> {
    let mut bearer = HeaderValue::from_str(&format!("Bearer {}", credential.trim())).ok()?;
    bearer.set_sensitive(true);

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, bearer);
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    Some(headers)
}

/// Extract a valid user from a response body.
///
/// Accepts a bare user object, `{"user": {...}}`, or a JSend envelope
/// `{"status": "success", "data": ...}` wrapping either of those.
pub fn parse_user_payload(body: &[u8]) -> Option<User> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let user: User = serde_json::from_value(user_value(&value)?.clone()).ok()?;
    user.is_valid().then_some(user)
}

fn user_value(value: &Value) -> Option<&Value> {
    let obj = value.as_object()?;

    if let Some(data) = obj.get("data") {
        let succeeded = obj
            .get("status")
            .and_then(Value::as_str)
            .map_or(true, |status| status == "success");
        return if succeeded { user_value(data) } else { None };
    }

    if let Some(user) = obj.get("user") {
        return user.is_object().then_some(user);
    }

    Some(value)
}
