//! Per-call credentials.
//!
//! A call authenticates with a short-lived token. [`HttpCredentialProvider`]
//! asks a token endpoint for one; [`StaticCredentialProvider`] hands out a
//! configured API key for direct development connections.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use zeroize::{Zeroize, ZeroizeOnDrop};

use super::base::{CallError, CallResult};
use crate::config::CallConfig;

/// Default timeout for the token request.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Secret usable for exactly one call. Wiped from memory on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EphemeralCredential {
    secret: String,
}

impl EphemeralCredential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// The raw token.
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for EphemeralCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EphemeralCredential")
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Source of per-call credentials.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Obtain a credential for one call.
    async fn fetch(&self) -> CallResult<EphemeralCredential>;
}

// =============================================================================
// Static key
// =============================================================================

/// Returns the same configured key for every call.
pub struct StaticCredentialProvider {
    credential: EphemeralCredential,
}

impl StaticCredentialProvider {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            credential: EphemeralCredential::new(key),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentialProvider {
    async fn fetch(&self) -> CallResult<EphemeralCredential> {
        if self.credential.secret().is_empty() {
            return Err(CallError::Credential("API key is empty".to_string()));
        }
        Ok(self.credential.clone())
    }
}

// =============================================================================
// Token endpoint
// =============================================================================

/// Fetches an ephemeral token with a `POST` to a token endpoint.
///
/// Accepted response shapes:
/// - `{"client_secret": {"value": "..."}}`
/// - `{"client_secret": "..."}`
/// - `{"token": "..."}`
pub struct HttpCredentialProvider {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpCredentialProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            timeout: TOKEN_REQUEST_TIMEOUT,
        }
    }

    /// Override the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl CredentialProvider for HttpCredentialProvider {
    async fn fetch(&self) -> CallResult<EphemeralCredential> {
        let response = self
            .client
            .post(&self.endpoint)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| CallError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| CallError::Credential(format!("invalid token response: {e}")))?;

        let token = extract_token(&body).ok_or_else(|| {
            CallError::Credential("token response did not contain a client secret".to_string())
        })?;

        tracing::debug!("Obtained ephemeral call credential");
        Ok(EphemeralCredential::new(token))
    }
}

/// Pull the token out of a token endpoint response.
pub fn extract_token(body: &Value) -> Option<String> {
    body.get("client_secret")
        .and_then(|secret| {
            secret
                .get("value")
                .and_then(Value::as_str)
                .or_else(|| secret.as_str())
        })
        .or_else(|| body.get("token").and_then(Value::as_str))
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
}

/// Build the credential provider described by the configuration.
///
/// A token endpoint wins over a static key.
pub fn provider_from_config(config: &CallConfig) -> CallResult<Arc<dyn CredentialProvider>> {
    if let Some(endpoint) = config.token_endpoint.as_deref().filter(|e| !e.is_empty()) {
        let provider = HttpCredentialProvider::new(endpoint)
            .with_timeout(Duration::from_millis(config.connect_timeout_ms));
        return Ok(Arc::new(provider));
    }
    if let Some(key) = config.api_key.as_deref().filter(|k| !k.is_empty()) {
        return Ok(Arc::new(StaticCredentialProvider::new(key)));
    }
    Err(CallError::InvalidConfiguration(
        "either a token endpoint or an API key is required".to_string(),
    ))
}
