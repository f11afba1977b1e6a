//! Player identity verification.
//!
//! Enqueue tickets are either checked against the external identity
//! provider (which also pins the canonical player id) or, when identity is
//! disabled, against a shared deployment token.

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(String),
}

pub type IdentityResult<T> = Result<T, IdentityError>;

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    /// Does `ticket` authenticate the caller as `user_id`?
    async fn verify(&self, user_id: &str, ticket: &str) -> IdentityResult<bool>;
}

#[derive(Debug, Default, Deserialize)]
struct TicketMessage {
    #[serde(default)]
    response: TicketResponse,
}

#[derive(Debug, Default, Deserialize)]
struct TicketResponse {
    #[serde(default)]
    params: TicketParams,
    #[serde(default)]
    error: TicketApiError,
}

#[derive(Debug, Default, Deserialize)]
struct TicketParams {
    #[serde(default, rename = "steamid")]
    steam_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct TicketApiError {
    #[serde(default, rename = "errordesc")]
    error_desc: String,
}

/// Verifies auth tickets against the identity provider's HTTP API.
pub struct TicketVerifier {
    client: reqwest::Client,
    api_url: String,
    app_id: String,
    api_key: String,
}

impl TicketVerifier {
    pub fn new(
        api_url: impl Into<String>,
        app_id: impl Into<String>,
        api_key: impl Into<String>,
    ) -> IdentityResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(TicketVerifier {
            client,
            api_url: api_url.into(),
            app_id: app_id.into(),
            api_key: api_key.into(),
        })
    }
}

#[async_trait]
impl IdentityVerifier for TicketVerifier {
    async fn verify(&self, user_id: &str, ticket: &str) -> IdentityResult<bool> {
        let resp = self
            .client
            .get(&self.api_url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("appid", self.app_id.as_str()),
                ("ticket", ticket),
            ])
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(IdentityError::Status(resp.status().as_u16()));
        }
        let body = resp.bytes().await?;
        let message: TicketMessage =
            serde_json::from_slice(&body).map_err(|e| IdentityError::Malformed(e.to_string()))?;

        if !message.response.error.error_desc.is_empty() {
            log::warn!(
                "identity: ticket rejected: {}",
                message.response.error.error_desc
            );
            return Ok(false);
        }
        // The caller-supplied id must match the canonical one.
        Ok(message.response.params.steam_id == user_id)
    }
}

/// Fallback when identity verification is disabled: the ticket must equal
/// the configured shared token.
pub struct SharedSecretVerifier {
    token: String,
}

impl SharedSecretVerifier {
    pub fn new(token: impl Into<String>) -> Self {
        SharedSecretVerifier {
            token: token.into(),
        }
    }
}

#[async_trait]
impl IdentityVerifier for SharedSecretVerifier {
    async fn verify(&self, _user_id: &str, ticket: &str) -> IdentityResult<bool> {
        Ok(ticket == self.token)
    }
}
