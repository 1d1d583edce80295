//! Access credentials for the stream.
//!
//! A [`CredentialProvider`] hands out bearer tokens and forgets them on
//! request. The facade fetches a credential before every connection attempt
//! and invalidates it when the platform rejects it.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::StreamError;

/// Bearer token attached to each stream call.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Value for the `authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn fetch(&self) -> Result<Credential, StreamError>;

    /// Drop any cached credential so the next fetch obtains a fresh one.
    async fn invalidate(&self);
}

/// Fetch a credential, invalidating and retrying exactly once on failure.
pub async fn fetch_with_retry(provider: &dyn CredentialProvider) -> Result<Credential, StreamError> {
    match provider.fetch().await {
        Ok(credential) => Ok(credential),
        Err(err) => {
            warn!(error = %err, "credential fetch failed; invalidating and retrying once");
            provider.invalidate().await;
            provider.fetch().await
        }
    }
}

/// Fixed token, for development setups and tests.
#[derive(Clone, Debug)]
pub struct StaticToken {
    credential: Credential,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            credential: Credential::new(token),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn fetch(&self) -> Result<Credential, StreamError> {
        Ok(self.credential.clone())
    }

    async fn invalidate(&self) {
        debug!("static token cannot be refreshed");
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
}

struct CachedToken {
    credential: Credential,
    expires_at: Option<DateTime<Utc>>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// OAuth2 client-credentials grant against the platform token endpoint.
///
/// Tokens are cached until `expires_in` minus the refresh margin has passed
/// or until [`CredentialProvider::invalidate`] is called.
pub struct OAuthClientCredentials {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_margin: ChronoDuration,
    cached: Mutex<Option<CachedToken>>,
}

impl OAuthClientCredentials {
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, StreamError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StreamError::Credential(e.to_string()))?;

        Ok(Self {
            client,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_margin: ChronoDuration::seconds(30),
            cached: Mutex::new(None),
        })
    }

    pub fn with_refresh_margin(mut self, margin: Duration) -> Self {
        self.refresh_margin =
            ChronoDuration::from_std(margin).unwrap_or_else(|_| ChronoDuration::seconds(30));
        self
    }

    async fn request_token(&self) -> Result<CachedToken, StreamError> {
        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| StreamError::Credential(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StreamError::Credential(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| StreamError::Credential(format!("invalid token response: {e}")))?;

        let expires_at = token_expiry(Utc::now(), token.expires_in, self.refresh_margin);

        info!(client_id = %self.client_id, expires_at = ?expires_at, "obtained access token");
        Ok(CachedToken {
            credential: Credential::new(token.access_token),
            expires_at,
        })
    }
}

/// Refresh deadline for a token issued at `now`.
///
/// A non-positive lifetime is already stale. A lifetime too large to
/// represent is treated as open-ended.
fn token_expiry(
    now: DateTime<Utc>,
    expires_in: Option<i64>,
    margin: ChronoDuration,
) -> Option<DateTime<Utc>> {
    let secs = expires_in?;
    if secs <= 0 {
        return Some(now);
    }
    let expires_at = ChronoDuration::try_seconds(secs).and_then(|ttl| now.checked_add_signed(ttl))?;
    Some(expires_at.checked_sub_signed(margin).unwrap_or(now))
}

#[async_trait]
impl CredentialProvider for OAuthClientCredentials {
    async fn fetch(&self) -> Result<Credential, StreamError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.credential.clone());
        }

        let token = self.request_token().await?;
        let credential = token.credential.clone();
        *cached = Some(token);
        Ok(credential)
    }

    async fn invalidate(&self) {
        if self.cached.lock().await.take().is_some() {
            debug!(client_id = %self.client_id, "cached access token invalidated");
        }
    }
}
