//! GCP Authentication
//!
//! Handles authentication using Application Default Credentials (ADC) with
//! token caching, plus a static-token source for tests and pre-fetched
//! tokens.

use crate::error::{Error, Result};
use gcp_auth::TokenProvider;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Token expiry buffer - refresh tokens this much before they actually expire
/// This prevents using tokens that are about to expire during a request
const TOKEN_EXPIRY_BUFFER: Duration = Duration::from_secs(60);

/// Default token TTL if we can't determine expiry (conservative: 30 minutes)
const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30 * 60);

/// A source of bearer tokens for the transport
#[derive(Clone)]
pub enum Credentials {
    /// Application Default Credentials, discovered at first use
    Adc(AdcCredentials),
    /// A fixed token supplied by the caller
    Static(Arc<str>),
}

impl Credentials {
    /// Initialize Application Default Credentials
    pub async fn adc() -> Result<Self> {
        Ok(Credentials::Adc(AdcCredentials::new().await?))
    }

    /// Wrap a pre-fetched token
    pub fn static_token(token: impl Into<Arc<str>>) -> Self {
        Credentials::Static(token.into())
    }

    /// Get an access token for API calls
    pub async fn token(&self) -> Result<String> {
        match self {
            Credentials::Adc(adc) => adc.token().await,
            Credentials::Static(token) => Ok(token.to_string()),
        }
    }

    /// Force refresh; no-op for static tokens
    pub async fn refresh(&self) -> Result<String> {
        match self {
            Credentials::Adc(adc) => adc.refresh_token().await,
            Credentials::Static(token) => Ok(token.to_string()),
        }
    }
}

/// ADC credentials holder with token caching
#[derive(Clone)]
pub struct AdcCredentials {
    provider: Arc<dyn TokenProvider>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

#[derive(Clone)]
struct CachedToken {
    token: String,
    /// When this token expires (with buffer applied)
    expires_at: Instant,
}

impl CachedToken {
    fn is_valid(&self) -> bool {
        Instant::now() < self.expires_at
    }
}

impl AdcCredentials {
    /// Create new credentials using Application Default Credentials
    pub async fn new() -> Result<Self> {
        let provider = gcp_auth::provider().await.map_err(|e| {
            Error::Unauthenticated(format!(
                "failed to initialize GCP authentication ({}); run 'gcloud auth application-default login'",
                e
            ))
        })?;

        Ok(Self {
            provider,
            token_cache: Arc::new(RwLock::new(None)),
        })
    }

    /// Get an access token, reusing the cached one while it is valid
    pub async fn token(&self) -> Result<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if cached.is_valid() {
                    return Ok(cached.token.clone());
                }
                tracing::debug!("Cached token expired, fetching new token");
            }
        }

        let token = self
            .provider
            .token(DEFAULT_SCOPES)
            .await
            .map_err(|e| Error::Unauthenticated(format!("failed to get access token: {}", e)))?;

        let token_str = token.as_str().to_string();

        // gcp_auth reports expiry as an Option; use a conservative TTL
        let expires_at = Instant::now() + DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER;

        {
            let mut cache = self.token_cache.write().await;
            *cache = Some(CachedToken {
                token: token_str.clone(),
                expires_at,
            });
        }

        tracing::debug!(
            "New token cached, expires in ~{} minutes",
            (DEFAULT_TOKEN_TTL - TOKEN_EXPIRY_BUFFER).as_secs() / 60
        );

        Ok(token_str)
    }

    /// Force refresh the token
    pub async fn refresh_token(&self) -> Result<String> {
        {
            let mut cache = self.token_cache.write().await;
            *cache = None;
        }
        self.token().await
    }
}
