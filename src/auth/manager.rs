//! Token lifecycle management
//!
//! [`TokenManager`] owns one [`OAuthConfig`], a [`TokenStorage`] and an HTTP
//! client.  It hands out valid access tokens for caller-chosen keys,
//! refreshing expired ones at the token endpoint and persisting the result.
//!
//! Managers are plain values: build one per authorization server or tenant
//! and share it behind an `Arc`.  Nothing here is global.
//!
//! # Refresh coalescing
//!
//! Concurrent [`TokenManager::get_valid_token`] calls for the same key that
//! all observe an expired token perform a single refresh.  The first caller
//! takes a per-key lock and refreshes; the others wait on that lock, re-read
//! storage, and find the fresh token already stored.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use openapi_mcp_auth::auth::flow::OAuthConfig;
//! use openapi_mcp_auth::auth::manager::TokenManager;
//! use openapi_mcp_auth::auth::token_store::{MemoryTokenStorage, TokenSet};
//!
//! # async fn example() -> openapi_mcp_auth::error::Result<()> {
//! let config = OAuthConfig {
//!     client_id: "c1".to_string(),
//!     client_secret: None,
//!     authorization_url: "https://auth.example.com/authorize".to_string(),
//!     token_url: "https://auth.example.com/token".to_string(),
//!     scopes: vec![],
//!     pkce: true,
//!     redirect_uri: None,
//! };
//! let manager = TokenManager::new(config, Arc::new(MemoryTokenStorage::new()));
//!
//! manager.set_token("user-1", TokenSet::bearer("abc")).await?;
//! assert_eq!(manager.get_auth_header("user-1").await?, "Bearer abc");
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};

use crate::auth::flow::{self, AuthorizationState, OAuthConfig, DEFAULT_STATE_MAX_AGE};
use crate::auth::token_store::{expiry_after, TokenSet, TokenStorage};
use crate::config::TokenConfig;
use crate::error::{AuthError, Result, TokenError};

/// Default early-expiry window applied by [`TokenManager`].
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::seconds(30);

// ---------------------------------------------------------------------------
// TokenManager
// ---------------------------------------------------------------------------

/// Keeps access tokens valid for a set of caller-chosen keys.
pub struct TokenManager {
    config: OAuthConfig,
    storage: Arc<dyn TokenStorage>,
    http: reqwest::Client,
    refresh_buffer: Duration,
    state_max_age: Duration,
    refresh_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenManager")
            .field("config", &self.config)
            .field("refresh_buffer", &self.refresh_buffer)
            .field("state_max_age", &self.state_max_age)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a manager with default settings and a default HTTP client.
    pub fn new(config: OAuthConfig, storage: Arc<dyn TokenStorage>) -> Self {
        Self {
            config,
            storage,
            http: reqwest::Client::new(),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            state_max_age: DEFAULT_STATE_MAX_AGE,
            refresh_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a manager using the buffer, state age and request timeout
    /// from `settings`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if a duration setting is out of range or
    /// the HTTP client cannot be built.
    pub fn with_settings(
        config: OAuthConfig,
        storage: Arc<dyn TokenStorage>,
        settings: &TokenConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(
                settings.request_timeout_seconds,
            ))
            .build()
            .map_err(|e| AuthError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            refresh_buffer: settings.refresh_buffer()?,
            state_max_age: settings.state_max_age()?,
            ..Self::new(config, storage)
        })
    }

    /// Replaces the HTTP client used for token endpoint requests.
    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Replaces the early-expiry window.
    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// The OAuth configuration this manager was built with.
    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// The early-expiry window in effect.
    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    // -----------------------------------------------------------------------
    // Storage pass-through
    // -----------------------------------------------------------------------

    /// Returns the stored token for `key` without checking expiry.
    ///
    /// # Errors
    ///
    /// [`TokenError::NotFound`] when nothing is stored under `key`.
    pub async fn get_token(&self, key: &str) -> Result<TokenSet> {
        self.storage
            .get(key)
            .await?
            .ok_or_else(|| TokenError::NotFound.into())
    }

    /// Stores `token` under `key`, replacing any previous token.
    pub async fn set_token(&self, key: &str, token: TokenSet) -> Result<()> {
        self.storage.set(key, token).await?;
        tracing::debug!(key, "token stored");
        Ok(())
    }

    /// Removes the token stored under `key`.
    pub async fn delete_token(&self, key: &str) -> Result<()> {
        self.storage.delete(key).await?;
        self.release_refresh_lock(key);
        tracing::debug!(key, "token deleted");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Token endpoint
    // -----------------------------------------------------------------------

    /// Runs the `refresh_token` grant.  Never retried.
    ///
    /// # Errors
    ///
    /// [`TokenError::Request`] on transport failure, [`AuthError::OAuth`]
    /// when the server rejects the refresh.
    pub async fn refresh_token_request(&self, refresh_token: &str) -> Result<TokenSet> {
        let body = flow::build_refresh_token_body(&self.config, refresh_token);
        flow::request_token(&self.http, &self.config.token_url, &body).await
    }

    /// Returns a token for `key` that is not within the refresh buffer of
    /// expiry, refreshing and persisting it when needed.
    ///
    /// # Errors
    ///
    /// - [`TokenError::NotFound`] when nothing is stored under `key`.
    /// - [`TokenError::ExpiredNoRefresh`] when the token is expired and has no
    ///   refresh token.  No request is made in that case.
    /// - Any error from [`refresh_token_request`](Self::refresh_token_request)
    ///   or from storage.
    pub async fn get_valid_token(&self, key: &str) -> Result<TokenSet> {
        let token = self.get_token(key).await?;
        if !token.is_expired(self.refresh_buffer) {
            return Ok(token);
        }
        if token.refresh_token.is_none() {
            return Err(TokenError::ExpiredNoRefresh.into());
        }

        let lock = self.refresh_lock(key);
        let result = {
            let _guard = lock.lock().await;
            self.refresh_locked(key).await
        };
        drop(lock);
        self.release_refresh_lock(key);
        result
    }

    /// Refresh step of [`get_valid_token`](Self::get_valid_token); the
    /// caller holds the per-key lock.
    async fn refresh_locked(&self, key: &str) -> Result<TokenSet> {
        // Another caller may have refreshed while we waited.
        let current = self.get_token(key).await?;
        if !current.is_expired(self.refresh_buffer) {
            tracing::debug!(key, "token refreshed by a concurrent caller");
            return Ok(current);
        }
        let refresh_token = current
            .refresh_token
            .as_deref()
            .ok_or(TokenError::ExpiredNoRefresh)?;

        tracing::info!(key, "access token expired, refreshing");
        let fresh = match self.refresh_token_request(refresh_token).await {
            Ok(fresh) => fresh,
            Err(e) => {
                tracing::warn!(key, error = %e, "token refresh failed");
                return Err(e);
            }
        };

        let merged = merge_tokens(&current, fresh);
        self.storage.set(key, merged.clone()).await?;
        tracing::info!(key, "access token refreshed");
        Ok(merged)
    }

    /// `"<token_type> <access_token>"` for a valid token under `key`.
    pub async fn get_auth_header(&self, key: &str) -> Result<String> {
        Ok(self.get_valid_token(key).await?.authorization_header())
    }

    /// Inserts an `Authorization` entry for `key` into `headers`.
    pub async fn inject_auth_header(
        &self,
        headers: &mut HashMap<String, String>,
        key: &str,
    ) -> Result<()> {
        let value = self.get_auth_header(key).await?;
        headers.insert("Authorization".to_string(), value);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Obtaining tokens
    // -----------------------------------------------------------------------

    /// Finishes an authorization code flow and stores the token under `key`.
    ///
    /// See [`flow::complete_authorization`] for the checks performed.
    pub async fn complete_authorization(
        &self,
        key: &str,
        state: &AuthorizationState,
        received_state: &str,
        code: &str,
    ) -> Result<TokenSet> {
        let token = flow::complete_authorization(
            &self.http,
            &self.config,
            state,
            received_state,
            code,
            self.state_max_age,
        )
        .await?;
        self.set_token(key, token.clone()).await?;
        Ok(token)
    }

    /// Fetches a token with the `client_credentials` grant and stores it
    /// under `key`.
    pub async fn authorize_client_credentials(&self, key: &str) -> Result<TokenSet> {
        let token = flow::request_client_credentials(&self.http, &self.config).await?;
        self.set_token(key, token.clone()).await?;
        tracing::info!(key, "client credentials token obtained");
        Ok(token)
    }

    fn refresh_lock(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(key.to_string()).or_default())
    }

    /// Drops the lock entry for `key` once the map holds the only reference.
    fn release_refresh_lock(&self, key: &str) {
        let mut locks = self
            .refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(key);
        }
    }

    #[cfg(test)]
    fn refresh_lock_count(&self) -> usize {
        self.refresh_locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

// ---------------------------------------------------------------------------
// Pure helpers
// ---------------------------------------------------------------------------

/// Combines a refresh response with the token it replaces.
///
/// The result is `fresh`, except that the existing refresh token is kept when
/// the server did not rotate it.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::manager::merge_tokens;
/// use openapi_mcp_auth::auth::token_store::TokenSet;
///
/// let old = TokenSet { refresh_token: Some("r1".into()), ..TokenSet::bearer("a1") };
/// let merged = merge_tokens(&old, TokenSet::bearer("a2"));
/// assert_eq!(merged.access_token, "a2");
/// assert_eq!(merged.refresh_token.as_deref(), Some("r1"));
/// ```
pub fn merge_tokens(existing: &TokenSet, fresh: TokenSet) -> TokenSet {
    let refresh_token = fresh
        .refresh_token
        .or_else(|| existing.refresh_token.clone());
    TokenSet {
        refresh_token,
        ..fresh
    }
}

/// Time left before `token` expires, `None` if it never does.
///
/// Already expired tokens report [`Duration::zero`].
pub fn get_time_until_expiry(token: &TokenSet) -> Option<Duration> {
    token
        .expires_at
        .map(|expires_at| (expires_at - Utc::now()).max(Duration::zero()))
}

/// Copy of `token` expiring `expires_in` seconds from now.
///
/// Offsets beyond the representable range saturate to `DateTime::MAX_UTC`
/// or `DateTime::MIN_UTC`.
pub fn with_new_expiry(token: &TokenSet, expires_in: i64) -> TokenSet {
    let expires_at = expiry_after(expires_in).unwrap_or(if expires_in > 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    });
    TokenSet {
        expires_at: Some(expires_at),
        ..token.clone()
    }
}

/// Structural check: non-empty access token and token type.
pub fn validate_token(token: &TokenSet) -> Result<()> {
    if token.access_token.trim().is_empty() {
        return Err(TokenError::Invalid("Access token is empty".to_string()).into());
    }
    if token.token_type.trim().is_empty() {
        return Err(TokenError::Invalid("Token type is empty".to_string()).into());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
