//! Token sets and the pluggable storage behind the token lifecycle
//!
//! [`TokenStorage`] is the capability the [`TokenManager`] depends on.  The
//! crate ships [`MemoryTokenStorage`], an in-memory map with no eviction and
//! no persistence across restarts; durable deployments provide their own
//! implementation of the same trait.
//!
//! [`TokenManager`]: super::manager::TokenManager

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::Result;

/// Token type assumed when the token endpoint omits `token_type`.
pub const DEFAULT_TOKEN_TYPE: &str = "Bearer";

// ---------------------------------------------------------------------------
// TokenSet
// ---------------------------------------------------------------------------

/// An access token together with its refresh material.
///
/// Token sets are replaced wholesale; nothing in this crate mutates one in
/// place.  The `expires_at` field is computed from the `expires_in` seconds
/// returned by the token endpoint so that expiry can be decided without a
/// server round-trip.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::token_store::TokenSet;
///
/// let token = TokenSet::bearer("my_access_token");
/// assert_eq!(token.token_type, "Bearer");
/// assert_eq!(token.authorization_header(), "Bearer my_access_token");
///
/// // A token with no expiry is never considered expired.
/// assert!(!token.is_expired(chrono::Duration::seconds(30)));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    /// The access token string issued by the authorization server.
    pub access_token: String,

    /// The token type, `"Bearer"` unless the server says otherwise.
    #[serde(default = "default_token_type")]
    pub token_type: String,

    /// UTC timestamp at which the access token expires.
    ///
    /// `None` means the token never expires.  Serialized as Unix seconds.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_seconds_option"
    )]
    pub expires_at: Option<DateTime<Utc>>,

    /// Refresh token used to obtain a new access token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,

    /// Space-separated scopes granted by the authorization server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    DEFAULT_TOKEN_TYPE.to_string()
}

/// `now + seconds`, or `None` when the result is not a representable time.
pub(crate) fn expiry_after(seconds: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(seconds).and_then(|d| Utc::now().checked_add_signed(d))
}

impl TokenSet {
    /// Builds a non-expiring `Bearer` token set with no refresh token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_at: None,
            refresh_token: None,
            scope: None,
        }
    }

    /// Returns `true` once `now >= expires_at - buffer`.
    ///
    /// Tokens without `expires_at` never expire.  When `expires_at - buffer`
    /// falls outside the representable range, a positive buffer counts as
    /// expired and a negative one does not.
    pub fn is_expired(&self, buffer: Duration) -> bool {
        match self.expires_at {
            None => false,
            Some(expires_at) => match expires_at.checked_sub_signed(buffer) {
                Some(deadline) => Utc::now() >= deadline,
                None => buffer > Duration::zero(),
            },
        }
    }

    /// `"<token_type> <access_token>"`, ready for an `Authorization` header.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// The granted scopes split on whitespace.
    pub fn scopes(&self) -> Vec<&str> {
        self.scope
            .as_deref()
            .map(|s| s.split_whitespace().collect())
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// TokenStorage
// ---------------------------------------------------------------------------

/// Key/value capability for persisting [`TokenSet`]s.
///
/// Keys are chosen by the caller (a user id, a session id, a tenant name).
/// Implementations report backend failures as
/// [`TokenError::Storage`](crate::error::TokenError::Storage).
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Loads the token stored under `key`, `None` when absent.
    async fn get(&self, key: &str) -> Result<Option<TokenSet>>;

    /// Stores `token` under `key`, replacing any previous value.
    async fn set(&self, key: &str, token: TokenSet) -> Result<()>;

    /// Removes the token stored under `key`.  Removing a missing key is not
    /// an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory [`TokenStorage`].
///
/// Tokens are lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    tokens: RwLock<HashMap<String, TokenSet>>,
}

impl MemoryTokenStorage {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tokens.
    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }

    /// `true` when nothing is stored.
    pub async fn is_empty(&self) -> bool {
        self.tokens.read().await.is_empty()
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn get(&self, key: &str) -> Result<Option<TokenSet>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, token: TokenSet) -> Result<()> {
        self.tokens.write().await.insert(key.to_string(), token);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.tokens.write().await.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
