//! Error types for the OAuth credential subsystem
//!
//! Every fallible operation in the library returns [`Result`], whose error
//! side is the closed [`AuthError`] enum.  Callers match on the variants
//! instead of inspecting message strings.

use thiserror::Error;

/// Main error type for authorization operations
///
/// The three top-level variants mirror the three failure domains of the
/// subsystem: static configuration, the authorization server, and the token
/// lifecycle.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid static configuration (missing client id, unparseable URL, ...)
    ///
    /// Configuration errors are never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error reported by the authorization server, or a malformed token
    /// endpoint response
    #[error("{description}")]
    OAuth {
        /// Machine-readable OAuth error code (e.g. `invalid_grant`)
        code: String,
        /// Human-readable description
        description: String,
        /// HTTP status of the token endpoint response, when one was received
        status: Option<u16>,
    },

    /// Token lifecycle errors
    #[error(transparent)]
    Token(#[from] TokenError),
}

/// Failures of the token lifecycle and of authorization-state handling
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// No token is stored under the requested key
    #[error("Token not found")]
    NotFound,

    /// The stored token is expired and cannot be refreshed
    #[error("Token expired and no refresh token available")]
    ExpiredNoRefresh,

    /// The token storage backend failed
    #[error("Token storage error: {0}")]
    Storage(String),

    /// The request to the token endpoint could not be completed
    #[error("Token request failed: {0}")]
    Request(String),

    /// The token failed structural or validator checks
    #[error("{0}")]
    Invalid(String),

    /// The `state` returned on the callback does not match the issued one
    #[error("State mismatch in authorization callback")]
    StateMismatch,

    /// The authorization state is older than the permitted maximum age
    #[error("Authorization state expired")]
    StateExpired,

    /// No pending authorization exists for the returned `state`
    #[error("Unknown or already consumed authorization state")]
    StateUnknown,
}

impl AuthError {
    /// Builds an [`AuthError::OAuth`] without an HTTP status.
    pub fn oauth(code: impl Into<String>, description: impl Into<String>) -> Self {
        Self::OAuth {
            code: code.into(),
            description: description.into(),
            status: None,
        }
    }

    /// Returns the OAuth error code when this is an [`AuthError::OAuth`].
    pub fn oauth_code(&self) -> Option<&str> {
        match self {
            Self::OAuth { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Result type alias for authorization operations
pub type Result<T> = std::result::Result<T, AuthError>;
