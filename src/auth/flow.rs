//! OAuth 2.1 authorization code flow with PKCE
//!
//! This module holds the pieces of the browser-based authorization flow that
//! do not depend on where tokens are stored:
//!
//! 1. Validate the static [`OAuthConfig`].
//! 2. Create an [`AuthorizationState`] (state token + PKCE pair + redirect
//!    URI + creation time) and build the authorization URL.
//! 3. On the callback, check `state` and the age of the flow, then exchange
//!    the code for a [`TokenSet`] at the token endpoint.
//!
//! It also builds the form bodies for the `client_credentials` and
//! `refresh_token` grants and parses every token endpoint response through
//! [`parse_token_response`].
//!
//! # Flow states
//!
//! `INIT -> STATE_CREATED -> CALLBACK_RECEIVED -> TOKEN_EXCHANGED`, or
//! `REJECTED` on state mismatch, expiry, configuration error, or an error
//! returned by the token endpoint.  [`initialize_auth_flow`] covers the
//! first transition and [`complete_authorization`] the rest.
//!
//! # References
//!
//! - OAuth 2.1 draft <https://datatracker.ietf.org/doc/draft-ietf-oauth-v2-1/>
//! - RFC 6749 <https://www.rfc-editor.org/rfc/rfc6749>
//! - RFC 7636 PKCE <https://www.rfc-editor.org/rfc/rfc7636>

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::auth::pkce::{self, PkceParams};
use crate::auth::token_store::{expiry_after, TokenSet, DEFAULT_TOKEN_TYPE};
use crate::error::{AuthError, Result, TokenError};

/// Default maximum age of an [`AuthorizationState`]: 10 minutes.
pub const DEFAULT_STATE_MAX_AGE: Duration = Duration::minutes(10);

/// A form-encoded request body, in parameter order.
pub type FormBody = Vec<(&'static str, String)>;

// ---------------------------------------------------------------------------
// OAuthConfig
// ---------------------------------------------------------------------------

/// Static OAuth client configuration for one authorization server.
///
/// Supplied by the caller (usually from the YAML configuration) and checked
/// with [`validate_oauth_config`] before use.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::flow::{validate_oauth_config, OAuthConfig};
///
/// let config = OAuthConfig {
///     client_id: "c1".to_string(),
///     client_secret: None,
///     authorization_url: "https://auth.example.com/authorize".to_string(),
///     token_url: "https://auth.example.com/token".to_string(),
///     scopes: vec!["read".to_string()],
///     pkce: true,
///     redirect_uri: None,
/// };
/// assert!(validate_oauth_config(&config).is_ok());
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthConfig {
    /// Client identifier registered with the authorization server.
    pub client_id: String,

    /// Client secret for confidential clients.  Sent only when non-empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,

    /// Authorization endpoint the browser is redirected to.
    pub authorization_url: String,

    /// Token endpoint used for all grants.
    pub token_url: String,

    /// Scopes requested during authorization.
    #[serde(default)]
    pub scopes: Vec<String>,

    /// Whether to send PKCE parameters.  Enabled unless explicitly `false`.
    #[serde(default = "default_pkce")]
    pub pkce: bool,

    /// Default redirect URI for flows started without an explicit one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
}

fn default_pkce() -> bool {
    true
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            authorization_url: String::new(),
            token_url: String::new(),
            scopes: Vec::new(),
            pkce: default_pkce(),
            redirect_uri: None,
        }
    }
}

impl OAuthConfig {
    /// The client secret, when one is configured and non-empty.
    pub fn secret(&self) -> Option<&str> {
        self.client_secret.as_deref().filter(|s| !s.is_empty())
    }
}

impl fmt::Debug for OAuthConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OAuthConfig")
            .field("client_id", &self.client_id)
            .field(
                "client_secret",
                &self.client_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("authorization_url", &self.authorization_url)
            .field("token_url", &self.token_url)
            .field("scopes", &self.scopes)
            .field("pkce", &self.pkce)
            .field("redirect_uri", &self.redirect_uri)
            .finish()
    }
}

/// Checks that the configuration can drive a flow.
///
/// # Errors
///
/// Returns [`AuthError::Config`] when `client_id`, `authorization_url` or
/// `token_url` is empty, or when any configured URL fails to parse.
pub fn validate_oauth_config(config: &OAuthConfig) -> Result<()> {
    if config.client_id.trim().is_empty() {
        return Err(AuthError::Config("client_id is required".to_string()));
    }
    if config.authorization_url.trim().is_empty() {
        return Err(AuthError::Config(
            "authorization_url is required".to_string(),
        ));
    }
    if config.token_url.trim().is_empty() {
        return Err(AuthError::Config("token_url is required".to_string()));
    }

    parse_url("authorization_url", &config.authorization_url)?;
    parse_url("token_url", &config.token_url)?;
    if let Some(redirect_uri) = config.redirect_uri.as_deref().filter(|u| !u.is_empty()) {
        parse_url("redirect_uri", redirect_uri)?;
    }
    Ok(())
}

fn parse_url(field: &str, value: &str) -> Result<Url> {
    Url::parse(value).map_err(|e| AuthError::Config(format!("invalid {field} '{value}': {e}")))
}

// ---------------------------------------------------------------------------
// AuthorizationState
// ---------------------------------------------------------------------------

/// Everything needed to finish one authorization flow after the redirect.
///
/// The caller keeps this value (for example in a session, or in
/// [`PendingAuthorizations`]) between the redirect and the callback.  It is
/// consumed by the callback and must not be reused.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationState {
    /// CSRF binding value echoed back by the authorization server.
    pub state: String,

    /// PKCE pair whose challenge was sent in the redirect.
    pub pkce: PkceParams,

    /// Redirect URI sent in the authorization request.
    pub redirect_uri: String,

    /// When the flow was started.
    pub created_at: DateTime<Utc>,
}

/// Result of [`initialize_auth_flow`].
#[derive(Debug, Clone)]
pub struct AuthFlowStart {
    /// Where to send the user's browser.
    pub url: Url,

    /// State to keep until the callback arrives.
    pub state: AuthorizationState,
}

/// Starts a new flow: fresh state token, fresh PKCE pair, current time.
pub fn create_authorization_state(redirect_uri: &str) -> AuthorizationState {
    AuthorizationState {
        state: pkce::generate_state(),
        pkce: pkce::generate_pkce_params(),
        redirect_uri: redirect_uri.to_string(),
        created_at: Utc::now(),
    }
}

/// Builds the authorization endpoint URL for `state`.
///
/// Always carries `response_type=code`, `client_id`, `redirect_uri` and
/// `state`.  `scope` is added only when scopes are configured, and the PKCE
/// parameters are added unless `config.pkce` is `false`.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if `authorization_url` does not parse.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::flow::{
///     build_authorization_url, create_authorization_state, OAuthConfig,
/// };
///
/// let config = OAuthConfig {
///     client_id: "c1".to_string(),
///     client_secret: None,
///     authorization_url: "https://auth.example.com/authorize".to_string(),
///     token_url: "https://auth.example.com/token".to_string(),
///     scopes: vec![],
///     pkce: false,
///     redirect_uri: None,
/// };
/// let state = create_authorization_state("https://app.example.com/cb");
/// let url = build_authorization_url(&config, &state).unwrap();
///
/// assert!(url.as_str().contains("response_type=code&client_id=c1"));
/// assert!(!url.as_str().contains("scope="));
/// assert!(!url.as_str().contains("code_challenge"));
/// ```
pub fn build_authorization_url(config: &OAuthConfig, state: &AuthorizationState) -> Result<Url> {
    let mut url = parse_url("authorization_url", &config.authorization_url)?;

    {
        let mut query = url.query_pairs_mut();
        query.append_pair("response_type", "code");
        query.append_pair("client_id", &config.client_id);
        query.append_pair("redirect_uri", &state.redirect_uri);
        query.append_pair("state", &state.state);

        if !config.scopes.is_empty() {
            query.append_pair("scope", &config.scopes.join(" "));
        }

        if config.pkce {
            query.append_pair("code_challenge", &state.pkce.code_challenge);
            query.append_pair("code_challenge_method", &state.pkce.code_challenge_method);
        }
    }

    Ok(url)
}

/// Binds a callback to the flow that issued it.
///
/// Compares in constant time with respect to the state contents.
pub fn validate_state(expected: &str, received: &str) -> bool {
    pkce::constant_time_eq(expected, received)
}

/// `true` when more than `max_age` has elapsed since the flow started.
pub fn is_state_expired(state: &AuthorizationState, max_age: Duration) -> bool {
    Utc::now() - state.created_at > max_age
}

/// Validates the configuration, creates a state and builds the URL.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the configuration or `redirect_uri` is
/// invalid.
pub fn initialize_auth_flow(config: &OAuthConfig, redirect_uri: &str) -> Result<AuthFlowStart> {
    validate_oauth_config(config)?;
    parse_url("redirect_uri", redirect_uri)?;

    let state = create_authorization_state(redirect_uri);
    let url = build_authorization_url(config, &state)?;

    tracing::debug!(client_id = %config.client_id, "authorization flow started");
    Ok(AuthFlowStart { url, state })
}

// ---------------------------------------------------------------------------
// Token request bodies
// ---------------------------------------------------------------------------

/// Form body for the `authorization_code` grant.
///
/// `code_verifier` comes from the same `state` that produced the redirect and
/// is included only when PKCE is enabled.
pub fn build_token_request_body(
    config: &OAuthConfig,
    state: &AuthorizationState,
    code: &str,
) -> FormBody {
    let mut body: FormBody = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", state.redirect_uri.clone()),
        ("client_id", config.client_id.clone()),
    ];
    if let Some(secret) = config.secret() {
        body.push(("client_secret", secret.to_string()));
    }
    if config.pkce {
        body.push(("code_verifier", state.pkce.code_verifier.clone()));
    }
    body
}

/// Form body for the `client_credentials` grant.
pub fn build_client_credentials_body(config: &OAuthConfig) -> FormBody {
    let mut body: FormBody = vec![
        ("grant_type", "client_credentials".to_string()),
        ("client_id", config.client_id.clone()),
    ];
    if let Some(secret) = config.secret() {
        body.push(("client_secret", secret.to_string()));
    }
    if !config.scopes.is_empty() {
        body.push(("scope", config.scopes.join(" ")));
    }
    body
}

/// Form body for the `refresh_token` grant.
pub fn build_refresh_token_body(config: &OAuthConfig, refresh_token: &str) -> FormBody {
    let mut body: FormBody = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", refresh_token.to_string()),
        ("client_id", config.client_id.clone()),
    ];
    if let Some(secret) = config.secret() {
        body.push(("client_secret", secret.to_string()));
    }
    body
}

// ---------------------------------------------------------------------------
// Token responses
// ---------------------------------------------------------------------------

/// Converts a token endpoint JSON payload into a [`TokenSet`].
///
/// # Errors
///
/// - [`AuthError::OAuth`] with code `invalid_response` if `raw` is not an
///   object.
/// - [`AuthError::OAuth`] carrying the server's `error` and
///   `error_description` when an `error` field is present.
/// - [`AuthError::OAuth`] with description `"Missing access_token"` when
///   `access_token` is absent, empty or not a string.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::flow::parse_token_response;
/// use serde_json::json;
///
/// let token = parse_token_response(&json!({"access_token": "a"})).unwrap();
/// assert_eq!(token.token_type, "Bearer");
///
/// let err = parse_token_response(&json!({})).unwrap_err();
/// assert_eq!(err.to_string(), "Missing access_token");
/// ```
pub fn parse_token_response(raw: &Value) -> Result<TokenSet> {
    let obj = raw.as_object().ok_or_else(|| {
        AuthError::oauth("invalid_response", "Token response is not a JSON object")
    })?;

    if let Some(error) = obj.get("error").filter(|e| !e.is_null()) {
        let code = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        let description = obj
            .get("error_description")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| code.clone());
        return Err(AuthError::oauth(code, description));
    }

    let access_token = obj
        .get("access_token")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AuthError::oauth("invalid_response", "Missing access_token"))?;

    let token_type = obj
        .get("token_type")
        .and_then(Value::as_str)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TOKEN_TYPE);

    let expires_at = match obj.get("expires_in").and_then(expires_in_seconds) {
        None => None,
        Some(secs) => Some(expiry_after(secs).ok_or_else(|| {
            AuthError::oauth("invalid_response", "expires_in is out of range")
        })?),
    };

    Ok(TokenSet {
        access_token: access_token.to_string(),
        token_type: token_type.to_string(),
        expires_at,
        refresh_token: string_field(obj, "refresh_token"),
        scope: string_field(obj, "scope"),
    })
}

/// Some servers send `expires_in` as a string; accept both.  Fractional
/// values are truncated and floats beyond `i64` saturate.
fn expires_in_seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_field(obj: &serde_json::Map<String, Value>, key: &str) -> Option<String> {
    obj.get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ---------------------------------------------------------------------------
// Token endpoint requests
// ---------------------------------------------------------------------------

/// POSTs a form body to the token endpoint and parses the response.
///
/// # Errors
///
/// Returns [`TokenError::Request`] when the request cannot be sent or the
/// body cannot be read, and [`AuthError::OAuth`] (with the HTTP status) when
/// the endpoint reports an error or returns something that is not a token.
pub async fn request_token(
    http: &reqwest::Client,
    token_url: &str,
    body: &FormBody,
) -> Result<TokenSet> {
    let resp = http
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(body)
        .send()
        .await
        .map_err(|e| TokenError::Request(e.to_string()))?;

    let status = resp.status();
    let text = resp
        .text()
        .await
        .map_err(|e| TokenError::Request(e.to_string()))?;

    let with_status = |err: AuthError| match err {
        AuthError::OAuth {
            code, description, ..
        } => AuthError::OAuth {
            code,
            description,
            status: Some(status.as_u16()),
        },
        other => other,
    };

    let raw: Value = match serde_json::from_str(&text) {
        Ok(raw) => raw,
        Err(_) if !status.is_success() => {
            return Err(with_status(AuthError::oauth(
                "server_error",
                format!("token endpoint returned {status}"),
            )));
        }
        Err(e) => {
            return Err(with_status(AuthError::oauth(
                "invalid_response",
                format!("token response is not valid JSON: {e}"),
            )));
        }
    };

    let token = parse_token_response(&raw).map_err(with_status)?;
    if !status.is_success() {
        return Err(with_status(AuthError::oauth(
            "server_error",
            format!("token endpoint returned {status}"),
        )));
    }
    Ok(token)
}

/// Exchanges an authorization code using the verifier stored in `state`.
pub async fn exchange_code(
    http: &reqwest::Client,
    config: &OAuthConfig,
    state: &AuthorizationState,
    code: &str,
) -> Result<TokenSet> {
    let body = build_token_request_body(config, state, code);
    request_token(http, &config.token_url, &body).await
}

/// Obtains a token with the `client_credentials` grant.
pub async fn request_client_credentials(
    http: &reqwest::Client,
    config: &OAuthConfig,
) -> Result<TokenSet> {
    validate_oauth_config(config)?;
    let body = build_client_credentials_body(config);
    request_token(http, &config.token_url, &body).await
}

/// Handles the authorization callback.
///
/// Checks `received_state` against `state`, rejects flows older than
/// `max_age`, then exchanges `code`.  Any `Err` leaves the flow rejected;
/// the caller must discard `state` either way.
///
/// # Errors
///
/// - [`TokenError::StateMismatch`] when the states differ.
/// - [`TokenError::StateExpired`] when the flow is too old.
/// - [`AuthError::Config`] for an invalid configuration.
/// - Any error from [`request_token`].
pub async fn complete_authorization(
    http: &reqwest::Client,
    config: &OAuthConfig,
    state: &AuthorizationState,
    received_state: &str,
    code: &str,
    max_age: Duration,
) -> Result<TokenSet> {
    if !validate_state(&state.state, received_state) {
        tracing::warn!("authorization callback rejected: state mismatch");
        return Err(TokenError::StateMismatch.into());
    }
    if is_state_expired(state, max_age) {
        tracing::warn!("authorization callback rejected: state expired");
        return Err(TokenError::StateExpired.into());
    }
    validate_oauth_config(config)?;

    let token = exchange_code(http, config, state, code).await?;
    tracing::info!(client_id = %config.client_id, "authorization code exchanged");
    Ok(token)
}

// ---------------------------------------------------------------------------
// PendingAuthorizations
// ---------------------------------------------------------------------------

/// Single-use registry of in-flight authorization states.
///
/// Useful when the caller has no session to carry the state across the
/// redirect: insert on flow start, [`take`](Self::take) on callback.  A state
/// can be taken at most once.
#[derive(Debug, Default)]
pub struct PendingAuthorizations {
    pending: Mutex<HashMap<String, AuthorizationState>>,
}

impl PendingAuthorizations {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remembers `state` until its callback arrives.
    pub fn insert(&self, state: AuthorizationState) {
        self.lock().insert(state.state.clone(), state);
    }

    /// Removes and returns the state matching `received_state`.
    ///
    /// # Errors
    ///
    /// [`TokenError::StateUnknown`] if no such state is pending (including a
    /// second callback for an already consumed state), and
    /// [`TokenError::StateExpired`] if it is older than `max_age`.
    pub fn take(&self, received_state: &str, max_age: Duration) -> Result<AuthorizationState> {
        let state = self
            .lock()
            .remove(received_state)
            .ok_or(TokenError::StateUnknown)?;
        if is_state_expired(&state, max_age) {
            return Err(TokenError::StateExpired.into());
        }
        Ok(state)
    }

    /// Drops every state older than `max_age`, returning how many were removed.
    pub fn purge_expired(&self, max_age: Duration) -> usize {
        let mut pending = self.lock();
        let before = pending.len();
        pending.retain(|_, state| !is_state_expired(state, max_age));
        before - pending.len()
    }

    /// Number of pending flows.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// `true` when no flow is pending.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, AuthorizationState>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
