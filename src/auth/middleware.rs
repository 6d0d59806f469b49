//! Axum middleware protecting MCP tool server endpoints
//!
//! The middleware functions here are meant for
//! [`axum::middleware::from_fn_with_state`]:
//!
//! - [`auth_middleware`] requires a bearer token accepted by a
//!   [`TokenValidator`] and attaches an [`AuthenticatedToken`].
//! - [`require_scopes`] runs after it and checks granted scopes.
//! - [`optional_auth`] attaches a token when one is valid, never rejects.
//! - [`api_key_middleware`] checks a static API key header.
//! - [`flexible_auth_middleware`] picks one of the above from an
//!   [`AuthConfig`].
//!
//! Rejections follow RFC 6750: a `WWW-Authenticate: Bearer ...` header plus a
//! JSON body `{"error": ..., "error_description": ...}`.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use axum::{middleware, routing::get, Router};
//! use openapi_mcp_auth::auth::middleware::{
//!     auth_middleware, create_simple_validator, require_scopes, AuthenticatedToken,
//!     RequiredScopes, TokenValidator,
//! };
//!
//! async fn handler(AuthenticatedToken(token): AuthenticatedToken) -> String {
//!     token.scope.unwrap_or_default()
//! }
//!
//! let validator: Arc<dyn TokenValidator> = Arc::new(create_simple_validator());
//! let app: Router = Router::new()
//!     .route("/tools", get(handler))
//!     .layer(middleware::from_fn_with_state(
//!         RequiredScopes::new(["tools:read"]),
//!         require_scopes,
//!     ))
//!     .layer(middleware::from_fn_with_state(validator, auth_middleware));
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap, HeaderValue, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::pkce::constant_time_eq;
use crate::auth::token_store::TokenSet;
use crate::error::{Result, TokenError};

/// Header checked by [`ApiKeyAuth`] unless configured otherwise.
pub const DEFAULT_API_KEY_HEADER: &str = "X-API-Key";

/// Query parameter accepted when no `Authorization` header is present.
pub const ACCESS_TOKEN_QUERY_PARAM: &str = "access_token";

/// Minimum token length accepted by [`SimpleValidator`].
pub const SIMPLE_VALIDATOR_MIN_LENGTH: usize = 10;

// ---------------------------------------------------------------------------
// Token extraction
// ---------------------------------------------------------------------------

/// Parses an `Authorization` header value of the form `Bearer <token>`.
///
/// The scheme is matched case-insensitively.  Anything other than exactly
/// one non-empty token after the scheme yields `None`.
///
/// # Examples
///
/// ```
/// use openapi_mcp_auth::auth::middleware::extract_bearer_token;
///
/// assert_eq!(extract_bearer_token("Bearer abc").as_deref(), Some("abc"));
/// assert_eq!(extract_bearer_token("Basic xyz"), None);
/// assert_eq!(extract_bearer_token("Bearer"), None);
/// ```
pub fn extract_bearer_token(header: &str) -> Option<String> {
    let mut parts = header.split_whitespace();
    let scheme = parts.next()?;
    let token = parts.next()?;
    if parts.next().is_some() || !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    Some(token.to_string())
}

/// Finds the request's bearer token: the `Authorization` header first, then
/// the `access_token` query parameter.
pub fn extract_token(parts: &Parts) -> Option<String> {
    if let Some(value) = parts.headers.get(header::AUTHORIZATION) {
        return value.to_str().ok().and_then(extract_bearer_token);
    }

    let query = parts.uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == ACCESS_TOKEN_QUERY_PARAM)
        .map(|(_, v)| v.into_owned())
        .filter(|v| !v.is_empty())
}

// ---------------------------------------------------------------------------
// Validators
// ---------------------------------------------------------------------------

/// Decides whether a presented bearer token is acceptable.
///
/// Production deployments plug in introspection (RFC 7662) or JWT
/// verification here.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Returns the token's details, or an error when it must be rejected.
    async fn validate(&self, token: &str) -> Result<TokenSet>;
}

/// Development-only validator that accepts any token of at least
/// [`SIMPLE_VALIDATOR_MIN_LENGTH`] characters.
///
/// It performs no cryptographic or server-side verification and must not be
/// used to protect real data.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimpleValidator;

#[async_trait]
impl TokenValidator for SimpleValidator {
    async fn validate(&self, token: &str) -> Result<TokenSet> {
        if token.chars().count() < SIMPLE_VALIDATOR_MIN_LENGTH {
            return Err(TokenError::Invalid("Invalid token format".to_string()).into());
        }
        Ok(TokenSet::bearer(token))
    }
}

/// Returns the development [`SimpleValidator`].
pub fn create_simple_validator() -> SimpleValidator {
    SimpleValidator
}

// ---------------------------------------------------------------------------
// Rejections
// ---------------------------------------------------------------------------

/// Why a request was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRejection {
    /// No usable credentials were presented.
    Unauthorized(String),

    /// A token was presented but the validator refused it.
    InvalidToken(String),

    /// The token lacks the listed scopes.
    InsufficientScope(Vec<String>),
}

impl AuthRejection {
    fn missing_credentials() -> Self {
        Self::Unauthorized("Missing or malformed bearer token".to_string())
    }

    /// HTTP status for this rejection.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized(_) | Self::InvalidToken(_) => StatusCode::UNAUTHORIZED,
            Self::InsufficientScope(_) => StatusCode::FORBIDDEN,
        }
    }

    /// OAuth error code used in the body and `WWW-Authenticate` header.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized(_) => "unauthorized",
            Self::InvalidToken(_) => "invalid_token",
            Self::InsufficientScope(_) => "insufficient_scope",
        }
    }

    fn description(&self) -> String {
        match self {
            Self::Unauthorized(msg) | Self::InvalidToken(msg) => msg.clone(),
            Self::InsufficientScope(missing) => {
                format!("Missing required scopes: {}", missing.join(", "))
            }
        }
    }

    fn www_authenticate(&self) -> HeaderValue {
        let value = match self {
            Self::Unauthorized(_) => "Bearer".to_string(),
            Self::InvalidToken(msg) => format!(
                "Bearer error=\"invalid_token\", error_description=\"{}\"",
                msg.replace('"', "'")
            ),
            Self::InsufficientScope(missing) => format!(
                "Bearer error=\"insufficient_scope\", scope=\"{}\"",
                missing.join(" ")
            ),
        };
        HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("Bearer"))
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.error_code(),
            "error_description": self.description(),
        });
        if let Self::InsufficientScope(missing) = &self {
            body["missing_scopes"] = json!(missing);
        }

        (
            self.status(),
            [(header::WWW_AUTHENTICATE, self.www_authenticate())],
            Json(body),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// AuthenticatedToken
// ---------------------------------------------------------------------------

/// The validated token attached to a request by the auth middleware.
///
/// Also an extractor: handlers behind [`auth_middleware`] can take it as an
/// argument.  Extraction fails with 401 when no token was attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedToken(pub TokenSet);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedToken
where
    S: Send + Sync,
{
    type Rejection = AuthRejection;

    async fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> std::result::Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedToken>()
            .cloned()
            .ok_or_else(AuthRejection::missing_credentials)
    }
}

async fn authenticate(
    validator: &dyn TokenValidator,
    parts: &Parts,
) -> std::result::Result<TokenSet, AuthRejection> {
    let token = extract_token(parts).ok_or_else(AuthRejection::missing_credentials)?;
    validator.validate(&token).await.map_err(|e| {
        tracing::debug!(path = %parts.uri.path(), error = %e, "bearer token rejected");
        AuthRejection::InvalidToken(e.to_string())
    })
}

// ---------------------------------------------------------------------------
// Bearer middleware
// ---------------------------------------------------------------------------

/// Rejects requests without a valid bearer token.
///
/// On success the token is attached as an [`AuthenticatedToken`] request
/// extension.
pub async fn auth_middleware(
    State(validator): State<Arc<dyn TokenValidator>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    match authenticate(validator.as_ref(), &parts).await {
        Ok(token) => {
            parts.extensions.insert(AuthenticatedToken(token));
            next.run(Request::from_parts(parts, body)).await
        }
        Err(rejection) => rejection.into_response(),
    }
}

/// Attaches an [`AuthenticatedToken`] when a valid token is presented and
/// lets every request through.
pub async fn optional_auth(
    State(validator): State<Arc<dyn TokenValidator>>,
    req: Request,
    next: Next,
) -> Response {
    let (mut parts, body) = req.into_parts();
    if let Ok(token) = authenticate(validator.as_ref(), &parts).await {
        parts.extensions.insert(AuthenticatedToken(token));
    }
    next.run(Request::from_parts(parts, body)).await
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Scopes a route requires.  All must be granted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredScopes(pub Vec<String>);

impl RequiredScopes {
    /// Builds the requirement from any list of scope names.
    pub fn new<I, S>(scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(scopes.into_iter().map(Into::into).collect())
    }

    /// Required scopes absent from `granted`, in declaration order.
    ///
    /// # Examples
    ///
    /// ```
    /// use openapi_mcp_auth::auth::middleware::RequiredScopes;
    ///
    /// let required = RequiredScopes::new(["read", "write", "admin"]);
    /// assert_eq!(required.missing(&["read"]), vec!["write", "admin"]);
    /// assert!(required.missing(&["admin", "write", "read"]).is_empty());
    /// ```
    pub fn missing(&self, granted: &[&str]) -> Vec<String> {
        self.0
            .iter()
            .filter(|s| !granted.contains(&s.as_str()))
            .cloned()
            .collect()
    }
}

fn check_scopes(
    required: &RequiredScopes,
    token: &TokenSet,
) -> std::result::Result<(), AuthRejection> {
    let missing = required.missing(&token.scopes());
    if missing.is_empty() {
        Ok(())
    } else {
        tracing::debug!(missing = ?missing, "request lacks required scopes");
        Err(AuthRejection::InsufficientScope(missing))
    }
}

/// Rejects requests whose attached token lacks any of the required scopes.
///
/// Must run after [`auth_middleware`]; without an attached token it answers
/// 401.
pub async fn require_scopes(
    State(required): State<RequiredScopes>,
    req: Request,
    next: Next,
) -> Response {
    let Some(AuthenticatedToken(token)) = req.extensions().get::<AuthenticatedToken>() else {
        return AuthRejection::missing_credentials().into_response();
    };
    if let Err(rejection) = check_scopes(&required, token) {
        return rejection.into_response();
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// API keys
// ---------------------------------------------------------------------------

/// Static API key check.
#[derive(Debug, Clone)]
pub struct ApiKeyAuth {
    /// Request header carrying the key.
    pub header_name: String,

    /// Accepted keys.
    pub valid_keys: HashSet<String>,
}

impl ApiKeyAuth {
    /// Accepts `keys` in the `header_name` header.
    pub fn new<I, S>(header_name: impl Into<String>, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            header_name: header_name.into(),
            valid_keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    /// `true` when `headers` carry one of the accepted keys.
    pub fn accepts(&self, headers: &HeaderMap) -> bool {
        let Some(presented) = headers
            .get(self.header_name.as_str())
            .and_then(|v| v.to_str().ok())
        else {
            return false;
        };
        self.valid_keys
            .iter()
            .fold(false, |found, key| constant_time_eq(key, presented) | found)
    }
}

/// Rejects requests without an accepted API key.
pub async fn api_key_middleware(
    State(auth): State<ApiKeyAuth>,
    req: Request,
    next: Next,
) -> Response {
    if !auth.accepts(req.headers()) {
        tracing::debug!(header = %auth.header_name, "API key rejected");
        return AuthRejection::Unauthorized("Invalid or missing API key".to_string())
            .into_response();
    }
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Configurable auth
// ---------------------------------------------------------------------------

/// Server-side authentication mode, as written in configuration.
///
/// ```yaml
/// type: oauth2
/// required_scopes: [tools:read]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// Bearer token plus required scopes.
    #[serde(rename = "oauth2")]
    OAuth2 {
        #[serde(default)]
        required_scopes: Vec<String>,
    },

    /// Static API keys in a header.
    ApiKey {
        #[serde(default = "default_api_key_header")]
        header_name: String,
        keys: Vec<String>,
    },

    /// Any bearer token the validator accepts.
    #[default]
    Bearer,
}

fn default_api_key_header() -> String {
    DEFAULT_API_KEY_HEADER.to_string()
}

/// State for [`flexible_auth_middleware`].
#[derive(Clone)]
pub struct FlexibleAuth {
    config: AuthConfig,
    validator: Arc<dyn TokenValidator>,
    api_key: Option<ApiKeyAuth>,
}

impl FlexibleAuth {
    /// Builds the middleware state.
    ///
    /// Falls back to [`SimpleValidator`] when `validator` is `None` and the
    /// mode needs one.
    pub fn new(config: AuthConfig, validator: Option<Arc<dyn TokenValidator>>) -> Self {
        let api_key = match &config {
            AuthConfig::ApiKey { header_name, keys } => {
                Some(ApiKeyAuth::new(header_name.clone(), keys.iter().cloned()))
            }
            _ => None,
        };
        let validator = validator.unwrap_or_else(|| {
            if api_key.is_none() {
                tracing::warn!(
                    "no token validator configured, falling back to the development SimpleValidator"
                );
            }
            Arc::new(SimpleValidator)
        });
        Self {
            config,
            validator,
            api_key,
        }
    }

    /// The configured mode.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }
}

impl std::fmt::Debug for FlexibleAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match &self.config {
            AuthConfig::OAuth2 { .. } => "oauth2",
            AuthConfig::ApiKey { .. } => "api_key",
            AuthConfig::Bearer => "bearer",
        };
        f.debug_struct("FlexibleAuth")
            .field("mode", &mode)
            .finish_non_exhaustive()
    }
}

/// Authenticates according to the [`AuthConfig`] held in `auth`.
pub async fn flexible_auth_middleware(
    State(auth): State<FlexibleAuth>,
    req: Request,
    next: Next,
) -> Response {
    if let Some(api_key) = &auth.api_key {
        if !api_key.accepts(req.headers()) {
            return AuthRejection::Unauthorized("Invalid or missing API key".to_string())
                .into_response();
        }
        return next.run(req).await;
    }

    let (mut parts, body) = req.into_parts();
    let token = match authenticate(auth.validator.as_ref(), &parts).await {
        Ok(token) => token,
        Err(rejection) => return rejection.into_response(),
    };

    if let AuthConfig::OAuth2 { required_scopes } = &auth.config {
        let required = RequiredScopes(required_scopes.clone());
        if let Err(rejection) = check_scopes(&required, &token) {
            return rejection.into_response();
        }
    }

    parts.extensions.insert(AuthenticatedToken(token));
    next.run(Request::from_parts(parts, body)).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AuthError;

    fn parts_for(uri: &str, authorization: Option<&str>) -> Parts {
        let mut builder = axum::http::Request::builder().uri(uri);
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).expect("request").into_parts().0
    }

    // -----------------------------------------------------------------------
    // extract_bearer_token() / extract_token()
    // -----------------------------------------------------------------------

    #[test]
    fn test_extract_bearer_token_valid() {
        assert_eq!(extract_bearer_token("Bearer abc").as_deref(), Some("abc"));
        assert_eq!(extract_bearer_token("bearer abc").as_deref(), Some("abc"));
        assert_eq!(extract_bearer_token("BEARER  abc").as_deref(), Some("abc"));
    }

    #[test]
    fn test_extract_bearer_token_rejects_other_forms() {
        assert_eq!(extract_bearer_token("Basic xyz"), None);
        assert_eq!(extract_bearer_token("Bearer"), None);
        assert_eq!(extract_bearer_token("Bearer "), None);
        assert_eq!(extract_bearer_token("Bearer a b"), None);
        assert_eq!(extract_bearer_token(""), None);
    }

    #[test]
    fn test_extract_token_prefers_header() {
        let parts = parts_for("/x?access_token=from-query", Some("Bearer from-header"));
        assert_eq!(extract_token(&parts).as_deref(), Some("from-header"));
    }

    #[test]
    fn test_extract_token_falls_back_to_query() {
        let parts = parts_for("/x?foo=1&access_token=from%20query", None);
        assert_eq!(extract_token(&parts).as_deref(), Some("from query"));
        assert_eq!(extract_token(&parts_for("/x?access_token=", None)), None);
        assert_eq!(extract_token(&parts_for("/x", None)), None);
    }

    #[test]
    fn test_extract_token_malformed_header_does_not_use_query() {
        let parts = parts_for("/x?access_token=q", Some("Basic xyz"));
        assert_eq!(extract_token(&parts), None);
    }

    // -----------------------------------------------------------------------
    // SimpleValidator
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_simple_validator_length_boundary() {
        let validator = create_simple_validator();
        let err = validator.validate("123456789").await.unwrap_err();
        assert!(matches!(err, AuthError::Token(TokenError::Invalid(_))));
        assert_eq!(err.to_string(), "Invalid token format");

        let token = validator.validate("1234567890").await.expect("valid");
        assert_eq!(token.access_token, "1234567890");
        assert_eq!(token.token_type, "Bearer");
    }

    // -----------------------------------------------------------------------
    // AuthRejection
    // -----------------------------------------------------------------------

    #[test]
    fn test_rejection_statuses_and_headers() {
        let unauthorized = AuthRejection::missing_credentials().into_response();
        assert_eq!(unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(unauthorized.headers()[header::WWW_AUTHENTICATE], "Bearer");

        let invalid = AuthRejection::InvalidToken("bad".to_string()).into_response();
        assert_eq!(invalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            invalid.headers()[header::WWW_AUTHENTICATE],
            "Bearer error=\"invalid_token\", error_description=\"bad\""
        );

        let forbidden =
            AuthRejection::InsufficientScope(vec!["a".to_string(), "b".to_string()])
                .into_response();
        assert_eq!(forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            forbidden.headers()[header::WWW_AUTHENTICATE],
            "Bearer error=\"insufficient_scope\", scope=\"a b\""
        );
    }

    // -----------------------------------------------------------------------
    // ApiKeyAuth / AuthConfig
    // -----------------------------------------------------------------------

    #[test]
    fn test_api_key_accepts() {
        let auth = ApiKeyAuth::new(DEFAULT_API_KEY_HEADER, ["k1", "k2"]);
        let mut headers = HeaderMap::new();
        assert!(!auth.accepts(&headers));

        headers.insert("x-api-key", HeaderValue::from_static("k2"));
        assert!(auth.accepts(&headers));

        headers.insert("x-api-key", HeaderValue::from_static("k3"));
        assert!(!auth.accepts(&headers));
    }

    #[test]
    fn test_auth_config_yaml_forms() {
        let oauth: AuthConfig =
            serde_yaml::from_str("type: oauth2\nrequired_scopes: [read]\n").expect("oauth2");
        assert_eq!(
            oauth,
            AuthConfig::OAuth2 {
                required_scopes: vec!["read".to_string()]
            }
        );

        let api_key: AuthConfig =
            serde_yaml::from_str("type: api_key\nkeys: [k1]\n").expect("api_key");
        assert_eq!(
            api_key,
            AuthConfig::ApiKey {
                header_name: "X-API-Key".to_string(),
                keys: vec!["k1".to_string()]
            }
        );

        let bearer: AuthConfig = serde_yaml::from_str("type: bearer\n").expect("bearer");
        assert_eq!(bearer, AuthConfig::Bearer);
    }
}
