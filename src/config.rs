//! Configuration management
//!
//! Configuration is read from a YAML file, then overridden by `MCP_AUTH_*`
//! environment variables, then by command-line flags.
//!
//! ```yaml
//! oauth:
//!   client_id: my-client
//!   authorization_url: https://auth.example.com/authorize
//!   token_url: https://auth.example.com/token
//!   scopes: [tools:read]
//!   redirect_uri: http://localhost:8080/callback
//! server_auth:
//!   type: oauth2
//!   required_scopes: [tools:read]
//! tokens:
//!   refresh_buffer_seconds: 30
//! ```

use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::auth::flow::{validate_oauth_config, OAuthConfig};
use crate::auth::middleware::AuthConfig;
use crate::error::{AuthError, Result};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// OAuth client settings for the upstream authorization server
    #[serde(default)]
    pub oauth: OAuthConfig,

    /// How the MCP server authenticates its own callers
    #[serde(default)]
    pub server_auth: AuthConfig,

    /// Token lifecycle tuning
    #[serde(default)]
    pub tokens: TokenConfig,
}

/// Token lifecycle settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Treat tokens as expired this many seconds before `expires_at`
    #[serde(default = "default_refresh_buffer_seconds")]
    pub refresh_buffer_seconds: u64,

    /// Reject authorization callbacks for flows older than this
    #[serde(default = "default_state_max_age_seconds")]
    pub state_max_age_seconds: u64,

    /// Timeout for each token endpoint request
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

fn default_refresh_buffer_seconds() -> u64 {
    30
}

fn default_state_max_age_seconds() -> u64 {
    600
}

fn default_request_timeout_seconds() -> u64 {
    30
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            refresh_buffer_seconds: default_refresh_buffer_seconds(),
            state_max_age_seconds: default_state_max_age_seconds(),
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl TokenConfig {
    /// Refresh buffer as a [`Duration`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the value does not fit a `Duration`.
    pub fn refresh_buffer(&self) -> Result<Duration> {
        seconds_setting("tokens.refresh_buffer_seconds", self.refresh_buffer_seconds)
    }

    /// Maximum authorization state age as a [`Duration`].
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the value does not fit a `Duration`.
    pub fn state_max_age(&self) -> Result<Duration> {
        seconds_setting("tokens.state_max_age_seconds", self.state_max_age_seconds)
    }
}

fn seconds_setting(name: &str, secs: u64) -> Result<Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| AuthError::Config(format!("{} is out of range: {}", name, secs)))
}

impl Config {
    /// Load configuration from file, environment, and CLI
    ///
    /// A missing file is not an error; defaults are used and a warning is
    /// logged.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the file exists but cannot be read
    /// or parsed.
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| AuthError::Config(format!("Failed to read config file: {}", e)))?;
        serde_yaml::from_str(&contents)
            .map_err(|e| AuthError::Config(format!("Failed to parse config: {}", e)))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(client_id) = std::env::var("MCP_AUTH_CLIENT_ID") {
            self.oauth.client_id = client_id;
        }

        if let Ok(secret) = std::env::var("MCP_AUTH_CLIENT_SECRET") {
            self.oauth.client_secret = Some(secret);
        }

        if let Ok(url) = std::env::var("MCP_AUTH_AUTHORIZATION_URL") {
            self.oauth.authorization_url = url;
        }

        if let Ok(url) = std::env::var("MCP_AUTH_TOKEN_URL") {
            self.oauth.token_url = url;
        }

        if let Ok(scopes) = std::env::var("MCP_AUTH_SCOPES") {
            self.oauth.scopes = scopes
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Ok(redirect_uri) = std::env::var("MCP_AUTH_REDIRECT_URI") {
            self.oauth.redirect_uri = Some(redirect_uri);
        }

        if let Some(secs) = env_seconds("MCP_AUTH_REFRESH_BUFFER_SECONDS") {
            self.tokens.refresh_buffer_seconds = secs;
        }

        if let Some(secs) = env_seconds("MCP_AUTH_STATE_MAX_AGE_SECONDS") {
            self.tokens.state_max_age_seconds = secs;
        }

        if let Some(secs) = env_seconds("MCP_AUTH_REQUEST_TIMEOUT_SECONDS") {
            self.tokens.request_timeout_seconds = secs;
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(client_id) = &cli.client_id {
            self.oauth.client_id = client_id.clone();
        }

        if let Some(token_url) = &cli.token_url {
            self.oauth.token_url = token_url.clone();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Config`] if the OAuth client settings are
    /// incomplete, a token setting is zero or out of range, or an API key
    /// mode has no keys.
    pub fn validate(&self) -> Result<()> {
        validate_oauth_config(&self.oauth)?;

        if self.tokens.request_timeout_seconds == 0 {
            return Err(AuthError::Config(
                "tokens.request_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.tokens.state_max_age_seconds == 0 {
            return Err(AuthError::Config(
                "tokens.state_max_age_seconds must be greater than 0".to_string(),
            ));
        }

        self.tokens.refresh_buffer()?;
        self.tokens.state_max_age()?;

        if let AuthConfig::ApiKey { header_name, keys } = &self.server_auth {
            if axum::http::HeaderName::from_bytes(header_name.as_bytes()).is_err() {
                return Err(AuthError::Config(format!(
                    "server_auth.header_name is not a valid header name: {}",
                    header_name
                )));
            }
            if keys.iter().all(|k| k.is_empty()) {
                return Err(AuthError::Config(
                    "server_auth.keys must contain at least one key".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn env_seconds(name: &str) -> Option<u64> {
    let value = std::env::var(name).ok()?;
    match value.trim().parse() {
        Ok(secs) => Some(secs),
        Err(_) => {
            tracing::warn!("Ignoring {}: '{}' is not a number of seconds", name, value);
            None
        }
    }
}
