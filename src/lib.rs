//! openapi-mcp-auth - OAuth 2.1 credential subsystem for MCP tool servers
//!
//! This library provides the authentication layer of MCP servers generated
//! from OpenAPI descriptions: PKCE generation, the authorization code and
//! client credentials flows, token lifecycle management with refresh, and
//! axum middleware for protecting the server's own endpoints.
//!
//! # Architecture
//!
//! - `auth`: PKCE, flows, token manager, storage and middleware
//! - `config`: Configuration management and validation
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition for the `mcp-auth` tool
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use openapi_mcp_auth::{Config, MemoryTokenStorage, TokenManager};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config/auth.yaml", &Default::default())?;
//!     config.validate()?;
//!
//!     let manager = TokenManager::with_settings(
//!         config.oauth.clone(),
//!         Arc::new(MemoryTokenStorage::new()),
//!         &config.tokens,
//!     )?;
//!     let header = manager.get_auth_header("default").await?;
//!     println!("{header}");
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;

// Re-export commonly used types
pub use auth::flow::{AuthorizationState, OAuthConfig, PendingAuthorizations};
pub use auth::manager::TokenManager;
pub use auth::middleware::{AuthConfig, AuthenticatedToken, TokenValidator};
pub use auth::pkce::PkceParams;
pub use auth::token_store::{MemoryTokenStorage, TokenSet, TokenStorage};
pub use config::{Config, TokenConfig};
pub use error::{AuthError, Result, TokenError};
