//! OAuth 2.1 authorization for generated MCP tool servers
//!
//! Two directions are covered.  Outbound, the server acts as an OAuth client
//! toward the upstream API: [`flow`] runs the authorization code flow with
//! PKCE and [`manager`] keeps the resulting tokens valid.  Inbound,
//! [`middleware`] authenticates the MCP clients calling the server.
//!
//! # Module Layout
//!
//! - [`flow`]        -- Authorization code flow, token requests and responses
//! - [`manager`]     -- Token lifecycle: storage, expiry and refresh
//! - [`middleware`]  -- Axum middleware and extractors for incoming requests
//! - [`pkce`]        -- PKCE `S256` challenge generation and verification
//! - [`token_store`] -- Token sets and the pluggable storage trait

pub mod flow;
pub mod manager;
pub mod middleware;
pub mod pkce;
pub mod token_store;
