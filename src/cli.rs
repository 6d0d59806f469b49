//! Command-line interface for the `mcp-auth` developer tool
//!
//! The binary drives the OAuth flows against a real authorization server so
//! that a generated MCP server's configuration can be checked by hand.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mcp-auth - OAuth 2.1 + PKCE helper for MCP tool servers
#[derive(Parser, Debug, Clone)]
#[command(name = "mcp-auth")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/auth.yaml")]
    pub config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Override the configured OAuth client id
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Override the configured token endpoint
    #[arg(long, global = true)]
    pub token_url: Option<String>,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Print a fresh PKCE verifier/challenge pair as JSON
    Pkce,

    /// Print an authorization URL and the state needed to finish the flow
    Authorize {
        /// Redirect URI registered with the authorization server
        #[arg(short, long)]
        redirect_uri: Option<String>,

        /// Write the authorization state JSON to this file instead of stdout
        #[arg(short, long)]
        state_file: Option<PathBuf>,
    },

    /// Exchange an authorization code using a saved authorization state
    Exchange {
        /// Authorization state JSON produced by `authorize`
        #[arg(short, long)]
        state_file: PathBuf,

        /// `state` query parameter received on the callback
        #[arg(long)]
        state: String,

        /// `code` query parameter received on the callback
        #[arg(long)]
        code: String,
    },

    /// Obtain a token with the client credentials grant
    ClientCredentials,

    /// Validate the configuration and exit
    CheckConfig,
}

impl Cli {
    /// Parse command line arguments
    ///
    /// # Returns
    ///
    /// Returns the parsed CLI structure
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

impl Default for Cli {
    fn default() -> Self {
        Self {
            config: Some("config/auth.yaml".to_string()),
            verbose: false,
            client_id: None,
            token_url: None,
            command: Commands::CheckConfig,
        }
    }
}
