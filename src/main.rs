//! mcp-auth - OAuth 2.1 + PKCE helper for MCP tool servers
//!
#![doc = "Main entry point for the mcp-auth developer tool."]

use std::sync::Arc;

use anyhow::{Context, Result};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use openapi_mcp_auth::auth::flow::{initialize_auth_flow, AuthorizationState};
use openapi_mcp_auth::auth::pkce::generate_pkce_params;
use openapi_mcp_auth::cli::{Cli, Commands};
use openapi_mcp_auth::config::Config;
use openapi_mcp_auth::{MemoryTokenStorage, TokenManager};

/// Storage key for tokens obtained by this tool.
const CLI_TOKEN_KEY: &str = "mcp-auth";

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load configuration
    let config_path = cli.config.as_deref().unwrap_or("config/auth.yaml");
    let config = Config::load(config_path, &cli)?;

    match cli.command {
        Commands::Pkce => {
            let params = generate_pkce_params();
            println!("{}", serde_json::to_string_pretty(&params)?);
            Ok(())
        }
        Commands::Authorize {
            redirect_uri,
            state_file,
        } => {
            config.validate()?;
            let redirect_uri = redirect_uri
                .or_else(|| config.oauth.redirect_uri.clone())
                .context("no redirect URI: pass --redirect-uri or set oauth.redirect_uri")?;

            let start = initialize_auth_flow(&config.oauth, &redirect_uri)?;
            let state_json = serde_json::to_string_pretty(&start.state)?;

            println!("{}", start.url);
            match state_file {
                Some(path) => {
                    std::fs::write(&path, state_json).with_context(|| {
                        format!("failed to write state file {}", path.display())
                    })?;
                    tracing::info!("Authorization state saved to {}", path.display());
                }
                None => println!("{}", state_json),
            }
            Ok(())
        }
        Commands::Exchange {
            state_file,
            state,
            code,
        } => {
            config.validate()?;
            let contents = std::fs::read_to_string(&state_file)
                .with_context(|| format!("failed to read state file {}", state_file.display()))?;
            let saved: AuthorizationState =
                serde_json::from_str(&contents).context("state file is not valid JSON")?;

            let manager = build_manager(&config)?;
            let token = manager
                .complete_authorization(CLI_TOKEN_KEY, &saved, &state, &code)
                .await?;
            println!("{}", serde_json::to_string_pretty(&token)?);
            Ok(())
        }
        Commands::ClientCredentials => {
            config.validate()?;
            let manager = build_manager(&config)?;
            let token = manager.authorize_client_credentials(CLI_TOKEN_KEY).await?;
            println!("{}", serde_json::to_string_pretty(&token)?);
            Ok(())
        }
        Commands::CheckConfig => {
            config.validate()?;
            println!("Configuration OK");
            Ok(())
        }
    }
}

fn build_manager(config: &Config) -> Result<TokenManager> {
    Ok(TokenManager::with_settings(
        config.oauth.clone(),
        Arc::new(MemoryTokenStorage::new()),
        &config.tokens,
    )?)
}

/// Initialize tracing/logging
///
/// Logs go to stderr so command output on stdout stays machine-readable.
fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        "openapi_mcp_auth=debug"
    } else {
        "openapi_mcp_auth=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
