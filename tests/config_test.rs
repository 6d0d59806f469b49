//! Configuration loading tests
//!
//! Environment variables are process-global, so every test that touches
//! `MCP_AUTH_*` runs under `#[serial]`.

mod common;

use serial_test::serial;

use openapi_mcp_auth::cli::Cli;
use openapi_mcp_auth::config::Config;
use openapi_mcp_auth::auth::middleware::AuthConfig;

const ENV_VARS: &[&str] = &[
    "MCP_AUTH_CLIENT_ID",
    "MCP_AUTH_CLIENT_SECRET",
    "MCP_AUTH_AUTHORIZATION_URL",
    "MCP_AUTH_TOKEN_URL",
    "MCP_AUTH_SCOPES",
    "MCP_AUTH_REDIRECT_URI",
    "MCP_AUTH_REFRESH_BUFFER_SECONDS",
    "MCP_AUTH_STATE_MAX_AGE_SECONDS",
    "MCP_AUTH_REQUEST_TIMEOUT_SECONDS",
];

fn clear_env() {
    for name in ENV_VARS {
        std::env::remove_var(name);
    }
}

const VALID_YAML: &str = "oauth:\n  client_id: file-client\n  authorization_url: https://auth.example.com/authorize\n  token_url: https://auth.example.com/token\n  scopes: [read]\nserver_auth:\n  type: oauth2\n  required_scopes: [tools:read]\n";

#[test]
#[serial]
fn test_load_from_file() {
    clear_env();
    let (_dir, path) = common::temp_config_file(VALID_YAML);

    let config = Config::load(path.to_str().expect("utf-8 path"), &Cli::default()).expect("load");
    assert_eq!(config.oauth.client_id, "file-client");
    assert_eq!(config.oauth.scopes, vec!["read"]);
    assert_eq!(
        config.server_auth,
        AuthConfig::OAuth2 {
            required_scopes: vec!["tools:read".to_string()]
        }
    );
    assert_eq!(config.tokens.refresh_buffer_seconds, 30);
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_missing_file_uses_defaults() {
    clear_env();
    let config = Config::load("/nonexistent/auth.yaml", &Cli::default()).expect("load");
    assert_eq!(config, Config::default());
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn test_invalid_yaml_is_config_error() {
    clear_env();
    let (_dir, path) = common::temp_config_file("oauth: 42\n");
    let err = Config::load(path.to_str().expect("utf-8 path"), &Cli::default()).unwrap_err();
    assert!(err.to_string().starts_with("Configuration error"), "{err}");
}

#[test]
#[serial]
fn test_env_vars_override_file() {
    clear_env();
    let (_dir, path) = common::temp_config_file(VALID_YAML);

    std::env::set_var("MCP_AUTH_CLIENT_ID", "env-client");
    std::env::set_var("MCP_AUTH_SCOPES", "read, write admin");
    std::env::set_var("MCP_AUTH_REFRESH_BUFFER_SECONDS", "90");
    std::env::set_var("MCP_AUTH_STATE_MAX_AGE_SECONDS", "not-a-number");

    let config = Config::load(path.to_str().expect("utf-8 path"), &Cli::default()).expect("load");
    clear_env();

    assert_eq!(config.oauth.client_id, "env-client");
    assert_eq!(config.oauth.scopes, vec!["read", "write", "admin"]);
    assert_eq!(config.tokens.refresh_buffer_seconds, 90);
    assert_eq!(config.tokens.state_max_age_seconds, 600);
}

#[test]
#[serial]
fn test_cli_overrides_env() {
    clear_env();
    let (_dir, path) = common::temp_config_file(VALID_YAML);
    std::env::set_var("MCP_AUTH_CLIENT_ID", "env-client");

    let cli = Cli {
        client_id: Some("cli-client".to_string()),
        ..Cli::default()
    };
    let config = Config::load(path.to_str().expect("utf-8 path"), &cli).expect("load");
    clear_env();

    assert_eq!(config.oauth.client_id, "cli-client");
}

#[test]
#[serial]
fn test_out_of_range_env_buffer_fails_validation() {
    clear_env();
    let (_dir, path) = common::temp_config_file(VALID_YAML);
    std::env::set_var("MCP_AUTH_REFRESH_BUFFER_SECONDS", u64::MAX.to_string());

    let config = Config::load(path.to_str().expect("utf-8 path"), &Cli::default()).expect("load");
    clear_env();

    assert_eq!(config.tokens.refresh_buffer_seconds, u64::MAX);
    let err = config.validate().unwrap_err();
    assert!(
        err.to_string().contains("tokens.refresh_buffer_seconds"),
        "{err}"
    );
}
