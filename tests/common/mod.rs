use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

use openapi_mcp_auth::auth::flow::OAuthConfig;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("auth.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

/// OAuth client configuration whose endpoints live on `base_url`.
#[allow(dead_code)]
pub fn make_oauth_config(base_url: &str) -> OAuthConfig {
    OAuthConfig {
        client_id: "c1".to_string(),
        client_secret: None,
        authorization_url: format!("{}/authorize", base_url),
        token_url: format!("{}/token", base_url),
        scopes: vec!["read".to_string()],
        pkce: true,
        redirect_uri: None,
    }
}

/// A successful token endpoint response body.
#[allow(dead_code)]
pub fn token_response_body(access_token: &str, refresh_token: Option<&str>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "read"
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = serde_json::json!(refresh);
    }
    body
}
