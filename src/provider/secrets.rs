//! Secret sources
//!
//! Admin passwords and similar values are never literals in code or plans;
//! they are resolved at deploy time from the process environment or from a
//! Key Vault. A missing secret is a configuration error.

use crate::domain::ports::{SecretSource, SecretSourceRef, TokenSourceRef};
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

const KEY_VAULT_API: &str = "7.4";
const KEY_VAULT_SCOPE: &str = "https://vault.azure.net/.default";

/// Secrets read from environment variables
#[derive(Debug, Clone, Default)]
pub struct EnvSecretSource;

#[async_trait]
impl SecretSource for EnvSecretSource {
    async fn secret(&self, name: &str) -> Result<String> {
        match std::env::var(name) {
            Ok(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::Configuration(format!(
                "secret {} is not set in the environment",
                name
            ))),
        }
    }
}

/// Secrets read from a Key Vault
pub struct KeyVaultSecretSource {
    http: reqwest::Client,
    vault_url: String,
    credential: TokenSourceRef,
    scope: String,
}

impl KeyVaultSecretSource {
    pub fn new(http: reqwest::Client, vault_url: impl Into<String>, credential: TokenSourceRef) -> Self {
        Self {
            http,
            vault_url: vault_url.into().trim_end_matches('/').to_string(),
            credential,
            scope: KEY_VAULT_SCOPE.to_string(),
        }
    }

    /// Override the token scope (sovereign clouds, tests)
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = scope.into();
        self
    }
}

/// Vault secret names allow only alphanumerics and dashes
pub fn vault_secret_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect()
}

#[async_trait]
impl SecretSource for KeyVaultSecretSource {
    async fn secret(&self, name: &str) -> Result<String> {
        let secret_name = vault_secret_name(name);
        let url = format!("{}/secrets/{}?api-version={}", self.vault_url, secret_name, KEY_VAULT_API);
        let token = self.credential.token(&self.scope).await?;
        debug!("Reading secret {} from {}", secret_name, self.vault_url);

        let response = self.http.get(&url).bearer_auth(&token.token).send().await?;
        let status = response.status();
        match status.as_u16() {
            200 => {}
            401 | 403 => {
                return Err(Error::AuthenticationFailure(format!(
                    "access to secret {} in {} denied ({})",
                    secret_name, self.vault_url, status
                )))
            }
            404 => {
                return Err(Error::Configuration(format!(
                    "secret {} not found in {}",
                    secret_name, self.vault_url
                )))
            }
            s if s >= 500 => return Err(Error::ProviderUnavailable(format!("key vault returned {}", status))),
            s => {
                return Err(Error::ProviderRejected {
                    status: s,
                    code: "KeyVaultError".into(),
                    message: format!("reading secret {} failed", secret_name),
                })
            }
        }

        let body: Value = response.json().await?;
        body.get("value")
            .and_then(Value::as_str)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::Configuration(format!("secret {} has no value", secret_name)))
    }
}

/// Key Vault when a vault URL is configured, the environment otherwise
pub fn secret_source(vault_url: Option<&str>, credential: TokenSourceRef, http: reqwest::Client) -> SecretSourceRef {
    match vault_url {
        Some(url) => Arc::new(KeyVaultSecretSource::new(http, url, credential)),
        None => Arc::new(EnvSecretSource),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::auth::StaticTokenCredential;
    use assert_matches::assert_matches;
    use axum::{extract::Path, http::StatusCode, routing::get, Json, Router};
    use serde_json::json;

    #[test]
    fn test_vault_secret_name() {
        assert_eq!(vault_secret_name("AVD_ADMIN_PASSWORD"), "avd-admin-password");
        assert_eq!(vault_secret_name("already-fine"), "already-fine");
    }

    #[tokio::test]
    async fn test_env_source() {
        std::env::set_var("AVD_OPS_TEST_SECRET_PRESENT", "hunter2!");
        assert_eq!(EnvSecretSource.secret("AVD_OPS_TEST_SECRET_PRESENT").await.unwrap(), "hunter2!");
        assert_matches!(
            EnvSecretSource.secret("AVD_OPS_TEST_SECRET_ABSENT").await,
            Err(Error::Configuration(_))
        );
    }

    #[tokio::test]
    async fn test_key_vault_source() {
        let app = Router::new().route(
            "/secrets/:name",
            get(|Path(name): Path<String>| async move {
                if name == "avd-admin-password" {
                    (StatusCode::OK, Json(json!({"value": "vault-pw", "id": "x"})))
                } else {
                    (StatusCode::NOT_FOUND, Json(json!({"error": {"code": "SecretNotFound"}})))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let source = KeyVaultSecretSource::new(
            reqwest::Client::new(),
            format!("http://{}", addr),
            Arc::new(StaticTokenCredential::new("kv-token")),
        );

        assert_eq!(source.secret("AVD_ADMIN_PASSWORD").await.unwrap(), "vault-pw");
        assert_matches!(source.secret("missing").await, Err(Error::Configuration(_)));
    }
}
