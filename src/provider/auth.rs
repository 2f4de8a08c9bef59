//! Credential flows
//!
//! - `service_principal`: OAuth2 client credentials
//! - `managed_identity`: instance metadata (IMDS) token endpoint
//! - `interactive`: OAuth2 device-code flow
//! - `auto`: service principal when tenant, client id and secret are all
//!   configured, managed identity otherwise
//!
//! Tokens are cached per scope until five minutes before expiry.

use crate::domain::ports::{AccessToken, TokenSource, TokenSourceRef};
use crate::error::{Error, Result};
use crate::settings::AzureSettings;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Public cloud login endpoint
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Instance metadata token endpoint
pub const IMDS_ENDPOINT: &str = "http://169.254.169.254/metadata/identity/oauth2/token";

/// Well-known public client used for device-code sign-in
const DEVICE_CODE_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

// =============================================================================
// Auth Method
// =============================================================================

/// How to obtain credentials
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Auto,
    ServicePrincipal,
    Interactive,
    ManagedIdentity,
}

impl AuthMethod {
    /// Concrete flow for `auto`
    pub fn resolve(self, settings: &AzureSettings) -> AuthMethod {
        match self {
            AuthMethod::Auto if settings.has_service_principal() => AuthMethod::ServicePrincipal,
            AuthMethod::Auto => AuthMethod::ManagedIdentity,
            other => other,
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthMethod::Auto => "auto",
            AuthMethod::ServicePrincipal => "service_principal",
            AuthMethod::Interactive => "interactive",
            AuthMethod::ManagedIdentity => "managed_identity",
        };
        write!(f, "{}", s)
    }
}

// =============================================================================
// Token Cache
// =============================================================================

/// Per-scope token cache
#[derive(Default)]
pub struct TokenCache {
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl TokenCache {
    pub fn get(&self, scope: &str) -> Option<AccessToken> {
        let now = Utc::now();
        self.tokens.lock().get(scope).filter(|t| t.is_fresh(now)).cloned()
    }

    pub fn insert(&self, scope: &str, token: AccessToken) {
        self.tokens.lock().insert(scope.to_string(), token);
    }
}

/// Token endpoint response; `expires_in` / `expires_on` arrive as numbers or
/// strings depending on the endpoint
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<Value>,
    expires_on: Option<Value>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn into_token(self, flow: &str) -> Result<AccessToken> {
        if let Some(error) = self.error {
            return Err(Error::AuthenticationFailure(format!(
                "{} token request failed: {}: {}",
                flow,
                error,
                self.error_description.unwrap_or_default()
            )));
        }
        let token = self
            .access_token
            .ok_or_else(|| Error::AuthenticationFailure(format!("{} response carried no access_token", flow)))?;

        let expires_on = match (self.expires_on.as_ref().and_then(seconds), self.expires_in.as_ref().and_then(seconds)) {
            (Some(epoch), _) => chrono::DateTime::<Utc>::from_timestamp(epoch, 0),
            (None, Some(secs)) => Some(Utc::now() + ChronoDuration::seconds(secs)),
            (None, None) => None,
        }
        .unwrap_or_else(|| Utc::now() + ChronoDuration::hours(1));

        Ok(AccessToken { token, expires_on })
    }
}

fn seconds(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// The endpoint could not be reached; worth another attempt
fn endpoint_unreachable(endpoint: &str, e: reqwest::Error) -> Error {
    Error::ProviderUnavailable(format!("{} endpoint unreachable: {}", endpoint, e))
}

async fn read_token_response(response: reqwest::Response, flow: &str) -> Result<AccessToken> {
    let status = response.status();
    if status.is_server_error() {
        return Err(Error::ProviderUnavailable(format!("{} token endpoint returned {}", flow, status)));
    }
    let body: TokenResponse = response.json().await.map_err(|e| {
        Error::AuthenticationFailure(format!("{} token endpoint returned {}: {}", flow, status, e))
    })?;
    body.into_token(flow)
}

// =============================================================================
// Client Secret Credential
// =============================================================================

/// OAuth2 client-credentials grant for a service principal
pub struct ClientSecretCredential {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    client_secret: String,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(
        http: reqwest::Client,
        authority: impl Into<String>,
        tenant_id: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            authority: authority.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenSource for ClientSecretCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cache.get(scope) {
            return Ok(token);
        }

        let url = format!("{}/{}/oauth2/v2.0/token", self.authority, self.tenant_id);
        debug!("Requesting client-credentials token from {}", url);

        let response = self
            .http
            .post(&url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| endpoint_unreachable("token", e))?;

        let token = read_token_response(response, "client credentials").await?;
        self.cache.insert(scope, token.clone());
        Ok(token)
    }

    fn describe(&self) -> &'static str {
        "service principal"
    }
}

// =============================================================================
// Managed Identity Credential
// =============================================================================

/// Token from the instance metadata service of the host VM
pub struct ManagedIdentityCredential {
    http: reqwest::Client,
    endpoint: String,
    client_id: Option<String>,
    cache: TokenCache,
}

impl ManagedIdentityCredential {
    /// System-assigned identity unless `client_id` names a user-assigned one
    pub fn new(http: reqwest::Client, endpoint: impl Into<String>, client_id: Option<String>) -> Self {
        Self {
            http,
            endpoint: endpoint.into(),
            client_id,
            cache: TokenCache::default(),
        }
    }
}

#[async_trait]
impl TokenSource for ManagedIdentityCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cache.get(scope) {
            return Ok(token);
        }

        let resource = scope.trim_end_matches("/.default");
        let mut query = vec![("api-version", "2018-02-01"), ("resource", resource)];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.as_str()));
        }

        let response = self
            .http
            .get(&self.endpoint)
            .header("Metadata", "true")
            .query(&query)
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .map_err(|e| endpoint_unreachable("managed identity", e))?;

        let token = read_token_response(response, "managed identity").await?;
        self.cache.insert(scope, token.clone());
        Ok(token)
    }

    fn describe(&self) -> &'static str {
        "managed identity"
    }
}

// =============================================================================
// Device Code Credential
// =============================================================================

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    message: String,
    expires_in: Value,
    interval: Option<Value>,
}

/// Callback that shows the device-code instructions to the user
pub type DevicePrompt = Arc<dyn Fn(&str) + Send + Sync>;

/// Interactive sign-in through the OAuth2 device-code flow
pub struct DeviceCodeCredential {
    http: reqwest::Client,
    authority: String,
    tenant_id: String,
    client_id: String,
    prompt: DevicePrompt,
    cache: TokenCache,
}

impl DeviceCodeCredential {
    pub fn new(http: reqwest::Client, authority: impl Into<String>, tenant_id: Option<String>) -> Self {
        Self {
            http,
            authority: authority.into().trim_end_matches('/').to_string(),
            tenant_id: tenant_id.unwrap_or_else(|| "organizations".to_string()),
            client_id: DEVICE_CODE_CLIENT_ID.to_string(),
            prompt: Arc::new(|message| eprintln!("{}", message)),
            cache: TokenCache::default(),
        }
    }

    pub fn with_prompt(mut self, prompt: DevicePrompt) -> Self {
        self.prompt = prompt;
        self
    }
}

#[async_trait]
impl TokenSource for DeviceCodeCredential {
    async fn token(&self, scope: &str) -> Result<AccessToken> {
        if let Some(token) = self.cache.get(scope) {
            return Ok(token);
        }

        let base = format!("{}/{}/oauth2/v2.0", self.authority, self.tenant_id);

        let device: DeviceCodeResponse = self
            .http
            .post(format!("{}/devicecode", base))
            .form(&[("client_id", self.client_id.as_str()), ("scope", scope)])
            .send()
            .await
            .map_err(|e| endpoint_unreachable("device code", e))?
            .json()
            .await
            .map_err(|e| Error::AuthenticationFailure(format!("invalid device code response: {}", e)))?;

        (self.prompt)(&device.message);

        let mut interval = device.interval.as_ref().and_then(seconds).unwrap_or(5).max(1) as u64;
        let deadline = tokio::time::Instant::now()
            + Duration::from_secs(seconds(&device.expires_in).unwrap_or(900).max(0) as u64);

        loop {
            tokio::time::sleep(Duration::from_secs(interval)).await;
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::AuthenticationFailure("device code expired before sign-in completed".into()));
            }

            let response: TokenResponse = self
                .http
                .post(format!("{}/token", base))
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.client_id.as_str()),
                    ("device_code", device.device_code.as_str()),
                ])
                .send()
                .await
                .map_err(|e| endpoint_unreachable("device code", e))?
                .json()
                .await
                .map_err(|e| Error::AuthenticationFailure(format!("invalid token response: {}", e)))?;

            match response.error.as_deref() {
                Some("authorization_pending") => continue,
                Some("slow_down") => interval += 5,
                _ => {
                    let token = response.into_token("device code")?;
                    info!("Interactive sign-in completed");
                    self.cache.insert(scope, token.clone());
                    return Ok(token);
                }
            }
        }
    }

    fn describe(&self) -> &'static str {
        "interactive"
    }
}

// =============================================================================
// Static Token
// =============================================================================

/// A pre-acquired bearer token
pub struct StaticTokenCredential {
    token: AccessToken,
}

impl StaticTokenCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: AccessToken {
                token: token.into(),
                expires_on: Utc::now() + ChronoDuration::days(365),
            },
        }
    }
}

#[async_trait]
impl TokenSource for StaticTokenCredential {
    async fn token(&self, _scope: &str) -> Result<AccessToken> {
        Ok(self.token.clone())
    }

    fn describe(&self) -> &'static str {
        "static token"
    }
}

// =============================================================================
// Factory
// =============================================================================

/// Build the credential for `method` from `settings`
pub fn credential_for(
    method: AuthMethod,
    settings: &AzureSettings,
    authority: &str,
    http: reqwest::Client,
) -> Result<TokenSourceRef> {
    let resolved = method.resolve(settings);
    debug!("Auth method {} resolved to {}", method, resolved);

    match resolved {
        AuthMethod::ServicePrincipal => {
            let missing = |name: &str| {
                Error::AuthenticationFailure(format!("service principal authentication requires {}", name))
            };
            let tenant = settings.tenant_id.clone().ok_or_else(|| missing("AZURE_TENANT_ID"))?;
            let client = settings.client_id.clone().ok_or_else(|| missing("AZURE_CLIENT_ID"))?;
            let secret = settings.client_secret.clone().ok_or_else(|| missing("AZURE_CLIENT_SECRET"))?;
            Ok(Arc::new(ClientSecretCredential::new(http, authority, tenant, client, secret)))
        }
        AuthMethod::Interactive => Ok(Arc::new(DeviceCodeCredential::new(
            http,
            authority,
            settings.tenant_id.clone(),
        ))),
        AuthMethod::ManagedIdentity | AuthMethod::Auto => {
            Ok(Arc::new(managed_identity(settings, IMDS_ENDPOINT, http)))
        }
    }
}

/// A configured client id selects a user-assigned identity
fn managed_identity(settings: &AzureSettings, endpoint: &str, http: reqwest::Client) -> ManagedIdentityCredential {
    ManagedIdentityCredential::new(http, endpoint, settings.client_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    // `assert_matches!` formats the whole Result on failure, so the Ok type needs Debug
    impl std::fmt::Debug for dyn crate::domain::ports::TokenSource {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.describe())
        }
    }
    use axum::{
        extract::{Path, Query},
        http::HeaderMap,
        routing::{get, post},
        Form, Json, Router,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn service_principal() -> AzureSettings {
        AzureSettings {
            subscription_id: Some("sub-1".into()),
            tenant_id: Some("tenant-1".into()),
            client_id: Some("client-1".into()),
            client_secret: Some("secret-1".into()),
            default_location: None,
        }
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_auto_resolution() {
        assert_eq!(AuthMethod::Auto.resolve(&service_principal()), AuthMethod::ServicePrincipal);
        assert_eq!(AuthMethod::Auto.resolve(&AzureSettings::default()), AuthMethod::ManagedIdentity);
        assert_eq!(
            AuthMethod::Interactive.resolve(&service_principal()),
            AuthMethod::Interactive
        );
    }

    #[test]
    fn test_credential_factory() {
        let http = reqwest::Client::new();
        let sp = credential_for(AuthMethod::Auto, &service_principal(), DEFAULT_AUTHORITY, http.clone()).unwrap();
        assert_eq!(sp.describe(), "service principal");

        let mi = credential_for(AuthMethod::Auto, &AzureSettings::default(), DEFAULT_AUTHORITY, http.clone()).unwrap();
        assert_eq!(mi.describe(), "managed identity");

        let result = credential_for(
            AuthMethod::ServicePrincipal,
            &AzureSettings::default(),
            DEFAULT_AUTHORITY,
            http,
        );
        assert_matches!(result, Err(Error::AuthenticationFailure(_)));
    }

    #[test]
    fn test_token_response_parsing() {
        let response: TokenResponse =
            serde_json::from_str(r#"{"access_token":"abc","expires_on":"4102444800","token_type":"Bearer"}"#).unwrap();
        let token = response.into_token("test").unwrap();
        assert_eq!(token.token, "abc");
        assert_eq!(token.expires_on.timestamp(), 4102444800);

        let response: TokenResponse =
            serde_json::from_str(r#"{"error":"invalid_client","error_description":"AADSTS7000215"}"#).unwrap();
        assert_matches!(response.into_token("test"), Err(Error::AuthenticationFailure(msg)) if msg.contains("invalid_client"));
    }

    #[tokio::test]
    async fn test_client_credentials_are_cached() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/:tenant/oauth2/v2.0/token",
            post(move |Path(tenant): Path<String>, Form(form): Form<HashMap<String, String>>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    assert_eq!(tenant, "tenant-1");
                    assert_eq!(form.get("grant_type").map(String::as_str), Some("client_credentials"));
                    Json(serde_json::json!({"access_token": "token-1", "expires_in": 3599, "token_type": "Bearer"}))
                }
            }),
        );
        let authority = spawn(app).await;

        let credential = ClientSecretCredential::new(reqwest::Client::new(), authority, "tenant-1", "client-1", "secret-1");
        let first = credential.token("https://management.azure.com/.default").await.unwrap();
        let second = credential.token("https://management.azure.com/.default").await.unwrap();

        assert_eq!(first.token, "token-1");
        assert_eq!(second.token, "token-1");
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_client_secret() {
        let app = Router::new().route(
            "/:tenant/oauth2/v2.0/token",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": "invalid_client", "error_description": "bad secret"})),
                )
            }),
        );
        let authority = spawn(app).await;

        let credential = ClientSecretCredential::new(reqwest::Client::new(), authority, "t", "c", "wrong");
        assert_matches!(
            credential.token("https://management.azure.com/.default").await,
            Err(Error::AuthenticationFailure(_))
        );
    }

    #[tokio::test]
    async fn test_managed_identity_requests_configured_client_id() {
        let seen: Arc<Mutex<Vec<HashMap<String, String>>>> = Arc::default();
        let captured = seen.clone();
        let app = Router::new().route(
            "/metadata/identity/oauth2/token",
            get(move |headers: HeaderMap, Query(query): Query<HashMap<String, String>>| {
                let captured = captured.clone();
                async move {
                    assert_eq!(headers.get("Metadata").and_then(|v| v.to_str().ok()), Some("true"));
                    captured.lock().push(query);
                    Json(serde_json::json!({"access_token": "mi-token", "expires_on": "4102444800"}))
                }
            }),
        );
        let endpoint = format!("{}/metadata/identity/oauth2/token", spawn(app).await);

        let user_assigned = AzureSettings {
            client_id: Some("identity-1".into()),
            ..Default::default()
        };
        let token = managed_identity(&user_assigned, &endpoint, reqwest::Client::new())
            .token("https://management.azure.com/.default")
            .await
            .unwrap();
        assert_eq!(token.token, "mi-token");

        managed_identity(&AzureSettings::default(), &endpoint, reqwest::Client::new())
            .token("https://management.azure.com/.default")
            .await
            .unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].get("client_id").map(String::as_str), Some("identity-1"));
        assert_eq!(seen[0].get("resource").map(String::as_str), Some("https://management.azure.com"));
        assert!(seen[1].get("client_id").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_token_endpoint_is_transient() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let authority = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let credential = ClientSecretCredential::new(reqwest::Client::new(), authority, "t", "c", "s");
        let err = credential.token("https://management.azure.com/.default").await.unwrap_err();

        assert_matches!(err, Error::ProviderUnavailable(_));
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_token_endpoint_outage_is_transient() {
        let app = Router::new().route(
            "/:tenant/oauth2/v2.0/token",
            post(|| async { axum::http::StatusCode::BAD_GATEWAY }),
        );
        let authority = spawn(app).await;

        let credential = ClientSecretCredential::new(reqwest::Client::new(), authority, "t", "c", "s");
        assert_matches!(
            credential.token("https://management.azure.com/.default").await,
            Err(Error::ProviderUnavailable(_))
        );
    }
}
