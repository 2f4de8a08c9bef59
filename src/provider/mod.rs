//! Provider Adapters
//!
//! Provides the control-plane adapters behind the domain ports:
//! - ARM REST client (`arm`) authenticated by a credential flow (`auth`)
//! - in-memory simulator (`memory`) for `--simulate` and tests
//! - secret sources (`secrets`)

pub mod arm;
pub mod auth;
pub mod memory;
pub mod secrets;

pub use arm::{ArmClient, ArmConfig, DEFAULT_ENDPOINT};
pub use auth::{AuthMethod, DEFAULT_AUTHORITY};
pub use memory::{InMemoryCloud, InMemoryConfig};
pub use secrets::{EnvSecretSource, KeyVaultSecretSource};

use crate::domain::ports::{CloudProviderRef, ResourceProvider, SecretSourceRef};
use crate::error::{Error, Result};
use crate::settings::AzureSettings;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// `tags` of an ARM resource body as a string map
pub(crate) fn tags_of(body: &Value) -> BTreeMap<String, String> {
    body.get("tags")
        .and_then(Value::as_object)
        .map(|tags| {
            tags.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

// =============================================================================
// Configuration
// =============================================================================

/// How to reach the control plane
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub auth_method: AuthMethod,
    pub authority: String,
    pub endpoint: String,
    /// Key Vault holding deployment secrets; environment variables otherwise
    pub key_vault_url: Option<String>,
    pub request_timeout: Duration,
    /// Use the in-memory simulator instead of the real endpoint
    pub simulate: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            auth_method: AuthMethod::Auto,
            authority: DEFAULT_AUTHORITY.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            key_vault_url: None,
            request_timeout: Duration::from_secs(60),
            simulate: false,
        }
    }
}

// =============================================================================
// Connection
// =============================================================================

/// An authenticated session with the control plane
#[derive(Clone)]
pub struct Connection {
    pub provider: CloudProviderRef,
    pub secrets: SecretSourceRef,
    pub subscription_id: String,
    /// Credential flow in use
    pub auth: &'static str,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("subscription_id", &self.subscription_id)
            .field("auth", &self.auth)
            .finish()
    }
}

/// Turns settings into an authenticated connection
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, settings: &AzureSettings) -> Result<Connection>;
}

pub type ConnectorRef = Arc<dyn Connector>;

fn require_subscription(settings: &AzureSettings) -> Result<String> {
    settings
        .subscription_id
        .clone()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| Error::AuthenticationFailure("AZURE_SUBSCRIPTION_ID is not configured".into()))
}

/// Connector for the real resource-management endpoint
pub struct ArmConnector {
    config: ProviderConfig,
    http: reqwest::Client,
}

impl ArmConnector {
    pub fn new(config: ProviderConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { config, http })
    }
}

#[async_trait]
impl Connector for ArmConnector {
    async fn connect(&self, settings: &AzureSettings) -> Result<Connection> {
        let subscription_id = require_subscription(settings)?;
        let credential = auth::credential_for(
            self.config.auth_method,
            settings,
            &self.config.authority,
            self.http.clone(),
        )?;

        let arm_config = ArmConfig::new(&subscription_id).with_endpoint(&self.config.endpoint);
        let client = ArmClient::with_http(arm_config, credential.clone(), self.http.clone());
        client.verify().await?;

        info!(
            "Connected to subscription {} using {}",
            subscription_id,
            credential.describe()
        );

        Ok(Connection {
            provider: Arc::new(client),
            secrets: secrets::secret_source(
                self.config.key_vault_url.as_deref(),
                credential.clone(),
                self.http.clone(),
            ),
            subscription_id,
            auth: credential.describe(),
        })
    }
}

/// Connector that hands out a shared in-memory cloud
pub struct SimulatedConnector {
    cloud: Arc<InMemoryCloud>,
}

impl SimulatedConnector {
    pub fn new(cloud: Arc<InMemoryCloud>) -> Self {
        Self { cloud }
    }

    pub fn cloud(&self) -> &Arc<InMemoryCloud> {
        &self.cloud
    }
}

#[async_trait]
impl Connector for SimulatedConnector {
    async fn connect(&self, settings: &AzureSettings) -> Result<Connection> {
        require_subscription(settings)?;
        Ok(Connection {
            subscription_id: self.cloud.subscription_id().to_string(),
            provider: self.cloud.clone(),
            secrets: Arc::new(EnvSecretSource),
            auth: "simulated",
        })
    }
}

/// Factory for connectors
pub struct ProviderFactory;

impl ProviderFactory {
    pub fn connector(config: ProviderConfig) -> Result<ConnectorRef> {
        if config.simulate {
            info!("Using the in-memory simulator");
            let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));
            return Ok(Arc::new(SimulatedConnector::new(cloud)));
        }
        Ok(Arc::new(ArmConnector::new(config)?))
    }
}
