//! Azure connection settings
//!
//! Settings live in a `.env`-style file next to the binary. Values from the
//! process environment take precedence over the file when loading.

pub mod env_file;

pub use env_file::{EnvFile, MANAGED_KEYS, MANAGED_PREFIX};

use crate::error::{Error, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default region for new resources
pub const DEFAULT_LOCATION: &str = "eastus";

// =============================================================================
// Azure Settings
// =============================================================================

/// Credentials and defaults used to reach the control plane
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AzureSettings {
    pub subscription_id: Option<String>,
    pub tenant_id: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub default_location: Option<String>,
}

impl fmt::Debug for AzureSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureSettings")
            .field("subscription_id", &self.subscription_id)
            .field("tenant_id", &self.tenant_id)
            .field("client_id", &self.client_id)
            .field("client_secret", &self.client_secret.as_ref().map(|_| "<redacted>"))
            .field("default_location", &self.default_location)
            .finish()
    }
}

/// Settings as shown to users: the secret is reduced to a flag
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MaskedSettings {
    pub subscription_id: String,
    pub tenant_id: String,
    pub client_id: String,
    pub client_secret_set: bool,
    pub default_location: String,
}

impl AzureSettings {
    pub fn from_env_file(file: &EnvFile) -> Self {
        Self::from_lookup(|key| file.get(key))
    }

    /// Read only from the process environment
    pub fn from_process_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let read = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        Self {
            subscription_id: read("AZURE_SUBSCRIPTION_ID"),
            tenant_id: read("AZURE_TENANT_ID"),
            client_id: read("AZURE_CLIENT_ID"),
            client_secret: read("AZURE_CLIENT_SECRET"),
            default_location: read("AZURE_DEFAULT_LOCATION"),
        }
    }

    /// Fields set in `other` replace ours
    pub fn overlay(self, other: AzureSettings) -> Self {
        Self {
            subscription_id: other.subscription_id.or(self.subscription_id),
            tenant_id: other.tenant_id.or(self.tenant_id),
            client_id: other.client_id.or(self.client_id),
            client_secret: other.client_secret.or(self.client_secret),
            default_location: other.default_location.or(self.default_location),
        }
    }

    /// Tenant, client id and secret are all present
    pub fn has_service_principal(&self) -> bool {
        [&self.tenant_id, &self.client_id, &self.client_secret]
            .iter()
            .all(|v| v.as_deref().map_or(false, |s| !s.trim().is_empty()))
    }

    /// All fields needed to save service-principal settings are present
    pub fn validate_service_principal(&self) -> Result<()> {
        let required = [
            ("subscription_id", &self.subscription_id),
            ("tenant_id", &self.tenant_id),
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
        ];
        for (field, value) in required {
            if value.as_deref().map_or(true, |v| v.trim().is_empty()) {
                return Err(Error::missing_field(field));
            }
        }
        Ok(())
    }

    pub fn location(&self) -> &str {
        self.default_location.as_deref().unwrap_or(DEFAULT_LOCATION)
    }

    pub fn masked(&self) -> MaskedSettings {
        MaskedSettings {
            subscription_id: self.subscription_id.clone().unwrap_or_default(),
            tenant_id: self.tenant_id.clone().unwrap_or_default(),
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret_set: self.client_secret.as_deref().map_or(false, |s| !s.is_empty()),
            default_location: self.location().to_string(),
        }
    }

    /// Managed key/value pairs in file order
    pub fn managed_values(&self) -> [(&'static str, Option<&str>); 5] {
        [
            (MANAGED_KEYS[0], self.subscription_id.as_deref()),
            (MANAGED_KEYS[1], self.tenant_id.as_deref()),
            (MANAGED_KEYS[2], self.client_id.as_deref()),
            (MANAGED_KEYS[3], self.client_secret.as_deref()),
            (MANAGED_KEYS[4], self.default_location.as_deref()),
        ]
    }
}

// =============================================================================
// Settings Store
// =============================================================================

/// File-backed settings store
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
    use_process_env: bool,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            use_process_env: true,
        }
    }

    /// Ignore the process environment when loading
    pub fn without_process_env(mut self) -> Self {
        self.use_process_env = false;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_raw(&self) -> Result<Option<String>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Settings file {} not found, starting empty", self.path.display());
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Load settings: file values, overridden by the process environment
    pub async fn load(&self) -> Result<AzureSettings> {
        let raw = self.read_raw().await?.unwrap_or_default();
        let file = AzureSettings::from_env_file(&EnvFile::parse(&raw));
        if self.use_process_env {
            Ok(file.overlay(AzureSettings::from_process_env()))
        } else {
            Ok(file)
        }
    }

    /// Rewrite the file with `settings`, preserving unmanaged lines. A file
    /// that changes is first copied to `<name>.backup_<timestamp>`; the
    /// backup path is returned.
    pub async fn save(&self, settings: &AzureSettings) -> Result<Option<PathBuf>> {
        let existing = self.read_raw().await?;
        let rendered = EnvFile::parse(existing.as_deref().unwrap_or_default())
            .rewrite(&settings.managed_values())
            .render();

        if existing.as_deref() == Some(rendered.as_str()) {
            debug!("Settings in {} are unchanged", self.path.display());
            return Ok(None);
        }

        let backup = match existing {
            Some(_) => Some(self.backup().await?),
            None => None,
        };

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&self.path, rendered).await?;

        info!("Saved settings to {}", self.path.display());
        Ok(backup)
    }

    async fn backup(&self) -> Result<PathBuf> {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| ".env".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut backup = self.path.with_file_name(format!("{}.backup_{}", name, stamp));
        let mut n = 1;
        while tokio::fs::try_exists(&backup).await? {
            backup = self.path.with_file_name(format!("{}.backup_{}_{}", name, stamp, n));
            n += 1;
        }

        tokio::fs::copy(&self.path, &backup).await?;
        info!("Backed up {} to {}", self.path.display(), backup.display());
        Ok(backup)
    }
}
