//! Deployment plan and executor
//!
//! An [`AvdDeployment`] expands into ordered stages of resource descriptors.
//! Resources within a stage converge in parallel; a stage starts only after
//! every resource of the previous stage reached `succeeded`. Nothing is rolled
//! back on failure: the report names the failing stage and everything left
//! live from earlier stages.

use crate::convergence::{ConvergeAction, ConvergeConfig, Converger};
use crate::deployment::templates::{self, ImageReference, SecurityRule};
use crate::domain::ports::{
    CloudProvider, ProvisioningStatus, ResourceDescriptor, ResourceKey, ResourceProvider, SecretSourceRef,
    VmOperations,
};
use crate::error::{Error, Result};
use crate::settings::DEFAULT_LOCATION;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Maximum length of a Windows computer name
const MAX_COMPUTER_NAME: usize = 15;

// =============================================================================
// Plan
// =============================================================================

/// Full virtual-desktop deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AvdDeployment {
    pub location: String,
    pub resource_group: String,
    pub vnet_name: String,
    pub vnet_address_prefix: String,
    pub subnet_name: String,
    pub subnet_address_prefix: String,
    pub nsg_name: String,
    /// Also open 443 inbound
    pub allow_https: bool,
    pub host_pool_name: String,
    pub max_session_limit: u32,
    /// Days the host pool registration token must stay valid
    pub registration_token_days: u32,
    pub workspace_name: String,
    pub app_group_name: String,
    pub session_hosts: u32,
    /// Session host names are `{prefix}-NN`
    pub host_prefix: String,
    pub vm_size: String,
    pub os_disk_type: String,
    pub image: ImageReference,
    pub admin_username: String,
    /// Name of the secret holding the admin password
    pub admin_password_secret: String,
    /// One static Standard public IP per session host
    pub public_ips: bool,
    pub tags: BTreeMap<String, String>,
}

impl Default for AvdDeployment {
    fn default() -> Self {
        Self {
            location: DEFAULT_LOCATION.to_string(),
            resource_group: "avd-rg".to_string(),
            vnet_name: "avd-vnet".to_string(),
            vnet_address_prefix: "10.0.0.0/16".to_string(),
            subnet_name: "avd-subnet".to_string(),
            subnet_address_prefix: "10.0.1.0/24".to_string(),
            nsg_name: "avd-nsg".to_string(),
            allow_https: false,
            host_pool_name: "avd-host-pool".to_string(),
            max_session_limit: 10,
            registration_token_days: 1,
            workspace_name: "avd-workspace".to_string(),
            app_group_name: "avd-app-group".to_string(),
            session_hosts: 2,
            host_prefix: "avd-host".to_string(),
            vm_size: "Standard_B2s".to_string(),
            os_disk_type: "Standard_LRS".to_string(),
            image: ImageReference::default(),
            admin_username: "avdadmin".to_string(),
            admin_password_secret: "AVD_ADMIN_PASSWORD".to_string(),
            public_ips: true,
            tags: BTreeMap::new(),
        }
    }
}

/// Names derived for one session host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionHost {
    pub vm_name: String,
    pub computer_name: String,
    pub nic_name: String,
    pub public_ip_name: String,
}

/// One group of resources that converge together
#[derive(Debug, Clone)]
pub struct Stage {
    pub name: &'static str,
    pub resources: Vec<ResourceDescriptor>,
}

impl AvdDeployment {
    /// Names for the 1-based session host `index`
    pub fn session_host(&self, index: u32) -> SessionHost {
        let vm_name = format!("{}-{:02}", self.host_prefix, index);
        SessionHost {
            computer_name: format!("{}{:02}", self.host_prefix.replace('-', ""), index),
            nic_name: format!("{}-nic", vm_name),
            public_ip_name: format!("{}-pip", vm_name),
            vm_name,
        }
    }

    pub fn session_host_names(&self) -> Vec<SessionHost> {
        (1..=self.session_hosts).map(|i| self.session_host(i)).collect()
    }

    pub fn security_rules(&self) -> Vec<SecurityRule> {
        let mut rules = vec![SecurityRule::allow_inbound_tcp("AllowRDP", 3389, 1000, "Allow RDP access")];
        if self.allow_https {
            rules.push(SecurityRule::allow_inbound_tcp("AllowHTTPS", 443, 1001, "Allow HTTPS access"));
        }
        rules
    }

    /// Reject plans the provider would refuse late in the run
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("location", &self.location),
            ("resource_group", &self.resource_group),
            ("vnet_name", &self.vnet_name),
            ("subnet_name", &self.subnet_name),
            ("nsg_name", &self.nsg_name),
            ("host_pool_name", &self.host_pool_name),
            ("workspace_name", &self.workspace_name),
            ("app_group_name", &self.app_group_name),
            ("admin_username", &self.admin_username),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(Error::missing_field(field));
            }
        }
        if self.session_hosts > 99 {
            return Err(Error::Configuration(format!(
                "at most 99 session hosts are supported, got {}",
                self.session_hosts
            )));
        }
        if self.max_session_limit == 0 {
            return Err(Error::Configuration("max_session_limit must be at least 1".into()));
        }
        if let Some(host) = self.session_host_names().last() {
            if host.computer_name.len() > MAX_COMPUTER_NAME {
                return Err(Error::Configuration(format!(
                    "computer name {} exceeds {} characters; shorten host_prefix",
                    host.computer_name, MAX_COMPUTER_NAME
                )));
            }
        }
        Ok(())
    }

    /// Expand into ordered stages
    pub fn stages(&self, subscription_id: &str, admin_password: &str) -> Result<Vec<Stage>> {
        let hosts = self.session_host_names();

        let mut network = vec![templates::virtual_network(self), templates::network_security_group(self)];
        network.sort_by(|a, b| a.name.cmp(&b.name));

        let mut pool = vec![templates::host_pool(self)];
        if self.public_ips {
            pool.extend(hosts.iter().map(|h| templates::public_ip(self, h)));
        }

        let mut attachments = vec![templates::application_group(self, subscription_id)];
        for host in &hosts {
            attachments.push(templates::network_interface(self, subscription_id, host)?);
        }

        let mut desktops = vec![templates::workspace(self, subscription_id)];
        desktops.extend(
            hosts
                .iter()
                .map(|h| templates::virtual_machine(self, subscription_id, h, admin_password)),
        );

        Ok(vec![
            Stage { name: "resource-group", resources: vec![templates::resource_group(self)] },
            Stage { name: "network", resources: network },
            Stage { name: "host-pool", resources: pool },
            Stage { name: "attachments", resources: attachments },
            Stage { name: "desktops", resources: desktops },
        ])
    }
}

// =============================================================================
// Report
// =============================================================================

/// Result for one resource of the plan
#[derive(Debug, Clone, Serialize)]
pub struct ResourceReport {
    pub stage: &'static str,
    pub key: ResourceKey,
    pub action: Option<ConvergeAction>,
    pub status: ProvisioningStatus,
    pub error: Option<String>,
}

impl ResourceReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none() && self.status == ProvisioningStatus::Succeeded
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DeploymentReport {
    pub outcomes: Vec<ResourceReport>,
    /// Stage that stopped the run
    pub failed_at: Option<&'static str>,
    pub registration_token_expires: Option<DateTime<Utc>>,
}

impl DeploymentReport {
    pub fn succeeded(&self) -> bool {
        self.failed_at.is_none()
    }

    /// Resources that exist after the run, failed stage included
    pub fn live_resources(&self) -> Vec<&ResourceKey> {
        self.outcomes
            .iter()
            .filter(|o| o.status != ProvisioningStatus::Absent)
            .map(|o| &o.key)
            .collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &ResourceReport> {
        self.outcomes.iter().filter(|o| !o.succeeded())
    }
}

// =============================================================================
// Deployer
// =============================================================================

/// Drives a plan through the converger
pub struct Deployer<P: CloudProvider + ?Sized> {
    converger: Converger<P>,
    secrets: SecretSourceRef,
}

impl<P: CloudProvider + ?Sized> Deployer<P> {
    pub fn new(provider: Arc<P>, secrets: SecretSourceRef, config: ConvergeConfig) -> Self {
        Self {
            converger: Converger::new(provider, config),
            secrets,
        }
    }

    /// Converge the plan stage by stage. Plan and secret errors fail before
    /// any request is sent; resource failures end the run with a report.
    pub async fn deploy(&self, plan: &AvdDeployment) -> Result<DeploymentReport> {
        plan.validate()?;
        let password = if plan.session_hosts > 0 {
            self.secrets.secret(&plan.admin_password_secret).await?
        } else {
            String::new()
        };

        let provider = self.converger.provider();
        let stages = plan.stages(provider.subscription_id(), &password)?;
        let mut report = DeploymentReport::default();

        for stage in &stages {
            info!("Stage {}: converging {} resource(s)", stage.name, stage.resources.len());
            let results = self.converger.converge_all(&stage.resources).await;

            let mut stage_failed = false;
            for (descriptor, result) in stage.resources.iter().zip(results) {
                let key = descriptor.key();
                let entry = match result {
                    Ok(outcome) => {
                        info!("{} {} ({})", outcome.action, key, outcome.state.status);
                        ResourceReport {
                            stage: stage.name,
                            key,
                            action: Some(outcome.action),
                            status: outcome.state.status,
                            error: None,
                        }
                    }
                    Err(e) => {
                        warn!("{} failed: {}", key, e);
                        // Whatever the provider holds now is what is live
                        let status = match provider.get(&key).await {
                            Ok(Some(state)) => state.status,
                            _ => ProvisioningStatus::Absent,
                        };
                        ResourceReport {
                            stage: stage.name,
                            key,
                            action: None,
                            status,
                            error: Some(e.to_string()),
                        }
                    }
                };
                stage_failed |= !entry.succeeded();
                report.outcomes.push(entry);
            }

            if stage_failed {
                report.failed_at = Some(stage.name);
                warn!(
                    "Deployment stopped at stage {}; {} resource(s) remain live",
                    stage.name,
                    report.live_resources().len()
                );
                return Ok(report);
            }
        }

        let min_validity = chrono::Duration::days(i64::from(plan.registration_token_days.max(1)));
        let token = provider
            .registration_token(&plan.resource_group, &plan.host_pool_name, min_validity)
            .await?;
        report.registration_token_expires = token.expiration_time;

        info!("Deployment of {} complete", plan.resource_group);
        Ok(report)
    }
}
