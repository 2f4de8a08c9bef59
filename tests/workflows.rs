//! End-to-end workflows against the in-memory cloud

use async_trait::async_trait;
use avd_ops::convergence::{ConvergeAction, ConvergeConfig, Converger};
use avd_ops::deployment::{check_network, AvdDeployment, Deployer};
use avd_ops::domain::ports::{
    Inventory, ResourceDescriptor, ResourceKind, ScriptKind, SecretSource, VmOperations,
};
use avd_ops::provider::{Connector, InMemoryCloud, InMemoryConfig, SimulatedConnector};
use avd_ops::settings::{AzureSettings, SettingsStore};
use avd_ops::{Error, Result};
use assert_matches::assert_matches;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

struct Password;

#[async_trait]
impl SecretSource for Password {
    async fn secret(&self, _name: &str) -> Result<String> {
        Ok("Sup3r-Secret!".to_string())
    }
}

fn fast() -> ConvergeConfig {
    ConvergeConfig {
        poll_interval: Duration::from_millis(1),
        timeout: Duration::from_secs(5),
    }
}

fn single_host() -> AvdDeployment {
    AvdDeployment {
        resource_group: "rg-e2e".into(),
        session_hosts: 1,
        ..Default::default()
    }
}

// =============================================================================
// Deploy, inspect, operate
// =============================================================================

#[tokio::test]
async fn test_simulated_deploy_then_operate() {
    let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));
    let connector = SimulatedConnector::new(cloud.clone());
    let settings = AzureSettings {
        subscription_id: Some(InMemoryConfig::default().subscription_id),
        ..Default::default()
    };
    let connection = connector.connect(&settings).await.unwrap();
    assert_eq!(connection.auth, "simulated");

    let deployer = Deployer::new(connection.provider.clone(), Arc::new(Password), fast());
    let plan = single_host();

    let report = deployer.deploy(&plan).await.unwrap();
    assert!(report.succeeded());
    assert_eq!(report.outcomes.len(), 9);
    assert!(report.outcomes.iter().all(|o| o.action == Some(ConvergeAction::Created)));
    assert!(report.registration_token_expires.is_some());

    let vms = connection.provider.list_virtual_machines(Some("rg-e2e")).await.unwrap();
    let names: Vec<&str> = vms.iter().map(|vm| vm.name.as_str()).collect();
    assert_eq!(names, vec!["avd-host-01"]);

    let network = check_network(connection.provider.as_ref(), "rg-e2e", "avd-host-01")
        .await
        .unwrap();
    assert_eq!(network.nics.len(), 1);
    assert!(network.rdp_allowed);

    connection.provider.restart_vm("rg-e2e", "avd-host-01").await.unwrap();
    let output = connection
        .provider
        .run_command("rg-e2e", "avd-host-01", ScriptKind::PowerShell, "Get-Service\nhostname")
        .await
        .unwrap();
    assert_eq!(output.messages.len(), 1);

    // A second run finds nothing to change
    let creates = cloud.create_calls();
    let again = deployer.deploy(&plan).await.unwrap();
    assert!(again.outcomes.iter().all(|o| o.action == Some(ConvergeAction::Unchanged)));
    assert_eq!(cloud.create_calls(), creates);
    assert_eq!(cloud.update_calls(), 0);
}

#[tokio::test]
async fn test_operations_on_unknown_vm_fail() {
    let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));

    assert_matches!(
        cloud.restart_vm("rg-none", "ghost").await,
        Err(Error::NotFound { .. })
    );
    assert_matches!(
        check_network(cloud.as_ref(), "rg-none", "ghost").await,
        Err(Error::NotFound { .. })
    );
}

#[tokio::test]
async fn test_connect_requires_subscription() {
    let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));
    let connector = SimulatedConnector::new(cloud);

    let result = connector.connect(&AzureSettings::default()).await;
    assert_matches!(result, Err(Error::AuthenticationFailure(_)));
}

// =============================================================================
// Convergence
// =============================================================================

#[tokio::test]
async fn test_converged_resources_need_no_updates() {
    let cloud = Arc::new(InMemoryCloud::new(InMemoryConfig::default()));
    cloud.seed_resource_group("rg-conv", "westeurope");
    let converger = Converger::new(cloud.clone(), fast());

    let descriptors: Vec<ResourceDescriptor> = (1..=4)
        .map(|i| {
            ResourceDescriptor::new(ResourceKind::PublicIp, "rg-conv", format!("pip-{}", i), "westeurope")
                .with_sku(json!({ "name": "Standard" }))
                .with_properties(json!({ "publicIPAllocationMethod": "Static", "publicIPAddressVersion": "IPv4" }))
        })
        .collect();

    let first = converger.converge_all(&descriptors).await;
    assert!(first.iter().all(|r| r.as_ref().map_or(false, |o| o.action == ConvergeAction::Created)));

    for _ in 0..3 {
        let rerun = converger.converge_all(&descriptors).await;
        assert!(rerun.iter().all(|r| r.as_ref().map_or(false, |o| o.action == ConvergeAction::Unchanged)));
    }
    assert_eq!(cloud.create_calls(), 4);
    assert_eq!(cloud.update_calls(), 0);
}

// =============================================================================
// Settings file
// =============================================================================

#[tokio::test]
async fn test_settings_save_preserves_foreign_lines_and_is_stable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".env");
    tokio::fs::write(&path, "# local settings\nDATABASE_URL=postgres://db\n\nAZURE_TENANT_ID=old-tenant\nFEATURE_X=1\n")
        .await
        .unwrap();

    let store = SettingsStore::new(&path).without_process_env();
    let settings = AzureSettings {
        subscription_id: Some("sub-1".into()),
        tenant_id: Some("tenant-1".into()),
        client_id: Some("client-1".into()),
        client_secret: Some("s3cret value".into()),
        default_location: Some("westeurope".into()),
    };

    store.save(&settings).await.unwrap();
    let first = tokio::fs::read_to_string(&path).await.unwrap();
    store.save(&settings).await.unwrap();
    let second = tokio::fs::read_to_string(&path).await.unwrap();

    assert_eq!(first, second);
    assert!(first.starts_with("# local settings\nDATABASE_URL=postgres://db\n\nFEATURE_X=1\n"));
    assert!(!first.contains("old-tenant"));
    assert_eq!(first.matches("AZURE_TENANT_ID=").count(), 1);

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded, settings);
}

#[tokio::test]
async fn test_settings_missing_file_loads_empty() {
    let dir = tempfile::tempdir().unwrap();
    let store = SettingsStore::new(dir.path().join("absent.env")).without_process_env();

    let loaded = store.load().await.unwrap();
    assert_eq!(loaded, AzureSettings::default());
    assert_eq!(loaded.location(), "eastus");
}
