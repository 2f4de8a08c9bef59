//! In-memory cloud
//!
//! A simulated control plane backing `--simulate` and the test suites.
//! It follows the provider's observable behavior closely enough to exercise
//! the converger: operations complete after a configurable number of polls,
//! parent groups and referenced resources must exist, concurrent writes to
//! the same resource conflict, and created public IPs receive an address.

use crate::domain::ports::{
    Inventory, OperationHandle, OperationStatus, PollTarget, ProvisioningStatus, RegistrationToken,
    ResourceDescriptor, ResourceGroupInfo, ResourceGroupProperties, ResourceKey, ResourceKind,
    ResourceProvider, ResourceState, RunCommandOutput, ScriptKind, StorageAccountInfo,
    SubscriptionInfo, VirtualMachineInfo, VmOperations, WebAppInfo,
};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use crate::provider::tags_of;
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};
use uuid::Uuid;

// =============================================================================
// Configuration
// =============================================================================

/// Configuration for the in-memory cloud
#[derive(Debug, Clone)]
pub struct InMemoryConfig {
    pub subscription_id: String,
    pub subscription_name: String,
    /// Polls before a submitted operation reaches its terminal state;
    /// zero completes synchronously
    pub polls_to_complete: u32,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            subscription_id: "00000000-0000-0000-0000-000000000000".to_string(),
            subscription_name: "Simulated Subscription".to_string(),
            polls_to_complete: 1,
        }
    }
}

// =============================================================================
// Internal Records
// =============================================================================

#[derive(Debug, Clone)]
struct StoredResource {
    body: Value,
    status: ProvisioningStatus,
    power_state: String,
}

#[derive(Debug, Clone)]
struct PendingOperation {
    key: ResourceKey,
    remaining: u32,
    outcome: ProvisioningStatus,
    hang: bool,
}

// =============================================================================
// In-Memory Cloud
// =============================================================================

/// Simulated control plane
pub struct InMemoryCloud {
    config: InMemoryConfig,
    resources: RwLock<BTreeMap<ResourceKey, StoredResource>>,
    operations: RwLock<BTreeMap<String, PendingOperation>>,
    storage_accounts: RwLock<Vec<StorageAccountInfo>>,
    web_apps: RwLock<Vec<WebAppInfo>>,
    tokens: RwLock<BTreeMap<ResourceKey, RegistrationToken>>,
    failing: RwLock<BTreeSet<ResourceKey>>,
    hanging: RwLock<BTreeSet<ResourceKey>>,
    create_calls: AtomicU64,
    update_calls: AtomicU64,
    next_address: AtomicU64,
}

impl InMemoryCloud {
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            config,
            resources: RwLock::new(BTreeMap::new()),
            operations: RwLock::new(BTreeMap::new()),
            storage_accounts: RwLock::new(Vec::new()),
            web_apps: RwLock::new(Vec::new()),
            tokens: RwLock::new(BTreeMap::new()),
            failing: RwLock::new(BTreeSet::new()),
            hanging: RwLock::new(BTreeSet::new()),
            create_calls: AtomicU64::new(0),
            update_calls: AtomicU64::new(0),
            next_address: AtomicU64::new(4),
        }
    }

    /// Number of create requests accepted so far
    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Number of update requests accepted so far
    pub fn update_calls(&self) -> u64 {
        self.update_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ResourceKey) -> bool {
        self.resources.read().contains_key(key)
    }

    /// Keys of all stored resources, sorted
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.resources.read().keys().cloned().collect()
    }

    /// Make operations on `key` finish in the failed state
    pub fn fail_on(&self, key: &ResourceKey) {
        self.failing.write().insert(key.clone());
    }

    /// Make operations on `key` never finish
    pub fn hang_on(&self, key: &ResourceKey) {
        self.hanging.write().insert(key.clone());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
        self.hanging.write().clear();
    }

    pub fn seed_resource_group(&self, name: &str, location: &str) {
        let descriptor = ResourceDescriptor::new(ResourceKind::ResourceGroup, name, name, location);
        self.seed(&descriptor);
    }

    /// Store a resource as already provisioned
    pub fn seed(&self, descriptor: &ResourceDescriptor) {
        let key = descriptor.key();
        let mut body = json!({ "location": descriptor.location });
        crate::domain::ports::merge_json(&mut body, &descriptor.desired);
        self.resources.write().insert(
            key.clone(),
            StoredResource {
                body,
                status: ProvisioningStatus::Succeeded,
                power_state: "running".to_string(),
            },
        );
        self.finalize_side_effects(&key);
    }

    pub fn seed_storage_account(&self, account: StorageAccountInfo) {
        self.storage_accounts.write().push(account);
    }

    pub fn seed_web_app(&self, app: WebAppInfo) {
        self.web_apps.write().push(app);
    }

    fn state_of(&self, key: &ResourceKey, stored: &StoredResource) -> ResourceState {
        let mut observed = stored.body.clone();
        if let Value::Object(map) = &mut observed {
            map.insert("id".into(), json!(key.resource_id(&self.config.subscription_id).to_string()));
            map.insert("name".into(), json!(key.name));
            map.insert("type".into(), json!(resource_type(key.kind)));
            let properties = map.entry("properties").or_insert_with(|| json!({}));
            if let Value::Object(props) = properties {
                props.insert("provisioningState".into(), json!(arm_state(stored.status)));
            }
        }

        ResourceState {
            kind: key.kind,
            resource_group: key.resource_group.clone(),
            name: key.name.clone(),
            id: Some(key.resource_id(&self.config.subscription_id).to_string()),
            observed,
            status: stored.status,
        }
    }

    fn current(&self, key: &ResourceKey) -> Option<ResourceState> {
        self.resources.read().get(key).map(|stored| self.state_of(key, stored))
    }

    fn ensure_parent_group(&self, key: &ResourceKey) -> Result<()> {
        if key.kind == ResourceKind::ResourceGroup {
            return Ok(());
        }
        let group = ResourceKey::new(ResourceKind::ResourceGroup, &key.resource_group, &key.resource_group);
        if self.contains(&group) {
            Ok(())
        } else {
            Err(Error::ProviderRejected {
                status: 404,
                code: "ResourceGroupNotFound".into(),
                message: format!("Resource group '{}' could not be found.", key.resource_group),
            })
        }
    }

    fn ensure_references(&self, descriptor: &ResourceDescriptor) -> Result<()> {
        let mut ids = Vec::new();
        collect_resource_ids(&descriptor.desired, &mut ids);

        for raw in ids {
            let id: ResourceId = raw.parse().map_err(|_| Error::ProviderRejected {
                status: 400,
                code: "LinkedInvalidPropertyId".into(),
                message: format!("Property id '{}' is invalid.", raw),
            })?;
            // Child ids (subnets) resolve through their top-level parent
            let mut top = id;
            while top.segments().len() > 1 {
                match top.parent() {
                    Some(parent) => top = parent,
                    None => break,
                }
            }
            let Ok(key) = ResourceKey::from_id(&top) else {
                continue;
            };
            if !self.contains(&key) {
                return Err(Error::ProviderRejected {
                    status: 400,
                    code: "InvalidResourceReference".into(),
                    message: format!("Resource {} referenced by {} was not found.", raw, descriptor.key()),
                });
            }
        }
        Ok(())
    }

    fn finalize(&self, key: &ResourceKey, outcome: ProvisioningStatus) -> Option<ResourceState> {
        {
            let mut resources = self.resources.write();
            let stored = resources.get_mut(key)?;
            stored.status = outcome;
        }
        if outcome == ProvisioningStatus::Succeeded {
            self.finalize_side_effects(key);
        }
        self.current(key)
    }

    fn finalize_side_effects(&self, key: &ResourceKey) {
        let mut resources = self.resources.write();
        let Some(stored) = resources.get_mut(key) else {
            return;
        };
        match key.kind {
            ResourceKind::PublicIp => {
                let has_address = stored
                    .body
                    .pointer("/properties/ipAddress")
                    .and_then(Value::as_str)
                    .map_or(false, |a| !a.is_empty());
                if !has_address {
                    let n = self.next_address.fetch_add(1, Ordering::SeqCst);
                    let address = format!("20.{}.{}.{}", 60 + (n >> 16) % 100, (n >> 8) & 0xff, n & 0xff);
                    crate::domain::ports::merge_json(
                        &mut stored.body,
                        &json!({ "properties": { "ipAddress": address } }),
                    );
                }
            }
            ResourceKind::VirtualMachine => stored.power_state = "running".to_string(),
            _ => {}
        }
    }

    fn advance(&self, operation_id: &str) -> Result<OperationStatus> {
        let finished = {
            let mut operations = self.operations.write();
            let op = operations
                .get_mut(operation_id)
                .ok_or_else(|| Error::not_found("operation", operation_id))?;
            if op.hang {
                return Ok(OperationStatus::InProgress { retry_after: None });
            }
            op.remaining = op.remaining.saturating_sub(1);
            if op.remaining > 0 {
                return Ok(OperationStatus::InProgress { retry_after: None });
            }
            operations.remove(operation_id)
        };

        let op = finished.ok_or_else(|| Error::not_found("operation", operation_id))?;
        debug!("Operation {} on {} finished: {}", operation_id, op.key, op.outcome);
        self.finalize(&op.key, op.outcome)
            .map(OperationStatus::Completed)
            .ok_or_else(|| Error::not_found(op.key.kind.slug(), &op.key.name))
    }

    fn pending_for(&self, key: &ResourceKey) -> Option<String> {
        self.operations
            .read()
            .iter()
            .find(|(_, op)| &op.key == key)
            .map(|(id, _)| id.clone())
    }

    fn require_vm(&self, resource_group: &str, name: &str) -> Result<()> {
        let key = ResourceKey::new(ResourceKind::VirtualMachine, resource_group, name);
        match self.resources.read().get(&key) {
            Some(stored) if stored.status == ProvisioningStatus::Succeeded => Ok(()),
            _ => Err(Error::not_found("vm", name)),
        }
    }
}

#[async_trait]
impl ResourceProvider for InMemoryCloud {
    fn subscription_id(&self) -> &str {
        &self.config.subscription_id
    }

    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceState>> {
        Ok(self.current(key))
    }

    async fn begin_create_or_update(&self, descriptor: &ResourceDescriptor) -> Result<OperationHandle> {
        let key = descriptor.key();
        self.ensure_parent_group(&key)?;
        self.ensure_references(descriptor)?;

        if self.pending_for(&key).is_some() {
            return Err(Error::ProviderRejected {
                status: 409,
                code: "AnotherOperationInProgress".into(),
                message: format!("Another operation on {} is in progress.", key),
            });
        }

        let existing = self.resources.read().get(&key).map(|r| r.status);
        let in_flight = match existing {
            Some(ProvisioningStatus::Succeeded) => ProvisioningStatus::Updating,
            _ => ProvisioningStatus::Creating,
        };

        if key.kind == ResourceKind::VirtualMachine
            && in_flight == ProvisioningStatus::Creating
            && descriptor.body().pointer("/properties/osProfile/adminPassword").is_none()
        {
            return Err(Error::ProviderRejected {
                status: 400,
                code: "InvalidParameter".into(),
                message: "Required parameter 'adminPassword' is missing (null).".into(),
            });
        }

        match in_flight {
            ProvisioningStatus::Updating => self.update_calls.fetch_add(1, Ordering::SeqCst),
            _ => self.create_calls.fetch_add(1, Ordering::SeqCst),
        };
        info!("Simulated {} of {}", if in_flight == ProvisioningStatus::Updating { "update" } else { "create" }, key);

        {
            let mut body = json!({ "location": descriptor.location });
            crate::domain::ports::merge_json(&mut body, &descriptor.desired);
            let mut resources = self.resources.write();
            let previous = resources.get(&key).cloned();
            // Addresses survive updates
            if let Some(address) = previous
                .as_ref()
                .and_then(|p| p.body.pointer("/properties/ipAddress").cloned())
            {
                crate::domain::ports::merge_json(&mut body, &json!({ "properties": { "ipAddress": address } }));
            }
            resources.insert(
                key.clone(),
                StoredResource {
                    body,
                    status: in_flight,
                    power_state: previous.map(|p| p.power_state).unwrap_or_else(|| "starting".to_string()),
                },
            );
        }

        let outcome = if self.failing.read().contains(&key) {
            ProvisioningStatus::Failed
        } else {
            ProvisioningStatus::Succeeded
        };
        let hang = self.hanging.read().contains(&key);

        if self.config.polls_to_complete == 0 && !hang {
            let state = self
                .finalize(&key, outcome)
                .ok_or_else(|| Error::not_found(key.kind.slug(), &key.name))?;
            return Ok(OperationHandle {
                key,
                target: PollTarget::Completed(state),
                retry_after: None,
            });
        }

        let operation_id = Uuid::new_v4().to_string();
        self.operations.write().insert(
            operation_id.clone(),
            PendingOperation {
                key: key.clone(),
                remaining: self.config.polls_to_complete.max(1),
                outcome,
                hang,
            },
        );

        Ok(OperationHandle {
            key,
            target: PollTarget::AsyncOperation(operation_id),
            retry_after: None,
        })
    }

    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus> {
        match &handle.target {
            PollTarget::Completed(state) => Ok(OperationStatus::Completed(state.clone())),
            PollTarget::AsyncOperation(id) | PollTarget::Location(id) => self.advance(id),
            PollTarget::Resource => {
                if let Some(id) = self.pending_for(&handle.key) {
                    return self.advance(&id);
                }
                let state = self
                    .current(&handle.key)
                    .ok_or_else(|| Error::not_found(handle.key.kind.slug(), &handle.key.name))?;
                if state.status.is_in_flight() {
                    Ok(OperationStatus::InProgress { retry_after: None })
                } else {
                    Ok(OperationStatus::Completed(state))
                }
            }
        }
    }
}

#[async_trait]
impl Inventory for InMemoryCloud {
    async fn subscription_info(&self) -> Result<SubscriptionInfo> {
        Ok(SubscriptionInfo {
            id: self.config.subscription_id.clone(),
            name: self.config.subscription_name.clone(),
            state: "Enabled".to_string(),
        })
    }

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroupInfo>> {
        let resources = self.resources.read();
        Ok(resources
            .iter()
            .filter(|(key, _)| key.kind == ResourceKind::ResourceGroup)
            .map(|(key, stored)| ResourceGroupInfo {
                name: key.name.clone(),
                location: string_at(&stored.body, "/location"),
                tags: tags_of(&stored.body),
                properties: ResourceGroupProperties {
                    provisioning_state: arm_state(stored.status).to_string(),
                },
            })
            .collect())
    }

    async fn list_virtual_machines(&self, resource_group: Option<&str>) -> Result<Vec<VirtualMachineInfo>> {
        let resources = self.resources.read();
        Ok(resources
            .iter()
            .filter(|(key, _)| key.kind == ResourceKind::VirtualMachine && in_group(&key.resource_group, resource_group))
            .map(|(key, stored)| VirtualMachineInfo {
                name: key.name.clone(),
                resource_group: key.resource_group.clone(),
                location: string_at(&stored.body, "/location"),
                vm_size: string_at(&stored.body, "/properties/hardwareProfile/vmSize"),
                os_type: stored
                    .body
                    .pointer("/properties/storageProfile/osDisk/osType")
                    .and_then(Value::as_str)
                    .unwrap_or("Windows")
                    .to_string(),
                power_state: stored.power_state.clone(),
                tags: tags_of(&stored.body),
            })
            .collect())
    }

    async fn list_storage_accounts(&self, resource_group: Option<&str>) -> Result<Vec<StorageAccountInfo>> {
        Ok(self
            .storage_accounts
            .read()
            .iter()
            .filter(|a| in_group(&a.resource_group, resource_group))
            .cloned()
            .collect())
    }

    async fn list_web_apps(&self, resource_group: Option<&str>) -> Result<Vec<WebAppInfo>> {
        Ok(self
            .web_apps
            .read()
            .iter()
            .filter(|a| in_group(&a.resource_group, resource_group))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl VmOperations for InMemoryCloud {
    async fn restart_vm(&self, resource_group: &str, name: &str) -> Result<()> {
        self.require_vm(resource_group, name)?;
        let key = ResourceKey::new(ResourceKind::VirtualMachine, resource_group, name);
        if let Some(stored) = self.resources.write().get_mut(&key) {
            stored.power_state = "running".to_string();
        }
        info!("Simulated restart of {}", key);
        Ok(())
    }

    async fn run_command(
        &self,
        resource_group: &str,
        name: &str,
        kind: ScriptKind,
        script: &str,
    ) -> Result<RunCommandOutput> {
        self.require_vm(resource_group, name)?;
        Ok(RunCommandOutput {
            messages: vec![format!(
                "Enable succeeded: {} ran {} line(s) on {}",
                kind.command_id(),
                script.lines().count(),
                name
            )],
        })
    }

    async fn registration_token(
        &self,
        resource_group: &str,
        host_pool: &str,
        min_validity: chrono::Duration,
    ) -> Result<RegistrationToken> {
        let key = ResourceKey::new(ResourceKind::HostPool, resource_group, host_pool);
        if !self.contains(&key) {
            return Err(Error::not_found("host-pool", host_pool));
        }

        let now = Utc::now();
        let mut tokens = self.tokens.write();
        if let Some(token) = tokens.get(&key).filter(|t| t.is_valid_for(now, min_validity)) {
            return Ok(token.clone());
        }

        let token = RegistrationToken {
            token: format!("sim-{}", Uuid::new_v4()),
            expiration_time: Some(now + RegistrationToken::lifetime_for(min_validity)),
        };
        tokens.insert(key, token.clone());
        Ok(token)
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn arm_state(status: ProvisioningStatus) -> &'static str {
    match status {
        ProvisioningStatus::Absent => "NotFound",
        ProvisioningStatus::Creating => "Creating",
        ProvisioningStatus::Succeeded => "Succeeded",
        ProvisioningStatus::Failed => "Failed",
        ProvisioningStatus::Updating => "Updating",
        ProvisioningStatus::Deleting => "Deleting",
    }
}

fn resource_type(kind: ResourceKind) -> String {
    match kind.namespace() {
        Some(ns) => format!("{}/{}", ns, kind.type_segment()),
        None => "Microsoft.Resources/resourceGroups".to_string(),
    }
}

fn string_at(body: &Value, pointer: &str) -> String {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn in_group(actual: &str, filter: Option<&str>) -> bool {
    filter.map_or(true, |rg| rg.eq_ignore_ascii_case(actual))
}

fn collect_resource_ids(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) if s.get(..15).map_or(false, |p| p.eq_ignore_ascii_case("/subscriptions/")) => {
            out.push(s.clone())
        }
        Value::Array(items) => items.iter().for_each(|v| collect_resource_ids(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_resource_ids(v, out)),
        _ => {}
    }
}
