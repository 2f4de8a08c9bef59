//! Domain Ports - Core trait definitions for avd-ops
//!
//! These traits define the boundaries between the convergence logic and the
//! cloud control plane. Adapters implement these traits to provide concrete
//! functionality (the ARM REST client, the in-memory simulator).

use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Resource Kinds
// =============================================================================

/// Kinds of resources the converger knows how to drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    #[serde(rename = "resource-group")]
    ResourceGroup,
    #[serde(rename = "virtual-network")]
    VirtualNetwork,
    #[serde(rename = "public-ip")]
    PublicIp,
    #[serde(rename = "nic")]
    NetworkInterface,
    #[serde(rename = "nsg")]
    NetworkSecurityGroup,
    #[serde(rename = "host-pool")]
    HostPool,
    #[serde(rename = "workspace")]
    Workspace,
    #[serde(rename = "application-group")]
    ApplicationGroup,
    #[serde(rename = "vm")]
    VirtualMachine,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::ResourceGroup,
        ResourceKind::VirtualNetwork,
        ResourceKind::PublicIp,
        ResourceKind::NetworkInterface,
        ResourceKind::NetworkSecurityGroup,
        ResourceKind::HostPool,
        ResourceKind::Workspace,
        ResourceKind::ApplicationGroup,
        ResourceKind::VirtualMachine,
    ];

    /// Short name used in logs and on the command line
    pub fn slug(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resource-group",
            ResourceKind::VirtualNetwork => "virtual-network",
            ResourceKind::PublicIp => "public-ip",
            ResourceKind::NetworkInterface => "nic",
            ResourceKind::NetworkSecurityGroup => "nsg",
            ResourceKind::HostPool => "host-pool",
            ResourceKind::Workspace => "workspace",
            ResourceKind::ApplicationGroup => "application-group",
            ResourceKind::VirtualMachine => "vm",
        }
    }

    /// Provider namespace; resource groups have none
    pub fn namespace(&self) -> Option<&'static str> {
        match self {
            ResourceKind::ResourceGroup => None,
            ResourceKind::VirtualNetwork
            | ResourceKind::PublicIp
            | ResourceKind::NetworkInterface
            | ResourceKind::NetworkSecurityGroup => Some("Microsoft.Network"),
            ResourceKind::HostPool | ResourceKind::Workspace | ResourceKind::ApplicationGroup => {
                Some("Microsoft.DesktopVirtualization")
            }
            ResourceKind::VirtualMachine => Some("Microsoft.Compute"),
        }
    }

    /// ARM type segment inside the namespace
    pub fn type_segment(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "resourceGroups",
            ResourceKind::VirtualNetwork => "virtualNetworks",
            ResourceKind::PublicIp => "publicIPAddresses",
            ResourceKind::NetworkInterface => "networkInterfaces",
            ResourceKind::NetworkSecurityGroup => "networkSecurityGroups",
            ResourceKind::HostPool => "hostPools",
            ResourceKind::Workspace => "workspaces",
            ResourceKind::ApplicationGroup => "applicationGroups",
            ResourceKind::VirtualMachine => "virtualMachines",
        }
    }

    /// ARM api-version used for this kind
    pub fn api_version(&self) -> &'static str {
        match self {
            ResourceKind::ResourceGroup => "2021-04-01",
            ResourceKind::VirtualNetwork
            | ResourceKind::PublicIp
            | ResourceKind::NetworkInterface
            | ResourceKind::NetworkSecurityGroup => "2023-09-01",
            ResourceKind::HostPool | ResourceKind::Workspace | ResourceKind::ApplicationGroup => {
                "2022-09-09"
            }
            ResourceKind::VirtualMachine => "2023-09-01",
        }
    }

    /// Resolve a kind from a namespace and type segment (case-insensitive)
    pub fn from_type(namespace: Option<&str>, type_segment: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| {
            let ns_matches = match (kind.namespace(), namespace) {
                (None, None) => true,
                (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
                _ => false,
            };
            ns_matches && kind.type_segment().eq_ignore_ascii_case(type_segment)
        })
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.slug())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.slug().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::Configuration(format!("unknown resource kind: {}", s)))
    }
}

// =============================================================================
// Resource Identity
// =============================================================================

/// Identity of a resource for convergence and locking
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub resource_group: String,
    pub name: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, resource_group: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            resource_group: resource_group.into(),
            name: name.into(),
        }
    }

    /// Full ARM identifier for this key
    pub fn resource_id(&self, subscription_id: &str) -> ResourceId {
        match self.kind.namespace() {
            None => ResourceId::resource_group(subscription_id, &self.name),
            Some(ns) => ResourceId::resource(
                subscription_id,
                &self.resource_group,
                ns,
                self.kind.type_segment(),
                &self.name,
            ),
        }
    }

    /// Derive a key from a parsed identifier
    pub fn from_id(id: &ResourceId) -> Result<Self> {
        let unsupported = || Error::InvalidResourceId {
            id: id.to_string(),
            reason: "unsupported resource type".into(),
        };

        let rg = id.resource_group_name().ok_or_else(unsupported)?;
        if id.segments().is_empty() {
            return Ok(Self::new(ResourceKind::ResourceGroup, rg, rg));
        }
        if id.segments().len() != 1 {
            return Err(unsupported());
        }
        let kind = ResourceKind::from_type(id.namespace(), id.type_segment().unwrap_or_default())
            .ok_or_else(unsupported)?;
        Ok(Self::new(kind, rg, id.name()))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.resource_group, self.name)
    }
}

// =============================================================================
// Descriptor / State
// =============================================================================

/// Properties sent on create/update but never returned by the provider
/// (admin passwords and the like). Excluded from drift detection and logs.
#[derive(Clone, Default, PartialEq)]
pub struct WriteOnly(Value);

impl WriteOnly {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        match &self.0 {
            Value::Null => true,
            Value::Object(map) => map.is_empty(),
            _ => false,
        }
    }
}

impl fmt::Debug for WriteOnly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            write!(f, "WriteOnly(<empty>)")
        } else {
            write!(f, "WriteOnly(<redacted>)")
        }
    }
}

/// Declarative description of a target resource
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub resource_group: String,
    pub location: String,
    /// Kind-specific mapping (`sku`, `properties`, `tags`) compared against
    /// the observed state
    pub desired: Value,
    #[serde(skip)]
    pub write_only: WriteOnly,
}

impl ResourceDescriptor {
    pub fn new(
        kind: ResourceKind,
        resource_group: impl Into<String>,
        name: impl Into<String>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            resource_group: resource_group.into(),
            location: location.into(),
            desired: json!({}),
            write_only: WriteOnly::default(),
        }
    }

    pub fn with_properties(self, properties: Value) -> Self {
        self.with_field("properties", properties)
    }

    pub fn with_sku(self, sku: Value) -> Self {
        self.with_field("sku", sku)
    }

    pub fn with_tags(self, tags: BTreeMap<String, String>) -> Self {
        self.with_field("tags", json!(tags))
    }

    pub fn with_write_only(mut self, value: Value) -> Self {
        self.write_only = WriteOnly::new(value);
        self
    }

    fn with_field(mut self, field: &str, value: Value) -> Self {
        if let Value::Object(map) = &mut self.desired {
            map.insert(field.to_string(), value);
        }
        self
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.resource_group, &self.name)
    }

    /// Request body: location, desired mapping and write-only fields merged
    pub fn body(&self) -> Value {
        let mut body = json!({ "location": self.location });
        merge_json(&mut body, &self.desired);
        merge_json(&mut body, self.write_only.value());
        body
    }
}

/// Deep-merge `patch` into `target`; objects merge key-wise, everything else
/// is replaced.
pub fn merge_json(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target_map), Value::Object(patch_map)) => {
            for (key, value) in patch_map {
                match target_map.get_mut(key) {
                    Some(existing) => merge_json(existing, value),
                    None => {
                        target_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (_, Value::Null) => {}
        (target, patch) => *target = patch.clone(),
    }
}

/// Provisioning status of a resource as reported by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProvisioningStatus {
    Absent,
    Creating,
    Succeeded,
    Failed,
    Updating,
    /// A delete is in progress; the resource disappears when it finishes
    Deleting,
}

impl ProvisioningStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProvisioningStatus::Succeeded | ProvisioningStatus::Failed)
    }

    pub fn is_in_flight(&self) -> bool {
        matches!(self, ProvisioningStatus::Creating | ProvisioningStatus::Updating)
    }

    /// Legal transitions: `absent -> creating -> {succeeded, failed}` and
    /// `succeeded -> updating -> {succeeded, failed}`.
    pub fn can_transition_to(&self, next: ProvisioningStatus) -> bool {
        use ProvisioningStatus::*;
        matches!(
            (self, next),
            (Absent, Creating)
                | (Creating, Succeeded)
                | (Creating, Failed)
                | (Succeeded, Updating)
                | (Updating, Succeeded)
                | (Updating, Failed)
        )
    }

    /// Map an ARM `provisioningState`. Resources that carry no state at all
    /// (resource groups on some api-versions, desktop virtualization objects)
    /// are treated as succeeded.
    pub fn from_arm(state: Option<&str>) -> Self {
        match state {
            None => ProvisioningStatus::Succeeded,
            Some(s) if s.eq_ignore_ascii_case("succeeded") => ProvisioningStatus::Succeeded,
            Some(s) if s.eq_ignore_ascii_case("failed") || s.eq_ignore_ascii_case("canceled") => {
                ProvisioningStatus::Failed
            }
            Some(s) if s.eq_ignore_ascii_case("updating") => ProvisioningStatus::Updating,
            Some(s) if s.eq_ignore_ascii_case("deleting") => ProvisioningStatus::Deleting,
            // Accepted, Creating, Provisioning, Running and friends
            Some(_) => ProvisioningStatus::Creating,
        }
    }
}

impl fmt::Display for ProvisioningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningStatus::Absent => "absent",
            ProvisioningStatus::Creating => "creating",
            ProvisioningStatus::Succeeded => "succeeded",
            ProvisioningStatus::Failed => "failed",
            ProvisioningStatus::Updating => "updating",
            ProvisioningStatus::Deleting => "deleting",
        };
        write!(f, "{}", s)
    }
}

/// Observed state of a resource, read from the provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub kind: ResourceKind,
    pub resource_group: String,
    pub name: String,
    /// Provider-assigned identifier, when known
    pub id: Option<String>,
    pub observed: Value,
    pub status: ProvisioningStatus,
}

impl ResourceState {
    pub fn absent(key: &ResourceKey) -> Self {
        Self {
            kind: key.kind,
            resource_group: key.resource_group.clone(),
            name: key.name.clone(),
            id: None,
            observed: Value::Null,
            status: ProvisioningStatus::Absent,
        }
    }

    /// Build a state from an ARM resource body
    pub fn from_arm(key: &ResourceKey, body: Value) -> Self {
        let status = ProvisioningStatus::from_arm(
            body.pointer("/properties/provisioningState").and_then(Value::as_str),
        );
        Self {
            kind: key.kind,
            resource_group: key.resource_group.clone(),
            name: key.name.clone(),
            id: body.get("id").and_then(Value::as_str).map(str::to_string),
            observed: body,
            status,
        }
    }

    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind, &self.resource_group, &self.name)
    }

    /// Convenience accessor into `observed`
    pub fn property(&self, pointer: &str) -> Option<&Value> {
        self.observed.pointer(pointer)
    }
}

// =============================================================================
// Long-running operations
// =============================================================================

/// Where to look for the outcome of a submitted operation
#[derive(Debug, Clone, PartialEq)]
pub enum PollTarget {
    /// The submit call already returned a terminal state
    Completed(ResourceState),
    /// Poll an operation-status URL (or simulator operation id)
    AsyncOperation(String),
    /// Poll a location URL until it stops answering 202
    Location(String),
    /// Re-read the resource until its provisioning state is terminal
    Resource,
}

/// In-progress handle returned by the provider for a create/update
#[derive(Debug, Clone, PartialEq)]
pub struct OperationHandle {
    pub key: ResourceKey,
    pub target: PollTarget,
    pub retry_after: Option<Duration>,
}

/// Result of polling an operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationStatus {
    InProgress { retry_after: Option<Duration> },
    Completed(ResourceState),
}

// =============================================================================
// Resource Provider Port
// =============================================================================

/// Port for resource lookup and create/update submission
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Subscription this provider operates in
    fn subscription_id(&self) -> &str;

    /// Fetch current state; `None` when the resource does not exist
    async fn get(&self, key: &ResourceKey) -> Result<Option<ResourceState>>;

    /// Submit a create-or-update request
    async fn begin_create_or_update(&self, descriptor: &ResourceDescriptor) -> Result<OperationHandle>;

    /// Poll a previously submitted operation
    async fn poll(&self, handle: &OperationHandle) -> Result<OperationStatus>;
}

// =============================================================================
// Inventory Port
// =============================================================================

/// Subscription summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriptionInfo {
    pub id: String,
    pub name: String,
    pub state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupProperties {
    pub provisioning_state: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceGroupInfo {
    pub name: String,
    pub location: String,
    pub tags: BTreeMap<String, String>,
    pub properties: ResourceGroupProperties,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineInfo {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub vm_size: String,
    pub os_type: String,
    pub power_state: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageAccountInfo {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub sku: String,
    pub kind: String,
    pub status: String,
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebAppInfo {
    pub name: String,
    pub resource_group: String,
    pub location: String,
    pub state: String,
    pub host_names: Vec<String>,
    pub default_host_name: Option<String>,
    pub tags: BTreeMap<String, String>,
}

/// Port for read-only listings shown by the dashboard and CLI
#[async_trait]
pub trait Inventory: Send + Sync {
    async fn subscription_info(&self) -> Result<SubscriptionInfo>;

    async fn list_resource_groups(&self) -> Result<Vec<ResourceGroupInfo>>;

    async fn list_virtual_machines(&self, resource_group: Option<&str>) -> Result<Vec<VirtualMachineInfo>>;

    async fn list_storage_accounts(&self, resource_group: Option<&str>) -> Result<Vec<StorageAccountInfo>>;

    async fn list_web_apps(&self, resource_group: Option<&str>) -> Result<Vec<WebAppInfo>>;
}

// =============================================================================
// VM Operations Port
// =============================================================================

/// Script interpreter for the run-command channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScriptKind {
    PowerShell,
    Shell,
}

impl ScriptKind {
    pub fn command_id(&self) -> &'static str {
        match self {
            ScriptKind::PowerShell => "RunPowerShellScript",
            ScriptKind::Shell => "RunShellScript",
        }
    }
}

/// Captured output of a remote script
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunCommandOutput {
    pub messages: Vec<String>,
}

/// Host pool registration token
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub token: String,
    pub expiration_time: Option<DateTime<Utc>>,
}

impl RegistrationToken {
    /// Host pools accept registration tokens valid for 1 hour up to 27 days
    pub const MAX_LIFETIME_DAYS: i64 = 27;

    /// True when the token is non-empty and stays valid for `min_validity`
    pub fn is_valid_for(&self, now: DateTime<Utc>, min_validity: chrono::Duration) -> bool {
        !self.token.is_empty()
            && self
                .expiration_time
                .map_or(false, |expires| expires - min_validity > now)
    }

    /// Lifetime to request when issuing a new token
    pub fn lifetime_for(min_validity: chrono::Duration) -> chrono::Duration {
        min_validity
            .max(chrono::Duration::days(1))
            .min(chrono::Duration::days(Self::MAX_LIFETIME_DAYS))
    }
}

impl fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("token", &"<redacted>")
            .field("expiration_time", &self.expiration_time)
            .finish()
    }
}

/// Port for imperative VM and host pool actions
#[async_trait]
pub trait VmOperations: Send + Sync {
    async fn restart_vm(&self, resource_group: &str, name: &str) -> Result<()>;

    async fn run_command(
        &self,
        resource_group: &str,
        name: &str,
        kind: ScriptKind,
        script: &str,
    ) -> Result<RunCommandOutput>;

    /// Retrieve the host pool registration token, issuing a fresh one when
    /// none is valid for at least `min_validity`
    async fn registration_token(
        &self,
        resource_group: &str,
        host_pool: &str,
        min_validity: chrono::Duration,
    ) -> Result<RegistrationToken>;
}

// =============================================================================
// Credential / Secret Ports
// =============================================================================

/// Bearer token with expiry
#[derive(Clone, PartialEq)]
pub struct AccessToken {
    pub token: String,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    /// Tokens are refreshed five minutes before they expire
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_on - chrono::Duration::minutes(5) > now
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Port for acquiring bearer tokens
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self, scope: &str) -> Result<AccessToken>;

    /// Human-readable name of the credential flow
    fn describe(&self) -> &'static str;
}

/// Port for resolving secrets (admin passwords) without literals in code
#[async_trait]
pub trait SecretSource: Send + Sync {
    async fn secret(&self, name: &str) -> Result<String>;
}

// =============================================================================
// Combined Provider
// =============================================================================

/// Everything an authenticated control-plane client offers
pub trait CloudProvider: ResourceProvider + Inventory + VmOperations {}

impl<T: ResourceProvider + Inventory + VmOperations> CloudProvider for T {}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type CloudProviderRef = Arc<dyn CloudProvider>;
pub type TokenSourceRef = Arc<dyn TokenSource>;
pub type SecretSourceRef = Arc<dyn SecretSource>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_kind_display_and_parse() {
        assert_eq!(format!("{}", ResourceKind::PublicIp), "public-ip");
        assert_eq!(format!("{}", ResourceKind::NetworkSecurityGroup), "nsg");
        for kind in ResourceKind::ALL {
            assert_eq!(kind.slug().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("load-balancer".parse::<ResourceKind>().is_err());
    }

    #[test]
    fn test_key_round_trips_through_resource_id() {
        let key = ResourceKey::new(ResourceKind::NetworkInterface, "avd-rg", "avd-host-01-nic");
        let id = key.resource_id("sub-1");
        assert_eq!(
            id.to_string(),
            "/subscriptions/sub-1/resourceGroups/avd-rg/providers/Microsoft.Network/networkInterfaces/avd-host-01-nic"
        );
        assert_eq!(ResourceKey::from_id(&id).unwrap(), key);

        let rg = ResourceKey::new(ResourceKind::ResourceGroup, "avd-rg", "avd-rg");
        assert_eq!(rg.resource_id("sub-1").to_string(), "/subscriptions/sub-1/resourceGroups/avd-rg");
        assert_eq!(ResourceKey::from_id(&rg.resource_id("sub-1")).unwrap(), rg);
    }

    #[test]
    fn test_status_transitions() {
        use ProvisioningStatus::*;
        assert!(Absent.can_transition_to(Creating));
        assert!(Creating.can_transition_to(Succeeded));
        assert!(Creating.can_transition_to(Failed));
        assert!(Succeeded.can_transition_to(Updating));
        assert!(Updating.can_transition_to(Failed));

        assert!(!Absent.can_transition_to(Succeeded));
        assert!(!Failed.can_transition_to(Updating));
        assert!(!Succeeded.can_transition_to(Creating));
        assert!(!Failed.can_transition_to(Creating));
    }

    #[test]
    fn test_status_from_arm() {
        assert_eq!(ProvisioningStatus::from_arm(Some("Succeeded")), ProvisioningStatus::Succeeded);
        assert_eq!(ProvisioningStatus::from_arm(Some("Canceled")), ProvisioningStatus::Failed);
        assert_eq!(ProvisioningStatus::from_arm(Some("Updating")), ProvisioningStatus::Updating);
        assert_eq!(ProvisioningStatus::from_arm(Some("Accepted")), ProvisioningStatus::Creating);
        assert_eq!(ProvisioningStatus::from_arm(Some("Deleting")), ProvisioningStatus::Deleting);
        assert!(!ProvisioningStatus::Deleting.is_in_flight());
        assert!(!ProvisioningStatus::Deleting.is_terminal());
        assert_eq!(ProvisioningStatus::from_arm(None), ProvisioningStatus::Succeeded);
    }

    #[test]
    fn test_descriptor_body_merges_write_only() {
        let descriptor = ResourceDescriptor::new(ResourceKind::VirtualMachine, "avd-rg", "vm-1", "eastus")
            .with_properties(json!({"osProfile": {"adminUsername": "avdadmin"}}))
            .with_write_only(json!({"properties": {"osProfile": {"adminPassword": "s3cret!"}}}));

        let body = descriptor.body();
        assert_eq!(body["location"], "eastus");
        assert_eq!(body["properties"]["osProfile"]["adminUsername"], "avdadmin");
        assert_eq!(body["properties"]["osProfile"]["adminPassword"], "s3cret!");

        let debug = format!("{:?}", descriptor);
        assert!(!debug.contains("s3cret!"));
        let serialized = serde_json::to_string(&descriptor).unwrap();
        assert!(!serialized.contains("s3cret!"));
    }

    #[test]
    fn test_registration_token_validity() {
        let now = Utc::now();
        let token = RegistrationToken {
            token: "eyJ0".into(),
            expiration_time: Some(now + chrono::Duration::hours(3)),
        };
        assert!(token.is_valid_for(now, chrono::Duration::hours(1)));
        assert!(!token.is_valid_for(now, chrono::Duration::hours(4)));

        let empty = RegistrationToken {
            token: String::new(),
            expiration_time: Some(now + chrono::Duration::days(2)),
        };
        assert!(!empty.is_valid_for(now, chrono::Duration::hours(1)));

        assert_eq!(RegistrationToken::lifetime_for(chrono::Duration::hours(2)), chrono::Duration::days(1));
        assert_eq!(RegistrationToken::lifetime_for(chrono::Duration::days(90)), chrono::Duration::days(27));
    }

    #[test]
    fn test_access_token_freshness() {
        let now = Utc::now();
        let token = AccessToken {
            token: "t".into(),
            expires_on: now + chrono::Duration::minutes(30),
        };
        assert!(token.is_fresh(now));
        assert!(!token.is_fresh(now + chrono::Duration::minutes(26)));
    }
}
