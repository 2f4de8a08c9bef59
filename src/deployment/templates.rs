//! Resource templates
//!
//! Builders for the request bodies of every resource in a virtual-desktop
//! deployment. Each returns a [`ResourceDescriptor`] whose `desired` mapping
//! holds only the fields this tool owns, so provider-populated fields never
//! register as drift.

use crate::deployment::plan::{AvdDeployment, SessionHost};
use crate::domain::ports::{ResourceDescriptor, ResourceKey, ResourceKind};
use crate::domain::resource_id::ResourceId;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt;

// =============================================================================
// Security Rules
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Access {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// NSG rule as this tool writes and reads it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityRule {
    pub name: String,
    pub priority: u32,
    pub direction: Direction,
    pub access: Access,
    /// `Tcp`, `Udp`, `Icmp` or `*`
    pub protocol: String,
    pub source_address_prefix: String,
    pub source_port_range: String,
    pub destination_address_prefix: String,
    /// Single ports (`3389`), ranges (`3000-3400`) or `*`
    pub destination_port_ranges: Vec<String>,
    pub description: Option<String>,
}

impl SecurityRule {
    pub fn allow_inbound_tcp(name: &str, port: u16, priority: u32, description: &str) -> Self {
        Self {
            name: name.to_string(),
            priority,
            direction: Direction::Inbound,
            access: Access::Allow,
            protocol: "Tcp".to_string(),
            source_address_prefix: "*".to_string(),
            source_port_range: "*".to_string(),
            destination_address_prefix: "*".to_string(),
            destination_port_ranges: vec![port.to_string()],
            description: Some(description.to_string()),
        }
    }

    pub fn deny_all_inbound(priority: u32) -> Self {
        Self {
            name: "DenyAllInbound".to_string(),
            priority,
            direction: Direction::Inbound,
            access: Access::Deny,
            protocol: "*".to_string(),
            source_address_prefix: "*".to_string(),
            source_port_range: "*".to_string(),
            destination_address_prefix: "*".to_string(),
            destination_port_ranges: vec!["*".to_string()],
            description: Some("Deny all other inbound traffic".to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut properties = json!({
            "priority": self.priority,
            "direction": format!("{:?}", self.direction),
            "access": format!("{:?}", self.access),
            "protocol": self.protocol,
            "sourceAddressPrefix": self.source_address_prefix,
            "sourcePortRange": self.source_port_range,
            "destinationAddressPrefix": self.destination_address_prefix,
        });
        if let Value::Object(map) = &mut properties {
            match self.destination_port_ranges.as_slice() {
                [single] => map.insert("destinationPortRange".into(), json!(single)),
                many => map.insert("destinationPortRanges".into(), json!(many)),
            };
            if let Some(description) = &self.description {
                map.insert("description".into(), json!(description));
            }
        }
        json!({ "name": self.name, "properties": properties })
    }

    /// Parse a rule from a provider response; `None` when required fields
    /// are missing
    pub fn from_json(value: &Value) -> Option<Self> {
        let props = value.get("properties")?;
        let text = |key: &str| props.get(key).and_then(Value::as_str).map(str::to_string);

        let mut ports: Vec<String> = props
            .get("destinationPortRanges")
            .and_then(Value::as_array)
            .map(|ranges| ranges.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default();
        if let Some(single) = text("destinationPortRange").filter(|s| !s.is_empty()) {
            ports.push(single);
        }

        Some(Self {
            name: value.get("name").and_then(Value::as_str)?.to_string(),
            priority: props.get("priority").and_then(Value::as_u64)? as u32,
            direction: match text("direction")?.as_str() {
                d if d.eq_ignore_ascii_case("inbound") => Direction::Inbound,
                _ => Direction::Outbound,
            },
            access: match text("access")?.as_str() {
                a if a.eq_ignore_ascii_case("allow") => Access::Allow,
                _ => Access::Deny,
            },
            protocol: text("protocol").unwrap_or_else(|| "*".to_string()),
            source_address_prefix: text("sourceAddressPrefix").unwrap_or_else(|| "*".to_string()),
            source_port_range: text("sourcePortRange").unwrap_or_else(|| "*".to_string()),
            destination_address_prefix: text("destinationAddressPrefix").unwrap_or_else(|| "*".to_string()),
            destination_port_ranges: ports,
            description: text("description"),
        })
    }

    pub fn applies_to_tcp(&self) -> bool {
        self.protocol == "*" || self.protocol.eq_ignore_ascii_case("tcp")
    }

    /// Whether any destination range includes `port`
    pub fn covers_port(&self, port: u16) -> bool {
        self.destination_port_ranges
            .iter()
            .flat_map(|entry| entry.split(','))
            .any(|range| port_in_range(range.trim(), port))
    }
}

impl fmt::Display for SecurityRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}, {:?} {:?} {} {} -> {})",
            self.name,
            self.priority,
            self.direction,
            self.access,
            self.protocol,
            self.source_address_prefix,
            self.destination_port_ranges.join(",")
        )
    }
}

fn port_in_range(range: &str, port: u16) -> bool {
    if range == "*" {
        return true;
    }
    match range.split_once('-') {
        Some((low, high)) => match (low.trim().parse::<u16>(), high.trim().parse::<u16>()) {
            (Ok(low), Ok(high)) => (low..=high).contains(&port),
            _ => false,
        },
        None => range.parse::<u16>().map_or(false, |p| p == port),
    }
}

// =============================================================================
// Image Reference
// =============================================================================

/// Marketplace image for session hosts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageReference {
    pub publisher: String,
    pub offer: String,
    pub sku: String,
    pub version: String,
}

impl Default for ImageReference {
    fn default() -> Self {
        Self {
            publisher: "MicrosoftWindowsDesktop".to_string(),
            offer: "windows-11".to_string(),
            sku: "win11-22h2-pro".to_string(),
            version: "latest".to_string(),
        }
    }
}

// =============================================================================
// Builders
// =============================================================================

fn base(plan: &AvdDeployment, kind: ResourceKind, name: &str) -> ResourceDescriptor {
    let descriptor = ResourceDescriptor::new(kind, &plan.resource_group, name, &plan.location);
    if plan.tags.is_empty() {
        descriptor
    } else {
        descriptor.with_tags(plan.tags.clone())
    }
}

fn id_of(subscription_id: &str, plan: &AvdDeployment, kind: ResourceKind, name: &str) -> ResourceId {
    ResourceKey::new(kind, &plan.resource_group, name).resource_id(subscription_id)
}

pub fn resource_group(plan: &AvdDeployment) -> ResourceDescriptor {
    let descriptor = ResourceDescriptor::new(
        ResourceKind::ResourceGroup,
        &plan.resource_group,
        &plan.resource_group,
        &plan.location,
    );
    if plan.tags.is_empty() {
        descriptor
    } else {
        descriptor.with_tags(plan.tags.clone())
    }
}

pub fn virtual_network(plan: &AvdDeployment) -> ResourceDescriptor {
    base(plan, ResourceKind::VirtualNetwork, &plan.vnet_name).with_properties(json!({
        "addressSpace": { "addressPrefixes": [plan.vnet_address_prefix] },
        "subnets": [{
            "name": plan.subnet_name,
            "properties": { "addressPrefix": plan.subnet_address_prefix }
        }]
    }))
}

pub fn network_security_group(plan: &AvdDeployment) -> ResourceDescriptor {
    let rules: Vec<Value> = plan.security_rules().iter().map(SecurityRule::to_json).collect();
    base(plan, ResourceKind::NetworkSecurityGroup, &plan.nsg_name)
        .with_properties(json!({ "securityRules": rules }))
}

/// Host pool without `registrationInfo`; tokens are managed separately so
/// re-running a deployment does not rotate them
pub fn host_pool(plan: &AvdDeployment) -> ResourceDescriptor {
    base(plan, ResourceKind::HostPool, &plan.host_pool_name).with_properties(json!({
        "hostPoolType": "Pooled",
        "loadBalancerType": "BreadthFirst",
        "maxSessionLimit": plan.max_session_limit,
        "preferredAppGroupType": "Desktop",
        "friendlyName": plan.host_pool_name,
    }))
}

pub fn application_group(plan: &AvdDeployment, subscription_id: &str) -> ResourceDescriptor {
    let host_pool = id_of(subscription_id, plan, ResourceKind::HostPool, &plan.host_pool_name);
    base(plan, ResourceKind::ApplicationGroup, &plan.app_group_name).with_properties(json!({
        "hostPoolArmPath": host_pool.to_string(),
        "applicationGroupType": "Desktop",
        "friendlyName": "Desktop",
    }))
}

pub fn workspace(plan: &AvdDeployment, subscription_id: &str) -> ResourceDescriptor {
    let app_group = id_of(subscription_id, plan, ResourceKind::ApplicationGroup, &plan.app_group_name);
    base(plan, ResourceKind::Workspace, &plan.workspace_name).with_properties(json!({
        "applicationGroupReferences": [app_group.to_string()],
        "friendlyName": plan.workspace_name,
    }))
}

pub fn public_ip(plan: &AvdDeployment, host: &SessionHost) -> ResourceDescriptor {
    base(plan, ResourceKind::PublicIp, &host.public_ip_name)
        .with_sku(json!({ "name": "Standard" }))
        .with_properties(json!({
            "publicIPAllocationMethod": "Static",
            "publicIPAddressVersion": "IPv4",
        }))
}

pub fn network_interface(plan: &AvdDeployment, subscription_id: &str, host: &SessionHost) -> Result<ResourceDescriptor> {
    let subnet = id_of(subscription_id, plan, ResourceKind::VirtualNetwork, &plan.vnet_name)
        .child("subnets", &plan.subnet_name)?;
    let nsg = id_of(subscription_id, plan, ResourceKind::NetworkSecurityGroup, &plan.nsg_name);

    let mut ip_config = json!({
        "name": "ipconfig1",
        "properties": {
            "privateIPAllocationMethod": "Dynamic",
            "subnet": { "id": subnet.to_string() }
        }
    });
    if plan.public_ips {
        let pip = id_of(subscription_id, plan, ResourceKind::PublicIp, &host.public_ip_name);
        crate::domain::ports::merge_json(
            &mut ip_config,
            &json!({ "properties": { "publicIPAddress": { "id": pip.to_string() } } }),
        );
    }

    Ok(base(plan, ResourceKind::NetworkInterface, &host.nic_name).with_properties(json!({
        "ipConfigurations": [ip_config],
        "networkSecurityGroup": { "id": nsg.to_string() }
    })))
}

/// Session host VM; the admin password travels as a write-only field
pub fn virtual_machine(
    plan: &AvdDeployment,
    subscription_id: &str,
    host: &SessionHost,
    admin_password: &str,
) -> ResourceDescriptor {
    let nic = id_of(subscription_id, plan, ResourceKind::NetworkInterface, &host.nic_name);
    base(plan, ResourceKind::VirtualMachine, &host.vm_name)
        .with_properties(json!({
            "hardwareProfile": { "vmSize": plan.vm_size },
            "licenseType": "Windows_Client",
            "storageProfile": {
                "imageReference": {
                    "publisher": plan.image.publisher,
                    "offer": plan.image.offer,
                    "sku": plan.image.sku,
                    "version": plan.image.version,
                },
                "osDisk": {
                    "createOption": "FromImage",
                    "managedDisk": { "storageAccountType": plan.os_disk_type }
                }
            },
            "osProfile": {
                "computerName": host.computer_name,
                "adminUsername": plan.admin_username,
            },
            "networkProfile": {
                "networkInterfaces": [{ "id": nic.to_string() }]
            }
        }))
        .with_write_only(json!({
            "properties": { "osProfile": { "adminPassword": admin_password } }
        }))
}
