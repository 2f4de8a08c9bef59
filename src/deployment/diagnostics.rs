//! Network diagnostics for session hosts
//!
//! Walks VM → NIC → NSG (NIC-level and subnet-level) → public IP and decides
//! whether inbound RDP can reach the host, and from which source prefixes.

use crate::deployment::templates::{Access, Direction, SecurityRule};
use crate::domain::ports::{ResourceKey, ResourceKind, ResourceProvider, ResourceState};
use crate::domain::resource_id::ResourceId;
use crate::error::{Error, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

pub const RDP_PORT: u16 = 3389;

// =============================================================================
// Report Types
// =============================================================================

/// One NSG rule, flattened for display
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSummary {
    pub name: String,
    pub priority: u32,
    pub direction: Direction,
    pub access: Access,
    pub protocol: String,
    pub source: String,
    pub ports: String,
}

impl From<&SecurityRule> for RuleSummary {
    fn from(rule: &SecurityRule) -> Self {
        Self {
            name: rule.name.clone(),
            priority: rule.priority,
            direction: rule.direction,
            access: rule.access,
            protocol: rule.protocol.clone(),
            source: rule.source_address_prefix.clone(),
            ports: rule.destination_port_ranges.join(","),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NsgReport {
    pub name: String,
    pub resource_group: String,
    pub rules: Vec<RuleSummary>,
    pub rdp_allowed: bool,
    /// Source prefixes RDP is accepted from
    pub rdp_sources: Vec<String>,
}

impl NsgReport {
    pub fn rdp_open_to_internet(&self) -> bool {
        self.rdp_sources.iter().any(|s| is_internet(s))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NicReport {
    pub name: String,
    pub private_ip: Option<String>,
    pub subnet: Option<String>,
    pub public_ip_name: Option<String>,
    pub public_ip: Option<String>,
    pub nic_nsg: Option<NsgReport>,
    pub subnet_nsg: Option<NsgReport>,
    /// Both NSG layers let RDP through
    pub rdp_allowed: bool,
    /// Both NSG layers accept RDP from any internet address
    pub rdp_open_to_internet: bool,
}

impl NicReport {
    /// RDP allowed and there is an address to connect to
    pub fn reachable(&self) -> bool {
        self.rdp_allowed && self.public_ip.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkReport {
    pub vm: String,
    pub resource_group: String,
    pub nics: Vec<NicReport>,
    pub rdp_allowed: bool,
    pub rdp_open_to_internet: bool,
}

// =============================================================================
// Rule Evaluation
// =============================================================================

/// `*`, the `Internet` service tag and the all-addresses CIDR
pub fn is_internet(prefix: &str) -> bool {
    matches!(prefix.trim(), "*" | "0.0.0.0/0" | "::/0")
        || prefix.eq_ignore_ascii_case("internet")
        || prefix.eq_ignore_ascii_case("any")
}

/// Source prefixes from which inbound TCP traffic to `port` is allowed.
///
/// Rules are evaluated in priority order and, per source, the first match
/// decides. A deny from every address ends the walk; a narrower deny only
/// shadows later allows for the same prefix. With no matching allow the
/// platform default `DenyAllInBound` applies.
pub fn inbound_tcp_sources(rules: &[SecurityRule], port: u16) -> Vec<String> {
    let mut matching: Vec<&SecurityRule> = rules
        .iter()
        .filter(|r| r.direction == Direction::Inbound && r.applies_to_tcp() && r.covers_port(port))
        .collect();
    matching.sort_by_key(|r| r.priority);

    let mut denied: Vec<&str> = Vec::new();
    let mut allowed: Vec<String> = Vec::new();
    for rule in matching {
        let source = rule.source_address_prefix.trim();
        match rule.access {
            Access::Deny if is_internet(source) => break,
            Access::Deny => denied.push(source),
            Access::Allow => {
                let shadowed = denied.iter().any(|d| d.eq_ignore_ascii_case(source));
                if !shadowed && !allowed.iter().any(|a| a.eq_ignore_ascii_case(source)) {
                    allowed.push(source.to_string());
                }
            }
        }
    }
    allowed
}

/// Whether inbound TCP traffic to `port` is allowed from any source
pub fn allows_inbound_tcp(rules: &[SecurityRule], port: u16) -> bool {
    !inbound_tcp_sources(rules, port).is_empty()
}

pub fn rdp_allowed(rules: &[SecurityRule]) -> bool {
    allows_inbound_tcp(rules, RDP_PORT)
}

// =============================================================================
// Network Walk
// =============================================================================

async fn require<P: ResourceProvider + ?Sized>(provider: &P, key: &ResourceKey) -> Result<ResourceState> {
    provider
        .get(key)
        .await?
        .ok_or_else(|| Error::not_found(key.kind.slug(), &key.name))
}

fn id_at(body: &Value, pointer: &str) -> Option<Result<ResourceId>> {
    body.pointer(pointer).and_then(Value::as_str).map(str::parse)
}

fn string_at(body: &Value, pointer: &str) -> Option<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

async fn nsg_report<P: ResourceProvider + ?Sized>(provider: &P, id: &ResourceId) -> Result<NsgReport> {
    let key = ResourceKey::from_id(id)?;
    let state = require(provider, &key).await?;
    let rules: Vec<SecurityRule> = state
        .property("/properties/securityRules")
        .and_then(Value::as_array)
        .map(|rules| rules.iter().filter_map(SecurityRule::from_json).collect())
        .unwrap_or_default();

    let rdp_sources = inbound_tcp_sources(&rules, RDP_PORT);
    Ok(NsgReport {
        name: key.name,
        resource_group: key.resource_group,
        rdp_allowed: !rdp_sources.is_empty(),
        rdp_sources,
        rules: rules.iter().map(RuleSummary::from).collect(),
    })
}

/// NSG attached to the subnet, read through the parent virtual network
async fn subnet_nsg<P: ResourceProvider + ?Sized>(provider: &P, subnet: &ResourceId) -> Result<Option<ResourceId>> {
    let Some(vnet_id) = subnet.parent() else {
        return Ok(None);
    };
    let vnet = require(provider, &ResourceKey::from_id(&vnet_id)?).await?;
    let entry = vnet
        .property("/properties/subnets")
        .and_then(Value::as_array)
        .and_then(|subnets| {
            subnets
                .iter()
                .find(|s| s.get("name").and_then(Value::as_str) == Some(subnet.name()))
        });
    match entry.and_then(|s| id_at(s, "/properties/networkSecurityGroup/id")) {
        Some(id) => id.map(Some),
        None => Ok(None),
    }
}

async fn nic_report<P: ResourceProvider + ?Sized>(provider: &P, id: &ResourceId) -> Result<NicReport> {
    let key = ResourceKey::from_id(id)?;
    let nic = require(provider, &key).await?;
    let ip_config = nic
        .property("/properties/ipConfigurations/0")
        .cloned()
        .unwrap_or(Value::Null);

    let nic_nsg = match id_at(&nic.observed, "/properties/networkSecurityGroup/id") {
        Some(id) => Some(nsg_report(provider, &id?).await?),
        None => None,
    };

    let subnet_id = id_at(&ip_config, "/properties/subnet/id").transpose()?;
    let subnet_nsg = match &subnet_id {
        Some(subnet) => match subnet_nsg(provider, subnet).await? {
            Some(id) => Some(nsg_report(provider, &id).await?),
            None => None,
        },
        None => None,
    };

    let (public_ip_name, public_ip) = match id_at(&ip_config, "/properties/publicIPAddress/id") {
        Some(id) => {
            let pip = require(provider, &ResourceKey::from_id(&id?)?).await?;
            (Some(pip.name.clone()), string_at(&pip.observed, "/properties/ipAddress"))
        }
        None => (None, None),
    };

    // A layer without an NSG lets everything through
    let rdp_allowed = nic_nsg.as_ref().map_or(true, |n| n.rdp_allowed)
        && subnet_nsg.as_ref().map_or(true, |n| n.rdp_allowed);
    let rdp_open_to_internet = nic_nsg.as_ref().map_or(true, NsgReport::rdp_open_to_internet)
        && subnet_nsg.as_ref().map_or(true, NsgReport::rdp_open_to_internet);

    Ok(NicReport {
        name: key.name,
        private_ip: string_at(&ip_config, "/properties/privateIPAddress"),
        subnet: subnet_id.map(|s| s.name().to_string()),
        public_ip_name,
        public_ip,
        nic_nsg,
        subnet_nsg,
        rdp_allowed,
        rdp_open_to_internet,
    })
}

/// Report NICs, NSG rules and RDP reachability for a VM
pub async fn check_network<P: ResourceProvider + ?Sized>(
    provider: &P,
    resource_group: &str,
    vm: &str,
) -> Result<NetworkReport> {
    let key = ResourceKey::new(ResourceKind::VirtualMachine, resource_group, vm);
    let state = require(provider, &key).await?;

    let nic_ids: Vec<ResourceId> = state
        .property("/properties/networkProfile/networkInterfaces")
        .and_then(Value::as_array)
        .map(|nics| {
            nics.iter()
                .filter_map(|n| n.get("id").and_then(Value::as_str))
                .map(str::parse)
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?
        .unwrap_or_default();

    let mut nics = Vec::with_capacity(nic_ids.len());
    for id in &nic_ids {
        debug!("Inspecting network interface {}", id);
        nics.push(nic_report(provider, id).await?);
    }

    Ok(NetworkReport {
        vm: vm.to_string(),
        resource_group: resource_group.to_string(),
        rdp_allowed: nics.iter().any(|n| n.rdp_allowed),
        rdp_open_to_internet: nics.iter().any(|n| n.rdp_open_to_internet),
        nics,
    })
}
