//! Terminal rendering for inventory listings and reports

use crate::deployment::{DeploymentReport, NetworkReport, NsgReport};
use crate::domain::ports::{
    ResourceGroupInfo, StorageAccountInfo, SubscriptionInfo, VirtualMachineInfo, WebAppInfo,
};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use tabled::{Table, Tabled};

/// Rows shown per section of the dashboard view
pub const PREVIEW_ROWS: usize = 10;

const TAG_WIDTH: usize = 50;

// =============================================================================
// Rows
// =============================================================================

#[derive(Tabled)]
pub struct ResourceGroupRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "LOCATION")]
    location: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "TAGS")]
    tags: String,
}

impl From<&ResourceGroupInfo> for ResourceGroupRow {
    fn from(rg: &ResourceGroupInfo) -> Self {
        Self {
            name: rg.name.clone(),
            location: rg.location.clone(),
            state: rg.properties.provisioning_state.clone(),
            tags: format_tags(&rg.tags),
        }
    }
}

#[derive(Tabled)]
pub struct VmRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RESOURCE GROUP")]
    resource_group: String,
    #[tabled(rename = "LOCATION")]
    location: String,
    #[tabled(rename = "SIZE")]
    size: String,
    #[tabled(rename = "OS")]
    os: String,
    #[tabled(rename = "POWER STATE")]
    power_state: String,
}

impl From<&VirtualMachineInfo> for VmRow {
    fn from(vm: &VirtualMachineInfo) -> Self {
        Self {
            name: vm.name.clone(),
            resource_group: vm.resource_group.clone(),
            location: vm.location.clone(),
            size: vm.vm_size.clone(),
            os: vm.os_type.clone(),
            power_state: vm.power_state.clone(),
        }
    }
}

#[derive(Tabled)]
pub struct StorageRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RESOURCE GROUP")]
    resource_group: String,
    #[tabled(rename = "LOCATION")]
    location: String,
    #[tabled(rename = "SKU")]
    sku: String,
    #[tabled(rename = "KIND")]
    kind: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

impl From<&StorageAccountInfo> for StorageRow {
    fn from(account: &StorageAccountInfo) -> Self {
        Self {
            name: account.name.clone(),
            resource_group: account.resource_group.clone(),
            location: account.location.clone(),
            sku: account.sku.clone(),
            kind: account.kind.clone(),
            status: account.status.clone(),
        }
    }
}

#[derive(Tabled)]
pub struct WebAppRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "RESOURCE GROUP")]
    resource_group: String,
    #[tabled(rename = "LOCATION")]
    location: String,
    #[tabled(rename = "STATE")]
    state: String,
    #[tabled(rename = "HOST")]
    host: String,
}

impl From<&WebAppInfo> for WebAppRow {
    fn from(app: &WebAppInfo) -> Self {
        Self {
            name: app.name.clone(),
            resource_group: app.resource_group.clone(),
            location: app.location.clone(),
            state: app.state.clone(),
            host: app
                .default_host_name
                .clone()
                .or_else(|| app.host_names.first().cloned())
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

#[derive(Tabled)]
struct DeployRow {
    #[tabled(rename = "STAGE")]
    stage: &'static str,
    #[tabled(rename = "RESOURCE")]
    resource: String,
    #[tabled(rename = "ACTION")]
    action: String,
    #[tabled(rename = "STATUS")]
    status: String,
}

#[derive(Tabled)]
struct RuleRow {
    #[tabled(rename = "PRIORITY")]
    priority: u32,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "DIRECTION")]
    direction: String,
    #[tabled(rename = "ACCESS")]
    access: String,
    #[tabled(rename = "PROTOCOL")]
    protocol: String,
    #[tabled(rename = "SOURCE")]
    source: String,
    #[tabled(rename = "PORTS")]
    ports: String,
}

// =============================================================================
// Formatting
// =============================================================================

/// First three tags as `k=v`, cut at 50 characters
pub fn format_tags(tags: &BTreeMap<String, String>) -> String {
    if tags.is_empty() {
        return "-".to_string();
    }
    let joined = tags
        .iter()
        .take(3)
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(", ");
    if joined.chars().count() > TAG_WIDTH {
        format!("{}...", joined.chars().take(TAG_WIDTH).collect::<String>())
    } else {
        joined
    }
}

/// Full table, or `empty` when there are no rows
pub fn table<'a, T, R>(items: &'a [T], empty: &str) -> String
where
    R: Tabled + From<&'a T>,
{
    if items.is_empty() {
        return empty.to_string();
    }
    Table::new(items.iter().map(R::from)).to_string()
}

/// Table of the first `limit` rows with a trailing "... and N more"
pub fn preview<'a, T, R>(items: &'a [T], limit: usize, empty: &str) -> String
where
    R: Tabled + From<&'a T>,
{
    if items.is_empty() {
        return empty.to_string();
    }
    let mut out = Table::new(items.iter().take(limit).map(R::from)).to_string();
    if items.len() > limit {
        let _ = write!(out, "\n... and {} more", items.len() - limit);
    }
    out
}

pub fn subscription(info: &SubscriptionInfo) -> String {
    format!("Subscription Details:\n  Name: {}\n  ID: {}\n  State: {}", info.name, info.id, info.state)
}

pub fn dashboard(
    subscription_info: &SubscriptionInfo,
    groups: &[ResourceGroupInfo],
    vms: &[VirtualMachineInfo],
    accounts: &[StorageAccountInfo],
    apps: &[WebAppInfo],
) -> String {
    let sections = [
        format!("Azure Dashboard: {} ({})", subscription_info.name, subscription_info.id),
        format!(
            "Resource Groups ({})\n{}",
            groups.len(),
            preview::<_, ResourceGroupRow>(groups, PREVIEW_ROWS, "No resource groups found.")
        ),
        format!(
            "Virtual Machines ({})\n{}",
            vms.len(),
            preview::<_, VmRow>(vms, PREVIEW_ROWS, "No virtual machines found.")
        ),
        format!(
            "Storage Accounts ({})\n{}",
            accounts.len(),
            preview::<_, StorageRow>(accounts, PREVIEW_ROWS, "No storage accounts found.")
        ),
        format!(
            "Web Apps ({})\n{}",
            apps.len(),
            preview::<_, WebAppRow>(apps, PREVIEW_ROWS, "No web apps found.")
        ),
    ];
    sections.join("\n\n")
}

pub fn deployment(report: &DeploymentReport) -> String {
    let rows = report.outcomes.iter().map(|o| DeployRow {
        stage: o.stage,
        resource: o.key.to_string(),
        action: o.action.map_or_else(|| "-".to_string(), |a| a.to_string()),
        status: match &o.error {
            Some(e) => format!("{} ({})", o.status, e),
            None => o.status.to_string(),
        },
    });
    let mut out = Table::new(rows).to_string();

    match report.failed_at {
        Some(stage) => {
            let _ = write!(out, "\n\nDeployment stopped at stage '{}'. Live resources:", stage);
            for key in report.live_resources() {
                let _ = write!(out, "\n  {}", key);
            }
        }
        None => {
            out.push_str("\n\nDeployment complete.");
            if let Some(expires) = report.registration_token_expires {
                let _ = write!(out, " Registration token valid until {}.", expires.to_rfc3339());
            }
        }
    }
    out
}

fn nsg_section(label: &str, nsg: Option<&NsgReport>) -> String {
    match nsg {
        None => format!("  {}: none", label),
        Some(nsg) => {
            let rows = nsg.rules.iter().map(|r| RuleRow {
                priority: r.priority,
                name: r.name.clone(),
                direction: format!("{:?}", r.direction),
                access: format!("{:?}", r.access),
                protocol: r.protocol.clone(),
                source: r.source.clone(),
                ports: r.ports.clone(),
            });
            let rdp = if nsg.rdp_allowed {
                format!("allowed from {}", nsg.rdp_sources.join(", "))
            } else {
                "blocked".to_string()
            };
            format!("  {}: {} (RDP {})\n{}", label, nsg.name, rdp, Table::new(rows))
        }
    }
}

pub fn network(report: &NetworkReport) -> String {
    let mut out = format!("Network configuration for {}/{}", report.resource_group, report.vm);
    if report.nics.is_empty() {
        out.push_str("\nNo network interfaces attached.");
    }
    for nic in &report.nics {
        let _ = write!(
            out,
            "\n\nNIC {}\n  Private IP: {}\n  Subnet: {}\n  Public IP: {}",
            nic.name,
            nic.private_ip.as_deref().unwrap_or("-"),
            nic.subnet.as_deref().unwrap_or("-"),
            match (&nic.public_ip_name, &nic.public_ip) {
                (Some(name), Some(ip)) => format!("{} ({})", ip, name),
                (Some(name), None) => format!("{} (no address assigned)", name),
                _ => "none".to_string(),
            }
        );
        let _ = write!(out, "\n{}", nsg_section("NIC NSG", nic.nic_nsg.as_ref()));
        let _ = write!(out, "\n{}", nsg_section("Subnet NSG", nic.subnet_nsg.as_ref()));
        if nic.rdp_allowed && nic.public_ip.is_none() {
            out.push_str("\n  RDP is allowed but the NIC has no public IP address");
        }
    }
    let _ = write!(
        out,
        "\n\nRDP (3389/tcp) inbound: {}",
        match (report.rdp_allowed, report.rdp_open_to_internet) {
            (true, true) => "allowed from the internet",
            (true, false) => "allowed from restricted sources",
            (false, _) => "BLOCKED",
        }
    );
    out
}
