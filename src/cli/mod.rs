//! Command line interface
//!
//! Subcommand definitions (`clap` derive) and the context shared by their
//! handlers. Global flags live on the binary's `Args`.

pub mod commands;
pub mod output;

pub use commands::{run, Context};

use crate::provider::AuthMethod;
use clap::{Args, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Test authentication and print subscription details
    Auth,

    /// Overview of resource groups, VMs, storage accounts and web apps
    Dashboard,

    /// List resources of one kind
    #[command(subcommand)]
    List(ListCommand),

    /// Write connection settings to the settings file
    Setup(SetupArgs),

    /// Run the HTTP dashboard
    Serve {
        /// Bind address
        #[arg(long, env = "DASHBOARD_ADDR", default_value = "0.0.0.0:5000")]
        addr: SocketAddr,
    },

    /// Converge the full virtual-desktop stack
    Deploy(DeployArgs),

    /// Virtual machine operations
    #[command(subcommand)]
    Vm(VmCommand),

    /// Host pool operations
    #[command(subcommand)]
    Hostpool(HostPoolCommand),

    /// Diagnostics
    #[command(subcommand)]
    Check(CheckCommand),
}

#[derive(Subcommand, Debug)]
pub enum ListCommand {
    /// Virtual machines
    Vms {
        #[arg(long, short = 'g')]
        resource_group: Option<String>,
    },
    /// Storage accounts
    Storage {
        #[arg(long, short = 'g')]
        resource_group: Option<String>,
    },
    /// Web apps
    Webapps {
        #[arg(long, short = 'g')]
        resource_group: Option<String>,
    },
    /// Resource groups
    Resourcegroups,
}

#[derive(Args, Debug, Default)]
pub struct SetupArgs {
    /// Credential flow to configure; prompted when omitted
    #[arg(long = "method", value_enum)]
    pub method: Option<AuthMethod>,

    #[arg(long)]
    pub tenant_id: Option<String>,

    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub client_secret: Option<String>,

    #[arg(long)]
    pub default_location: Option<String>,

    /// Fail instead of prompting for missing values
    #[arg(long)]
    pub non_interactive: bool,
}

#[derive(Args, Debug, Default)]
pub struct DeployArgs {
    /// JSON deployment plan; flags below override its fields
    #[arg(long)]
    pub plan: Option<PathBuf>,

    #[arg(long, short = 'g')]
    pub resource_group: Option<String>,

    #[arg(long)]
    pub location: Option<String>,

    /// Number of session hosts
    #[arg(long)]
    pub session_hosts: Option<u32>,

    #[arg(long)]
    pub vm_size: Option<String>,

    #[arg(long)]
    pub admin_username: Option<String>,

    /// Also open 443 inbound on the NSG
    #[arg(long)]
    pub allow_https: bool,

    /// Do not create public IPs for session hosts
    #[arg(long)]
    pub no_public_ip: bool,

    /// Print the plan's stages without deploying
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Subcommand, Debug)]
pub enum VmCommand {
    /// Restart a virtual machine
    Restart {
        name: String,
        #[arg(long, short = 'g')]
        resource_group: String,
    },
    /// Run a script on a virtual machine
    Run {
        name: String,
        #[arg(long, short = 'g')]
        resource_group: String,
        #[arg(long)]
        script_file: PathBuf,
        /// Run with the shell instead of PowerShell
        #[arg(long)]
        shell: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum HostPoolCommand {
    /// Print a registration token, issuing a new one when needed
    Token {
        name: String,
        #[arg(long, short = 'g')]
        resource_group: String,
        /// Minimum remaining validity in days
        #[arg(long, default_value_t = 1)]
        days: u32,
    },
}

#[derive(Subcommand, Debug)]
pub enum CheckCommand {
    /// NIC, NSG, RDP rule and public IP report for a VM
    Network {
        vm: String,
        #[arg(long, short = 'g')]
        resource_group: String,
    },
}
