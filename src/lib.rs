//! avd-ops - Azure Virtual Desktop Operations
//!
//! Convergent provisioning, inspection and repair for Azure Virtual Desktop
//! deployments over the Azure Resource Manager REST API.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                 Command Line            HTTP Dashboard               │
//! │                 (clap, tabled)          (axum)                       │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │   Deployment Plan (staged)        Network Diagnostics               │
//! │              │                                                       │
//! │   ┌──────────┴──────────┐                                            │
//! │   │      Converger      │  per-resource locks, drift detection,      │
//! │   │                     │  long-running operation polling            │
//! │   └──────────┬──────────┘                                            │
//! ├──────────────┼───────────────────────────────────────────────────────┤
//! │   Ports: ResourceProvider · Inventory · VmOperations · TokenSource   │
//! ├──────────────┼───────────────────────────────────────────────────────┤
//! │   ┌──────────┴──────────┐      ┌──────────────────────────────┐      │
//! │   │   ARM REST client   │      │   In-memory cloud            │      │
//! │   │   (reqwest, backoff)│      │   (--simulate, tests)        │      │
//! │   └─────────────────────┘      └──────────────────────────────┘      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`convergence`]: Drive a resource from any observed state to the desired one
//! - [`deployment`]: Virtual-desktop deployment plan and network diagnostics
//! - [`provider`]: ARM client, credentials, simulator and secret sources
//! - [`settings`]: `.env` settings file handling
//! - [`dashboard`]: HTTP dashboard and JSON API
//! - [`cli`]: Command line subcommands
//! - [`domain`]: Core domain types and ports
//! - [`error`]: Error types and handling

pub mod cli;
pub mod convergence;
pub mod dashboard;
pub mod deployment;
pub mod domain;
pub mod error;
pub mod provider;
pub mod settings;

// Re-export commonly used types
pub use convergence::{ConvergeAction, ConvergeConfig, ConvergeOutcome, Converger};

pub use dashboard::{DashboardConfig, DashboardServer, DashboardState};

pub use deployment::{check_network, AvdDeployment, Deployer, DeploymentReport, NetworkReport};

pub use domain::ports::{
    CloudProvider, CloudProviderRef, Inventory, ProvisioningStatus, ResourceDescriptor, ResourceKey,
    ResourceKind, ResourceProvider, ResourceState, SecretSource, TokenSource, VmOperations,
};
pub use domain::ResourceId;

pub use error::{Error, ErrorAction, Result};

pub use provider::{
    ArmClient, ArmConfig, AuthMethod, Connection, Connector, InMemoryCloud, InMemoryConfig,
    ProviderConfig, ProviderFactory,
};

pub use settings::{AzureSettings, SettingsStore};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
