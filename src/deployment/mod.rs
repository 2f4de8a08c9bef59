//! Virtual-desktop deployment
//!
//! - `templates`: request bodies for each resource kind
//! - `plan`: staged deployment plan and the executor that converges it
//! - `diagnostics`: NIC / NSG / public IP inspection for session hosts

pub mod diagnostics;
pub mod plan;
pub mod templates;

pub use diagnostics::{check_network, NetworkReport, NicReport, NsgReport, RuleSummary};
pub use plan::{AvdDeployment, Deployer, DeploymentReport, ResourceReport, SessionHost, Stage};
pub use templates::{Access, Direction, ImageReference, SecurityRule};
