//! Resource convergence
//!
//! Decides between create, update-in-place and no-op for a declared
//! resource, submits the request and waits for a terminal provisioning state.

pub mod converger;
pub mod diff;

pub use converger::{ConvergeAction, ConvergeConfig, ConvergeOutcome, Converger};
pub use diff::{differences, is_subset};
