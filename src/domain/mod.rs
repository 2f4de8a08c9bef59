//! Domain layer - Resource model and port definitions
//!
//! This module defines the resource identity and state types together with
//! the traits (ports) that cloud adapters implement.

pub mod ports;
pub mod resource_id;

pub use ports::*;
pub use resource_id::ResourceId;
