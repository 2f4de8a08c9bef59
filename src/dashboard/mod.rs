//! HTTP dashboard
//!
//! Browser front end and JSON API over the inventory port, plus settings
//! management for the connection.

pub mod rest;
pub mod server;

pub use rest::{router, ApiError, Authenticated, DashboardState};
pub use server::{DashboardConfig, DashboardServer};
