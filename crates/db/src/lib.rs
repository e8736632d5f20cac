//! SQLite persistence for PermitFlow: pooled connections, embedded
//! migrations, repositories, and the transactional workflow service.

pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;
pub mod service;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::{SeedDataset, SeedResult};
pub use service::{ServiceOrgDirectory, TransitionReport, WorkflowService};
