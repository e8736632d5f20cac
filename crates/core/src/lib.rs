//! Approval-workflow core for PermitFlow: templates, instances, candidate
//! quorums, approver resolution, signature integrity, and deadline
//! extensions. Everything in this crate is pure; persistence lives in
//! `permitflow-db`.

pub mod config;
pub mod domain;
pub mod engine;
pub mod errors;
pub mod extension;
pub mod resolve;
pub mod signature;

pub use config::{AppConfig, ConfigError, ConfigOverrides, LoadOptions};
pub use errors::{ApplicationError, DomainError, InterfaceError};
