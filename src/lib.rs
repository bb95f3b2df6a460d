//! SQL Server / Azure SQL permissions engine - Library
//! Reconciles logins, users, roles, memberships and permissions against a declared state

pub mod auth;
pub mod config;
pub mod context;
pub mod db;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod repo;
pub mod resources;
pub mod sql;

pub use config::ProviderConfig;
pub use context::OpContext;
pub use db::Connector;
pub use error::{Diagnostic, Error, NotFoundKind, Result};
pub use repo::Repository;
pub use resources::{ManagedResource, Provider, ReadOutcome, ResourceKind};
