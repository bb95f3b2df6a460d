//! Database module: executor abstraction, pooled SQL Server backend, connector

mod connector;
mod executor;
mod pool;
mod query;
pub mod sqlserver;

#[cfg(test)]
pub(crate) mod fake;

pub use connector::*;
pub use executor::*;
pub use pool::{TdsConnection, TdsConnectionManager};
pub use query::*;
