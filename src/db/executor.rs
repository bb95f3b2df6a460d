//! Statement executor abstraction
//!
//! Repositories only talk to the backend through this trait, which keeps the
//! SQL construction testable without a live server.

use crate::context::OpContext;
use crate::db::query::{Record, Statement};
use crate::error::Result;
use async_trait::async_trait;

/// Trait that every statement executor must implement.
///
/// Implementations run each statement in autocommit mode; no transaction
/// spans two calls.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a statement that returns no rows; yields the affected row count
    async fn execute(&self, ctx: &OpContext, stmt: &Statement) -> Result<u64>;

    /// Run a query and collect the rows of its first result set
    async fn query(&self, ctx: &OpContext, stmt: &Statement) -> Result<Vec<Record>>;

    /// Run a query expected to return at most one row
    async fn query_opt(&self, ctx: &OpContext, stmt: &Statement) -> Result<Option<Record>> {
        Ok(self.query(ctx, stmt).await?.into_iter().next())
    }
}
