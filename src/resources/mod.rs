//! Lifecycle handlers for the managed object kinds
//!
//! Each handler implements [`ManagedResource`] over one state type and gets its
//! repository from the shared [`Connector`], which opens the pool on first use.

mod login;
mod members;
mod permissions;
mod role;
mod user;

pub use login::LoginResource;
pub use members::{RoleMembers, RoleMembersResource};
pub use permissions::{RolePermissions, RolePermissionsResource, RoleSchemaPermissions, SchemaPermissionsResource};
pub use role::RoleResource;
pub use user::UserResource;

use crate::config::ProviderConfig;
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::{Error, NotFoundKind, Result};
use crate::model::RoleScope;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Login,
    User,
    DatabaseRole,
    DatabaseRoleMembers,
    ServerRole,
    ServerRoleMembers,
    PermissionsToRole,
    SchemaPermissions,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 8] = [
        ResourceKind::Login,
        ResourceKind::User,
        ResourceKind::DatabaseRole,
        ResourceKind::DatabaseRoleMembers,
        ResourceKind::ServerRole,
        ResourceKind::ServerRoleMembers,
        ResourceKind::PermissionsToRole,
        ResourceKind::SchemaPermissions,
    ];

    /// Type name the orchestrator uses
    pub fn name(&self) -> &'static str {
        match self {
            ResourceKind::Login => "login",
            ResourceKind::User => "user",
            ResourceKind::DatabaseRole => "database_role",
            ResourceKind::DatabaseRoleMembers => "database_role_members",
            ResourceKind::ServerRole => "server_role",
            ResourceKind::ServerRoleMembers => "server_role_members",
            ResourceKind::PermissionsToRole => "permissions_to_role",
            ResourceKind::SchemaPermissions => "schema_permissions",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of reading a managed object back from the server
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadOutcome<T> {
    Present(T),
    /// The object no longer exists; the orchestrator drops it from state
    Gone,
}

impl<T> ReadOutcome<T> {
    pub fn is_gone(&self) -> bool {
        matches!(self, ReadOutcome::Gone)
    }

    pub fn into_present(self) -> Option<T> {
        match self {
            ReadOutcome::Present(value) => Some(value),
            ReadOutcome::Gone => None,
        }
    }
}

#[async_trait]
pub trait ManagedResource: Send + Sync {
    type State: Clone + Send + Sync;

    fn kind(&self) -> ResourceKind;

    async fn create(&self, ctx: &OpContext, desired: &Self::State) -> Result<Self::State>;

    async fn read(&self, ctx: &OpContext, current: &Self::State) -> Result<ReadOutcome<Self::State>>;

    async fn update(&self, ctx: &OpContext, prior: &Self::State, desired: &Self::State) -> Result<Self::State>;

    /// Removing an object that is already gone succeeds.
    async fn delete(&self, ctx: &OpContext, current: &Self::State) -> Result<()>;

    /// Bring an existing object under management from its identifier.
    async fn import(&self, _ctx: &OpContext, _id: &str) -> Result<Self::State> {
        Err(Error::invalid(format!("import is not supported for {} resources", self.kind())))
    }
}

/// Turn a `NotFound` of the object a resource is keyed on into [`ReadOutcome::Gone`]
pub(crate) fn gone_if_missing<T>(
    kind: ResourceKind,
    id: &str,
    root: NotFoundKind,
    result: Result<T>,
) -> Result<ReadOutcome<T>> {
    match result {
        Ok(value) => Ok(ReadOutcome::Present(value)),
        Err(e) if e.is_not_found_of(root) => {
            tracing::warn!(resource = %kind, id = %id, reason = %e, "object is gone, removing from state");
            Ok(ReadOutcome::Gone)
        }
        Err(e) => Err(e),
    }
}

/// Treat a `NotFound` of `root` as success
pub(crate) fn ignore_missing(root: NotFoundKind, result: Result<()>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found_of(root) => Ok(()),
        other => other,
    }
}

pub(crate) fn role_not_found_kind(scope: RoleScope) -> NotFoundKind {
    match scope {
        RoleScope::Server => NotFoundKind::ServerRole,
        RoleScope::Database => NotFoundKind::DatabaseRole,
    }
}

/// Entry point: one connector shared by every handler of a session
#[derive(Clone)]
pub struct Provider {
    connector: Arc<Connector>,
}

impl Provider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        Ok(Self::with_connector(Arc::new(Connector::new(config.to_connector_config()?))))
    }

    pub fn with_connector(connector: Arc<Connector>) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &Arc<Connector> {
        &self.connector
    }

    pub fn login(&self) -> LoginResource {
        LoginResource::new(Arc::clone(&self.connector))
    }

    pub fn user(&self) -> UserResource {
        UserResource::new(Arc::clone(&self.connector))
    }

    pub fn database_role(&self) -> RoleResource {
        RoleResource::new(Arc::clone(&self.connector), RoleScope::Database)
    }

    pub fn server_role(&self) -> RoleResource {
        RoleResource::new(Arc::clone(&self.connector), RoleScope::Server)
    }

    pub fn database_role_members(&self) -> RoleMembersResource {
        RoleMembersResource::new(Arc::clone(&self.connector), RoleScope::Database)
    }

    pub fn server_role_members(&self) -> RoleMembersResource {
        RoleMembersResource::new(Arc::clone(&self.connector), RoleScope::Server)
    }

    pub fn permissions_to_role(&self) -> RolePermissionsResource {
        RolePermissionsResource::new(Arc::clone(&self.connector))
    }

    pub fn schema_permissions(&self) -> SchemaPermissionsResource {
        SchemaPermissionsResource::new(Arc::clone(&self.connector))
    }
}
