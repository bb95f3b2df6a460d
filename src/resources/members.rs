//! `database_role_members` and `server_role_members`: the member set of one role, reconciled as a whole

use super::{gone_if_missing, ignore_missing, role_not_found_kind, ManagedResource, ReadOutcome, ResourceKind};
use crate::context::OpContext;
use crate::db::Connector;
use crate::error::{Error, Result};
use crate::model::RoleScope;
use crate::reconcile::{is_reserved_member, observe_members, reconcile_members, MembershipStore, RoleMembership};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Managed membership of one role
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleMembers {
    pub role: String,
    #[serde(default)]
    pub members: Vec<String>,
}

/// `database_role_members` or `server_role_members`, depending on scope
pub struct RoleMembersResource {
    connector: Arc<Connector>,
    scope: RoleScope,
}

impl RoleMembersResource {
    pub fn new(connector: Arc<Connector>, scope: RoleScope) -> Self {
        Self { connector, scope }
    }

    async fn converge(&self, ctx: &OpContext, desired: &RoleMembers) -> Result<RoleMembers> {
        let repo = self.connector.repository(ctx).await?;
        let store = RoleMembership::new(&repo, self.scope, &desired.role);
        reconcile_members(&store, ctx, &desired.members).await?;
        Ok(RoleMembers {
            role: desired.role.clone(),
            members: observe_members(&store, ctx, &desired.members).await?,
        })
    }
}

#[async_trait]
impl ManagedResource for RoleMembersResource {
    type State = RoleMembers;

    fn kind(&self) -> ResourceKind {
        match self.scope {
            RoleScope::Server => ResourceKind::ServerRoleMembers,
            RoleScope::Database => ResourceKind::DatabaseRoleMembers,
        }
    }

    async fn create(&self, ctx: &OpContext, desired: &RoleMembers) -> Result<RoleMembers> {
        self.converge(ctx, desired).await
    }

    async fn read(&self, ctx: &OpContext, current: &RoleMembers) -> Result<ReadOutcome<RoleMembers>> {
        let repo = self.connector.repository(ctx).await?;
        let store = RoleMembership::new(&repo, self.scope, &current.role);
        let observed = gone_if_missing(
            self.kind(),
            &current.role,
            role_not_found_kind(self.scope),
            observe_members(&store, ctx, &current.members).await,
        )?;
        Ok(match observed {
            ReadOutcome::Present(members) => ReadOutcome::Present(RoleMembers {
                role: current.role.clone(),
                members,
            }),
            ReadOutcome::Gone => ReadOutcome::Gone,
        })
    }

    async fn update(&self, ctx: &OpContext, prior: &RoleMembers, desired: &RoleMembers) -> Result<RoleMembers> {
        if !prior.role.eq_ignore_ascii_case(&desired.role) {
            return Err(Error::invalid("changing the role of a membership resource requires replacing it"));
        }
        self.converge(ctx, desired).await
    }

    async fn delete(&self, ctx: &OpContext, current: &RoleMembers) -> Result<()> {
        let repo = self.connector.repository(ctx).await?;
        let store = RoleMembership::new(&repo, self.scope, &current.role);
        let managed: Vec<String> = current
            .members
            .iter()
            .filter(|m| !is_reserved_member(m))
            .cloned()
            .collect();
        ignore_missing(role_not_found_kind(self.scope), store.remove(ctx, &managed).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::fake::FakeExecutor;
    use crate::db::EngineEdition;
    use crate::error::classify_server_error;
    use crate::repo::test_support::{name_rows, role_row};
    use crate::resources::test_support::provider;

    fn desired() -> RoleMembers {
        RoleMembers {
            role: "app_readers".into(),
            members: vec!["alice".into(), "bob".into()],
        }
    }

    #[tokio::test]
    async fn test_membership_drift_converges() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "app_readers", false)]);
        fake.respond("role_members", name_rows(&["bob", "carol", "dbo"]));
        fake.respond("role_members", name_rows(&["alice", "bob", "dbo"]));
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").database_role_members();

        let state = handler.create(&OpContext::new(), &desired()).await.unwrap();
        assert_eq!(
            fake.writes(),
            vec![
                "ALTER ROLE [app_readers] ADD MEMBER [alice]",
                "ALTER ROLE [app_readers] DROP MEMBER [carol]",
            ]
        );
        assert_eq!(state, desired());
    }

    #[tokio::test]
    async fn test_no_drift_means_no_writes() {
        let fake = Arc::new(FakeExecutor::new());
        fake.respond("r.type IN ('R', 'M')", vec![role_row(9, "app_readers", false)]);
        fake.respond("role_members", name_rows(&["alice", "bob", "dbo"]));
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").database_role_members();

        let state = handler.update(&OpContext::new(), &desired(), &desired()).await.unwrap();
        assert_eq!(state, desired());
        assert!(fake.writes().is_empty());

        let read = handler.read(&OpContext::new(), &state).await.unwrap();
        assert_eq!(read, ReadOutcome::Present(desired()));
    }

    #[tokio::test]
    async fn test_read_after_role_dropped() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").database_role_members();
        assert!(handler.read(&OpContext::new(), &desired()).await.unwrap().is_gone());
    }

    #[tokio::test]
    async fn test_server_role_members_need_master() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::AzureSqlDatabase, "appdb").server_role_members();
        let err = handler.read(&OpContext::new(), &desired()).await.unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delete_removes_managed_members() {
        let fake = Arc::new(FakeExecutor::new());
        let handler = provider(&fake, EngineEdition::Enterprise, "master").server_role_members();
        let state = RoleMembers {
            role: "ops".into(),
            members: vec!["svc_app".into()],
        };
        handler.delete(&OpContext::new(), &state).await.unwrap();
        assert_eq!(fake.writes(), vec!["ALTER SERVER ROLE [ops] DROP MEMBER [svc_app]"]);
    }

    #[tokio::test]
    async fn test_delete_after_principal_dropped() {
        let fake = Arc::new(FakeExecutor::new());
        fake.fail("DROP MEMBER [carol]", || {
            classify_server_error(
                15151,
                "Cannot drop the principal 'carol', because it does not exist or you do not have permission.",
            )
        });
        let handler = provider(&fake, EngineEdition::Enterprise, "appdb").database_role_members();
        let state = RoleMembers {
            role: "app_readers".into(),
            members: vec!["carol".into(), "dave".into()],
        };
        handler.delete(&OpContext::new(), &state).await.unwrap();
        assert_eq!(fake.writes(), vec!["ALTER ROLE [app_readers] DROP MEMBER [dave]"]);
    }
}
