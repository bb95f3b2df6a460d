//! Desired-versus-observed reconciliation for role memberships and permission sets
//!
//! Planning is pure: [`plan_membership`] and [`PermissionPlan::diff`] only
//! compare lists. Applying a plan goes through the [`MembershipStore`] and
//! [`PermissionStore`] traits, which the repository adapters below implement.
//!
//! Canonical ordering: desired entries that are present come first, in desired
//! order and spelling, followed by the remaining observed entries in backend
//! order. When desired and observed already agree the canonical list equals the
//! desired list, so a no-op reconciliation reports no drift.

use crate::context::OpContext;
use crate::error::{Error, Result};
use crate::model::{Permission, PermissionGrant, Role, RoleScope, DBO};
use crate::repo::Repository;
use async_trait::async_trait;
use std::collections::HashSet;

/// Members the reconciler never adds, removes or reports
pub fn is_reserved_member(name: &str) -> bool {
    name.eq_ignore_ascii_case(DBO)
}

fn member_key(name: &str) -> String {
    name.to_lowercase()
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MembershipPlan {
    pub add: Vec<String>,
    pub remove: Vec<String>,
}

impl MembershipPlan {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.remove.is_empty()
    }
}

/// Members to add and remove so that `observed` becomes `desired`.
///
/// Names compare case-insensitively; reserved members are ignored on both sides.
pub fn plan_membership(desired: &[String], observed: &[String]) -> MembershipPlan {
    let observed_keys: HashSet<String> = observed.iter().map(|m| member_key(m)).collect();
    let desired_keys: HashSet<String> = desired.iter().map(|m| member_key(m)).collect();

    let mut seen = HashSet::new();
    let add = desired
        .iter()
        .filter(|m| !is_reserved_member(m))
        .filter(|m| !observed_keys.contains(&member_key(m)))
        .filter(|m| seen.insert(member_key(m)))
        .cloned()
        .collect();
    let remove = observed
        .iter()
        .filter(|m| !is_reserved_member(m))
        .filter(|m| !desired_keys.contains(&member_key(m)))
        .cloned()
        .collect();

    MembershipPlan { add, remove }
}

/// Observed members in canonical order, reserved members excluded.
pub fn canonical_members(desired: &[String], observed: &[String]) -> Vec<String> {
    let observed_keys: HashSet<String> = observed.iter().map(|m| member_key(m)).collect();
    let mut emitted = HashSet::new();
    let mut out = Vec::with_capacity(observed.len());

    for member in desired {
        let key = member_key(member);
        if !is_reserved_member(member) && observed_keys.contains(&key) && emitted.insert(key) {
            out.push(member.clone());
        }
    }
    for member in observed {
        if !is_reserved_member(member) && emitted.insert(member_key(member)) {
            out.push(member.clone());
        }
    }
    out
}

/// Where membership is read from and written to
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn members(&self, ctx: &OpContext) -> Result<Vec<String>>;

    /// Add in order, stopping at the first failure
    async fn add(&self, ctx: &OpContext, members: &[String]) -> Result<()>;

    /// Remove in order, stopping at the first failure
    async fn remove(&self, ctx: &OpContext, members: &[String]) -> Result<()>;
}

/// Membership of one role, backed by the repository
pub struct RoleMembership<'a> {
    repo: &'a Repository,
    scope: RoleScope,
    role: &'a str,
}

impl<'a> RoleMembership<'a> {
    pub fn new(repo: &'a Repository, scope: RoleScope, role: &'a str) -> Self {
        Self { repo, scope, role }
    }
}

#[async_trait]
impl MembershipStore for RoleMembership<'_> {
    async fn members(&self, ctx: &OpContext) -> Result<Vec<String>> {
        self.repo.get_members(ctx, self.scope, self.role).await
    }

    async fn add(&self, ctx: &OpContext, members: &[String]) -> Result<()> {
        self.repo.add_members(ctx, self.scope, self.role, members).await
    }

    async fn remove(&self, ctx: &OpContext, members: &[String]) -> Result<()> {
        self.repo.remove_members(ctx, self.scope, self.role, members).await
    }
}

/// Bring the store's membership to `desired`: additions first, then removals.
pub async fn reconcile_members(
    store: &dyn MembershipStore,
    ctx: &OpContext,
    desired: &[String],
) -> Result<MembershipPlan> {
    let observed = store.members(ctx).await?;
    let plan = plan_membership(desired, &observed);
    if plan.is_empty() {
        return Ok(plan);
    }
    tracing::debug!(add = ?plan.add, remove = ?plan.remove, "reconciling membership");
    store.add(ctx, &plan.add).await?;
    store.remove(ctx, &plan.remove).await?;
    Ok(plan)
}

/// Read the store's membership in canonical order relative to `desired`
pub async fn observe_members(store: &dyn MembershipStore, ctx: &OpContext, desired: &[String]) -> Result<Vec<String>> {
    let observed = store.members(ctx).await?;
    Ok(canonical_members(desired, &observed))
}

// ---- permissions ----

/// Grants/denies to issue and permissions to revoke; revokes are applied first
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PermissionPlan {
    pub revoke: Vec<PermissionGrant>,
    pub grant: Vec<PermissionGrant>,
}

impl PermissionPlan {
    /// Minimal change set. Identity is (name, state), so a state change on one
    /// name becomes a revoke of the old state plus a grant of the new one.
    pub fn diff(desired: &[PermissionGrant], observed: &[PermissionGrant]) -> Self {
        let observed_keys: HashSet<_> = observed.iter().map(PermissionGrant::key).collect();
        let desired_keys: HashSet<_> = desired.iter().map(PermissionGrant::key).collect();

        let mut seen = HashSet::new();
        let grant = desired
            .iter()
            .filter(|p| !observed_keys.contains(&p.key()))
            .filter(|p| seen.insert(p.key()))
            .cloned()
            .collect();
        let mut seen = HashSet::new();
        let revoke = observed
            .iter()
            .filter(|p| !desired_keys.contains(&p.key()))
            .filter(|p| seen.insert(p.key()))
            .cloned()
            .collect();
        Self { revoke, grant }
    }

    /// Revoke everything in `previous` and grant everything in `desired`,
    /// or nothing when the two sets are equal.
    pub fn replace_all(previous: &[PermissionGrant], desired: &[PermissionGrant]) -> Self {
        let previous_keys: HashSet<_> = previous.iter().map(PermissionGrant::key).collect();
        let desired_keys: HashSet<_> = desired.iter().map(PermissionGrant::key).collect();
        if previous_keys == desired_keys {
            return Self::default();
        }
        let mut seen = HashSet::new();
        let revoke = previous.iter().filter(|p| seen.insert(p.key())).cloned().collect();
        let mut seen = HashSet::new();
        let grant = desired.iter().filter(|p| seen.insert(p.key())).cloned().collect();
        Self { revoke, grant }
    }

    pub fn is_empty(&self) -> bool {
        self.revoke.is_empty() && self.grant.is_empty()
    }
}

/// A desired set may name each permission once. The backend keeps a single
/// state per name, so a repeated name could never converge.
pub fn check_unique_permissions(desired: &[PermissionGrant]) -> Result<()> {
    let mut seen = HashSet::new();
    for p in desired {
        if !seen.insert(p.name.trim().to_uppercase()) {
            return Err(Error::invalid(format!(
                "permission {} is listed more than once",
                p.name.trim().to_uppercase()
            )));
        }
    }
    Ok(())
}

/// Observed permissions in canonical order relative to `desired`
pub fn canonical_permissions(desired: &[PermissionGrant], observed: &[PermissionGrant]) -> Vec<PermissionGrant> {
    let observed_keys: HashSet<_> = observed.iter().map(PermissionGrant::key).collect();
    let mut emitted = HashSet::new();
    let mut out = Vec::with_capacity(observed.len());

    for p in desired {
        if observed_keys.contains(&p.key()) && emitted.insert(p.key()) {
            out.push(p.clone());
        }
    }
    for p in observed {
        if emitted.insert(p.key()) {
            out.push(p.clone());
        }
    }
    out
}

/// Where a role's permissions at one securable are read from and written to
#[async_trait]
pub trait PermissionStore: Send + Sync {
    async fn observe(&self, ctx: &OpContext) -> Result<Vec<PermissionGrant>>;

    async fn grant(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()>;

    async fn revoke(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()>;
}

/// Database-scoped permissions of one role
pub struct DatabasePermissions<'a> {
    repo: &'a Repository,
    role: &'a Role,
}

impl<'a> DatabasePermissions<'a> {
    pub fn new(repo: &'a Repository, role: &'a Role) -> Self {
        Self { repo, role }
    }
}

#[async_trait]
impl PermissionStore for DatabasePermissions<'_> {
    async fn observe(&self, ctx: &OpContext) -> Result<Vec<PermissionGrant>> {
        let rows = self.repo.get_database_permissions_for_role(ctx, self.role).await?;
        Ok(rows.iter().map(Permission::grant).collect())
    }

    async fn grant(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()> {
        self.repo
            .grant_permission_to_role(ctx, self.role, &permission.to_permission())
            .await
    }

    async fn revoke(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()> {
        self.repo
            .revoke_permission_from_role(ctx, self.role, &permission.to_permission())
            .await
    }
}

/// Permissions of one role on one schema
pub struct SchemaPermissions<'a> {
    repo: &'a Repository,
    role: &'a Role,
    schema: &'a str,
}

impl<'a> SchemaPermissions<'a> {
    pub fn new(repo: &'a Repository, role: &'a Role, schema: &'a str) -> Self {
        Self { repo, role, schema }
    }
}

#[async_trait]
impl PermissionStore for SchemaPermissions<'_> {
    async fn observe(&self, ctx: &OpContext) -> Result<Vec<PermissionGrant>> {
        let rows = self
            .repo
            .get_schema_permissions_for_role(ctx, self.role, self.schema)
            .await?;
        Ok(rows.iter().map(|p| p.permission.grant()).collect())
    }

    async fn grant(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()> {
        self.repo
            .assign_permission_on_schema_to_role(ctx, self.role, self.schema, &permission.to_permission())
            .await
    }

    async fn revoke(&self, ctx: &OpContext, permission: &PermissionGrant) -> Result<()> {
        self.repo
            .revoke_permission_on_schema_from_role(ctx, self.role, self.schema, &permission.to_permission())
            .await
    }
}

/// Apply `plan`, revokes first. Stops at the first failure; a later pass re-converges.
pub async fn apply_permission_plan(store: &dyn PermissionStore, ctx: &OpContext, plan: &PermissionPlan) -> Result<()> {
    for permission in &plan.revoke {
        store.revoke(ctx, permission).await?;
    }
    for permission in &plan.grant {
        store.grant(ctx, permission).await?;
    }
    Ok(())
}

/// Diff against what the store holds now and apply the result
pub async fn reconcile_permissions(
    store: &dyn PermissionStore,
    ctx: &OpContext,
    desired: &[PermissionGrant],
) -> Result<PermissionPlan> {
    check_unique_permissions(desired)?;
    let observed = store.observe(ctx).await?;
    let plan = PermissionPlan::diff(desired, &observed);
    if !plan.is_empty() {
        tracing::debug!(revoke = plan.revoke.len(), grant = plan.grant.len(), "reconciling permissions");
        apply_permission_plan(store, ctx, &plan).await?;
    }
    Ok(plan)
}

/// Read the store's permissions in canonical order relative to `desired`
pub async fn observe_permissions(
    store: &dyn PermissionStore,
    ctx: &OpContext,
    desired: &[PermissionGrant],
) -> Result<Vec<PermissionGrant>> {
    let observed = store.observe(ctx).await?;
    Ok(canonical_permissions(desired, &observed))
}
