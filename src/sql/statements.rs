//! T-SQL statement builders
//!
//! Every identifier goes through [`quote_identifier`]; values in WHERE clauses
//! are bound parameters. Only passwords in DDL are inlined, as escaped literals.

use crate::db::Statement;
use crate::error::{Error, Result};
use crate::model::{Login, LoginUpdate, PermissionState, RoleScope, User, UserUpdate};
use crate::sql::quote::{permission_keyword, quote_identifier, quote_literal};

// ---- logins ----

const LOGIN_COLUMNS: &str = "SELECT CAST(sp.principal_id AS bigint), sp.name, sp.type, sp.is_disabled, \
     ISNULL(sp.default_database_name, N''), ISNULL(sp.default_language_name, N'') \
     FROM sys.server_principals sp \
     WHERE sp.type IN ('S', 'U', 'G', 'E', 'X')";

pub fn select_login_by_name(name: &str) -> Statement {
    Statement::new(format!("{} AND sp.name = @P1", LOGIN_COLUMNS)).bind_str(name)
}

pub fn select_login_by_id(principal_id: i64) -> Statement {
    Statement::new(format!("{} AND sp.principal_id = @P1", LOGIN_COLUMNS)).bind_int(principal_id)
}

/// `CREATE LOGIN`; `with_defaults` is false where the dialect has no default database/language
pub fn create_login(login: &Login, with_defaults: bool) -> Result<Statement> {
    let name = quote_identifier(&login.name)?;
    if login.external {
        if login.password.is_some() {
            return Err(Error::invalid("a password cannot be set for an external login"));
        }
        return Ok(Statement::new(format!("CREATE LOGIN {} FROM EXTERNAL PROVIDER", name)));
    }

    let password = login
        .password
        .as_deref()
        .filter(|p| !p.is_empty())
        .ok_or_else(|| Error::invalid("a password is required for a SQL login"))?;

    let mut options = vec![format!("PASSWORD = {}", quote_literal(password))];
    push_defaults(
        &mut options,
        with_defaults,
        &login.default_database,
        &login.default_language,
    )?;
    Ok(Statement::new(format!("CREATE LOGIN {} WITH {}", name, options.join(", "))).sensitive())
}

fn push_defaults(options: &mut Vec<String>, allowed: bool, database: &str, language: &str) -> Result<()> {
    if database.is_empty() && language.is_empty() {
        return Ok(());
    }
    if !allowed {
        return Err(Error::invalid(
            "default_database and default_language are not supported for logins on Azure SQL Database",
        ));
    }
    if !database.is_empty() {
        options.push(format!("DEFAULT_DATABASE = {}", quote_identifier(database)?));
    }
    if !language.is_empty() {
        options.push(format!("DEFAULT_LANGUAGE = {}", quote_identifier(language)?));
    }
    Ok(())
}

/// Statements for the fields set in `update`; empty when nothing changes
pub fn alter_login(name: &str, update: &LoginUpdate, with_defaults: bool) -> Result<Vec<Statement>> {
    let quoted = quote_identifier(name)?;
    let mut options = Vec::new();
    if let Some(password) = &update.password {
        if password.is_empty() {
            return Err(Error::invalid("password must not be empty"));
        }
        options.push(format!("PASSWORD = {}", quote_literal(password)));
    }
    push_defaults(
        &mut options,
        with_defaults,
        update.default_database.as_deref().unwrap_or(""),
        update.default_language.as_deref().unwrap_or(""),
    )?;

    let mut stmts = Vec::new();
    if !options.is_empty() {
        let stmt = Statement::new(format!("ALTER LOGIN {} WITH {}", quoted, options.join(", ")));
        stmts.push(if update.password.is_some() { stmt.sensitive() } else { stmt });
    }
    if let Some(disabled) = update.disabled {
        stmts.push(set_login_disabled_quoted(&quoted, disabled));
    }
    Ok(stmts)
}

pub fn set_login_disabled(name: &str, disabled: bool) -> Result<Statement> {
    Ok(set_login_disabled_quoted(&quote_identifier(name)?, disabled))
}

fn set_login_disabled_quoted(quoted: &str, disabled: bool) -> Statement {
    Statement::new(format!(
        "ALTER LOGIN {} {}",
        quoted,
        if disabled { "DISABLE" } else { "ENABLE" }
    ))
}

pub fn drop_login(name: &str) -> Result<Statement> {
    Ok(Statement::new(format!("DROP LOGIN {}", quote_identifier(name)?)))
}

// ---- users ----

const USER_COLUMNS: &str = "SELECT CAST(dp.principal_id AS bigint), dp.name, dp.type, \
     CAST(dp.authentication_type AS bigint), ISNULL(sp.name, N''), \
     ISNULL(dp.default_schema_name, N''), ISNULL(dp.default_language_name, N''), \
     ISNULL(CONVERT(varchar(172), dp.sid, 1), ''), \
     CASE WHEN dp.type IN ('E', 'X') THEN CONVERT(nvarchar(36), CAST(dp.sid AS uniqueidentifier)) ELSE N'' END \
     FROM sys.database_principals dp \
     LEFT JOIN sys.server_principals sp ON sp.sid = dp.sid \
     WHERE dp.type IN ('S', 'U', 'G', 'E', 'X')";

pub fn select_user_by_name(name: &str) -> Statement {
    Statement::new(format!("{} AND dp.name = @P1", USER_COLUMNS)).bind_str(name)
}

pub fn select_user_by_id(principal_id: i64) -> Statement {
    Statement::new(format!("{} AND dp.principal_id = @P1", USER_COLUMNS)).bind_int(principal_id)
}

/// `CREATE USER` for the three user variants; the caller has validated the variant
pub fn create_user(user: &User) -> Result<Statement> {
    let name = quote_identifier(&user.name)?;
    let mut options = Vec::new();

    let head = if user.contained && user.external {
        if let Some(object_id) = &user.object_id {
            let parsed = uuid::Uuid::parse_str(object_id)
                .map_err(|_| Error::invalid(format!("object_id '{}' is not a UUID", object_id)))?;
            options.push(format!("OBJECT_ID = '{}'", parsed.hyphenated()));
        }
        format!("CREATE USER {} FROM EXTERNAL PROVIDER", name)
    } else if user.contained {
        let password = user
            .password
            .as_deref()
            .ok_or_else(|| Error::invalid("a password is required for a contained user"))?;
        options.push(format!("PASSWORD = {}", quote_literal(password)));
        format!("CREATE USER {}", name)
    } else {
        let login = user
            .login_name
            .as_deref()
            .ok_or_else(|| Error::invalid("login_name is required for a user that is not contained"))?;
        format!("CREATE USER {} FOR LOGIN {}", name, quote_identifier(login)?)
    };

    if !user.default_schema.is_empty() {
        options.push(format!("DEFAULT_SCHEMA = {}", quote_identifier(&user.default_schema)?));
    }
    if !user.default_language.is_empty() {
        options.push(format!("DEFAULT_LANGUAGE = {}", quote_identifier(&user.default_language)?));
    }

    let sql = if options.is_empty() {
        head
    } else {
        format!("{} WITH {}", head, options.join(", "))
    };
    let stmt = Statement::new(sql);
    Ok(if user.password.is_some() { stmt.sensitive() } else { stmt })
}

/// `ALTER USER ... WITH ...`; `None` when the update is empty
pub fn alter_user(name: &str, update: &UserUpdate) -> Result<Option<Statement>> {
    let quoted = quote_identifier(name)?;
    let mut options = Vec::new();
    if let Some(password) = &update.password {
        options.push(format!("PASSWORD = {}", quote_literal(password)));
    }
    if let Some(schema) = &update.default_schema {
        options.push(format!("DEFAULT_SCHEMA = {}", quote_identifier(schema)?));
    }
    if let Some(language) = &update.default_language {
        options.push(format!("DEFAULT_LANGUAGE = {}", quote_identifier(language)?));
    }
    if let Some(login) = &update.login_name {
        options.push(format!("LOGIN = {}", quote_identifier(login)?));
    }
    if options.is_empty() {
        return Ok(None);
    }
    let stmt = Statement::new(format!("ALTER USER {} WITH {}", quoted, options.join(", ")));
    Ok(Some(if update.password.is_some() { stmt.sensitive() } else { stmt }))
}

pub fn drop_user(name: &str) -> Result<Statement> {
    Ok(Statement::new(format!("DROP USER {}", quote_identifier(name)?)))
}

// ---- roles ----

fn role_keyword(scope: RoleScope) -> &'static str {
    match scope {
        RoleScope::Server => "SERVER ROLE",
        RoleScope::Database => "ROLE",
    }
}

fn principals_view(scope: RoleScope) -> &'static str {
    match scope {
        RoleScope::Server => "sys.server_principals",
        RoleScope::Database => "sys.database_principals",
    }
}

pub fn select_role(scope: RoleScope, name: &str) -> Statement {
    let view = principals_view(scope);
    Statement::new(format!(
        "SELECT CAST(r.principal_id AS bigint), r.name, r.type, r.type_desc, ISNULL(o.name, N''), r.is_fixed_role \
         FROM {view} r \
         LEFT JOIN {view} o ON o.principal_id = r.owning_principal_id \
         WHERE r.type IN ('R', 'M') AND r.name = @P1",
        view = view
    ))
    .bind_str(name)
}

pub fn create_role(scope: RoleScope, name: &str, owner: Option<&str>) -> Result<Statement> {
    let mut sql = format!("CREATE {} {}", role_keyword(scope), quote_identifier(name)?);
    if let Some(owner) = owner.filter(|o| !o.is_empty()) {
        sql.push_str(&format!(" AUTHORIZATION {}", quote_identifier(owner)?));
    }
    Ok(Statement::new(sql))
}

pub fn rename_role(scope: RoleScope, old: &str, new: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER {} {} WITH NAME = {}",
        role_keyword(scope),
        quote_identifier(old)?,
        quote_identifier(new)?
    )))
}

pub fn alter_role_owner(scope: RoleScope, name: &str, owner: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER AUTHORIZATION ON {}::{} TO {}",
        role_keyword(scope),
        quote_identifier(name)?,
        quote_identifier(owner)?
    )))
}

pub fn drop_role(scope: RoleScope, name: &str) -> Result<Statement> {
    Ok(Statement::new(format!("DROP {} {}", role_keyword(scope), quote_identifier(name)?)))
}

pub fn add_member(scope: RoleScope, role: &str, member: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER {} {} ADD MEMBER {}",
        role_keyword(scope),
        quote_identifier(role)?,
        quote_identifier(member)?
    )))
}

pub fn drop_member(scope: RoleScope, role: &str, member: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "ALTER {} {} DROP MEMBER {}",
        role_keyword(scope),
        quote_identifier(role)?,
        quote_identifier(member)?
    )))
}

pub fn select_members(scope: RoleScope, role: &str) -> Statement {
    let (members, view) = match scope {
        RoleScope::Server => ("sys.server_role_members", "sys.server_principals"),
        RoleScope::Database => ("sys.database_role_members", "sys.database_principals"),
    };
    Statement::new(format!(
        "SELECT m.name FROM {members} rm \
         JOIN {view} r ON r.principal_id = rm.role_principal_id \
         JOIN {view} m ON m.principal_id = rm.member_principal_id \
         WHERE r.name = @P1 ORDER BY m.name",
        members = members,
        view = view
    ))
    .bind_str(role)
}

// ---- permissions ----

/// Securable a permission applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionTarget<'a> {
    Database,
    Schema(&'a str),
    Server,
}

impl PermissionTarget<'_> {
    fn on_clause(&self) -> Result<String> {
        Ok(match self {
            PermissionTarget::Schema(schema) => format!(" ON SCHEMA :: {}", quote_identifier(schema)?),
            PermissionTarget::Database | PermissionTarget::Server => String::new(),
        })
    }
}

/// `GRANT`, `DENY` or `GRANT ... WITH GRANT OPTION` depending on `state`
pub fn grant_permission(
    target: PermissionTarget<'_>,
    role: &str,
    permission: &str,
    state: PermissionState,
) -> Result<Statement> {
    let keyword = permission_keyword(permission)?;
    let on = target.on_clause()?;
    let role = quote_identifier(role)?;
    let sql = match state {
        PermissionState::Grant => format!("GRANT {}{} TO {}", keyword, on, role),
        PermissionState::Deny => format!("DENY {}{} TO {}", keyword, on, role),
        PermissionState::GrantWithGrantOption => {
            format!("GRANT {}{} TO {} WITH GRANT OPTION", keyword, on, role)
        }
    };
    Ok(Statement::new(sql))
}

/// `REVOKE`; grants made with GRANT OPTION are revoked with CASCADE
pub fn revoke_permission(
    target: PermissionTarget<'_>,
    role: &str,
    permission: &str,
    state: PermissionState,
) -> Result<Statement> {
    let keyword = permission_keyword(permission)?;
    let on = target.on_clause()?;
    let mut sql = format!("REVOKE {}{} FROM {}", keyword, on, quote_identifier(role)?);
    if state == PermissionState::GrantWithGrantOption {
        sql.push_str(" CASCADE");
    }
    Ok(Statement::new(sql))
}

/// Permission rows for a grantee at `target`, optionally narrowed to one permission name
pub fn select_permissions(
    target: PermissionTarget<'_>,
    grantee_principal_id: i64,
    permission: Option<&str>,
) -> Result<Statement> {
    let (view, class_filter) = match target {
        PermissionTarget::Database => ("sys.database_permissions", "p.class = 0"),
        PermissionTarget::Schema(_) => ("sys.database_permissions", "p.class = 3 AND p.major_id = SCHEMA_ID(@P2)"),
        PermissionTarget::Server => ("sys.server_permissions", "p.class = 100"),
    };

    let mut sql = format!(
        "SELECT p.permission_name, CAST(p.class AS bigint), p.class_desc, \
         CAST(p.major_id AS bigint), CAST(p.minor_id AS bigint), \
         CAST(p.grantee_principal_id AS bigint), CAST(p.grantor_principal_id AS bigint), \
         p.type, p.state, p.state_desc \
         FROM {} p WHERE p.grantee_principal_id = @P1 AND {}",
        view, class_filter
    );
    let mut stmt_params = vec![];
    if let PermissionTarget::Schema(schema) = target {
        quote_identifier(schema)?;
        stmt_params.push(schema.to_string());
    }
    if let Some(name) = permission {
        let keyword = permission_keyword(name)?;
        sql.push_str(&format!(" AND p.permission_name = @P{}", stmt_params.len() + 2));
        stmt_params.push(keyword);
    }
    sql.push_str(" ORDER BY p.permission_name");

    let mut stmt = Statement::new(sql).bind_int(grantee_principal_id);
    for value in stmt_params {
        stmt = stmt.bind_str(value);
    }
    Ok(stmt)
}
